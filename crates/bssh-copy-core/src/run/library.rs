use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};

#[derive(Deserialize)]
#[serde(untagged)]
enum LibraryEntry {
    Id(String),
    Object {
        #[serde(rename = "libraryId")]
        library_id: String,
    },
}

/// Accept `["L1"]` or `[{"libraryId": "L1", "orcabusId": "lib.X"}]`.
pub(crate) fn deserialize_libraries<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Option<Vec<LibraryEntry>> = Option::deserialize(deserializer)?;
    Ok(entries
        .unwrap_or_default()
        .into_iter()
        .map(|entry| match entry {
            LibraryEntry::Id(id) => id,
            LibraryEntry::Object { library_id } => library_id,
        })
        .filter(|id| !id.is_empty())
        .collect())
}
