//! Sample sheet parsing for library linkage.

use std::collections::BTreeSet;

use crate::error::{CopyError, Result};

const DATA_SECTIONS: &[&str] = &["BCLConvert_Data", "Data"];
const SAMPLE_ID_COLUMN: &str = "Sample_ID";

/// Extract the sorted, de-duplicated library ids from a sample sheet.
///
/// Reads the `Sample_ID` column of `[BCLConvert_Data]` (v2 sheets), falling
/// back to `[Data]` (v1 sheets).
pub fn library_ids(sample_sheet: &str) -> Result<BTreeSet<String>> {
    for section in DATA_SECTIONS {
        if let Some(rows) = section_rows(sample_sheet, section) {
            return sample_ids(section, &rows);
        }
    }
    Err(CopyError::MalformedManifest(
        "sample sheet has no BCLConvert_Data or Data section".into(),
    ))
}

/// The lines of a `[section]`, up to the next section header.
fn section_rows<'a>(sheet: &'a str, wanted: &str) -> Option<Vec<&'a str>> {
    let mut rows = None;
    for line in sheet.lines().map(str::trim) {
        if let Some(name) = section_name(line) {
            if rows.is_some() {
                break;
            }
            if name.eq_ignore_ascii_case(wanted) {
                rows = Some(Vec::new());
            }
            continue;
        }
        if let Some(rows) = rows.as_mut() {
            rows.push(line);
        }
    }
    rows
}

fn section_name(line: &str) -> Option<&str> {
    let line = line.trim_end_matches(',');
    line.strip_prefix('[')?.strip_suffix(']')
}

fn sample_ids(section: &str, rows: &[&str]) -> Result<BTreeSet<String>> {
    let malformed = |e: csv::Error| {
        CopyError::MalformedManifest(format!("sample sheet section [{}]: {}", section, e))
    };

    let body = rows.join("\n");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let headers = reader.headers().map_err(malformed)?.clone();
    if headers.iter().all(str::is_empty) {
        return Err(CopyError::MalformedManifest(format!(
            "sample sheet section [{}] is empty",
            section
        )));
    }
    let column = headers
        .iter()
        .position(|h| h == SAMPLE_ID_COLUMN)
        .ok_or_else(|| {
            CopyError::MalformedManifest(format!(
                "sample sheet section [{}] has no {} column",
                section, SAMPLE_ID_COLUMN
            ))
        })?;

    let mut ids = BTreeSet::new();
    for record in reader.records() {
        let record = record.map_err(malformed)?;
        if let Some(id) = record.get(column).filter(|id| !id.is_empty()) {
            ids.insert(id.to_string());
        }
    }
    Ok(ids)
}
