use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Versioned run payload whose `data` only ever grows.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Payload {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Payload {
    /// Create an empty payload.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            data: Map::new(),
        }
    }

    /// Look up a nested field, e.g. `["engineParameters", "outputUri"]`.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        let mut current = self.data.get(*first)?;
        for key in rest {
            current = current.as_object()?.get(*key)?;
        }
        Some(current)
    }

    /// String value of a nested field, if present and non-empty.
    pub fn get_str(&self, path: &[&str]) -> Option<&str> {
        self.get_path(path)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Add a nested field unless it already exists.
    ///
    /// Returns true if the field was added.
    pub fn insert_path(&mut self, path: &[&str], value: Value) -> bool {
        let Some((last, parents)) = path.split_last() else {
            return false;
        };
        let mut current = &mut self.data;
        for key in parents {
            let entry = current
                .entry(key.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            match entry {
                Value::Object(map) => current = map,
                _ => return false,
            }
        }
        if current.contains_key(*last) {
            return false;
        }
        current.insert(last.to_string(), value);
        true
    }

    /// Merge fields from `incoming` without removing or overwriting anything.
    ///
    /// Returns the dotted paths that were added.
    pub fn accrete(&mut self, incoming: &Map<String, Value>) -> Vec<String> {
        let mut added = Vec::new();
        accrete_into(&mut self.data, incoming, "", &mut added);
        added
    }
}

fn accrete_into(
    target: &mut Map<String, Value>,
    incoming: &Map<String, Value>,
    prefix: &str,
    added: &mut Vec<String>,
) {
    for (key, value) in incoming {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), value.clone());
                added.push(path);
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(nested) = value {
                    accrete_into(existing, nested, &path, added);
                }
            }
            Some(Value::Null) if !value.is_null() => {
                target.insert(key.clone(), value.clone());
                added.push(path);
            }
            Some(_) => {}
        }
    }
}
