use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row returned by a provider, keyed by the provider's own field labels.
///
/// Values are kept as strings exactly as the provider sent them; coercion
/// into decimals and timestamps is the normalizer's job.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRecord {
    fields: HashMap<String, String>,
}

impl ProviderRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, handy for fixtures.
    pub fn with(mut self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(label, value);
        self
    }

    pub fn insert(&mut self, label: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(label.into(), value.into());
    }

    /// Returns the trimmed value for `label`, treating blanks as missing.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .get(label)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flattens a JSON object into a record. Strings are kept verbatim,
    /// numbers and booleans are rendered, nulls and nested values are skipped.
    pub fn from_json_object(object: &Map<String, Value>) -> Self {
        let fields = object
            .iter()
            .filter_map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key.clone(), rendered))
            })
            .collect();
        Self { fields }
    }
}
