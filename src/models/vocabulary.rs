use serde::{Deserialize, Serialize};

/// One record of the reference vocabulary.
///
/// Serialized with the `is_billable` key so the retriever cache and the
/// feedback blocks use the same shape as the source TSV.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodedEntry {
    pub code: String,
    pub description: String,
    #[serde(rename = "is_billable")]
    pub billable: bool,
}

impl CodedEntry {
    pub fn new(code: &str, description: &str, billable: bool) -> Self {
        Self {
            code: code.to_string(),
            description: description.to_string(),
            billable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_is_billable_key() {
        let entry = CodedEntry::new("J18.9", "Pneumonia, unspecified organism", true);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["is_billable"], true);
        assert!(json.get("billable").is_none());
    }
}
