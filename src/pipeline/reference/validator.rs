//! In-memory code → record lookup.
//!
//! Built once at startup and shared read-only (`Arc<ReferenceValidator>`)
//! across every pipeline run.

use std::collections::HashMap;

use super::ReferenceError;
use crate::models::CodedEntry;

#[derive(Debug, Clone, Default)]
pub struct ReferenceValidator {
    entries: HashMap<String, CodedEntry>,
}

impl ReferenceValidator {
    /// Build from the full vocabulary. Codes must be unique and every entry
    /// must carry a description.
    pub fn new(entries: Vec<CodedEntry>) -> Result<Self, ReferenceError> {
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.description.trim().is_empty() {
                return Err(ReferenceError::MissingField {
                    line: map.len() + 1,
                    field: "description",
                });
            }
            if map.contains_key(&entry.code) {
                return Err(ReferenceError::DuplicateCode(entry.code));
            }
            map.insert(entry.code.clone(), entry);
        }
        Ok(Self { entries: map })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_valid(&self, code: &str) -> bool {
        self.entries.contains_key(code)
    }

    /// Full record for a code, if present.
    pub fn lookup(&self, code: &str) -> Option<&CodedEntry> {
        self.entries.get(code)
    }

    /// Billable flag. Fails with `UnknownCode` when the code was never validated.
    pub fn is_billable(&self, code: &str) -> Result<bool, ReferenceError> {
        self.require(code).map(|e| e.billable)
    }

    /// Canonical description. Fails with `UnknownCode` when the code was never validated.
    pub fn describe(&self, code: &str) -> Result<&str, ReferenceError> {
        self.require(code).map(|e| e.description.as_str())
    }

    fn require(&self, code: &str) -> Result<&CodedEntry, ReferenceError> {
        self.entries
            .get(code)
            .ok_or_else(|| ReferenceError::UnknownCode(code.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocabulary() -> Vec<CodedEntry> {
        vec![
            CodedEntry::new("J18", "Pneumonia, unspecified organism", false),
            CodedEntry::new("J18.9", "Pneumonia, unspecified organism", true),
            CodedEntry::new("I10", "Essential (primary) hypertension", true),
        ]
    }

    #[test]
    fn every_vocabulary_code_is_valid_and_described() {
        let entries = vocabulary();
        let validator = ReferenceValidator::new(entries.clone()).unwrap();
        for entry in &entries {
            assert!(validator.is_valid(&entry.code));
            assert_eq!(validator.describe(&entry.code).unwrap(), entry.description);
            assert_eq!(validator.is_billable(&entry.code).unwrap(), entry.billable);
        }
        assert_eq!(validator.len(), 3);
    }

    #[test]
    fn unknown_code_is_invalid_and_lookups_fail() {
        let validator = ReferenceValidator::new(vocabulary()).unwrap();
        assert!(!validator.is_valid("Z99.999"));
        assert!(matches!(
            validator.is_billable("Z99.999"),
            Err(ReferenceError::UnknownCode(c)) if c == "Z99.999"
        ));
        assert!(matches!(
            validator.describe("Z99.999"),
            Err(ReferenceError::UnknownCode(_))
        ));
        assert!(validator.lookup("Z99.999").is_none());
    }

    #[test]
    fn duplicate_codes_rejected() {
        let mut entries = vocabulary();
        entries.push(CodedEntry::new("I10", "Hypertension", true));
        assert!(matches!(
            ReferenceValidator::new(entries),
            Err(ReferenceError::DuplicateCode(c)) if c == "I10"
        ));
    }

    #[test]
    fn blank_description_rejected() {
        let entries = vec![CodedEntry::new("I10", "  ", true)];
        assert!(matches!(
            ReferenceValidator::new(entries),
            Err(ReferenceError::MissingField { field: "description", .. })
        ));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let validator = ReferenceValidator::new(vocabulary()).unwrap();
        assert!(!validator.is_valid("j18.9"));
    }
}
