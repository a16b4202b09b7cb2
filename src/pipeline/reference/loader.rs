//! Tab-separated reference vocabulary reader.
//!
//! Expects a header row naming `code`, `description` and `is_billable`.
//! Other columns (e.g. `short_desc`) are ignored.

use std::path::Path;

use std::sync::LazyLock;

use regex::Regex;

use super::ReferenceError;
use crate::models::CodedEntry;

/// Read the vocabulary file at `path`.
pub fn load_vocabulary(path: &Path) -> Result<Vec<CodedEntry>, ReferenceError> {
    let raw = std::fs::read_to_string(path)?;
    let entries = parse_vocabulary(&raw)?;
    tracing::info!(
        path = %path.display(),
        entries = entries.len(),
        "Reference vocabulary loaded"
    );
    Ok(entries)
}

/// Parse vocabulary TSV content.
pub fn parse_vocabulary(raw: &str) -> Result<Vec<CodedEntry>, ReferenceError> {
    let mut lines = raw.lines().enumerate().filter(|(_, l)| !l.trim().is_empty());

    let (_, header) = lines.next().ok_or(ReferenceError::MissingColumn("code"))?;
    let columns: Vec<&str> = header.split('\t').map(str::trim).collect();
    let position = |name: &'static str| {
        columns
            .iter()
            .position(|c| *c == name)
            .ok_or(ReferenceError::MissingColumn(name))
    };
    let code_col = position("code")?;
    let desc_col = position("description")?;
    let billable_col = position("is_billable")?;

    let mut entries = Vec::new();
    for (idx, line) in lines {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split('\t').collect();
        let field = |col: usize, name: &'static str| {
            fields
                .get(col)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .ok_or(ReferenceError::MissingField {
                    line: line_no,
                    field: name,
                })
        };

        let code = field(code_col, "code")?;
        let description = field(desc_col, "description")?;
        let billable = parse_billable(field(billable_col, "is_billable")?).ok_or_else(|| {
            ReferenceError::InvalidBillable {
                line: line_no,
                value: fields[billable_col].trim().to_string(),
            }
        })?;

        entries.push(CodedEntry::new(code, description, billable));
    }

    Ok(entries)
}

fn parse_billable(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

/// Whether `code` has the shape of an ICD-10-CM code (e.g. `E11.65`).
///
/// Shape only. Vocabulary membership is the validity test.
pub fn is_well_formed_icd10(code: &str) -> bool {
    static PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^[A-Z][0-9][0-9A-Z](?:\.[0-9A-Z]{1,4})?$").unwrap());
    PATTERN.is_match(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "code\tshort_desc\tdescription\tis_billable\n\
        A00\tCholera\tCholera\tFalse\n\
        A00.0\tCholera d/t V. cholerae\tCholera due to Vibrio cholerae 01, biovar cholerae\tTrue\n\
        \n\
        J18.9\tPneumonia NOS\tPneumonia, unspecified organism\t1\n";

    #[test]
    fn parses_header_by_name() {
        let entries = parse_vocabulary(SAMPLE).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], CodedEntry::new("A00", "Cholera", false));
        assert!(entries[1].billable);
        assert_eq!(entries[2].description, "Pneumonia, unspecified organism");
    }

    #[test]
    fn missing_column_fails() {
        let err = parse_vocabulary("code\tdescription\nA00\tCholera\n").unwrap_err();
        assert!(matches!(err, ReferenceError::MissingColumn("is_billable")));
    }

    #[test]
    fn missing_description_reports_line() {
        let err = parse_vocabulary("code\tdescription\tis_billable\nA00\t\tTrue\n").unwrap_err();
        assert!(matches!(
            err,
            ReferenceError::MissingField { line: 2, field: "description" }
        ));
    }

    #[test]
    fn bad_billable_flag_fails() {
        let err = parse_vocabulary("code\tdescription\tis_billable\nA00\tCholera\tmaybe\n")
            .unwrap_err();
        assert!(matches!(err, ReferenceError::InvalidBillable { line: 2, .. }));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codes.tsv");
        std::fs::write(&path, SAMPLE).unwrap();
        assert_eq!(load_vocabulary(&path).unwrap().len(), 3);
    }

    #[test]
    fn well_formed_codes() {
        assert!(is_well_formed_icd10("J18.9"));
        assert!(is_well_formed_icd10("E11"));
        assert!(is_well_formed_icd10("S72.001A"));
        assert!(is_well_formed_icd10("C7A.010"));
        assert!(!is_well_formed_icd10("j18.9"));
        assert!(!is_well_formed_icd10("J18."));
        assert!(!is_well_formed_icd10("pneumonia"));
    }
}
