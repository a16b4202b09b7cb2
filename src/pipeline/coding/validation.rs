use crate::models::CodeRecord;
use crate::pipeline::reference::{is_well_formed_icd10, ReferenceValidator};

/// Keep only vocabulary codes and overwrite their descriptions with the
/// canonical text. Applied identically after every generating stage.
pub fn validate_codes<T: CodeRecord>(
    codes: Vec<T>,
    validator: &ReferenceValidator,
    stage: &str,
) -> Vec<T> {
    let proposed = codes.len();
    let mut kept = Vec::with_capacity(proposed);

    for mut record in codes {
        let Some(entry) = validator.lookup(record.code()) else {
            tracing::warn!(
                stage,
                code = record.code(),
                description = record.description(),
                well_formed = is_well_formed_icd10(record.code()),
                "Dropping code not in vocabulary"
            );
            continue;
        };

        if record.description() != entry.description {
            tracing::debug!(
                stage,
                code = record.code(),
                generated = record.description(),
                canonical = %entry.description,
                "Replacing description with vocabulary text"
            );
            record.set_description(entry.description.clone());
        }
        if !entry.billable {
            tracing::debug!(stage, code = record.code(), "Keeping non-billable code");
        }
        kept.push(record);
    }

    if kept.len() < proposed {
        tracing::info!(stage, proposed, kept = kept.len(), "Validation dropped codes");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CandidateCode, CodedEntry, JudgedCode};

    fn validator() -> ReferenceValidator {
        ReferenceValidator::new(vec![
            CodedEntry::new("J18", "Pneumonia, unspecified organism", false),
            CodedEntry::new("J18.9", "Pneumonia, unspecified organism", true),
        ])
        .unwrap()
    }

    fn candidate(code: &str, description: &str) -> CandidateCode {
        CandidateCode {
            code: code.into(),
            description: description.into(),
            evidence: "pneumonia".into(),
        }
    }

    #[test]
    fn drops_unknown_and_keeps_known() {
        let kept = validate_codes(
            vec![candidate("J18.9", "Pneumonia"), candidate("X99.99", "Made up")],
            &validator(),
            "coding",
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].code, "J18.9");
    }

    #[test]
    fn description_always_canonical() {
        let kept = validate_codes(vec![candidate("J18.9", "lung infection")], &validator(), "coding");
        assert_eq!(kept[0].description, "Pneumonia, unspecified organism");
        assert_eq!(kept[0].evidence, "pneumonia");
    }

    #[test]
    fn non_billable_codes_survive() {
        let kept = validate_codes(vec![candidate("J18", "Pneumonia")], &validator(), "review");
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn works_for_richer_records_and_preserves_order() {
        let judged = |code: &str| JudgedCode {
            code: code.into(),
            description: String::new(),
            evidence: "e".into(),
            explanation: "x".into(),
        };
        let kept = validate_codes(
            vec![judged("J18"), judged("nope"), judged("J18.9")],
            &validator(),
            "adjustment",
        );
        let codes: Vec<&str> = kept.iter().map(|c| c.code.as_str()).collect();
        assert_eq!(codes, vec!["J18", "J18.9"]);
        assert!(kept.iter().all(|c| c.explanation == "x"));
    }
}
