//! User prompts for each generating stage.

use serde::Serialize;

use crate::models::{CandidateCode, CodedEntry, JudgedCode, RecommendedCode};

const ASSIGN_INSTRUCTION: &str = "Assign as many ICD-10-CM diagnosis codes as possible to this \
discharge summary. Include a minimal verbatim snippet from the note as evidence for each \
diagnosis code. Also return a description of each code.";

const RELATED_INTRO: &str = "The following are alternative ICD-10 codes that are related to the \
diagnoses and evidence presented here. You may consider if any would be a good replacement or \
addition to those already billed:";

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn related_block(related: &[CodedEntry]) -> String {
    related
        .iter()
        .map(|entry| serde_json::to_string(entry).unwrap_or_default())
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn coding_prompt(note: &str) -> String {
    format!(
        "{ASSIGN_INSTRUCTION} Return all output as a JSON object with the specified format.\n\n\
         Clinical Note:\n{note}"
    )
}

pub fn review_prompt(
    note: &str,
    coded: &[CandidateCode],
    feedback: &str,
    related: &[CodedEntry],
) -> String {
    format!(
        "{ASSIGN_INSTRUCTION} Please only use billable codes.\n\n\
         Discharge Summary:\n{note}\n\n\
         Codes from Coder Agent:\n{coded}\n\n\
         Feedback from ICD-10 database lookup of codes:\n{feedback}\n\n\
         {RELATED_INTRO}\n{related}",
        coded = to_json(coded),
        related = related_block(related),
    )
}

pub fn judgment_prompt(note: &str, reviewed: &[JudgedCode]) -> String {
    format!(
        "Review the assigned ICD-10 codes to determine if they are correct or incorrect for the \
         described visit. If incorrect, provide an explanation as to why. Return your answer as a \
         JSON object containing the ICD-10 code, its description, evidence from the discharge \
         summary to support that code, a recommendation to either 'include' or 'reject' the \
         code, and an explanation of your reasoning.\n\n\
         Discharge Summary:\n{note}\n\n\
         Reviewer Assigned Codes:\n{reviewed}",
        reviewed = to_json(reviewed),
    )
}

pub fn adjustment_prompt(
    note: &str,
    reviewed: &[JudgedCode],
    physician: &[RecommendedCode],
    patient: &[RecommendedCode],
    feedback: &str,
    related: &[CodedEntry],
) -> String {
    format!(
        "{ASSIGN_INSTRUCTION}\n\n\
         Discharge Summary:\n{note}\n\n\
         Reviewed Codes:\n{reviewed}\n\n\
         Physician comments on codes:\n{physician}\n\n\
         Patient comments on codes:\n{patient}\n\n\
         Feedback from database on codes from all parties:\n{feedback}\n\n\
         {RELATED_INTRO}\n{related}",
        reviewed = to_json(reviewed),
        physician = to_json(physician),
        patient = to_json(patient),
        related = related_block(related),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recommendation;

    fn judged() -> JudgedCode {
        JudgedCode {
            code: "J18.9".into(),
            description: "Pneumonia, unspecified organism".into(),
            evidence: "community acquired pneumonia".into(),
            explanation: "Documented and treated".into(),
        }
    }

    #[test]
    fn coding_prompt_embeds_note() {
        let prompt = coding_prompt("Pt admitted with CAP.");
        assert!(prompt.ends_with("Clinical Note:\nPt admitted with CAP."));
        assert!(prompt.contains("verbatim snippet"));
    }

    #[test]
    fn review_prompt_has_all_sections() {
        let coded = vec![CandidateCode {
            code: "J18.9".into(),
            description: "Pneumonia".into(),
            evidence: "pneumonia".into(),
        }];
        let related = vec![CodedEntry::new("J15.9", "Unspecified bacterial pneumonia", true)];
        let prompt = review_prompt("note text", &coded, "FEEDBACK-BLOCK", &related);

        assert!(prompt.contains("only use billable codes"));
        assert!(prompt.contains("\"code\": \"J18.9\""));
        assert!(prompt.contains("FEEDBACK-BLOCK"));
        assert!(prompt.contains("J15.9"));
    }

    #[test]
    fn adjustment_prompt_includes_every_perspective() {
        let recommend = |rec| RecommendedCode {
            code: "J18.9".into(),
            description: "Pneumonia, unspecified organism".into(),
            evidence: "pneumonia".into(),
            explanation: "ok".into(),
            recommendation: rec,
        };
        let prompt = adjustment_prompt(
            "note",
            &[judged()],
            &[recommend(Recommendation::Include)],
            &[recommend(Recommendation::Reject)],
            "",
            &[],
        );
        assert!(prompt.contains("Physician comments on codes"));
        assert!(prompt.contains("\"include\""));
        assert!(prompt.contains("\"reject\""));
        assert!(prompt.contains("Documented and treated"));
    }

    #[test]
    fn judgment_prompt_lists_reviewed_codes() {
        let prompt = judgment_prompt("note", &[judged()]);
        assert!(prompt.contains("'include' or 'reject'"));
        assert!(prompt.contains("community acquired pneumonia"));
    }
}
