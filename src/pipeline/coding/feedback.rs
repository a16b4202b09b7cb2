//! Vocabulary feedback and related-code context for review-type stages.

use crate::models::CodedEntry;
use crate::pipeline::reference::ReferenceValidator;
use crate::pipeline::retrieval::{RetrievalError, Retriever};

/// Candidate codes split by what the vocabulary says about them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeFeedback {
    pub invalid: Vec<String>,
    pub non_billable: Vec<String>,
    pub valid_billable: Vec<CodedEntry>,
}

impl CodeFeedback {
    /// Partition `codes` (deduplicated, first-seen order).
    pub fn assemble<'a, I>(codes: I, validator: &ReferenceValidator) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut feedback = Self::default();
        let mut seen = std::collections::HashSet::new();
        for code in codes {
            if !seen.insert(code) {
                continue;
            }
            match validator.lookup(code) {
                None => feedback.invalid.push(code.to_string()),
                Some(entry) if !entry.billable => {
                    tracing::debug!(code, "Non-billable code in feedback");
                    feedback.non_billable.push(code.to_string());
                }
                Some(entry) => feedback.valid_billable.push(entry.clone()),
            }
        }
        feedback
    }

    pub fn is_empty(&self) -> bool {
        self.invalid.is_empty() && self.non_billable.is_empty() && self.valid_billable.is_empty()
    }

    /// Text block injected into the next stage's prompt. Empty partitions are omitted.
    pub fn render(&self) -> String {
        let mut text = String::new();
        if !self.invalid.is_empty() {
            text.push_str(&format!(
                "The following are not valid ICD-10 codes: {}\n\n",
                self.invalid.join(", ")
            ));
        }
        if !self.non_billable.is_empty() {
            text.push_str(&format!(
                "The following ICD-10 codes are valid but not billable: {}\n\n",
                self.non_billable.join(", ")
            ));
        }
        if !self.valid_billable.is_empty() {
            text.push_str(
                "Definitions of remaining ICD-10 codes that are both valid and billable:\n",
            );
            for entry in &self.valid_billable {
                text.push_str(&serde_json::to_string(entry).unwrap_or_default());
                text.push('\n');
            }
        }
        text
    }
}

/// Retrieve `k` related entries for each evidence query, concatenated in
/// query order. Blank queries are skipped.
pub fn retrieve_related<'a, I>(
    retriever: &dyn Retriever,
    queries: I,
    k: usize,
) -> Result<Vec<CodedEntry>, RetrievalError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut related = Vec::new();
    for query in queries {
        if query.trim().is_empty() {
            tracing::debug!("Skipping related-code retrieval for empty evidence");
            continue;
        }
        related.extend(retriever.retrieve(query, k)?);
    }
    tracing::debug!(
        strategy = retriever.strategy(),
        retrieved = related.len(),
        "Related codes retrieved"
    );
    Ok(related)
}
