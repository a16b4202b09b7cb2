use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::codes::{CandidateCode, FinalCode, JudgedCode, RecommendedCode};

/// Coding stage output schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeOutput {
    pub icd10_codes: Vec<CandidateCode>,
}

/// Review and Adjustment stage output schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExplainedOutput {
    pub icd10_codes: Vec<JudgedCode>,
}

/// Physician and Patient stage output schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ExplainedOutputWithRecommendation {
    pub icd10_codes: Vec<RecommendedCode>,
}

/// Public pipeline result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalOutput {
    pub icd10_codes: Vec<FinalCode>,
}

/// Which structured shape a completion call must return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputSchema {
    Code,
    Explained,
    ExplainedWithRecommendation,
}

impl OutputSchema {
    /// Schema name sent to backends that require one.
    pub fn name(self) -> &'static str {
        match self {
            Self::Code => "CodeOutput",
            Self::Explained => "ExplainedOutput",
            Self::ExplainedWithRecommendation => "ExplainedOutputWithRecommendation",
        }
    }

    /// JSON Schema document for this shape.
    pub fn json_schema(self) -> serde_json::Value {
        let schema = match self {
            Self::Code => schemars::schema_for!(CodeOutput),
            Self::Explained => schemars::schema_for!(ExplainedOutput),
            Self::ExplainedWithRecommendation => {
                schemars::schema_for!(ExplainedOutputWithRecommendation)
            }
        };
        serde_json::to_value(schema).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recommendation_schema_lists_both_values() {
        let schema = OutputSchema::ExplainedWithRecommendation.json_schema().to_string();
        assert!(schema.contains("include"));
        assert!(schema.contains("reject"));
        assert!(schema.contains("icd10_codes"));
    }

    #[test]
    fn code_schema_requires_evidence() {
        let schema = OutputSchema::Code.json_schema().to_string();
        assert!(schema.contains("evidence"));
        assert!(!schema.contains("explanation"));
    }

    #[test]
    fn schema_names_are_distinct() {
        assert_ne!(OutputSchema::Code.name(), OutputSchema::Explained.name());
        assert_eq!(
            OutputSchema::ExplainedWithRecommendation.name(),
            "ExplainedOutputWithRecommendation"
        );
    }
}
