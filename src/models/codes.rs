use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Anything carrying a diagnosis code whose description must track the
/// reference vocabulary.
pub trait CodeRecord {
    fn code(&self) -> &str;
    fn description(&self) -> &str;
    fn evidence(&self) -> &str;
    fn set_description(&mut self, description: String);
}

/// Code proposed by the Coding stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CandidateCode {
    pub code: String,
    pub description: String,
    /// Verbatim excerpt from the note supporting the code.
    pub evidence: String,
}

/// Code with a free-text rationale (Review and Adjustment stages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct JudgedCode {
    pub code: String,
    pub description: String,
    pub evidence: String,
    pub explanation: String,
}

/// Verdict of a judgment stage on one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Recommendation {
    Include,
    Reject,
}

impl Recommendation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Include => "include",
            Self::Reject => "reject",
        }
    }
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Judged code plus an include/reject recommendation (Physician and Patient stages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct RecommendedCode {
    pub code: String,
    pub description: String,
    pub evidence: String,
    pub explanation: String,
    pub recommendation: Recommendation,
}

/// Public result triple. Field order matches the HTTP response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalCode {
    pub code: String,
    pub evidence: String,
    pub description: String,
}

macro_rules! impl_code_record {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl CodeRecord for $ty {
                fn code(&self) -> &str {
                    &self.code
                }

                fn description(&self) -> &str {
                    &self.description
                }

                fn evidence(&self) -> &str {
                    &self.evidence
                }

                fn set_description(&mut self, description: String) {
                    self.description = description;
                }
            }
        )+
    };
}

impl_code_record!(CandidateCode, JudgedCode, RecommendedCode, FinalCode);

impl From<JudgedCode> for FinalCode {
    fn from(code: JudgedCode) -> Self {
        Self {
            code: code.code,
            evidence: code.evidence,
            description: code.description,
        }
    }
}
