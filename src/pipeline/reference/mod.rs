pub mod loader;
pub mod validator;

pub use loader::*;
pub use validator::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReferenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Vocabulary header is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("Line {line}: missing value for '{field}'")]
    MissingField { line: usize, field: &'static str },

    #[error("Line {line}: unrecognised billable flag '{value}'")]
    InvalidBillable { line: usize, value: String },

    #[error("Duplicate code in vocabulary: {0}")]
    DuplicateCode(String),

    #[error("Code not in vocabulary: {0}")]
    UnknownCode(String),
}
