pub mod completion;
pub mod agents;
pub mod feedback;
pub mod validation;
pub mod prompt;
pub mod context;
pub mod stages;
pub mod orchestrator;

pub use completion::*;
pub use agents::*;
pub use feedback::*;
pub use validation::*;
pub use prompt::*;
pub use context::*;
pub use stages::*;
pub use orchestrator::*;

use thiserror::Error;

use crate::pipeline::retrieval::RetrievalError;

#[derive(Error, Debug)]
pub enum CodingError {
    #[error("Clinical note is empty")]
    EmptyNote,

    #[error("Completion service is not reachable at {0}")]
    CompletionConnection(String),

    #[error("Completion service returned error (status {status}): {body}")]
    CompletionService { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed {stage} output: {detail}")]
    MalformedOutput { stage: String, detail: String },

    #[error("Retrieval failed: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Pipeline run exceeded {secs}s")]
    Timeout { secs: u64 },

    #[error("Stage '{0}' already recorded for this run")]
    StageAlreadyRecorded(&'static str),

    #[error("Stage '{0}' has not produced output yet")]
    MissingStageOutput(&'static str),

    #[error("Background task failed: {0}")]
    TaskJoin(String),

    #[error("Agent definitions: {0}")]
    AgentDefinitions(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
