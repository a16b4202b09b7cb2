//! Directory batch runs: `inputs/input{N}.txt` → `preds/pred{N}.json`.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::pipeline::coding::NotesProcessor;
use crate::pipeline::evaluation::{numbered_files, EvaluationError};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Cannot list notes: {0}")]
    Listing(#[from] EvaluationError),
    #[error("Cannot serialize prediction: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of one directory run. Failed notes are listed, not fatal.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub written: Vec<PathBuf>,
    pub failed: Vec<(String, String)>,
}

/// Code every input note under `dir` and write one prediction per note.
/// A failing note is logged and skipped; the rest are still written.
pub async fn process_directory(
    processor: &NotesProcessor,
    dir: &Path,
) -> Result<BatchReport, BatchError> {
    let input_dir = dir.join("inputs");
    let pred_dir = dir.join("preds");
    let inputs = numbered_files(&input_dir, "input", "txt")?;

    std::fs::create_dir_all(&pred_dir).map_err(|source| BatchError::Io {
        path: pred_dir.clone(),
        source,
    })?;

    let mut report = BatchReport::default();
    let mut numbers = Vec::with_capacity(inputs.len());
    let mut notes = Vec::with_capacity(inputs.len());
    for (number, path) in inputs {
        match std::fs::read_to_string(&path) {
            Ok(note) => {
                numbers.push(number);
                notes.push(note);
            }
            Err(e) => {
                let input_name = format!("input{number}.txt");
                tracing::error!(input = %input_name, error = %e, "Cannot read note");
                report.failed.push((input_name, e.to_string()));
            }
        }
    }

    let results = processor.process_batch(notes).await;
    for (number, result) in numbers.into_iter().zip(results) {
        let input_name = format!("input{number}.txt");
        match result {
            Ok(output) => {
                let pred_path = pred_dir.join(format!("pred{number}.json"));
                let json = serde_json::to_string_pretty(&output)?;
                std::fs::write(&pred_path, json).map_err(|source| BatchError::Io {
                    path: pred_path.clone(),
                    source,
                })?;
                tracing::info!(input = %input_name, codes = output.icd10_codes.len(), "Prediction written");
                report.written.push(pred_path);
            }
            Err(e) => {
                tracing::error!(input = %input_name, error = %e, "Note failed");
                report.failed.push((input_name, e.to_string()));
            }
        }
    }
    Ok(report)
}
