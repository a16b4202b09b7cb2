//! Offline comparison of predicted code sets against expected ones.
//!
//! Directory layout: `inputs/input{N}.txt`, `outputs/output{N}.json`,
//! `preds/pred{N}.json`, each JSON file shaped `{"icd10_codes": [...]}`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::pipeline::reference::{ReferenceError, ReferenceValidator};

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Reference(#[from] ReferenceError),
}

/// One code record as found in a prediction or expected-output file.
/// Fields other than `code` are carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCode {
    pub code: String,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct CodeFile {
    icd10_codes: Vec<RecordedCode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerSide {
    pub pred: Vec<String>,
    pub output: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairAnalysis {
    pub file_pair: String,
    pub note_text: String,
    pub jaccard_similarity: f64,
    pub common_codes: Vec<String>,
    pub codes_in_pred_only: Vec<RecordedCode>,
    pub codes_in_output_only: Vec<RecordedCode>,
    pub invalid_codes: PerSide,
    pub non_billable_codes: PerSide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub total_pairs: usize,
    pub average_jaccard: f64,
}

impl EvaluationSummary {
    pub fn from_results(results: &[PairAnalysis]) -> Self {
        let total_pairs = results.len();
        let average_jaccard = if total_pairs == 0 {
            0.0
        } else {
            results.iter().map(|r| r.jaccard_similarity).sum::<f64>() / total_pairs as f64
        };
        Self {
            total_pairs,
            average_jaccard,
        }
    }
}

/// `|a ∩ b| / |a ∪ b|`; two empty sets are identical (1.0).
pub fn jaccard_similarity(a: &BTreeSet<&str>, b: &BTreeSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn analyze_pair(
    file_pair: &str,
    note_text: &str,
    predicted: &[RecordedCode],
    expected: &[RecordedCode],
    validator: &ReferenceValidator,
) -> PairAnalysis {
    let pred_codes: BTreeSet<&str> = predicted.iter().map(|c| c.code.as_str()).collect();
    let output_codes: BTreeSet<&str> = expected.iter().map(|c| c.code.as_str()).collect();

    let only_in = |records: &[RecordedCode], other: &BTreeSet<&str>| -> Vec<RecordedCode> {
        records
            .iter()
            .filter(|c| !other.contains(c.code.as_str()))
            .cloned()
            .collect()
    };
    let invalid = |codes: &BTreeSet<&str>| -> Vec<String> {
        codes
            .iter()
            .filter(|c| !validator.is_valid(c))
            .map(|c| c.to_string())
            .collect()
    };
    let non_billable = |codes: &BTreeSet<&str>| -> Vec<String> {
        codes
            .iter()
            .filter(|c| validator.lookup(c).is_some_and(|entry| !entry.billable))
            .map(|c| c.to_string())
            .collect()
    };

    PairAnalysis {
        file_pair: file_pair.to_string(),
        note_text: note_text.to_string(),
        jaccard_similarity: jaccard_similarity(&pred_codes, &output_codes),
        common_codes: pred_codes
            .intersection(&output_codes)
            .map(|c| c.to_string())
            .collect(),
        codes_in_pred_only: only_in(predicted, &output_codes),
        codes_in_output_only: only_in(expected, &pred_codes),
        invalid_codes: PerSide {
            pred: invalid(&pred_codes),
            output: invalid(&output_codes),
        },
        non_billable_codes: PerSide {
            pred: non_billable(&pred_codes),
            output: non_billable(&output_codes),
        },
    }
}

/// Analyze every `preds/pred{N}.json` that has a matching expected output
/// and input note. Pairs with a missing file are skipped.
pub fn analyze_directory(
    base: &Path,
    validator: &ReferenceValidator,
) -> Result<Vec<PairAnalysis>, EvaluationError> {
    let pred_dir = base.join("preds");
    let mut results = Vec::new();

    for (number, pred_path) in numbered_files(&pred_dir, "pred", "json")? {
        let input_path = base.join("inputs").join(format!("input{number}.txt"));
        let output_path = base.join("outputs").join(format!("output{number}.json"));
        if !input_path.is_file() || !output_path.is_file() {
            tracing::warn!(
                pred = %pred_path.display(),
                "Missing input or expected output, skipping pair"
            );
            continue;
        }

        let note_text = read_text(&input_path)?;
        let predicted = read_codes(&pred_path)?;
        let expected = read_codes(&output_path)?;
        let file_pair = format!("pred{number}.json - output{number}.json");

        let analysis = analyze_pair(&file_pair, &note_text, &predicted, &expected, validator);
        tracing::debug!(
            pair = %file_pair,
            jaccard = analysis.jaccard_similarity,
            "Pair analyzed"
        );
        results.push(analysis);
    }

    let summary = EvaluationSummary::from_results(&results);
    tracing::info!(
        pairs = summary.total_pairs,
        average_jaccard = summary.average_jaccard,
        "Evaluation complete"
    );
    Ok(results)
}

/// Files named `{prefix}{N}.{ext}` in `dir`, ordered by `N` then name.
pub fn numbered_files(
    dir: &Path,
    prefix: &str,
    ext: &str,
) -> Result<Vec<(String, PathBuf)>, EvaluationError> {
    let entries = std::fs::read_dir(dir).map_err(|source| EvaluationError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| EvaluationError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(ext) {
            continue;
        }
        let Some(number) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(prefix))
            .map(str::to_string)
        else {
            continue;
        };
        files.push((number, path));
    }

    files.sort_by(|a, b| {
        let key = |n: &str| n.parse::<u64>().unwrap_or(u64::MAX);
        key(&a.0).cmp(&key(&b.0)).then_with(|| a.0.cmp(&b.0))
    });
    Ok(files)
}

fn read_text(path: &Path) -> Result<String, EvaluationError> {
    std::fs::read_to_string(path).map_err(|source| EvaluationError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_codes(path: &Path) -> Result<Vec<RecordedCode>, EvaluationError> {
    let text = read_text(path)?;
    let file: CodeFile = serde_json::from_str(&text).map_err(|source| EvaluationError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(file.icd10_codes)
}
