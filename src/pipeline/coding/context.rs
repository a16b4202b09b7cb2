//! Per-note accumulated pipeline state.

use uuid::Uuid;

use super::stages::{Perspective, StageOutput};
use super::CodingError;
use crate::models::{CandidateCode, JudgedCode, RecommendedCode};

/// Submitted note plus every stage output recorded so far. Outputs are
/// written once and never replaced. One context per pipeline run.
#[derive(Debug, Clone)]
pub struct StageContext {
    run_id: Uuid,
    note: String,
    coding: Option<Vec<CandidateCode>>,
    review: Option<Vec<JudgedCode>>,
    physician: Option<Vec<RecommendedCode>>,
    patient: Option<Vec<RecommendedCode>>,
    adjustment: Option<Vec<JudgedCode>>,
}

impl StageContext {
    pub fn new(note: &str) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            note: note.to_string(),
            coding: None,
            review: None,
            physician: None,
            patient: None,
            adjustment: None,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn note(&self) -> &str {
        &self.note
    }

    /// Append a stage's validated output.
    pub fn record(&mut self, output: StageOutput) -> Result<(), CodingError> {
        fn put<T>(slot: &mut Option<T>, value: T, stage: &'static str) -> Result<(), CodingError> {
            if slot.is_some() {
                return Err(CodingError::StageAlreadyRecorded(stage));
            }
            *slot = Some(value);
            Ok(())
        }

        let stage = output.stage_name();
        match output {
            StageOutput::Coding(codes) => put(&mut self.coding, codes, stage),
            StageOutput::Review(codes) => put(&mut self.review, codes, stage),
            StageOutput::Judgment(Perspective::Physician, codes) => {
                put(&mut self.physician, codes, stage)
            }
            StageOutput::Judgment(Perspective::Patient, codes) => {
                put(&mut self.patient, codes, stage)
            }
            StageOutput::Adjustment(codes) => put(&mut self.adjustment, codes, stage),
        }
    }

    pub fn coding(&self) -> Result<&[CandidateCode], CodingError> {
        self.coding
            .as_deref()
            .ok_or(CodingError::MissingStageOutput("coding"))
    }

    pub fn review(&self) -> Result<&[JudgedCode], CodingError> {
        self.review
            .as_deref()
            .ok_or(CodingError::MissingStageOutput("review"))
    }

    pub fn judgment(&self, perspective: Perspective) -> Result<&[RecommendedCode], CodingError> {
        let slot = match perspective {
            Perspective::Physician => &self.physician,
            Perspective::Patient => &self.patient,
        };
        slot.as_deref()
            .ok_or(CodingError::MissingStageOutput(perspective.stage_name()))
    }

    pub fn adjustment(&self) -> Result<&[JudgedCode], CodingError> {
        self.adjustment
            .as_deref()
            .ok_or(CodingError::MissingStageOutput("adjustment"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate() -> CandidateCode {
        CandidateCode {
            code: "I10".into(),
            description: "Essential (primary) hypertension".into(),
            evidence: "HTN".into(),
        }
    }

    #[test]
    fn record_then_read() {
        let mut ctx = StageContext::new("note");
        assert!(matches!(ctx.coding(), Err(CodingError::MissingStageOutput("coding"))));
        ctx.record(StageOutput::Coding(vec![candidate()])).unwrap();
        assert_eq!(ctx.coding().unwrap().len(), 1);
        assert_eq!(ctx.note(), "note");
    }

    #[test]
    fn outputs_are_write_once() {
        let mut ctx = StageContext::new("note");
        ctx.record(StageOutput::Coding(vec![candidate()])).unwrap();
        let err = ctx.record(StageOutput::Coding(Vec::new())).unwrap_err();
        assert!(matches!(err, CodingError::StageAlreadyRecorded("coding")));
        assert_eq!(ctx.coding().unwrap().len(), 1);
    }

    #[test]
    fn perspectives_have_separate_slots() {
        let mut ctx = StageContext::new("note");
        ctx.record(StageOutput::Judgment(Perspective::Physician, Vec::new()))
            .unwrap();
        assert!(ctx.judgment(Perspective::Physician).unwrap().is_empty());
        assert!(matches!(
            ctx.judgment(Perspective::Patient),
            Err(CodingError::MissingStageOutput("patient"))
        ));
        ctx.record(StageOutput::Judgment(Perspective::Patient, Vec::new()))
            .unwrap();
        assert!(ctx.judgment(Perspective::Patient).is_ok());
    }

    #[test]
    fn distinct_runs_get_distinct_ids() {
        assert_ne!(StageContext::new("a").run_id(), StageContext::new("a").run_id());
    }
}
