//! Threads one note through Coding → Review → (Physician ‖ Patient) →
//! Adjustment → Postprocess, and runs batches of notes concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use tracing::Instrument;

use super::context::StageContext;
use super::stages::{postprocess, Perspective, Stage, StageDeps};
use super::CodingError;
use crate::models::FinalOutput;

pub struct NotesProcessor {
    deps: Arc<StageDeps>,
    max_concurrent: usize,
    run_timeout: Duration,
}

impl NotesProcessor {
    pub fn new(deps: StageDeps, max_concurrent: usize, run_timeout: Duration) -> Self {
        Self {
            deps: Arc::new(deps),
            max_concurrent: max_concurrent.max(1),
            run_timeout,
        }
    }

    pub fn deps(&self) -> &StageDeps {
        &self.deps
    }

    /// Run the full pipeline on one note. Any stage failure fails the run;
    /// no partial result is returned.
    pub async fn process_note(&self, note: &str) -> Result<FinalOutput, CodingError> {
        if note.trim().is_empty() {
            return Err(CodingError::EmptyNote);
        }

        let mut ctx = StageContext::new(note);
        let span = tracing::info_span!("process_note", run_id = %ctx.run_id());
        async move {
            let started = Instant::now();
            let deps = self.deps.as_ref();

            let coding = Stage::Coding.run(deps, &ctx).await?;
            ctx.record(coding)?;

            let review = Stage::Review.run(deps, &ctx).await?;
            ctx.record(review)?;

            let (physician, patient) = tokio::try_join!(
                Stage::Judgment(Perspective::Physician).run(deps, &ctx),
                Stage::Judgment(Perspective::Patient).run(deps, &ctx),
            )?;
            ctx.record(physician)?;
            ctx.record(patient)?;

            let adjustment = Stage::Adjustment.run(deps, &ctx).await?;
            ctx.record(adjustment)?;

            let result = postprocess(ctx.adjustment()?);
            tracing::info!(
                codes = result.icd10_codes.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Pipeline run complete"
            );
            Ok(result)
        }
        .instrument(span)
        .await
    }

    /// `process_note` bounded by the run timeout. Expiry cancels the
    /// in-flight completion call.
    pub async fn process_note_with_timeout(&self, note: &str) -> Result<FinalOutput, CodingError> {
        match tokio::time::timeout(self.run_timeout, self.process_note(note)).await {
            Ok(result) => result,
            Err(_) => {
                let secs = self.run_timeout.as_secs();
                tracing::warn!(timeout_secs = secs, "Pipeline run timed out");
                Err(CodingError::Timeout { secs })
            }
        }
    }

    /// Process independent notes with at most `max_concurrent` runs in
    /// flight. Results are returned in input order.
    pub async fn process_batch(&self, notes: Vec<String>) -> Vec<Result<FinalOutput, CodingError>> {
        let total = notes.len();
        tracing::info!(notes = total, max_concurrent = self.max_concurrent, "Batch started");

        let results: Vec<_> = stream::iter(notes)
            .map(|note| async move { self.process_note_with_timeout(&note).await })
            .buffered(self.max_concurrent)
            .collect()
            .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        tracing::info!(notes = total, failed, "Batch complete");
        results
    }
}
