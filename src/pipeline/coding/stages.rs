//! The generating stages of a pipeline run and their shared collaborators.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::agents::{AgentDefinition, AgentDefinitions};
use super::completion::{complete_with_retry, CompletionRequest, CompletionService};
use super::context::StageContext;
use super::feedback::{retrieve_related, CodeFeedback};
use super::prompt::{adjustment_prompt, coding_prompt, judgment_prompt, review_prompt};
use super::validation::validate_codes;
use super::CodingError;
use crate::models::{
    CandidateCode, CodeOutput, CodeRecord, CodedEntry, ExplainedOutput,
    ExplainedOutputWithRecommendation, FinalCode, FinalOutput, JudgedCode, OutputSchema,
    RecommendedCode,
};
use crate::pipeline::reference::ReferenceValidator;
use crate::pipeline::retrieval::Retriever;

/// Process-wide, read-only collaborators shared by every run.
pub struct StageDeps {
    pub completion: Arc<dyn CompletionService>,
    pub validator: Arc<ReferenceValidator>,
    pub retriever: Arc<dyn Retriever>,
    pub agents: AgentDefinitions,
    /// Related codes retrieved per evidence query.
    pub num_candidates: usize,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Perspective {
    Physician,
    Patient,
}

impl Perspective {
    pub fn stage_name(self) -> &'static str {
        match self {
            Self::Physician => "physician",
            Self::Patient => "patient",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Coding,
    Review,
    Judgment(Perspective),
    Adjustment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Coding(Vec<CandidateCode>),
    Review(Vec<JudgedCode>),
    Judgment(Perspective, Vec<RecommendedCode>),
    Adjustment(Vec<JudgedCode>),
}

impl StageOutput {
    pub fn stage_name(&self) -> &'static str {
        match self {
            Self::Coding(_) => Stage::Coding.name(),
            Self::Review(_) => Stage::Review.name(),
            Self::Judgment(p, _) => p.stage_name(),
            Self::Adjustment(_) => Stage::Adjustment.name(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Coding(c) => c.len(),
            Self::Review(c) | Self::Adjustment(c) => c.len(),
            Self::Judgment(_, c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One code of the Adjustment union with the evidence used as its retrieval query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PooledCode {
    pub code: String,
    pub evidence: String,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Review => "review",
            Self::Judgment(p) => p.stage_name(),
            Self::Adjustment => "adjustment",
        }
    }

    pub fn schema(self) -> OutputSchema {
        match self {
            Self::Coding => OutputSchema::Code,
            Self::Review | Self::Adjustment => OutputSchema::Explained,
            Self::Judgment(_) => OutputSchema::ExplainedWithRecommendation,
        }
    }

    fn agent(self, agents: &AgentDefinitions) -> &AgentDefinition {
        match self {
            Self::Coding => &agents.coder,
            Self::Review => &agents.reviewer,
            Self::Judgment(Perspective::Physician) => &agents.physician,
            Self::Judgment(Perspective::Patient) => &agents.patient,
            Self::Adjustment => &agents.adjustor,
        }
    }

    /// Build this stage's prompt from `ctx`, call the completion service and
    /// return the validated output. Does not record into `ctx`.
    pub async fn run(self, deps: &StageDeps, ctx: &StageContext) -> Result<StageOutput, CodingError> {
        let stage = self.name();
        let output = match self {
            Self::Coding => {
                let out: CodeOutput = self.generate(deps, coding_prompt(ctx.note())).await?;
                StageOutput::Coding(validate_codes(out.icd10_codes, &deps.validator, stage))
            }
            Self::Review => {
                let coded = ctx.coding()?;
                let feedback =
                    CodeFeedback::assemble(coded.iter().map(|c| c.code.as_str()), &deps.validator);
                let related =
                    related_codes(deps, coded.iter().map(|c| c.evidence.clone()).collect()).await?;
                let prompt = review_prompt(ctx.note(), coded, &feedback.render(), &related);

                let out: ExplainedOutput = self.generate(deps, prompt).await?;
                StageOutput::Review(validate_codes(out.icd10_codes, &deps.validator, stage))
            }
            Self::Judgment(perspective) => {
                let prompt = judgment_prompt(ctx.note(), ctx.review()?);
                let out: ExplainedOutputWithRecommendation = self.generate(deps, prompt).await?;
                StageOutput::Judgment(
                    perspective,
                    validate_codes(out.icd10_codes, &deps.validator, stage),
                )
            }
            Self::Adjustment => {
                let reviewed = ctx.review()?;
                let physician = ctx.judgment(Perspective::Physician)?;
                let patient = ctx.judgment(Perspective::Patient)?;

                let union = pooled_union(
                    reviewed
                        .iter()
                        .map(|c| c as &dyn CodeRecord)
                        .chain(physician.iter().map(|c| c as &dyn CodeRecord))
                        .chain(patient.iter().map(|c| c as &dyn CodeRecord)),
                );
                let feedback =
                    CodeFeedback::assemble(union.iter().map(|p| p.code.as_str()), &deps.validator);
                let related =
                    related_codes(deps, union.into_iter().map(|p| p.evidence).collect()).await?;
                let prompt = adjustment_prompt(
                    ctx.note(),
                    reviewed,
                    physician,
                    patient,
                    &feedback.render(),
                    &related,
                );

                let out: ExplainedOutput = self.generate(deps, prompt).await?;
                StageOutput::Adjustment(validate_codes(out.icd10_codes, &deps.validator, stage))
            }
        };

        tracing::info!(
            run_id = %ctx.run_id(),
            stage,
            codes = output.len(),
            "Stage complete"
        );
        Ok(output)
    }

    async fn generate<T: DeserializeOwned>(
        self,
        deps: &StageDeps,
        prompt: String,
    ) -> Result<T, CodingError> {
        let request = CompletionRequest {
            system: self.agent(&deps.agents).system_instructions(),
            prompt,
            schema: self.schema(),
        };
        tracing::debug!(stage = self.name(), prompt = %request.prompt, "Stage prompt");

        let value = complete_with_retry(deps.completion.as_ref(), &request, deps.max_retries).await?;
        serde_json::from_value(value).map_err(|e| CodingError::MalformedOutput {
            stage: self.name().to_string(),
            detail: e.to_string(),
        })
    }
}

/// Every distinct code across `records`, first-seen order. Each code's
/// evidence is the first non-blank evidence seen for it.
pub fn pooled_union<'a, I>(records: I) -> Vec<PooledCode>
where
    I: IntoIterator<Item = &'a dyn CodeRecord>,
{
    let mut pooled: Vec<PooledCode> = Vec::new();
    for record in records {
        match pooled.iter_mut().find(|p| p.code == record.code()) {
            Some(existing) => {
                if existing.evidence.trim().is_empty() {
                    existing.evidence = record.evidence().to_string();
                }
            }
            None => pooled.push(PooledCode {
                code: record.code().to_string(),
                evidence: record.evidence().to_string(),
            }),
        }
    }
    pooled
}

/// Related-code retrieval off the async executor; embedding calls may block.
async fn related_codes(deps: &StageDeps, queries: Vec<String>) -> Result<Vec<CodedEntry>, CodingError> {
    let retriever = Arc::clone(&deps.retriever);
    let k = deps.num_candidates;
    let related = tokio::task::spawn_blocking(move || {
        retrieve_related(retriever.as_ref(), queries.iter().map(String::as_str), k)
    })
    .await
    .map_err(|e| CodingError::TaskJoin(e.to_string()))??;
    Ok(related)
}

/// Project the Adjustment output to the public `{code, evidence, description}` triples.
pub fn postprocess(adjusted: &[JudgedCode]) -> FinalOutput {
    FinalOutput {
        icd10_codes: adjusted.iter().cloned().map(FinalCode::from).collect(),
    }
}
