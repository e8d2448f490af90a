//! Background job worker.
//!
//! Jobs carry the deferred background-quality variant of a run. A sweep
//! fetches due QUEUED jobs and claims each one individually; a lost claim
//! race is not an error, the other worker simply owns the job. Failures go
//! through the store's retry accounting and become FAILED once the attempt
//! bound is spent.

use std::sync::Arc;

use serde_json::Value;

use crate::config::ModelConfig;
use crate::error::{PipelineError, StoreError};
use crate::pipeline::{run_variant_pipeline, RunVariantPipelineArgs, VariantPipelineResult};
use crate::runners::StageRunners;
use crate::store::{
    JobPayload, JobStatus, NewProofVariant, ProofStore, JOB_TYPE_EXPLAIN_VARIANT,
};
use crate::types::{GenerateRequest, ModelTier, PlanJson, VariantRole};

/// Default number of jobs one sweep pulls.
pub const DEFAULT_SWEEP_BATCH: usize = 5;

/// Hard cap on a single sweep, whatever the caller asks for.
pub const MAX_SWEEP_BATCH: usize = 25;

/// Attempt bound for the background variant's writer/critic loop.
pub const BACKGROUND_MAX_ATTEMPTS: u32 = 2;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub queued_seen: usize,
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Outcome of processing a single job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunOutcome {
    Completed,
    /// Failed this attempt but requeued with backoff.
    Requeued,
    /// Failed terminally.
    Failed,
    /// Another worker claimed the job first, or it is not QUEUED.
    LostRace,
    NotFound,
}

pub struct ProofWorker {
    store: Arc<dyn ProofStore>,
    runners: Arc<dyn StageRunners>,
    config: ModelConfig,
}

/// Build the store row for a finished variant.
pub(crate) fn variant_row(
    result: &VariantPipelineResult,
    request: &GenerateRequest,
    model_primary: &str,
    model_fallback: &str,
) -> Result<NewProofVariant, PipelineError> {
    let payload = &result.payload;
    Ok(NewProofVariant {
        run_id: payload.run_id.clone(),
        problem: request.problem.clone(),
        attempt: request.attempt.clone(),
        user_intent: request.user_intent,
        strategy: payload.strategy.to_string(),
        confidence_score: payload.plan.meta.confidence_score,
        plan_json: serde_json::to_value(&payload.plan)
            .map_err(|err| PipelineError::Internal(err.into()))?,
        proof_markdown: payload.proof_markdown.clone(),
        audit_status: payload.audit.status,
        audit_report: serde_json::to_value(&payload.audit)
            .map_err(|err| PipelineError::Internal(err.into()))?,
        attempt_count: payload.attempts,
        model_primary: model_primary.to_string(),
        model_fallback: model_fallback.to_string(),
        models_used: result.models_used.clone(),
        latency_ms: result.latency_ms,
        proof_mode: payload.mode,
        variant_role: payload.variant_role,
    })
}

fn decode_payload(raw: &Value) -> Result<(JobPayload, Option<PlanJson>), PipelineError> {
    let payload: JobPayload =
        serde_json::from_value(raw.clone()).map_err(|_| PipelineError::InvalidJobPayload)?;
    let plan = match &payload.plan {
        Some(plan) => Some(
            serde_json::from_value::<PlanJson>(plan.clone())
                .map_err(|_| PipelineError::InvalidJobPayload)?,
        ),
        None => None,
    };
    Ok((payload, plan))
}

impl ProofWorker {
    pub fn new(
        store: Arc<dyn ProofStore>,
        runners: Arc<dyn StageRunners>,
        config: ModelConfig,
    ) -> Self {
        Self {
            store,
            runners,
            config,
        }
    }

    /// Claim and run one job end to end.
    pub async fn process_specific_job(&self, job_id: &str) -> Result<JobRunOutcome, StoreError> {
        if self.store.get_job(job_id).await?.is_none() {
            return Ok(JobRunOutcome::NotFound);
        }
        let Some(job) = self.store.claim_job(job_id).await? else {
            tracing::debug!(job_id, "Job claim lost; skipping");
            return Ok(JobRunOutcome::LostRace);
        };

        if job.job_type != JOB_TYPE_EXPLAIN_VARIANT {
            return self
                .record_failure(job_id, &PipelineError::InvalidJobPayload.to_string())
                .await;
        }
        let (payload, existing_plan) = match decode_payload(&job.payload) {
            Ok(decoded) => decoded,
            Err(err) => return self.record_failure(job_id, &err.to_string()).await,
        };

        match self.run_background_variant(&payload, existing_plan).await {
            Ok(()) => {
                self.store.complete_job(job_id).await?;
                tracing::info!(job_id, run_id = %payload.run_id, "Background variant completed");
                Ok(JobRunOutcome::Completed)
            }
            Err(err) => {
                tracing::warn!(job_id, error = %err, "Background variant failed");
                self.record_failure(job_id, &err.to_string()).await
            }
        }
    }

    /// One polling sweep: fetch due jobs and process each claimable one.
    pub async fn process_queued_jobs(
        &self,
        batch: Option<usize>,
    ) -> Result<SweepSummary, StoreError> {
        let limit = batch.unwrap_or(DEFAULT_SWEEP_BATCH).clamp(1, MAX_SWEEP_BATCH);
        let due = self.store.fetch_due_jobs(limit).await?;
        let mut summary = SweepSummary {
            queued_seen: due.len(),
            ..SweepSummary::default()
        };
        for job in due {
            match self.process_specific_job(&job.id).await? {
                JobRunOutcome::Completed => {
                    summary.processed += 1;
                    summary.completed += 1;
                }
                JobRunOutcome::Failed | JobRunOutcome::Requeued => {
                    summary.processed += 1;
                    summary.failed += 1;
                }
                JobRunOutcome::LostRace | JobRunOutcome::NotFound => {}
            }
        }
        Ok(summary)
    }

    async fn record_failure(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<JobRunOutcome, StoreError> {
        match self.store.fail_or_requeue_job(job_id, error).await? {
            JobStatus::Failed => Ok(JobRunOutcome::Failed),
            _ => Ok(JobRunOutcome::Requeued),
        }
    }

    async fn run_background_variant(
        &self,
        payload: &JobPayload,
        existing_plan: Option<PlanJson>,
    ) -> Result<(), PipelineError> {
        let request = GenerateRequest {
            problem: payload.problem.clone(),
            attempt: payload.attempt.clone(),
            user_intent: payload.user_intent,
            mode_preference: payload.mode,
        };
        let result = run_variant_pipeline(
            self.runners.as_ref(),
            RunVariantPipelineArgs {
                run_id: payload.run_id.clone(),
                request: request.clone(),
                mode: payload.mode,
                variant_role: VariantRole::BackgroundQuality,
                is_background: true,
                model_tier: ModelTier::Quality,
                max_attempts: BACKGROUND_MAX_ATTEMPTS,
                existing_plan,
                sink: None,
            },
        )
        .await?;

        let row = variant_row(
            &result,
            &request,
            self.config.model_for_tier(ModelTier::Quality),
            &self.config.model_fallback,
        )?;
        self.store
            .persist_variant(row)
            .await
            .map_err(|err| PipelineError::Internal(anyhow::anyhow!(err.to_string())))?;
        Ok(())
    }
}
