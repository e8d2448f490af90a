//! Generation service: the request-level orchestration above the variant
//! pipeline.
//!
//! One generation request runs the scope gate, then the synchronous fast
//! variant (streamed to the caller's sink), then enqueues the deferred
//! background-quality variant in the opposite mode, reusing the fast plan.
//! Persistence failures downgrade to a warning event; the caller still gets
//! their proof.
//!
//! Job-status polls double as an opportunistic worker kick: a poll for a
//! job that has sat QUEUED longer than the kick delay fires a one-shot
//! in-process processing attempt, so a deployment without a dedicated
//! worker loop still makes progress. The kick store rate-limits per job id.

use std::collections::HashMap;
use std::env;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::{read_positive_int_env, ModelConfig};
use crate::error::{PipelineError, StoreError};
use crate::events::{EventSink, StreamEvent};
use crate::mental_model::mental_model_for;
use crate::pipeline::{run_variant_pipeline, RunVariantPipelineArgs};
use crate::provider::DeltaObserver;
use crate::runners::{FollowupArgs, StageRunners};
use crate::scope::{assess_math_scope, ScopeClassifier, ScopeResult, ScopeVerdict};
use crate::store::{
    JobPayload, JobStatus, NewProofJob, ProofJob, ProofStore, ProofVariantRecord,
    DEFAULT_JOB_MAX_ATTEMPTS, JOB_TYPE_EXPLAIN_VARIANT,
};
use crate::types::{
    AuditReport, FinalProofPayload, GenerateRequest, ModelTier, PlanJson, ProofMode,
    ProofStrategy, VariantRole,
};
use crate::worker::{variant_row, ProofWorker};
use crate::prompts::FollowupContext;

/// The synchronous variant gets exactly one writer/critic round.
pub const FAST_MAX_ATTEMPTS: u32 = 1;

/// Seconds a job must sit QUEUED before a status poll may kick it.
pub const DEFAULT_KICK_DELAY_SECONDS: u64 = 6;

/// Seconds before the same job may be kicked again.
pub const DEFAULT_RETRIGGER_SECONDS: u64 = 15;

/// Upper bound on both kick knobs.
pub const MAX_KICK_SECONDS: u64 = 300;

/// Process-local rate limiter for opportunistic job kicks.
pub struct KickStore {
    entries: Mutex<HashMap<String, Instant>>,
    delay: Duration,
    retrigger: Duration,
}

impl KickStore {
    pub fn new(delay: Duration, retrigger: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            delay,
            retrigger,
        }
    }

    /// Resolve knobs from `OPPORTUNISTIC_JOB_KICK_DELAY_SECONDS` and
    /// `OPPORTUNISTIC_JOB_RETRIGGER_SECONDS`, both capped at
    /// [`MAX_KICK_SECONDS`].
    pub fn from_env() -> Self {
        let delay = read_positive_int_env(
            env::var("OPPORTUNISTIC_JOB_KICK_DELAY_SECONDS").ok().as_deref(),
            DEFAULT_KICK_DELAY_SECONDS,
            MAX_KICK_SECONDS,
        );
        let retrigger = read_positive_int_env(
            env::var("OPPORTUNISTIC_JOB_RETRIGGER_SECONDS").ok().as_deref(),
            DEFAULT_RETRIGGER_SECONDS,
            MAX_KICK_SECONDS,
        );
        Self::new(Duration::from_secs(delay), Duration::from_secs(retrigger))
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Record a kick for `job_id` unless one fired within the retrigger
    /// window. Expired entries are pruned on the way through.
    pub fn should_trigger(&self, job_id: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("kick store mutex poisoned");
        entries.retain(|_, fired_at| now.duration_since(*fired_at) < self.retrigger);
        if entries.contains_key(job_id) {
            return false;
        }
        entries.insert(job_id.to_string(), now);
        true
    }
}

/// How a generation request ended.
pub enum GenerationOutcome {
    /// The fast variant finished; the background job is queued.
    Completed {
        payload: FinalProofPayload,
        job_id: String,
    },
    /// The scope gate rejected the request outright.
    ScopeBlocked(ScopeResult),
    /// The scope gate wants an explicit user override first.
    ScopeReview(ScopeResult),
}

/// Poll response for a background job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ProofMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proof: Option<Box<FinalProofPayload>>,
}

/// Answer to a follow-up question.
#[derive(Debug, Clone)]
pub struct FollowupAnswer {
    pub markdown: String,
    pub model_id: String,
    /// Whether a stored variant grounded the answer.
    pub used_context: bool,
}

/// A follow-up question about an earlier run.
pub struct FollowupRequest<'a> {
    pub run_id: &'a str,
    pub question: &'a str,
    /// Which variant to ground the answer in. Defaults to the fast one.
    pub variant_role: Option<VariantRole>,
    pub mode_hint: Option<ProofMode>,
    pub on_delta: Option<DeltaObserver<'a>>,
}

pub struct GenerationService {
    store: Arc<dyn ProofStore>,
    runners: Arc<dyn StageRunners>,
    classifier: Option<Arc<dyn ScopeClassifier>>,
    config: ModelConfig,
    worker: Arc<ProofWorker>,
    kicks: KickStore,
}

fn emit(sink: &Option<Arc<dyn EventSink>>, event: StreamEvent) {
    if let Some(sink) = sink {
        sink.emit(event);
    }
}

impl GenerationService {
    pub fn new(
        store: Arc<dyn ProofStore>,
        runners: Arc<dyn StageRunners>,
        classifier: Option<Arc<dyn ScopeClassifier>>,
        config: ModelConfig,
        kicks: KickStore,
    ) -> Self {
        let worker = Arc::new(ProofWorker::new(
            store.clone(),
            runners.clone(),
            config.clone(),
        ));
        Self {
            store,
            runners,
            classifier,
            config,
            worker,
            kicks,
        }
    }

    pub fn worker(&self) -> Arc<ProofWorker> {
        self.worker.clone()
    }

    /// Run the scope gate and, if it passes, the fast variant plus the
    /// background enqueue. `scope_override` lets the user push a REVIEW
    /// verdict through; it never overrides BLOCK.
    pub async fn run_generation(
        &self,
        request: GenerateRequest,
        scope_override: bool,
        sink: Option<Arc<dyn EventSink>>,
    ) -> Result<GenerationOutcome, PipelineError> {
        let scope = assess_math_scope(
            &request.problem,
            request.attempt.as_deref(),
            self.classifier.as_deref(),
        )
        .await;
        match scope.verdict {
            ScopeVerdict::Block => {
                emit(
                    &sink,
                    StreamEvent::Error {
                        code: "SCOPE_BLOCKED".into(),
                        message: scope.reason.clone(),
                    },
                );
                return Ok(GenerationOutcome::ScopeBlocked(scope));
            }
            ScopeVerdict::Review if !scope_override => {
                emit(
                    &sink,
                    StreamEvent::Error {
                        code: "SCOPE_REVIEW".into(),
                        message: scope.reason.clone(),
                    },
                );
                return Ok(GenerationOutcome::ScopeReview(scope));
            }
            _ => {}
        }

        let run_id = Uuid::new_v4().to_string();
        let mode = request.mode_preference;
        let result = match run_variant_pipeline(
            self.runners.as_ref(),
            RunVariantPipelineArgs {
                run_id: run_id.clone(),
                request: request.clone(),
                mode,
                variant_role: VariantRole::FastPrimary,
                is_background: false,
                model_tier: ModelTier::Fast,
                max_attempts: FAST_MAX_ATTEMPTS,
                existing_plan: None,
                sink: sink.clone(),
            },
        )
        .await
        {
            Ok(result) => result,
            Err(err) => {
                emit(
                    &sink,
                    StreamEvent::Error {
                        code: "PIPELINE_ERROR".into(),
                        message: err.to_string(),
                    },
                );
                return Err(err);
            }
        };

        emit(
            &sink,
            StreamEvent::FinalFast {
                data: result.payload.clone(),
            },
        );

        let row = variant_row(
            &result,
            &request,
            self.config.model_for_tier(ModelTier::Fast),
            &self.config.model_fallback,
        )?;
        if let Err(err) = self.store.persist_variant(row).await {
            tracing::warn!(run_id = %run_id, error = %err, "Failed to persist fast variant");
            emit(
                &sink,
                StreamEvent::status("persist", "Warning: proof could not be saved."),
            );
        }

        let background_mode = mode.opposite();
        let payload = JobPayload {
            run_id: run_id.clone(),
            problem: request.problem.clone(),
            attempt: request.attempt.clone(),
            user_intent: request.user_intent,
            user_id: None,
            mode: background_mode,
            plan: Some(
                serde_json::to_value(&result.payload.plan)
                    .map_err(|err| PipelineError::Internal(err.into()))?,
            ),
        };
        let job = self
            .store
            .enqueue_job(NewProofJob {
                job_type: JOB_TYPE_EXPLAIN_VARIANT.into(),
                run_id: run_id.clone(),
                max_attempts: DEFAULT_JOB_MAX_ATTEMPTS,
                payload: serde_json::to_value(&payload)
                    .map_err(|err| PipelineError::Internal(err.into()))?,
            })
            .await
            .map_err(|err| PipelineError::Internal(anyhow::anyhow!(err.to_string())))?;
        emit(
            &sink,
            StreamEvent::BackgroundQueued {
                run_id: run_id.clone(),
                job_id: job.id.clone(),
                mode: background_mode,
            },
        );

        Ok(GenerationOutcome::Completed {
            payload: result.payload,
            job_id: job.id,
        })
    }

    /// Poll a background job, kicking the in-process worker for QUEUED jobs.
    pub async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, StoreError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        let mode = serde_json::from_value::<JobPayload>(job.payload.clone())
            .ok()
            .map(|payload| payload.mode);

        if queued_past_delay(&job, self.kicks.delay(), Utc::now())
            && self.kicks.should_trigger(&job.id)
        {
            let worker = self.worker.clone();
            let kicked_id = job.id.clone();
            tokio::spawn(async move {
                if let Err(err) = worker.process_specific_job(&kicked_id).await {
                    tracing::warn!(job_id = %kicked_id, error = %err, "Opportunistic kick failed");
                }
            });
        }

        if job.status != JobStatus::Completed {
            return Ok(JobStatusResponse {
                job_id: job.id,
                status: job.status,
                mode,
                error: job.last_error,
                proof: None,
            });
        }

        let Some(variant) = self.store.background_variant(&job.run_id).await? else {
            return Ok(JobStatusResponse {
                job_id: job.id,
                status: JobStatus::Failed,
                mode,
                error: Some("Job completed but proof variant record not found.".into()),
                proof: None,
            });
        };
        match rebuild_payload(&variant) {
            Ok(payload) => Ok(JobStatusResponse {
                job_id: job.id,
                status: JobStatus::Completed,
                mode,
                error: None,
                proof: Some(Box::new(payload)),
            }),
            Err(err) => Ok(JobStatusResponse {
                job_id: job.id,
                status: JobStatus::Failed,
                mode,
                error: Some(err.to_string()),
                proof: None,
            }),
        }
    }

    /// Answer a follow-up question grounded in a stored variant.
    pub async fn followup(
        &self,
        request: FollowupRequest<'_>,
    ) -> Result<FollowupAnswer, PipelineError> {
        let variants = self
            .store
            .variants_by_run(request.run_id)
            .await
            .map_err(|err| PipelineError::Internal(anyhow::anyhow!(err.to_string())))?;
        let wanted_role = request.variant_role.unwrap_or(VariantRole::FastPrimary);
        let selected = variants
            .iter()
            .find(|variant| variant.variant_role == wanted_role)
            .or_else(|| variants.first());

        let context = selected.map(|variant| FollowupContext {
            problem: variant.problem.clone(),
            strategy: variant.strategy.clone(),
            variant_role: variant.variant_role.to_string(),
            proof_markdown: variant.proof_markdown.clone(),
        });
        let used_context = context.is_some();
        if !used_context {
            tracing::warn!(run_id = %request.run_id, "Follow-up without any stored variant");
        }
        let mode_hint = request
            .mode_hint
            .or_else(|| selected.map(|variant| variant.proof_mode));

        let outcome = self
            .runners
            .run_followup(FollowupArgs {
                question: request.question,
                mode_hint,
                context: context.as_ref(),
                on_delta: request.on_delta,
                on_fallback: None,
            })
            .await?;
        Ok(FollowupAnswer {
            markdown: outcome.result,
            model_id: outcome.model_id,
            used_context,
        })
    }
}

/// A job qualifies for a kick only once it has sat QUEUED for the full
/// kick delay; a sweep-capable worker usually gets there first.
fn queued_past_delay(job: &ProofJob, delay: Duration, now: DateTime<Utc>) -> bool {
    if job.status != JobStatus::Queued {
        return false;
    }
    match now.signed_duration_since(job.updated_at).to_std() {
        Ok(age) => age >= delay,
        Err(_) => false,
    }
}

/// Rebuild the final payload of a background variant from its stored row.
fn rebuild_payload(variant: &ProofVariantRecord) -> Result<FinalProofPayload, StoreError> {
    let plan: PlanJson =
        serde_json::from_value(variant.plan_json.clone()).map_err(|_| StoreError::CorruptRecord)?;
    let audit: AuditReport = serde_json::from_value(variant.audit_report.clone())
        .map_err(|_| StoreError::CorruptRecord)?;
    let strategy: ProofStrategy =
        serde_json::from_value(serde_json::Value::String(variant.strategy.clone()))
            .map_err(|_| StoreError::CorruptRecord)?;
    Ok(FinalProofPayload {
        run_id: variant.run_id.clone(),
        strategy,
        attempts: variant.attempt_count,
        mode: variant.proof_mode,
        variant_role: variant.variant_role,
        is_background: variant.variant_role == VariantRole::BackgroundQuality,
        mental_model: mental_model_for(strategy),
        plan,
        proof_markdown: variant.proof_markdown.clone(),
        audit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_job(updated_at: DateTime<Utc>) -> ProofJob {
        ProofJob {
            id: "job-1".into(),
            job_type: "EXPLAIN_VARIANT".into(),
            run_id: "run-1".into(),
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: 3,
            payload: serde_json::Value::Null,
            last_error: None,
            scheduled_at: updated_at,
            created_at: updated_at,
            updated_at,
        }
    }

    #[test]
    fn kick_requires_full_queued_age() {
        let now = Utc::now();
        let delay = Duration::from_secs(6);

        let fresh = queued_job(now - chrono::Duration::seconds(2));
        assert!(!queued_past_delay(&fresh, delay, now));

        let stale = queued_job(now - chrono::Duration::seconds(7));
        assert!(queued_past_delay(&stale, delay, now));

        // Clock skew putting the job in the future never qualifies.
        let skewed = queued_job(now + chrono::Duration::seconds(5));
        assert!(!queued_past_delay(&skewed, delay, now));
    }

    #[test]
    fn kick_skips_non_queued_jobs() {
        let now = Utc::now();
        let mut job = queued_job(now - chrono::Duration::seconds(60));
        job.status = JobStatus::Processing;
        assert!(!queued_past_delay(&job, Duration::from_secs(6), now));
    }

    #[test]
    fn kick_store_rate_limits_per_job() {
        let kicks = KickStore::new(Duration::from_secs(6), Duration::from_secs(15));
        assert!(kicks.should_trigger("job-1"));
        assert!(!kicks.should_trigger("job-1"));
        assert!(kicks.should_trigger("job-2"));
    }

    #[test]
    fn kick_store_allows_again_after_window() {
        let kicks = KickStore::new(Duration::from_secs(6), Duration::from_millis(10));
        assert!(kicks.should_trigger("job-1"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(kicks.should_trigger("job-1"));
    }
}
