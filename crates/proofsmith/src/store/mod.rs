//! Persistence layer: proof variants and the background job queue.
//!
//! Two implementations share the [`ProofStore`] trait: an in-memory store
//! for tests and single-process use, and a Postgres store for deployments.
//! The contract that matters for correctness is `claim_job`: it must be an
//! atomic QUEUED to PROCESSING transition so concurrent workers cannot both
//! process the same job.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;
use crate::types::{AuditStatus, ProofMode, UserIntent, VariantRole};

pub use memory::InMemoryStore;
pub use postgres::PostgresStore;

/// Job type for the deferred background-quality variant.
pub const JOB_TYPE_EXPLAIN_VARIANT: &str = "EXPLAIN_VARIANT";

/// Delay before a failed job becomes due again.
pub const RETRY_DELAY_SECONDS: i64 = 20;

/// Attempt bound for background jobs.
pub const DEFAULT_JOB_MAX_ATTEMPTS: u32 = 3;

/// Newest-first cap on variants returned per run.
pub const VARIANTS_PER_RUN_CAP: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "QUEUED" => Some(Self::Queued),
            "PROCESSING" => Some(Self::Processing),
            "COMPLETED" => Some(Self::Completed),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by an `EXPLAIN_VARIANT` job. Wire keys are camelCase to
/// match the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub run_id: String,
    pub problem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<String>,
    pub user_intent: UserIntent,
    /// Owning user, when the caller is authenticated. Not used by the
    /// worker; carried so multi-tenant frontends can attribute jobs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Mode the background variant runs in (opposite of the fast variant).
    pub mode: ProofMode,
    /// Plan produced by the fast variant, reused to skip re-planning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ProofJob {
    pub id: String,
    pub job_type: String,
    pub run_id: String,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub payload: Value,
    pub last_error: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert shape for a job; the store assigns id and timestamps.
#[derive(Debug, Clone)]
pub struct NewProofJob {
    pub job_type: String,
    pub run_id: String,
    pub max_attempts: u32,
    pub payload: Value,
}

/// Insert shape for a finished variant.
#[derive(Debug, Clone)]
pub struct NewProofVariant {
    pub run_id: String,
    pub problem: String,
    pub attempt: Option<String>,
    pub user_intent: UserIntent,
    pub strategy: String,
    pub confidence_score: f64,
    pub plan_json: Value,
    pub proof_markdown: String,
    pub audit_status: AuditStatus,
    pub audit_report: Value,
    pub attempt_count: u32,
    pub model_primary: String,
    pub model_fallback: String,
    pub models_used: Vec<String>,
    pub latency_ms: u64,
    pub proof_mode: ProofMode,
    pub variant_role: VariantRole,
}

#[derive(Debug, Clone)]
pub struct ProofVariantRecord {
    pub id: String,
    pub run_id: String,
    pub problem: String,
    pub attempt: Option<String>,
    pub user_intent: UserIntent,
    pub strategy: String,
    pub confidence_score: f64,
    pub plan_json: Value,
    pub proof_markdown: String,
    pub audit_status: AuditStatus,
    pub audit_report: Value,
    pub attempt_count: u32,
    pub model_primary: String,
    pub model_fallback: String,
    pub models_used: Vec<String>,
    pub latency_ms: u64,
    pub proof_mode: ProofMode,
    pub variant_role: VariantRole,
    pub created_at: DateTime<Utc>,
}

/// Storage operations the generation service and worker depend on.
#[async_trait]
pub trait ProofStore: Send + Sync {
    async fn persist_variant(
        &self,
        variant: NewProofVariant,
    ) -> Result<ProofVariantRecord, StoreError>;

    /// Variants for a run, newest first, capped at [`VARIANTS_PER_RUN_CAP`].
    async fn variants_by_run(&self, run_id: &str) -> Result<Vec<ProofVariantRecord>, StoreError>;

    /// The run's background-quality variant, if it has completed.
    async fn background_variant(
        &self,
        run_id: &str,
    ) -> Result<Option<ProofVariantRecord>, StoreError>;

    async fn enqueue_job(&self, job: NewProofJob) -> Result<ProofJob, StoreError>;

    async fn get_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError>;

    /// Jobs that are QUEUED and due, oldest first, at most `limit`.
    async fn fetch_due_jobs(&self, limit: usize) -> Result<Vec<ProofJob>, StoreError>;

    /// Atomically transition a QUEUED job to PROCESSING. Returns `None`
    /// when the job is missing or another worker already claimed it.
    async fn claim_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError>;

    async fn complete_job(&self, job_id: &str) -> Result<(), StoreError>;

    /// Record a failure: requeue with a [`RETRY_DELAY_SECONDS`] backoff, or
    /// mark FAILED once the attempt bound is reached. Returns the resulting
    /// status.
    async fn fail_or_requeue_job(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<JobStatus, StoreError>;
}
