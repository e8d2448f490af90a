//! In-memory store for tests and single-process deployments.
//!
//! A single mutex guards both tables. No lock is held across an await, so
//! the synchronous `std::sync::Mutex` is the right tool here.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::VariantRole;

use super::{
    JobStatus, NewProofJob, NewProofVariant, ProofJob, ProofStore, ProofVariantRecord,
    RETRY_DELAY_SECONDS, VARIANTS_PER_RUN_CAP,
};

#[derive(Default)]
struct Tables {
    variants: Vec<ProofVariantRecord>,
    jobs: HashMap<String, ProofJob>,
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProofStore for InMemoryStore {
    async fn persist_variant(
        &self,
        variant: NewProofVariant,
    ) -> Result<ProofVariantRecord, StoreError> {
        let record = ProofVariantRecord {
            id: Uuid::new_v4().to_string(),
            run_id: variant.run_id,
            problem: variant.problem,
            attempt: variant.attempt,
            user_intent: variant.user_intent,
            strategy: variant.strategy,
            confidence_score: variant.confidence_score,
            plan_json: variant.plan_json,
            proof_markdown: variant.proof_markdown,
            audit_status: variant.audit_status,
            audit_report: variant.audit_report,
            attempt_count: variant.attempt_count,
            model_primary: variant.model_primary,
            model_fallback: variant.model_fallback,
            models_used: variant.models_used,
            latency_ms: variant.latency_ms,
            proof_mode: variant.proof_mode,
            variant_role: variant.variant_role,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        tables.variants.push(record.clone());
        Ok(record)
    }

    async fn variants_by_run(&self, run_id: &str) -> Result<Vec<ProofVariantRecord>, StoreError> {
        let tables = self.tables.lock().expect("store mutex poisoned");
        let mut matches: Vec<ProofVariantRecord> = tables
            .variants
            .iter()
            .filter(|variant| variant.run_id == run_id)
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matches.truncate(VARIANTS_PER_RUN_CAP);
        Ok(matches)
    }

    async fn background_variant(
        &self,
        run_id: &str,
    ) -> Result<Option<ProofVariantRecord>, StoreError> {
        let variants = self.variants_by_run(run_id).await?;
        Ok(variants
            .into_iter()
            .find(|variant| variant.variant_role == VariantRole::BackgroundQuality))
    }

    async fn enqueue_job(&self, job: NewProofJob) -> Result<ProofJob, StoreError> {
        let now = Utc::now();
        let record = ProofJob {
            id: Uuid::new_v4().to_string(),
            job_type: job.job_type,
            run_id: job.run_id,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: job.max_attempts,
            payload: job.payload,
            last_error: None,
            scheduled_at: now,
            created_at: now,
            updated_at: now,
        };
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        tables.jobs.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError> {
        let tables = self.tables.lock().expect("store mutex poisoned");
        Ok(tables.jobs.get(job_id).cloned())
    }

    async fn fetch_due_jobs(&self, limit: usize) -> Result<Vec<ProofJob>, StoreError> {
        let now = Utc::now();
        let tables = self.tables.lock().expect("store mutex poisoned");
        let mut due: Vec<ProofJob> = tables
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Queued && job.scheduled_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| a.scheduled_at.cmp(&b.scheduled_at));
        due.truncate(limit);
        Ok(due)
    }

    async fn claim_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn complete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        };
        job.status = JobStatus::Completed;
        job.attempt_count += 1;
        job.last_error = None;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_or_requeue_job(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<JobStatus, StoreError> {
        let mut tables = self.tables.lock().expect("store mutex poisoned");
        let Some(job) = tables.jobs.get_mut(job_id) else {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        };
        let now = Utc::now();
        job.attempt_count += 1;
        job.last_error = Some(error.to_string());
        job.updated_at = now;
        if job.attempt_count >= job.max_attempts {
            job.status = JobStatus::Failed;
        } else {
            job.status = JobStatus::Queued;
            job.scheduled_at = now + Duration::seconds(RETRY_DELAY_SECONDS);
        }
        Ok(job.status)
    }
}
