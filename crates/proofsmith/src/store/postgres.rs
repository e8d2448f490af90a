//! Postgres-backed store.
//!
//! Schema is bootstrapped at connect time with `CREATE TABLE IF NOT
//! EXISTS`; no migration tooling. Job claiming relies on a conditional
//! `UPDATE ... WHERE status = 'QUEUED'` and checks the affected row count,
//! which is the whole concurrency story: the row-level lock serializes
//! racing workers and exactly one of them sees a matching row.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio_postgres::{Client, NoTls, Row};
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{AuditStatus, ProofMode, UserIntent, VariantRole};

use super::{
    JobStatus, NewProofJob, NewProofVariant, ProofJob, ProofStore, ProofVariantRecord,
    RETRY_DELAY_SECONDS, VARIANTS_PER_RUN_CAP,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS proofs (
    id TEXT PRIMARY KEY,
    run_id TEXT NOT NULL,
    problem TEXT NOT NULL,
    attempt TEXT,
    user_intent TEXT NOT NULL,
    strategy TEXT NOT NULL,
    confidence_score DOUBLE PRECISION NOT NULL,
    plan_json JSONB NOT NULL,
    proof_markdown TEXT NOT NULL,
    audit_status TEXT NOT NULL,
    audit_report JSONB NOT NULL,
    attempt_count INTEGER NOT NULL,
    model_primary TEXT NOT NULL,
    model_fallback TEXT NOT NULL,
    models_used JSONB NOT NULL,
    latency_ms BIGINT NOT NULL,
    proof_mode TEXT NOT NULL,
    variant_role TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS proofs_run_id_idx ON proofs (run_id, created_at DESC);

CREATE TABLE IF NOT EXISTS proof_jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    run_id TEXT NOT NULL,
    status TEXT NOT NULL,
    attempt_count INTEGER NOT NULL,
    max_attempts INTEGER NOT NULL,
    payload JSONB NOT NULL,
    last_error TEXT,
    scheduled_at TIMESTAMPTZ NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS proof_jobs_due_idx ON proof_jobs (status, scheduled_at);
";

pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    /// Connect and bootstrap the schema. The connection task is spawned
    /// onto the current runtime and logs on disconnect.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::error!(error = %err, "Postgres connection closed");
            }
        });
        client.batch_execute(SCHEMA).await?;
        Ok(Self { client })
    }
}

fn decode_str_enum<T: serde::de::DeserializeOwned>(raw: &str) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(raw.to_string())).map_err(|_| StoreError::CorruptRecord)
}

fn encode_str_enum<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    match serde_json::to_value(value).map_err(|_| StoreError::CorruptRecord)? {
        Value::String(name) => Ok(name),
        _ => Err(StoreError::CorruptRecord),
    }
}

fn variant_from_row(row: &Row) -> Result<ProofVariantRecord, StoreError> {
    let user_intent: String = row.get("user_intent");
    let audit_status: String = row.get("audit_status");
    let proof_mode: String = row.get("proof_mode");
    let variant_role: String = row.get("variant_role");
    let models_used: Value = row.get("models_used");
    let models_used: Vec<String> =
        serde_json::from_value(models_used).map_err(|_| StoreError::CorruptRecord)?;
    let attempt_count: i32 = row.get("attempt_count");
    let latency_ms: i64 = row.get("latency_ms");

    Ok(ProofVariantRecord {
        id: row.get("id"),
        run_id: row.get("run_id"),
        problem: row.get("problem"),
        attempt: row.get("attempt"),
        user_intent: decode_str_enum::<UserIntent>(&user_intent)?,
        strategy: row.get("strategy"),
        confidence_score: row.get("confidence_score"),
        plan_json: row.get("plan_json"),
        proof_markdown: row.get("proof_markdown"),
        audit_status: decode_str_enum::<AuditStatus>(&audit_status)?,
        audit_report: row.get("audit_report"),
        attempt_count: attempt_count.max(0) as u32,
        model_primary: row.get("model_primary"),
        model_fallback: row.get("model_fallback"),
        models_used,
        latency_ms: latency_ms.max(0) as u64,
        proof_mode: decode_str_enum::<ProofMode>(&proof_mode)?,
        variant_role: decode_str_enum::<VariantRole>(&variant_role)?,
        created_at: row.get("created_at"),
    })
}

fn job_from_row(row: &Row) -> Result<ProofJob, StoreError> {
    let status: String = row.get("status");
    let attempt_count: i32 = row.get("attempt_count");
    let max_attempts: i32 = row.get("max_attempts");
    Ok(ProofJob {
        id: row.get("id"),
        job_type: row.get("job_type"),
        run_id: row.get("run_id"),
        status: JobStatus::parse(&status).ok_or(StoreError::CorruptRecord)?,
        attempt_count: attempt_count.max(0) as u32,
        max_attempts: max_attempts.max(0) as u32,
        payload: row.get("payload"),
        last_error: row.get("last_error"),
        scheduled_at: row.get("scheduled_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl ProofStore for PostgresStore {
    async fn persist_variant(
        &self,
        variant: NewProofVariant,
    ) -> Result<ProofVariantRecord, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let models_used =
            serde_json::to_value(&variant.models_used).map_err(|_| StoreError::CorruptRecord)?;
        self.client
            .execute(
                "INSERT INTO proofs (id, run_id, problem, attempt, user_intent, strategy, \
                 confidence_score, plan_json, proof_markdown, audit_status, audit_report, \
                 attempt_count, model_primary, model_fallback, models_used, latency_ms, \
                 proof_mode, variant_role, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
                 $16, $17, $18, $19)",
                &[
                    &id,
                    &variant.run_id,
                    &variant.problem,
                    &variant.attempt,
                    &encode_str_enum(&variant.user_intent)?,
                    &variant.strategy,
                    &variant.confidence_score,
                    &variant.plan_json,
                    &variant.proof_markdown,
                    &encode_str_enum(&variant.audit_status)?,
                    &variant.audit_report,
                    &(variant.attempt_count as i32),
                    &variant.model_primary,
                    &variant.model_fallback,
                    &models_used,
                    &(variant.latency_ms as i64),
                    &encode_str_enum(&variant.proof_mode)?,
                    &encode_str_enum(&variant.variant_role)?,
                    &created_at,
                ],
            )
            .await?;
        Ok(ProofVariantRecord {
            id,
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
            created_at,
        })
    }

    async fn variants_by_run(&self, run_id: &str) -> Result<Vec<ProofVariantRecord>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT * FROM proofs WHERE run_id = $1 ORDER BY created_at DESC LIMIT $2",
                &[&run_id, &(VARIANTS_PER_RUN_CAP as i64)],
            )
            .await?;
        rows.iter().map(variant_from_row).collect()
    }

    async fn background_variant(
        &self,
        run_id: &str,
    ) -> Result<Option<ProofVariantRecord>, StoreError> {
        let row = self
            .client
            .query_opt(
                "SELECT * FROM proofs WHERE run_id = $1 AND variant_role = 'BACKGROUND_QUALITY' \
                 ORDER BY created_at DESC LIMIT 1",
                &[&run_id],
            )
            .await?;
        row.as_ref().map(variant_from_row).transpose()
    }

    async fn enqueue_job(&self, job: NewProofJob) -> Result<ProofJob, StoreError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        self.client
            .execute(
                "INSERT INTO proof_jobs (id, job_type, run_id, status, attempt_count, \
                 max_attempts, payload, last_error, scheduled_at, created_at, updated_at) \
                 VALUES ($1, $2, $3, 'QUEUED', 0, $4, $5, NULL, $6, $6, $6)",
                &[
                    &id,
                    &job.job_type,
                    &job.run_id,
                    &(job.max_attempts as i32),
                    &job.payload,
                    &now,
                ],
            )
            .await?;
        Ok(ProofJob {
            id,
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
        })
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError> {
        let row = self
            .client
            .query_opt("SELECT * FROM proof_jobs WHERE id = $1", &[&job_id])
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn fetch_due_jobs(&self, limit: usize) -> Result<Vec<ProofJob>, StoreError> {
        let now = Utc::now();
        let rows = self
            .client
            .query(
                "SELECT * FROM proof_jobs WHERE status = 'QUEUED' AND scheduled_at <= $1 \
                 ORDER BY scheduled_at ASC LIMIT $2",
                &[&now, &(limit as i64)],
            )
            .await?;
        rows.iter().map(job_from_row).collect()
    }

    async fn claim_job(&self, job_id: &str) -> Result<Option<ProofJob>, StoreError> {
        let row = self
            .client
            .query_opt(
                "UPDATE proof_jobs SET status = 'PROCESSING', updated_at = $2 \
                 WHERE id = $1 AND status = 'QUEUED' RETURNING *",
                &[&job_id, &Utc::now()],
            )
            .await?;
        row.as_ref().map(job_from_row).transpose()
    }

    async fn complete_job(&self, job_id: &str) -> Result<(), StoreError> {
        let updated = self
            .client
            .execute(
                "UPDATE proof_jobs SET status = 'COMPLETED', attempt_count = attempt_count + 1, \
                 last_error = NULL, updated_at = $2 WHERE id = $1",
                &[&job_id, &Utc::now()],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::JobNotFound(job_id.to_string()));
        }
        Ok(())
    }

    async fn fail_or_requeue_job(
        &self,
        job_id: &str,
        error: &str,
    ) -> Result<JobStatus, StoreError> {
        let now = Utc::now();
        let retry_at: DateTime<Utc> = now + Duration::seconds(RETRY_DELAY_SECONDS);
        let row = self
            .client
            .query_opt(
                "UPDATE proof_jobs SET \
                 attempt_count = attempt_count + 1, \
                 last_error = $2, \
                 updated_at = $3, \
                 status = CASE WHEN attempt_count + 1 >= max_attempts \
                     THEN 'FAILED' ELSE 'QUEUED' END, \
                 scheduled_at = CASE WHEN attempt_count + 1 >= max_attempts \
                     THEN scheduled_at ELSE $4 END \
                 WHERE id = $1 RETURNING status",
                &[&job_id, &error, &now, &retry_at],
            )
            .await?;
        let row = row.ok_or_else(|| StoreError::JobNotFound(job_id.to_string()))?;
        let status: String = row.get("status");
        JobStatus::parse(&status).ok_or(StoreError::CorruptRecord)
    }
}
