//! Lifecycle event stream for live progress reporting.
//!
//! The pipeline emits a strictly ordered sequence of discriminated events
//! (`status` before the data events that depend on it, `plan` always before
//! the first `draft_delta`). Transport encoding is NDJSON: one JSON object
//! per line. Consumers must tolerate unknown event types and skip malformed
//! lines rather than abort the stream; the `Unknown` variant and
//! [`decode_event_line`] encode that contract.

use std::io::Write;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::{CriticStatus, FinalProofPayload, PlanJson, ProofMode};

/// All events a generation run can emit, tagged on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Human-readable progress line for the current stage.
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attempt: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },

    /// Periodic liveness ping while a slow stage call is in flight.
    Heartbeat {
        stage: String,
        elapsed_ms: u64,
        message: String,
    },

    /// The validated plan, emitted once after the planner settles.
    Plan { data: PlanJson },

    /// Incremental writer output chunk.
    DraftDelta { attempt: u32, delta: String },

    /// The full draft for one attempt.
    DraftComplete { attempt: u32, markdown: String },

    /// Critic verdict for one attempt, gaps already merged with lint warnings.
    Critique {
        attempt: u32,
        status: CriticStatus,
        gaps: Vec<String>,
    },

    /// Terminal payload of the synchronous fast variant.
    FinalFast { data: FinalProofPayload },

    /// The background-quality job was enqueued.
    #[serde(rename_all = "camelCase")]
    BackgroundQueued {
        run_id: String,
        job_id: String,
        mode: ProofMode,
    },

    /// Poll response for a background job.
    #[serde(rename_all = "camelCase")]
    BackgroundUpdate {
        run_id: String,
        job_id: String,
        status: String,
        mode: ProofMode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        proof: Option<Box<FinalProofPayload>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Fatal pipeline error; terminates the stream.
    Error { code: String, message: String },

    /// Forward-compatibility catch-all for event types this build predates.
    #[serde(other)]
    Unknown,
}

impl StreamEvent {
    pub fn status(stage: &str, message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            attempt: None,
            stage: Some(stage.to_string()),
        }
    }

    pub fn status_attempt(stage: &str, attempt: u32, message: impl Into<String>) -> Self {
        Self::Status {
            message: message.into(),
            attempt: Some(attempt),
            stage: Some(stage.to_string()),
        }
    }
}

/// Consumer of the pipeline's event stream.
///
/// Implementations must be cheap and non-blocking; the pipeline calls
/// `emit` inline between model calls.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StreamEvent);
}

/// Writes one JSON object per line to the wrapped writer.
///
/// Serialization or write failures are logged and dropped: a broken
/// progress stream must never fail the generation itself.
pub struct NdjsonSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> NdjsonSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for NdjsonSink<W> {
    fn emit(&self, event: StreamEvent) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to serialize stream event");
                return;
            }
        };
        let mut writer = match self.writer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(err) = writeln!(writer, "{line}") {
            tracing::warn!(error = %err, "Failed to write stream event");
        }
    }
}

/// In-memory sink for tests and event-order assertions.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<StreamEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StreamEvent> {
        match self.events.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: StreamEvent) {
        match self.events.lock() {
            Ok(mut guard) => guard.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

/// Decode one NDJSON line from a streamed transport.
///
/// Returns `None` for blank or malformed lines; callers log and continue.
/// Unknown event types decode to [`StreamEvent::Unknown`] rather than erroring.
pub fn decode_event_line(line: &str) -> Option<StreamEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str(trimmed) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::debug!(error = %err, "Skipping malformed event line");
            None
        }
    }
}
