//! Model invocation abstraction.
//!
//! The pipeline never talks to a vendor API directly; it goes through
//! [`ModelProvider`], which covers the two shapes every stage needs:
//! schema-constrained JSON and free text (optionally streamed). The
//! concrete OpenAI-compatible gateway lives in [`openai`].

pub mod openai;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PipelineError;

pub use openai::OpenAiProvider;

/// Callback receiving incremental text chunks during streaming generation.
pub type DeltaObserver<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// One model invocation.
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Per-call deadline; expiry cancels the in-flight call.
    pub timeout: Duration,
    /// JSON schema for structured output. Required for `generate_json`.
    pub schema: Option<serde_json::Value>,
}

/// Invokes a named model with a system/user prompt pair.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Schema-constrained generation. The returned value is the raw JSON;
    /// callers decode and validate it against their typed schema.
    async fn generate_json(
        &self,
        request: &ModelRequest,
    ) -> Result<serde_json::Value, PipelineError>;

    /// Free-text generation. When `on_delta` is supplied the provider
    /// streams chunks through it before returning the full text.
    async fn generate_text(
        &self,
        request: &ModelRequest,
        on_delta: Option<DeltaObserver<'_>>,
    ) -> Result<String, PipelineError>;
}
