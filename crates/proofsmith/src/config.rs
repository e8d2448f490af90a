//! Model and runtime configuration resolved from the environment.
//!
//! | Variable                | Required | Default                         |
//! |-------------------------|----------|---------------------------------|
//! | `OPENAI_API_KEY`        | yes      | (none)                          |
//! | `OPENAI_MODEL_FAST`     | yes      | (none)                          |
//! | `OPENAI_MODEL_QUALITY`  | no       | fast model                      |
//! | `OPENAI_MODEL_FOLLOWUP` | no       | fast model                      |
//! | `OPENAI_MODEL_FALLBACK` | no       | fast model                      |
//! | `OPENAI_BASE_URL`       | no       | `https://api.openai.com/v1`     |
//! | `OPENAI_TIMEOUT_MS`     | no       | 20000                           |
//!
//! Non-numeric or non-positive timeout values fall back to the default.

use std::env;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::types::ModelTier;

/// Default per-call model timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 20_000;

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Resolved model routing and timeout configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub base_url: String,
    pub model_fast: String,
    pub model_quality: String,
    pub model_followup: String,
    pub model_fallback: String,
    pub timeout: Duration,
}

impl ModelConfig {
    /// Resolve configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        let api_key = require_env("OPENAI_API_KEY")?;
        let model_fast = require_env("OPENAI_MODEL_FAST")?;
        let model_quality = optional_env("OPENAI_MODEL_QUALITY").unwrap_or_else(|| model_fast.clone());
        let model_followup =
            optional_env("OPENAI_MODEL_FOLLOWUP").unwrap_or_else(|| model_fast.clone());
        let model_fallback =
            optional_env("OPENAI_MODEL_FALLBACK").unwrap_or_else(|| model_fast.clone());
        let base_url = optional_env("OPENAI_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.into());

        Ok(Self {
            api_key,
            base_url,
            model_fast,
            model_quality,
            model_followup,
            model_fallback,
            timeout: Duration::from_millis(resolve_timeout_ms(
                env::var("OPENAI_TIMEOUT_MS").ok().as_deref(),
            )),
        })
    }

    /// The model a stage uses for the given tier.
    pub fn model_for_tier(&self, tier: ModelTier) -> &str {
        match tier {
            ModelTier::Fast => &self.model_fast,
            ModelTier::Quality => &self.model_quality,
        }
    }

    /// The fallback model, or `None` when no distinct fallback is configured.
    pub fn fallback_for(&self, primary: &str) -> Option<&str> {
        if self.model_fallback.is_empty() || self.model_fallback == primary {
            None
        } else {
            Some(&self.model_fallback)
        }
    }
}

fn require_env(key: &str) -> Result<String> {
    match optional_env(key) {
        Some(value) => Ok(value),
        None => bail!("{key} is required in environment configuration."),
    }
}

fn optional_env(key: &str) -> Option<String> {
    let value = env::var(key).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

pub(crate) fn resolve_timeout_ms(raw: Option<&str>) -> u64 {
    let Some(raw) = raw else {
        return DEFAULT_TIMEOUT_MS;
    };
    match raw.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => parsed as u64,
        _ => DEFAULT_TIMEOUT_MS,
    }
}

/// Read a positive-integer env value with a fallback and an upper cap.
///
/// Used by the opportunistic kick knobs, which are capped at 300 seconds.
pub(crate) fn read_positive_int_env(raw: Option<&str>, fallback: u64, max: u64) -> u64 {
    let Some(raw) = raw else {
        return fallback;
    };
    match raw.trim().parse::<i64>() {
        Ok(parsed) if parsed > 0 => (parsed as u64).min(max),
        _ => fallback,
    }
}
