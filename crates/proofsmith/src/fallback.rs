//! Fallback executor: primary/fallback model pair with sequential retry.
//!
//! Runs a unit of work against the primary model; on failure, retries once
//! with the configured fallback model unless the failure is a schema
//! violation (a different model will not fix a broken output contract).
//! Attempts are strictly sequential, never raced: each attempt may be an
//! expensive billed call.
//!
//! The result is tagged with the model id that actually produced it;
//! callers need it for billing records and for surfacing substitution
//! events in the UI.

use std::future::Future;

use crate::error::PipelineError;

/// Observer invoked exactly once when the executor switches models.
pub type FallbackObserver<'a> = &'a (dyn Fn(&str, &str) + Send + Sync);

/// A stage result tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome<T> {
    pub result: T,
    pub model_id: String,
}

/// Execute `run` with `primary`; fall back once per the policy above.
///
/// When both attempts fail, the error embeds both underlying messages.
pub async fn execute_with_model_fallback<T, F, Fut>(
    primary: &str,
    fallback: Option<&str>,
    on_fallback: Option<FallbackObserver<'_>>,
    run: F,
) -> Result<StageOutcome<T>, PipelineError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let primary_error = match run(primary.to_string()).await {
        Ok(result) => {
            return Ok(StageOutcome {
                result,
                model_id: primary.to_string(),
            })
        }
        Err(err) => err,
    };

    if !primary_error.triggers_fallback() {
        return Err(primary_error);
    }

    let fallback = match fallback {
        Some(model) if !model.is_empty() && model != primary => model,
        _ => return Err(primary_error),
    };

    if let Some(observer) = on_fallback {
        observer(primary, fallback);
    }
    tracing::warn!(
        from = primary,
        to = fallback,
        error = %primary_error,
        "Primary model failed; retrying with fallback"
    );

    match run(fallback.to_string()).await {
        Ok(result) => Ok(StageOutcome {
            result,
            model_id: fallback.to_string(),
        }),
        Err(fallback_error) => Err(PipelineError::BothModelsFailed {
            primary: primary_error.to_string(),
            fallback: fallback_error.to_string(),
        }),
    }
}
