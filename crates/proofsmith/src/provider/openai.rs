//! OpenAI-compatible chat-completions gateway over reqwest.
//!
//! JSON mode posts `response_format: {type: "json_schema", ...}` and parses
//! the first choice; text mode optionally streams SSE chunks through the
//! caller's delta observer. Error mapping:
//!
//! - upstream bodies mentioning `Invalid schema for response_format` →
//!   [`PipelineError::SchemaValidation`] (the contract is broken, switching
//!   models won't help);
//! - HTTP/transport failures → [`PipelineError::Provider`];
//! - deadline expiry → [`PipelineError::Timeout`]. The whole call runs under
//!   `tokio::time::timeout`, and dropping the future aborts the underlying
//!   HTTP request.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;

use crate::error::PipelineError;
use crate::provider::{DeltaObserver, ModelProvider, ModelRequest};

/// Marker the upstream gateway puts in error bodies when the submitted
/// response_format schema itself is rejected.
const SCHEMA_REJECTION_MARKER: &str = "Invalid schema for response_format";

pub struct OpenAiProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn body_for(&self, request: &ModelRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": request.model,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
            "temperature": request.temperature,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(schema) = &request.schema {
            body["response_format"] = json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "response",
                    "strict": true,
                    "schema": schema,
                },
            });
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response, PipelineError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| PipelineError::Provider(err.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if text.contains(SCHEMA_REJECTION_MARKER) {
            return Err(PipelineError::SchemaValidation(text));
        }
        Err(PipelineError::Provider(format!(
            "Upstream returned {status}: {text}"
        )))
    }

    async fn complete_json(
        &self,
        request: &ModelRequest,
    ) -> Result<serde_json::Value, PipelineError> {
        let body = self.body_for(request, false);
        let response = self.post(&body).await?;
        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|err| PipelineError::Provider(format!("Malformed completion body: {err}")))?;
        let content = first_choice_content(completion)?;
        serde_json::from_str(&content).map_err(|err| {
            PipelineError::SchemaValidation(format!("Model output is not valid JSON: {err}"))
        })
    }

    async fn complete_text(
        &self,
        request: &ModelRequest,
        on_delta: Option<DeltaObserver<'_>>,
    ) -> Result<String, PipelineError> {
        let Some(on_delta) = on_delta else {
            let body = self.body_for(request, false);
            let response = self.post(&body).await?;
            let completion: ChatCompletionResponse = response.json().await.map_err(|err| {
                PipelineError::Provider(format!("Malformed completion body: {err}"))
            })?;
            return first_choice_content(completion);
        };

        let body = self.body_for(request, true);
        let response = self.post(&body).await?;
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();
        let mut full_text = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|err| PipelineError::Provider(err.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            // SSE frames are newline-delimited; hold back the trailing
            // partial line until its terminator arrives.
            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if let Some(delta) = parse_sse_delta(&line) {
                    on_delta(&delta);
                    full_text.push_str(&delta);
                }
            }
        }

        Ok(full_text)
    }
}

fn first_choice_content(completion: ChatCompletionResponse) -> Result<String, PipelineError> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .ok_or_else(|| PipelineError::Provider("Completion contained no choices.".into()))
}

/// Extract the text delta from one SSE line, if it carries one.
///
/// Malformed data lines are skipped rather than failing the stream.
fn parse_sse_delta(line: &str) -> Option<String> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<ChatCompletionChunk>(payload) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()),
        Err(err) => {
            tracing::debug!(error = %err, "Skipping malformed SSE chunk");
            None
        }
    }
}

/// Bound `work` by `timeout`; expiry cancels the in-flight call by dropping
/// its future and surfaces a distinct timeout error.
async fn with_deadline<T, F>(timeout: Duration, work: F) -> Result<T, PipelineError>
where
    F: Future<Output = Result<T, PipelineError>>,
{
    match tokio::time::timeout(timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout(timeout.as_millis() as u64)),
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn generate_json(
        &self,
        request: &ModelRequest,
    ) -> Result<serde_json::Value, PipelineError> {
        with_deadline(request.timeout, self.complete_json(request)).await
    }

    async fn generate_text(
        &self,
        request: &ModelRequest,
        on_delta: Option<DeltaObserver<'_>>,
    ) -> Result<String, PipelineError> {
        with_deadline(request.timeout, self.complete_text(request, on_delta)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_response_format_only_with_schema() {
        let provider = OpenAiProvider::new("https://api.openai.com/v1", "key");
        let mut request = ModelRequest {
            model: "gpt-4.1".into(),
            system: "sys".into(),
            user: "user".into(),
            temperature: 0.1,
            timeout: Duration::from_secs(20),
            schema: None,
        };

        let body = provider.body_for(&request, false);
        assert!(body.get("response_format").is_none());
        assert!(body.get("stream").is_none());

        request.schema = Some(json!({"type": "object"}));
        let body = provider.body_for(&request, true);
        assert_eq!(body["response_format"]["type"], "json_schema");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn completions_url_handles_trailing_slash() {
        let provider = OpenAiProvider::new("http://localhost:8080/v1/", "key");
        assert_eq!(
            provider.completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn sse_delta_parsing() {
        let line = r#"data: {"choices":[{"delta":{"content":"Hence"}}]}"#;
        assert_eq!(parse_sse_delta(line).as_deref(), Some("Hence"));

        assert_eq!(parse_sse_delta("data: [DONE]"), None);
        assert_eq!(parse_sse_delta(""), None);
        assert_eq!(parse_sse_delta(": keepalive comment"), None);
        assert_eq!(parse_sse_delta("data: {broken json"), None);
        // Role-only chunks carry no content.
        assert_eq!(
            parse_sse_delta(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            None
        );
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_expiry_maps_to_timeout_error() {
        let err = with_deadline(Duration::from_millis(500), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, PipelineError>(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout(500)));
        assert_eq!(err.to_string(), "Model call timed out after 500ms.");
    }

    #[tokio::test]
    async fn deadline_passes_through_inner_result() {
        let value = with_deadline(Duration::from_secs(5), async {
            Ok::<_, PipelineError>("done")
        })
        .await
        .unwrap();
        assert_eq!(value, "done");
    }
}
