/// LLM Client — the single point of entry for all Azure OpenAI calls in Career Buddy.
///
/// Both the career chat and the interview coach go through this module; nothing
/// else builds chat-completion requests.
use std::time::Duration;

use bytes::BytesMut;
use futures_util::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::Config;

pub mod prompts;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("LLM returned empty content")]
    EmptyContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling settings for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Deployment to use instead of the configured default.
    pub deployment: Option<String>,
}

impl CompletionOptions {
    /// Interview coach: short, focused turns.
    pub fn interview() -> Self {
        Self {
            temperature: 0.5,
            max_tokens: 500,
            deployment: None,
        }
    }

    /// Career chat: longer, more conversational replies.
    pub fn chat() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            deployment: None,
        }
    }

    pub fn with_deployment(mut self, deployment: Option<String>) -> Self {
        self.deployment = deployment.filter(|d| !d.trim().is_empty());
        self
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct AzureError {
    error: AzureErrorBody,
}

#[derive(Debug, Deserialize)]
struct AzureErrorBody {
    message: String,
}

/// The single LLM client used by all services in Career Buddy.
/// Wraps Azure OpenAI chat completions with retry logic and SSE streaming.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    endpoint: String,
    api_key: String,
    api_version: String,
    deployment: String,
}

impl LlmClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
        deployment: impl Into<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: api_version.into(),
            deployment: deployment.into(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(
            config.openai_endpoint.clone(),
            config.openai_api_key.clone(),
            config.openai_api_version.clone(),
            config.openai_deployment.clone(),
        )
    }

    pub fn deployment(&self) -> &str {
        &self.deployment
    }

    fn completions_url(&self, deployment: Option<&str>) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint,
            deployment.unwrap_or(&self.deployment),
            self.api_version
        )
    }

    /// Sends one chat-completions request.
    /// Retries on 429 (rate limit) and 5xx errors with exponential backoff.
    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
        stream: bool,
    ) -> Result<reqwest::Response, LlmError> {
        let url = self.completions_url(options.deployment.as_deref());
        let request_body = ChatRequest {
            messages,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream,
        };

        let mut last_error: Option<LlmError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s
                let delay = Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "LLM call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = self
                .client
                .post(&url)
                .header("api-key", &self.api_key)
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(LlmError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("LLM API returned {}: {}", status, body);
                last_error = Some(LlmError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<AzureError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(LlmError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            return Ok(response);
        }

        Err(last_error.unwrap_or(LlmError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }

    /// Returns the full assistant reply for `messages`.
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        let response = self.send(messages, options, false).await?;
        let completion: ChatCompletion = serde_json::from_slice(&response.bytes().await?)?;

        if let Some(usage) = &completion.usage {
            debug!(
                "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
                usage.prompt_tokens, usage.completion_tokens
            );
        }

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or(LlmError::EmptyContent)
    }

    /// Streams the assistant reply as text fragments, in order.
    ///
    /// Ends after `[DONE]` or when the upstream closes. A stream that produced
    /// no text at all ends with [`LlmError::EmptyContent`].
    pub async fn stream_complete(
        &self,
        messages: &[ChatMessage],
        options: &CompletionOptions,
    ) -> Result<BoxStream<'static, Result<String, LlmError>>, LlmError> {
        let response = self.send(messages, options, true).await?;
        Ok(sse_fragments(response.bytes_stream().boxed()))
    }
}

/// State threaded through the `unfold` stream.
struct SseState {
    upstream: BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
    buf: BytesMut,
    produced: bool,
    done: bool,
}

/// Turns an OpenAI-style SSE body into the `delta.content` fragments it carries.
///
/// SSE format: `data: {"choices":[{"delta":{"content":"hi"}}]}\n\n`
fn sse_fragments(
    upstream: BoxStream<'static, Result<bytes::Bytes, reqwest::Error>>,
) -> BoxStream<'static, Result<String, LlmError>> {
    let state = SseState {
        upstream,
        buf: BytesMut::new(),
        produced: false,
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        if st.done {
            return None;
        }

        loop {
            if let Some(line_end) = st.buf.iter().position(|b| *b == b'\n').map(|i| i + 1) {
                let line = st.buf.split_to(line_end);
                let line = String::from_utf8_lossy(&line);
                let Some(data) = line.trim().strip_prefix("data:") else {
                    // blank separators, comments and other fields
                    continue;
                };
                let data = data.trim();

                if data == "[DONE]" {
                    st.done = true;
                    return finish(st);
                }

                match serde_json::from_str::<serde_json::Value>(data) {
                    Ok(chunk) => {
                        let content = chunk["choices"][0]["delta"]["content"]
                            .as_str()
                            .unwrap_or("");
                        if !content.is_empty() {
                            st.produced = true;
                            return Some((Ok(content.to_string()), st));
                        }
                    }
                    Err(e) => debug!("Skipping unparseable SSE chunk: {e}"),
                }
                continue;
            }

            match st.upstream.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    warn!("Upstream stream error: {e}");
                    st.done = true;
                    return Some((Err(LlmError::Http(e)), st));
                }
                None => {
                    st.done = true;
                    return finish(st);
                }
            }
        }
    })
    .boxed()
}

fn finish(st: SseState) -> Option<(Result<String, LlmError>, SseState)> {
    if st.produced {
        None
    } else {
        Some((Err(LlmError::EmptyContent), st))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::post,
        Json, Router,
    };
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    #[derive(Clone)]
    struct Stub {
        /// Status codes returned before the final answer, in order.
        failures: Arc<Mutex<Vec<StatusCode>>>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<(String, Option<String>, Option<String>, Value)>>>,
    }

    async fn handle(
        State(stub): State<Stub>,
        Path(deployment): Path<String>,
        Query(query): Query<std::collections::HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Response {
        stub.calls.fetch_add(1, Ordering::SeqCst);
        stub.seen.lock().push((
            deployment,
            query.get("api-version").cloned(),
            headers
                .get("api-key")
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body.clone(),
        ));

        let failure = {
            let mut failures = stub.failures.lock();
            (!failures.is_empty()).then(|| failures.remove(0))
        };
        if let Some(status) = failure {
            return (status, Json(json!({"error": {"message": "nope"}}))).into_response();
        }

        if body["stream"].as_bool() == Some(true) {
            let sse = concat!(
                ": keep-alive\n\n",
                "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
                "data: {\"choices\":[{\"delta\":{\"content\":\", there\"}}]}\n\n",
                "data: [DONE]\n\n",
            );
            return ([("content-type", "text/event-stream")], sse).into_response();
        }

        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": "Tell me about yourself."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 5}
        }))
        .into_response()
    }

    async fn spawn_stub(failures: Vec<StatusCode>) -> (LlmClient, Stub) {
        let stub = Stub {
            failures: Arc::new(Mutex::new(failures)),
            calls: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route(
                "/openai/deployments/:deployment/chat/completions",
                post(handle),
            )
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client =
            LlmClient::new(format!("http://{addr}/"), "test-key", "2024-02-01", "gpt-4").unwrap();
        (client, stub)
    }

    fn conversation() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a coach."),
            ChatMessage::user("Start the interview."),
        ]
    }

    #[tokio::test]
    async fn test_complete_returns_first_choice() {
        let (client, stub) = spawn_stub(vec![]).await;
        let reply = client
            .complete(&conversation(), &CompletionOptions::interview())
            .await
            .unwrap();
        assert_eq!(reply, "Tell me about yourself.");

        let seen = stub.seen.lock().clone();
        let (deployment, version, key, body) = &seen[0];
        assert_eq!(deployment, "gpt-4");
        assert_eq!(version.as_deref(), Some("2024-02-01"));
        assert_eq!(key.as_deref(), Some("test-key"));
        assert_eq!(body["max_tokens"], 500);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
    }

    #[tokio::test]
    async fn test_deployment_override() {
        let (client, stub) = spawn_stub(vec![]).await;
        let options = CompletionOptions::chat().with_deployment(Some("gpt-4o".to_string()));
        client.complete(&conversation(), &options).await.unwrap();
        assert_eq!(stub.seen.lock()[0].0, "gpt-4o");
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (client, stub) = spawn_stub(vec![StatusCode::SERVICE_UNAVAILABLE]).await;
        let reply = client
            .complete(&conversation(), &CompletionOptions::chat())
            .await
            .unwrap();
        assert_eq!(reply, "Tell me about yourself.");
        assert_eq!(stub.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let (client, stub) = spawn_stub(vec![StatusCode::UNAUTHORIZED]).await;
        let err = client
            .complete(&conversation(), &CompletionOptions::chat())
            .await
            .unwrap_err();
        match err {
            LlmError::Api { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_fragments_in_order() {
        let (client, _stub) = spawn_stub(vec![]).await;
        let stream = client
            .stream_complete(&conversation(), &CompletionOptions::chat())
            .await
            .unwrap();
        let fragments: Vec<String> = stream.map(|r| r.unwrap()).collect().await;
        assert_eq!(fragments, vec!["Hello".to_string(), ", there".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_stream_reports_empty_content() {
        let body = stream::iter(vec![Ok(bytes::Bytes::from_static(b"data: [DONE]\n\n"))]).boxed();
        let results: Vec<_> = sse_fragments(body).collect().await;
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0], Err(LlmError::EmptyContent)));
    }

    #[tokio::test]
    async fn test_sse_lines_split_across_chunks() {
        let body = stream::iter(vec![
            Ok(bytes::Bytes::from_static(b"data: {\"choices\":[{\"delta\":{\"con")),
            Ok(bytes::Bytes::from_static(b"tent\":\"Hi\"}}]}\n\n")),
        ])
        .boxed();
        let results: Vec<_> = sse_fragments(body).collect().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].as_ref().unwrap(), "Hi");
    }
}
