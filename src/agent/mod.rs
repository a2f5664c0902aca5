pub mod sse;

use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::CompletionConfig;
use crate::errors::AppError;

use self::sse::{parse_line, Frame, LineDecoder};

const MAX_ERROR_BODY_CHARS: usize = 200;

/// One item of the upstream completion stream.
#[derive(Debug)]
pub enum RawDelta {
    /// Either, both or neither field may be set on a given line.
    Fragment {
        thinking: Option<String>,
        content: Option<String>,
    },
    /// Synthetic last item when the call could not be completed.
    Failed(AppError),
}

pub type DeltaStream = Pin<Box<dyn Stream<Item = RawDelta> + Send>>;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_content: String,
    pub thinking: bool,
}

/// Anything that can turn a prompt into a lazy stream of deltas.
///
/// The returned stream is not restartable; calling `stream` again issues a
/// fresh upstream request.
pub trait CompletionSource: Send + Sync {
    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> DeltaStream;
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionBody<'a> {
    model: &'a str,
    stream: bool,
    messages: [WireMessage<'a>; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking: Option<bool>,
}

impl<'a> ChatCompletionBody<'a> {
    fn new(request: &'a CompletionRequest) -> Self {
        Self {
            model: &request.model,
            stream: true,
            messages: [
                WireMessage { role: "system", content: &request.system_prompt },
                WireMessage { role: "user", content: &request.user_content },
            ],
            thinking: request.thinking.then_some(true),
        }
    }
}

/// Client for an OpenAI-style streaming `/chat/completions` endpoint.
#[derive(Clone)]
pub struct CompletionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    idle_timeout: Duration,
}

enum Read {
    Bytes(Bytes),
    Eof,
    Broken(reqwest::Error),
    TimedOut,
    Cancelled,
}

impl CompletionClient {
    pub fn new(config: &CompletionConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.idle_timeout)
            .build()
            .map_err(|e| AppError::Unexpected(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            idle_timeout: config.idle_timeout,
        })
    }

    fn timeout_error(&self) -> AppError {
        AppError::CompletionTimeout { seconds: self.idle_timeout.as_secs() }
    }

    async fn open(&self, request: &CompletionRequest) -> Result<reqwest::Response, AppError> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&ChatCompletionBody::new(request))
            .send()
            .await
            .map_err(|e| {
                error!("Completion request to {} failed: {e}", self.base_url);
                if e.is_timeout() {
                    self.timeout_error()
                } else {
                    AppError::UpstreamConnection
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            error!("Completion service answered {status}: {body}");
            return Err(AppError::UpstreamHttp { status: status.as_u16() });
        }
        Ok(response)
    }
}

impl CompletionSource for CompletionClient {
    fn stream(&self, request: CompletionRequest, cancel: CancellationToken) -> DeltaStream {
        let client = self.clone();

        Box::pin(async_stream::stream! {
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(AppError::Cancelled),
                opened = tokio::time::timeout(client.idle_timeout, client.open(&request)) => {
                    opened.unwrap_or_else(|_| Err(client.timeout_error()))
                }
            };
            let response = match opened {
                Ok(response) => response,
                Err(e) => {
                    yield RawDelta::Failed(e);
                    return;
                }
            };

            let mut body = response.bytes_stream();
            let mut decoder = LineDecoder::default();
            let mut body_finished = false;

            loop {
                let mut saw_done = false;
                while let Some(line) = decoder.next_line() {
                    match parse_line(&line) {
                        Frame::Done => {
                            saw_done = true;
                            break;
                        }
                        Frame::Delta { thinking, content } => {
                            yield RawDelta::Fragment { thinking, content };
                        }
                        Frame::Malformed => debug!("Skipping malformed completion frame: {line}"),
                        Frame::Blank | Frame::Other => {}
                    }
                }
                if saw_done || body_finished {
                    return;
                }

                let read = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Read::Cancelled,
                    next = tokio::time::timeout(client.idle_timeout, body.next()) => match next {
                        Err(_) => Read::TimedOut,
                        Ok(None) => Read::Eof,
                        Ok(Some(Err(e))) => Read::Broken(e),
                        Ok(Some(Ok(bytes))) => Read::Bytes(bytes),
                    },
                };

                match read {
                    Read::Bytes(bytes) => decoder.push(&bytes),
                    Read::Eof => {
                        decoder.close();
                        body_finished = true;
                    }
                    Read::Broken(e) => {
                        error!("Completion stream broke off: {e}");
                        yield RawDelta::Failed(AppError::UpstreamConnection);
                        return;
                    }
                    Read::TimedOut => {
                        yield RawDelta::Failed(client.timeout_error());
                        return;
                    }
                    Read::Cancelled => {
                        debug!("Completion stream cancelled by caller");
                        yield RawDelta::Failed(AppError::Cancelled);
                        return;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;

    fn client_for(server: &MockServer, idle_timeout: Duration) -> CompletionClient {
        CompletionClient::new(&CompletionConfig {
            base_url: server.base_url(),
            api_key: "test-key".to_string(),
            model: "test-model".to_string(),
            system_prompt: "be brief".to_string(),
            idle_timeout,
        })
        .unwrap()
    }

    fn request(user_content: &str, thinking: bool) -> CompletionRequest {
        CompletionRequest {
            model: "test-model".to_string(),
            system_prompt: "be brief".to_string(),
            user_content: user_content.to_string(),
            thinking,
        }
    }

    async fn collect(stream: DeltaStream) -> Vec<RawDelta> {
        stream.collect().await
    }

    fn contents(deltas: &[RawDelta]) -> Vec<String> {
        deltas
            .iter()
            .filter_map(|d| match d {
                RawDelta::Fragment { content: Some(c), .. } => Some(c.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn request_body_only_carries_thinking_when_enabled() {
        let off = request("hi", false);
        let json = serde_json::to_value(ChatCompletionBody::new(&off)).unwrap();
        assert!(json.get("thinking").is_none());
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");

        let on = request("hi", true);
        let json = serde_json::to_value(ChatCompletionBody::new(&on)).unwrap();
        assert_eq!(json["thinking"], true);
    }

    #[tokio::test]
    async fn streams_content_until_done_marker() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/chat/completions")
                    .header("authorization", "Bearer test-key")
                    .body_contains(r#"{"role":"user","content":"say hi"}"#);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(concat!(
                        "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
                        "data: [DONE]\n\n",
                        "data: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n\n",
                    ));
            })
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("say hi", false), CancellationToken::new())).await;

        mock.assert_async().await;
        assert_eq!(deltas.len(), 1);
        assert_eq!(contents(&deltas), vec!["Hi".to_string()]);
    }

    #[tokio::test]
    async fn skips_malformed_lines() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/chat/completions");
                then.status(200).body(concat!(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"one\"}}]}\n",
                    "data: {not-json\n",
                    "data: {\"choices\":[{\"delta\":{\"thinking\":\"t\",\"content\":\"two\"}}]}\n",
                    "data: [DONE]\n",
                ));
            })
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("q", true), CancellationToken::new())).await;

        assert_eq!(contents(&deltas), vec!["one".to_string(), "two".to_string()]);
        assert!(deltas.iter().all(|d| matches!(d, RawDelta::Fragment { .. })));
        assert!(matches!(
            &deltas[1],
            RawDelta::Fragment { thinking: Some(t), .. } if t == "t"
        ));
    }

    #[tokio::test]
    async fn sends_thinking_toggle_when_enabled() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST")
                    .path("/chat/completions")
                    .body_contains(r#""thinking":true"#);
                then.status(200).body("data: [DONE]\n");
            })
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("q", true), CancellationToken::new())).await;

        mock.assert_async().await;
        assert!(deltas.is_empty());
    }

    #[tokio::test]
    async fn body_without_done_marker_ends_quietly() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/chat/completions");
                then.status(200)
                    .body("data: {\"choices\":[{\"delta\":{\"content\":\"tail\"}}]}");
            })
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("q", false), CancellationToken::new())).await;

        assert_eq!(contents(&deltas), vec!["tail".to_string()]);
    }

    #[tokio::test]
    async fn non_success_status_yields_single_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/chat/completions");
                then.status(500).body("upstream exploded");
            })
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("q", false), CancellationToken::new())).await;

        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            RawDelta::Failed(err @ AppError::UpstreamHttp { status: 500 }) => {
                assert!(!err.to_string().contains("upstream exploded"));
            }
            other => panic!("expected UpstreamHttp failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_yields_connection_failure() {
        let client = CompletionClient::new(&CompletionConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: "k".to_string(),
            model: "m".to_string(),
            system_prompt: "s".to_string(),
            idle_timeout: Duration::from_secs(5),
        })
        .unwrap();

        let deltas = collect(client.stream(request("q", false), CancellationToken::new())).await;

        assert_eq!(deltas.len(), 1);
        match &deltas[0] {
            RawDelta::Failed(err @ AppError::UpstreamConnection) => {
                assert!(!err.to_string().contains("127.0.0.1"));
            }
            other => panic!("expected UpstreamConnection failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("POST").path("/chat/completions");
                then.status(200)
                    .delay(Duration::from_secs(2))
                    .body("data: [DONE]\n");
            })
            .await;

        let client = client_for(&server, Duration::from_millis(200));
        let deltas = collect(client.stream(request("q", false), CancellationToken::new())).await;

        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], RawDelta::Failed(AppError::CompletionTimeout { .. })));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_any_delta() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method("POST").path("/chat/completions");
                then.status(200).body("data: [DONE]\n");
            })
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = client_for(&server, Duration::from_secs(5));
        let deltas = collect(client.stream(request("q", false), cancel)).await;

        assert_eq!(deltas.len(), 1);
        assert!(matches!(deltas[0], RawDelta::Failed(AppError::Cancelled)));
        assert_eq!(mock.hits_async().await, 0);
    }
}
