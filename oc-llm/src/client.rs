use crate::anthropic::{self, ANTHROPIC_VERSION, AnthropicResponse};
use crate::convert::convert;
use crate::error::{LlmError, Result};
use crate::ollama::{self, OllamaResponse};
use crate::openai::{self, OpenAiResponse};
use crate::provider::ProviderKind;
use crate::stream::StreamParser;
use crate::transport::{HttpTransport, Transport, TransportRequest};
use crate::types::{ChatRequest, ChatResponse, StreamDelta};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

const USER_AGENT: &str = concat!("oc-llm/", env!("CARGO_PKG_VERSION"));
const APPLICATION_JSON: &str = "application/json";

pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta>> + Send>>;

/// Callbacks for [`LlmClient::stream_chat`], invoked in wire order from the
/// calling task.
pub trait StreamHandler {
    /// A delta that carried text.
    fn on_message(&mut self, delta: &StreamDelta);

    /// The stream finished. Called at most once, never after `on_error`.
    fn on_complete(&mut self, full_text: &str);

    fn on_error(&mut self, error: &LlmError);
}

/// Client for one configured endpoint. The provider is classified from the
/// URL once, here.
#[derive(Clone)]
pub struct LlmClient {
    provider: ProviderKind,
    api_url: String,
    api_key: String,
    transport: Arc<dyn Transport>,
}

impl fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmClient")
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .finish_non_exhaustive()
    }
}

macro_rules! log_payload {
    ($details:expr, $($arg:tt)+) => {
        if $details {
            tracing::info!($($arg)+);
        } else {
            tracing::debug!($($arg)+);
        }
    };
}

impl LlmClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(api_url: &str, api_key: &str) -> Self {
        Self::with_transport(api_url, api_key, Arc::new(HttpTransport::new()))
    }

    pub fn with_transport(api_url: &str, api_key: &str, transport: Arc<dyn Transport>) -> Self {
        let provider = ProviderKind::from_url(api_url);
        tracing::debug!(%provider, api_url, "llm client configured");
        Self {
            provider,
            api_url: api_url.to_string(),
            api_key: api_key.to_string(),
            transport,
        }
    }

    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// The provider body for `request`, without sending anything.
    pub fn request_body(&self, request: &ChatRequest) -> Result<serde_json::Value> {
        convert(request, self.provider)?.to_json()
    }

    /// Send `request` and wait for the whole reply.
    ///
    /// A null or blank reply body is not an error: it normalizes to an empty
    /// response and is logged at warn. In structured-output mode the first
    /// choice's content is decoded into the target type and attached to the
    /// message; content that does not decode fails the call.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = request.model()))]
    pub async fn generate(&self, request: &ChatRequest, log_details: bool) -> Result<ChatResponse> {
        let request = request.with_stream(false);
        let body = self.request_body(&request)?;
        log_payload!(log_details, %body, "sending chat request");

        let raw = self.transport.post(self.transport_request(body)).await?;
        log_payload!(log_details, body = %raw, "received chat response");

        let mut response = self.normalize(&raw)?;
        if let Some(descriptor) = request.structured_output() {
            match response.choices.first_mut() {
                Some(choice) => {
                    let content = choice.message.content.as_deref().unwrap_or_default();
                    choice.message.structured = Some(descriptor.decode(content)?);
                }
                None => {
                    tracing::warn!(
                        target_type = descriptor.name(),
                        "structured output requested but response has no choices"
                    );
                }
            }
        }
        Ok(response)
    }

    /// Open a streaming call and return its canonical deltas.
    ///
    /// The stream ends after the first terminal delta, after the first error,
    /// or when the connection closes. Dropping it closes the connection.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = request.model()))]
    pub async fn delta_stream(&self, request: &ChatRequest, log_details: bool) -> Result<DeltaStream> {
        let request = request.with_stream(true);
        let body = self.request_body(&request)?;
        log_payload!(log_details, %body, "opening chat stream");

        let lines = self.transport.post_lines(self.transport_request(body)).await?;
        let parser = StreamParser::for_provider(self.provider);

        let deltas = futures_util::stream::unfold(
            (lines, parser, false),
            move |(mut lines, mut parser, finished)| async move {
                if finished {
                    return None;
                }
                loop {
                    let line = match lines.next().await? {
                        Ok(line) => line,
                        Err(e) => return Some((Err(e), (lines, parser, true))),
                    };
                    log_payload!(log_details, line = %line, "stream line");
                    match parser.parse_line(&line) {
                        Ok(Some(delta)) => {
                            let done = delta.done;
                            return Some((Ok(delta), (lines, parser, done)));
                        }
                        Ok(None) => continue,
                        Err(e) => return Some((Err(e), (lines, parser, true))),
                    }
                }
            },
        );
        Ok(Box::pin(deltas))
    }

    /// Drive a streaming call to the end through `handler`.
    ///
    /// Every failure, including failing to open the stream, goes to
    /// `on_error`. If the connection closes without a terminal marker,
    /// `on_complete` still fires with the text received so far.
    #[tracing::instrument(level = "info", skip_all, fields(provider = %self.provider, model = request.model()))]
    pub async fn stream_chat<H>(&self, request: &ChatRequest, log_details: bool, handler: &mut H)
    where
        H: StreamHandler + ?Sized,
    {
        let mut deltas = match self.delta_stream(request, log_details).await {
            Ok(deltas) => deltas,
            Err(e) => {
                tracing::warn!(error = %e, "chat stream failed to open");
                handler.on_error(&e);
                return;
            }
        };

        let mut full_text = String::new();
        while let Some(item) = deltas.next().await {
            let delta = match item {
                Ok(delta) => delta,
                Err(e) => {
                    tracing::warn!(error = %e, "chat stream failed");
                    handler.on_error(&e);
                    return;
                }
            };
            if let Some(text) = delta.content.as_deref() {
                full_text.push_str(text);
                handler.on_message(&delta);
            }
            if delta.done {
                tracing::debug!(finish_reason = ?delta.finish_reason, "chat stream complete");
                handler.on_complete(&full_text);
                return;
            }
        }

        tracing::debug!("chat stream closed without terminal marker");
        handler.on_complete(&full_text);
    }

    fn transport_request(&self, body: serde_json::Value) -> TransportRequest {
        TransportRequest {
            url: self.api_url.clone(),
            headers: self.headers(),
            body,
        }
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Content-Type".to_string(), APPLICATION_JSON.to_string()),
            ("Accept".to_string(), APPLICATION_JSON.to_string()),
            ("User-Agent".to_string(), USER_AGENT.to_string()),
        ];
        match self.provider {
            ProviderKind::OpenAiCompatible if !self.api_key.is_empty() => {
                headers.push((
                    "Authorization".to_string(),
                    format!("Bearer {}", self.api_key),
                ));
            }
            ProviderKind::Anthropic => {
                headers.push(("x-api-key".to_string(), self.api_key.clone()));
                headers.push((
                    "anthropic-version".to_string(),
                    ANTHROPIC_VERSION.to_string(),
                ));
            }
            ProviderKind::OpenAiCompatible | ProviderKind::LocalInference => {}
        }
        headers
    }

    fn normalize(&self, raw: &str) -> Result<ChatResponse> {
        Ok(match self.provider {
            ProviderKind::LocalInference => ollama::normalize(decode_body::<OllamaResponse>(raw)?),
            ProviderKind::OpenAiCompatible => {
                openai::normalize(decode_body::<OpenAiResponse>(raw)?)
            }
            ProviderKind::Anthropic => anthropic::normalize(decode_body::<AnthropicResponse>(raw)?),
        })
    }
}

/// `None` for a blank or `null` body.
fn decode_body<T: DeserializeOwned>(raw: &str) -> Result<Option<T>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<Option<T>>(raw)
        .map_err(|e| LlmError::Decode(format!("response body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LineStream;
    use crate::types::{Message, ResponseFormat, SchemaDescriptor};
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeTransport {
        body: Option<String>,
        lines: Vec<String>,
        seen: Mutex<Vec<TransportRequest>>,
    }

    impl FakeTransport {
        fn replying(body: serde_json::Value) -> Arc<Self> {
            Arc::new(Self {
                body: Some(body.to_string()),
                ..Self::default()
            })
        }

        fn streaming(lines: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                lines: lines.iter().map(|l| l.to_string()).collect(),
                ..Self::default()
            })
        }

        fn last_request(&self) -> TransportRequest {
            self.seen
                .lock()
                .expect("lock")
                .last()
                .cloned()
                .expect("a request was sent")
        }

        fn header(&self, name: &str) -> Option<String> {
            self.last_request()
                .headers
                .into_iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn post(&self, request: TransportRequest) -> Result<String> {
            self.seen.lock().expect("lock").push(request);
            self.body
                .clone()
                .ok_or_else(|| LlmError::Transport("status=500 body=boom".to_string()))
        }

        async fn post_lines(&self, request: TransportRequest) -> Result<LineStream> {
            self.seen.lock().expect("lock").push(request);
            let lines: Vec<Result<String>> = self.lines.iter().cloned().map(Ok).collect();
            Ok(Box::pin(futures_util::stream::iter(lines)))
        }
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl StreamHandler for Recorder {
        fn on_message(&mut self, delta: &StreamDelta) {
            self.events
                .push(format!("message:{}", delta.content.as_deref().unwrap_or_default()));
        }

        fn on_complete(&mut self, full_text: &str) {
            self.events.push(format!("complete:{full_text}"));
        }

        fn on_error(&mut self, error: &LlmError) {
            self.events.push(format!("error:{error}"));
        }
    }

    fn request(model: &str) -> ChatRequest {
        ChatRequest::builder()
            .model(model)
            .messages(vec![
                Message::system("Be brief.").expect("valid"),
                Message::user("Hello").expect("valid"),
            ])
            .build()
            .expect("valid request")
    }

    const OLLAMA_URL: &str = "http://localhost:11434/api/chat";
    const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
    const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";

    #[tokio::test]
    async fn generate_round_trips_every_provider() {
        let cases = [
            (
                OLLAMA_URL,
                "llama3.1",
                json!({"model": "llama3.1", "message": {"role": "assistant", "content": "Hi"},
                       "done": true, "done_reason": "stop"}),
            ),
            (
                OPENAI_URL,
                "gpt-4o-mini",
                json!({"id": "chatcmpl-1", "object": "chat.completion", "created": 1,
                       "model": "gpt-4o-mini",
                       "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi"},
                                    "finish_reason": "stop"}]}),
            ),
            (
                ANTHROPIC_URL,
                "claude-3-haiku-20240307",
                json!({"id": "msg_1", "type": "message", "role": "assistant",
                       "model": "claude-3-haiku-20240307",
                       "content": [{"type": "text", "text": "Hi"}],
                       "stop_reason": "end_turn",
                       "usage": {"input_tokens": 3, "output_tokens": 1}}),
            ),
        ];

        for (url, model, reply) in cases {
            let transport = FakeTransport::replying(reply);
            let client = LlmClient::with_transport(url, "secret", transport.clone());
            let resp = client.generate(&request(model), false).await.expect("generates");
            assert_eq!(resp.model, model);
            assert!(!resp.choices.is_empty());
            assert!(!resp.choices[0].message.role.is_empty());
            assert_eq!(resp.first_content(), Some("Hi"));
            assert_eq!(transport.last_request().url, url);
            assert_eq!(transport.last_request().body["stream"], false);
        }
    }

    #[tokio::test]
    async fn headers_follow_provider() {
        let transport = FakeTransport::replying(json!(null));
        LlmClient::with_transport(OPENAI_URL, "sk-1", transport.clone())
            .generate(&request("gpt-4o-mini"), false)
            .await
            .expect("generates");
        assert_eq!(transport.header("Authorization").as_deref(), Some("Bearer sk-1"));
        assert_eq!(transport.header("Accept").as_deref(), Some("application/json"));
        assert!(
            transport
                .header("User-Agent")
                .is_some_and(|ua| ua.starts_with("oc-llm/"))
        );

        let transport = FakeTransport::replying(json!(null));
        LlmClient::with_transport(ANTHROPIC_URL, "ak-1", transport.clone())
            .generate(&request("claude-3-haiku-20240307"), false)
            .await
            .expect("generates");
        assert_eq!(transport.header("x-api-key").as_deref(), Some("ak-1"));
        assert_eq!(transport.header("anthropic-version").as_deref(), Some("2023-06-01"));
        assert!(transport.header("Authorization").is_none());

        let transport = FakeTransport::replying(json!(null));
        LlmClient::with_transport(OLLAMA_URL, "", transport.clone())
            .generate(&request("llama3.1"), false)
            .await
            .expect("generates");
        assert!(transport.header("Authorization").is_none());
        assert!(transport.header("x-api-key").is_none());
    }

    #[tokio::test]
    async fn null_and_blank_bodies_are_empty_responses() {
        let client =
            LlmClient::with_transport(OPENAI_URL, "k", FakeTransport::replying(json!(null)));
        let resp = client.generate(&request("gpt-4o-mini"), false).await.expect("soft failure");
        assert!(resp.choices.is_empty());

        let blank = Arc::new(FakeTransport {
            body: Some("  ".to_string()),
            ..FakeTransport::default()
        });
        let client = LlmClient::with_transport(OLLAMA_URL, "", blank);
        let resp = client.generate(&request("llama3.1"), false).await.expect("soft failure");
        assert!(resp.choices.is_empty());
    }

    #[tokio::test]
    async fn transport_and_decode_failures_are_errors() {
        let client = LlmClient::with_transport(OPENAI_URL, "k", Arc::new(FakeTransport::default()));
        let err = client
            .generate(&request("gpt-4o-mini"), false)
            .await
            .expect_err("non-2xx fails");
        assert!(matches!(err, LlmError::Transport(_)));

        let client = LlmClient::with_transport(OPENAI_URL, "k", FakeTransport::replying(json!("oops")));
        let err = client
            .generate(&request("gpt-4o-mini"), false)
            .await
            .expect_err("wrong shape fails");
        assert!(matches!(err, LlmError::Decode(_)));
    }

    #[derive(Debug, PartialEq, Deserialize, schemars::JsonSchema)]
    struct Country {
        name: String,
        capital: String,
    }

    fn structured_request() -> ChatRequest {
        ChatRequest::builder()
            .model("gpt-4o-mini")
            .prompt("Tell me about France.")
            .response_format(ResponseFormat::StructuredOutput(SchemaDescriptor::of::<Country>()))
            .build()
            .expect("valid request")
    }

    fn openai_reply(content: &str) -> serde_json::Value {
        json!({"id": "c1", "model": "gpt-4o-mini",
               "choices": [{"index": 0, "message": {"role": "assistant", "content": content},
                            "finish_reason": "stop"}]})
    }

    #[tokio::test]
    async fn structured_output_attaches_typed_value() {
        let raw = r#"{"name":"France","capital":"Paris"}"#;
        let transport = FakeTransport::replying(openai_reply(raw));
        let client = LlmClient::with_transport(OPENAI_URL, "k", transport.clone());
        let resp = client.generate(&structured_request(), false).await.expect("generates");

        let message = resp.first_message().expect("one choice");
        assert_eq!(message.content.as_deref(), Some(raw));
        assert_eq!(
            message.parsed::<Country>(),
            Some(&Country {
                name: "France".to_string(),
                capital: "Paris".to_string(),
            })
        );
        let sent = transport.last_request().body;
        assert_eq!(sent["response_format"]["json_schema"]["name"], "Country_response");
        assert_eq!(sent["messages"][0], json!({"role": "user", "content": "Tell me about France."}));
    }

    #[tokio::test]
    async fn structured_output_mismatch_is_decode_error() {
        let client = LlmClient::with_transport(
            OPENAI_URL,
            "k",
            FakeTransport::replying(openai_reply("not json")),
        );
        let err = client
            .generate(&structured_request(), false)
            .await
            .expect_err("fails");
        assert!(matches!(err, LlmError::Decode(_)));
    }

    #[tokio::test]
    async fn request_body_is_a_dry_run() {
        let transport = Arc::new(FakeTransport::default());
        let client = LlmClient::with_transport(ANTHROPIC_URL, "k", transport.clone());
        let body = client
            .request_body(&request("claude-3-5-sonnet-20241022"))
            .expect("builds");
        assert_eq!(body["system"], "Be brief.");
        assert_eq!(body["max_tokens"], 8192);
        assert!(transport.seen.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn anthropic_stream_delivers_deltas_then_full_text() {
        let transport = FakeTransport::streaming(&[
            "event: message_start",
            r#"data: {"type":"message_start","message":{"model":"claude-3-haiku-20240307","usage":{"input_tokens":10,"output_tokens":0}}}"#,
            "",
            r#"data: {"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":" there"}}"#,
            r#"data: {"type":"content_block_stop","index":0}"#,
            r#"data: {"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":2}}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);
        let client = LlmClient::with_transport(ANTHROPIC_URL, "k", transport.clone());
        let mut recorder = Recorder::default();
        client
            .stream_chat(&request("claude-3-haiku-20240307"), true, &mut recorder)
            .await;

        assert_eq!(
            recorder.events,
            ["message:Hi", "message: there", "complete:Hi there"]
        );
        assert_eq!(transport.last_request().body["stream"], true);
    }

    #[tokio::test]
    async fn openai_stream_stops_at_done_sentinel() {
        let transport = FakeTransport::streaming(&[
            r#"data: {"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"role":"assistant"},"finish_reason":null}]}"#,
            r#"data: {"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
            r#"data: {"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"lo"},"finish_reason":null}]}"#,
            "data: [DONE]",
            r#"data: {"model":"gpt-4o-mini","choices":[{"index":0,"delta":{"content":"late"},"finish_reason":null}]}"#,
        ]);
        let client = LlmClient::with_transport(OPENAI_URL, "k", transport);
        let mut recorder = Recorder::default();
        client
            .stream_chat(&request("gpt-4o-mini"), false, &mut recorder)
            .await;
        assert_eq!(recorder.events, ["message:Hel", "message:lo", "complete:Hello"]);
    }

    #[tokio::test]
    async fn ollama_stream_completes_on_done_flag() {
        let transport = FakeTransport::streaming(&[
            r#"{"model":"llama3.1","message":{"role":"assistant","content":"Sky"},"done":false}"#,
            r#"{"model":"llama3.1","message":{"role":"assistant","content":" is blue"},"done":false}"#,
            r#"{"model":"llama3.1","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#,
        ]);
        let client = LlmClient::with_transport(OLLAMA_URL, "", transport);
        let mut recorder = Recorder::default();
        client.stream_chat(&request("llama3.1"), false, &mut recorder).await;
        assert_eq!(
            recorder.events,
            ["message:Sky", "message: is blue", "message:", "complete:Sky is blue"]
        );
    }

    #[tokio::test]
    async fn stream_without_terminal_marker_completes_once_at_eof() {
        let transport = FakeTransport::streaming(&[
            r#"data: {"choices":[{"index":0,"delta":{"content":"partial"},"finish_reason":null}]}"#,
        ]);
        let client = LlmClient::with_transport(OPENAI_URL, "k", transport);
        let mut recorder = Recorder::default();
        client
            .stream_chat(&request("gpt-4o-mini"), false, &mut recorder)
            .await;
        assert_eq!(recorder.events, ["message:partial", "complete:partial"]);
    }

    #[tokio::test]
    async fn stream_decode_failure_goes_to_on_error_only() {
        let transport = FakeTransport::streaming(&[
            r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            r#"data: {"type":"brand_new_event"}"#,
            r#"data: {"type":"message_stop"}"#,
        ]);
        let client = LlmClient::with_transport(ANTHROPIC_URL, "k", transport);
        let mut recorder = Recorder::default();
        client
            .stream_chat(&request("claude-3-haiku-20240307"), false, &mut recorder)
            .await;
        assert_eq!(recorder.events.len(), 2);
        assert_eq!(recorder.events[0], "message:Hi");
        assert!(recorder.events[1].starts_with("error:decode error"));
    }

    #[tokio::test]
    async fn stream_open_failure_goes_to_on_error() {
        struct Refusing;

        #[async_trait]
        impl Transport for Refusing {
            async fn post(&self, _request: TransportRequest) -> Result<String> {
                Err(LlmError::Transport("refused".to_string()))
            }

            async fn post_lines(&self, _request: TransportRequest) -> Result<LineStream> {
                Err(LlmError::Transport("status=401 body=unauthorized".to_string()))
            }
        }

        let client = LlmClient::with_transport(OPENAI_URL, "k", Arc::new(Refusing));
        let mut recorder = Recorder::default();
        client
            .stream_chat(&request("gpt-4o-mini"), false, &mut recorder)
            .await;
        assert_eq!(
            recorder.events,
            ["error:transport error: status=401 body=unauthorized"]
        );
    }

    #[tokio::test]
    async fn delta_stream_ends_after_terminal_delta() {
        let transport = FakeTransport::streaming(&["data: [DONE]", "data: [DONE]"]);
        let client = LlmClient::with_transport(OPENAI_URL, "k", transport);
        let deltas: Vec<StreamDelta> = client
            .delta_stream(&request("gpt-4o-mini"), false)
            .await
            .expect("opens")
            .map(|d| d.expect("delta"))
            .collect()
            .await;
        assert_eq!(deltas.len(), 1);
        assert!(deltas[0].done);
    }
}
