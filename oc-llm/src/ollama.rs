//! Local-inference (Ollama-style) wire format.
//!
//! Responses carry neither a stable id nor per-call tool ids, so both are
//! synthesized during normalization. Streaming is line-delimited JSON: every
//! non-empty line is a complete response object and the last one has
//! `done = true`.

use crate::error::Result;
use crate::schema;
use crate::types::{
    Arguments, ChatRequest, ChatResponse, Choice, FINISH_REASON_STOP, FunctionCall,
    FunctionDeclaration, Message, ResponseFormat, ResponseMessage, StreamDelta, ToolCall, Usage,
};
use serde::{Deserialize, Serialize};

const SYNTHETIC_RESPONSE_ID: &str = "dummy-id";
const SYNTHETIC_CALL_ID: &str = "dummy-call-id";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaRequest {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// `"json"` or a JSON Schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<serde_json::Value>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<OllamaTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OllamaTool {
    r#type: String,
    function: FunctionDeclaration,
}

impl OllamaRequest {
    pub(crate) fn from_canonical(req: &ChatRequest) -> Self {
        let mut format = req
            .format()
            .map(|f| serde_json::Value::String(f.to_string()));

        match req.response_format() {
            Some(ResponseFormat::JsonMode) => {
                format = Some(serde_json::Value::String("json".to_string()));
            }
            Some(ResponseFormat::StructuredOutput(descriptor)) => {
                format = Some(schema::local_inference_format(descriptor));
            }
            None => {}
        }

        Self {
            model: req.model().to_string(),
            messages: req.messages().map(<[Message]>::to_vec),
            prompt: req.prompt().map(str::to_string),
            temperature: req.temperature(),
            format,
            stream: req.is_stream(),
            tools: req
                .tools()
                .iter()
                .map(|f| OllamaTool {
                    r#type: "function".to_string(),
                    function: f.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OllamaResponse {
    pub model: String,
    pub created_at: Option<String>,
    /// Present on `/api/chat` responses.
    pub message: Option<OllamaMessage>,
    /// Present on `/api/generate` responses.
    pub response: Option<String>,
    pub done_reason: Option<String>,
    pub done: bool,
    pub total_duration: u64,
    pub load_duration: u64,
    pub prompt_eval_count: u32,
    pub prompt_eval_duration: u64,
    pub eval_count: u32,
    pub eval_duration: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OllamaMessage {
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<OllamaToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaToolCall {
    pub function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaFunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// A `None` wire body normalizes to an empty response.
pub fn normalize(resp: Option<OllamaResponse>) -> ChatResponse {
    match resp {
        Some(r) => r.into(),
        None => {
            tracing::warn!("ollama response is null; returning empty response");
            ChatResponse::default()
        }
    }
}

impl From<OllamaResponse> for ChatResponse {
    fn from(v: OllamaResponse) -> Self {
        let mut message = match (v.response, v.message.as_ref()) {
            (Some(text), _) => ResponseMessage::assistant(text),
            (None, Some(m)) => ResponseMessage {
                role: m.role.clone(),
                content: m.content.clone(),
                ..ResponseMessage::default()
            },
            (None, None) => ResponseMessage::default(),
        };

        if let Some(calls) = v.message.and_then(|m| m.tool_calls) {
            message.tool_calls = Some(
                calls
                    .into_iter()
                    .map(|tc| ToolCall {
                        id: SYNTHETIC_CALL_ID.to_string(),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: tc.function.name,
                            arguments: tc.function.arguments,
                        },
                    })
                    .collect(),
            );
        }

        ChatResponse {
            id: SYNTHETIC_RESPONSE_ID.to_string(),
            object: None,
            created: chrono::Utc::now().timestamp(),
            model: v.model,
            choices: vec![Choice {
                index: 0,
                message,
                logprobs: None,
                finish_reason: v.done_reason,
            }],
            usage: Usage::new(v.prompt_eval_count, v.eval_count),
        }
    }
}

/// Parse one line of a local-inference stream.
///
/// Lines without text are dropped unless they carry `done = true`.
pub(crate) fn parse_stream_line(line: &str) -> Result<Option<StreamDelta>> {
    let chunk: OllamaResponse = serde_json::from_str(line)?;
    let model = Some(chunk.model).filter(|m| !m.is_empty());
    let content = chunk
        .message
        .and_then(|m| m.content)
        .or(chunk.response);

    if chunk.done {
        return Ok(Some(StreamDelta {
            model,
            content,
            finish_reason: Some(FINISH_REASON_STOP.to_string()),
            done: true,
        }));
    }
    Ok(content.map(|text| StreamDelta::text(model, text)))
}
