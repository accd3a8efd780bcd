use crate::error::Result;
use crate::schema;
use crate::types::{
    Arguments, ChatRequest, ChatResponse, Choice, FINISH_REASON_STOP, FunctionCall,
    FunctionDeclaration, Message, ParameterSchema, ResponseFormat, ResponseMessage, StreamDelta,
    ToolCall, Usage,
};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

const SSE_DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<OpenAiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OpenAiTool {
    r#type: String,
    function: OpenAiFunction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    parameters: ClosedParameters,
    strict: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
struct ClosedParameters {
    #[serde(flatten)]
    schema: ParameterSchema,
    #[serde(rename = "additionalProperties")]
    additional_properties: bool,
}

fn to_openai_tool(f: &FunctionDeclaration) -> OpenAiTool {
    OpenAiTool {
        r#type: "function".to_string(),
        function: OpenAiFunction {
            name: f.name().to_string(),
            description: f.description().to_string(),
            parameters: ClosedParameters {
                schema: f.parameters().clone(),
                additional_properties: false,
            },
            strict: true,
        },
    }
}

impl OpenAiRequest {
    pub(crate) fn from_canonical(req: &ChatRequest) -> Self {
        let response_format = req.response_format().map(|rf| match rf {
            ResponseFormat::JsonMode => serde_json::json!({"type": "json_object"}),
            ResponseFormat::StructuredOutput(descriptor) => {
                schema::openai_response_format(descriptor)
            }
        });

        Self {
            model: req.model().to_string(),
            messages: req.chat_messages(),
            temperature: req.temperature(),
            stream: req.is_stream(),
            tools: req.tools().iter().map(to_openai_tool).collect(),
            response_format,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiResponse {
    pub id: String,
    pub object: Option<String>,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub choices: Vec<OpenAiChoice>,
    pub usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiChoice {
    pub index: u32,
    pub message: OpenAiMessage,
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiMessage {
    pub role: String,
    pub content: Option<String>,
    pub refusal: Option<String>,
    pub tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: OpenAiFunctionCall,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAiFunctionCall {
    pub name: String,
    #[serde(default, deserialize_with = "decode_arguments")]
    pub arguments: Arguments,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub prompt_tokens_details: Option<TokenDetails>,
    pub completion_tokens_details: Option<TokenDetails>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TokenDetails {
    pub cached_tokens: u32,
    pub audio_tokens: u32,
    pub reasoning_tokens: u32,
    pub accepted_prediction_tokens: u32,
    pub rejected_prediction_tokens: u32,
}

/// Tool-call arguments arrive as a JSON document encoded inside a string.
/// Already-decoded objects are accepted as well.
pub(crate) fn decode_arguments<'de, D>(deserializer: D) -> std::result::Result<Arguments, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Null => Ok(Arguments::new()),
        serde_json::Value::Object(map) => Ok(map),
        serde_json::Value::String(raw) if raw.trim().is_empty() => Ok(Arguments::new()),
        serde_json::Value::String(raw) => serde_json::from_str::<Arguments>(&raw)
            .map_err(|e| D::Error::custom(format!("tool call arguments: {e}"))),
        other => Err(D::Error::custom(format!(
            "tool call arguments must be a JSON object or string, got {other}"
        ))),
    }
}

pub fn normalize(resp: Option<OpenAiResponse>) -> ChatResponse {
    match resp {
        Some(r) => r.into(),
        None => {
            tracing::warn!("openai response is null; returning empty response");
            ChatResponse::default()
        }
    }
}

impl From<OpenAiResponse> for ChatResponse {
    fn from(v: OpenAiResponse) -> Self {
        let choices = v
            .choices
            .into_iter()
            .map(|c| Choice {
                index: c.index,
                message: ResponseMessage {
                    role: c.message.role,
                    content: c.message.content,
                    refusal: c.message.refusal,
                    tool_calls: c.message.tool_calls.map(|calls| {
                        calls
                            .into_iter()
                            .map(|tc| ToolCall {
                                id: tc.id,
                                kind: tc.kind,
                                function: FunctionCall {
                                    name: tc.function.name,
                                    arguments: tc.function.arguments,
                                },
                            })
                            .collect()
                    }),
                    structured: None,
                },
                logprobs: c.logprobs,
                finish_reason: c.finish_reason,
            })
            .collect();

        let usage = v.usage.unwrap_or_default();
        ChatResponse {
            id: v.id,
            object: v.object,
            created: v.created,
            model: v.model,
            choices,
            usage: Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            },
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OpenAiStreamChunk {
    model: Option<String>,
    choices: Vec<OpenAiStreamChoice>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct OpenAiStreamDelta {
    content: Option<String>,
}

/// Parse one `data:` line of an OpenAI-compatible stream.
///
/// The `[DONE]` sentinel is handled by the caller before this is reached.
pub(crate) fn parse_stream_line(line: &str) -> Result<Option<StreamDelta>> {
    let Some(rest) = line.strip_prefix(SSE_DATA_PREFIX) else {
        tracing::warn!(line, "stream line does not start with \"data:\"; ignoring");
        return Ok(None);
    };

    let chunk: OpenAiStreamChunk = serde_json::from_str(rest.trim())?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    let Some(content) = choice.delta.content else {
        tracing::debug!(finish_reason = ?choice.finish_reason, "stream delta without content suppressed");
        return Ok(None);
    };

    let done = choice.finish_reason.as_deref() == Some(FINISH_REASON_STOP);
    Ok(Some(StreamDelta {
        model: chunk.model,
        content: Some(content),
        finish_reason: choice.finish_reason,
        done,
    }))
}
