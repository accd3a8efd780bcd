use crate::error::{LlmError, Result};
use crate::types::{
    Arguments, ChatRequest, ChatResponse, Choice, FINISH_REASON_STOP, FunctionCall,
    FunctionDeclaration, Message, ParameterSchema, ResponseMessage, StreamDelta, ToolCall, Usage,
};
use serde::{Deserialize, Serialize};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

const DEFAULT_MAX_TOKENS: u32 = 4096;
const EXTENDED_MAX_TOKENS: u32 = 8192;
/// Model ids containing this get the larger output budget.
const EXTENDED_OUTPUT_MODEL_MARKER: &str = "-3-5-";
const SSE_DATA_PREFIX: &str = "data:";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<AnthropicTool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicTool {
    name: String,
    description: String,
    input_schema: ParameterSchema,
}

fn to_anthropic_tool(f: &FunctionDeclaration) -> AnthropicTool {
    AnthropicTool {
        name: f.name().to_string(),
        description: f.description().to_string(),
        input_schema: f.parameters().clone(),
    }
}

impl AnthropicRequest {
    /// The first `system` message moves to the top-level `system` field.
    /// Works on a copy; the canonical request is untouched.
    pub(crate) fn from_canonical(req: &ChatRequest) -> Self {
        let mut messages = req.chat_messages();
        let system = messages
            .iter()
            .position(|m| m.role() == "system")
            .map(|idx| messages.remove(idx).content().to_string());

        let max_tokens = if req.model().contains(EXTENDED_OUTPUT_MODEL_MARKER) {
            EXTENDED_MAX_TOKENS
        } else {
            DEFAULT_MAX_TOKENS
        };

        Self {
            model: req.model().to_string(),
            messages,
            system,
            max_tokens,
            temperature: req.temperature(),
            stream: req.is_stream(),
            tools: req.tools().iter().map(to_anthropic_tool).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnthropicResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub role: String,
    pub model: String,
    pub content: Vec<AnthropicContentBlock>,
    pub stop_reason: Option<String>,
    pub stop_sequence: Option<String>,
    pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Arguments,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AnthropicUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

pub fn normalize(resp: Option<AnthropicResponse>) -> ChatResponse {
    match resp {
        Some(r) => r.into(),
        None => {
            tracing::warn!("anthropic response is null; returning empty response");
            ChatResponse::default()
        }
    }
}

impl From<AnthropicResponse> for ChatResponse {
    /// One choice per content block. Tool calls accumulate across blocks:
    /// every choice from the first `tool_use` block onward carries the whole
    /// list of tool calls found in the response.
    fn from(v: AnthropicResponse) -> Self {
        let mut choices = Vec::with_capacity(v.content.len());
        let mut tool_calls: Vec<ToolCall> = Vec::new();
        let mut first_tool_choice: Option<usize> = None;

        for (i, block) in v.content.into_iter().enumerate() {
            let mut message = ResponseMessage {
                role: v.role.clone(),
                ..ResponseMessage::default()
            };
            match block {
                AnthropicContentBlock::Text { text } => message.content = Some(text),
                AnthropicContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(ToolCall {
                        id,
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name,
                            arguments: input,
                        },
                    });
                    first_tool_choice.get_or_insert(i);
                }
                AnthropicContentBlock::Other => {
                    tracing::debug!(index = i, "unhandled anthropic content block type");
                }
            }
            choices.push(Choice {
                index: i as u32,
                message,
                logprobs: None,
                finish_reason: v.stop_reason.clone(),
            });
        }

        if let Some(start) = first_tool_choice {
            for choice in &mut choices[start..] {
                choice.message.tool_calls = Some(tool_calls.clone());
            }
        }

        ChatResponse {
            id: v.id,
            object: v.kind,
            created: chrono::Utc::now().timestamp(),
            model: v.model,
            choices,
            usage: Usage::new(v.usage.input_tokens, v.usage.output_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicStreamEvent {
    MessageStart {
        message: StreamMessage,
    },
    ContentBlockStart {
        #[serde(default)]
        index: u32,
    },
    ContentBlockDelta {
        #[serde(default)]
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop {
        #[serde(default)]
        index: u32,
    },
    MessageDelta {
        #[serde(default)]
        delta: MessageDeltaInfo,
        #[serde(default)]
        usage: Option<StreamUsage>,
    },
    MessageStop,
    Ping,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamMessage {
    model: String,
    usage: StreamUsage,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StreamUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct BlockDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MessageDeltaInfo {
    stop_reason: Option<String>,
}

/// Running state of one Anthropic-style stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnthropicStreamState {
    pub model: Option<String>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub stop_reason: Option<String>,
    /// Text carried by the most recent line only.
    pub content: Option<String>,
    pub complete: bool,
}

/// Incremental parser for Anthropic-style SSE streams.
///
/// Holds per-stream totals, so one parser serves exactly one stream. Call
/// [`reset`](Self::reset) before reusing it.
#[derive(Debug, Default)]
pub struct AnthropicStreamParser {
    state: AnthropicStreamState,
}

impl AnthropicStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &AnthropicStreamState {
        &self.state
    }

    pub fn reset(&mut self) {
        self.state = AnthropicStreamState::default();
    }

    pub fn usage(&self) -> Usage {
        Usage::new(self.state.input_tokens, self.state.output_tokens)
    }

    /// Feed one raw line. Non-`data:` lines (`event:`, comments, keepalives)
    /// are ignored. Returns a delta when the line carried text, or a terminal
    /// delta on `message_stop`.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamDelta>> {
        self.state.content = None;

        let Some(data) = line.strip_prefix(SSE_DATA_PREFIX) else {
            return Ok(None);
        };
        let data = data.trim();
        let event: AnthropicStreamEvent = serde_json::from_str(data)
            .map_err(|e| LlmError::Decode(format!("anthropic stream event: {e}; data={data}")))?;
        let stopped = matches!(event, AnthropicStreamEvent::MessageStop);
        self.apply(event);

        if let Some(text) = self.state.content.clone() {
            return Ok(Some(StreamDelta::text(self.state.model.clone(), text)));
        }
        // Terminal delta once, on the stop event itself.
        if stopped {
            return Ok(Some(StreamDelta::terminal(
                self.state.model.clone(),
                FINISH_REASON_STOP,
            )));
        }
        Ok(None)
    }

    fn apply(&mut self, event: AnthropicStreamEvent) {
        match event {
            AnthropicStreamEvent::MessageStart { message } => {
                self.state.model = Some(message.model).filter(|m| !m.is_empty());
                self.state.input_tokens = message.usage.input_tokens;
                self.state.output_tokens = message.usage.output_tokens;
            }
            AnthropicStreamEvent::ContentBlockStart { index }
            | AnthropicStreamEvent::ContentBlockStop { index } => {
                tracing::trace!(index, "anthropic content block boundary");
            }
            AnthropicStreamEvent::ContentBlockDelta { index, delta } => {
                tracing::trace!(index, "anthropic content block delta");
                self.state.content = delta.text;
            }
            AnthropicStreamEvent::MessageDelta { delta, usage } => {
                if delta.stop_reason.is_some() {
                    self.state.stop_reason = delta.stop_reason;
                }
                if let Some(u) = usage {
                    self.state.output_tokens = u.output_tokens;
                }
            }
            AnthropicStreamEvent::MessageStop => {
                self.state.complete = true;
            }
            AnthropicStreamEvent::Ping => {}
        }
    }
}
