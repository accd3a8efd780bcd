use crate::error::{LlmError, Result};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Tool-call arguments, in the order the provider emitted them.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// Canonical finish reason for a completed stream.
pub const FINISH_REASON_STOP: &str = "stop";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    role: String,
    content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Result<Self> {
        let role = role.into();
        let content = content.into();
        if role.is_empty() {
            return Err(LlmError::InvalidArgument(
                "message role must not be empty".to_string(),
            ));
        }
        if content.is_empty() {
            return Err(LlmError::InvalidArgument(
                "message content must not be empty".to_string(),
            ));
        }
        Ok(Self { role, content })
    }

    pub fn system(content: impl Into<String>) -> Result<Self> {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Result<Self> {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Result<Self> {
        Self::new("assistant", content)
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

/// One property of a function's parameter object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertySpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<String>>,
}

impl PropertySpec {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
            allowed: None,
        }
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.allowed = if values.is_empty() { None } else { Some(values) };
        self
    }
}

/// JSON-Schema object describing a function's parameters.
///
/// Properties keep insertion order; `required` tracks every property that was
/// added as required, in the order it was added.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    kind: String,
    properties: IndexMap<String, PropertySpec>,
    required: Vec<String>,
}

impl Default for ParameterSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self {
            kind: "object".to_string(),
            properties: IndexMap::new(),
            required: Vec::new(),
        }
    }

    pub fn property(mut self, name: impl Into<String>, spec: PropertySpec, required: bool) -> Self {
        let name = name.into();
        self.required.retain(|n| n != &name);
        if required {
            self.required.push(name.clone());
        }
        self.properties.insert(name, spec);
        self
    }

    pub fn properties(&self) -> &IndexMap<String, PropertySpec> {
        &self.properties
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDeclaration {
    name: String,
    description: String,
    parameters: ParameterSchema,
}

impl FunctionDeclaration {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ParameterSchema,
    ) -> Result<Self> {
        let name = name.into();
        let description = description.into();
        if name.is_empty() {
            return Err(LlmError::InvalidArgument(
                "function name is required".to_string(),
            ));
        }
        if description.is_empty() {
            return Err(LlmError::InvalidArgument(format!(
                "function {name} needs a description"
            )));
        }
        Ok(Self {
            name,
            description,
            parameters,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn parameters(&self) -> &ParameterSchema {
        &self.parameters
    }
}

/// A decoded structured-output value, retrievable by its concrete type.
#[derive(Clone)]
pub struct StructuredValue(Arc<dyn Any + Send + Sync>);

impl StructuredValue {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for StructuredValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StructuredValue(..)")
    }
}

type StructuredDecoder = fn(&str) -> serde_json::Result<StructuredValue>;

fn decode_structured<T>(raw: &str) -> serde_json::Result<StructuredValue>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    serde_json::from_str::<T>(raw).map(StructuredValue::new)
}

/// Target type of a structured-output request: its name, its JSON Schema and
/// a decoder producing the typed value.
#[derive(Clone)]
pub struct SchemaDescriptor {
    name: String,
    schema: serde_json::Value,
    decode: StructuredDecoder,
}

impl SchemaDescriptor {
    pub fn of<T>() -> Self
    where
        T: schemars::JsonSchema + DeserializeOwned + Send + Sync + 'static,
    {
        let mut schema = schemars::schema_for!(T).to_value();
        if let Some(obj) = schema.as_object_mut() {
            obj.remove("$schema");
        }
        Self {
            name: T::schema_name().into_owned(),
            schema,
            decode: decode_structured::<T>,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &serde_json::Value {
        &self.schema
    }

    pub fn decode(&self, raw: &str) -> Result<StructuredValue> {
        (self.decode)(raw).map_err(|e| {
            LlmError::Decode(format!("structured output for {}: {e}", self.name))
        })
    }
}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum ResponseFormat {
    /// `{"type":"json_object"}`.
    JsonMode,
    StructuredOutput(SchemaDescriptor),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestInput {
    /// Single-turn completion.
    Prompt(String),
    /// Chat history, never empty.
    Messages(Vec<Message>),
}

/// Provider-agnostic request. Build with [`ChatRequest::builder`].
#[derive(Debug, Clone)]
pub struct ChatRequest {
    model: String,
    input: RequestInput,
    temperature: Option<f64>,
    tools: Vec<FunctionDeclaration>,
    stream: bool,
    response_format: Option<ResponseFormat>,
    format: Option<String>,
}

impl ChatRequest {
    pub fn builder() -> ChatRequestBuilder {
        ChatRequestBuilder::default()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input(&self) -> &RequestInput {
        &self.input
    }

    pub fn prompt(&self) -> Option<&str> {
        match &self.input {
            RequestInput::Prompt(p) => Some(p),
            RequestInput::Messages(_) => None,
        }
    }

    pub fn messages(&self) -> Option<&[Message]> {
        match &self.input {
            RequestInput::Prompt(_) => None,
            RequestInput::Messages(m) => Some(m),
        }
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn tools(&self) -> &[FunctionDeclaration] {
        &self.tools
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    pub fn response_format(&self) -> Option<&ResponseFormat> {
        self.response_format.as_ref()
    }

    pub fn format(&self) -> Option<&str> {
        self.format.as_deref()
    }

    pub fn structured_output(&self) -> Option<&SchemaDescriptor> {
        match &self.response_format {
            Some(ResponseFormat::StructuredOutput(d)) => Some(d),
            _ => None,
        }
    }

    /// Messages as sent to chat-only providers: a prompt becomes one user turn.
    pub(crate) fn chat_messages(&self) -> Vec<Message> {
        match &self.input {
            RequestInput::Messages(m) => m.clone(),
            RequestInput::Prompt(p) => vec![Message {
                role: "user".to_string(),
                content: p.clone(),
            }],
        }
    }

    pub(crate) fn with_stream(&self, stream: bool) -> Self {
        let mut out = self.clone();
        out.stream = stream;
        out
    }
}

#[derive(Debug, Default)]
pub struct ChatRequestBuilder {
    model: Option<String>,
    prompt: Option<String>,
    messages: Option<Vec<Message>>,
    temperature: Option<f64>,
    tools: Vec<FunctionDeclaration>,
    stream: bool,
    response_format: Option<ResponseFormat>,
    format: Option<String>,
}

impl ChatRequestBuilder {
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = Some(messages);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn tools(mut self, tools: Vec<FunctionDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    pub fn stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = Some(format);
        self
    }

    /// Raw `format` override for local-inference providers.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn build(self) -> Result<ChatRequest> {
        let model = self
            .model
            .filter(|m| !m.is_empty())
            .ok_or_else(|| LlmError::InvalidArgument("model name is required".to_string()))?;

        let input = match (self.prompt, self.messages) {
            (Some(_), Some(_)) => {
                return Err(LlmError::InvalidArgument(
                    "cannot set both prompt and messages".to_string(),
                ));
            }
            (None, None) => {
                return Err(LlmError::InvalidArgument(
                    "either prompt or messages must be set".to_string(),
                ));
            }
            (Some(prompt), None) => RequestInput::Prompt(prompt),
            (None, Some(messages)) => {
                if messages.is_empty() {
                    return Err(LlmError::InvalidArgument(
                        "messages must not be empty".to_string(),
                    ));
                }
                RequestInput::Messages(messages)
            }
        };

        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(LlmError::InvalidArgument(format!(
                    "temperature must be between 0.0 and 2.0, got {t}"
                )));
            }
        }

        Ok(ChatRequest {
            model,
            input,
            temperature: self.temperature,
            tools: self.tools,
            stream: self.stream,
            response_format: self.response_format,
            format: self.format,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: Arguments,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Typed value decoded from `content` in structured-output mode.
    #[serde(skip)]
    pub structured: Option<StructuredValue>,
}

impl ResponseMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn parsed<T: Any>(&self) -> Option<&T> {
        self.structured.as_ref().and_then(|v| v.downcast_ref::<T>())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<serde_json::Value>,
    pub finish_reason: Option<String>,
}

/// Provider-agnostic response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<String>,
    /// Unix seconds.
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatResponse {
    pub fn first_message(&self) -> Option<&ResponseMessage> {
        self.choices.first().map(|c| &c.message)
    }

    pub fn first_content(&self) -> Option<&str> {
        self.first_message().and_then(|m| m.content.as_deref())
    }
}

/// One incremental unit of a streamed reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    pub model: Option<String>,
    /// Text to hand to the caller; `None` when the line carried no text.
    pub content: Option<String>,
    pub finish_reason: Option<String>,
    /// The stream is finished after this delta.
    pub done: bool,
}

impl StreamDelta {
    pub(crate) fn text(model: Option<String>, content: impl Into<String>) -> Self {
        Self {
            model,
            content: Some(content.into()),
            finish_reason: None,
            done: false,
        }
    }

    pub(crate) fn terminal(model: Option<String>, finish_reason: impl Into<String>) -> Self {
        Self {
            model,
            content: None,
            finish_reason: Some(finish_reason.into()),
            done: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user() -> Vec<Message> {
        vec![Message::user("hello").expect("valid message")]
    }

    #[test]
    fn temperature_bounds_are_inclusive() {
        for t in [0.0, 2.0] {
            ChatRequest::builder()
                .model("m")
                .messages(user())
                .temperature(t)
                .build()
                .expect("boundary temperature accepted");
        }
        for t in [2.0001, -0.0001, f64::NAN] {
            let err = ChatRequest::builder()
                .model("m")
                .messages(user())
                .temperature(t)
                .build()
                .expect_err("out of range temperature rejected");
            assert!(matches!(err, LlmError::InvalidArgument(_)));
        }
    }

    #[test]
    fn prompt_and_messages_are_mutually_exclusive() {
        let both = ChatRequest::builder()
            .model("m")
            .prompt("hi")
            .messages(user())
            .build();
        assert!(matches!(both, Err(LlmError::InvalidArgument(_))));

        let neither = ChatRequest::builder().model("m").build();
        assert!(matches!(neither, Err(LlmError::InvalidArgument(_))));

        let empty = ChatRequest::builder().model("m").messages(Vec::new()).build();
        assert!(matches!(empty, Err(LlmError::InvalidArgument(_))));
    }

    #[test]
    fn model_is_required() {
        let missing = ChatRequest::builder().prompt("hi").build();
        assert!(matches!(missing, Err(LlmError::InvalidArgument(_))));
        let blank = ChatRequest::builder().model("").prompt("hi").build();
        assert!(matches!(blank, Err(LlmError::InvalidArgument(_))));
    }

    #[test]
    fn message_rejects_empty_role_or_content() {
        assert!(Message::new("", "x").is_err());
        assert!(Message::new("user", "").is_err());
        assert!(FunctionDeclaration::new("", "d", ParameterSchema::new()).is_err());
        assert!(FunctionDeclaration::new("f", "", ParameterSchema::new()).is_err());
    }

    #[test]
    fn parameter_schema_tracks_required_in_order() {
        let schema = ParameterSchema::new()
            .property("location", PropertySpec::new("string", "City"), true)
            .property("verbose", PropertySpec::new("boolean", "Chatty"), false)
            .property(
                "unit",
                PropertySpec::new("string", "C or F").with_enum(["C", "F"]),
                true,
            );
        assert_eq!(schema.required(), ["location", "unit"]);
        assert_eq!(
            serde_json::to_value(&schema).expect("serializes"),
            json!({
                "type": "object",
                "properties": {
                    "location": {"type": "string", "description": "City"},
                    "verbose": {"type": "boolean", "description": "Chatty"},
                    "unit": {"type": "string", "description": "C or F", "enum": ["C", "F"]}
                },
                "required": ["location", "unit"]
            })
        );
    }

    #[derive(Debug, Deserialize, schemars::JsonSchema)]
    struct Country {
        name: String,
        capital: String,
    }

    #[test]
    fn schema_descriptor_decodes_typed_value() {
        let d = SchemaDescriptor::of::<Country>();
        assert_eq!(d.name(), "Country");
        assert!(d.schema().get("$schema").is_none());
        assert!(d.schema()["properties"].get("capital").is_some());

        let v = d
            .decode(r#"{"name":"France","capital":"Paris"}"#)
            .expect("decodes");
        let country = v.downcast_ref::<Country>().expect("typed value");
        assert_eq!(country.name, "France");
        assert_eq!(country.capital, "Paris");

        assert!(matches!(d.decode("not json"), Err(LlmError::Decode(_))));
    }
}
