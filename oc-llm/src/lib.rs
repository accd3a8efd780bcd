//! Provider-agnostic chat client.
//!
//! One canonical request/response model over three wire protocols: local
//! inference (Ollama-style), OpenAI-compatible and Anthropic-style. The
//! provider is picked from the endpoint URL.

pub mod anthropic;
mod client;
mod convert;
mod error;
pub mod ollama;
pub mod openai;
mod provider;
mod schema;
mod stream;
mod transport;
mod types;

pub use anthropic::{AnthropicStreamParser, AnthropicStreamState};
pub use client::{DeltaStream, LlmClient, StreamHandler};
pub use convert::{ProviderRequest, convert};
pub use error::{LlmError, Result};
pub use provider::ProviderKind;
pub use stream::StreamParser;
pub use transport::{HttpTransport, LineStream, Transport, TransportRequest};
pub use types::{
    Arguments, ChatRequest, ChatRequestBuilder, ChatResponse, Choice, FINISH_REASON_STOP,
    FunctionCall, FunctionDeclaration, Message, ParameterSchema, PropertySpec, RequestInput,
    ResponseFormat, ResponseMessage, SchemaDescriptor, StreamDelta, StructuredValue, ToolCall,
    Usage,
};
