//! Canonical request to provider wire body.

use crate::anthropic::AnthropicRequest;
use crate::error::Result;
use crate::ollama::OllamaRequest;
use crate::openai::OpenAiRequest;
use crate::provider::ProviderKind;
use crate::types::ChatRequest;
use serde::Serialize;

/// Provider-specific request body, ready to serialize.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProviderRequest {
    Ollama(OllamaRequest),
    OpenAi(OpenAiRequest),
    Anthropic(AnthropicRequest),
}

impl ProviderRequest {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Ollama(_) => ProviderKind::LocalInference,
            Self::OpenAi(_) => ProviderKind::OpenAiCompatible,
            Self::Anthropic(_) => ProviderKind::Anthropic,
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| crate::error::LlmError::Encode(e.to_string()))
    }
}

/// Pure conversion; the same request converts to the same body every time.
#[tracing::instrument(level = "debug", skip_all, fields(provider = %kind, model = request.model()))]
pub fn convert(request: &ChatRequest, kind: ProviderKind) -> Result<ProviderRequest> {
    let converted = match kind {
        ProviderKind::LocalInference => ProviderRequest::Ollama(OllamaRequest::from_canonical(request)),
        ProviderKind::OpenAiCompatible => {
            ProviderRequest::OpenAi(OpenAiRequest::from_canonical(request))
        }
        ProviderKind::Anthropic => {
            ProviderRequest::Anthropic(AnthropicRequest::from_canonical(request))
        }
    };
    tracing::debug!(
        tools = request.tools().len(),
        stream = request.is_stream(),
        "converted canonical request"
    );
    Ok(converted)
}
