use crate::error::LlmError;
use std::fmt;
use std::str::FromStr;

const LOCAL_INFERENCE_MARKER: &str = ":11434/";
const ANTHROPIC_MARKER: &str = "anthropic.com/";

/// Wire-protocol family a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Ollama-style `/api/chat` and `/api/generate`.
    LocalInference,
    OpenAiCompatible,
    Anthropic,
}

impl ProviderKind {
    /// Classify by base URL. Anything unrecognized is OpenAI-compatible.
    pub fn from_url(api_url: &str) -> Self {
        if api_url.contains(LOCAL_INFERENCE_MARKER) {
            return Self::LocalInference;
        }
        if api_url.contains(ANTHROPIC_MARKER) {
            return Self::Anthropic;
        }
        Self::OpenAiCompatible
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalInference => "ollama",
            Self::OpenAiCompatible => "openai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" | "local" => Ok(Self::LocalInference),
            "openai" => Ok(Self::OpenAiCompatible),
            "anthropic" => Ok(Self::Anthropic),
            other => Err(LlmError::UnsupportedProvider(other.to_string())),
        }
    }
}
