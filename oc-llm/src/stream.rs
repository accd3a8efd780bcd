//! Per-stream line parsing across providers.

use crate::anthropic::AnthropicStreamParser;
use crate::error::Result;
use crate::provider::ProviderKind;
use crate::types::{FINISH_REASON_STOP, StreamDelta};
use crate::{ollama, openai};

const DONE_SENTINEL: &str = "[DONE]";
/// The sentinel only counts near the start of a line (`data: [DONE]`).
const DONE_SENTINEL_MAX_OFFSET: usize = 10;

/// Line parser for one stream. Anthropic streams are stateful, so build a
/// fresh parser per stream.
#[derive(Debug)]
pub enum StreamParser {
    Ollama { model: Option<String> },
    OpenAi { model: Option<String> },
    Anthropic(AnthropicStreamParser),
}

impl StreamParser {
    pub fn for_provider(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::LocalInference => Self::Ollama { model: None },
            ProviderKind::OpenAiCompatible => Self::OpenAi { model: None },
            ProviderKind::Anthropic => Self::Anthropic(AnthropicStreamParser::new()),
        }
    }

    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Ollama { .. } => ProviderKind::LocalInference,
            Self::OpenAi { .. } => ProviderKind::OpenAiCompatible,
            Self::Anthropic(_) => ProviderKind::Anthropic,
        }
    }

    /// Feed one raw line. Empty lines yield nothing. A `[DONE]` sentinel on a
    /// non-Anthropic stream yields a terminal delta.
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamDelta>> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            return Ok(None);
        }

        let (model, parse): (&mut Option<String>, fn(&str) -> Result<Option<StreamDelta>>) =
            match self {
                Self::Anthropic(parser) => return parser.parse_line(line),
                Self::Ollama { model } => (model, ollama::parse_stream_line),
                Self::OpenAi { model } => (model, openai::parse_stream_line),
            };

        if is_done_sentinel(line) {
            return Ok(Some(StreamDelta::terminal(model.clone(), FINISH_REASON_STOP)));
        }
        let delta = parse(line)?;
        if let Some(seen) = delta.as_ref().and_then(|d| d.model.as_ref()) {
            *model = Some(seen.clone());
        }
        Ok(delta)
    }

    pub fn anthropic_state(&self) -> Option<&crate::anthropic::AnthropicStreamState> {
        match self {
            Self::Anthropic(parser) => Some(parser.state()),
            _ => None,
        }
    }
}

fn is_done_sentinel(line: &str) -> bool {
    line.find(DONE_SENTINEL)
        .is_some_and(|idx| idx < DONE_SENTINEL_MAX_OFFSET)
}
