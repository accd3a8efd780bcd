use crate::error::{Result, ToolError};
use crate::traits::Tool;
use indexmap::IndexMap;
use oc_llm::{Arguments, ChatResponse, FunctionDeclaration, ToolCall};
use std::fmt;
use std::sync::Arc;

pub type FunctionHandler = Arc<dyn Fn(&Arguments) -> Result<serde_json::Value> + Send + Sync>;

#[derive(Clone)]
enum Entry {
    Function(FunctionHandler),
    Tool(Arc<dyn Tool>),
}

/// Outcome of running one tool call from a response.
#[derive(Debug)]
pub struct ToolInvocation {
    pub call_id: String,
    pub name: String,
    pub result: Result<serde_json::Value>,
}

/// Functions and tools by name, in registration order. Registering a name
/// again replaces the earlier entry.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    entries: IndexMap<String, Entry>,
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRegistry")
            .field("names", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Arguments) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(%name, "registered function");
        self.entries.insert(name, Entry::Function(Arc::new(handler)));
    }

    pub fn register_tool(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.spec().name().to_string();
        tracing::debug!(%name, "registered tool");
        self.entries.insert(name, Entry::Tool(tool));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Declarations of the registered tools. Plain functions carry no
    /// declaration and are skipped.
    pub fn declarations(&self) -> Vec<FunctionDeclaration> {
        self.entries
            .values()
            .filter_map(|entry| match entry {
                Entry::Tool(tool) => Some(tool.spec()),
                Entry::Function(_) => None,
            })
            .collect()
    }

    #[tracing::instrument(level = "info", skip(self, arguments))]
    pub async fn invoke(&self, name: &str, arguments: &Arguments) -> Result<serde_json::Value> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| ToolError::FunctionNotFound(name.to_string()))?;
        let result = match entry {
            Entry::Function(handler) => handler(arguments),
            Entry::Tool(tool) => tool.execute(arguments).await,
        };
        if let Err(e) = &result {
            tracing::warn!(error = %e, "function call failed");
        }
        result
    }

    /// Run the tool calls of every choice, in order.
    ///
    /// Anthropic-style responses repeat the same call list on consecutive
    /// choices; a list identical to the previous choice's is run once.
    pub async fn invoke_tool_calls(&self, response: &ChatResponse) -> Vec<ToolInvocation> {
        let mut out = Vec::new();
        let mut previous: Option<&[ToolCall]> = None;
        for choice in &response.choices {
            let Some(calls) = choice.message.tool_calls.as_deref() else {
                continue;
            };
            if previous == Some(calls) {
                continue;
            }
            previous = Some(calls);
            for call in calls {
                let result = self.invoke(&call.function.name, &call.function.arguments).await;
                out.push(ToolInvocation {
                    call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    result,
                });
            }
        }
        out
    }
}
