use crate::error::{Result, ToolError};
use async_trait::async_trait;
use oc_llm::{Arguments, FunctionDeclaration};
use serde_json::Value;

/// A callable the model can be offered. `spec()` is what goes into a
/// request's `tools`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> FunctionDeclaration;
    async fn execute(&self, arguments: &Arguments) -> Result<Value>;
}

/// Required string argument. An explicit `null` counts as missing.
pub fn require_string(args: &Arguments, key: &str) -> Result<String> {
    string_arg(args, key)?
        .map(str::to_owned)
        .ok_or_else(|| ToolError::InvalidArguments(format!("{key}: required")))
}

pub fn optional_string(args: &Arguments, key: &str) -> Result<Option<String>> {
    Ok(string_arg(args, key)?.map(str::to_owned))
}

fn string_arg<'a>(args: &'a Arguments, key: &str) -> Result<Option<&'a str>> {
    let Some(value) = args.get(key).filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    value.as_str().map(Some).ok_or_else(|| {
        ToolError::InvalidArguments(format!("{key}: expected a string, found {}", kind(value)))
    })
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
