//! Name-keyed execution of the tool calls a model asks for.

mod error;
mod registry;
mod traits;

pub use error::{Result, ToolError};
pub use registry::{FunctionHandler, FunctionRegistry, ToolInvocation};
pub use traits::{Tool, optional_string, require_string};
