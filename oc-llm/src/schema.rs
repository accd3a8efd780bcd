//! JSON Schema rewriting for structured output.
//!
//! Providers that constrain output to a schema reject optional properties, so
//! every declared property is listed in `required` whatever the target type
//! says about optionality.

use crate::types::SchemaDescriptor;
use serde_json::{Value, json};

/// Replace `required` with the full list of property names, in declaration order.
pub(crate) fn require_all_properties(schema: &mut Value) {
    let Some(obj) = schema.as_object_mut() else {
        return;
    };
    let names: Vec<Value> = obj
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| props.keys().cloned().map(Value::String).collect())
        .unwrap_or_default();
    obj.insert("required".to_string(), Value::Array(names));
}

/// `format` value for local-inference structured output.
pub(crate) fn local_inference_format(descriptor: &SchemaDescriptor) -> Value {
    let mut schema = descriptor.schema().clone();
    require_all_properties(&mut schema);
    tracing::debug!(target_type = descriptor.name(), %schema, "synthesized structured output schema");
    schema
}

/// `response_format` value for OpenAI-compatible structured output.
pub(crate) fn openai_response_format(descriptor: &SchemaDescriptor) -> Value {
    let mut schema = descriptor.schema().clone();
    require_all_properties(&mut schema);
    if let Some(obj) = schema.as_object_mut() {
        obj.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    let wrapped = json!({
        "type": "json_schema",
        "json_schema": {
            "name": format!("{}_response", descriptor.name()),
            "strict": true,
            "schema": schema,
        }
    });
    tracing::debug!(target_type = descriptor.name(), %wrapped, "synthesized structured output wrapper");
    wrapped
}
