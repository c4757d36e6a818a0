use super::error::DispatchError;
use crate::assistant::ToolInvocation;
use crate::tools::CapabilityRegistry;
use std::sync::Arc;

/// Runs one requested capability against the registry.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<CapabilityRegistry>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// Resolve, validate and execute `call`, returning the JSON result that
    /// will be handed back to the backend unchanged.
    pub async fn execute(&self, call: &ToolInvocation) -> Result<serde_json::Value, DispatchError> {
        let tool = self.registry.resolve(&call.name)?;
        let args = parse_arguments(&call.name, &call.arguments)?;
        validate_arguments(&call.name, &tool.parameters_schema(), &args)?;

        tracing::debug!(tool = %call.name, call_id = %call.call_id, args = %args, "Executing tool");
        Ok(tool.execute(args).await?)
    }
}

/// Decode the backend's JSON-encoded argument string. Blank means no arguments.
pub fn parse_arguments(tool: &str, raw: &str) -> Result<serde_json::Value, DispatchError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| DispatchError::InvalidArguments {
            tool: tool.to_string(),
            message: format!("arguments are not valid JSON: {e}"),
        })?;
    if !value.is_object() {
        return Err(DispatchError::InvalidArguments {
            tool: tool.to_string(),
            message: "arguments must be a JSON object".into(),
        });
    }
    Ok(value)
}

/// Structural check against an object schema: required keys are present and
/// declared properties carry the declared JSON type. Ranges and enums are not
/// checked.
pub fn validate_arguments(
    tool: &str,
    schema: &serde_json::Value,
    args: &serde_json::Value,
) -> Result<(), DispatchError> {
    let invalid = |message: String| DispatchError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };

    let required = schema
        .get("required")
        .and_then(serde_json::Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(serde_json::Value::as_str);
    for key in required {
        if args.get(key).is_none_or(serde_json::Value::is_null) {
            return Err(invalid(format!("missing required argument '{key}'")));
        }
    }

    let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (key, property) in properties {
        let Some(value) = args.get(key).filter(|v| !v.is_null()) else {
            continue;
        };
        let Some(expected) = property.get("type").and_then(serde_json::Value::as_str) else {
            continue;
        };
        if !json_type_matches(expected, value) {
            return Err(invalid(format!(
                "argument '{key}' must be of type {expected}"
            )));
        }
    }

    Ok(())
}

fn json_type_matches(expected: &str, value: &serde_json::Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}
