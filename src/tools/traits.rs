use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Description of a tool for the reasoning backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolSpec {
    /// Function-tool payload in the shape the Assistants API expects.
    pub fn to_function_tool(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Failure of a single lookup against an external system.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    /// The external system answered but reported a failure.
    #[error("{service} error: {message}")]
    Upstream {
        service: &'static str,
        message: String,
    },

    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} returned an unexpected response: {message}")]
    InvalidResponse {
        service: &'static str,
        message: String,
    },

    /// The tool is missing configuration it needs (URL, credential, channel).
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
}

impl LookupError {
    pub fn upstream(service: &'static str, message: impl Into<String>) -> Self {
        Self::Upstream {
            service,
            message: message.into(),
        }
    }

    pub fn http(service: &'static str) -> impl FnOnce(reqwest::Error) -> Self {
        move |source| Self::Http { service, source }
    }
}

/// Core tool trait: implement for any read-only capability the
/// reasoning backend may request.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the backend.
    fn name(&self) -> &str;

    /// Human-readable description used by the backend to pick a tool.
    fn description(&self) -> &str;

    /// JSON schema (`type: object`) for the tool arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the lookup. Arguments have already been checked against
    /// [`Tool::parameters_schema`].
    async fn execute(&self, args: serde_json::Value) -> Result<serde_json::Value, LookupError>;

    /// Full spec for registration.
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DummyTool;

    #[async_trait]
    impl Tool for DummyTool {
        fn name(&self) -> &str {
            "dummy_tool"
        }

        fn description(&self) -> &str {
            "A deterministic test tool"
        }

        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": { "value": { "type": "string" } },
                "required": ["value"]
            })
        }

        async fn execute(
            &self,
            args: serde_json::Value,
        ) -> Result<serde_json::Value, LookupError> {
            Ok(args["value"].clone())
        }
    }

    #[test]
    fn spec_uses_tool_metadata_and_schema() {
        let spec = DummyTool.spec();
        assert_eq!(spec.name, "dummy_tool");
        assert_eq!(spec.description, "A deterministic test tool");
        assert_eq!(spec.parameters["required"][0], "value");
    }

    #[test]
    fn function_tool_payload_wraps_spec() {
        let payload = DummyTool.spec().to_function_tool();
        assert_eq!(payload["type"], "function");
        assert_eq!(payload["function"]["name"], "dummy_tool");
        assert_eq!(payload["function"]["parameters"]["type"], "object");
    }

    #[tokio::test]
    async fn execute_returns_json_value() {
        let result = DummyTool
            .execute(serde_json::json!({ "value": "hello-tool" }))
            .await
            .unwrap();
        assert_eq!(result, "hello-tool");
    }

    #[test]
    fn upstream_error_carries_backend_message() {
        let err = LookupError::upstream("slack", "channel_not_found");
        assert_eq!(err.to_string(), "slack error: channel_not_found");
    }
}
