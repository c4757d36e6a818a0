use super::traits::{LookupError, Tool};
use async_trait::async_trait;
use serde_json::json;

/// Availability probe for the public endpoint.
///
/// The probe target and success criteria are not defined yet, so the tool
/// answers with an explicit "not implemented" payload instead of being left
/// out of the catalog. The backend can then tell the user the check is
/// unavailable rather than guessing.
pub struct EndpointCheckTool;

#[async_trait]
impl Tool for EndpointCheckTool {
    fn name(&self) -> &str {
        "check_endpoint_availability"
    }

    fn description(&self) -> &str {
        "Check whether the production system is reachable. Returns the status code when it is not accessible."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<serde_json::Value, LookupError> {
        tracing::debug!("Endpoint availability probe requested; no probe is wired up");
        Ok(json!({
            "implemented": false,
            "status": null,
            "detail": "endpoint availability probe is not implemented"
        }))
    }
}
