use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    /// JSON text; empty means no parameters
    #[serde(default)]
    pub params: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    /// JSON text
    pub result: String,
}

#[derive(Debug, Serialize)]
struct ActionOutcome<'a> {
    executed_action: &'a str,
    params: Value,
    status: &'static str,
}

/// Out-of-band commands. Nothing is executed yet: the request is
/// acknowledged and echoed back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionService;

impl ActionService {
    pub fn new() -> Self {
        Self
    }

    pub fn execute(&self, request: &ActionRequest) -> AgentResult<ActionResponse> {
        let params = parse_params(&request.params)?;
        tracing::info!("Executing action {}", request.action);

        let outcome = ActionOutcome {
            executed_action: &request.action,
            params,
            status: "ok",
        };
        let result =
            serde_json::to_string(&outcome).map_err(|e| AgentError::Internal(e.to_string()))?;

        Ok(ActionResponse {
            success: true,
            result,
        })
    }
}

fn parse_params(params: &str) -> AgentResult<Value> {
    if params.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    serde_json::from_str(params)
        .map_err(|e| AgentError::InvalidParameters(format!("params are not valid JSON: {}", e)))
}
