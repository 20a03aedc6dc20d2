//! Current-time tool.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolOutput};

pub struct GetCurrentTimeTool;

#[async_trait]
impl Tool for GetCurrentTimeTool {
    fn name(&self) -> &str {
        "get_current_time"
    }

    fn description(&self) -> &str {
        "Returns the current UTC time as an ISO-8601 timestamp."
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object", "properties": {}, "additionalProperties": false})
    }

    fn retry_safe(&self) -> bool {
        true
    }

    async fn invoke(&self, _args: Value) -> ToolOutput {
        let now = chrono::Utc::now();
        ToolOutput::ok(json!({
            "iso": now.to_rfc3339(),
            "unix": now.timestamp(),
        }))
    }
}
