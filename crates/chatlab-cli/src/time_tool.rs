//! Built-in tool that tells the model the current local time

use anyhow::{Error, anyhow};
use async_trait::async_trait;
use chatlab_common::{current_timestamp_millis, format_local_timestamp};
use chatlab_llm::ToolBinding;
use serde_json::{Value, json};

pub struct CurrentTimeTool;

#[async_trait]
impl ToolBinding for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Returns the current local date and time"
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn call(&self, arguments: Value) -> Result<Value, Error> {
        if !arguments.is_object() && !arguments.is_null() {
            return Err(anyhow!("Parameters must be an object"));
        }
        let now = current_timestamp_millis();
        Ok(json!({
            "epochMillis": now,
            "localTime": format_local_timestamp(now),
        }))
    }
}
