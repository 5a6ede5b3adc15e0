//! Built-in tools.

use crate::ports::tool::{ToolError, ToolHandler};
use crate::registry::ToolRegistry;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// Acknowledges a request that needs no action.
#[derive(Debug, Default, Clone, Copy)]
pub struct DoNothing;

#[async_trait]
impl ToolHandler for DoNothing {
    async fn call(&self, _args: Value) -> Result<Value, ToolError> {
        Ok(json!({
            "status": "SUCCESS",
            "message": "No action required at this time",
            "action_taken": "none",
        }))
    }

    fn description(&self) -> &str {
        "Acknowledge without taking any action"
    }
}

/// Returns its arguments unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct Echo;

#[async_trait]
impl ToolHandler for Echo {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        Ok(args)
    }

    fn description(&self) -> &str {
        "Return the arguments unchanged"
    }
}

/// Register `do_nothing` and `echo`.
pub fn register_builtins(registry: &mut ToolRegistry) {
    registry.register("do_nothing", Arc::new(DoNothing));
    registry.register("echo", Arc::new(Echo));
    registry.alias("noop", "do_nothing");
}
