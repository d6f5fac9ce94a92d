//! Debug module - Print debug messages and variable values
//!
//! Runs entirely on the control node. `msg` arrives already rendered; `var`
//! names a variable (dotted paths allowed) looked up in the task's
//! variables.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    RAW_PARAMS,
};
use crate::vars::lookup_path;

/// Module for printing debug messages and variable values
pub struct DebugModule;

impl DebugModule {
    /// Format a variable value for display
    fn format_value(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => "(undefined)".to_string(),
            _ => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        }
    }
}

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    fn description(&self) -> &'static str {
        "Print debug messages or variable values"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.contains_key("msg") && params.contains_key("var") {
            return Err(ModuleError::InvalidParameter(
                "'msg' and 'var' are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        self.validate_params(&context.params)?;

        let message = if let Some(var) = context.params.get_string("var")? {
            let value = lookup_path(&context.vars, &var).cloned().unwrap_or(Value::Null);
            format!("{}: {}", var, Self::format_value(&value))
        } else if let Some(msg) = context.params.get("msg") {
            Self::format_value(msg)
        } else if let Some(raw) = context.params.get(RAW_PARAMS) {
            Self::format_value(raw)
        } else {
            "Hello world!".to_string()
        };

        info!(host = %context.host, "{}", message);
        Ok(ModuleOutput::ok(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_context;
    use crate::vars::to_variables;
    use serde_json::json;

    #[tokio::test]
    async fn test_msg() {
        let ctx = test_context(json!({"msg": "hello node1"}), None);
        let output = DebugModule.execute(&ctx).await.unwrap();
        assert_eq!(output.stdout, "hello node1");
        assert!(!output.changed);
    }

    #[tokio::test]
    async fn test_var_lookup() {
        let mut ctx = test_context(json!({"var": "os.release"}), None);
        ctx.vars = to_variables(json!({"os": {"release": "22.04"}})).unwrap();
        let output = DebugModule.execute(&ctx).await.unwrap();
        assert_eq!(output.stdout, "os.release: 22.04");

        let ctx = test_context(json!({"var": "missing"}), None);
        let output = DebugModule.execute(&ctx).await.unwrap();
        assert_eq!(output.stdout, "missing: (undefined)");
    }

    #[tokio::test]
    async fn test_msg_and_var_rejected() {
        let ctx = test_context(json!({"msg": "a", "var": "b"}), None);
        assert!(DebugModule.execute(&ctx).await.is_err());
    }
}
