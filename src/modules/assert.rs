//! Assert module - Fail unless conditions hold
//!
//! `that` is one condition or a list of them, evaluated like `when`.
//! `fail_msg` (or `msg`) replaces the default failure message and
//! `success_msg` the default success message.

use async_trait::async_trait;
use serde_json::Value;

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

/// Module for asserting conditions
pub struct AssertModule;

impl AssertModule {
    fn conditions(params: &ModuleParams) -> ModuleResult<Vec<String>> {
        match params.get("that") {
            Some(Value::String(s)) => Ok(vec![s.clone()]),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect()),
            Some(Value::Bool(b)) => Ok(vec![b.to_string()]),
            _ => Err(ModuleError::MissingParameter(
                "'that' parameter is required".to_string(),
            )),
        }
    }
}

#[async_trait]
impl Module for AssertModule {
    fn name(&self) -> &'static str {
        "assert"
    }

    fn description(&self) -> &'static str {
        "Assert that conditions are true"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        Self::conditions(params).map(|_| ())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let conditions = Self::conditions(&context.params)?;

        let mut failed = Vec::new();
        for condition in &conditions {
            let holds = context
                .templates
                .evaluate(condition, &context.vars)
                .map_err(|e| ModuleError::InvalidParameter(e.to_string()))?;
            if !holds {
                failed.push(condition.as_str());
            }
        }

        if failed.is_empty() {
            let msg = context
                .params
                .get_string("success_msg")?
                .unwrap_or_else(|| "All assertions passed".to_string());
            return Ok(ModuleOutput::ok(msg));
        }

        let msg = match context.params.get_string("fail_msg")? {
            Some(msg) => msg,
            None => match context.params.get_string("msg")? {
                Some(msg) => msg,
                None => format!("Assertion failed: {}", failed.join(", ")),
            },
        };
        Ok(ModuleOutput::failed(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_context;
    use crate::vars::to_variables;
    use serde_json::json;

    #[tokio::test]
    async fn test_all_pass() {
        let mut ctx = test_context(json!({"that": ["x == 1", "y"]}), None);
        ctx.vars = to_variables(json!({"x": 1, "y": true})).unwrap();
        let output = AssertModule.execute(&ctx).await.unwrap();
        assert!(!output.failed);
        assert_eq!(output.stdout, "All assertions passed");
    }

    #[tokio::test]
    async fn test_failure_message() {
        let mut ctx = test_context(json!({"that": "x == 2"}), None);
        ctx.vars = to_variables(json!({"x": 1})).unwrap();
        let output = AssertModule.execute(&ctx).await.unwrap();
        assert!(output.failed);
        assert_eq!(output.stderr, "Assertion failed: x == 2");

        let mut ctx = test_context(json!({"that": "x == 2", "fail_msg": "wrong x"}), None);
        ctx.vars = to_variables(json!({"x": 1})).unwrap();
        assert_eq!(AssertModule.execute(&ctx).await.unwrap().stderr, "wrong x");
    }

    #[test]
    fn test_missing_that() {
        assert!(AssertModule
            .validate_params(&crate::modules::to_params(&json!({"msg": "x"})))
            .is_err());
    }
}
