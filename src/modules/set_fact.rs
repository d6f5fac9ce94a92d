//! Set_fact module - Set host variables during a run
//!
//! Every parameter becomes a variable of the host, visible to all later
//! tasks on that host for the rest of the pipeline run.

use async_trait::async_trait;

use super::{Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult};
use crate::vars::{HostMerge, Variables};

/// Module for setting host facts
pub struct SetFactModule;

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    fn description(&self) -> &'static str {
        "Set host variables that persist for the rest of the run"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        if params.is_empty() {
            return Err(ModuleError::MissingParameter(
                "at least one fact is required".to_string(),
            ));
        }
        if let Some(key) = params
            .keys()
            .find(|k| k.is_empty() || !k.chars().all(|c| c.is_alphanumeric() || c == '_'))
        {
            return Err(ModuleError::InvalidParameter(format!(
                "invalid fact name '{}'",
                key
            )));
        }
        Ok(())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        self.validate_params(&context.params)?;

        let facts: Variables = context.params.clone();
        let names: Vec<&str> = facts.keys().map(String::as_str).collect();
        let message = format!("set {}", names.join(", "));
        context
            .store
            .merge_host(HostMerge::host(context.host.clone(), facts))
            .map_err(|e| ModuleError::ExecutionFailed(e.to_string()))?;
        Ok(ModuleOutput::changed(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::test_context;
    use serde_json::json;

    #[tokio::test]
    async fn test_sets_host_var() {
        let ctx = test_context(json!({"cluster_ready": true, "count": 3}), None);
        let output = SetFactModule.execute(&ctx).await.unwrap();
        assert!(output.changed);

        let vars = ctx.store.host_vars("node1").unwrap();
        assert_eq!(vars["cluster_ready"], json!(true));
        assert_eq!(vars["count"], json!(3));
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let ctx = test_context(json!({"bad-name": 1}), None);
        assert!(SetFactModule.execute(&ctx).await.is_err());
        let ctx = test_context(json!({}), None);
        assert!(SetFactModule.execute(&ctx).await.is_err());
    }
}
