//! Shell module - Run a shell snippet on the target host
//!
//! Unlike `command`, the snippet may span lines and use pipes and
//! redirects; it is handed to the connector as-is, optionally prefixed by a
//! `cd` into `chdir`.

use async_trait::async_trait;

use super::command::{run, shell_quote};
use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    RAW_PARAMS,
};

/// Module for executing shell snippets
pub struct ShellModule;

impl ShellModule {
    fn script(params: &ModuleParams) -> ModuleResult<String> {
        let script = match params.get_string(RAW_PARAMS)? {
            Some(raw) => raw,
            None => params.get_string_required("cmd")?,
        };
        if script.trim().is_empty() {
            return Err(ModuleError::InvalidParameter(
                "shell script cannot be empty".to_string(),
            ));
        }
        Ok(match params.get_string("chdir")? {
            Some(dir) => format!("cd {} && {}", shell_quote(&dir), script),
            None => script,
        })
    }
}

#[async_trait]
impl Module for ShellModule {
    fn name(&self) -> &'static str {
        "shell"
    }

    fn description(&self) -> &'static str {
        "Execute a shell snippet on the target host"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        Self::script(params).map(|_| ())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let script = Self::script(&context.params)?;
        run(context, self.name(), &script).await
    }
}
