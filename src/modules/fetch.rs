//! Fetch module - Copy a file from the target host to the control node
//!
//! `dest` is a directory unless `flat` is set: the file lands at
//! `dest/<host>/<src>` by default and at `dest` itself with `flat: true`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
};

/// Module for fetching files from hosts
pub struct FetchModule;

impl FetchModule {
    fn destination(params: &ModuleParams, host: &str, src: &str) -> ModuleResult<PathBuf> {
        let dest = params.get_string_required("dest")?;
        if params.get_bool_or("flat", false) {
            return Ok(PathBuf::from(dest));
        }
        Ok(Path::new(&dest)
            .join(host)
            .join(src.trim_start_matches('/')))
    }
}

#[async_trait]
impl Module for FetchModule {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn description(&self) -> &'static str {
        "Copy a file from the target host to the control node"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        params.get_string_required("src")?;
        params.get_string_required("dest")?;
        Ok(())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        self.validate_params(&context.params)?;
        let src = context.params.get_string_required("src")?;
        let dest = Self::destination(&context.params, &context.host, &src)?;
        let connector = context.require_connector(self.name())?;

        let content = connector
            .fetch_file(&context.host, Path::new(&src))
            .await
            .map_err(|e| ModuleError::ExecutionFailed(e.to_string()))?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Ok(existing) = tokio::fs::read(&dest).await {
            if existing == content {
                return Ok(ModuleOutput::ok(dest.display().to_string()));
            }
        }
        tokio::fs::write(&dest, &content).await?;
        Ok(ModuleOutput::changed(dest.display().to_string()))
    }
}
