//! Command module - Execute a command on the target host
//!
//! The command comes from the scalar argument (`command: uname -r`), `cmd`,
//! or an `argv` list whose items are quoted individually.

use async_trait::async_trait;

use super::{
    Module, ModuleContext, ModuleError, ModuleOutput, ModuleParams, ModuleResult, ParamExt,
    RAW_PARAMS,
};

/// Module for executing commands
pub struct CommandModule;

/// Quote a word for `sh`.
pub(crate) fn shell_quote(word: &str) -> String {
    if !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c))
    {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Build the command line from `_raw_params`/`cmd`/`argv` and `chdir`.
pub(crate) fn command_line(params: &ModuleParams) -> ModuleResult<String> {
    let cmd = match params.get_vec_string("argv")? {
        Some(argv) => {
            if argv.is_empty() {
                return Err(ModuleError::InvalidParameter(
                    "argv cannot be empty".to_string(),
                ));
            }
            argv.iter()
                .map(|a| shell_quote(a))
                .collect::<Vec<_>>()
                .join(" ")
        }
        None => match params.get_string(RAW_PARAMS)? {
            Some(raw) => raw,
            None => params.get_string_required("cmd")?,
        },
    };
    if cmd.trim().is_empty() {
        return Err(ModuleError::InvalidParameter(
            "cmd cannot be empty".to_string(),
        ));
    }
    Ok(match params.get_string("chdir")? {
        Some(dir) => format!("cd {} && {}", shell_quote(&dir), cmd),
        None => cmd,
    })
}

/// Run a command line on the context's host.
pub(crate) async fn run(
    context: &ModuleContext,
    module: &'static str,
    line: &str,
) -> ModuleResult<ModuleOutput> {
    let connector = context.require_connector(module)?;
    let result = connector
        .execute_command(&context.host, line)
        .await
        .map_err(|e| ModuleError::ExecutionFailed(e.to_string()))?;

    Ok(ModuleOutput {
        stdout: result.stdout.trim_end().to_string(),
        stderr: result.stderr.trim_end().to_string(),
        rc: Some(result.exit_code),
        changed: true,
        failed: !result.success,
    })
}

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
    }

    fn description(&self) -> &'static str {
        "Execute a command on the target host"
    }

    fn validate_params(&self, params: &ModuleParams) -> ModuleResult<()> {
        command_line(params).map(|_| ())
    }

    async fn execute(&self, context: &ModuleContext) -> ModuleResult<ModuleOutput> {
        let line = command_line(&context.params)?;
        run(context, self.name(), &line).await
    }
}
