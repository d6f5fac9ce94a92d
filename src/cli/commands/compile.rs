//! Compile command - print the task records a playbook compiles to

use super::{CommandContext, TargetArgs};
use anyhow::Result;
use clap::{Parser, ValueEnum};

/// Output format of compiled records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum RecordFormat {
    /// Pretty-printed JSON array
    Json,
    /// YAML sequence
    #[default]
    Yaml,
}

/// Arguments for the compile command
#[derive(Parser, Debug, Clone)]
pub struct CompileArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Output format
    #[arg(long, short = 'o', value_enum, default_value_t = RecordFormat::Yaml)]
    pub format: RecordFormat,
}

impl CompileArgs {
    /// Execute the compile command
    pub async fn execute(&self, ctx: &CommandContext) -> Result<i32> {
        let tasks = ctx.compile(&self.target).await?;
        let rendered = match self.format {
            RecordFormat::Json => serde_json::to_string_pretty(&tasks)?,
            RecordFormat::Yaml => serde_yaml::to_string(&tasks)?,
        };
        println!("{}", rendered.trim_end());
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_args_default_format() {
        let args = CompileArgs::try_parse_from(["compile", "site.yaml", "-i", "hosts.yaml"]).unwrap();
        assert_eq!(args.format, RecordFormat::Yaml);
        assert_eq!(args.target.playbook, "site.yaml");
    }

    #[test]
    fn test_compile_args_json() {
        let args = CompileArgs::try_parse_from([
            "compile", "site.yaml", "-i", "hosts.yaml", "--format", "json",
        ])
        .unwrap();
        assert_eq!(args.format, RecordFormat::Json);
    }
}
