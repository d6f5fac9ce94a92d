//! CLI module for kubekit
//!
//! Argument parsing and subcommand dispatch for the `kubekit` binary.

pub mod commands;

use clap::{Parser, Subcommand};
use kubekit::telemetry::LogFormat;
use std::path::PathBuf;

/// kubekit - compile playbooks into task records and reconcile them
#[derive(Parser, Debug, Clone)]
#[command(name = "kubekit")]
#[command(version)]
#[command(about = "Compile playbooks into tasks and drive them to completion", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "KUBEKIT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format (pretty, compact, json)
    #[arg(long, global = true, value_parser = parse_log_format)]
    pub log_format: Option<LogFormat>,

    /// Project root that playbook and role paths are relative to
    #[arg(short = 'p', long, global = true)]
    pub project_dir: Option<PathBuf>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile a playbook and print the task records
    Compile(commands::compile::CompileArgs),

    /// Compile a playbook and run it on the local host
    Run(commands::run::RunArgs),

    /// Check that a playbook compiles
    Check(commands::check::CheckArgs),
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    s.parse().map_err(|e: kubekit::Error| e.to_string())
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }
}
