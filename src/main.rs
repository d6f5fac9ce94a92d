//! kubekit - playbook compilation and task scheduling
//!
//! This is the main entry point for the kubekit CLI.

mod cli;

use anyhow::Result;
use cli::commands::CommandContext;
use cli::{Cli, Commands};
use kubekit::config::Config;
use kubekit::telemetry::{LogFormat, LogLevel, LoggingBuilder};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<kubekit::Error>()
                .map(kubekit::Error::exit_code)
                .unwrap_or(1)
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_ref())?;
    init_logging(&cli, &config)?;

    let ctx = CommandContext::new(&cli, config);
    match &cli.command {
        Commands::Compile(args) => args.execute(&ctx).await,
        Commands::Run(args) => args.execute(&ctx).await,
        Commands::Check(args) => args.execute(&ctx).await,
    }
}

/// Initialize logging from flags, falling back to the configured level
fn init_logging(cli: &Cli, config: &Config) -> Result<()> {
    let level = match (cli.verbosity(), &config.logging.level) {
        (0, Some(level)) => level.parse::<LogLevel>()?,
        (verbosity, _) => LogLevel::from_verbosity(verbosity),
    };
    let format = match cli.log_format {
        Some(format) => format,
        None => config.logging.format.parse::<LogFormat>()?,
    };

    LoggingBuilder::new()
        .with_level(level)
        .with_format(format)
        .with_ansi(config.logging.ansi)
        .with_spans(cli.verbosity() >= 3)
        .init()?;
    Ok(())
}
