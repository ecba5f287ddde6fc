pub mod commands;
pub mod logging;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use expensa_core::config::{AppConfig, LoadOptions};

#[derive(Debug, Parser)]
#[command(
    name = "expensa",
    about = "Expensa operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, and evaluate expense scenarios offline.",
    after_help = "Examples:\n  expensa doctor --json\n  expensa config\n  expensa evaluate demos/travel_scenario.json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Explicit config file (defaults to expensa.toml or config/expensa.toml)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, notification channel, and database connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Submit a scenario's draft expense against in-memory collaborators")]
    Evaluate {
        #[arg(help = "Scenario JSON with policy, users, history, expense and optional decisions")]
        scenario: PathBuf,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config,
        ..LoadOptions::default()
    };

    // Commands report config failures themselves; logging just stays off in that case.
    if let Ok(config) = AppConfig::load(options.clone()) {
        if let Err(error) = logging::init(&config.logging) {
            eprintln!("{error:#}");
        }
    }

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(&options),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(&options, json) }
        }
        Command::Evaluate { scenario } => commands::evaluate::run(&options, &scenario),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
