pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "aureus",
    about = "Aureus governance operator CLI",
    long_about = "Inspect governance configuration, evaluate action contexts against policy, verify evidence bundles, and run smoke validation.",
    after_help = "Examples:\n  aureus doctor --json\n  aureus evaluate context.json\n  aureus verify bundle.json\n  aureus smoke"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, signing key readiness, and DB connectivity checks")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Evaluate an action context JSON file against the security policy set")]
    Evaluate {
        #[arg(help = "Path to an action context JSON document")]
        context: PathBuf,
    },
    #[command(about = "Verify the hash and signature of an evidence bundle JSON file")]
    Verify {
        #[arg(help = "Path to an evidence bundle JSON document")]
        bundle: PathBuf,
    },
    #[command(about = "Run an end-to-end governance scenario with per-check timing details")]
    Smoke {
        #[arg(long, help = "Directory for exported evidence (defaults to evidence.output_dir)")]
        output_dir: Option<PathBuf>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Evaluate { context } => commands::evaluate::run(&context),
        Command::Verify { bundle } => commands::verify::run(&bundle),
        Command::Smoke { output_dir } => commands::smoke::run(output_dir),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
