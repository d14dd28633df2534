pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "autoxloo",
    about = "AutoXloo assistant operator CLI",
    long_about = "Apply migrations, inspect configuration, and check readiness of the AutoXloo \
                  dealership assistant.",
    after_help = "Examples:\n  autoxloo doctor --json\n  autoxloo config\n  autoxloo inventory"
)]
pub struct Cli {
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
    #[command(about = "Validate config, database connectivity, and the inventory file")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Load the inventory file and summarize it by category")]
    Inventory,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => commands::config::run(),
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Inventory => commands::inventory::run(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
