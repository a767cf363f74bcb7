//! Spool CLI - Main entry point

use clap::Parser;
use spool_cli::{Cli, CliError, Commands};
use spool_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .output(LogOutput::Console)
        .log_file_prefix("spool")
        .filter_directives("sqlx=warn")
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env_or(log_config.clone()).unwrap_or(log_config);

    // The CLI works without logging
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(&cli).await {
        match &e {
            // Summary already printed; the status says it all
            CliError::Unsuccessful { .. } => eprintln!("{}", e),
            _ => {
                error!(error = %e, "Command failed");
                eprintln!("Error: {}", e);
            },
        }
        process::exit(e.exit_code());
    }
}

async fn execute_command(cli: &Cli) -> spool_cli::Result<()> {
    let database_url = cli.database_url.as_deref();

    match &cli.command {
        Commands::Migrate => spool_cli::commands::migrate::run(database_url).await,
        Commands::Import(args) => spool_cli::commands::import::run(database_url, args).await,
        Commands::Status { execution_id } => {
            spool_cli::commands::status::run(database_url, *execution_id).await
        },
        Commands::List { job_name } => {
            spool_cli::commands::list::run(database_url, job_name).await
        },
        Commands::Abandon {
            execution_id,
            reason,
        } => spool_cli::commands::abandon::run(database_url, *execution_id, reason.as_deref()).await,
    }
}
