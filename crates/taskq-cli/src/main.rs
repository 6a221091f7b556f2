//! taskq CLI - queue inspection and maintenance over the management API
//!
//! # Usage
//!
//! ```bash
//! # List registered queues
//! taskq list
//!
//! # Process a queue right now, bypassing the scheduler
//! taskq process emails
//!
//! # Inspect and clear the processing lock
//! taskq is-locked emails
//! taskq unlock emails
//!
//! # Failed-queue maintenance
//! taskq retry-failed emails
//! taskq delete-failed emails --force
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;

mod client;
mod commands;

use client::ApiClient;
use commands::{count, failed, list, lock, process};

/// taskq - deferred task queue management
#[derive(Parser)]
#[command(
    name = "taskq",
    version,
    about = "taskq CLI - deferred task queue management",
    long_about = "Inspect and maintain taskq queues over the management API.\n\n\
                  The server URL comes from --url or TASKQ_URL; the shared\n\
                  secret comes from TASKQ_SECRET."
)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Base URL of the taskq server
    #[arg(
        long,
        env = "TASKQ_URL",
        default_value = "http://127.0.0.1:8080",
        global = true
    )]
    url: String,

    /// Shared secret for the management API
    #[arg(long, env = "TASKQ_SECRET", hide_env_values = true, global = true)]
    secret: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered queues and their state
    #[command(name = "list")]
    List(list::ListArgs),

    /// Run one processing pass for a queue right now
    #[command(name = "process")]
    Process(process::ProcessArgs),

    /// Show whether a queue's processing lock is held
    #[command(name = "is-locked")]
    IsLocked(lock::IsLockedArgs),

    /// Clear a queue's processing lock
    #[command(name = "unlock")]
    Unlock(lock::UnlockArgs),

    /// Show the number of tasks in a queue
    #[command(name = "count")]
    Count(count::CountArgs),

    /// Move tasks from the failed sibling back into the queue
    #[command(name = "retry-failed")]
    RetryFailed(failed::RetryFailedArgs),

    /// Delete tasks from the failed sibling
    #[command(name = "delete-failed")]
    DeleteFailed(failed::DeleteFailedArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(err) = run(cli).await {
        print_error(&format!("{err:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let client = ApiClient::new(&cli.url, cli.secret.as_deref())?;

    match cli.command {
        Commands::List(args) => list::run(&client, args).await,
        Commands::Process(args) => process::run(&client, args).await,
        Commands::IsLocked(args) => lock::is_locked(&client, args).await,
        Commands::Unlock(args) => lock::unlock(&client, args).await,
        Commands::Count(args) => count::run(&client, args).await,
        Commands::RetryFailed(args) => failed::retry(&client, args).await,
        Commands::DeleteFailed(args) => failed::delete(&client, args).await,
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();
}

/// Print a success message with a checkmark
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

/// Print an error message with an X
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg);
}

/// Print a warning message
pub fn print_warning(msg: &str) {
    println!("{} {}", "⚠".yellow().bold(), msg);
}
