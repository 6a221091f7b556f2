//! Lock commands - inspect and clear per-queue processing locks

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::client::ApiClient;
use crate::print_success;

#[derive(Args)]
pub struct IsLockedArgs {
    /// Queue to inspect
    queue: String,
}

#[derive(Args)]
pub struct UnlockArgs {
    /// Queue to unlock
    queue: String,
}

pub async fn is_locked(client: &ApiClient, args: IsLockedArgs) -> Result<()> {
    let body = client
        .get(&format!("/taskq/v1/queue/{}/lock", args.queue))
        .await?;

    if body["locked"].as_bool().unwrap_or(false) {
        println!(
            "{} {} is {}",
            "🔒".yellow(),
            args.queue.bold(),
            "locked".yellow()
        );
    } else {
        println!(
            "{} {} is {}",
            "🔓".green(),
            args.queue.bold(),
            "unlocked".green()
        );
    }
    Ok(())
}

pub async fn unlock(client: &ApiClient, args: UnlockArgs) -> Result<()> {
    let body = client
        .delete(&format!("/taskq/v1/queue/{}/lock", args.queue))
        .await?;

    print_success(body["message"].as_str().unwrap_or("lock released"));
    Ok(())
}
