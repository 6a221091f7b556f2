//! Count command - number of tasks currently in a queue

use anyhow::Result;
use clap::Args;
use colored::Colorize;

use crate::client::ApiClient;

#[derive(Args)]
pub struct CountArgs {
    /// Queue to count
    queue: String,

    /// Print only the number (for scripts)
    #[arg(long)]
    porcelain: bool,
}

pub async fn run(client: &ApiClient, args: CountArgs) -> Result<()> {
    let body = client
        .get(&format!("/taskq/v1/queue/{}/count", args.queue))
        .await?;
    let count = body["count"].as_u64().unwrap_or(0);

    if args.porcelain {
        println!("{count}");
    } else {
        println!(
            "{} has {} task{}",
            args.queue.bold(),
            count.to_string().cyan(),
            if count == 1 { "" } else { "s" }
        );
    }
    Ok(())
}
