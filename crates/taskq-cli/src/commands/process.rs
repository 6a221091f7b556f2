//! Process command - run one pass for a queue, bypassing the scheduler

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::print_success;

#[derive(Args)]
pub struct ProcessArgs {
    /// Queue to process
    queue: String,
}

pub async fn run(client: &ApiClient, args: ProcessArgs) -> Result<()> {
    let body = client
        .post(&format!("/taskq/v1/queue/{}/process", args.queue))
        .await?;

    print_success(body["message"].as_str().unwrap_or("queue processed"));
    Ok(())
}
