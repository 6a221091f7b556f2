//! Failed-queue maintenance - retry or delete tasks in `<queue>_failed`

use anyhow::Result;
use clap::Args;

use crate::client::ApiClient;
use crate::{print_success, print_warning};

#[derive(Args)]
pub struct RetryFailedArgs {
    /// Queue whose failed sibling to drain back
    queue: String,
}

#[derive(Args)]
pub struct DeleteFailedArgs {
    /// Queue whose failed sibling to clear
    queue: String,

    /// Delete tasks even when they still belong to other queues
    #[arg(long)]
    force: bool,
}

pub async fn retry(client: &ApiClient, args: RetryFailedArgs) -> Result<()> {
    let body = client
        .post(&format!("/taskq/v1/queue/{}/retry-failed", args.queue))
        .await?;

    let moved = body["moved"].as_u64().unwrap_or(0);
    if moved == 0 {
        print_warning(&format!("no failed tasks for '{}'", args.queue));
    } else {
        print_success(&format!(
            "moved {moved} task{} back into '{}'",
            if moved == 1 { "" } else { "s" },
            args.queue
        ));
    }
    Ok(())
}

pub async fn delete(client: &ApiClient, args: DeleteFailedArgs) -> Result<()> {
    let mut path = format!("/taskq/v1/queue/{}/failed", args.queue);
    if args.force {
        path.push_str("?force=true");
    }
    let body = client.delete(&path).await?;

    let deleted = body["deleted"].as_u64().unwrap_or(0);
    print_success(&format!(
        "deleted {deleted} failed task{} for '{}'",
        if deleted == 1 { "" } else { "s" },
        args.queue
    ));
    Ok(())
}
