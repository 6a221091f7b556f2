//! List command - show registered queues and their state

use anyhow::Result;
use clap::{Args, ValueEnum};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Cell, Color, Table};
use serde::Deserialize;

use crate::client::ApiClient;

#[derive(Args)]
pub struct ListArgs {
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Deserialize)]
struct QueueInfo {
    name: String,
    throttle_secs: Option<u64>,
    minimum_count: u64,
    retry_limit: u32,
    bulk: bool,
    dispatch: String,
    count: u64,
}

pub async fn run(client: &ApiClient, args: ListArgs) -> Result<()> {
    let body = client.get("/taskq/v1/queues").await?;

    if matches!(args.format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    let queues: Vec<QueueInfo> = serde_json::from_value(body)?;
    if queues.is_empty() {
        crate::print_warning("no queues registered");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Queue").fg(Color::Cyan),
            Cell::new("Tasks").fg(Color::Cyan),
            Cell::new("Throttle").fg(Color::Cyan),
            Cell::new("Min count").fg(Color::Cyan),
            Cell::new("Retry limit").fg(Color::Cyan),
            Cell::new("Bulk").fg(Color::Cyan),
            Cell::new("Dispatch").fg(Color::Cyan),
        ]);

    for q in &queues {
        let throttle = q
            .throttle_secs
            .map(|s| format!("{s}s"))
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&q.name).fg(Color::Green),
            Cell::new(q.count),
            Cell::new(throttle),
            Cell::new(q.minimum_count),
            Cell::new(q.retry_limit),
            Cell::new(if q.bulk { "yes" } else { "no" }),
            Cell::new(&q.dispatch).fg(Color::Yellow),
        ]);
    }

    println!("{table}");
    println!();
    println!(
        "Process a queue now: {}",
        "taskq process <queue>".green()
    );

    Ok(())
}
