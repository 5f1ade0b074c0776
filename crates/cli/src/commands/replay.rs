//! `replay` command implementation.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat};
use contracts::ReadConfig;
use dispatcher::{DurableStore, RecordStream};
use tracing::info;

use crate::cli::{ReplayArgs, ReplayOutput};
use crate::plugin_api::parse_instant;

/// Execute the `replay` command
pub async fn run_replay(args: &ReplayArgs) -> Result<()> {
    let config = ReadConfig {
        since: parse_instant(args.since.as_deref()).context("Invalid --since")?,
        until: parse_instant(args.until.as_deref()).context("Invalid --until")?,
        tail: args.tail,
        follow: false,
    };

    let store = DurableStore::open_existing(&args.store_root, &args.container_id)
        .await
        .with_context(|| format!("No stored logs for container {}", args.container_id))?;
    info!(path = %store.path().display(), ?config, "Replaying stored logs");

    let records = store.read(config);
    let written = match args.output {
        ReplayOutput::Frames => session::write_replay(records, tokio::io::stdout())
            .await
            .context("Failed to write frames")?,
        ReplayOutput::Text => print_records(records).await?,
    };

    info!(records = written, "Replay finished");
    Ok(())
}

async fn print_records(mut records: RecordStream) -> Result<u64> {
    let mut count = 0;
    while let Some(record) = records.next().await {
        let record = record.context("Failed to read stored record")?;
        println!(
            "{} {} {}",
            format_timestamp(record.timestamp),
            record.source,
            record.line
        );
        count += 1;
    }
    Ok(count)
}

fn format_timestamp(nanos: i64) -> String {
    DateTime::from_timestamp_nanos(nanos).to_rfc3339_opts(SecondsFormat::Nanos, true)
}
