//! Inspect command implementation.

use super::{CliError, CliResult, Session};
use offsync_protocol::IntentKind;
use offsync_store::{LocalStore, StatsSnapshot};
use serde::Serialize;

/// Store inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Store directory.
    pub path: String,
    /// Schema version.
    pub schema_version: u64,
    /// Partitions and their indexes.
    pub partitions: Vec<PartitionInfo>,
    /// Queued creates.
    pub pending_creates: usize,
    /// Queued updates.
    pub pending_updates: usize,
    /// Queued deletes.
    pub pending_deletes: usize,
    /// Counters and sizes.
    pub stats: StatsSnapshot,
}

/// One partition of the store schema.
#[derive(Debug, Serialize)]
pub struct PartitionInfo {
    /// Partition name.
    pub name: String,
    /// Index names.
    pub indexes: Vec<String>,
}

/// Runs the inspect command.
pub fn run(session: &Session, format: &str) -> CliResult<()> {
    let result = collect(session.store())?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "text" => print_text_output(&result),
        other => return Err(CliError::Usage(format!("unknown format: {other}"))),
    }
    Ok(())
}

/// Gathers schema, queue and statistics of a store.
pub fn collect(store: &LocalStore) -> CliResult<InspectResult> {
    let partitions = store
        .partitions()
        .into_iter()
        .map(|name| PartitionInfo {
            indexes: store.indexes(&name),
            name,
        })
        .collect();

    let intents = store.intents();
    let count = |kind: IntentKind| intents.iter().filter(|i| i.kind == kind).count();

    Ok(InspectResult {
        path: store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<memory>".to_string()),
        schema_version: store.schema_version(),
        partitions,
        pending_creates: count(IntentKind::Create),
        pending_updates: count(IntentKind::Update),
        pending_deletes: count(IntentKind::Delete),
        stats: store.stats()?,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("Store: {}", result.path);
    println!("Schema version: {}", result.schema_version);
    println!();
    println!("Partitions:");
    for partition in &result.partitions {
        if partition.indexes.is_empty() {
            println!("  {}", partition.name);
        } else {
            println!("  {} (indexes: {})", partition.name, partition.indexes.join(", "));
        }
    }
    println!();
    println!("Records:   {}", result.stats.records);
    println!("Unsynced:  {}", result.stats.unsynced);
    println!(
        "Queue:     {} create, {} update, {} delete",
        result.pending_creates, result.pending_updates, result.pending_deletes
    );
    println!();
    println!("Log size:  {} bytes", result.stats.log_bytes);
    println!("Commits:   {}", result.stats.commits);
    println!("Compactions: {}", result.stats.compactions);
    if result.stats.recovered_bytes > 0 {
        println!("Recovered: {} torn bytes truncated on open", result.stats.recovered_bytes);
    }
}
