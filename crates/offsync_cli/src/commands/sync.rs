//! Sync command implementation.

use super::{CliResult, Session};
use offsync_sync_engine::{SkipReason, SyncOutcome};

/// Runs one sync pass and prints its report.
pub async fn run(session: &Session) -> CliResult<()> {
    let outcome = session.client.sync_now().await;
    println!("{}", describe(&outcome));

    if let SyncOutcome::Completed(report) = &outcome {
        if !report.is_clean() {
            if let Some(error) = session.client.sync_manager().stats().last_error {
                eprintln!("Last error: {error}");
            }
            eprintln!("Failed changes stay queued; run `offsync sync` again to retry.");
        }
    }
    Ok(())
}

/// One-line summary of a sync outcome.
pub fn describe(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Completed(report) => format!(
            "Synced: {} created, {} updated, {} deleted, {} failed ({} ms)",
            report.created,
            report.updated,
            report.deleted,
            report.failed,
            report.duration.as_millis()
        ),
        SyncOutcome::Skipped(SkipReason::Offline) => {
            "Offline: pass --server URL (without --offline) to sync".to_string()
        }
        SyncOutcome::Skipped(SkipReason::AlreadyRunning) => {
            "A sync pass is already running".to_string()
        }
    }
}
