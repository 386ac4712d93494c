//! Todo list commands.

use super::{CliResult, Session};
use offsync_protocol::{Record, RecordId};
use offsync_sync_engine::{MutationOutcome, SyncError};

/// Prints the todo list, newest first.
pub async fn list(session: &Session) -> CliResult<()> {
    let todos = session.client.todos().await?;
    if todos.is_empty() {
        println!("No todos");
        return Ok(());
    }
    for record in &todos {
        println!("{}", format_record(record));
    }
    let pending = todos.iter().filter(|r| r.is_pending()).count();
    if pending > 0 {
        println!();
        println!("{pending} pending sync");
    }
    Ok(())
}

/// Adds a todo.
pub async fn add(session: &Session, title: String) -> CliResult<()> {
    let outcome = session.client.add(title).await;
    report("Added", outcome)
}

/// Flips the completed flag of a todo.
pub async fn toggle(session: &Session, id: &str) -> CliResult<()> {
    let outcome = session.client.toggle(&RecordId::new(id)).await;
    report("Updated", outcome)
}

/// Renames a todo.
pub async fn rename(session: &Session, id: &str, title: String) -> CliResult<()> {
    let outcome = session.client.rename(&RecordId::new(id), title).await;
    report("Renamed", outcome)
}

/// Deletes a todo.
pub async fn remove(session: &Session, id: &str) -> CliResult<()> {
    let id = RecordId::new(id);
    match session.client.remove(&id).await {
        Ok(MutationOutcome::Confirmed(())) => println!("Deleted {id}"),
        Ok(MutationOutcome::Pending(())) => println!("Deleted {id} (pending sync)"),
        Err(e) if e.is_not_found() => println!("{id} was already deleted"),
        Err(e) => return Err(failed(e)),
    }
    Ok(())
}

/// Prints changes waiting for a sync pass.
pub fn pending(session: &Session) {
    let records = session.client.pending();
    let deletes = session.client.pending_deletes();
    if records.is_empty() && deletes.is_empty() {
        println!("Nothing to sync");
        return;
    }
    for record in &records {
        let action = if record.local_only { "create" } else { "update" };
        println!("{action:<7} {}", format_record(record));
    }
    for intent in &deletes {
        println!("{:<7} {}", "delete", intent.local_id);
    }
}

fn report(verb: &str, outcome: Result<MutationOutcome<Record>, SyncError>) -> CliResult<()> {
    match outcome {
        Ok(MutationOutcome::Confirmed(record)) => {
            println!("{verb} {}", format_record(&record));
            Ok(())
        }
        Ok(MutationOutcome::Pending(record)) => {
            println!("{verb} {} (pending sync)", format_record(&record));
            Ok(())
        }
        Err(e) => Err(failed(e)),
    }
}

fn failed(error: SyncError) -> super::CliError {
    if error.is_retryable() {
        eprintln!("The change was not saved. Retry, or run `offsync sync` once the server is reachable.");
    }
    error.into()
}

/// One line per record: checkbox, id, title and a pending marker.
pub fn format_record(record: &Record) -> String {
    let check = if record.completed { "[x]" } else { "[ ]" };
    let marker = if record.is_pending() { " *" } else { "" };
    format!("{check} {:<12} {}{marker}", record.id.as_str(), record.title)
}
