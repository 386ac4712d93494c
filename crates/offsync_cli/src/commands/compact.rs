//! Compact command implementation.

use super::{CliResult, Session};

/// Rewrites the store log as a single snapshot and prints the sizes.
pub fn run(session: &Session) -> CliResult<()> {
    let report = session.store().compact()?;
    let saved = report.bytes_before.saturating_sub(report.bytes_after);

    println!("Compaction complete");
    println!("  Size before: {} bytes", report.bytes_before);
    println!("  Size after:  {} bytes", report.bytes_after);
    println!(
        "  Space saved: {} bytes ({:.1}%)",
        saved,
        if report.bytes_before > 0 {
            (saved as f64 / report.bytes_before as f64) * 100.0
        } else {
            0.0
        }
    );
    Ok(())
}
