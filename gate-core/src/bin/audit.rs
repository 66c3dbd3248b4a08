//! Ledger Audit Binary
//!
//! Verifies an exported ledger (JSON Lines, as served by `/ledger/export`)
//! and prints the control state and replay counter it reconstructs to.
//!
//! ```text
//! ledger-audit <export.jsonl>
//! ```

use anyhow::{bail, Context, Result};
use gate_core::state::reconstruct;
use gate_core::storage::verify_chain;
use gate_core::LedgerEntry;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    // Logs go to stderr so stdout stays machine readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: ledger-audit <export.jsonl>");
    };

    let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let entries = parse_export(&raw)?;
    info!(path = %path, entries = entries.len(), "Loaded ledger export");

    verify_chain(&entries).context("hash chain verification failed")?;
    let (state, last_applied) = reconstruct(&entries);

    let report = json!({
        "entries": entries.len(),
        "head": entries.last().map(|e| e.hash.clone()),
        "state": state,
        "last_applied_event_id": last_applied,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn parse_export(raw: &str) -> Result<Vec<LedgerEntry>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line).with_context(|| format!("line {} is not a ledger entry", n + 1))
        })
        .collect()
}
