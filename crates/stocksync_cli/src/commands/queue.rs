//! Queue commands.
//!
//! Nothing is delivering while the CLI holds the directory lock, so every
//! pending mutation can be removed, including one left at the head by an
//! interrupted drain.

use super::{CliError, CliResult, DataDir};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stocksync_core::{MutationQueue, Record};
use uuid::Uuid;

/// One pending mutation.
#[derive(Debug, Serialize)]
pub struct QueueEntry {
    /// Position in delivery order, from 0.
    pub position: usize,
    /// Mutation id.
    pub id: Uuid,
    /// Record key, if the record has one.
    pub key: Option<String>,
    /// Scope id stamped at enqueue time.
    pub scope_id: Option<String>,
    /// Enqueue time in epoch milliseconds.
    pub enqueued_at_ms: u64,
    /// Record as it will be sent.
    pub record: Record,
}

fn open_queue(path: &Path, domain: &str) -> CliResult<(DataDir, MutationQueue)> {
    let data = DataDir::open(path)?;
    data.schema(domain)?;
    let queue = MutationQueue::open(Arc::clone(&data.kv), domain)?;
    Ok((data, queue))
}

/// Collects pending mutations in delivery order.
pub fn entries(path: &Path, domain: &str, limit: Option<usize>) -> CliResult<Vec<QueueEntry>> {
    let (data, queue) = open_queue(path, domain)?;
    let key_path = &data.schema(domain)?.key_path;

    Ok(queue
        .snapshot()
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(position, m)| QueueEntry {
            position,
            id: m.id(),
            key: m.record().key_for(key_path),
            scope_id: m.scope_id().map(str::to_string),
            enqueued_at_ms: m.enqueued_at_ms(),
            record: m.record().clone(),
        })
        .collect())
}

/// Runs `queue list`.
pub fn list(path: &Path, domain: &str, limit: Option<usize>, format: Format) -> CliResult<()> {
    let pending = entries(path, domain, limit)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&pending)?),
        Format::Text => {
            if pending.is_empty() {
                println!("No pending mutations in {domain}.");
            }
            for entry in &pending {
                println!(
                    "{:>4}  {}  key={}  scope={}  at={}",
                    entry.position,
                    entry.id,
                    entry.key.as_deref().unwrap_or("-"),
                    entry.scope_id.as_deref().unwrap_or("-"),
                    entry.enqueued_at_ms,
                );
            }
        }
    }
    Ok(())
}

/// Removes one mutation by id.
pub fn remove_mutation(path: &Path, domain: &str, id: &str) -> CliResult<()> {
    let parsed = Uuid::parse_str(id).map_err(|e| CliError::InvalidId {
        id: id.to_string(),
        reason: e.to_string(),
    })?;
    let (_data, mut queue) = open_queue(path, domain)?;
    if queue.remove_by_id(parsed)? {
        Ok(())
    } else {
        Err(CliError::MutationNotFound {
            domain: domain.to_string(),
            id: id.to_string(),
        })
    }
}

/// Runs `queue remove`.
pub fn remove(path: &Path, domain: &str, id: &str) -> CliResult<()> {
    remove_mutation(path, domain, id)?;
    println!("Removed {id} from {domain}.");
    Ok(())
}

/// Drops every pending mutation. Returns how many were removed.
pub fn clear_queue(path: &Path, domain: &str) -> CliResult<usize> {
    let (_data, mut queue) = open_queue(path, domain)?;
    Ok(queue.clear()?)
}

/// Runs `queue clear`.
pub fn clear(path: &Path, domain: &str) -> CliResult<()> {
    let removed = clear_queue(path, domain)?;
    println!("Removed {removed} pending mutation(s) from {domain}.");
    Ok(())
}
