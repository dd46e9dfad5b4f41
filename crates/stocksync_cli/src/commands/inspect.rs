//! Inspect command implementation.

use super::{CliResult, DataDir};
use crate::Format;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stocksync_core::{now_ms, MutationQueue};

/// Data directory inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Directory path.
    pub path: String,
    /// One entry per stored schema.
    pub domains: Vec<DomainSummary>,
}

/// Summary of one domain.
#[derive(Debug, Serialize)]
pub struct DomainSummary {
    /// Domain name.
    pub name: String,
    /// Stored schema version.
    pub version: u32,
    /// Key attribute.
    pub key_path: String,
    /// Indexed attributes.
    pub indices: Vec<String>,
    /// Number of records.
    pub records: usize,
    /// Number of pending mutations.
    pub pending: usize,
    /// Age of the oldest pending mutation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oldest_pending_ms: Option<u64>,
}

/// Collects the inspection result.
pub fn collect(path: &Path) -> CliResult<InspectResult> {
    let data = DataDir::open(path)?;
    let mut domains = Vec::with_capacity(data.schemas.len());

    for schema in &data.schemas {
        data.open_domain(&schema.name)?;
        let stats = MutationQueue::open(Arc::clone(&data.kv), schema.name.clone())?.stats();
        domains.push(DomainSummary {
            name: schema.name.clone(),
            version: schema.version,
            key_path: schema.key_path.clone(),
            indices: schema.indices.clone(),
            records: data.store.count(&schema.name)?,
            pending: stats.len,
            oldest_pending_ms: stats
                .oldest_enqueued_at_ms
                .map(|at| now_ms().saturating_sub(at)),
        });
    }

    Ok(InspectResult {
        path: path.display().to_string(),
        domains,
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, format: Format) -> CliResult<()> {
    let result = collect(path)?;
    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        Format::Text => print_text_output(&result),
    }
    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("stocksync Data Directory");
    println!("========================");
    println!();
    println!("Path: {}", result.path);

    if result.domains.is_empty() {
        println!();
        println!("No domains.");
        return;
    }

    for domain in &result.domains {
        println!();
        println!("{} (v{}, key: {})", domain.name, domain.version, domain.key_path);
        if !domain.indices.is_empty() {
            println!("  Indices: {}", domain.indices.join(", "));
        }
        println!("  Records: {}", domain.records);
        match domain.oldest_pending_ms {
            Some(age) => println!(
                "  Pending: {} (oldest {})",
                domain.pending,
                format_age(age)
            ),
            None => println!("  Pending: {}", domain.pending),
        }
    }
}

fn format_age(ms: u64) -> String {
    let secs = ms / 1000;
    if secs < 60 {
        format!("{secs}s ago")
    } else if secs < 3600 {
        format!("{}m ago", secs / 60)
    } else if secs < 86_400 {
        format!("{}h ago", secs / 3600)
    } else {
        format!("{}d ago", secs / 86_400)
    }
}
