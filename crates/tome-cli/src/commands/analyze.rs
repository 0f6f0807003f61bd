//! Analysis sync command handler

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use tome_core::sync::AnalysisResult;
use tome_core::{RecordStore, ResolutionStrategy, SyncService};

use crate::output::{Output, OutputFormat};

/// Read an analysis result from `file` and merge it into the book
pub fn run(
    store: &Arc<RecordStore>,
    book: &Path,
    file: &Path,
    resolve: Option<ResolutionStrategy>,
    output: &Output,
) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read analysis file: {:?}", file))?;
    let analysis: AnalysisResult = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse analysis file: {:?}", file))?;

    let sync = SyncService::new(store.clone());
    let mut result = sync.sync_analysis_result(book, &analysis);

    let mut resolved = 0;
    if let Some(strategy) = resolve {
        let mut open = Vec::new();
        for conflict in result.conflicts.drain(..) {
            match sync.resolve_conflict(book, &conflict, strategy) {
                Ok(true) => resolved += 1,
                Ok(false) => open.push(conflict),
                Err(e) => {
                    result
                        .errors
                        .push(format!("Conflict {} on {}: {}", conflict.id, conflict.field, e));
                    open.push(conflict);
                }
            }
        }
        result.conflicts = open;
    }

    match output.format {
        OutputFormat::Json => output.print_json(&result)?,
        OutputFormat::Quiet => {
            for conflict in &result.conflicts {
                println!("{}", conflict.id);
            }
        }
        OutputFormat::Human => {
            if result.success {
                output.success(&format!("Synced {} record(s)", result.synced_count));
            } else {
                println!("✗ Sync aborted after {} record(s)", result.synced_count);
            }
            if resolved > 0 {
                println!("Resolved {} conflict(s)", resolved);
            }
            output.print_conflicts(&result.conflicts);
        }
    }
    output.print_problems(&result.errors, &[]);

    if !result.success {
        anyhow::bail!("Analysis sync failed for {}", book.display());
    }
    Ok(())
}
