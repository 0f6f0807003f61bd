//! Canvas command handler

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use tome_core::sync::CanvasType;
use tome_core::{RecordStore, SyncService};

use crate::output::{Output, OutputFormat};

/// Regenerate a book's canvas from its records
pub fn sync(store: &Arc<RecordStore>, book: &Path, canvas_type: CanvasType, output: &Output) -> Result<()> {
    let result = SyncService::new(store.clone()).sync_database_to_canvas(book, canvas_type);

    match output.format {
        OutputFormat::Json => output.print_json(&result)?,
        OutputFormat::Quiet => println!("{}", result.path.display()),
        OutputFormat::Human => {
            if result.success {
                output.success(&format!(
                    "Wrote {} canvas: {} node(s), {} edge(s)",
                    canvas_type, result.node_count, result.edge_count
                ));
                println!("  Path:      {}", result.path.display());
                println!("  Preserved: {} position(s)", result.preserved_positions);
            }
        }
    }
    output.print_problems(&result.errors, &[]);

    if !result.success {
        bail!("Canvas sync failed for {}", book.display());
    }
    Ok(())
}
