//! Mark command handlers

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use tome_core::{MarkingService, RecordStore};

use crate::output::Output;

/// List a book's marks, optionally filtered by type
pub fn list(
    store: &Arc<RecordStore>,
    book: &Path,
    mark_type: Option<String>,
    output: &Output,
) -> Result<()> {
    let service = MarkingService::new(store.clone());
    let marks = match mark_type {
        Some(ref t) => service.list_marks_by_type(book, t)?,
        None => service.list_marks(book)?,
    };

    output.print_marks(&marks)
}
