//! Chapter command handlers

use std::path::Path;

use anyhow::{Context, Result};

use tome_core::RecordStore;

use crate::output::{Output, OutputFormat};

/// List chapters, optionally injecting id headers first
pub fn list(store: &RecordStore, book: &Path, inject: bool, output: &Output) -> Result<()> {
    if inject {
        let book_id = store
            .get_book_id(book)?
            .with_context(|| format!("Book not initialized: {}", book.display()))?;
        let injected = store.inject_chapter_frontmatters(book, &book_id)?;
        if output.format == OutputFormat::Human {
            output.success(&format!("Injected headers into {} chapter(s)", injected));
            println!();
        }
    }

    let chapters = store.get_chapters(book)?;
    output.print_chapters(&chapters)
}

/// Print the raw text of chapters `start..=end`
pub fn content(store: &RecordStore, book: &Path, start: u32, end: u32, output: &Output) -> Result<()> {
    let text = store.get_chapter_content(book, start, end)?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "start": start,
                    "end": end,
                    "content": text
                })
            );
        }
        OutputFormat::Human | OutputFormat::Quiet => println!("{}", text),
    }

    Ok(())
}
