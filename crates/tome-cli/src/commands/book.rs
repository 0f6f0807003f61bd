//! Book command handlers

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use tome_core::{BookInfo, MigrationService, RecordStore};

use crate::output::{Output, OutputFormat};

/// Initialize (or patch) a book's database
pub fn init(
    store: &RecordStore,
    book: &Path,
    title: Option<String>,
    author: Option<String>,
    description: Option<String>,
    output: &Output,
) -> Result<()> {
    let info = BookInfo {
        title: title.unwrap_or_default(),
        author: author.unwrap_or_default(),
        description: description.unwrap_or_default(),
    };
    let was_initialized = store.is_database_initialized(book);

    let book_id = store
        .initialize_database(book, &info)
        .with_context(|| format!("Failed to initialize {}", book.display()))?;

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "book_id": book_id,
                    "is_new": !was_initialized
                })
            );
        }
        OutputFormat::Quiet => println!("{}", book_id),
        OutputFormat::Human => {
            if was_initialized {
                output.success(&format!("Book already initialized: {}", book_id));
            } else {
                output.success(&format!("Initialized book: {}", book_id));
            }
        }
    }

    Ok(())
}

/// Show a book's metadata and record counts
pub fn status(store: &Arc<RecordStore>, book: &Path, output: &Output) -> Result<()> {
    let Some(meta) = store.get_book_meta(book)? else {
        bail!(
            "Book not initialized: {}. Run `tome init {}` first.",
            book.display(),
            book.display()
        );
    };
    let characters = store.get_characters(book)?.len();
    let story_units = store.get_story_units(book)?.len();
    let events = store.get_events(book)?.len();
    let needs_migration = MigrationService::new(store.clone()).needs_migration(book);

    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "book": meta,
                    "counts": {
                        "characters": characters,
                        "story_units": story_units,
                        "events": events
                    },
                    "needs_migration": needs_migration
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", meta.book_id);
        }
        OutputFormat::Human => {
            println!("{}", meta.title);
            println!("{}", "=".repeat(meta.title.chars().count().max(3)));
            println!();
            println!("  ID:       {}", meta.book_id);
            if !meta.author.is_empty() {
                println!("  Author:   {}", meta.author);
            }
            println!("  Chapters: {}", meta.total_chapters);
            println!("  Words:    {}", meta.total_words);
            println!("  Updated:  {}", meta.updated_at.format("%Y-%m-%d %H:%M"));
            println!();
            println!("Records:");
            println!("  Characters:  {}", characters);
            println!("  Story units: {}", story_units);
            println!("  Events:      {}", events);
            if needs_migration {
                println!();
                println!("Legacy data found. Run `tome migrate {}`.", book.display());
            }
        }
    }

    Ok(())
}
