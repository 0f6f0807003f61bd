//! Migration command handlers

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Result};

use tome_core::{MigrationService, RecordStore};

use crate::output::{Output, OutputFormat};

/// Migrate one book, or only report whether it needs migrating
pub fn book(store: &Arc<RecordStore>, book: &Path, check: bool, output: &Output) -> Result<()> {
    let migration = MigrationService::new(store.clone());

    if check {
        let needed = migration.needs_migration(book);
        match output.format {
            OutputFormat::Json => println!("{}", serde_json::json!({ "needs_migration": needed })),
            OutputFormat::Quiet => println!("{}", needed),
            OutputFormat::Human => {
                if needed {
                    println!("{} has legacy data to migrate.", book.display());
                } else {
                    println!("{} is up to date.", book.display());
                }
            }
        }
        return Ok(());
    }

    let result = migration.migrate_from_legacy(book);

    match output.format {
        OutputFormat::Json => output.print_json(&result)?,
        OutputFormat::Quiet => println!("{}", result.migrated_count),
        OutputFormat::Human => {
            if result.success {
                output.success(&format!(
                    "Migrated {} record(s), skipped {}",
                    result.migrated_count, result.skipped_count
                ));
            } else {
                println!(
                    "✗ Migration incomplete: {} migrated, {} skipped, {} error(s)",
                    result.migrated_count,
                    result.skipped_count,
                    result.errors.len()
                );
            }
        }
    }
    output.print_problems(&result.errors, &result.warnings);

    if !result.success {
        bail!("Migration failed for {}", book.display());
    }
    Ok(())
}

/// Migrate every book under `library`
pub fn all(store: &Arc<RecordStore>, library: &Path, output: &Output) -> Result<()> {
    let batch = MigrationService::new(store.clone()).migrate_all_books(library);

    match output.format {
        OutputFormat::Json => output.print_json(&batch)?,
        OutputFormat::Quiet => {
            for (path, result) in &batch.results {
                if !result.success {
                    println!("{}", path.display());
                }
            }
        }
        OutputFormat::Human => {
            if batch.results.is_empty() {
                println!("No books found under {}.", library.display());
                return Ok(());
            }
            for (path, result) in &batch.results {
                let mark = if result.success { "✓" } else { "✗" };
                println!(
                    "{} {} | {} migrated, {} skipped",
                    mark,
                    path.display(),
                    result.migrated_count,
                    result.skipped_count
                );
                for error in &result.errors {
                    println!("    {}", error);
                }
            }
            println!();
            println!(
                "{} book(s) migrated, {} failed",
                batch.successful_books, batch.failed_books
            );
        }
    }

    if batch.failed_books > 0 {
        bail!("{} book(s) failed to migrate", batch.failed_books);
    }
    Ok(())
}
