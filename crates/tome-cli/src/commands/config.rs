//! Config command handlers

use std::path::PathBuf;

use anyhow::Result;

use tome_core::Config;

use crate::output::{Output, OutputFormat};

/// Show the effective configuration
pub fn show(config: &Config, config_path: Option<&PathBuf>, output: &Output) -> Result<()> {
    match output.format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::json!({
                    "db_dir": config.db_dir,
                    "canvas_dir": config.canvas_dir,
                    "chapters_dir": config.chapters_dir,
                    "chapter_extensions": config.chapter_extensions,
                    "legacy_marks_dir": config.legacy_marks_dir,
                    "legacy_materials_file": config.legacy_materials_file,
                    "book_marker_files": config.book_marker_files,
                    "log_file": config.log_file
                })
            );
        }
        OutputFormat::Quiet => {
            println!("{}", config.db_dir);
        }
        OutputFormat::Human => {
            let effective_path = config_path
                .cloned()
                .unwrap_or_else(Config::config_file_path);
            println!("Configuration:");
            println!("  db_dir:                {}", config.db_dir);
            println!("  canvas_dir:            {}", config.canvas_dir);
            println!("  chapters_dir:          {}", config.chapters_dir);
            println!("  chapter_extensions:    {}", config.chapter_extensions.join(", "));
            println!("  legacy_marks_dir:      {}", config.legacy_marks_dir.display());
            println!(
                "  legacy_materials_file: {}",
                config.legacy_materials_file.display()
            );
            println!("  book_marker_files:     {}", config.book_marker_files.join(", "));
            println!(
                "  log_file:              {}",
                config
                    .log_file
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(not set)".to_string())
            );
            println!();
            println!("Config file: {}", effective_path.display());
        }
    }

    Ok(())
}
