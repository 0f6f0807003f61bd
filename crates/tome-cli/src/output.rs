//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use serde::Serialize;

use tome_core::sync::Conflict;
use tome_core::{ChapterFrontmatter, UnifiedMark};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Check if output is in quiet mode
    pub fn is_quiet(&self) -> bool {
        matches!(self.format, OutputFormat::Quiet)
    }

    pub fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Print any serializable value as pretty JSON
    pub fn print_json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print a book's chapter list
    pub fn print_chapters(&self, chapters: &[ChapterFrontmatter]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if chapters.is_empty() {
                    println!("No chapters found.");
                    return Ok(());
                }
                for chapter in chapters {
                    let summary = if chapter.ai_summary.is_some() { " *" } else { "" };
                    println!(
                        "{:>4} | {}{} | {} words",
                        chapter.chapter_num,
                        truncate(&chapter.title, 40),
                        summary,
                        chapter.word_count
                    );
                }
                println!("\n{} chapter(s)", chapters.len());
            }
            OutputFormat::Json => self.print_json(chapters)?,
            OutputFormat::Quiet => {
                for chapter in chapters {
                    println!("{}", chapter.file_path.display());
                }
            }
        }
        Ok(())
    }

    /// Print a list of marks
    pub fn print_marks(&self, marks: &[UnifiedMark]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if marks.is_empty() {
                    println!("No marks found.");
                    return Ok(());
                }
                for mark in marks {
                    let range = mark.chapter_range();
                    println!(
                        "{} | {:<10} | {} | ch {}-{}",
                        short_id(&mark.id),
                        mark.mark_type,
                        truncate(&mark.name, 35),
                        range.start,
                        range.end
                    );
                }
                println!("\n{} mark(s)", marks.len());
            }
            OutputFormat::Json => self.print_json(marks)?,
            OutputFormat::Quiet => {
                for mark in marks {
                    println!("{}", mark.id);
                }
            }
        }
        Ok(())
    }

    /// Print conflicts left by a sync run
    pub fn print_conflicts(&self, conflicts: &[Conflict]) {
        if self.format != OutputFormat::Human || conflicts.is_empty() {
            return;
        }
        println!();
        println!("── Conflicts ({}) ──", conflicts.len());
        for conflict in conflicts {
            println!(
                "{} {:?} {}",
                short_id(&conflict.record_id),
                conflict.conflict_type,
                conflict.field
            );
            println!("  existing: {}", truncate_line(&value_text(&conflict.existing_value), 60));
            println!("  incoming: {}", truncate_line(&value_text(&conflict.incoming_value), 60));
        }
    }

    /// Print per-item errors and warnings to stderr
    pub fn print_problems(&self, errors: &[String], warnings: &[String]) {
        if self.is_quiet() {
            return;
        }
        for warning in warnings {
            eprintln!("⚠ {}", warning);
        }
        for error in errors {
            eprintln!("✗ {}", error);
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

/// Truncate a string to max characters, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Truncate to first line and max length
fn truncate_line(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or("");
    truncate(first_line, max_len)
}

/// First 8 characters of an id
fn short_id(id: &str) -> String {
    id.chars().take(8).collect()
}

fn value_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        // Counts characters, not bytes
        assert_eq!(truncate("夜港夜港夜港", 5), "夜港...");
    }

    #[test]
    fn test_truncate_line() {
        assert_eq!(truncate_line("single line", 20), "single line");
        assert_eq!(truncate_line("line one\nline two", 20), "line one");
    }

    #[test]
    fn test_short_id_and_value_text() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(value_text(&json!("plain")), "plain");
        assert_eq!(value_text(&json!(["a"])), "[\"a\"]");
    }
}
