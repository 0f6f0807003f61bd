//! Table file codec
//!
//! A table file is one header block describing the table followed by one
//! header block per record:
//!
//! ```text
//! ---
//! table: characters
//! bookId: night-harbor-1a2b3c4d
//! recordCount: 2
//! updatedAt: 2026-01-04T10:00:00Z
//! ---
//!
//! ## Mira
//!
//! ---
//! characterId: 6f1c...
//! name: Mira
//! ...
//! ---
//! ```
//!
//! The `## name` headings are for humans; lines outside blocks are ignored
//! when reading. Every write rewrites the whole file.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::frontmatter::{is_delimiter, parse_header, render_block};

/// A record type that lives in a table file
pub trait TableRecord: Serialize + DeserializeOwned + Clone {
    /// Table name written into the table header
    const TABLE: &'static str;

    /// Stable record id
    fn record_id(&self) -> &str;

    /// Name shown in the heading above the record block
    fn display_name(&self) -> &str;
}

/// Header block at the top of a table file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TableHeader {
    pub table: String,
    pub book_id: String,
    #[serde(default)]
    pub record_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// Errors from decoding a table file
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("block {index}: {source}")]
    Block {
        index: usize,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unterminated block starting at line {line}")]
    Unterminated { line: usize },

    #[error("expected table '{expected}', found '{found}'")]
    WrongTable { expected: String, found: String },
}

/// Encode a table file
pub fn encode_table<T: TableRecord>(book_id: &str, records: &[T]) -> Result<String, serde_yaml::Error> {
    let header = TableHeader {
        table: T::TABLE.to_string(),
        book_id: book_id.to_string(),
        record_count: records.len(),
        updated_at: Utc::now(),
    };

    let mut out = render_block(&header)?;
    for record in records {
        out.push('\n');
        out.push_str("## ");
        out.push_str(&heading_text(record.display_name()));
        out.push_str("\n\n");
        out.push_str(&render_block(record)?);
    }
    Ok(out)
}

/// Decode a table file into its header and records
pub fn decode_table<T: TableRecord>(text: &str) -> Result<(Option<TableHeader>, Vec<T>), TableError> {
    let blocks = collect_blocks(text)?;
    let mut header = None;
    let mut records = Vec::with_capacity(blocks.len());

    for (index, block) in blocks.iter().enumerate() {
        if index == 0 && block_is_table_header(block) {
            let parsed: TableHeader =
                parse_header(block).map_err(|source| TableError::Block { index, source })?;
            if parsed.table != T::TABLE {
                return Err(TableError::WrongTable {
                    expected: T::TABLE.to_string(),
                    found: parsed.table,
                });
            }
            header = Some(parsed);
            continue;
        }

        let record: T =
            parse_header(block).map_err(|source| TableError::Block { index, source })?;
        records.push(record);
    }

    Ok((header, records))
}

/// Split a file into the YAML text of each `---` delimited block
fn collect_blocks(text: &str) -> Result<Vec<String>, TableError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut blocks = Vec::new();
    let mut current: Option<(usize, String)> = None;

    for (line_no, line) in text.split_inclusive('\n').enumerate() {
        if is_delimiter(line) {
            match current.take() {
                Some((_, yaml)) => blocks.push(yaml),
                None => current = Some((line_no + 1, String::new())),
            }
        } else if let Some((_, ref mut yaml)) = current {
            yaml.push_str(line);
        }
    }

    if let Some((line, _)) = current {
        return Err(TableError::Unterminated { line });
    }
    Ok(blocks)
}

fn block_is_table_header(yaml: &str) -> bool {
    yaml.lines().any(|line| line.starts_with("table:"))
}

fn heading_text(name: &str) -> String {
    let single_line = name.lines().next().unwrap_or("").trim();
    if single_line.is_empty() {
        "(unnamed)".to_string()
    } else {
        single_line.to_string()
    }
}
