//! Header-block (frontmatter) codec
//!
//! A header block is an unindented `---` line, YAML mapping lines and a
//! closing `---` (or `...`) line at the top of a text file. Everything after
//! the closing line is the body and is preserved byte-for-byte when the
//! header is replaced.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Header delimiter line
pub const DELIMITER: &str = "---";

/// Whether a raw line (with or without its newline) is a block delimiter.
///
/// Indented `---` lines are YAML content, not delimiters.
pub fn is_delimiter(line: &str) -> bool {
    let trimmed = line.trim_end_matches(['\n', '\r']).trim_end();
    trimmed == DELIMITER
}

fn is_closing_delimiter(line: &str) -> bool {
    is_delimiter(line) || line.trim_end() == "..."
}

/// Split a document into its header YAML (if any) and its body.
///
/// Returns `(None, text)` unchanged when the text does not open with a
/// complete header block.
pub fn split_frontmatter(text: &str) -> (Option<&str>, &str) {
    let content = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut lines = content.split_inclusive('\n');

    let Some(first) = lines.next() else {
        return (None, text);
    };
    if !is_delimiter(first) {
        return (None, text);
    }

    let header_start = first.len();
    let mut offset = header_start;
    for line in lines {
        if is_closing_delimiter(line) {
            let header = &content[header_start..offset];
            let body = &content[offset + line.len()..];
            return (Some(header), body);
        }
        offset += line.len();
    }

    (None, text)
}

/// Deserialize a header block's YAML into `T`.
///
/// An empty header deserializes like an empty mapping.
pub fn parse_header<T: DeserializeOwned>(yaml: &str) -> Result<T, serde_yaml::Error> {
    if yaml.trim().is_empty() {
        serde_yaml::from_str("{}")
    } else {
        serde_yaml::from_str(yaml)
    }
}

/// Parse the header of a whole document, if it has one.
pub fn read_frontmatter<T: DeserializeOwned>(text: &str) -> Result<Option<T>, serde_yaml::Error> {
    match split_frontmatter(text) {
        (Some(yaml), _) => parse_header(yaml).map(Some),
        (None, _) => Ok(None),
    }
}

/// Serialize `header` as a YAML block.
pub fn render_block<T: Serialize>(header: &T) -> Result<String, serde_yaml::Error> {
    let yaml = serde_yaml::to_string(header)?;
    let mut out = String::with_capacity(yaml.len() + 8);
    out.push_str(DELIMITER);
    out.push('\n');
    out.push_str(&yaml);
    if !yaml.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(DELIMITER);
    out.push('\n');
    Ok(out)
}

/// Render a document: header block followed by `body`.
pub fn render_frontmatter<T: Serialize>(header: &T, body: &str) -> Result<String, serde_yaml::Error> {
    let mut out = render_block(header)?;
    out.push_str(body);
    Ok(out)
}

/// Replace (or insert) the header of `text`, keeping its body intact.
pub fn replace_frontmatter<T: Serialize>(text: &str, header: &T) -> Result<String, serde_yaml::Error> {
    let (_, body) = split_frontmatter(text);
    let body = body.strip_prefix('\u{feff}').unwrap_or(body);
    render_frontmatter(header, body)
}
