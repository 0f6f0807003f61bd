//! Book and chapter identity
//!
//! A book's id is derived from its vault path, so deriving it twice for the
//! same folder always yields the same id:
//!
//! ```text
//! Library/Night Harbor  ->  night-harbor-3f2a9c1e
//! ```
//!
//! The readable part is a slug of the folder name; the suffix is the first
//! 8 hex digits of a UUIDv5 over the normalized path.

use std::path::Path;

use uuid::Uuid;

/// Derive the stable book id for a book folder
pub fn derive_book_id(book_path: &Path) -> String {
    let normalized = normalize_path(book_path);
    let folder = book_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let hash = Uuid::new_v5(&Uuid::NAMESPACE_URL, normalized.as_bytes())
        .simple()
        .to_string();

    format!("{}-{}", slugify(&folder), &hash[..8])
}

/// Id of a chapter within a book
pub fn chapter_id(book_id: &str, chapter_num: u32) -> String {
    format!("{}-ch{:04}", book_id, chapter_num)
}

/// Turn a display name into a lowercase, dash-separated slug.
///
/// Unicode letters and digits are kept (CJK titles stay readable);
/// everything else collapses into single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    if slug.is_empty() {
        "book".to_string()
    } else {
        slug
    }
}

/// Parse the chapter number out of a file name: the first run of digits.
///
/// `012 - The Storm.md` → 12, `Chapter 3.txt` → 3, `第45章.md` → 45.
pub fn parse_chapter_number(file_name: &str) -> Option<u32> {
    let stem = match file_name.rfind('.') {
        Some(dot) if dot > 0 => &file_name[..dot],
        _ => file_name,
    };

    let digits: String = stem
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();

    digits.parse().ok()
}

/// Whether a legacy book identifier refers to the book with `book_id`.
///
/// Legacy identifiers were generated by an older, looser scheme, so the
/// comparison is a heuristic: identical ids match; otherwise either id may
/// be a prefix of the other, compared both in full and with the trailing
/// `-`/`_` segment (hash or timestamp) removed. Similar titles can collide;
/// that approximation is accepted.
pub fn legacy_book_matches(legacy_id: &str, book_id: &str) -> bool {
    let legacy = legacy_id.trim().to_lowercase();
    let current = book_id.trim().to_lowercase();

    if legacy.is_empty() || current.is_empty() {
        return false;
    }
    if legacy == current || either_prefix(&legacy, &current) {
        return true;
    }

    let legacy_stem = id_stem(&legacy);
    let current_stem = id_stem(&current);
    !legacy_stem.is_empty() && !current_stem.is_empty() && either_prefix(legacy_stem, current_stem)
}

fn either_prefix(a: &str, b: &str) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// The id with its final separator-delimited segment removed
fn id_stem(id: &str) -> &str {
    match id.rfind(['-', '_']) {
        Some(pos) if pos > 0 => &id[..pos],
        _ => id,
    }
}

fn normalize_path(path: &Path) -> String {
    let raw = path.to_string_lossy().replace('\\', "/");
    let trimmed = raw.trim_end_matches('/');
    trimmed.strip_prefix("./").unwrap_or(trimmed).to_string()
}
