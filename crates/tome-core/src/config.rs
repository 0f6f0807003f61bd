//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/tome/config.toml)
//! 3. Environment variables (TOME_* prefix)
//!
//! Environment variables take precedence over config file values.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
const ENV_PREFIX: &str = "TOME";

/// Application configuration
///
/// Every on-disk name used by the record store, the mark blob store, the
/// canvas projection and the migration service lives here so that a host
/// vault with a different layout can be served without code changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Folder (inside each book folder) holding the table files
    #[serde(default = "default_db_dir")]
    pub db_dir: String,

    /// Folder (inside the db folder) holding visual graph files
    #[serde(default = "default_canvas_dir")]
    pub canvas_dir: String,

    /// Optional subfolder of a book that holds chapter files
    #[serde(default = "default_chapters_dir")]
    pub chapters_dir: String,

    /// File extensions recognized as chapter files
    #[serde(default = "default_chapter_extensions")]
    pub chapter_extensions: Vec<String>,

    /// Vault-relative folder holding legacy per-book mark files
    #[serde(default = "default_legacy_marks_dir")]
    pub legacy_marks_dir: PathBuf,

    /// Vault-relative legacy global-materials file
    #[serde(default = "default_legacy_materials_file")]
    pub legacy_materials_file: PathBuf,

    /// Files whose presence marks a library subfolder as a book
    #[serde(default = "default_book_marker_files")]
    pub book_marker_files: Vec<String>,

    /// Optional log file for the CLI (stderr when unset)
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_dir: default_db_dir(),
            canvas_dir: default_canvas_dir(),
            chapters_dir: default_chapters_dir(),
            chapter_extensions: default_chapter_extensions(),
            legacy_marks_dir: default_legacy_marks_dir(),
            legacy_materials_file: default_legacy_materials_file(),
            book_marker_files: default_book_marker_files(),
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (TOME_DB_DIR, TOME_LEGACY_MARKS_DIR, ...)
    /// 2. Config file (~/.config/tome/config.toml or TOME_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(format!("{}_DB_DIR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.db_dir = val;
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LEGACY_MARKS_DIR", ENV_PREFIX)) {
            if !val.is_empty() {
                self.legacy_marks_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = std::env::var(format!("{}_LEGACY_MATERIALS_FILE", ENV_PREFIX)) {
            if !val.is_empty() {
                self.legacy_materials_file = PathBuf::from(val);
            }
        }

        // Empty string clears it
        if let Ok(val) = std::env::var(format!("{}_LOG_FILE", ENV_PREFIX)) {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Get the config file path
    ///
    /// Can be overridden with TOME_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tome")
            .join("config.toml")
    }

    /// Folder holding a book's table files
    pub fn db_path(&self, book_path: &Path) -> PathBuf {
        book_path.join(&self.db_dir)
    }

    /// BookMeta singleton file
    pub fn book_meta_path(&self, book_path: &Path) -> PathBuf {
        self.db_path(book_path).join("book.md")
    }

    pub fn characters_path(&self, book_path: &Path) -> PathBuf {
        self.db_path(book_path).join("characters.md")
    }

    pub fn story_units_path(&self, book_path: &Path) -> PathBuf {
        self.db_path(book_path).join("story_units.md")
    }

    pub fn events_path(&self, book_path: &Path) -> PathBuf {
        self.db_path(book_path).join("events.md")
    }

    /// Per-book blob store for marks that have no table of their own
    pub fn marks_blob_path(&self, book_path: &Path) -> PathBuf {
        self.db_path(book_path).join("marks.json")
    }

    /// Visual graph file for a graph type (`character`, `story`)
    pub fn canvas_path(&self, book_path: &Path, canvas_type: &str) -> PathBuf {
        self.db_path(book_path)
            .join(&self.canvas_dir)
            .join(format!("{}.canvas", canvas_type))
    }

    /// Whether a file name carries one of the chapter extensions
    pub fn is_chapter_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.chapter_extensions
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

fn default_db_dir() -> String {
    "_tome".to_string()
}

fn default_canvas_dir() -> String {
    "canvas".to_string()
}

fn default_chapters_dir() -> String {
    "chapters".to_string()
}

fn default_chapter_extensions() -> Vec<String> {
    vec!["md".to_string(), "txt".to_string()]
}

fn default_legacy_marks_dir() -> PathBuf {
    PathBuf::from(".novel-marks")
}

fn default_legacy_materials_file() -> PathBuf {
    PathBuf::from(".novel-marks").join("global-materials.json")
}

fn default_book_marker_files() -> Vec<String> {
    vec!["book.json".to_string(), "_tome/book.md".to_string()]
}
