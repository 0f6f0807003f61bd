//! Tome Core Library
//!
//! This crate provides the core functionality for tome, a plain-text
//! record store for analysing serialized fiction inside a notes vault.
//!
//! # Architecture
//!
//! - **Vault files**: source of truth. Every book keeps its records in
//!   human-readable tables next to its chapter files.
//!
//! Nothing is cached; every query re-reads the tables it needs.
//!
//! # Quick Start
//!
//! ```text
//! let store = Arc::new(RecordStore::open(vault_root, Config::load()?));
//!
//! // Register a book
//! let book_id = store.initialize_database(book, &BookInfo::titled("Night Harbor"))?;
//!
//! // Query its chapters
//! let chapters = store.get_chapters(book)?;
//! ```
//!
//! # Modules
//!
//! - `store`: Record store (main entry point)
//! - `models`: Book, character, story unit and event records
//! - `marks`: Unified annotations over the store and the mark blob
//! - `sync`: Analysis sync, conflict resolution and canvas projection
//! - `migration`: Import of the legacy marks and materials files
//! - `storage`: Vault access and the table file format
//! - `identity`: Book and chapter ids
//! - `config`: Application configuration

pub mod config;
pub mod identity;
pub mod marks;
pub mod migration;
pub mod models;
pub mod storage;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use marks::{MarkChange, MarkMode, MarkPatch, MarkingService, UnifiedMark};
pub use migration::{BatchMigrationResult, MigrationResult, MigrationService};
pub use models::{
    BookInfo, BookMeta, ChapterFrontmatter, ChapterRange, Character, CharacterRole, LineType,
    PreciseRange, Source, StoryEvent, StoryUnit, TextPosition,
};
pub use storage::{FileLocks, FsVault, StoreError, StoreResult, Vault};
pub use store::{ChapterFile, RecordStore};
pub use sync::{CanvasType, Conflict, ResolutionStrategy, SyncResult, SyncService};
