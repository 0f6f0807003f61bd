//! Storage layer
//!
//! Plain-text persistence for the record store.
//!
//! ## Architecture
//!
//! - **Vault**: the host's file API; every read and write goes through it
//! - **Frontmatter**: header blocks at the top of chapter and meta files
//! - **Tables**: one file per entity type, one header block per record,
//!   rewritten whole on every mutation
//! - **Locks**: one mutex per file path, shared by every writer of the file

pub mod error;
pub mod frontmatter;
pub mod locks;
pub mod table;
pub mod vault;

pub use error::{StoreError, StoreResult};
pub use locks::FileLocks;
pub use table::{TableHeader, TableRecord};
pub use vault::{FsVault, Vault, VaultEntry};
