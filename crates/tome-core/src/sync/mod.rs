//! Sync service
//!
//! Merges externally produced data into the record store and keeps the
//! canvas graphs consistent with it.
//!
//! ## Flows
//!
//! - **Analysis sync**: an `AnalysisResult` patches BookMeta, upserts
//!   characters by name and writes chapter summaries into chapter headers.
//!   Overwriting a manual value records a [`Conflict`] but never blocks.
//! - **Conflict resolution**: `ai`, `manual` or `merge`, written back
//!   through the regular update operations.
//! - **Canvas sync**: store → canvas projection that keeps the positions of
//!   existing nodes, and canvas edits → store.
//!
//! ## Usage
//!
//! ```ignore
//! let sync = SyncService::new(store.clone());
//! let result = sync.sync_analysis_result(book, &analysis);
//! for conflict in &result.conflicts {
//!     sync.resolve_conflict(book, conflict, ResolutionStrategy::Merge)?;
//! }
//! sync.sync_database_to_canvas(book, CanvasType::Character);
//! ```

mod analysis;
mod canvas;
mod conflict;

use std::sync::Arc;

use serde::Serialize;

use crate::store::RecordStore;

pub use analysis::{AnalysisResult, AnalyzedCharacter, ChapterSummary};
pub use canvas::{
    entity_name, Canvas, CanvasChange, CanvasEdge, CanvasNode, CanvasSyncResult, CanvasType,
};
pub use conflict::{merge_values, Conflict, ConflictType, ResolutionStrategy, MERGE_SEPARATOR};

/// Outcome of a sync run
///
/// `success` is false only when the run was aborted; conflicts and
/// per-item errors leave it true.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub success: bool,
    pub synced_count: usize,
    pub conflicts: Vec<Conflict>,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub fn new() -> Self {
        Self {
            success: true,
            synced_count: 0,
            conflicts: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl Default for SyncResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Sync operations over one record store
pub struct SyncService {
    store: Arc<RecordStore>,
}

impl SyncService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }
}
