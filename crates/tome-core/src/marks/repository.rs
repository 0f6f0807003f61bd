//! Mark persistence
//!
//! Routes each mark to one of two backends by its mode:
//!
//! - `story-unit` marks are StoryUnit records in the [`RecordStore`]
//! - every other mode lives in [`MarkBlobStore`], one JSON object per book
//!   keyed by mark id

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError};

use tracing::{debug, warn};

use crate::config::Config;
use crate::models::BookInfo;
use crate::storage::{FileLocks, StoreError, StoreResult, Vault};
use crate::store::RecordStore;

use super::model::UnifiedMark;

type Blob = BTreeMap<String, UnifiedMark>;

/// Keyed JSON storage for marks that have no table of their own.
///
/// Writes lock the blob's path in `locks`; every store over the same vault
/// must be handed the same [`FileLocks`].
pub struct MarkBlobStore {
    vault: Arc<dyn Vault>,
    config: Config,
    locks: Arc<FileLocks>,
}

impl MarkBlobStore {
    pub fn new(vault: Arc<dyn Vault>, config: Config, locks: Arc<FileLocks>) -> Self {
        Self {
            vault,
            config,
            locks,
        }
    }

    pub fn get(&self, book_path: &Path, id: &str) -> StoreResult<Option<UnifiedMark>> {
        Ok(self.load(book_path)?.remove(id))
    }

    /// All marks of a book, ordered by id
    pub fn list(&self, book_path: &Path) -> StoreResult<Vec<UnifiedMark>> {
        Ok(self.load(book_path)?.into_values().collect())
    }

    /// Insert or replace a mark
    pub fn put(&self, mark: &UnifiedMark) -> StoreResult<()> {
        let lock = self.locks.lock_for(&self.config.marks_blob_path(&mark.book_path));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut blob = self.load(&mark.book_path)?;
        blob.insert(mark.id.clone(), mark.clone());
        self.save(&mark.book_path, &blob)
    }

    /// Insert many marks with a single write
    pub fn put_all(&self, book_path: &Path, marks: &[UnifiedMark]) -> StoreResult<()> {
        if marks.is_empty() {
            return Ok(());
        }
        let lock = self.locks.lock_for(&self.config.marks_blob_path(book_path));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut blob = self.load(book_path)?;
        for mark in marks {
            blob.insert(mark.id.clone(), mark.clone());
        }
        self.save(book_path, &blob)
    }

    pub fn delete(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        let lock = self.locks.lock_for(&self.config.marks_blob_path(book_path));
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut blob = self.load(book_path)?;
        if blob.remove(id).is_none() {
            return Ok(false);
        }
        self.save(book_path, &blob)?;
        Ok(true)
    }

    fn load(&self, book_path: &Path) -> StoreResult<Blob> {
        let path = self.config.marks_blob_path(book_path);
        if !self.vault.exists(&path) {
            return Ok(Blob::new());
        }
        let text = self
            .vault
            .read(&path)
            .map_err(|e| StoreError::from_read(e, path.clone()))?;
        if text.trim().is_empty() {
            return Ok(Blob::new());
        }
        serde_json::from_str(&text).map_err(|e| StoreError::InvalidFormat {
            path,
            details: e.to_string(),
        })
    }

    fn save(&self, book_path: &Path, blob: &Blob) -> StoreResult<()> {
        let path = self.config.marks_blob_path(book_path);
        let json = serde_json::to_string_pretty(blob).map_err(|e| StoreError::Encode {
            path: path.clone(),
            details: e.to_string(),
        })?;
        self.vault
            .write(&path, &json)
            .map_err(|e| StoreError::from_io(e, path))
    }
}

/// One mark API over the record store and the blob store
pub struct MarkRepository {
    store: Arc<RecordStore>,
    blobs: MarkBlobStore,
}

impl MarkRepository {
    pub fn new(store: Arc<RecordStore>) -> Self {
        let blobs = MarkBlobStore::new(
            store.vault().clone(),
            store.config().clone(),
            store.file_locks().clone(),
        );
        Self { store, blobs }
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn blobs(&self) -> &MarkBlobStore {
        &self.blobs
    }

    /// Insert or update a mark in the backend its mode selects.
    ///
    /// A story-unit mark on an uninitialized book initializes it first.
    pub fn save_mark(&self, mark: &UnifiedMark) -> StoreResult<()> {
        if !mark.is_story_unit() {
            return self.blobs.put(mark);
        }

        let book_path = mark.book_path.as_path();
        if !self.store.is_database_initialized(book_path) {
            self.store.initialize_database(book_path, &BookInfo::default())?;
        }

        let updated = self
            .store
            .update_story_unit(book_path, &mark.id, |existing| mark.apply_to_story_unit(existing))?;
        if !updated {
            self.store.add_story_unit(book_path, mark.to_story_unit())?;
        }
        debug!(mark_id = %mark.id, updated, "Saved story-unit mark");
        Ok(())
    }

    /// Look a mark up in the record store, then in the blob store
    pub fn get_mark(&self, book_path: &Path, id: &str) -> StoreResult<Option<UnifiedMark>> {
        if let Some(unit) = self.store.get_story_unit(book_path, id)? {
            return Ok(Some(UnifiedMark::from_story_unit(&unit, book_path)));
        }
        self.blobs.get(book_path, id)
    }

    /// Delete a mark from whichever backend holds it.
    ///
    /// A failing StoryUnit delete still tries the blob store; the store
    /// error is returned only if the blob store had nothing to delete.
    pub fn delete_mark(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        let store_error = match self.store.delete_story_unit(book_path, id) {
            Ok(true) => return Ok(true),
            Ok(false) => None,
            Err(e) => {
                warn!(mark_id = id, error = %e, "StoryUnit delete failed, trying mark blob");
                Some(e)
            }
        };

        match (self.blobs.delete(book_path, id)?, store_error) {
            (true, _) => Ok(true),
            (false, Some(e)) => Err(e),
            (false, None) => Ok(false),
        }
    }

    /// Story-unit marks followed by blob marks
    pub fn get_marks_by_book(&self, book_path: &Path) -> StoreResult<Vec<UnifiedMark>> {
        let mut marks: Vec<UnifiedMark> = self
            .store
            .get_story_units(book_path)?
            .iter()
            .map(|unit| UnifiedMark::from_story_unit(unit, book_path))
            .collect();
        marks.extend(self.blobs.list(book_path)?);
        Ok(marks)
    }
}
