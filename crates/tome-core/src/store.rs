//! Record store
//!
//! The `RecordStore` owns the on-disk representation of each book's data:
//!
//! - `<book>/_tome/book.md` - BookMeta singleton (header block)
//! - `<book>/_tome/characters.md`, `story_units.md`, `events.md` - tables
//! - chapter files - each carries its own header block
//!
//! ## Write model
//!
//! Every table mutation loads the whole table, mutates it in memory and
//! rewrites the whole file. Each table file has its own mutex, held for the
//! full read-modify-write cycle, so concurrent writers to the same table
//! serialize instead of losing updates. A failed write touches only its own
//! table.
//!
//! ## Failure semantics
//!
//! - update/delete on an unknown id returns `Ok(false)`
//! - reads on an uninitialized book return empty collections
//! - inserts need a book id and fail with `NotInitialized` without one
//!
//! ## Usage
//!
//! ```ignore
//! let store = RecordStore::new(Arc::new(FsVault::new(root)), Config::default());
//! let book_id = store.initialize_database(book, &BookInfo::titled("Night Harbor"))?;
//!
//! let id = store.add_character(book, Character::new("Mira", Source::Manual))?;
//! store.update_character(book, &id, |c| c.aliases.push("M".into()))?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::identity::{chapter_id, derive_book_id, parse_chapter_number};
use crate::models::{
    touch, BookInfo, BookMeta, ChapterFrontmatter, Character, StoryEvent, StoryUnit,
};
use crate::storage::frontmatter::{read_frontmatter, render_frontmatter, replace_frontmatter, split_frontmatter};
use crate::storage::table::{decode_table, encode_table};
use crate::storage::{FileLocks, FsVault, StoreError, StoreResult, TableRecord, Vault};

/// A chapter file found in a book folder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterFile {
    /// 1-based chapter number parsed from the file name
    pub number: u32,
    /// Vault path of the file
    pub path: PathBuf,
    /// File stem, used as the default chapter title
    pub stem: String,
}

/// Typed CRUD over the plain-text tables of every book in a vault
pub struct RecordStore {
    vault: Arc<dyn Vault>,
    config: Config,
    locks: Arc<FileLocks>,
}

impl RecordStore {
    /// Create a store over a vault
    pub fn new(vault: Arc<dyn Vault>, config: Config) -> Self {
        Self {
            vault,
            config,
            locks: Arc::new(FileLocks::new()),
        }
    }

    /// Create a store over a filesystem vault rooted at `root`
    pub fn open(root: impl Into<PathBuf>, config: Config) -> Self {
        Self::new(Arc::new(FsVault::new(root)), config)
    }

    /// Get the underlying vault
    pub fn vault(&self) -> &Arc<dyn Vault> {
        &self.vault
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Per-file locks, shared with anything else writing into the vault
    pub fn file_locks(&self) -> &Arc<FileLocks> {
        &self.locks
    }

    // ==================== Book Operations ====================

    /// Create the book's containers and BookMeta record if absent.
    ///
    /// Idempotent: on an initialized book existing records are kept and
    /// non-empty fields of `info` are patched into BookMeta.
    pub fn initialize_database(&self, book_path: &Path, info: &BookInfo) -> StoreResult<String> {
        let meta_path = self.config.book_meta_path(book_path);
        let lock = self.lock_for(&meta_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let db_path = self.config.db_path(book_path);
        self.vault
            .create_dir_all(&db_path)
            .map_err(|e| StoreError::from_io(e, db_path.clone()))?;

        let book_id = match self.read_book_meta(book_path)? {
            Some(mut meta) => {
                if patch_book_info(&mut meta, info) {
                    meta.updated_at = touch(meta.updated_at);
                    self.write_book_meta(book_path, &meta)?;
                    debug!(book_id = %meta.book_id, "Patched book metadata on re-initialization");
                }
                meta.book_id
            }
            None => {
                let book_id = derive_book_id(book_path);
                let (total_chapters, total_words) = self.chapter_stats(book_path)?;
                let now = Utc::now();
                let meta = BookMeta {
                    book_id: book_id.clone(),
                    title: if info.title.trim().is_empty() {
                        folder_name(book_path)
                    } else {
                        info.title.clone()
                    },
                    author: info.author.clone(),
                    description: info.description.clone(),
                    total_chapters,
                    total_words,
                    ai_synopsis: String::new(),
                    ai_writing_techniques: Vec::new(),
                    ai_takeaways: Vec::new(),
                    created_at: now,
                    updated_at: now,
                };
                self.write_book_meta(book_path, &meta)?;
                info!(book_id = %book_id, path = ?book_path, "Initialized book database");
                book_id
            }
        };

        self.ensure_table::<Character>(book_path, &book_id)?;
        self.ensure_table::<StoryUnit>(book_path, &book_id)?;
        self.ensure_table::<StoryEvent>(book_path, &book_id)?;

        Ok(book_id)
    }

    /// Whether the book has a BookMeta record
    pub fn is_database_initialized(&self, book_path: &Path) -> bool {
        self.vault.exists(&self.config.book_meta_path(book_path))
    }

    /// The book id, or `None` if the book is not initialized
    pub fn get_book_id(&self, book_path: &Path) -> StoreResult<Option<String>> {
        Ok(self.read_book_meta(book_path)?.map(|meta| meta.book_id))
    }

    /// The BookMeta record, or `None` if the book is not initialized
    pub fn get_book_meta(&self, book_path: &Path) -> StoreResult<Option<BookMeta>> {
        self.read_book_meta(book_path)
    }

    /// Mutate BookMeta in place. Returns `false` if the book is not initialized.
    pub fn update_book_meta(
        &self,
        book_path: &Path,
        update: impl FnOnce(&mut BookMeta),
    ) -> StoreResult<bool> {
        self.try_update_book_meta(book_path, |meta| {
            update(meta);
            Ok(())
        })
    }

    /// Like [`update_book_meta`](Self::update_book_meta), but `update` may
    /// fail; nothing is written when it does.
    pub fn try_update_book_meta(
        &self,
        book_path: &Path,
        update: impl FnOnce(&mut BookMeta) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        let meta_path = self.config.book_meta_path(book_path);
        let lock = self.lock_for(&meta_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(mut meta) = self.read_book_meta(book_path)? else {
            return Ok(false);
        };

        let book_id = meta.book_id.clone();
        let created_at = meta.created_at;
        let previous = meta.updated_at;
        update(&mut meta)?;
        meta.book_id = book_id;
        meta.created_at = created_at;
        meta.updated_at = touch(previous);

        self.write_book_meta(book_path, &meta)?;
        Ok(true)
    }

    /// Recount chapters and words into BookMeta
    pub fn refresh_book_stats(&self, book_path: &Path) -> StoreResult<bool> {
        let (total_chapters, total_words) = self.chapter_stats(book_path)?;
        self.update_book_meta(book_path, |meta| {
            meta.total_chapters = total_chapters;
            meta.total_words = total_words;
        })
    }

    // ==================== Character Operations ====================

    pub fn get_characters(&self, book_path: &Path) -> StoreResult<Vec<Character>> {
        self.load_table(book_path)
    }

    pub fn get_character(&self, book_path: &Path, id: &str) -> StoreResult<Option<Character>> {
        self.find_by_id(book_path, id)
    }

    /// Exact-name lookup
    pub fn find_character_by_name(&self, book_path: &Path, name: &str) -> StoreResult<Option<Character>> {
        Ok(self
            .get_characters(book_path)?
            .into_iter()
            .find(|c| c.name == name))
    }

    /// Insert a character; its name must be unique within the book
    pub fn add_character(&self, book_path: &Path, character: Character) -> StoreResult<String> {
        self.insert(book_path, character)
    }

    pub fn update_character(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut Character),
    ) -> StoreResult<bool> {
        self.update(book_path, id, update)
    }

    /// Update a character with a fallible closure; nothing is written when it fails
    pub fn try_update_character(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut Character) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        self.try_update(book_path, id, update)
    }

    pub fn delete_character(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        self.delete::<Character>(book_path, id)
    }

    // ==================== Story Unit Operations ====================

    pub fn get_story_units(&self, book_path: &Path) -> StoreResult<Vec<StoryUnit>> {
        self.load_table(book_path)
    }

    pub fn get_story_unit(&self, book_path: &Path, id: &str) -> StoreResult<Option<StoryUnit>> {
        self.find_by_id(book_path, id)
    }

    /// Exact-name lookup
    pub fn find_story_unit_by_name(&self, book_path: &Path, name: &str) -> StoreResult<Option<StoryUnit>> {
        Ok(self
            .get_story_units(book_path)?
            .into_iter()
            .find(|u| u.name == name))
    }

    /// Insert a story unit; its name must be unique within the book
    pub fn add_story_unit(&self, book_path: &Path, unit: StoryUnit) -> StoreResult<String> {
        self.insert(book_path, unit)
    }

    pub fn update_story_unit(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut StoryUnit),
    ) -> StoreResult<bool> {
        self.update(book_path, id, update)
    }

    pub fn try_update_story_unit(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut StoryUnit) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        self.try_update(book_path, id, update)
    }

    /// Delete a story unit and the events derived from it.
    ///
    /// The unit's deletion stands even if cleaning up its events fails.
    pub fn delete_story_unit(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        let deleted = self.delete::<StoryUnit>(book_path, id)?;
        if deleted {
            if let Err(e) = self.delete_events_for_unit(book_path, id) {
                warn!(unit_id = id, error = %e, "Failed to delete events of removed story unit");
            }
        }
        Ok(deleted)
    }

    // ==================== Event Operations ====================

    pub fn get_events(&self, book_path: &Path) -> StoreResult<Vec<StoryEvent>> {
        self.load_table(book_path)
    }

    pub fn get_event(&self, book_path: &Path, id: &str) -> StoreResult<Option<StoryEvent>> {
        self.find_by_id(book_path, id)
    }

    /// Events of one unit, in pseudo-time order
    pub fn get_events_for_unit(&self, book_path: &Path, unit_id: &str) -> StoreResult<Vec<StoryEvent>> {
        let mut events: Vec<StoryEvent> = self
            .get_events(book_path)?
            .into_iter()
            .filter(|e| e.story_unit_id == unit_id)
            .collect();
        events.sort_by_key(|e| e.pseudo_time_order);
        Ok(events)
    }

    pub fn add_event(&self, book_path: &Path, event: StoryEvent) -> StoreResult<String> {
        self.insert(book_path, event)
    }

    pub fn update_event(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut StoryEvent),
    ) -> StoreResult<bool> {
        self.update(book_path, id, update)
    }

    pub fn delete_event(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        self.delete::<StoryEvent>(book_path, id)
    }

    /// Remove every event of a unit; returns how many were removed
    pub fn delete_events_for_unit(&self, book_path: &Path, unit_id: &str) -> StoreResult<usize> {
        self.with_table::<StoryEvent, _>(book_path, |events, _| {
            let before = events.len();
            events.retain(|e| e.story_unit_id != unit_id);
            let removed = before - events.len();
            Ok((removed, removed > 0))
        })
    }

    /// Swap a unit's events for a freshly derived list in one table write
    pub fn replace_events_for_unit(
        &self,
        book_path: &Path,
        unit_id: &str,
        new_events: Vec<StoryEvent>,
    ) -> StoreResult<Vec<String>> {
        self.with_table::<StoryEvent, _>(book_path, |events, book_id| {
            events.retain(|e| e.story_unit_id != unit_id);
            let now = Utc::now();
            let mut ids = Vec::with_capacity(new_events.len());
            for mut event in new_events {
                event.event_id = Uuid::new_v4().to_string();
                event.book_id = book_id.to_string();
                event.story_unit_id = unit_id.to_string();
                event.created_at = now;
                event.updated_at = now;
                ids.push(event.event_id.clone());
                events.push(event);
            }
            Ok((ids, true))
        })
    }

    // ==================== Chapter Operations ====================

    /// Chapter files of a book ordered by chapter number.
    ///
    /// Looks at the book folder and its `chapters/` subfolder; a file is a
    /// chapter when it has a chapter extension and a numeric token in its
    /// name.
    pub fn scan_chapter_files(&self, book_path: &Path) -> StoreResult<Vec<ChapterFile>> {
        let mut chapters = Vec::new();
        let chapters_dir = book_path.join(&self.config.chapters_dir);

        for dir in [book_path.to_path_buf(), chapters_dir] {
            if !self.vault.exists(&dir) {
                continue;
            }
            let entries = self
                .vault
                .list(&dir)
                .map_err(|e| StoreError::from_read(e, dir.clone()))?;

            for entry in entries {
                if entry.is_dir || !self.config.is_chapter_extension(&entry.path) {
                    continue;
                }
                let name = entry.name();
                let Some(number) = parse_chapter_number(&name) else {
                    continue;
                };
                let stem = entry
                    .path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                chapters.push(ChapterFile {
                    number,
                    path: entry.path,
                    stem,
                });
            }
        }

        chapters.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.path.cmp(&b.path)));
        Ok(chapters)
    }

    /// Header of every chapter; chapters without one get a derived header
    pub fn get_chapters(&self, book_path: &Path) -> StoreResult<Vec<ChapterFrontmatter>> {
        let book_id = self.get_book_id(book_path)?.unwrap_or_default();
        let mut chapters = Vec::new();

        for file in self.scan_chapter_files(book_path)? {
            let text = self.read_file(&file.path)?;
            let parsed = match read_frontmatter::<ChapterFrontmatter>(&text) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = ?file.path, error = %e, "Ignoring malformed chapter header");
                    None
                }
            };

            let mut fm = parsed.unwrap_or_else(|| derived_frontmatter(&book_id, &file, &text));
            if fm.chapter_num == 0 {
                fm.chapter_num = file.number;
            }
            fm.file_path = file.path;
            chapters.push(fm);
        }

        Ok(chapters)
    }

    /// Replace a chapter file's header, keeping its text.
    ///
    /// Returns `false` if the chapter file does not exist.
    pub fn update_chapter_frontmatter(
        &self,
        chapter_path: &Path,
        frontmatter: &ChapterFrontmatter,
    ) -> StoreResult<bool> {
        let lock = self.lock_for(chapter_path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if !self.vault.exists(chapter_path) {
            return Ok(false);
        }
        let text = self.read_file(chapter_path)?;
        let updated = replace_frontmatter(&text, frontmatter).map_err(|e| StoreError::Encode {
            path: chapter_path.to_path_buf(),
            details: e.to_string(),
        })?;
        self.write_file(chapter_path, &updated)?;
        Ok(true)
    }

    /// Raw text of chapters `start..=end` (1-based), joined by blank lines.
    ///
    /// A range past the last chapter is clamped; an inverted range yields
    /// an empty string.
    pub fn get_chapter_content(
        &self,
        book_path: &Path,
        start_chapter: u32,
        end_chapter: u32,
    ) -> StoreResult<String> {
        let start = start_chapter.max(1);
        if end_chapter < start {
            return Ok(String::new());
        }

        let mut parts = Vec::new();
        for file in self.scan_chapter_files(book_path)? {
            if file.number < start || file.number > end_chapter {
                continue;
            }
            let text = self.read_file(&file.path)?;
            let (_, body) = split_frontmatter(&text);
            parts.push(body.trim_end().to_string());
        }

        Ok(parts.join("\n\n"))
    }

    /// Write `bookId`/`chapterId`/`chapterNum` headers into every chapter
    /// that lacks them. Safe to re-run; returns how many files changed.
    pub fn inject_chapter_frontmatters(&self, book_path: &Path, book_id: &str) -> StoreResult<usize> {
        let mut injected = 0;

        for file in self.scan_chapter_files(book_path)? {
            let lock = self.lock_for(&file.path);
            let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

            let text = self.read_file(&file.path)?;
            let existing = match read_frontmatter::<ChapterFrontmatter>(&text) {
                Ok(existing) => existing,
                Err(e) => {
                    warn!(path = ?file.path, error = %e, "Skipping chapter with malformed header");
                    continue;
                }
            };

            let mut fm = existing.unwrap_or_default();
            if !fm.chapter_id.is_empty() && !fm.book_id.is_empty() && fm.chapter_num != 0 {
                continue;
            }

            if fm.book_id.is_empty() {
                fm.book_id = book_id.to_string();
            }
            if fm.chapter_num == 0 {
                fm.chapter_num = file.number;
            }
            if fm.chapter_id.is_empty() {
                fm.chapter_id = chapter_id(&fm.book_id, fm.chapter_num);
            }
            if fm.title.is_empty() {
                fm.title = file.stem.clone();
            }
            if fm.word_count == 0 {
                fm.word_count = count_words(split_frontmatter(&text).1);
            }

            let updated = replace_frontmatter(&text, &fm).map_err(|e| StoreError::Encode {
                path: file.path.clone(),
                details: e.to_string(),
            })?;
            self.write_file(&file.path, &updated)?;
            injected += 1;
        }

        if injected > 0 {
            info!(book_id, injected, "Injected chapter headers");
        }
        Ok(injected)
    }

    // ==================== Internals ====================

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        self.locks.lock_for(path)
    }

    fn read_file(&self, path: &Path) -> StoreResult<String> {
        self.vault
            .read(path)
            .map_err(|e| StoreError::from_read(e, path.to_path_buf()))
    }

    fn write_file(&self, path: &Path, contents: &str) -> StoreResult<()> {
        self.vault
            .write(path, contents)
            .map_err(|e| StoreError::from_io(e, path.to_path_buf()))
    }

    fn read_book_meta(&self, book_path: &Path) -> StoreResult<Option<BookMeta>> {
        let path = self.config.book_meta_path(book_path);
        if !self.vault.exists(&path) {
            return Ok(None);
        }
        let text = self.read_file(&path)?;
        read_frontmatter::<BookMeta>(&text).map_err(|e| StoreError::InvalidFormat {
            path,
            details: e.to_string(),
        })
    }

    fn write_book_meta(&self, book_path: &Path, meta: &BookMeta) -> StoreResult<()> {
        let path = self.config.book_meta_path(book_path);
        let mut body = format!("# {}\n", meta.title);
        if !meta.description.is_empty() {
            body.push('\n');
            body.push_str(&meta.description);
            body.push('\n');
        }
        let text = render_frontmatter(meta, &body).map_err(|e| StoreError::Encode {
            path: path.clone(),
            details: e.to_string(),
        })?;
        self.write_file(&path, &text)
    }

    fn require_book_id(&self, book_path: &Path) -> StoreResult<String> {
        self.get_book_id(book_path)?
            .ok_or_else(|| StoreError::NotInitialized {
                path: book_path.to_path_buf(),
            })
    }

    fn chapter_stats(&self, book_path: &Path) -> StoreResult<(u32, u64)> {
        let files = self.scan_chapter_files(book_path)?;
        let mut words = 0;
        for file in &files {
            let text = self.read_file(&file.path)?;
            words += count_words(split_frontmatter(&text).1);
        }
        Ok((files.len() as u32, words))
    }

    fn ensure_table<T: Row>(&self, book_path: &Path, book_id: &str) -> StoreResult<()> {
        let path = T::table_path(&self.config, book_path);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if self.vault.exists(&path) {
            return Ok(());
        }
        self.save_table::<T>(book_path, book_id, &[])
    }

    fn load_table<T: Row>(&self, book_path: &Path) -> StoreResult<Vec<T>> {
        let path = T::table_path(&self.config, book_path);
        if !self.vault.exists(&path) {
            return Ok(Vec::new());
        }
        let text = self.read_file(&path)?;
        let (_, records) = decode_table::<T>(&text).map_err(|e| StoreError::InvalidFormat {
            path,
            details: e.to_string(),
        })?;
        Ok(records)
    }

    fn save_table<T: Row>(&self, book_path: &Path, book_id: &str, records: &[T]) -> StoreResult<()> {
        let path = T::table_path(&self.config, book_path);
        let text = encode_table(book_id, records).map_err(|e| StoreError::Encode {
            path: path.clone(),
            details: e.to_string(),
        })?;
        self.write_file(&path, &text)
    }

    fn find_by_id<T: Row>(&self, book_path: &Path, id: &str) -> StoreResult<Option<T>> {
        Ok(self
            .load_table::<T>(book_path)?
            .into_iter()
            .find(|r| r.record_id() == id))
    }

    /// Run one read-modify-write cycle on a table under its lock.
    ///
    /// `mutate` returns its result and whether the table changed; the table
    /// is rewritten only when it did.
    fn with_table<T: Row, R>(
        &self,
        book_path: &Path,
        mutate: impl FnOnce(&mut Vec<T>, &str) -> StoreResult<(R, bool)>,
    ) -> StoreResult<R> {
        let path = T::table_path(&self.config, book_path);
        let lock = self.lock_for(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let book_id = self.require_book_id(book_path)?;
        let mut records = self.load_table::<T>(book_path)?;
        let (result, dirty) = mutate(&mut records, &book_id)?;
        if dirty {
            self.save_table(book_path, &book_id, &records)?;
        }
        Ok(result)
    }

    fn insert<T: Row>(&self, book_path: &Path, mut record: T) -> StoreResult<String> {
        self.with_table::<T, _>(book_path, |records, book_id| {
            if let Some(name) = record.unique_name() {
                if records.iter().any(|r| r.unique_name() == Some(name)) {
                    return Err(StoreError::DuplicateName {
                        kind: T::KIND,
                        name: name.to_string(),
                    });
                }
            }

            if record.record_id().is_empty() {
                *record.id_mut() = Uuid::new_v4().to_string();
            } else if records.iter().any(|r| r.record_id() == record.record_id()) {
                return Err(StoreError::DuplicateId {
                    kind: T::KIND,
                    id: record.record_id().to_string(),
                });
            }

            *record.book_id_mut() = book_id.to_string();
            let now = Utc::now();
            let (created_at, updated_at) = record.stamps_mut();
            *created_at = now;
            *updated_at = now;

            let id = record.record_id().to_string();
            debug!(kind = T::KIND, id = %id, "Inserted record");
            records.push(record);
            Ok((id, true))
        })
    }

    fn update<T: Row>(&self, book_path: &Path, id: &str, update: impl FnOnce(&mut T)) -> StoreResult<bool> {
        self.try_update(book_path, id, |record: &mut T| {
            update(record);
            Ok(())
        })
    }

    fn try_update<T: Row>(
        &self,
        book_path: &Path,
        id: &str,
        update: impl FnOnce(&mut T) -> StoreResult<()>,
    ) -> StoreResult<bool> {
        self.with_table::<T, _>(book_path, |records, book_id| {
            let Some(index) = records.iter().position(|r| r.record_id() == id) else {
                return Ok((false, false));
            };

            let mut record = records[index].clone();
            let (created_at, previous) = {
                let (c, u) = record.stamps_mut();
                (*c, *u)
            };

            update(&mut record)?;

            *record.id_mut() = id.to_string();
            *record.book_id_mut() = book_id.to_string();
            {
                let (c, u) = record.stamps_mut();
                *c = created_at;
                *u = touch(previous);
            }

            if let Some(name) = record.unique_name() {
                let taken = records
                    .iter()
                    .enumerate()
                    .any(|(i, r)| i != index && r.unique_name() == Some(name));
                if taken {
                    return Err(StoreError::DuplicateName {
                        kind: T::KIND,
                        name: name.to_string(),
                    });
                }
            }

            records[index] = record;
            Ok((true, true))
        })
    }

    fn delete<T: Row>(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        if !self.is_database_initialized(book_path) {
            return Ok(false);
        }
        self.with_table::<T, _>(book_path, |records, _| {
            let before = records.len();
            records.retain(|r| r.record_id() != id);
            let removed = records.len() != before;
            Ok((removed, removed))
        })
    }
}

/// Store-internal view of a table record
trait Row: TableRecord {
    const KIND: &'static str;

    fn table_path(config: &Config, book_path: &Path) -> PathBuf;
    fn id_mut(&mut self) -> &mut String;
    fn book_id_mut(&mut self) -> &mut String;
    fn stamps_mut(&mut self) -> (&mut DateTime<Utc>, &mut DateTime<Utc>);

    /// Name that must be unique within the book, if the type has one
    fn unique_name(&self) -> Option<&str>;
}

impl Row for Character {
    const KIND: &'static str = "character";

    fn table_path(config: &Config, book_path: &Path) -> PathBuf {
        config.characters_path(book_path)
    }

    fn id_mut(&mut self) -> &mut String {
        &mut self.character_id
    }

    fn book_id_mut(&mut self) -> &mut String {
        &mut self.book_id
    }

    fn stamps_mut(&mut self) -> (&mut DateTime<Utc>, &mut DateTime<Utc>) {
        (&mut self.created_at, &mut self.updated_at)
    }

    fn unique_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl Row for StoryUnit {
    const KIND: &'static str = "story unit";

    fn table_path(config: &Config, book_path: &Path) -> PathBuf {
        config.story_units_path(book_path)
    }

    fn id_mut(&mut self) -> &mut String {
        &mut self.unit_id
    }

    fn book_id_mut(&mut self) -> &mut String {
        &mut self.book_id
    }

    fn stamps_mut(&mut self) -> (&mut DateTime<Utc>, &mut DateTime<Utc>) {
        (&mut self.created_at, &mut self.updated_at)
    }

    fn unique_name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

impl Row for StoryEvent {
    const KIND: &'static str = "event";

    fn table_path(config: &Config, book_path: &Path) -> PathBuf {
        config.events_path(book_path)
    }

    fn id_mut(&mut self) -> &mut String {
        &mut self.event_id
    }

    fn book_id_mut(&mut self) -> &mut String {
        &mut self.book_id
    }

    fn stamps_mut(&mut self) -> (&mut DateTime<Utc>, &mut DateTime<Utc>) {
        (&mut self.created_at, &mut self.updated_at)
    }

    fn unique_name(&self) -> Option<&str> {
        None
    }
}

/// Apply the non-empty fields of `info`; returns whether anything changed
fn patch_book_info(meta: &mut BookMeta, info: &BookInfo) -> bool {
    let mut changed = false;
    for (field, value) in [
        (&mut meta.title, &info.title),
        (&mut meta.author, &info.author),
        (&mut meta.description, &info.description),
    ] {
        if !value.trim().is_empty() && field.as_str() != value.as_str() {
            *field = value.clone();
            changed = true;
        }
    }
    changed
}

fn derived_frontmatter(book_id: &str, file: &ChapterFile, text: &str) -> ChapterFrontmatter {
    ChapterFrontmatter {
        book_id: book_id.to_string(),
        chapter_id: if book_id.is_empty() {
            String::new()
        } else {
            chapter_id(book_id, file.number)
        },
        chapter_num: file.number,
        title: file.stem.clone(),
        word_count: count_words(split_frontmatter(text).1),
        ..ChapterFrontmatter::default()
    }
}

fn folder_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Word count for mixed-script prose.
///
/// CJK ideographs and kana count one word each; other text counts
/// whitespace-separated runs.
pub fn count_words(text: &str) -> u64 {
    let mut count = 0;
    let mut in_word = false;

    for c in text.chars() {
        if is_cjk(c) {
            count += 1;
            in_word = false;
        } else if c.is_whitespace() {
            in_word = false;
        } else if !in_word && c.is_alphanumeric() {
            in_word = true;
            count += 1;
        }
    }

    count
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x30FF     // kana
        | 0x3400..=0x4DBF   // CJK extension A
        | 0x4E00..=0x9FFF   // CJK unified ideographs
        | 0xF900..=0xFAFF   // compatibility ideographs
        | 0xAC00..=0xD7AF   // hangul syllables
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChapterRange, CharacterRole, ReadStatus, Source};
    use crate::test_support::{book, FaultyVault, Fixture};
    use std::thread;

    fn init(fx: &Fixture, name: &str) -> (PathBuf, String) {
        let path = book(name);
        let id = fx
            .store
            .initialize_database(&path, &BookInfo::titled(name))
            .unwrap();
        (path, id)
    }

    #[test]
    fn test_initialize_creates_tables() {
        let fx = Fixture::new();
        let (path, book_id) = init(&fx, "Night Harbor");

        assert!(fx.store.is_database_initialized(&path));
        assert_eq!(fx.store.get_book_id(&path).unwrap(), Some(book_id.clone()));
        assert!(fx.vault.exists(&fx.store.config().characters_path(&path)));
        assert!(fx.vault.exists(&fx.store.config().story_units_path(&path)));
        assert!(fx.vault.exists(&fx.store.config().events_path(&path)));

        let meta = fx.store.get_book_meta(&path).unwrap().unwrap();
        assert_eq!(meta.title, "Night Harbor");
        assert_eq!(meta.book_id, book_id);
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let fx = Fixture::new();
        let (path, first_id) = init(&fx, "Night Harbor");
        fx.store
            .add_character(&path, Character::new("Mira", Source::Manual))
            .unwrap();
        fx.store
            .add_story_unit(&path, StoryUnit::new("Arrival", ChapterRange::new(1, 2), Source::Manual))
            .unwrap();

        let second_id = fx
            .store
            .initialize_database(&path, &BookInfo::default())
            .unwrap();

        assert_eq!(first_id, second_id);
        assert_eq!(fx.store.get_characters(&path).unwrap().len(), 1);
        assert_eq!(fx.store.get_story_units(&path).unwrap().len(), 1);
        let meta_text = fx
            .vault
            .read(&fx.store.config().book_meta_path(&path))
            .unwrap();
        assert_eq!(meta_text.matches("bookId:").count(), 1);
    }

    #[test]
    fn test_initialize_patches_metadata() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");

        let info = BookInfo {
            title: String::new(),
            author: "R. Vale".to_string(),
            description: String::new(),
        };
        fx.store.initialize_database(&path, &info).unwrap();

        let meta = fx.store.get_book_meta(&path).unwrap().unwrap();
        assert_eq!(meta.title, "Night Harbor");
        assert_eq!(meta.author, "R. Vale");
    }

    #[test]
    fn test_reads_on_uninitialized_book_are_empty() {
        let fx = Fixture::new();
        let path = book("Nowhere");

        assert!(!fx.store.is_database_initialized(&path));
        assert_eq!(fx.store.get_book_id(&path).unwrap(), None);
        assert!(fx.store.get_book_meta(&path).unwrap().is_none());
        assert!(fx.store.get_characters(&path).unwrap().is_empty());
        assert!(fx.store.get_story_units(&path).unwrap().is_empty());
        assert!(fx.store.get_events(&path).unwrap().is_empty());
        assert!(fx.store.get_chapters(&path).unwrap().is_empty());
        assert!(!fx.store.update_book_meta(&path, |m| m.title.clear()).unwrap());
        assert!(!fx.store.delete_character(&path, "x").unwrap());
    }

    #[test]
    fn test_insert_requires_initialized_book() {
        let fx = Fixture::new();
        let err = fx
            .store
            .add_character(&book("Nowhere"), Character::new("Mira", Source::Manual))
            .unwrap_err();
        assert!(matches!(err, StoreError::NotInitialized { .. }));
    }

    #[test]
    fn test_character_crud() {
        let fx = Fixture::new();
        let (path, book_id) = init(&fx, "Night Harbor");

        let mut mira = Character::new("Mira", Source::Manual);
        mira.role = CharacterRole::Protagonist;
        mira.aliases = vec!["M".to_string()];
        mira.ai_description = "A scholar.\n\nShe keeps the harbor ledgers.".to_string();
        let id = fx.store.add_character(&path, mira).unwrap();

        let stored = fx.store.get_character(&path, &id).unwrap().unwrap();
        assert_eq!(stored.book_id, book_id);
        assert_eq!(stored.aliases, vec!["M"]);
        assert_eq!(stored.ai_description, "A scholar.\n\nShe keeps the harbor ledgers.");
        assert_eq!(stored.created_at, stored.updated_at);

        assert!(fx
            .store
            .update_character(&path, &id, |c| c.tags.push("narrator".to_string()))
            .unwrap());
        let updated = fx.store.get_character(&path, &id).unwrap().unwrap();
        assert_eq!(updated.tags, vec!["narrator"]);
        assert!(updated.updated_at >= stored.updated_at);

        assert!(fx.store.delete_character(&path, &id).unwrap());
        assert!(fx.store.get_character(&path, &id).unwrap().is_none());
        assert!(!fx.store.delete_character(&path, &id).unwrap());
    }

    #[test]
    fn test_update_unknown_id_returns_false() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");

        assert!(!fx.store.update_character(&path, "missing", |_| {}).unwrap());
        assert!(!fx.store.update_story_unit(&path, "missing", |_| {}).unwrap());
        assert!(!fx.store.update_event(&path, "missing", |_| {}).unwrap());
    }

    #[test]
    fn test_update_cannot_change_identity() {
        let fx = Fixture::new();
        let (path, book_id) = init(&fx, "Night Harbor");
        let id = fx
            .store
            .add_character(&path, Character::new("Mira", Source::Manual))
            .unwrap();

        fx.store
            .update_character(&path, &id, |c| {
                c.character_id = "hijacked".to_string();
                c.book_id = "other-book".to_string();
            })
            .unwrap();

        let stored = fx.store.get_character(&path, &id).unwrap().unwrap();
        assert_eq!(stored.character_id, id);
        assert_eq!(stored.book_id, book_id);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");

        fx.store
            .add_character(&path, Character::new("Mira", Source::Manual))
            .unwrap();
        let err = fx
            .store
            .add_character(&path, Character::new("Mira", Source::Ai))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { .. }));

        let tobin = fx
            .store
            .add_character(&path, Character::new("Tobin", Source::Manual))
            .unwrap();
        let err = fx
            .store
            .update_character(&path, &tobin, |c| c.name = "Mira".to_string())
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName { .. }));
        assert_eq!(fx.store.get_characters(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_caller_supplied_id_is_kept() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");

        let mut unit = StoryUnit::new("Arrival", ChapterRange::new(1, 3), Source::Manual);
        unit.unit_id = "mark-123".to_string();
        let id = fx.store.add_story_unit(&path, unit.clone()).unwrap();
        assert_eq!(id, "mark-123");

        unit.name = "Arrival again".to_string();
        let err = fx.store.add_story_unit(&path, unit).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateId { .. }));
    }

    #[test]
    fn test_story_unit_delete_cascades_events() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");
        let unit = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Arrival", ChapterRange::new(1, 2), Source::Ai))
            .unwrap();
        let other = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Storm", ChapterRange::new(3, 4), Source::Ai))
            .unwrap();

        fx.store.add_event(&path, StoryEvent::new(&unit, "Ship docks", 0)).unwrap();
        fx.store.add_event(&path, StoryEvent::new(&unit, "Mira lands", 1)).unwrap();
        fx.store.add_event(&path, StoryEvent::new(&other, "Wind rises", 0)).unwrap();

        assert!(fx.store.delete_story_unit(&path, &unit).unwrap());
        let events = fx.store.get_events(&path).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].story_unit_id, other);
    }

    #[test]
    fn test_replace_events_for_unit() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");
        let unit = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Arrival", ChapterRange::new(1, 2), Source::Ai))
            .unwrap();
        fx.store.add_event(&path, StoryEvent::new(&unit, "Old", 0)).unwrap();

        let ids = fx
            .store
            .replace_events_for_unit(
                &path,
                &unit,
                vec![
                    StoryEvent::new("ignored", "Second", 2),
                    StoryEvent::new("ignored", "First", 1),
                ],
            )
            .unwrap();
        assert_eq!(ids.len(), 2);

        let events = fx.store.get_events_for_unit(&path, &unit).unwrap();
        let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["First", "Second"]);
        assert_eq!(
            fx.store.get_event(&path, &ids[1]).unwrap().unwrap().name,
            "First"
        );
        assert!(fx.store.get_event(&path, "missing").unwrap().is_none());
    }

    #[test]
    fn test_failed_table_write_leaves_other_tables_intact() {
        let dir = tempfile::TempDir::new().unwrap();
        let vault = Arc::new(FaultyVault::new(dir.path()));
        let store = RecordStore::new(vault.clone(), Config::default());
        let path = book("Night Harbor");
        store
            .initialize_database(&path, &BookInfo::titled("Night Harbor"))
            .unwrap();

        let mira = store
            .add_character(&path, Character::new("Mira", Source::Manual))
            .unwrap();
        let events_before = vault.read(&store.config().events_path(&path)).unwrap();

        vault.fail_writes_to("events.md");
        let err = store
            .add_event(&path, StoryEvent::new("unit", "Ship docks", 0))
            .unwrap_err();
        assert!(matches!(err, StoreError::WriteError { .. }));

        assert_eq!(vault.read(&store.config().events_path(&path)).unwrap(), events_before);
        let characters = store.get_characters(&path).unwrap();
        assert_eq!(characters.len(), 1);
        assert_eq!(characters[0].character_id, mira);

        vault.heal();
        store
            .add_event(&path, StoryEvent::new("unit", "Ship docks", 0))
            .unwrap();
        assert_eq!(store.get_events(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_inserts_are_not_lost() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = fx.store.clone();
                let path = path.clone();
                thread::spawn(move || {
                    store
                        .add_character(&path, Character::new(format!("Sailor {}", i), Source::Ai))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fx.store.get_characters(&path).unwrap().len(), 8);
    }

    #[test]
    fn test_reinitialize_races_with_inserts() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");
        fx.vault
            .remove(&fx.store.config().characters_path(&path))
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = fx.store.clone();
                let path = path.clone();
                thread::spawn(move || {
                    if i % 2 == 0 {
                        store.initialize_database(&path, &BookInfo::default()).unwrap();
                    } else {
                        store
                            .add_character(&path, Character::new(format!("Sailor {}", i), Source::Ai))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(fx.store.get_characters(&path).unwrap().len(), 4);
    }

    #[test]
    fn test_failed_try_update_writes_nothing() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");
        let id = fx
            .store
            .add_character(&path, Character::new("Mira", Source::Manual))
            .unwrap();

        let err = fx
            .store
            .try_update_character(&path, &id, |c| {
                c.tags.push("scholar".to_string());
                Err(StoreError::InvalidField {
                    field: "tags".to_string(),
                    details: "rejected".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { .. }));
        assert!(fx.store.get_character(&path, &id).unwrap().unwrap().tags.is_empty());

        let err = fx
            .store
            .try_update_book_meta(&path, |meta| {
                meta.title = "Renamed".to_string();
                Err(StoreError::InvalidField {
                    field: "title".to_string(),
                    details: "rejected".to_string(),
                })
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidField { .. }));
        assert_eq!(fx.store.get_book_meta(&path).unwrap().unwrap().title, "Night Harbor");
    }

    #[test]
    fn test_scan_chapter_files_orders_numerically() {
        let fx = Fixture::new();
        let path = book("Night Harbor");
        for name in ["10 Ten.md", "2 Two.md", "1 One.txt", "Notes.md", "cover.png"] {
            fx.vault.write(&path.join(name), "x").unwrap();
        }
        fx.vault.write(&path.join("chapters/3 Three.md"), "x").unwrap();

        let chapters = fx.store.scan_chapter_files(&path).unwrap();
        let numbers: Vec<u32> = chapters.iter().map(|c| c.number).collect();
        assert_eq!(numbers, vec![1, 2, 3, 10]);
        assert_eq!(chapters[2].path, path.join("chapters/3 Three.md"));
        assert_eq!(chapters[0].stem, "1 One");
    }

    #[test]
    fn test_chapter_content_clamps_range() {
        let fx = Fixture::new();
        let path = book("Night Harbor");
        fx.write_chapters(&path, 10);

        let content = fx.store.get_chapter_content(&path, 1, 9999).unwrap();
        let expected: Vec<String> = (1..=10).map(|n| format!("Text of chapter {}.", n)).collect();
        assert_eq!(content, expected.join("\n\n"));

        let middle = fx.store.get_chapter_content(&path, 3, 4).unwrap();
        assert_eq!(middle, "Text of chapter 3.\n\nText of chapter 4.");

        assert_eq!(fx.store.get_chapter_content(&path, 5, 2).unwrap(), "");
        assert_eq!(fx.store.get_chapter_content(&path, 0, 1).unwrap(), "Text of chapter 1.");
    }

    #[test]
    fn test_inject_chapter_frontmatters_is_rerunnable() {
        let fx = Fixture::new();
        let (path, book_id) = init(&fx, "Night Harbor");
        fx.write_chapters(&path, 3);

        assert_eq!(fx.store.inject_chapter_frontmatters(&path, &book_id).unwrap(), 3);
        assert_eq!(fx.store.inject_chapter_frontmatters(&path, &book_id).unwrap(), 0);

        let text = fx.vault.read(&path.join("002 Chapter 2.md")).unwrap();
        assert_eq!(text.matches("chapterId:").count(), 1);
        assert!(text.ends_with("---\nText of chapter 2.\n"));

        let chapters = fx.store.get_chapters(&path).unwrap();
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[1].chapter_id, chapter_id(&book_id, 2));
        assert_eq!(chapters[1].book_id, book_id);
        assert_eq!(chapters[1].word_count, 4);

        // Content reads skip the header
        assert_eq!(
            fx.store.get_chapter_content(&path, 2, 2).unwrap(),
            "Text of chapter 2."
        );
    }

    #[test]
    fn test_update_chapter_frontmatter() {
        let fx = Fixture::new();
        let (path, book_id) = init(&fx, "Night Harbor");
        fx.write_chapters(&path, 1);
        fx.store.inject_chapter_frontmatters(&path, &book_id).unwrap();

        let mut chapter = fx.store.get_chapters(&path).unwrap().remove(0);
        chapter.read_status = ReadStatus::Finished;
        chapter.ai_summary = Some("Mira arrives.".to_string());
        let chapter_path = chapter.file_path.clone();
        assert!(fx.store.update_chapter_frontmatter(&chapter_path, &chapter).unwrap());

        let reread = fx.store.get_chapters(&path).unwrap().remove(0);
        assert_eq!(reread.read_status, ReadStatus::Finished);
        assert_eq!(reread.ai_summary.as_deref(), Some("Mira arrives."));
        assert!(!fx
            .store
            .update_chapter_frontmatter(&path.join("999.md"), &chapter)
            .unwrap());
    }

    #[test]
    fn test_refresh_book_stats() {
        let fx = Fixture::new();
        let (path, _) = init(&fx, "Night Harbor");
        fx.write_chapters(&path, 4);

        assert!(fx.store.refresh_book_stats(&path).unwrap());
        let meta = fx.store.get_book_meta(&path).unwrap().unwrap();
        assert_eq!(meta.total_chapters, 4);
        assert_eq!(meta.total_words, 16);
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("It was raining."), 3);
        assert_eq!(count_words("  spaced   out \n words "), 3);
        assert_eq!(count_words("夜色很深"), 4);
        assert_eq!(count_words("Mira说：走吧"), 4);
        assert_eq!(count_words(""), 0);
    }
}
