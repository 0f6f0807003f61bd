//! Legacy data migration
//!
//! Moves marks and materials from the legacy JSON layout into the record
//! store. The legacy files are only ever read.
//!
//! ## Legacy layout
//!
//! ```text
//! .novel-marks/
//!   <legacyBookId>.json          { "<markId>": { ...mark... }, ... }
//!   global-materials.json        [ {...material...} ] or { "materials": [...] }
//! ```
//!
//! ## Per-book flow
//!
//! detect → (initialize the book with an inferred title) → marks →
//! materials. Records are deduplicated by name, so re-running a migration
//! skips what is already there instead of duplicating it.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::identity::{derive_book_id, legacy_book_matches};
use crate::marks::{chapter_span, MarkAnalysis, MarkMode, MarkRepository, UnifiedMark};
use crate::models::{BookInfo, ChapterRange, Character, LineType, PreciseRange, Source, StoryUnit};
use crate::storage::{StoreError, StoreResult};
use crate::store::RecordStore;

/// A mark as written by the legacy store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyMark {
    pub id: String,
    #[serde(alias = "bookID")]
    pub book_id: String,
    #[serde(alias = "bookName")]
    pub book_title: String,
    pub mode: String,
    #[serde(alias = "type")]
    pub mark_type: String,
    pub subtype: Option<String>,
    #[serde(alias = "title")]
    pub name: String,
    pub range: Option<PreciseRange>,
    /// 1-based, used when `range` is absent
    pub chapter_start: Option<u32>,
    pub chapter_end: Option<u32>,
    #[serde(alias = "text")]
    pub content: String,
    pub characters: Vec<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    pub line_type: Option<LineType>,
    #[serde(alias = "note")]
    pub notes: String,
    pub color: Option<String>,
    pub analysis: Option<Value>,
    pub analysis_template: Option<String>,
    /// Milliseconds since the epoch
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl LegacyMark {
    fn mode(&self) -> MarkMode {
        MarkMode::parse(&self.mode)
            .or_else(|| MarkMode::parse(&self.mark_type))
            .unwrap_or_default()
    }

    fn precise_range(&self) -> PreciseRange {
        self.range.unwrap_or_else(|| {
            let start = self.chapter_start.unwrap_or(1);
            chapter_span(ChapterRange::new(start, self.chapter_end.unwrap_or(start)))
        })
    }

    fn to_story_unit(&self) -> StoryUnit {
        let range = self.precise_range();
        let mut unit = StoryUnit::new(self.name.clone(), range.chapter_range(), Source::Manual);
        unit.unit_id = self.id.clone();
        unit.precise_range = Some(range);
        unit.line_type = self.line_type.unwrap_or_default();
        unit.categories = self.categories.clone();
        unit.related_characters = self.characters.clone();
        unit.text_content = self.content.clone();
        unit.analysis_template = self.analysis_template.clone();
        unit.ai_analysis = self.analysis.clone();
        unit.tags = self.tags.clone();
        unit.notes = self.notes.clone();
        unit.style.color = self.color.clone();
        unit
    }

    fn to_unified_mark(&self, book_path: &Path) -> UnifiedMark {
        let mut mark = UnifiedMark::new(book_path, self.mode(), self.name.clone(), self.precise_range());
        mark.id = self.id.clone();
        if !self.mark_type.is_empty() {
            mark.mark_type = self.mark_type.clone();
        }
        mark.subtype = self.subtype.clone();
        mark.content = self.content.clone();
        mark.associations.characters = self.characters.clone();
        mark.associations.tags = self.tags.clone();
        mark.associations.categories = self.categories.clone();
        mark.associations.line_type = self.line_type;
        mark.associations.notes = self.notes.clone();
        mark.style.color = self.color.clone();
        if self.analysis.is_some() || self.analysis_template.is_some() {
            mark.analysis = Some(MarkAnalysis {
                template: self.analysis_template.clone(),
                result: self.analysis.clone(),
            });
        }
        if let Some(created) = self.created_at.and_then(from_millis) {
            mark.created_at = created;
            mark.updated_at = self.updated_at.and_then(from_millis).unwrap_or(created).max(created);
        }
        mark
    }
}

/// A cross-book material item from the legacy global file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct LegacyMaterial {
    pub id: String,
    #[serde(alias = "bookId")]
    pub source_book_id: String,
    #[serde(alias = "type")]
    pub material_type: String,
    #[serde(alias = "title")]
    pub name: String,
    #[serde(alias = "description")]
    pub content: String,
    pub aliases: Vec<String>,
    pub tags: Vec<String>,
    pub created_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MaterialsFile {
    List(Vec<LegacyMaterial>),
    Wrapped { materials: Vec<LegacyMaterial> },
}

/// Legacy files found in the vault
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LegacyDetection {
    pub has_legacy_marks: bool,
    pub has_legacy_materials: bool,
    pub mark_files: Vec<PathBuf>,
    pub materials_file: Option<PathBuf>,
}

impl LegacyDetection {
    pub fn found(&self) -> bool {
        self.has_legacy_marks || self.has_legacy_materials
    }
}

/// Outcome of migrating one book
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    /// True iff `errors` is empty
    pub success: bool,
    pub book_path: PathBuf,
    pub migrated_count: usize,
    pub skipped_count: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl MigrationResult {
    fn new(book_path: &Path) -> Self {
        Self {
            success: true,
            book_path: book_path.to_path_buf(),
            migrated_count: 0,
            skipped_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn finish(mut self) -> Self {
        self.success = self.errors.is_empty();
        self
    }
}

/// Outcome of migrating a whole library
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BatchMigrationResult {
    pub successful_books: usize,
    pub failed_books: usize,
    pub results: BTreeMap<PathBuf, MigrationResult>,
}

/// Legacy data gathered for one book
#[derive(Default)]
struct BookLegacyData {
    marks: Vec<LegacyMark>,
    materials: Vec<LegacyMaterial>,
    errors: Vec<String>,
}

impl BookLegacyData {
    fn is_empty(&self) -> bool {
        self.marks.is_empty() && self.materials.is_empty()
    }

    fn inferred_title(&self) -> Option<String> {
        self.marks
            .iter()
            .map(|m| m.book_title.trim())
            .find(|t| !t.is_empty())
            .map(str::to_string)
    }
}

pub struct MigrationService {
    store: Arc<RecordStore>,
    marks: MarkRepository,
}

impl MigrationService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        let marks = MarkRepository::new(store.clone());
        Self { store, marks }
    }

    /// Look for legacy mark files and the materials file. Never writes.
    pub fn detect_legacy_data(&self) -> LegacyDetection {
        let config = self.store.config();
        let vault = self.store.vault();
        let mut detection = LegacyDetection::default();

        let dir = &config.legacy_marks_dir;
        if vault.exists(dir) {
            match vault.list(dir) {
                Ok(entries) => {
                    detection.mark_files = entries
                        .into_iter()
                        .filter(|e| !e.is_dir && e.path != config.legacy_materials_file)
                        .filter(|e| e.path.extension().is_some_and(|ext| ext == "json"))
                        .map(|e| e.path)
                        .collect();
                }
                Err(e) => warn!(path = ?dir, error = %e, "Cannot list legacy marks folder"),
            }
        }
        detection.has_legacy_marks = !detection.mark_files.is_empty();

        if vault.exists(&config.legacy_materials_file) {
            detection.has_legacy_materials = true;
            detection.materials_file = Some(config.legacy_materials_file.clone());
        }

        debug!(
            mark_files = detection.mark_files.len(),
            materials = detection.has_legacy_materials,
            "Detected legacy data"
        );
        detection
    }

    /// Parse a legacy marks file; `None` if it is missing or malformed
    pub fn read_legacy_marks(&self, path: &Path) -> Option<Vec<LegacyMark>> {
        match self.load_legacy_marks(path) {
            Ok(marks) => marks,
            Err(e) => {
                warn!(path = ?path, error = %e, "Ignoring malformed legacy marks file");
                None
            }
        }
    }

    /// Parse the legacy materials file; `None` if it is missing or malformed
    pub fn read_legacy_global_materials(&self) -> Option<Vec<LegacyMaterial>> {
        let path = &self.store.config().legacy_materials_file;
        match self.load_legacy_materials(path) {
            Ok(materials) => materials,
            Err(e) => {
                warn!(path = ?path, error = %e, "Ignoring malformed legacy materials file");
                None
            }
        }
    }

    /// Migrate one book's legacy marks and materials.
    ///
    /// Never fails outright; problems land in the result's `errors` and
    /// `warnings`.
    pub fn migrate_from_legacy(&self, book_path: &Path) -> MigrationResult {
        let mut result = MigrationResult::new(book_path);

        let book_id = match self.store.get_book_id(book_path) {
            Ok(Some(id)) => id,
            Ok(None) => derive_book_id(book_path),
            Err(e) => {
                result.errors.push(format!("Cannot read book metadata: {}", e));
                return result.finish();
            }
        };

        let data = self.gather(&book_id);
        result.errors.extend(data.errors.iter().cloned());
        if data.is_empty() {
            if result.errors.is_empty() {
                result.warnings.push("No legacy data for this book".to_string());
            }
            return result.finish();
        }

        if !self.store.is_database_initialized(book_path) {
            let title = data.inferred_title().unwrap_or_default();
            if let Err(e) = self.store.initialize_database(book_path, &BookInfo::titled(title)) {
                error!(path = ?book_path, error = %e, "Cannot initialize book for migration");
                result.errors.push(format!("Cannot initialize book: {}", e));
                return result.finish();
            }
        }

        if let Err(e) = self.migrate_marks(book_path, &data.marks, &mut result) {
            result.errors.push(format!("Marks: {}", e));
        }
        if let Err(e) = self.migrate_materials(book_path, &data.materials, &mut result) {
            result.errors.push(format!("Materials: {}", e));
        }

        let result = result.finish();
        info!(
            path = ?book_path,
            migrated = result.migrated_count,
            skipped = result.skipped_count,
            errors = result.errors.len(),
            "Migrated legacy data"
        );
        result
    }

    /// Migrate every book folder under `library_root`, one at a time.
    /// A failing book never stops the others.
    pub fn migrate_all_books(&self, library_root: &Path) -> BatchMigrationResult {
        let mut batch = BatchMigrationResult::default();

        for book_path in self.find_books(library_root) {
            let result = self.migrate_from_legacy(&book_path);
            if result.success {
                batch.successful_books += 1;
            } else {
                warn!(path = ?book_path, errors = ?result.errors, "Book migration failed");
                batch.failed_books += 1;
            }
            batch.results.insert(book_path, result);
        }

        info!(
            successful = batch.successful_books,
            failed = batch.failed_books,
            "Library migration finished"
        );
        batch
    }

    /// Whether the book has legacy data that is not migrated yet
    pub fn needs_migration(&self, book_path: &Path) -> bool {
        let book_id = match self.store.get_book_id(book_path) {
            Ok(Some(id)) => id,
            Ok(None) => derive_book_id(book_path),
            Err(_) => return false,
        };

        let data = self.gather(&book_id);
        if data.is_empty() {
            return false;
        }
        if !self.store.is_database_initialized(book_path) {
            return true;
        }

        let unit_names = match self.store.get_story_units(book_path) {
            Ok(units) => units.into_iter().map(|u| u.name).collect::<HashSet<_>>(),
            Err(_) => return true,
        };
        let blob_ids = match self.marks.blobs().list(book_path) {
            Ok(marks) => marks.into_iter().map(|m| m.id).collect::<HashSet<_>>(),
            Err(_) => return true,
        };

        // Unnamed story-unit marks are never migrated
        data.marks.iter().any(|m| match m.mode() {
            MarkMode::StoryUnit => !m.name.trim().is_empty() && !unit_names.contains(&m.name),
            _ => !blob_ids.contains(&m.id),
        })
    }

    /// Book folders directly under `library_root` that carry a marker file
    pub fn find_books(&self, library_root: &Path) -> Vec<PathBuf> {
        let vault = self.store.vault();
        let markers = &self.store.config().book_marker_files;

        let entries = match vault.list(library_root) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = ?library_root, error = %e, "Cannot list library");
                return Vec::new();
            }
        };

        entries
            .into_iter()
            .filter(|e| e.is_dir)
            .filter(|e| markers.iter().any(|m| vault.exists(&e.path.join(m))))
            .map(|e| e.path)
            .collect()
    }

    fn load_legacy_marks(&self, path: &Path) -> Result<Option<Vec<LegacyMark>>, String> {
        let vault = self.store.vault();
        if !vault.exists(path) {
            return Ok(None);
        }
        let text = vault.read(path).map_err(|e| e.to_string())?;
        let keyed: BTreeMap<String, LegacyMark> =
            serde_json::from_str(&text).map_err(|e| e.to_string())?;

        Ok(Some(
            keyed
                .into_iter()
                .map(|(key, mut mark)| {
                    if mark.id.is_empty() {
                        mark.id = key;
                    }
                    mark
                })
                .collect(),
        ))
    }

    fn load_legacy_materials(&self, path: &Path) -> Result<Option<Vec<LegacyMaterial>>, String> {
        let vault = self.store.vault();
        if !vault.exists(path) {
            return Ok(None);
        }
        let text = vault.read(path).map_err(|e| e.to_string())?;
        let file: MaterialsFile = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        Ok(Some(match file {
            MaterialsFile::List(materials) | MaterialsFile::Wrapped { materials } => materials,
        }))
    }

    /// Collect the legacy records that belong to `book_id`
    fn gather(&self, book_id: &str) -> BookLegacyData {
        let detection = self.detect_legacy_data();
        let mut data = BookLegacyData::default();

        for path in &detection.mark_files {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !legacy_book_matches(&stem, book_id) {
                continue;
            }
            match self.load_legacy_marks(path) {
                Ok(Some(marks)) => data.marks.extend(marks.into_iter().filter(|m| {
                    m.book_id.is_empty() || legacy_book_matches(&m.book_id, book_id)
                })),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = ?path, error = %e, "Malformed legacy marks file");
                    data.errors
                        .push(format!("Malformed legacy file {}: {}", path.display(), e));
                }
            }
        }

        if let Some(path) = &detection.materials_file {
            match self.load_legacy_materials(path) {
                Ok(Some(materials)) => data.materials.extend(
                    materials
                        .into_iter()
                        .filter(|m| legacy_book_matches(&m.source_book_id, book_id)),
                ),
                Ok(None) => {}
                // Shared by every book; a broken file must not fail them all
                Err(e) => warn!(path = ?path, error = %e, "Ignoring malformed legacy materials file"),
            }
        }

        data
    }

    fn migrate_marks(
        &self,
        book_path: &Path,
        marks: &[LegacyMark],
        result: &mut MigrationResult,
    ) -> StoreResult<()> {
        let mut unit_names: HashSet<String> = self
            .store
            .get_story_units(book_path)?
            .into_iter()
            .map(|u| u.name)
            .collect();
        let blob_ids: HashSet<String> = self
            .marks
            .blobs()
            .list(book_path)?
            .into_iter()
            .map(|m| m.id)
            .collect();
        let mut blob_marks = Vec::new();

        for mark in marks {
            if mark.mode() != MarkMode::StoryUnit {
                if blob_ids.contains(&mark.id) {
                    result.skipped_count += 1;
                    continue;
                }
                blob_marks.push(mark.to_unified_mark(book_path));
                continue;
            }

            if mark.name.trim().is_empty() {
                result.skipped_count += 1;
                result
                    .warnings
                    .push(format!("Skipped unnamed story unit mark '{}'", mark.id));
                continue;
            }
            if unit_names.contains(&mark.name) {
                result.skipped_count += 1;
                result
                    .warnings
                    .push(format!("Story unit '{}' already exists, skipped", mark.name));
                continue;
            }

            match self.store.add_story_unit(book_path, mark.to_story_unit()) {
                Ok(_) => {
                    unit_names.insert(mark.name.clone());
                    result.migrated_count += 1;
                }
                Err(StoreError::DuplicateId { .. }) => {
                    result.skipped_count += 1;
                    result
                        .warnings
                        .push(format!("Story unit id '{}' already exists, skipped", mark.id));
                }
                Err(e) => {
                    result
                        .errors
                        .push(format!("Story unit '{}': {}", mark.name, e));
                }
            }
        }

        self.marks.blobs().put_all(book_path, &blob_marks)?;
        result.migrated_count += blob_marks.len();
        Ok(())
    }

    fn migrate_materials(
        &self,
        book_path: &Path,
        materials: &[LegacyMaterial],
        result: &mut MigrationResult,
    ) -> StoreResult<()> {
        if materials.is_empty() {
            return Ok(());
        }

        let mut names: HashSet<String> = self
            .store
            .get_characters(book_path)?
            .into_iter()
            .map(|c| c.name)
            .collect();

        for material in materials {
            if !material.material_type.eq_ignore_ascii_case("character") {
                result.skipped_count += 1;
                result.warnings.push(format!(
                    "Material '{}' of type '{}' has no record type, skipped",
                    material.name, material.material_type
                ));
                continue;
            }
            if material.name.trim().is_empty() || names.contains(&material.name) {
                result.skipped_count += 1;
                result
                    .warnings
                    .push(format!("Character '{}' already exists, skipped", material.name));
                continue;
            }

            let mut character = Character::new(material.name.clone(), Source::Manual);
            character.aliases = material.aliases.clone();
            character.tags = material.tags.clone();
            character.ai_description = material.content.clone();

            match self.store.add_character(book_path, character) {
                Ok(_) => {
                    names.insert(material.name.clone());
                    result.migrated_count += 1;
                }
                Err(e) => result
                    .errors
                    .push(format!("Character '{}': {}", material.name, e)),
            }
        }

        Ok(())
    }
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}
