//! Analysis sync
//!
//! Folds an `AnalysisResult` into the record store in three steps:
//! BookMeta, characters, chapter summaries.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::identity::chapter_id;
use crate::models::{BookInfo, Character, CharacterRole, Relationship, Source, StoryEvent};
use crate::storage::StoreResult;

use super::conflict::{Conflict, ConflictType};
use super::{SyncResult, SyncService};

/// Structured output of a whole-book analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisResult {
    /// Title used when the book has to be initialized
    pub title: String,
    pub author: String,
    pub synopsis: String,
    pub characters: Vec<AnalyzedCharacter>,
    pub writing_techniques: Vec<String>,
    pub takeaways: Vec<String>,
    pub chapter_summaries: Vec<ChapterSummary>,
}

/// One character as seen by the analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzedCharacter {
    pub name: String,
    pub role: String,
    pub description: String,
    pub motivation: String,
    pub growth_arc: String,
    /// Only applied when the character is new
    pub relationships: Vec<Relationship>,
}

/// Summary of one chapter, addressed by its 1-based number
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ChapterSummary {
    #[serde(alias = "chapter", alias = "chapterNumber")]
    pub chapter_num: u32,
    pub summary: String,
    pub key_events: Vec<String>,
}

impl SyncService {
    /// Merge an analysis result into the book.
    ///
    /// Never fails outright: per-item problems land in `errors`, overwritten
    /// manual values land in `conflicts`, and `success` turns false only if
    /// the book could not be prepared at all.
    pub fn sync_analysis_result(&self, book_path: &Path, analysis: &AnalysisResult) -> SyncResult {
        let mut result = SyncResult::new();

        if let Err(e) = self.sync_book_meta(book_path, analysis, &mut result) {
            error!(path = ?book_path, error = %e, "Analysis sync aborted");
            result.success = false;
            result.errors.push(format!("Book metadata: {}", e));
            return result;
        }

        for character in &analysis.characters {
            if character.name.trim().is_empty() {
                result.errors.push("Skipped character without a name".to_string());
                continue;
            }
            match self.sync_character(book_path, character, &mut result) {
                Ok(()) => result.synced_count += 1,
                Err(e) => {
                    warn!(name = %character.name, error = %e, "Character sync failed");
                    result.errors.push(format!("Character '{}': {}", character.name, e));
                }
            }
        }

        if let Err(e) = self.sync_chapter_summaries(book_path, analysis, &mut result) {
            warn!(error = %e, "Chapter summary sync failed");
            result.errors.push(format!("Chapter summaries: {}", e));
        }

        info!(
            path = ?book_path,
            synced = result.synced_count,
            conflicts = result.conflicts.len(),
            errors = result.errors.len(),
            "Synced analysis result"
        );
        result
    }

    /// Store a story unit's analysis and replace its derived events
    pub fn sync_story_unit_analysis(
        &self,
        book_path: &Path,
        unit_id: &str,
        analysis: Value,
        events: Vec<StoryEvent>,
    ) -> SyncResult {
        let mut result = SyncResult::new();

        let unit = match self.store.get_story_unit(book_path, unit_id) {
            Ok(Some(unit)) => unit,
            Ok(None) => {
                result.success = false;
                result.errors.push(format!("Story unit '{}' not found", unit_id));
                return result;
            }
            Err(e) => {
                result.success = false;
                result.errors.push(e.to_string());
                return result;
            }
        };

        if unit.source == Source::Manual {
            if let Some(existing) = unit.ai_analysis.as_ref().filter(|v| **v != analysis) {
                result.conflicts.push(Conflict::new(
                    ConflictType::StoryUnit,
                    unit_id,
                    "aiAnalysis",
                    existing.clone(),
                    analysis.clone(),
                ));
            }
        }

        match self
            .store
            .update_story_unit(book_path, unit_id, |u| u.ai_analysis = Some(analysis))
        {
            Ok(_) => result.synced_count += 1,
            Err(e) => {
                result.success = false;
                result.errors.push(e.to_string());
                return result;
            }
        }

        let event_count = events.len();
        match self.store.replace_events_for_unit(book_path, unit_id, events) {
            Ok(_) => result.synced_count += event_count,
            Err(e) => result.errors.push(format!("Events: {}", e)),
        }

        result
    }

    fn sync_book_meta(
        &self,
        book_path: &Path,
        analysis: &AnalysisResult,
        result: &mut SyncResult,
    ) -> StoreResult<()> {
        let Some(meta) = self.store.get_book_meta(book_path)? else {
            let info = BookInfo {
                title: analysis.title.clone(),
                author: analysis.author.clone(),
                description: String::new(),
            };
            self.store.initialize_database(book_path, &info)?;
            self.store.update_book_meta(book_path, |meta| {
                meta.ai_synopsis = analysis.synopsis.clone();
                meta.ai_writing_techniques = analysis.writing_techniques.clone();
                meta.ai_takeaways = analysis.takeaways.clone();
            })?;
            result.synced_count += 1;
            return Ok(());
        };

        if !analysis.synopsis.is_empty()
            && !meta.ai_synopsis.is_empty()
            && meta.ai_synopsis != analysis.synopsis
        {
            result.conflicts.push(Conflict::new(
                ConflictType::BookMeta,
                &meta.book_id,
                "aiSynopsis",
                json!(meta.ai_synopsis),
                json!(analysis.synopsis),
            ));
        }
        for (field, existing, incoming) in [
            ("aiWritingTechniques", &meta.ai_writing_techniques, &analysis.writing_techniques),
            ("aiTakeaways", &meta.ai_takeaways, &analysis.takeaways),
        ] {
            if !incoming.is_empty() && !existing.is_empty() && existing != incoming {
                result.conflicts.push(Conflict::new(
                    ConflictType::BookMeta,
                    &meta.book_id,
                    field,
                    json!(existing),
                    json!(incoming),
                ));
            }
        }

        self.store.update_book_meta(book_path, |meta| {
            if !analysis.synopsis.is_empty() {
                meta.ai_synopsis = analysis.synopsis.clone();
            }
            if !analysis.writing_techniques.is_empty() {
                meta.ai_writing_techniques = analysis.writing_techniques.clone();
            }
            if !analysis.takeaways.is_empty() {
                meta.ai_takeaways = analysis.takeaways.clone();
            }
        })?;
        result.synced_count += 1;
        Ok(())
    }

    fn sync_character(
        &self,
        book_path: &Path,
        incoming: &AnalyzedCharacter,
        result: &mut SyncResult,
    ) -> StoreResult<()> {
        let Some(existing) = self.store.find_character_by_name(book_path, &incoming.name)? else {
            let mut character = Character::new(incoming.name.clone(), Source::Ai);
            character.role = CharacterRole::parse_lenient(&incoming.role);
            character.ai_description = incoming.description.clone();
            character.ai_motivation = incoming.motivation.clone();
            character.ai_growth_arc = incoming.growth_arc.clone();
            character.relationships = incoming.relationships.clone();
            let id = self.store.add_character(book_path, character)?;
            debug!(id = %id, name = %incoming.name, "Added AI character");
            return Ok(());
        };

        if existing.source == Source::Manual
            && !existing.ai_description.is_empty()
            && !incoming.description.is_empty()
            && existing.ai_description != incoming.description
        {
            result.conflicts.push(Conflict::new(
                ConflictType::Character,
                &existing.character_id,
                "aiDescription",
                json!(existing.ai_description),
                json!(incoming.description),
            ));
        }

        // AI-derived fields only; names, aliases, tags and relationships
        // belong to the user
        self.store
            .update_character(book_path, &existing.character_id, |c| {
                if !incoming.role.trim().is_empty() {
                    c.role = CharacterRole::parse_lenient(&incoming.role);
                }
                if !incoming.description.is_empty() {
                    c.ai_description = incoming.description.clone();
                }
                if !incoming.motivation.is_empty() {
                    c.ai_motivation = incoming.motivation.clone();
                }
                if !incoming.growth_arc.is_empty() {
                    c.ai_growth_arc = incoming.growth_arc.clone();
                }
            })?;
        Ok(())
    }

    fn sync_chapter_summaries(
        &self,
        book_path: &Path,
        analysis: &AnalysisResult,
        result: &mut SyncResult,
    ) -> StoreResult<()> {
        if analysis.chapter_summaries.is_empty() {
            return Ok(());
        }

        let book_id = self.store.get_book_id(book_path)?.unwrap_or_default();
        let chapters = self.store.get_chapters(book_path)?;

        for summary in &analysis.chapter_summaries {
            let Some(chapter) = chapters.iter().find(|c| c.chapter_num == summary.chapter_num) else {
                debug!(chapter = summary.chapter_num, "No chapter file for summary, skipping");
                continue;
            };

            let mut fm = chapter.clone();
            if fm.book_id.is_empty() {
                fm.book_id = book_id.clone();
            }
            if fm.chapter_id.is_empty() && !fm.book_id.is_empty() {
                fm.chapter_id = chapter_id(&fm.book_id, fm.chapter_num);
            }
            fm.ai_summary = Some(summary.summary.clone());
            fm.ai_key_events = summary.key_events.clone();

            match self.store.update_chapter_frontmatter(&chapter.file_path, &fm) {
                Ok(true) => result.synced_count += 1,
                Ok(false) => debug!(path = ?chapter.file_path, "Chapter vanished before summary write"),
                Err(e) => {
                    warn!(path = ?chapter.file_path, error = %e, "Failed to write chapter summary");
                    result
                        .errors
                        .push(format!("Chapter {}: {}", summary.chapter_num, e));
                }
            }
        }

        Ok(())
    }
}
