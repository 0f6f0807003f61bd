//! Data models for tome
//!
//! Defines the typed entities of one book: BookMeta, Character, StoryUnit,
//! StoryEvent and ChapterFrontmatter. Field names serialize in camelCase,
//! which is also the key naming of the header blocks on disk.
//!
//! Chapter numbers in [`ChapterRange`] are 1-based and inclusive; the
//! positions inside a [`PreciseRange`] are 0-based. Conversions between the
//! two live here and are only called at the store boundary.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::marks::MarkStyle;
use crate::storage::TableRecord;

/// Who produced a record's analytical fields
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    #[default]
    Manual,
    Ai,
}

/// Narrative role of a character
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CharacterRole {
    Protagonist,
    Antagonist,
    #[default]
    Supporting,
    Minor,
}

impl CharacterRole {
    /// Parse a free-form role label, falling back to `Supporting`
    pub fn parse_lenient(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "protagonist" | "main" | "lead" | "hero" => CharacterRole::Protagonist,
            "antagonist" | "villain" => CharacterRole::Antagonist,
            "minor" | "background" | "cameo" => CharacterRole::Minor,
            _ => CharacterRole::Supporting,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CharacterRole::Protagonist => "protagonist",
            CharacterRole::Antagonist => "antagonist",
            CharacterRole::Supporting => "supporting",
            CharacterRole::Minor => "minor",
        }
    }
}

/// Plot line a story unit belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    #[default]
    Main,
    Sub,
    Independent,
    Custom,
}

impl LineType {
    pub fn label(&self) -> &'static str {
        match self {
            LineType::Main => "main",
            LineType::Sub => "sub",
            LineType::Independent => "independent",
            LineType::Custom => "custom",
        }
    }
}

/// Reading progress of a chapter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReadStatus {
    #[default]
    Unread,
    Reading,
    Finished,
}

/// Inclusive, 1-based chapter span
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChapterRange {
    pub start: u32,
    pub end: u32,
}

impl Default for ChapterRange {
    fn default() -> Self {
        Self { start: 1, end: 1 }
    }
}

impl ChapterRange {
    /// Build a range, clamping `start` to 1 and `end` to at least `start`
    pub fn new(start: u32, end: u32) -> Self {
        let start = start.max(1);
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Convert 0-based chapter indices to a 1-based range
    pub fn from_zero_based(start_index: u32, end_index: u32) -> Self {
        Self::new(start_index + 1, end_index + 1)
    }

    /// 0-based index of the first chapter
    pub fn start_index(&self) -> u32 {
        self.start.saturating_sub(1)
    }

    /// 0-based index of the last chapter
    pub fn end_index(&self) -> u32 {
        self.end.saturating_sub(1)
    }

    pub fn contains(&self, chapter_num: u32) -> bool {
        chapter_num >= self.start && chapter_num <= self.end
    }

    /// Number of chapters covered
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// A 0-based position inside the chapter text
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct TextPosition {
    pub chapter_index: u32,
    pub line: u32,
    pub ch: u32,
}

/// Exact text span (0-based chapter/line/char offsets)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct PreciseRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl PreciseRange {
    /// The 1-based chapter span this precise range touches
    pub fn chapter_range(&self) -> ChapterRange {
        ChapterRange::from_zero_based(self.start.chapter_index, self.end.chapter_index)
    }
}

/// Book-level metadata (one per book)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookMeta {
    pub book_id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub total_chapters: u32,
    #[serde(default)]
    pub total_words: u64,
    #[serde(default)]
    pub ai_synopsis: String,
    #[serde(default)]
    pub ai_writing_techniques: Vec<String>,
    #[serde(default)]
    pub ai_takeaways: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Descriptive fields supplied when a book is initialized
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookInfo {
    pub title: String,
    pub author: String,
    pub description: String,
}

impl BookInfo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// A relationship from one character to another
///
/// `target` holds the other character's id when known, otherwise its name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub target: String,
    #[serde(rename = "type", default)]
    pub relation_type: String,
    #[serde(default)]
    pub description: String,
}

/// A character of the book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    #[serde(default)]
    pub character_id: String,
    #[serde(default)]
    pub book_id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub role: CharacterRole,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    #[serde(default)]
    pub ai_description: String,
    #[serde(default)]
    pub ai_motivation: String,
    #[serde(default)]
    pub ai_growth_arc: String,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub first_appearance_chapter: Option<u32>,
    #[serde(default)]
    pub appearance_chapters: Vec<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Character {
    /// Create a character with the given name; the store assigns its ids
    pub fn new(name: impl Into<String>, source: Source) -> Self {
        let now = Utc::now();
        Self {
            character_id: String::new(),
            book_id: String::new(),
            name: name.into(),
            aliases: Vec::new(),
            tags: Vec::new(),
            role: CharacterRole::default(),
            relationships: Vec::new(),
            ai_description: String::new(),
            ai_motivation: String::new(),
            ai_growth_arc: String::new(),
            source,
            first_appearance_chapter: None,
            appearance_chapters: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether `name` is this character's name or one of its aliases
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.iter().any(|a| a == name)
    }
}

/// A story unit: a span of chapters analyzed as one narrative beat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryUnit {
    #[serde(default)]
    pub unit_id: String,
    #[serde(default)]
    pub book_id: String,
    pub name: String,
    #[serde(default)]
    pub chapter_range: ChapterRange,
    #[serde(default)]
    pub precise_range: Option<PreciseRange>,
    #[serde(default)]
    pub line_type: LineType,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub related_characters: Vec<String>,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub analysis_template: Option<String>,
    #[serde(default)]
    pub ai_analysis: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Source,
    /// Mark type when the unit was saved as a mark with a custom type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mark_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,
    #[serde(default, skip_serializing_if = "MarkStyle::is_unset")]
    pub style: MarkStyle,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoryUnit {
    /// Create a story unit over a chapter range; the store assigns its ids
    pub fn new(name: impl Into<String>, chapter_range: ChapterRange, source: Source) -> Self {
        let now = Utc::now();
        Self {
            unit_id: String::new(),
            book_id: String::new(),
            name: name.into(),
            chapter_range,
            precise_range: None,
            line_type: LineType::default(),
            categories: Vec::new(),
            related_characters: Vec::new(),
            text_content: String::new(),
            analysis_template: None,
            ai_analysis: None,
            source,
            mark_type: None,
            tags: Vec::new(),
            notes: String::new(),
            style: MarkStyle::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A narrative event, always derived from a story unit's analysis
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StoryEvent {
    #[serde(default)]
    pub event_id: String,
    #[serde(default)]
    pub book_id: String,
    pub story_unit_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Position of the event within its unit
    #[serde(default)]
    pub pseudo_time_order: i64,
    #[serde(default = "default_duration_span")]
    pub duration_span: u32,
    #[serde(default)]
    pub layer: u32,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub chapter_range: Option<ChapterRange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_duration_span() -> u32 {
    1
}

impl StoryEvent {
    pub fn new(story_unit_id: impl Into<String>, name: impl Into<String>, order: i64) -> Self {
        let now = Utc::now();
        Self {
            event_id: String::new(),
            book_id: String::new(),
            story_unit_id: story_unit_id.into(),
            name: name.into(),
            description: String::new(),
            pseudo_time_order: order,
            duration_span: default_duration_span(),
            layer: 0,
            color: String::new(),
            chapter_range: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Header block embedded at the top of each chapter file
///
/// Keys this crate does not know about are kept in `extra` so rewriting a
/// chapter header never drops fields another tool put there.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChapterFrontmatter {
    #[serde(default)]
    pub book_id: String,
    #[serde(default)]
    pub chapter_id: String,
    #[serde(default)]
    pub chapter_num: u32,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub word_count: u64,
    #[serde(default)]
    pub read_status: ReadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ai_key_events: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
    /// Vault path of the chapter file (not persisted)
    #[serde(skip)]
    pub file_path: PathBuf,
}

/// Stamp for `updatedAt`: now, but never earlier than `previous`
pub fn touch(previous: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(previous)
}

impl TableRecord for Character {
    const TABLE: &'static str = "characters";

    fn record_id(&self) -> &str {
        &self.character_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl TableRecord for StoryUnit {
    const TABLE: &'static str = "story_units";

    fn record_id(&self) -> &str {
        &self.unit_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}

impl TableRecord for StoryEvent {
    const TABLE: &'static str = "events";

    fn record_id(&self) -> &str {
        &self.event_id
    }

    fn display_name(&self) -> &str {
        &self.name
    }
}
