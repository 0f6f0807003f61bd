//! Mark data model
//!
//! A [`UnifiedMark`] is one annotation on the text of a book. Story-unit
//! marks map onto [`StoryUnit`] records; every other mode lives in the
//! per-book mark blob.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ChapterRange, LineType, PreciseRange, Source, StoryUnit, TextPosition};

/// Kind of annotation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum MarkMode {
    StoryUnit,
    #[default]
    Highlight,
    Comment,
    Bookmark,
    Material,
}

impl MarkMode {
    pub fn label(&self) -> &'static str {
        match self {
            MarkMode::StoryUnit => "story-unit",
            MarkMode::Highlight => "highlight",
            MarkMode::Comment => "comment",
            MarkMode::Bookmark => "bookmark",
            MarkMode::Material => "material",
        }
    }

    /// Parse a mode label; unknown labels yield `None`
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim() {
            "story-unit" | "storyUnit" | "story_unit" => Some(MarkMode::StoryUnit),
            "highlight" => Some(MarkMode::Highlight),
            "comment" => Some(MarkMode::Comment),
            "bookmark" => Some(MarkMode::Bookmark),
            "material" => Some(MarkMode::Material),
            _ => None,
        }
    }
}

/// Free-form links from a mark to the rest of the book
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkAssociations {
    pub characters: Vec<String>,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_type: Option<LineType>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub notes: String,
}

/// Partial update of [`MarkAssociations`]; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssociationsPatch {
    pub characters: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub line_type: Option<LineType>,
    pub notes: Option<String>,
}

impl MarkAssociations {
    pub fn apply(&mut self, patch: AssociationsPatch) {
        if let Some(characters) = patch.characters {
            self.characters = characters;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(categories) = patch.categories {
            self.categories = categories;
        }
        if patch.line_type.is_some() {
            self.line_type = patch.line_type;
        }
        if let Some(notes) = patch.notes {
            self.notes = notes;
        }
    }
}

/// Visual style; unset fields fall back to the host's defaults.
///
/// Doubles as its own patch type: merging copies the fields that are set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkStyle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub underline: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl MarkStyle {
    pub fn is_unset(&self) -> bool {
        *self == MarkStyle::default()
    }

    pub fn merge(&mut self, patch: MarkStyle) {
        if patch.color.is_some() {
            self.color = patch.color;
        }
        if patch.opacity.is_some() {
            self.opacity = patch.opacity;
        }
        if patch.underline.is_some() {
            self.underline = patch.underline;
        }
        if patch.icon.is_some() {
            self.icon = patch.icon;
        }
    }
}

/// Analysis attached to a mark
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MarkAnalysis {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// One annotation on a book's text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedMark {
    pub id: String,
    pub book_path: PathBuf,
    pub mode: MarkMode,
    #[serde(default)]
    pub mark_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default)]
    pub name: String,
    /// 0-based chapter/line/char span
    #[serde(default)]
    pub range: PreciseRange,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub associations: MarkAssociations,
    #[serde(default)]
    pub style: MarkStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<MarkAnalysis>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UnifiedMark {
    /// A new mark without an id; the marking service assigns one
    pub fn new(
        book_path: impl Into<PathBuf>,
        mode: MarkMode,
        name: impl Into<String>,
        range: PreciseRange,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            book_path: book_path.into(),
            mode,
            mark_type: mode.label().to_string(),
            subtype: None,
            name: name.into(),
            range,
            content: String::new(),
            associations: MarkAssociations::default(),
            style: MarkStyle::default(),
            analysis: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_story_unit(&self) -> bool {
        self.mode == MarkMode::StoryUnit
    }

    /// The 1-based chapter span covered by the mark
    pub fn chapter_range(&self) -> ChapterRange {
        self.range.chapter_range()
    }

    /// A new StoryUnit record backing a story-unit mark
    pub fn to_story_unit(&self) -> StoryUnit {
        let mut unit = StoryUnit::new(self.name.clone(), self.chapter_range(), Source::Manual);
        unit.unit_id = self.id.clone();
        self.apply_to_story_unit(&mut unit);
        unit.created_at = self.created_at;
        unit.updated_at = self.updated_at;
        unit
    }

    /// Copy the fields a mark carries onto an existing StoryUnit.
    ///
    /// `source` is left alone, and the unit's analysis is only replaced
    /// when the mark has one.
    pub fn apply_to_story_unit(&self, unit: &mut StoryUnit) {
        unit.name = self.name.clone();
        unit.chapter_range = self.chapter_range();
        unit.precise_range = Some(self.range);
        unit.line_type = self.associations.line_type.unwrap_or_default();
        unit.categories = self.associations.categories.clone();
        unit.related_characters = self.associations.characters.clone();
        unit.text_content = self.content.clone();
        unit.tags = self.associations.tags.clone();
        unit.notes = self.associations.notes.clone();
        unit.style = self.style.clone();
        unit.mark_type = (self.mark_type != MarkMode::StoryUnit.label() && !self.mark_type.is_empty())
            .then(|| self.mark_type.clone());
        if let Some(analysis) = &self.analysis {
            unit.analysis_template = analysis.template.clone();
            unit.ai_analysis = analysis.result.clone();
        }
    }

    /// View a StoryUnit record as a story-unit mark
    pub fn from_story_unit(unit: &StoryUnit, book_path: impl Into<PathBuf>) -> Self {
        let range = unit.precise_range.unwrap_or_else(|| chapter_span(unit.chapter_range));
        let analysis = if unit.analysis_template.is_some() || unit.ai_analysis.is_some() {
            Some(MarkAnalysis {
                template: unit.analysis_template.clone(),
                result: unit.ai_analysis.clone(),
            })
        } else {
            None
        };

        Self {
            id: unit.unit_id.clone(),
            book_path: book_path.into(),
            mode: MarkMode::StoryUnit,
            mark_type: unit
                .mark_type
                .clone()
                .unwrap_or_else(|| MarkMode::StoryUnit.label().to_string()),
            subtype: Some(unit.line_type.label().to_string()),
            name: unit.name.clone(),
            range,
            content: unit.text_content.clone(),
            associations: MarkAssociations {
                characters: unit.related_characters.clone(),
                tags: unit.tags.clone(),
                categories: unit.categories.clone(),
                line_type: Some(unit.line_type),
                notes: unit.notes.clone(),
            },
            style: unit.style.clone(),
            analysis,
            created_at: unit.created_at,
            updated_at: unit.updated_at,
        }
    }
}

/// Precise range covering whole chapters of a 1-based range
pub fn chapter_span(range: ChapterRange) -> PreciseRange {
    PreciseRange {
        start: TextPosition {
            chapter_index: range.start_index(),
            line: 0,
            ch: 0,
        },
        end: TextPosition {
            chapter_index: range.end_index(),
            line: 0,
            ch: 0,
        },
    }
}

/// Partial update of a mark.
///
/// Top-level fields replace the stored value; `associations` and `style`
/// merge into it field by field.
#[derive(Debug, Clone, Default)]
pub struct MarkPatch {
    pub name: Option<String>,
    pub mark_type: Option<String>,
    pub subtype: Option<String>,
    pub range: Option<PreciseRange>,
    pub content: Option<String>,
    pub associations: Option<AssociationsPatch>,
    pub style: Option<MarkStyle>,
    pub analysis: Option<MarkAnalysis>,
}

impl MarkPatch {
    pub fn apply(self, mark: &mut UnifiedMark) {
        if let Some(name) = self.name {
            mark.name = name;
        }
        if let Some(mark_type) = self.mark_type {
            mark.mark_type = mark_type;
        }
        if self.subtype.is_some() {
            mark.subtype = self.subtype;
        }
        if let Some(range) = self.range {
            mark.range = range;
        }
        if let Some(content) = self.content {
            mark.content = content;
        }
        if let Some(associations) = self.associations {
            mark.associations.apply(associations);
        }
        if let Some(style) = self.style {
            mark.style.merge(style);
        }
        if self.analysis.is_some() {
            mark.analysis = self.analysis;
        }
    }
}
