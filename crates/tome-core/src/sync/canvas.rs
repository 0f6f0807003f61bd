//! Canvas projection
//!
//! Maps the book's characters or story units onto a JSON Canvas graph.
//! Rows are fixed per role (characters) or line type (story units); each
//! row is laid out left to right on a regular grid.
//!
//! Re-projecting never moves a node the user has placed: existing node
//! geometry is merged back by node id before the file is written.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::models::{ChapterRange, Character, CharacterRole, LineType, Source, StoryUnit};
use crate::storage::{StoreError, StoreResult};

use super::{SyncResult, SyncService};

const NODE_WIDTH: f64 = 260.0;
const NODE_HEIGHT: f64 = 140.0;
const COLUMN_STEP: f64 = NODE_WIDTH + 80.0;
const ROW_STEP: f64 = NODE_HEIGHT + 100.0;

/// Which graph to project
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CanvasType {
    Character,
    Story,
}

impl CanvasType {
    pub fn label(&self) -> &'static str {
        match self {
            CanvasType::Character => "character",
            CanvasType::Story => "story",
        }
    }
}

impl FromStr for CanvasType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "character" | "characters" => Ok(CanvasType::Character),
            "story" | "stories" | "story-units" => Ok(CanvasType::Story),
            other => Err(format!("unknown canvas type '{}' (expected character or story)", other)),
        }
    }
}

impl fmt::Display for CanvasType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A JSON Canvas document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Canvas {
    #[serde(default)]
    pub nodes: Vec<CanvasNode>,
    #[serde(default)]
    pub edges: Vec<CanvasEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasNode {
    pub id: String,
    #[serde(rename = "type", default = "default_node_type")]
    pub node_type: String,
    #[serde(default)]
    pub text: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    /// Keys written by other canvas tools (file, url, label, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_node_type() -> String {
    "text".to_string()
}

impl CanvasNode {
    fn text_node(id: &str, text: String, x: f64, y: f64, color: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            node_type: default_node_type(),
            text,
            x,
            y,
            width: NODE_WIDTH,
            height: NODE_HEIGHT,
            color: color.map(str::to_string),
            extra: BTreeMap::new(),
        }
    }

    fn is_text(&self) -> bool {
        self.node_type == "text"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasEdge {
    pub id: String,
    pub from_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_side: Option<String>,
    pub to_node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_side: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Outcome of a store → canvas projection
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSyncResult {
    pub success: bool,
    pub path: PathBuf,
    pub node_count: usize,
    pub edge_count: usize,
    /// Nodes that kept the geometry of the previous canvas
    pub preserved_positions: usize,
    pub errors: Vec<String>,
}

/// An edit reported by the canvas editor
#[derive(Debug, Clone, PartialEq)]
pub enum CanvasChange {
    Added(CanvasNode),
    Updated(CanvasNode),
    Removed(String),
}

/// Entity name shown on a node: its first non-empty line without
/// heading or emphasis markers
pub fn entity_name(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.trim_start_matches('#').trim().trim_matches('*').trim().to_string())
        .unwrap_or_default()
}

fn role_row(role: CharacterRole) -> i64 {
    match role {
        CharacterRole::Protagonist => 0,
        CharacterRole::Antagonist => 1,
        CharacterRole::Supporting => 2,
        CharacterRole::Minor => 3,
    }
}

fn role_color(role: CharacterRole) -> &'static str {
    match role {
        CharacterRole::Protagonist => "4",
        CharacterRole::Antagonist => "1",
        CharacterRole::Supporting => "5",
        CharacterRole::Minor => "2",
    }
}

fn line_row(line_type: LineType) -> i64 {
    match line_type {
        LineType::Main => 0,
        LineType::Sub => 1,
        LineType::Independent => 2,
        LineType::Custom => 3,
    }
}

fn line_color(line_type: LineType) -> &'static str {
    match line_type {
        LineType::Main => "6",
        LineType::Sub => "3",
        LineType::Independent => "5",
        LineType::Custom => "2",
    }
}

fn character_text(character: &Character) -> String {
    let mut text = format!("# {}\n\n*{}*", character.name, character.role.label());
    if !character.aliases.is_empty() {
        text.push_str(&format!("\n\nAlso: {}", character.aliases.join(", ")));
    }
    if !character.ai_description.is_empty() {
        text.push_str("\n\n");
        text.push_str(&character.ai_description);
    }
    text
}

fn story_text(unit: &StoryUnit) -> String {
    let range = unit.chapter_range;
    let mut text = if range.start == range.end {
        format!("# {}\n\nChapter {}", unit.name, range.start)
    } else {
        format!("# {}\n\nChapters {}-{}", unit.name, range.start, range.end)
    };
    if !unit.related_characters.is_empty() {
        text.push_str(&format!("\n\nWith: {}", unit.related_characters.join(", ")));
    }
    text
}

/// Chapter span written by `story_text`, if the node still carries one
fn parse_chapter_line(text: &str) -> Option<ChapterRange> {
    text.lines().map(str::trim).find_map(|line| {
        if let Some(rest) = line.strip_prefix("Chapters ") {
            let (start, end) = rest.split_once('-')?;
            Some(ChapterRange::new(start.trim().parse().ok()?, end.trim().parse().ok()?))
        } else {
            let n = line.strip_prefix("Chapter ")?.trim().parse().ok()?;
            Some(ChapterRange::new(n, n))
        }
    })
}

fn edge_id(from: &str, to: &str) -> String {
    format!("{}->{}", from, to)
}

fn is_generated_edge(id: &str) -> bool {
    id.contains("->")
}

/// Lay out the character graph
fn character_canvas(characters: &[Character]) -> Canvas {
    let mut columns: HashMap<i64, i64> = HashMap::new();
    let mut nodes = Vec::with_capacity(characters.len());

    for character in characters {
        let row = role_row(character.role);
        let column = columns.entry(row).or_insert(0);
        nodes.push(CanvasNode::text_node(
            &character.character_id,
            character_text(character),
            *column as f64 * COLUMN_STEP,
            row as f64 * ROW_STEP,
            Some(role_color(character.role)),
        ));
        *column += 1;
    }

    let mut edges = Vec::new();
    let mut seen = HashSet::new();
    for character in characters {
        for relationship in &character.relationships {
            let Some(target) = characters
                .iter()
                .find(|c| c.character_id == relationship.target || c.answers_to(&relationship.target))
            else {
                continue;
            };
            if target.character_id == character.character_id {
                continue;
            }
            let id = edge_id(&character.character_id, &target.character_id);
            if !seen.insert(id.clone()) {
                continue;
            }
            edges.push(CanvasEdge {
                id,
                from_node: character.character_id.clone(),
                from_side: None,
                to_node: target.character_id.clone(),
                to_side: None,
                color: None,
                label: Some(relationship.relation_type.clone()).filter(|l| !l.is_empty()),
            });
        }
    }

    Canvas { nodes, edges }
}

/// Lay out the story graph: one row per line type, units in chapter order,
/// consecutive units of a row linked
fn story_canvas(units: &[StoryUnit]) -> Canvas {
    let mut rows: BTreeMap<i64, Vec<&StoryUnit>> = BTreeMap::new();
    for unit in units {
        rows.entry(line_row(unit.line_type)).or_default().push(unit);
    }

    let mut nodes = Vec::with_capacity(units.len());
    let mut edges = Vec::new();
    for (row, mut members) in rows {
        members.sort_by(|a, b| {
            a.chapter_range
                .start
                .cmp(&b.chapter_range.start)
                .then_with(|| a.name.cmp(&b.name))
        });

        for (column, unit) in members.iter().enumerate() {
            nodes.push(CanvasNode::text_node(
                &unit.unit_id,
                story_text(unit),
                column as f64 * COLUMN_STEP,
                row as f64 * ROW_STEP,
                Some(line_color(unit.line_type)),
            ));
        }

        for pair in members.windows(2) {
            edges.push(CanvasEdge {
                id: edge_id(&pair[0].unit_id, &pair[1].unit_id),
                from_node: pair[0].unit_id.clone(),
                from_side: Some("right".to_string()),
                to_node: pair[1].unit_id.clone(),
                to_side: Some("left".to_string()),
                color: Some(line_color(pair[0].line_type).to_string()),
                label: None,
            });
        }
    }

    Canvas { nodes, edges }
}

/// Carry geometry of `previous` into `fresh`; returns how many nodes kept
/// their position.
///
/// Non-text nodes of the previous canvas (groups, files, links) are user
/// content and carried over, as are hand-drawn edges between kept nodes.
/// Generated edges are always recomputed.
fn merge_layout(fresh: &mut Canvas, previous: Canvas) -> usize {
    let old: HashMap<&str, &CanvasNode> = previous.nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut preserved = 0;

    for node in &mut fresh.nodes {
        if let Some(prior) = old.get(node.id.as_str()) {
            node.x = prior.x;
            node.y = prior.y;
            node.width = prior.width;
            node.height = prior.height;
            preserved += 1;
        }
    }

    let fresh_ids: HashSet<String> = fresh.nodes.iter().map(|n| n.id.clone()).collect();
    let user_nodes: Vec<CanvasNode> = previous
        .nodes
        .iter()
        .filter(|n| !n.is_text() && !fresh_ids.contains(&n.id))
        .cloned()
        .collect();
    fresh.nodes.extend(user_nodes);

    let kept: HashSet<&str> = fresh.nodes.iter().map(|n| n.id.as_str()).collect();
    let fresh_edges: HashSet<String> = fresh.edges.iter().map(|e| e.id.clone()).collect();
    let user_edges: Vec<CanvasEdge> = previous
        .edges
        .iter()
        .filter(|e| {
            !is_generated_edge(&e.id)
                && !fresh_edges.contains(&e.id)
                && kept.contains(e.from_node.as_str())
                && kept.contains(e.to_node.as_str())
        })
        .cloned()
        .collect();
    fresh.edges.extend(user_edges);

    preserved
}

impl SyncService {
    /// Write the canvas file for `canvas_type` from the current records
    pub fn sync_database_to_canvas(&self, book_path: &Path, canvas_type: CanvasType) -> CanvasSyncResult {
        let path = self.store.config().canvas_path(book_path, canvas_type.label());
        let mut result = CanvasSyncResult {
            success: true,
            path: path.clone(),
            node_count: 0,
            edge_count: 0,
            preserved_positions: 0,
            errors: Vec::new(),
        };

        if let Err(e) = self.project_canvas(book_path, canvas_type, &path, &mut result) {
            warn!(path = ?path, error = %e, "Canvas sync failed");
            result.success = false;
            result.errors.push(e.to_string());
        }
        result
    }

    /// Read a book's canvas file; `None` if it does not exist
    pub fn read_canvas(&self, book_path: &Path, canvas_type: CanvasType) -> StoreResult<Option<Canvas>> {
        let path = self.store.config().canvas_path(book_path, canvas_type.label());
        let vault = self.store.vault();
        if !vault.exists(&path) {
            return Ok(None);
        }
        let text = vault
            .read(&path)
            .map_err(|e| StoreError::from_read(e, path.clone()))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StoreError::InvalidFormat {
                path,
                details: e.to_string(),
            })
    }

    fn project_canvas(
        &self,
        book_path: &Path,
        canvas_type: CanvasType,
        path: &Path,
        result: &mut CanvasSyncResult,
    ) -> StoreResult<()> {
        let mut canvas = match canvas_type {
            CanvasType::Character => character_canvas(&self.store.get_characters(book_path)?),
            CanvasType::Story => story_canvas(&self.store.get_story_units(book_path)?),
        };

        // An unreadable canvas is left as it is
        if let Some(previous) = self.read_canvas(book_path, canvas_type)? {
            result.preserved_positions = merge_layout(&mut canvas, previous);
        }

        let json = serde_json::to_string_pretty(&canvas).map_err(|e| StoreError::Encode {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        self.store
            .vault()
            .write(path, &json)
            .map_err(|e| StoreError::from_io(e, path.to_path_buf()))?;

        result.node_count = canvas.nodes.len();
        result.edge_count = canvas.edges.len();
        info!(
            canvas = %canvas_type,
            nodes = result.node_count,
            edges = result.edge_count,
            preserved = result.preserved_positions,
            "Wrote canvas"
        );
        Ok(())
    }

    /// Apply canvas edits to the records behind the nodes.
    ///
    /// Node ids are entity ids. Only text nodes map to records; other node
    /// kinds are ignored.
    pub fn sync_canvas_changes(
        &self,
        book_path: &Path,
        canvas_type: CanvasType,
        changes: &[CanvasChange],
    ) -> SyncResult {
        let mut result = SyncResult::new();

        for change in changes {
            let outcome = match (canvas_type, change) {
                (_, CanvasChange::Added(node) | CanvasChange::Updated(node)) if !node.is_text() => {
                    continue;
                }
                (CanvasType::Character, CanvasChange::Added(node)) => self.add_character_node(book_path, node),
                (CanvasType::Character, CanvasChange::Updated(node)) => {
                    self.update_character_node(book_path, node)
                }
                (CanvasType::Character, CanvasChange::Removed(id)) => {
                    self.store.delete_character(book_path, id).map_err(|e| e.to_string())
                }
                (CanvasType::Story, CanvasChange::Added(node)) => self.add_story_node(book_path, node),
                (CanvasType::Story, CanvasChange::Updated(node)) => self.update_story_node(book_path, node),
                (CanvasType::Story, CanvasChange::Removed(id)) => {
                    self.store.delete_story_unit(book_path, id).map_err(|e| e.to_string())
                }
            };

            match outcome {
                Ok(true) => result.synced_count += 1,
                Ok(false) => debug!(?change, "Canvas change had no matching record"),
                Err(e) => result.errors.push(e),
            }
        }

        result
    }

    fn add_character_node(&self, book_path: &Path, node: &CanvasNode) -> Result<bool, String> {
        let name = entity_name(&node.text);
        if name.is_empty() {
            return Err(format!("Node '{}' has no name", node.id));
        }
        if self.store.get_character(book_path, &node.id).map_err(|e| e.to_string())?.is_some() {
            return Ok(false);
        }
        let mut character = Character::new(name, Source::Manual);
        character.character_id = node.id.clone();
        self.store
            .add_character(book_path, character)
            .map(|_| true)
            .map_err(|e| e.to_string())
    }

    fn update_character_node(&self, book_path: &Path, node: &CanvasNode) -> Result<bool, String> {
        let name = entity_name(&node.text);
        if name.is_empty() {
            return Err(format!("Node '{}' has no name", node.id));
        }
        self.store
            .update_character(book_path, &node.id, |c| c.name = name)
            .map_err(|e| e.to_string())
    }

    fn add_story_node(&self, book_path: &Path, node: &CanvasNode) -> Result<bool, String> {
        let name = entity_name(&node.text);
        if name.is_empty() {
            return Err(format!("Node '{}' has no name", node.id));
        }
        if self.store.get_story_unit(book_path, &node.id).map_err(|e| e.to_string())?.is_some() {
            return Ok(false);
        }
        let range = parse_chapter_line(&node.text).unwrap_or_default();
        let mut unit = StoryUnit::new(name, range, Source::Manual);
        unit.unit_id = node.id.clone();
        self.store
            .add_story_unit(book_path, unit)
            .map(|_| true)
            .map_err(|e| e.to_string())
    }

    fn update_story_node(&self, book_path: &Path, node: &CanvasNode) -> Result<bool, String> {
        let name = entity_name(&node.text);
        if name.is_empty() {
            return Err(format!("Node '{}' has no name", node.id));
        }
        let range = parse_chapter_line(&node.text);
        self.store
            .update_story_unit(book_path, &node.id, |u| {
                u.name = name;
                if let Some(range) = range {
                    u.chapter_range = range;
                    u.precise_range = None;
                }
            })
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BookInfo, Relationship};
    use crate::storage::Vault;
    use crate::test_support::{book, Fixture};

    fn setup() -> (Fixture, SyncService, PathBuf) {
        let fx = Fixture::new();
        let path = book("Night Harbor");
        fx.store
            .initialize_database(&path, &BookInfo::titled("Night Harbor"))
            .unwrap();
        let sync = SyncService::new(fx.store.clone());
        (fx, sync, path)
    }

    fn add_character(fx: &Fixture, path: &Path, name: &str, role: CharacterRole) -> String {
        let mut character = Character::new(name, Source::Manual);
        character.role = role;
        fx.store.add_character(path, character).unwrap()
    }

    #[test]
    fn test_entity_name() {
        assert_eq!(entity_name("# Mira\n\n*protagonist*"), "Mira");
        assert_eq!(entity_name("\n  **Tobin**  \nmore"), "Tobin");
        assert_eq!(entity_name(""), "");
    }

    #[test]
    fn test_character_rows_by_role() {
        let (fx, sync, path) = setup();
        let mira = add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        let tobin = add_character(&fx, &path, "Tobin", CharacterRole::Supporting);
        let ansel = add_character(&fx, &path, "Ansel", CharacterRole::Supporting);

        let result = sync.sync_database_to_canvas(&path, CanvasType::Character);
        assert!(result.success);
        assert_eq!(result.node_count, 3);

        let canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();
        let node = |id: &str| canvas.nodes.iter().find(|n| n.id == id).unwrap().clone();
        assert_eq!((node(mira.as_str()).x, node(mira.as_str()).y), (0.0, 0.0));
        assert_eq!((node(tobin.as_str()).x, node(tobin.as_str()).y), (0.0, 2.0 * ROW_STEP));
        assert_eq!((node(ansel.as_str()).x, node(ansel.as_str()).y), (COLUMN_STEP, 2.0 * ROW_STEP));
    }

    #[test]
    fn test_relationship_edges() {
        let (fx, sync, path) = setup();
        let tobin = add_character(&fx, &path, "Tobin", CharacterRole::Supporting);
        let mut mira = Character::new("Mira", Source::Manual);
        mira.relationships = vec![
            Relationship {
                target: "Tobin".to_string(),
                relation_type: "brother".to_string(),
                description: String::new(),
            },
            Relationship {
                target: "Nobody".to_string(),
                relation_type: "ghost".to_string(),
                description: String::new(),
            },
        ];
        let mira = fx.store.add_character(&path, mira).unwrap();

        sync.sync_database_to_canvas(&path, CanvasType::Character);
        let canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();

        assert_eq!(canvas.edges.len(), 1);
        assert_eq!(canvas.edges[0].from_node, mira);
        assert_eq!(canvas.edges[0].to_node, tobin);
        assert_eq!(canvas.edges[0].label.as_deref(), Some("brother"));
    }

    #[test]
    fn test_moved_node_keeps_position() {
        let (fx, sync, path) = setup();
        let mira = add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        sync.sync_database_to_canvas(&path, CanvasType::Character);

        // User drags Mira
        let mut canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();
        canvas.nodes[0].x = 777.5;
        canvas.nodes[0].y = -42.25;
        let canvas_path = fx.store.config().canvas_path(&path, "character");
        fx.vault
            .write(&canvas_path, &serde_json::to_string(&canvas).unwrap())
            .unwrap();

        // Unrelated store change
        fx.store
            .update_character(&path, &mira, |c| c.ai_description = "A scholar".to_string())
            .unwrap();
        add_character(&fx, &path, "Tobin", CharacterRole::Protagonist);

        let result = sync.sync_database_to_canvas(&path, CanvasType::Character);
        assert_eq!(result.preserved_positions, 1);

        let canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();
        let node = canvas.nodes.iter().find(|n| n.id == mira).unwrap();
        assert_eq!((node.x, node.y), (777.5, -42.25));
        assert!(node.text.contains("A scholar"));
        let tobin = canvas.nodes.iter().find(|n| n.id != mira).unwrap();
        assert_eq!((tobin.x, tobin.y), (COLUMN_STEP, 0.0));
    }

    #[test]
    fn test_user_group_nodes_survive() {
        let (fx, sync, path) = setup();
        add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        let canvas_path = fx.store.config().canvas_path(&path, "character");
        fx.vault
            .write(
                &canvas_path,
                r##"{"nodes":[{"id":"g1","type":"group","x":-10,"y":-10,"width":900,"height":400,"label":"Family"},
                             {"id":"stale","type":"text","text":"# Gone","x":0,"y":0,"width":10,"height":10}],
                    "edges":[]}"##,
            )
            .unwrap();

        sync.sync_database_to_canvas(&path, CanvasType::Character);
        let canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();

        let group = canvas.nodes.iter().find(|n| n.id == "g1").unwrap();
        assert_eq!(group.extra.get("label"), Some(&Value::String("Family".to_string())));
        assert!(canvas.nodes.iter().all(|n| n.id != "stale"));
    }

    #[test]
    fn test_fractional_positions_are_kept() {
        let (fx, sync, path) = setup();
        let mira = add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        let canvas_path = fx.store.config().canvas_path(&path, "character");
        fx.vault
            .write(
                &canvas_path,
                &format!(
                    r#"{{"nodes":[{{"id":"{}","type":"text","text":"Mira","x":12.5,"y":-3.75,"width":260,"height":140}}],"edges":[]}}"#,
                    mira
                ),
            )
            .unwrap();

        let result = sync.sync_database_to_canvas(&path, CanvasType::Character);
        assert!(result.success);
        assert_eq!(result.preserved_positions, 1);

        let canvas = sync.read_canvas(&path, CanvasType::Character).unwrap().unwrap();
        assert_eq!((canvas.nodes[0].x, canvas.nodes[0].y), (12.5, -3.75));
    }

    #[test]
    fn test_unreadable_canvas_is_not_overwritten() {
        let (fx, sync, path) = setup();
        add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        let canvas_path = fx.store.config().canvas_path(&path, "character");
        fx.vault.write(&canvas_path, "{\"nodes\": [").unwrap();

        let result = sync.sync_database_to_canvas(&path, CanvasType::Character);
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(fx.vault.read(&canvas_path).unwrap(), "{\"nodes\": [");
    }

    #[test]
    fn test_story_canvas_links_sequential_units() {
        let (fx, sync, path) = setup();
        let second = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Storm", ChapterRange::new(4, 6), Source::Ai))
            .unwrap();
        let first = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Arrival", ChapterRange::new(1, 3), Source::Ai))
            .unwrap();
        let mut side = StoryUnit::new("Letters", ChapterRange::new(2, 2), Source::Manual);
        side.line_type = LineType::Sub;
        fx.store.add_story_unit(&path, side).unwrap();

        let result = sync.sync_database_to_canvas(&path, CanvasType::Story);
        assert_eq!(result.node_count, 3);
        assert_eq!(result.edge_count, 1);

        let canvas = sync.read_canvas(&path, CanvasType::Story).unwrap().unwrap();
        assert_eq!(canvas.edges[0].from_node, first);
        assert_eq!(canvas.edges[0].to_node, second);
        let letters = canvas.nodes.iter().find(|n| n.text.starts_with("# Letters")).unwrap();
        assert_eq!(letters.y, ROW_STEP);
    }

    #[test]
    fn test_canvas_changes_apply_to_records() {
        let (fx, sync, path) = setup();
        let mira = add_character(&fx, &path, "Mira", CharacterRole::Protagonist);
        let tobin = add_character(&fx, &path, "Tobin", CharacterRole::Minor);

        let mut renamed = CanvasNode::text_node(&mira, "# Mira Vale".to_string(), 0.0, 0.0, None);
        renamed.x = 5.0;
        let added = CanvasNode::text_node("node-7", "# Ansel\n\nharbor master".to_string(), 0.0, 0.0, None);

        let result = sync.sync_canvas_changes(
            &path,
            CanvasType::Character,
            &[
                CanvasChange::Updated(renamed),
                CanvasChange::Added(added),
                CanvasChange::Removed(tobin.clone()),
                CanvasChange::Removed("unknown".to_string()),
            ],
        );

        assert!(result.success);
        assert_eq!(result.synced_count, 3);
        assert_eq!(fx.store.get_character(&path, &mira).unwrap().unwrap().name, "Mira Vale");
        let ansel = fx.store.get_character(&path, "node-7").unwrap().unwrap();
        assert_eq!(ansel.name, "Ansel");
        assert_eq!(ansel.source, Source::Manual);
        assert!(fx.store.get_character(&path, &tobin).unwrap().is_none());
    }

    #[test]
    fn test_story_node_changes_parse_chapters() {
        let (fx, sync, path) = setup();
        let node = CanvasNode::text_node("u-1", "# Storm\n\nChapters 4-6".to_string(), 0.0, 0.0, None);

        let result = sync.sync_canvas_changes(&path, CanvasType::Story, &[CanvasChange::Added(node)]);
        assert_eq!(result.synced_count, 1);
        let unit = fx.store.get_story_unit(&path, "u-1").unwrap().unwrap();
        assert_eq!(unit.chapter_range, ChapterRange::new(4, 6));

        let empty = CanvasNode::text_node("u-2", "   ".to_string(), 0.0, 0.0, None);
        let result = sync.sync_canvas_changes(&path, CanvasType::Story, &[CanvasChange::Added(empty)]);
        assert_eq!(result.errors.len(), 1);
    }
}
