//! Provenance conflicts and their resolution

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::models::Source;
use crate::storage::{StoreError, StoreResult};

use super::SyncService;

/// Separator placed between two merged text values
pub const MERGE_SEPARATOR: &str = "\n\n* * *\n\n";

/// Record type a conflict is about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    BookMeta,
    Character,
    StoryUnit,
}

/// A stored value that incoming data disagreed with
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub conflict_type: ConflictType,
    /// Id of the conflicting record (the book id for `book_meta`)
    pub record_id: String,
    /// camelCase name of the conflicting field
    pub field: String,
    pub existing_value: Value,
    pub incoming_value: Value,
    pub detected_at: DateTime<Utc>,
}

impl Conflict {
    pub fn new(
        conflict_type: ConflictType,
        record_id: impl Into<String>,
        field: impl Into<String>,
        existing_value: Value,
        incoming_value: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conflict_type,
            record_id: record_id.into(),
            field: field.into(),
            existing_value,
            incoming_value,
            detected_at: Utc::now(),
        }
    }
}

/// How to settle a conflict
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionStrategy {
    /// Take the incoming value
    Ai,
    /// Keep the existing value
    Manual,
    /// Combine both values
    Merge,
}

impl FromStr for ResolutionStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ai" => Ok(ResolutionStrategy::Ai),
            "manual" => Ok(ResolutionStrategy::Manual),
            "merge" => Ok(ResolutionStrategy::Merge),
            other => Err(format!("unknown strategy '{}' (expected ai, manual or merge)", other)),
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionStrategy::Ai => "ai",
            ResolutionStrategy::Manual => "manual",
            ResolutionStrategy::Merge => "merge",
        };
        f.write_str(label)
    }
}

/// Combine two values of the same field.
///
/// - strings: equal values stay single, otherwise both joined by
///   [`MERGE_SEPARATOR`]
/// - arrays: union without duplicates, existing items first
/// - objects: shallow union, incoming keys win
///
/// Any other pairing takes the incoming value unless it is null.
pub fn merge_values(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::String(a), Value::String(b)) => {
            if a == b || b.is_empty() {
                Value::String(a.clone())
            } else if a.is_empty() {
                Value::String(b.clone())
            } else {
                Value::String(format!("{}{}{}", a, MERGE_SEPARATOR, b))
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let mut merged = a.clone();
            for item in b {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut merged = a.clone();
            for (key, value) in b {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (existing, Value::Null) => existing.clone(),
        (_, incoming) => incoming.clone(),
    }
}

/// Set one camelCase field of a record through its JSON form
fn with_field<T: Serialize + DeserializeOwned>(record: &T, field: &str, value: Value) -> StoreResult<T> {
    let invalid = |details: String| StoreError::InvalidField {
        field: field.to_string(),
        details,
    };

    let mut json = serde_json::to_value(record).map_err(|e| invalid(e.to_string()))?;
    let object = json
        .as_object_mut()
        .ok_or_else(|| invalid("record is not an object".to_string()))?;
    if !object.contains_key(field) {
        return Err(invalid("no such field".to_string()));
    }
    object.insert(field.to_string(), value);
    serde_json::from_value(json).map_err(|e| invalid(e.to_string()))
}

impl SyncService {
    /// Settle a conflict and write the chosen value back.
    ///
    /// Returns `false` if the conflicting record no longer exists. Taking
    /// the incoming value of a character conflict marks the character as
    /// AI-sourced.
    pub fn resolve_conflict(
        &self,
        book_path: &Path,
        conflict: &Conflict,
        strategy: ResolutionStrategy,
    ) -> StoreResult<bool> {
        let value = match strategy {
            ResolutionStrategy::Ai => conflict.incoming_value.clone(),
            ResolutionStrategy::Manual => conflict.existing_value.clone(),
            ResolutionStrategy::Merge => merge_values(&conflict.existing_value, &conflict.incoming_value),
        };
        let field = conflict.field.as_str();

        // Patched against the current record, under the table lock
        let resolved = match conflict.conflict_type {
            ConflictType::BookMeta => self.store.try_update_book_meta(book_path, |meta| {
                *meta = with_field(&*meta, field, value)?;
                Ok(())
            })?,
            ConflictType::Character => {
                self.store
                    .try_update_character(book_path, &conflict.record_id, |character| {
                        *character = with_field(&*character, field, value)?;
                        if strategy == ResolutionStrategy::Ai {
                            character.source = Source::Ai;
                        }
                        Ok(())
                    })?
            }
            ConflictType::StoryUnit => {
                self.store
                    .try_update_story_unit(book_path, &conflict.record_id, |unit| {
                        *unit = with_field(&*unit, field, value)?;
                        Ok(())
                    })?
            }
        };

        if resolved {
            info!(
                conflict_id = %conflict.id,
                record_id = %conflict.record_id,
                field,
                %strategy,
                "Resolved conflict"
            );
        }
        Ok(resolved)
    }
}
