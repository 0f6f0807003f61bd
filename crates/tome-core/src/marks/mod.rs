//! Marks
//!
//! One annotation abstraction over two backends.
//!
//! ## Architecture
//!
//! - **model**: `UnifiedMark` and its sub-objects, conversion to and from
//!   `StoryUnit`
//! - **repository**: routes by `mode`; story units to the record store,
//!   everything else to the per-book mark blob
//! - **service**: id generation, partial updates, change listeners
//!
//! ## Usage
//!
//! ```ignore
//! let marks = MarkingService::new(store.clone());
//! marks.on_mark_change(|change| {
//!     println!("changed: {}", change.mark_id());
//!     Ok(())
//! });
//! let unit = marks.create_story_unit_from_chapters(book, "Arrival", 1, 3)?;
//! ```

mod model;
mod repository;
mod service;

pub use model::{
    chapter_span, AssociationsPatch, MarkAnalysis, MarkAssociations, MarkMode, MarkPatch,
    MarkStyle, UnifiedMark,
};
pub use repository::{MarkBlobStore, MarkRepository};
pub use service::{ListenerId, MarkChange, MarkListener, MarkingService};
