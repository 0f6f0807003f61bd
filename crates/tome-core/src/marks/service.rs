//! Marking service
//!
//! Create/update/delete of marks with generated ids, plus a synchronous
//! observer list. Listeners run after the change is committed; a listener
//! that fails or panics is logged and skipped, and the remaining listeners
//! still run.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{touch, ChapterRange};
use crate::storage::StoreResult;
use crate::store::RecordStore;

use super::model::{chapter_span, MarkMode, MarkPatch, UnifiedMark};
use super::repository::MarkRepository;

/// A committed change to a mark
#[derive(Debug, Clone, PartialEq)]
pub enum MarkChange {
    Created(UnifiedMark),
    Updated(UnifiedMark),
    Deleted { book_path: PathBuf, id: String },
}

impl MarkChange {
    pub fn mark_id(&self) -> &str {
        match self {
            MarkChange::Created(mark) | MarkChange::Updated(mark) => &mark.id,
            MarkChange::Deleted { id, .. } => id,
        }
    }
}

/// Callback notified on every mark change
pub type MarkListener = Arc<dyn Fn(&MarkChange) -> anyhow::Result<()> + Send + Sync>;

/// Handle returned by [`MarkingService::on_mark_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct MarkingService {
    repository: MarkRepository,
    listeners: Mutex<Vec<(ListenerId, MarkListener)>>,
    next_listener: AtomicU64,
}

impl MarkingService {
    pub fn new(store: Arc<RecordStore>) -> Self {
        Self::with_repository(MarkRepository::new(store))
    }

    pub fn with_repository(repository: MarkRepository) -> Self {
        Self {
            repository,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn repository(&self) -> &MarkRepository {
        &self.repository
    }

    // ==================== Mark Operations ====================

    /// Persist a new mark under a freshly generated id
    pub fn create_mark(&self, mut mark: UnifiedMark) -> StoreResult<UnifiedMark> {
        mark.id = Uuid::new_v4().to_string();
        let now = Utc::now();
        mark.created_at = now;
        mark.updated_at = now;

        self.repository.save_mark(&mark)?;
        let mark = self
            .repository
            .get_mark(&mark.book_path, &mark.id)?
            .unwrap_or(mark);

        info!(mark_id = %mark.id, mode = mark.mode.label(), "Created mark");
        self.notify(&MarkChange::Created(mark.clone()));
        Ok(mark)
    }

    /// Apply a partial update. Returns `None` if the mark does not exist.
    pub fn update_mark(
        &self,
        book_path: &Path,
        id: &str,
        patch: MarkPatch,
    ) -> StoreResult<Option<UnifiedMark>> {
        let Some(mut mark) = self.repository.get_mark(book_path, id)? else {
            return Ok(None);
        };

        patch.apply(&mut mark);
        mark.updated_at = touch(mark.updated_at);

        self.repository.save_mark(&mark)?;
        let mark = self.repository.get_mark(book_path, id)?.unwrap_or(mark);

        self.notify(&MarkChange::Updated(mark.clone()));
        Ok(Some(mark))
    }

    pub fn delete_mark(&self, book_path: &Path, id: &str) -> StoreResult<bool> {
        let deleted = self.repository.delete_mark(book_path, id)?;
        if deleted {
            self.notify(&MarkChange::Deleted {
                book_path: book_path.to_path_buf(),
                id: id.to_string(),
            });
        }
        Ok(deleted)
    }

    pub fn get_mark(&self, book_path: &Path, id: &str) -> StoreResult<Option<UnifiedMark>> {
        self.repository.get_mark(book_path, id)
    }

    pub fn list_marks(&self, book_path: &Path) -> StoreResult<Vec<UnifiedMark>> {
        self.repository.get_marks_by_book(book_path)
    }

    pub fn list_marks_by_type(&self, book_path: &Path, mark_type: &str) -> StoreResult<Vec<UnifiedMark>> {
        Ok(self
            .list_marks(book_path)?
            .into_iter()
            .filter(|m| m.mark_type == mark_type)
            .collect())
    }

    /// Create a story-unit mark spanning whole chapters, with the chapters'
    /// text as its content
    pub fn create_story_unit_from_chapters(
        &self,
        book_path: &Path,
        name: &str,
        start_chapter: u32,
        end_chapter: u32,
    ) -> StoreResult<UnifiedMark> {
        let range = ChapterRange::new(start_chapter, end_chapter);
        let store = self.repository.store();

        let mut mark = UnifiedMark::new(book_path, MarkMode::StoryUnit, name, chapter_span(range));
        mark.content = store.get_chapter_content(book_path, range.start, range.end)?;
        self.create_mark(mark)
    }

    // ==================== Listeners ====================

    pub fn on_mark_change<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MarkChange) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was registered
    pub fn off_mark_change(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn notify(&self, change: &MarkChange) {
        // Snapshot so listeners may (un)register while being notified
        let listeners: Vec<MarkListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(change))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(mark_id = change.mark_id(), error = %e, "Mark listener failed");
                }
                Err(_) => {
                    error!(mark_id = change.mark_id(), "Mark listener panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marks::model::{AssociationsPatch, MarkStyle};
    use crate::models::{BookInfo, PreciseRange, Source, StoryUnit};
    use crate::test_support::{book, Fixture};
    use std::sync::atomic::AtomicUsize;

    fn service(fx: &Fixture) -> MarkingService {
        MarkingService::new(fx.store.clone())
    }

    #[test]
    fn test_create_assigns_id() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");

        let created = marks
            .create_mark(UnifiedMark::new(&path, MarkMode::Highlight, "Quote", PreciseRange::default()))
            .unwrap();

        assert!(!created.id.is_empty());
        assert_eq!(marks.get_mark(&path, &created.id).unwrap(), Some(created));
    }

    #[test]
    fn test_update_deep_merges() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");

        let mut draft = UnifiedMark::new(&path, MarkMode::Comment, "Note", PreciseRange::default());
        draft.associations.characters = vec!["Mira".to_string()];
        draft.style.color = Some("red".to_string());
        let created = marks.create_mark(draft).unwrap();

        let updated = marks
            .update_mark(
                &path,
                &created.id,
                MarkPatch {
                    associations: Some(AssociationsPatch {
                        notes: Some("check later".to_string()),
                        ..AssociationsPatch::default()
                    }),
                    style: Some(MarkStyle {
                        icon: Some("pin".to_string()),
                        ..MarkStyle::default()
                    }),
                    ..MarkPatch::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.associations.characters, vec!["Mira"]);
        assert_eq!(updated.associations.notes, "check later");
        assert_eq!(updated.style.color.as_deref(), Some("red"));
        assert_eq!(updated.style.icon.as_deref(), Some("pin"));
        assert!(updated.updated_at >= created.updated_at);

        assert!(marks
            .update_mark(&path, "missing", MarkPatch::default())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_update_story_unit_mark_style_keeps_source() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");
        fx.store
            .initialize_database(&path, &BookInfo::titled("Night Harbor"))
            .unwrap();
        let id = fx
            .store
            .add_story_unit(&path, StoryUnit::new("Storm", ChapterRange::new(3, 5), Source::Ai))
            .unwrap();

        let updated = marks
            .update_mark(
                &path,
                &id,
                MarkPatch {
                    content: Some("The harbor floods.".to_string()),
                    associations: Some(AssociationsPatch {
                        tags: Some(vec!["weather".to_string()]),
                        ..AssociationsPatch::default()
                    }),
                    style: Some(MarkStyle {
                        color: Some("#3366ff".to_string()),
                        ..MarkStyle::default()
                    }),
                    ..MarkPatch::default()
                },
            )
            .unwrap()
            .unwrap();

        assert_eq!(updated.style.color.as_deref(), Some("#3366ff"));
        assert_eq!(updated.associations.tags, vec!["weather"]);

        let reread = marks.get_mark(&path, &id).unwrap().unwrap();
        assert_eq!(reread.style.color.as_deref(), Some("#3366ff"));
        let unit = fx.store.get_story_unit(&path, &id).unwrap().unwrap();
        assert_eq!(unit.source, Source::Ai);
        assert_eq!(unit.text_content, "The harbor floods.");
    }

    #[test]
    fn test_list_marks_by_type() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");

        let mut foreshadow = UnifiedMark::new(&path, MarkMode::Highlight, "Omen", PreciseRange::default());
        foreshadow.mark_type = "foreshadowing".to_string();
        marks.create_mark(foreshadow).unwrap();
        marks
            .create_mark(UnifiedMark::new(&path, MarkMode::Highlight, "Quote", PreciseRange::default()))
            .unwrap();

        let found = marks.list_marks_by_type(&path, "foreshadowing").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Omen");
        assert_eq!(marks.list_marks(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_story_unit_from_chapters() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");
        fx.store
            .initialize_database(&path, &BookInfo::titled("Night Harbor"))
            .unwrap();
        fx.write_chapters(&path, 5);

        let mark = marks
            .create_story_unit_from_chapters(&path, "Arrival", 2, 3)
            .unwrap();

        assert_eq!(mark.content, "Text of chapter 2.\n\nText of chapter 3.");
        let unit = fx.store.get_story_unit(&path, &mark.id).unwrap().unwrap();
        assert_eq!(unit.chapter_range, ChapterRange::new(2, 3));
        assert_eq!(unit.text_content, mark.content);
    }

    #[test]
    fn test_listeners_are_notified() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = seen.clone();
        let id = marks.on_mark_change(move |change| {
            let kind = match change {
                MarkChange::Created(_) => "created",
                MarkChange::Updated(_) => "updated",
                MarkChange::Deleted { .. } => "deleted",
            };
            sink.lock().unwrap().push(kind);
            Ok(())
        });

        let mark = marks
            .create_mark(UnifiedMark::new(&path, MarkMode::Bookmark, "Here", PreciseRange::default()))
            .unwrap();
        marks.update_mark(&path, &mark.id, MarkPatch::default()).unwrap();
        assert!(marks.delete_mark(&path, &mark.id).unwrap());
        assert!(!marks.delete_mark(&path, &mark.id).unwrap());

        assert_eq!(*seen.lock().unwrap(), vec!["created", "updated", "deleted"]);

        assert!(marks.off_mark_change(id));
        assert!(!marks.off_mark_change(id));
        marks
            .create_mark(UnifiedMark::new(&path, MarkMode::Bookmark, "There", PreciseRange::default()))
            .unwrap();
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_failing_listener_does_not_block_others() {
        let fx = Fixture::new();
        let marks = service(&fx);
        let path = book("Night Harbor");
        let calls = Arc::new(AtomicUsize::new(0));

        marks.on_mark_change(|_| anyhow::bail!("listener broke"));
        marks.on_mark_change(|_| panic!("listener exploded"));
        let counter = calls.clone();
        marks.on_mark_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mark = marks
            .create_mark(UnifiedMark::new(&path, MarkMode::Highlight, "Quote", PreciseRange::default()))
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(marks.get_mark(&path, &mark.id).unwrap().is_some());
    }
}
