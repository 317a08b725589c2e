//! Session-gated event sink that is the sole writer to the note/segment
//! store.
//!
//! `SessionCoordinator` depends only on event payloads and a
//! [`SegmentStore`] handle, never on a live
//! [`crate::session::TranscriptionSession`] reference, so it can be built
//! and run independently of whatever owns the recording session. Modeled as
//! a task that drains a `tokio::sync::mpsc::Receiver<SessionEvent>` — the
//! only reader of that channel, and the only writer to the store.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::db::{NewSegment, SegmentStore};
use crate::events::{FinalEvent, PartialEvent, SessionEvent, StateEvent};
use crate::ids::{NoteId, SessionId};
use crate::language::LanguageLock;

struct LiveSession {
    session_id: SessionId,
    note_id: NoteId,
    language_lock: Option<LanguageLock>,
    partials: Vec<crate::events::EventSegment>,
}

struct Inner {
    live: Option<LiveSession>,
    last_active_session_id: Option<SessionId>,
    last_active_note_id: Option<NoteId>,
    inserted_final_keys: HashSet<String>,
}

/// Gates `partial`/`final` events on session identity, deduplicates finals,
/// and is the only component that ever calls into [`SegmentStore`].
pub struct SessionCoordinator {
    store: Arc<dyn SegmentStore>,
    inner: Mutex<Inner>,
}

impl SessionCoordinator {
    pub fn new(store: Arc<dyn SegmentStore>) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner {
                live: None,
                last_active_session_id: None,
                last_active_note_id: None,
                inserted_final_keys: HashSet::new(),
            }),
        }
    }

    /// Drain `events` until the channel closes, dispatching each to the
    /// matching handler. Intended to be the body of the coordinator's
    /// dedicated task.
    pub async fn run(self: Arc<Self>, mut events: tokio::sync::mpsc::Receiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Partial(p) => self.handle_partial(p),
                SessionEvent::Final(f) => self.handle_final(f),
                SessionEvent::State(s) => self.handle_state(s),
            }
        }
    }

    fn handle_state(&self, event: StateEvent) {
        use crate::events::SessionStatus;
        let mut inner = self.inner.lock();
        match event.status {
            SessionStatus::Recording => {
                inner.live = Some(LiveSession {
                    session_id: event.session_id,
                    note_id: event.note_id,
                    language_lock: event.language_lock,
                    partials: Vec::new(),
                });
            }
            SessionStatus::Stopping | SessionStatus::Idle => {
                if let Some(live) = inner.live.take() {
                    inner.last_active_session_id = Some(live.session_id);
                    inner.last_active_note_id = Some(live.note_id);
                }
            }
        }
    }

    /// `partial` handling.
    fn handle_partial(&self, event: PartialEvent) {
        let mut inner = self.inner.lock();
        let accept = matches!(
            &inner.live,
            Some(live) if live.session_id == event.session_id && live.note_id == event.note_id
        );
        if !accept {
            tracing::info!(
                session_id = %event.session_id,
                note_id = %event.note_id,
                "dropping stale partial event"
            );
            return;
        }

        if let Some(lock) = event.language_lock {
            if let Some(live) = inner.live.as_mut() {
                if live.language_lock.is_none() {
                    live.language_lock = Some(lock);
                }
            }
        }
        if let Some(live) = inner.live.as_mut() {
            live.partials = event.segments;
        }
    }

    /// `final` handling. Returns the number of rows actually
    /// inserted, for tests and callers that want to observe dedupe.
    fn handle_final(&self, event: FinalEvent) -> usize {
        let mut inner = self.inner.lock();

        let accept = match &inner.live {
            Some(live) => live.session_id == event.session_id,
            None => {
                inner.last_active_session_id == Some(event.session_id)
                    && inner.last_active_note_id == Some(event.note_id)
            }
        };
        if !accept {
            tracing::info!(
                session_id = %event.session_id,
                note_id = %event.note_id,
                "dropping stale final event"
            );
            return 0;
        }

        let mut inserted = 0usize;
        for seg in &event.segments {
            let key = format!(
                "{}:{}:{}:{}",
                event.note_id, seg.start_ms, seg.end_ms, seg.text
            );
            if inner.inserted_final_keys.contains(&key) {
                continue;
            }
            let new_segment = NewSegment {
                start_ms: seg.start_ms,
                end_ms: seg.end_ms,
                text: seg.text.clone(),
                lang: seg.lang,
            };
            match self.store.insert_final_segment(event.note_id, new_segment) {
                Ok(true) => {
                    inner.inserted_final_keys.insert(key);
                    inserted += 1;
                }
                Ok(false) => {
                    // Unique index absorbed a duplicate the in-memory set
                    // hadn't seen yet (e.g. after a process restart).
                    inner.inserted_final_keys.insert(key);
                }
                Err(err) => {
                    tracing::warn!(%err, "failed to insert final segment");
                }
            }
        }

        if inserted > 0 {
            inner.last_active_session_id = None;
            inner.last_active_note_id = None;
        }

        inserted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, DbError};
    use crate::events::{EventSegment, SessionStatus};
    use crate::language::Lang;

    fn note_segment(start_ms: i64, end_ms: i64, text: &str) -> EventSegment {
        EventSegment {
            start_ms,
            end_ms,
            text: text.to_string(),
            lang: Some(Lang::En),
        }
    }

    fn db_with_note(note_id: NoteId) -> Arc<Database> {
        let db = Database::open_in_memory().unwrap();
        db.create_note(&crate::db::Note {
            id: note_id,
            created_at_ms: 0,
            updated_at_ms: 0,
            title: "t".into(),
            duration_ms: None,
            language_lock: None,
            audio_path: None,
            asr_model: "stub".into(),
            llm_model: None,
            insights_status: None,
        })
        .unwrap();
        Arc::new(db)
    }

    #[test]
    fn stale_final_from_prior_session_is_dropped() -> Result<(), DbError> {
        let note_a = NoteId::new();
        let note_b = NoteId::new();
        let db = db_with_note(note_a);
        db.create_note(&crate::db::Note {
            id: note_b,
            created_at_ms: 0,
            updated_at_ms: 0,
            title: "t".into(),
            duration_ms: None,
            language_lock: None,
            audio_path: None,
            asr_model: "stub".into(),
            llm_model: None,
            insights_status: None,
        })?;
        let coordinator = SessionCoordinator::new(db.clone());

        let session_a = SessionId::new();
        let session_b = SessionId::new();

        coordinator.handle_state(StateEvent {
            note_id: note_a,
            session_id: session_a,
            status: SessionStatus::Recording,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });
        // A stops; B starts before A's final arrives.
        coordinator.handle_state(StateEvent {
            note_id: note_a,
            session_id: session_a,
            status: SessionStatus::Stopping,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });
        coordinator.handle_state(StateEvent {
            note_id: note_b,
            session_id: session_b,
            status: SessionStatus::Recording,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });

        let stale = FinalEvent {
            note_id: note_a,
            session_id: session_a,
            segments: vec![note_segment(0, 1000, "late")],
            language_lock: None,
            duration_ms: Some(1000),
            error: None,
        };
        assert_eq!(coordinator.handle_final(stale), 0);
        assert_eq!(db.get_segments_for_note(note_a)?.len(), 0);

        let bs_final = FinalEvent {
            note_id: note_b,
            session_id: session_b,
            segments: vec![note_segment(0, 1000, "on time")],
            language_lock: None,
            duration_ms: Some(1000),
            error: None,
        };
        assert_eq!(coordinator.handle_final(bs_final), 1);
        Ok(())
    }

    #[test]
    fn duplicate_final_events_insert_once() -> Result<(), DbError> {
        let note_id = NoteId::new();
        let db = db_with_note(note_id);
        let coordinator = SessionCoordinator::new(db.clone());
        let session_id = SessionId::new();

        coordinator.handle_state(StateEvent {
            note_id,
            session_id,
            status: SessionStatus::Recording,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });
        coordinator.handle_state(StateEvent {
            note_id,
            session_id,
            status: SessionStatus::Stopping,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });

        let event = FinalEvent {
            note_id,
            session_id,
            segments: vec![note_segment(0, 1000, "hello")],
            language_lock: None,
            duration_ms: Some(1000),
            error: None,
        };

        assert_eq!(coordinator.handle_final(event.clone()), 1);
        assert_eq!(coordinator.handle_final(event), 0);
        assert_eq!(db.get_segments_for_note(note_id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn partial_replaces_rather_than_appends() {
        let note_id = NoteId::new();
        let db = db_with_note(note_id);
        let coordinator = SessionCoordinator::new(db);
        let session_id = SessionId::new();

        coordinator.handle_state(StateEvent {
            note_id,
            session_id,
            status: SessionStatus::Recording,
            language_mode: crate::language::LanguageMode::En,
            language_lock: None,
        });

        coordinator.handle_partial(PartialEvent {
            note_id,
            session_id,
            segments: vec![note_segment(0, 1000, "first")],
            language_lock: None,
        });
        coordinator.handle_partial(PartialEvent {
            note_id,
            session_id,
            segments: vec![note_segment(0, 2000, "first revised")],
            language_lock: None,
        });

        let inner = coordinator.inner.lock();
        let live = inner.live.as_ref().unwrap();
        assert_eq!(live.partials.len(), 1);
        assert_eq!(live.partials[0].text, "first revised");
    }
}
