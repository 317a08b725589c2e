//! Event and control-call types exchanged between [`crate::session::TranscriptionSession`]
//! and [`crate::coordinator::SessionCoordinator`].
//!
//! Plain structs and enums rather than a framework event bus: the session
//! owns a `tokio::sync::mpsc::Sender<SessionEvent>` and the coordinator is
//! the lone receiver, so there's no broadcast fan-out to coordinate.

use serde::{Deserialize, Serialize};

use crate::ids::{NoteId, SessionId};
use crate::language::{Lang, LanguageMode};
use crate::language::LanguageLock;

/// One transcribed phrase as carried on the wire between Session and
/// Coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub lang: Option<Lang>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Recording,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct PartialEvent {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub segments: Vec<EventSegment>,
    pub language_lock: Option<LanguageLock>,
}

#[derive(Debug, Clone)]
pub struct FinalEvent {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub segments: Vec<EventSegment>,
    pub language_lock: Option<LanguageLock>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateEvent {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub language_mode: LanguageMode,
    pub language_lock: Option<LanguageLock>,
}

/// The three events a [`crate::session::TranscriptionSession`] emits,
/// consumed by exactly one [`crate::coordinator::SessionCoordinator`] task.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Partial(PartialEvent),
    Final(FinalEvent),
    State(StateEvent),
}

/// `startRecording` request.
#[derive(Debug, Clone)]
pub struct StartRecordingRequest {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub language_mode: LanguageMode,
    pub asr_model: String,
}

/// `stopRecording` request.
#[derive(Debug, Clone)]
pub struct StopRecordingRequest {
    pub note_id: NoteId,
    pub session_id: SessionId,
    pub language_lock: LanguageMode,
}

/// `stopRecording` response, returned synchronously.
#[derive(Debug, Clone)]
pub struct StopRecordingResponse {
    pub audio_path: std::path::PathBuf,
    pub duration_ms: i64,
    pub language_lock: LanguageMode,
    pub status: SessionStatus,
    pub error: Option<String>,
}
