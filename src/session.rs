//! TranscriptionSession lifecycle state machine.
//!
//! `idle -> recording -> stopping -> idle`, held in a single `AtomicU8` so
//! `start`/`stop` can gate on a `compare_exchange` instead of a bigger lock.
//! Owns the audio graph, the partial-tick scheduler, and the background
//! final-transcription job for at most one live recording at a time. Events
//! go out over a plain `tokio::sync::mpsc::Sender<SessionEvent>`, and the
//! scheduler is cancelled via an owned [`CancellationToken`] rather than a
//! closure that reaches back into this struct.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::audio_graph::{AudioError, AudioGraph};
use crate::config::{Config, STOP_GRACE_PERIOD, STOP_GRACE_POLL_INTERVAL};
use crate::events::{
    EventSegment, FinalEvent, SessionEvent, SessionStatus, StartRecordingRequest,
    StateEvent, StopRecordingRequest, StopRecordingResponse,
};
use crate::ids::{NoteId, SessionId};
use crate::language::{distribute_timestamps, resolve_final, split_sentences, LanguageMode, LanguageResolver};
use crate::recognizer::Recognizer;
use crate::ring_buffer::RingBuffer;
use crate::scheduler::PartialScheduler;
use crate::wav::WavError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("a session is already active")]
    NotIdle,
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("audio initialization failed: {0}")]
    AudioInitFailed(#[from] AudioError),
    #[error("wav I/O error: {0}")]
    WavIoError(#[from] WavError),
    #[error("no active session for this note")]
    NoActiveSession,
}

/// Microphone permission gate. The real prompting UI lives outside this
/// crate's scope; this trait is the seam a host app plugs a
/// platform permission check into. Defaults to always-granted, suitable for
/// desktop hosts and tests.
pub trait MicrophonePermission: Send + Sync {
    fn is_granted(&self) -> bool;
}

pub struct AlwaysGranted;
impl MicrophonePermission for AlwaysGranted {
    fn is_granted(&self) -> bool {
        true
    }
}

fn status_from_u8(v: u8) -> SessionStatus {
    match v {
        1 => SessionStatus::Recording,
        2 => SessionStatus::Stopping,
        _ => SessionStatus::Idle,
    }
}

struct ActiveRecording {
    note_id: NoteId,
    session_id: SessionId,
    mode: LanguageMode,
    audio_graph: AudioGraph,
    ring: Arc<RingBuffer>,
    scheduler_cancel: CancellationToken,
    scheduler_task: tokio::task::JoinHandle<()>,
}

/// Owns everything for at most one live recording at a time.
pub struct TranscriptionSession {
    status: Arc<AtomicU8>,
    config: Config,
    recognizer: Arc<dyn Recognizer>,
    permission: Arc<dyn MicrophonePermission>,
    language: Arc<LanguageResolver>,
    event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    active: Mutex<Option<ActiveRecording>>,
}

impl TranscriptionSession {
    pub fn new(
        config: Config,
        recognizer: Arc<dyn Recognizer>,
        event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            status: Arc::new(AtomicU8::new(0)),
            config,
            recognizer,
            permission: Arc::new(AlwaysGranted),
            language: Arc::new(LanguageResolver::new()),
            event_tx,
            active: Mutex::new(None),
        }
    }

    pub fn with_permission_gate(mut self, permission: Arc<dyn MicrophonePermission>) -> Self {
        self.permission = permission;
        self
    }

    pub fn status(&self) -> SessionStatus {
        status_from_u8(self.status.load(Ordering::SeqCst))
    }

    /// `start`.
    pub async fn start(&self, req: StartRecordingRequest) -> Result<(), SessionError> {
        if self.status.compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(SessionError::NotIdle);
        }

        if !self.permission.is_granted() {
            self.status.store(0, Ordering::SeqCst);
            return Err(SessionError::PermissionDenied);
        }

        let ring = Arc::new(RingBuffer::new(crate::config::ROLLING_WINDOW_SAMPLES));
        let audio_path = self.config.audio_path(&req.note_id);

        let audio_graph = match AudioGraph::start(audio_path, ring.clone()) {
            Ok(g) => g,
            Err(err) => {
                self.status.store(0, Ordering::SeqCst);
                return Err(SessionError::AudioInitFailed(err));
            }
        };

        self.language.reset();

        let scheduler_cancel = CancellationToken::new();
        let scratch_path = self.config.scratch_wav_path(&req.session_id);
        let scheduler = Arc::new(PartialScheduler::new(
            ring.clone(),
            self.recognizer.clone(),
            self.language.clone(),
            scratch_path,
            req.note_id,
            req.session_id,
            req.language_mode,
            self.event_tx.clone(),
        ));
        let scheduler_task = tokio::task::spawn(scheduler.run(scheduler_cancel.clone()));

        *self.active.lock() = Some(ActiveRecording {
            note_id: req.note_id,
            session_id: req.session_id,
            mode: req.language_mode,
            audio_graph,
            ring,
            scheduler_cancel,
            scheduler_task,
        });

        let _ = self
            .event_tx
            .send(SessionEvent::State(StateEvent {
                note_id: req.note_id,
                session_id: req.session_id,
                status: SessionStatus::Recording,
                language_mode: req.language_mode,
                language_lock: None,
            }))
            .await;

        Ok(())
    }

    /// `stop`. Returns synchronously; the `final` event follows
    /// asynchronously once the background transcription completes.
    pub async fn stop(
        &self,
        req: StopRecordingRequest,
    ) -> Result<StopRecordingResponse, SessionError> {
        if self.status.compare_exchange(1, 2, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return Err(SessionError::NoActiveSession);
        }

        let active = self.active.lock().take().ok_or(SessionError::NoActiveSession)?;
        active.scheduler_cancel.cancel();

        let deadline = tokio::time::Instant::now() + STOP_GRACE_PERIOD;
        while tokio::time::Instant::now() < deadline {
            if active.scheduler_task.is_finished() {
                break;
            }
            tokio::time::sleep(STOP_GRACE_POLL_INTERVAL).await;
        }
        // Proceed regardless; a still-running tick is allowed to finish on
        // its own and its late partial event will be dropped by the
        // Coordinator once the session is gone.

        let audio_result = match active.audio_graph.stop() {
            Ok(r) => r,
            Err(err) => {
                self.status.store(0, Ordering::SeqCst);
                let _ = self
                    .event_tx
                    .send(SessionEvent::Final(FinalEvent {
                        note_id: active.note_id,
                        session_id: active.session_id,
                        segments: Vec::new(),
                        language_lock: None,
                        duration_ms: None,
                        error: Some(err.to_string()),
                    }))
                    .await;
                return Err(SessionError::AudioInitFailed(err));
            }
        };

        let response = StopRecordingResponse {
            audio_path: audio_result.wav_path.clone(),
            duration_ms: audio_result.duration_ms,
            language_lock: req.language_lock,
            status: SessionStatus::Stopping,
            error: None,
        };

        let recognizer = self.recognizer.clone();
        let event_tx = self.event_tx.clone();
        let note_id = active.note_id;
        let session_id = active.session_id;
        let wav_path = audio_result.wav_path;
        let duration_ms = audio_result.duration_ms;
        let mode = req.language_lock;
        let status = self.status.clone();
        // `active`'s remaining fields (the cancelled scheduler task, the
        // ring buffer) fall out of scope here; the scheduler already
        // observed cancellation during the grace poll above.

        tokio::task::spawn(async move {
            let final_event = run_final_transcription(
                recognizer.as_ref(),
                &wav_path,
                mode,
                duration_ms,
                note_id,
                session_id,
            )
            .await;
            let _ = event_tx.send(SessionEvent::Final(final_event)).await;
            status.store(0, Ordering::SeqCst);
        });

        Ok(response)
    }

    pub fn set_language(&self, mode: LanguageMode) {
        if let Some(active) = self.active.lock().as_mut() {
            active.mode = mode;
        }
    }

    pub fn get_state(&self, note_id: NoteId, session_id: SessionId) -> StateEvent {
        StateEvent {
            note_id,
            session_id,
            status: self.status(),
            language_mode: self
                .active
                .lock()
                .as_ref()
                .map(|a| a.mode)
                .unwrap_or(LanguageMode::Auto),
            language_lock: self.language.current_lock(),
        }
    }
}

async fn run_final_transcription(
    recognizer: &dyn Recognizer,
    wav_path: &PathBuf,
    mode: LanguageMode,
    duration_ms: i64,
    note_id: NoteId,
    session_id: SessionId,
) -> FinalEvent {
    match resolve_final(recognizer, wav_path, mode).await {
        Ok(resolution) if resolution.error.is_some() => FinalEvent {
            note_id,
            session_id,
            segments: Vec::new(),
            language_lock: Some(resolution.language_lock),
            duration_ms: Some(duration_ms),
            error: resolution.error,
        },
        Ok(resolution) => {
            let lang = crate::language::normalize_lang(Some(resolution.language_lock));
            let sentences = split_sentences(&resolution.text);
            let timed = distribute_timestamps(&sentences, duration_ms);
            let segments: Vec<EventSegment> = timed
                .into_iter()
                .map(|s| EventSegment {
                    start_ms: s.start_ms,
                    end_ms: s.end_ms,
                    text: s.text,
                    lang: Some(lang),
                })
                .collect();
            FinalEvent {
                note_id,
                session_id,
                segments,
                language_lock: Some(resolution.language_lock),
                duration_ms: Some(duration_ms),
                error: None,
            }
        }
        Err(err) => FinalEvent {
            note_id,
            session_id,
            segments: Vec::new(),
            language_lock: None,
            duration_ms: Some(duration_ms),
            error: Some(err.to_string()),
        },
    }
}
