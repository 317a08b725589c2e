//! On-device streaming speech-recognition pipeline for a voice-note app.
//!
//! Capture flows `AudioGraph -> RingBuffer -> PartialScheduler` (partial
//! ticks, every 900 ms) and, on `stop`, `AudioGraph -> final transcription
//! via [`language::resolve_final`]`. Both paths emit [`events::SessionEvent`]
//! onto a single channel; [`coordinator::SessionCoordinator`] is its one
//! reader and the only writer to the sqlite-backed [`db::SegmentStore`] /
//! [`db::NoteStore`].
//!
//! A host application wires these together roughly as:
//!
//! ```ignore
//! let db = Arc::new(Database::new(config.database_path())?);
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! let session = Arc::new(TranscriptionSession::new(config, recognizer, tx));
//! let coordinator = Arc::new(SessionCoordinator::new(db.clone()));
//! tokio::spawn(coordinator.run(rx));
//! ```
//!
//! Logging throughout uses `tracing`; a host binary installs a subscriber
//! (e.g. `tracing_subscriber::fmt::init()`) — this crate never does so
//! itself, since a library should not configure global logging for its
//! caller.

pub mod audio_graph;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod events;
pub mod ids;
pub mod language;
pub mod recognizer;
pub mod ring_buffer;
pub mod scheduler;
pub mod session;
pub mod wav;

pub use config::Config;
pub use coordinator::SessionCoordinator;
pub use db::{Database, DbError, NoteStore, SegmentStore};
pub use events::SessionEvent;
pub use ids::{NoteId, SessionId};
pub use language::LanguageMode;
pub use recognizer::{Recognizer, RecognizerError, WhisperRecognizer};
pub use session::{SessionError, TranscriptionSession};
