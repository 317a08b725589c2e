//! Crate-wide tunables. Constructed by the host application; nothing in
//! this crate reads a config file off disk (there is no such file to read).

use std::path::PathBuf;
use std::time::Duration;

/// Sample rate all inference and on-disk WAV files operate at.
pub const SAMPLE_RATE: u32 = 16_000;

/// Rolling window length in samples: 6 s at 16 kHz.
pub const ROLLING_WINDOW_SAMPLES: usize = 6 * SAMPLE_RATE as usize;

/// Minimum buffered audio before a partial tick is allowed to run: 1 s.
pub const MIN_PARTIAL_SAMPLES: usize = SAMPLE_RATE as usize;

/// Partial-tick period.
pub const PARTIAL_TICK_INTERVAL: Duration = Duration::from_millis(900);

/// Grace period `stop` waits for an in-flight partial to finish.
pub const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Poll interval while waiting out the grace period.
pub const STOP_GRACE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Cap on segments emitted from a single partial tick.
pub const MAX_PARTIAL_SEGMENTS: usize = 10;

/// Minimum character delta (or prefix divergence) before re-emitting a
/// partial, to suppress flicker without swallowing corrections.
pub const PARTIAL_FLICKER_THRESHOLD: usize = 3;

/// Host-provided paths and filenames.
#[derive(Debug, Clone)]
pub struct Config {
    /// `<documents>` root; audio files live at `<documents>/Audio/<noteId>.wav`.
    pub documents_dir: PathBuf,
    /// Scratch directory for transient partial-tick WAV files.
    pub scratch_dir: PathBuf,
    /// Filename of the sqlite database under `documents_dir`.
    pub database_filename: String,
}

impl Config {
    pub fn new(documents_dir: impl Into<PathBuf>) -> Self {
        let documents_dir = documents_dir.into();
        Self {
            scratch_dir: documents_dir.join("Scratch"),
            database_filename: "noteinsight.db".to_string(),
            documents_dir,
        }
    }

    pub fn audio_dir(&self) -> PathBuf {
        self.documents_dir.join("Audio")
    }

    pub fn audio_path(&self, note_id: &crate::ids::NoteId) -> PathBuf {
        self.audio_dir().join(format!("{note_id}.wav"))
    }

    pub fn database_path(&self) -> PathBuf {
        self.documents_dir.join(&self.database_filename)
    }

    pub fn scratch_wav_path(&self, session_id: &crate::ids::SessionId) -> PathBuf {
        self.scratch_dir.join(format!("partial-{session_id}.wav"))
    }
}
