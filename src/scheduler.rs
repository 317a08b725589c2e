//! Periodic partial-transcription tick.
//!
//! A `tokio::time::interval` ticker fires every 900 ms; an `is_running`
//! flag swapped with `Ordering::SeqCst` keeps at most one recognizer call
//! in flight at a time, skipping a tick entirely if the previous one hasn't
//! finished. Each tick snapshots the rolling window rather than draining
//! it, so a skipped tick doesn't lose audio.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{MAX_PARTIAL_SEGMENTS, MIN_PARTIAL_SAMPLES, PARTIAL_TICK_INTERVAL, ROLLING_WINDOW_SAMPLES};
use crate::events::{EventSegment, PartialEvent, SessionEvent};
use crate::ids::{NoteId, SessionId};
use crate::language::{distribute_timestamps, split_sentences, LanguageMode, LanguageResolver};
use crate::recognizer::{Recognizer, RecognizerLanguage};
use crate::wav::WavWriter;

/// Duration assumed for a partial tick's window when distributing sentence
/// timestamps.
const PARTIAL_WINDOW_MS: i64 = 6_000;

/// Drives one session's partial-tick loop. Owns nothing its caller needs
/// back — cancellation is via the `CancellationToken` it was constructed
/// with, not a closure capturing the session.
pub struct PartialScheduler {
    ring: Arc<crate::ring_buffer::RingBuffer>,
    recognizer: Arc<dyn Recognizer>,
    language: Arc<LanguageResolver>,
    scratch_path: PathBuf,
    note_id: NoteId,
    session_id: SessionId,
    mode: LanguageMode,
    event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    inflight: AtomicBool,
}

impl PartialScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ring: Arc<crate::ring_buffer::RingBuffer>,
        recognizer: Arc<dyn Recognizer>,
        language: Arc<LanguageResolver>,
        scratch_path: PathBuf,
        note_id: NoteId,
        session_id: SessionId,
        mode: LanguageMode,
        event_tx: tokio::sync::mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            ring,
            recognizer,
            language,
            scratch_path,
            note_id,
            session_id,
            mode,
            event_tx,
            inflight: AtomicBool::new(false),
        }
    }

    pub fn is_inflight(&self) -> bool {
        self.inflight.load(Ordering::SeqCst)
    }

    /// Run the 900 ms tick loop until `cancel` fires. Spawned as a
    /// `tokio::task` by the owning [`crate::session::TranscriptionSession`].
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PARTIAL_TICK_INTERVAL);
        let mut last_emitted = String::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.clone().tick(&mut last_emitted).await;
                }
            }
        }
    }

    async fn tick(self: Arc<Self>, last_emitted: &mut String) {
        if self.inflight.swap(true, Ordering::SeqCst) {
            return;
        }
        let result = self.run_one_tick(last_emitted).await;
        self.inflight.store(false, Ordering::SeqCst);
        if let Err(err) = result {
            tracing::warn!(%err, "partial tick skipped");
        }
    }

    async fn run_one_tick(&self, last_emitted: &mut String) -> anyhow::Result<()> {
        if self.ring.count() < MIN_PARTIAL_SAMPLES {
            return Ok(());
        }

        let samples = self.ring.snapshot(ROLLING_WINDOW_SAMPLES);

        if let Some(parent) = self.scratch_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = WavWriter::create(&self.scratch_path)?;
        writer.append(&samples)?;
        writer.finish()?;

        let language = self.language.effective_partial_language(self.mode);
        let outcome = self
            .recognizer
            .transcribe(&self.scratch_path, language.clone())
            .await;
        let _ = std::fs::remove_file(&self.scratch_path);

        let output = match outcome {
            Ok(output) => output,
            Err(err) => {
                tracing::warn!(%err, "recognizer error on partial tick");
                return Ok(());
            }
        };

        if let Some(err) = &output.error {
            tracing::warn!(error = %err, "recognizer reported error on partial tick");
            return Ok(());
        }

        let mut text = output.text;

        // Auto + empty: consider a confident forced re-run.
        if matches!(language, RecognizerLanguage::Auto) && text.is_empty() {
            if let Some(lang) = LanguageResolver::language_to_retry(
                output.detected_language.as_deref(),
                output.detected_probability,
            ) {
                let retry_lang = RecognizerLanguage::code(lang.as_str());
                if let Ok(retry) = self
                    .recognizer
                    .transcribe(&self.scratch_path, retry_lang)
                    .await
                {
                    self.language
                        .maybe_confirm_lock(lang, &retry.text, output.detected_probability);
                    text = retry.text;
                }
            }
        }

        if text.is_empty() {
            return Ok(());
        }

        if !should_emit(last_emitted, &text) {
            return Ok(());
        }
        *last_emitted = text.clone();

        let lang_hint = crate::language::normalize_lang(self.language.current_lock());

        let sentences = split_sentences(&text);
        let timed = distribute_timestamps(&sentences, PARTIAL_WINDOW_MS);
        let segments: Vec<EventSegment> = timed
            .into_iter()
            .take(MAX_PARTIAL_SEGMENTS)
            .map(|s| EventSegment {
                start_ms: s.start_ms,
                end_ms: s.end_ms,
                text: s.text,
                lang: Some(lang_hint),
            })
            .collect();

        let event = PartialEvent {
            note_id: self.note_id,
            session_id: self.session_id,
            segments,
            language_lock: self.language.current_lock(),
        };
        let _ = self.event_tx.send(SessionEvent::Partial(event)).await;
        Ok(())
    }
}

/// Flicker-suppression rule: emit only if the new text differs
/// from the last emitted by at least 3 characters, or shares no prefix.
///
/// "Differs by" is measured as the length of what's left after the shared
/// prefix on each side, not the net length delta — a same-length
/// substitution (e.g. a corrected homophone) shares a prefix and has a
/// length delta of zero, but its suffixes are both non-empty and unequal,
/// so it still counts as a real change rather than being suppressed.
fn should_emit(last: &str, candidate: &str) -> bool {
    if last.is_empty() {
        return true;
    }
    if last == candidate {
        return false;
    }
    let last_chars: Vec<char> = last.chars().collect();
    let candidate_chars: Vec<char> = candidate.chars().collect();
    let shared_prefix = last_chars
        .iter()
        .zip(candidate_chars.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if shared_prefix == 0 {
        return true;
    }
    let last_suffix_len = last_chars.len() - shared_prefix;
    let candidate_suffix_len = candidate_chars.len() - shared_prefix;
    let diverged_len = last_suffix_len.max(candidate_suffix_len);
    diverged_len >= crate::config::PARTIAL_FLICKER_THRESHOLD
}
