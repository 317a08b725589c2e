//! End-to-end scenarios 1-6.
//!
//! These drive the deterministic half of the pipeline — WAV authoring,
//! language resolution, the partial scheduler, and the coordinator/store.
//! `cpal` needs a physical input device that a CI runner doesn't have, so
//! `TranscriptionSession::start` (which opens one) is exercised only by the
//! permission/status-machine unit tests in `session.rs`, not here.

use std::sync::Arc;
use std::time::Duration;

use murmur::config::{MIN_PARTIAL_SAMPLES, ROLLING_WINDOW_SAMPLES, SAMPLE_RATE};
use murmur::db::{Database, NewSegment, Note, NoteStore, SegmentStore};
use murmur::events::{EventSegment, FinalEvent, SessionEvent, SessionStatus, StateEvent};
use murmur::ids::{NoteId, SessionId};
use murmur::language::{
    distribute_timestamps, normalize_lang, resolve_final, split_sentences, Lang, LanguageLock,
    LanguageMode,
};
use murmur::recognizer::{RecognizerOutput, StubRecognizer};
use murmur::ring_buffer::RingBuffer;
use murmur::scheduler::PartialScheduler;
use murmur::wav::WavWriter;
use murmur::SessionCoordinator;

fn blank_note(id: NoteId) -> Note {
    Note {
        id,
        created_at_ms: 0,
        updated_at_ms: 0,
        title: "untitled".to_string(),
        duration_ms: None,
        language_lock: None,
        audio_path: None,
        asr_model: "stub".to_string(),
        llm_model: None,
        insights_status: None,
    }
}

/// Scenario 1: Nominal EN session.
#[tokio::test]
async fn nominal_en_session() {
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("note.wav");

    let samples: Vec<i16> = vec![0; 5 * SAMPLE_RATE as usize];
    let mut writer = WavWriter::create(&wav_path).unwrap();
    writer.append(&samples).unwrap();
    writer.finish().unwrap();

    let file_len = std::fs::metadata(&wav_path).unwrap().len();
    assert_eq!(file_len, 160_044);

    let duration_ms = (samples.len() as i64 * 1000) / SAMPLE_RATE as i64;
    assert_eq!(duration_ms, 5000);

    let recognizer = StubRecognizer::new();
    recognizer.on(
        "en",
        RecognizerOutput {
            text: "Hello world. This is a test.".to_string(),
            ..Default::default()
        },
    );

    let resolution = resolve_final(&recognizer, &wav_path, LanguageMode::En)
        .await
        .unwrap();
    assert_eq!(resolution.language_lock, LanguageLock::En);
    assert!(resolution.error.is_none());

    let sentences = split_sentences(&resolution.text);
    let timed = distribute_timestamps(&sentences, duration_ms);
    assert_eq!(timed.len(), 2);
    // "Hello world." (12 chars) and "This is a test." (15 chars) split
    // proportionally to character count, floored per sentence independently
    // — not an even 2500/2500 halving.
    assert_eq!(timed[0].text, "Hello world.");
    assert_eq!((timed[0].start_ms, timed[0].end_ms), (0, 2222));
    assert_eq!(timed[1].text, "This is a test.");
    assert_eq!((timed[1].start_ms, timed[1].end_ms), (2222, 4999));

    let lang = normalize_lang(Some(resolution.language_lock));
    assert_eq!(lang, Lang::En);
}

/// Scenario 2: Auto fallback to TR via scoring.
#[tokio::test]
async fn auto_fallback_to_tr_via_scoring() {
    let dir = tempfile::tempdir().unwrap();
    let wav_path = dir.path().join("note.wav");
    WavWriter::create(&wav_path).unwrap().finish().unwrap();

    let recognizer = StubRecognizer::new();
    recognizer.on(
        "auto",
        RecognizerOutput {
            text: String::new(),
            detected_language: None,
            detected_probability: 0.0,
            ..Default::default()
        },
    );
    recognizer.on(
        "en",
        RecognizerOutput {
            text: "the the the the the".to_string(),
            ..Default::default()
        },
    );
    recognizer.on(
        "tr",
        RecognizerOutput {
            text: "merhaba bu bir test cümlesidir".to_string(),
            ..Default::default()
        },
    );

    let resolution = resolve_final(&recognizer, &wav_path, LanguageMode::Auto)
        .await
        .unwrap();
    assert_eq!(resolution.language_lock, LanguageLock::AutoTr);
    assert_eq!(normalize_lang(Some(resolution.language_lock)), Lang::Tr);
    assert_eq!(resolution.text, "merhaba bu bir test cümlesidir");
}

/// Scenario 3: Stale final rejected.
#[tokio::test]
async fn stale_final_from_prior_session_is_dropped() {
    let note_a = NoteId::new();
    let note_b = NoteId::new();
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.create_note(&blank_note(note_a)).unwrap();
    db.create_note(&blank_note(note_b)).unwrap();

    let coordinator = Arc::new(SessionCoordinator::new(db.clone()));
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let handle = tokio::task::spawn(coordinator.clone().run(rx));

    let session_a = SessionId::new();
    let session_b = SessionId::new();

    tx.send(SessionEvent::State(StateEvent {
        note_id: note_a,
        session_id: session_a,
        status: SessionStatus::Recording,
        language_mode: LanguageMode::En,
        language_lock: None,
    }))
    .await
    .unwrap();
    tx.send(SessionEvent::State(StateEvent {
        note_id: note_a,
        session_id: session_a,
        status: SessionStatus::Stopping,
        language_mode: LanguageMode::En,
        language_lock: None,
    }))
    .await
    .unwrap();
    tx.send(SessionEvent::State(StateEvent {
        note_id: note_b,
        session_id: session_b,
        status: SessionStatus::Recording,
        language_mode: LanguageMode::En,
        language_lock: None,
    }))
    .await
    .unwrap();

    // A's final arrives late, after B has already taken over as the live session.
    tx.send(SessionEvent::Final(FinalEvent {
        note_id: note_a,
        session_id: session_a,
        segments: vec![EventSegment {
            start_ms: 0,
            end_ms: 1000,
            text: "late".to_string(),
            lang: Some(Lang::En),
        }],
        language_lock: Some(LanguageLock::En),
        duration_ms: Some(1000),
        error: None,
    }))
    .await
    .unwrap();

    tx.send(SessionEvent::Final(FinalEvent {
        note_id: note_b,
        session_id: session_b,
        segments: vec![EventSegment {
            start_ms: 0,
            end_ms: 1000,
            text: "on time".to_string(),
            lang: Some(Lang::En),
        }],
        language_lock: Some(LanguageLock::En),
        duration_ms: Some(1000),
        error: None,
    }))
    .await
    .unwrap();

    drop(tx);
    handle.await.unwrap();

    assert_eq!(db.get_segments_for_note(note_a).unwrap().len(), 0);
    let b_segments = db.get_segments_for_note(note_b).unwrap();
    assert_eq!(b_segments.len(), 1);
    assert_eq!(b_segments[0].text, "on time");
}

/// Scenario 4: Duplicate final.
#[tokio::test]
async fn duplicate_final_events_insert_once() {
    let note_id = NoteId::new();
    let db = Arc::new(Database::open_in_memory().unwrap());
    db.create_note(&blank_note(note_id)).unwrap();

    let coordinator = Arc::new(SessionCoordinator::new(db.clone()));
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let handle = tokio::task::spawn(coordinator.clone().run(rx));

    let session_id = SessionId::new();
    tx.send(SessionEvent::State(StateEvent {
        note_id,
        session_id,
        status: SessionStatus::Recording,
        language_mode: LanguageMode::En,
        language_lock: None,
    }))
    .await
    .unwrap();
    tx.send(SessionEvent::State(StateEvent {
        note_id,
        session_id,
        status: SessionStatus::Stopping,
        language_mode: LanguageMode::En,
        language_lock: None,
    }))
    .await
    .unwrap();

    let segments = vec![EventSegment {
        start_ms: 0,
        end_ms: 1000,
        text: "hello".to_string(),
        lang: Some(Lang::En),
    }];
    let final_event = FinalEvent {
        note_id,
        session_id,
        segments,
        language_lock: Some(LanguageLock::En),
        duration_ms: Some(1000),
        error: None,
    };

    tx.send(SessionEvent::Final(final_event.clone())).await.unwrap();
    tx.send(SessionEvent::Final(final_event)).await.unwrap();

    drop(tx);
    handle.await.unwrap();

    assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 1);
}

/// Scenario 5: Recording shorter than 1 s never ticks a partial.
#[tokio::test(flavor = "multi_thread")]
async fn short_recording_emits_no_partials() {
    let dir = tempfile::tempdir().unwrap();
    let scratch_path = dir.path().join("scratch.wav");

    let ring = Arc::new(RingBuffer::new(ROLLING_WINDOW_SAMPLES));
    let short_clip: Vec<i16> = vec![0; (0.4 * SAMPLE_RATE as f64) as usize];
    assert!(short_clip.len() < MIN_PARTIAL_SAMPLES);
    ring.append(&short_clip);

    let duration_ms = (short_clip.len() as i64 * 1000) / SAMPLE_RATE as i64;
    assert_eq!(duration_ms, 400);

    let recognizer = Arc::new(StubRecognizer::new());
    let language = Arc::new(murmur::language::LanguageResolver::new());
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let scheduler = Arc::new(PartialScheduler::new(
        ring,
        recognizer,
        language,
        scratch_path,
        NoteId::new(),
        SessionId::new(),
        LanguageMode::En,
        tx,
    ));

    let cancel = tokio_util::sync::CancellationToken::new();
    let cancel_for_run = cancel.clone();
    let run_handle = tokio::task::spawn(scheduler.run(cancel_for_run));

    // One tick period plus slack, then cancel; below MIN_PARTIAL_SAMPLES the
    // scheduler must skip every tick.
    tokio::time::sleep(Duration::from_millis(950)).await;
    cancel.cancel();
    run_handle.await.unwrap();

    assert!(rx.try_recv().is_err(), "expected no partial event for sub-1s audio");
}

/// Scenario 6: CASCADE delete.
#[tokio::test]
async fn cascade_delete_removes_all_segments() {
    let db = Database::open_in_memory().unwrap();
    let note_id = NoteId::new();
    db.create_note(&blank_note(note_id)).unwrap();

    for i in 0..7i64 {
        db.insert_final_segment(
            note_id,
            NewSegment {
                start_ms: i * 1000,
                end_ms: i * 1000 + 500,
                text: format!("segment {i}"),
                lang: Some(Lang::En),
            },
        )
        .unwrap();
    }
    assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 7);

    let removed = db.delete_note(note_id).unwrap();
    assert_eq!(removed, 1);
    assert_eq!(db.get_segments_for_note(note_id).unwrap().len(), 0);
}
