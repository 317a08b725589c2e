//! Persisted row types. Distinct from the event-layer
//! [`crate::events::EventSegment`] — these round-trip through sqlite.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ids::NoteId;
use crate::language::{Lang, LanguageLock};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub title: String,
    pub duration_ms: Option<i64>,
    pub language_lock: Option<LanguageLock>,
    pub audio_path: Option<PathBuf>,
    pub asr_model: String,
    pub llm_model: Option<String>,
    pub insights_status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub note_id: NoteId,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub is_final: bool,
    pub lang: Option<Lang>,
}

/// Fields needed to insert one final segment; `id` is assigned by sqlite.
#[derive(Debug, Clone)]
pub struct NewSegment {
    pub start_ms: i64,
    pub end_ms: i64,
    pub text: String,
    pub lang: Option<Lang>,
}

pub(crate) fn lang_to_sql(lang: Option<Lang>) -> Option<&'static str> {
    lang.map(Lang::as_str)
}

pub(crate) fn lang_from_sql(s: Option<String>) -> Option<Lang> {
    match s.as_deref() {
        Some("en") => Some(Lang::En),
        Some("tr") => Some(Lang::Tr),
        _ => None,
    }
}

pub(crate) fn language_lock_to_sql(lock: Option<LanguageLock>) -> Option<&'static str> {
    lock.map(|l| match l {
        LanguageLock::Auto => "auto",
        LanguageLock::AutoEn => "auto_en",
        LanguageLock::AutoTr => "auto_tr",
        LanguageLock::En => "en",
        LanguageLock::Tr => "tr",
    })
}

pub(crate) fn language_lock_from_sql(s: Option<String>) -> Option<LanguageLock> {
    match s.as_deref() {
        Some("auto") => Some(LanguageLock::Auto),
        Some("auto_en") => Some(LanguageLock::AutoEn),
        Some("auto_tr") => Some(LanguageLock::AutoTr),
        Some("en") => Some(LanguageLock::En),
        Some("tr") => Some(LanguageLock::Tr),
        _ => None,
    }
}
