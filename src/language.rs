//! Language locking and scoring, sentence splitting and timestamp
//! distribution.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::recognizer::{Recognizer, RecognizerError, RecognizerLanguage};

/// User-selectable language mode, passed when a recording is started and
/// read again when it's stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageMode {
    Auto,
    En,
    Tr,
}

impl LanguageMode {
    fn as_recognizer_language(self) -> RecognizerLanguage {
        match self {
            LanguageMode::Auto => RecognizerLanguage::Auto,
            LanguageMode::En => RecognizerLanguage::code("en"),
            LanguageMode::Tr => RecognizerLanguage::code("tr"),
        }
    }
}

/// A session's evolving language decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LanguageLock {
    Auto,
    AutoEn,
    AutoTr,
    En,
    Tr,
}

impl LanguageLock {
    /// `auto_X -> X`, otherwise unchanged. Used by the partial policy.
    pub fn normalized(self) -> Self {
        match self {
            LanguageLock::AutoEn => LanguageLock::En,
            LanguageLock::AutoTr => LanguageLock::Tr,
            other => other,
        }
    }

    pub fn as_recognizer_code(self) -> &'static str {
        match self {
            LanguageLock::Auto => "auto",
            LanguageLock::AutoEn | LanguageLock::En => "en",
            LanguageLock::AutoTr | LanguageLock::Tr => "tr",
        }
    }
}

/// The two persistable languages: a stored note's `language_lock` is always
/// one of these, never the transient `auto_*` states `LanguageLock` also
/// carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lang {
    En,
    Tr,
}

impl Lang {
    pub fn as_str(self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Tr => "tr",
        }
    }
}

/// `auto_en -> en`, `auto_tr -> tr`, otherwise preserved; defaults to `en`
/// when there is no lock yet.
pub fn normalize_lang(lock: Option<LanguageLock>) -> Lang {
    match lock.map(LanguageLock::normalized) {
        Some(LanguageLock::En) => Lang::En,
        Some(LanguageLock::Tr) => Lang::Tr,
        _ => Lang::En,
    }
}

const TR_COMMON: &[&str] = &[
    "ve", "bir", "bu", "ben", "sen", "için", "değil", "şimdi", "var", "yok", "ile", "olan",
    "gibi", "kadar", "daha", "çok", "az", "en", "da", "de", "ki", "mi", "mı", "mu", "mü",
];

const EN_COMMON: &[&str] = &[
    "the", "and", "is", "are", "to", "of", "in", "for", "with", "i", "you", "we", "they",
    "this", "that", "have", "has", "had", "was", "were", "been", "be", "do", "does", "did",
    "will", "would", "can", "could", "should", "may", "might",
];

fn turkish_letter_count(s: &str) -> usize {
    s.chars()
        .filter(|c| matches!(c, 'ç' | 'ğ' | 'ı' | 'ö' | 'ş' | 'ü'))
        .count()
}

/// Heuristic ranking used to pick between `en` and `tr` when auto-detection
/// is inconclusive. `hint` is the language the candidate text
/// was transcribed *with* (`en` or `tr`).
pub fn quality_score(text: &str, hint: Lang) -> f64 {
    let words: Vec<String> = text
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.to_string())
        .filter(|w| !w.is_empty())
        .collect();

    let word_count = words.len().min(80) as f64;

    let max_repeat = longest_run_of_identical(&words);
    let repeat_pen = if max_repeat > 2 { 5.0 * max_repeat as f64 } else { 0.0 };

    let nonsense_pen = {
        let mut counts = std::collections::HashMap::new();
        for w in &words {
            *counts.entry(w.as_str()).or_insert(0usize) += 1;
        }
        3.0 * words
            .iter()
            .filter(|w| w.chars().count() <= 2 && counts[w.as_str()] > 3)
            .count() as f64
    };

    let hint_bonus = match hint {
        Lang::Tr => {
            let tr_set: HashSet<&str> = TR_COMMON.iter().copied().collect();
            let tr_letters: usize = words.iter().map(|w| turkish_letter_count(w)).sum();
            let tr_words = words.iter().filter(|w| tr_set.contains(w.as_str())).count();
            4.0 * tr_letters as f64 + 3.0 * tr_words as f64
        }
        Lang::En => {
            let en_set: HashSet<&str> = EN_COMMON.iter().copied().collect();
            let en_words = words.iter().filter(|w| en_set.contains(w.as_str())).count();
            1.0 * en_words as f64
        }
    };

    word_count + hint_bonus - repeat_pen - nonsense_pen
}

fn longest_run_of_identical(words: &[String]) -> usize {
    let mut best = 0usize;
    let mut run = 0usize;
    let mut prev: Option<&str> = None;
    for w in words {
        if Some(w.as_str()) == prev {
            run += 1;
        } else {
            run = 1;
            prev = Some(w.as_str());
        }
        best = best.max(run);
    }
    best
}

/// Pick between an `en` and a `tr` candidate by quality score. Ties prefer
/// `en`.
pub fn pick_best_candidate(en_text: &str, tr_text: &str) -> Lang {
    let en_score = quality_score(en_text, Lang::En);
    let tr_score = quality_score(tr_text, Lang::Tr);
    if tr_score > en_score {
        Lang::Tr
    } else {
        Lang::En
    }
}

static SENTENCE_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("static sentence-split pattern"));

/// Split on `[.!?]+\s+`, keeping the trailing punctuation on the preceding
/// sentence. Empty sentences are dropped; if nothing matches, the whole
/// text is a single sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut last_end = 0;
    for m in SENTENCE_SPLIT.find_iter(text) {
        // Keep the punctuation run, drop the trailing whitespace.
        let punct_end = m.as_str().trim_end().len() + m.start();
        let sentence = text[last_end..punct_end].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last_end = m.end();
    }
    let remainder = text[last_end..].trim();
    if !remainder.is_empty() {
        sentences.push(remainder.to_string());
    }

    if sentences.is_empty() {
        vec![text.to_string()]
    } else {
        sentences
    }
}

/// One sentence with its proportionally-distributed timestamp range.
#[derive(Debug, Clone, PartialEq)]
pub struct TimedSentence {
    pub text: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// Distribute `duration_ms` across `sentences` proportionally to character
/// count: `len_i = floor(duration_ms * |s_i| / total)`,
/// `end_ms = min(start_ms + len_i, duration_ms)`. Note this floors each
/// sentence independently, so the final `end_ms` can land a few
/// milliseconds short of `duration_ms` when the lengths don't divide it
/// evenly — it is not rounded up to compensate.
pub fn distribute_timestamps(sentences: &[String], duration_ms: i64) -> Vec<TimedSentence> {
    let total: usize = sentences.iter().map(|s| s.chars().count()).sum();
    if total == 0 {
        return Vec::new();
    }

    let mut start_ms = 0i64;
    let mut out = Vec::with_capacity(sentences.len());
    for s in sentences {
        let len_i = (duration_ms as i128 * s.chars().count() as i128 / total as i128) as i64;
        let end_ms = (start_ms + len_i).min(duration_ms);
        out.push(TimedSentence {
            text: s.clone(),
            start_ms,
            end_ms,
        });
        start_ms = end_ms;
    }
    out
}

/// Per-session partial-language state: tracks the evolving `languageLock`
/// the partial policy locks in once it's confident.
pub struct LanguageResolver {
    lock: Mutex<Option<LanguageLock>>,
}

impl LanguageResolver {
    pub fn new() -> Self {
        Self {
            lock: Mutex::new(None),
        }
    }

    pub fn current_lock(&self) -> Option<LanguageLock> {
        *self.lock.lock()
    }

    pub fn set_lock(&self, lock: LanguageLock) {
        *self.lock.lock() = Some(lock);
    }

    /// Clear the lock at the start of a fresh recording session.
    pub fn reset(&self) {
        *self.lock.lock() = None;
    }

    /// `effectivePartialLanguage`.
    pub fn effective_partial_language(&self, mode: LanguageMode) -> RecognizerLanguage {
        if let Some(lock) = self.current_lock() {
            if matches!(
                lock,
                LanguageLock::En | LanguageLock::Tr | LanguageLock::AutoEn | LanguageLock::AutoTr
            ) {
                return RecognizerLanguage::code(lock.normalized().as_recognizer_code());
            }
        }
        match mode {
            LanguageMode::En => RecognizerLanguage::code("en"),
            LanguageMode::Tr => RecognizerLanguage::code("tr"),
            LanguageMode::Auto => RecognizerLanguage::Auto,
        }
    }

    /// After an `auto` partial tick returned empty text: if the recognizer's
    /// detected language crosses the 0.45 threshold, return the language to
    /// force a re-run with. Otherwise `None`.
    pub fn language_to_retry(
        detected_language: Option<&str>,
        detected_probability: f32,
    ) -> Option<Lang> {
        let lang = match detected_language? {
            "en" => Lang::En,
            "tr" => Lang::Tr,
            _ => return None,
        };
        (detected_probability >= 0.45).then_some(lang)
    }

    /// After a forced re-run: if it produced non-empty text and the original
    /// detection probability crossed 0.80, persist the lock.
    pub fn maybe_confirm_lock(&self, lang: Lang, rerun_text: &str, detected_probability: f32) {
        if !rerun_text.is_empty() && detected_probability >= 0.80 {
            let lock = match lang {
                Lang::En => LanguageLock::AutoEn,
                Lang::Tr => LanguageLock::AutoTr,
            };
            self.set_lock(lock);
        }
    }
}

impl Default for LanguageResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of the stop-time final-transcription policy.
#[derive(Debug, Clone)]
pub struct FinalResolution {
    pub text: String,
    pub language_lock: LanguageLock,
    pub error: Option<String>,
}

/// Run the final-transcription fallback tree against `wav_path` using
/// `recognizer`, honoring the requested `mode`: a fixed `en`/`tr` mode
/// transcribes once; `auto` mode retries with a forced language when
/// detection is confident but the first pass came back empty, and falls
/// back to running both languages and picking the higher-scoring result
/// when detection stays inconclusive.
pub async fn resolve_final(
    recognizer: &dyn Recognizer,
    wav_path: &Path,
    mode: LanguageMode,
) -> Result<FinalResolution, RecognizerError> {
    let primary = recognizer
        .transcribe(wav_path, mode.as_recognizer_language())
        .await?;

    if let Some(err) = &primary.error {
        return Ok(FinalResolution {
            text: String::new(),
            language_lock: mode_to_lock(mode),
            error: Some(err.clone()),
        });
    }

    if mode != LanguageMode::Auto {
        return Ok(FinalResolution {
            text: primary.text,
            language_lock: mode_to_lock(mode),
            error: None,
        });
    }

    if !primary.text.is_empty() {
        // Non-empty auto result: tag the lock if detection was confident.
        let lock = match LanguageResolver::language_to_retry(
            primary.detected_language.as_deref(),
            primary.detected_probability,
        ) {
            Some(Lang::En) => LanguageLock::AutoEn,
            Some(Lang::Tr) => LanguageLock::AutoTr,
            None => LanguageLock::Auto,
        };
        return Ok(FinalResolution {
            text: primary.text,
            language_lock: lock,
            error: None,
        });
    }

    // Empty auto result: try a confident single-language force-run first.
    if let Some(lang) = LanguageResolver::language_to_retry(
        primary.detected_language.as_deref(),
        primary.detected_probability,
    ) {
        let forced = recognizer
            .transcribe(wav_path, RecognizerLanguage::code(lang.as_str()))
            .await?;
        if !forced.text.is_empty() {
            return Ok(FinalResolution {
                text: forced.text,
                language_lock: match lang {
                    Lang::En => LanguageLock::AutoEn,
                    Lang::Tr => LanguageLock::AutoTr,
                },
                error: None,
            });
        }
    }

    // Inconclusive: run both languages and choose by quality score.
    let en = recognizer
        .transcribe(wav_path, RecognizerLanguage::code("en"))
        .await?;
    let tr = recognizer
        .transcribe(wav_path, RecognizerLanguage::code("tr"))
        .await?;

    if en.text.is_empty() && tr.text.is_empty() {
        return Ok(FinalResolution {
            text: String::new(),
            language_lock: LanguageLock::Auto,
            error: Some("Empty transcription".to_string()),
        });
    }

    match pick_best_candidate(&en.text, &tr.text) {
        Lang::En => Ok(FinalResolution {
            text: en.text,
            language_lock: LanguageLock::AutoEn,
            error: None,
        }),
        Lang::Tr => Ok(FinalResolution {
            text: tr.text,
            language_lock: LanguageLock::AutoTr,
            error: None,
        }),
    }
}

fn mode_to_lock(mode: LanguageMode) -> LanguageLock {
    match mode {
        LanguageMode::Auto => LanguageLock::Auto,
        LanguageMode::En => LanguageLock::En,
        LanguageMode::Tr => LanguageLock::Tr,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_terminal_punctuation_keeping_it_attached() {
        let sentences = split_sentences("Hello world. This is a test.");
        assert_eq!(sentences, vec!["Hello world.", "This is a test."]);
    }

    #[test]
    fn no_terminal_punctuation_is_one_sentence() {
        let sentences = split_sentences("just one phrase with no stop");
        assert_eq!(sentences, vec!["just one phrase with no stop"]);
    }

    #[test]
    fn empty_text_has_no_sentences() {
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn round_trip_rejoin_and_resplit_is_stable() {
        let original = "Hello world. This is a test! Are we done?";
        let first = split_sentences(original);
        let rejoined = first.join(" ");
        let second = split_sentences(&rejoined);
        assert_eq!(first, second);
    }

    #[test]
    fn timestamps_are_proportional_and_monotonic() {
        // Equal-length sentences divide duration_ms evenly, so this case
        // also pins down the exact boundary.
        let sentences = vec!["abcde".to_string(), "fghij".to_string()];
        let timed = distribute_timestamps(&sentences, 4000);
        assert_eq!(timed[0].start_ms, 0);
        assert_eq!(timed[0].end_ms, 2000);
        assert_eq!(timed[1].end_ms, 4000);
        for w in timed.windows(2) {
            assert_eq!(w[0].end_ms, w[1].start_ms);
        }
    }

    #[test]
    fn timestamps_never_exceed_duration_even_with_uneven_lengths() {
        let sentences = vec!["Hello world.".to_string(), "This is a test.".to_string()];
        let timed = distribute_timestamps(&sentences, 5000);
        assert_eq!(timed[0].start_ms, 0);
        assert!(timed.last().unwrap().end_ms <= 5000);
        for w in timed.windows(2) {
            assert_eq!(w[0].end_ms, w[1].start_ms);
        }
    }

    #[test]
    fn quality_score_prefers_turkish_hinted_text_with_turkish_markers() {
        let en_text = "the the the the the";
        let tr_text = "merhaba bu bir test cümlesidir";
        assert_eq!(pick_best_candidate(en_text, tr_text), Lang::Tr);
    }

    #[test]
    fn quality_score_ties_prefer_english() {
        let text = "hello";
        assert_eq!(pick_best_candidate(text, text), Lang::En);
    }

    #[test]
    fn repeated_tokens_are_penalized() {
        let score = quality_score("the the the the the", Lang::En);
        assert!(score < 0.0, "expected heavy repeat penalty, got {score}");
    }
}
