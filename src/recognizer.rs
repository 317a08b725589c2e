//! The external ASR boundary. `Recognizer` is a trait so the pipeline never
//! depends on a concrete native library; `WhisperRecognizer` is the one
//! production implementation, and `StubRecognizer` is the test double used
//! throughout the test suite.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("model not loaded")]
    ModelNotLoaded,
    #[error("failed to load model at {0}")]
    ModelLoadFailed(PathBuf),
    #[error("recognizer error: {0}")]
    Failed(String),
}

/// The language parameter accepted by [`Recognizer::transcribe`]: either an
/// ISO code or the literal `"auto"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerLanguage {
    Auto,
    Iso(String),
}

impl RecognizerLanguage {
    pub fn code(code: impl Into<String>) -> Self {
        Self::Iso(code.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            RecognizerLanguage::Auto => "auto",
            RecognizerLanguage::Iso(s) => s.as_str(),
        }
    }
}

/// Result of one `transcribe` call.
#[derive(Debug, Clone, Default)]
pub struct RecognizerOutput {
    pub text: String,
    pub duration_ms: i64,
    pub detected_language: Option<String>,
    pub detected_probability: f32,
    pub error: Option<String>,
}

/// The black-box ASR contract. Input is always a 16 kHz mono 16-bit PCM
/// WAV file; implementations must be safe to invoke serially from any
/// thread (the scheduler and the final-transcription executor both call
/// through this trait from different tasks, never concurrently for the
/// same session — see P4).
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn load_model(&self, path: &Path) -> Result<bool, RecognizerError>;
    fn is_model_loaded(&self) -> bool;
    async fn transcribe(
        &self,
        wav_path: &Path,
        language: RecognizerLanguage,
    ) -> Result<RecognizerOutput, RecognizerError>;
}

/// Test double: returns canned output per requested language, configured
/// up front (e.g. `auto -> ""`, `en -> "the the the the the"`).
pub struct StubRecognizer {
    loaded: AtomicBool,
    responses: parking_lot::Mutex<std::collections::HashMap<String, RecognizerOutput>>,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(true),
            responses: parking_lot::Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Queue the output returned when `transcribe` is called with `language`.
    pub fn on(&self, language: &str, output: RecognizerOutput) {
        self.responses.lock().insert(language.to_string(), output);
    }
}

impl Default for StubRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recognizer for StubRecognizer {
    async fn load_model(&self, _path: &Path) -> Result<bool, RecognizerError> {
        self.loaded.store(true, Ordering::SeqCst);
        Ok(true)
    }

    fn is_model_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn transcribe(
        &self,
        _wav_path: &Path,
        language: RecognizerLanguage,
    ) -> Result<RecognizerOutput, RecognizerError> {
        Ok(self
            .responses
            .lock()
            .get(language.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

/// On-device Whisper backend: loads a GGML model file, runs greedy decode
/// over the full audio buffer, and concatenates per-segment text into one
/// transcript string.
pub struct WhisperRecognizer {
    ctx: parking_lot::Mutex<Option<whisper_rs::WhisperContext>>,
}

impl WhisperRecognizer {
    pub fn new() -> Self {
        Self {
            ctx: parking_lot::Mutex::new(None),
        }
    }
}

impl Default for WhisperRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Recognizer for WhisperRecognizer {
    async fn load_model(&self, path: &Path) -> Result<bool, RecognizerError> {
        if !path.exists() {
            return Err(RecognizerError::ModelLoadFailed(path.to_path_buf()));
        }
        let path_str = path
            .to_str()
            .ok_or_else(|| RecognizerError::ModelLoadFailed(path.to_path_buf()))?
            .to_string();

        let ctx = tokio::task::spawn_blocking(move || {
            whisper_rs::WhisperContext::new_with_params(
                &path_str,
                whisper_rs::WhisperContextParameters::default(),
            )
        })
        .await
        .map_err(|e| RecognizerError::Failed(e.to_string()))?
        .map_err(|e| RecognizerError::Failed(e.to_string()))?;

        *self.ctx.lock() = Some(ctx);
        Ok(true)
    }

    fn is_model_loaded(&self) -> bool {
        self.ctx.lock().is_some()
    }

    async fn transcribe(
        &self,
        wav_path: &Path,
        language: RecognizerLanguage,
    ) -> Result<RecognizerOutput, RecognizerError> {
        let samples = load_wav_as_f32(wav_path)
            .map_err(|e| RecognizerError::Failed(e.to_string()))?;

        let ctx_guard = self.ctx.lock();
        let ctx = ctx_guard.as_ref().ok_or(RecognizerError::ModelNotLoaded)?;

        let mut state = ctx
            .create_state()
            .map_err(|e| RecognizerError::Failed(e.to_string()))?;

        let mut params =
            whisper_rs::FullParams::new(whisper_rs::SamplingStrategy::Greedy { best_of: 1 });
        match &language {
            RecognizerLanguage::Auto => params.set_language(None),
            RecognizerLanguage::Iso(code) => params.set_language(Some(code.as_str())),
        }
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &samples)
            .map_err(|e| RecognizerError::Failed(e.to_string()))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| RecognizerError::Failed(e.to_string()))?;

        let mut text = String::new();
        for i in 0..num_segments {
            let seg = state
                .full_get_segment_text(i)
                .map_err(|e| RecognizerError::Failed(e.to_string()))?;
            let seg = seg.trim();
            if !seg.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(seg);
            }
        }

        let detected_language = state
            .full_lang_id()
            .ok()
            .and_then(whisper_rs::get_lang_str)
            .map(|s| s.to_string());

        Ok(RecognizerOutput {
            text,
            duration_ms: (samples.len() as i64 * 1000) / crate::config::SAMPLE_RATE as i64,
            detected_language,
            // whisper-rs does not expose a calibrated detection probability
            // through this code path; callers treat an unknown probability
            // as 0.0, which conservatively never crosses the lock thresholds.
            detected_probability: 0.0,
            error: None,
        })
    }
}

fn load_wav_as_f32(path: &Path) -> Result<Vec<f32>, hound::Error> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_val))
                .collect::<Result<_, _>>()?
        }
    };
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_returns_configured_output_per_language() {
        let stub = StubRecognizer::new();
        stub.on(
            "en",
            RecognizerOutput {
                text: "hello".into(),
                ..Default::default()
            },
        );
        let out = stub
            .transcribe(Path::new("/dev/null"), RecognizerLanguage::code("en"))
            .await
            .unwrap();
        assert_eq!(out.text, "hello");

        let empty = stub
            .transcribe(Path::new("/dev/null"), RecognizerLanguage::Auto)
            .await
            .unwrap();
        assert_eq!(empty.text, "");
    }
}
