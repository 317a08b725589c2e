//! Microphone capture, resampling and fan-out to the rolling window and the
//! canonical WAV file.
//!
//! Opens a `cpal` input stream at the device's native rate, spawns a thread
//! that loops on an `is_recording` flag, and tears the stream down by
//! dropping it. Samples are linearly resampled to 16 kHz mono in
//! `resample()` and fanned out to the ring buffer and to a serial writer
//! thread that appends them to the WAV file on disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use thiserror::Error;

use crate::config::SAMPLE_RATE;
use crate::ring_buffer::RingBuffer;
use crate::wav::{WavError, WavWriter};

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("default stream config error: {0}")]
    DefaultStreamConfigError(#[from] cpal::DefaultStreamConfigError),
    #[error("audio stream build error: {0}")]
    BuildStreamError(#[from] cpal::BuildStreamError),
    #[error("audio stream play error: {0}")]
    PlayStreamError(#[from] cpal::PlayStreamError),
    #[error("wav file error: {0}")]
    Wav(#[from] WavError),
    #[error("capture thread panicked")]
    CaptureThreadPanicked,
    #[error("writer thread panicked")]
    WriterThreadPanicked,
}

/// Result of a finished capture session: the finalized WAV path and the
/// authoritative duration derived from `totalFramesWritten`.
pub struct AudioGraphResult {
    pub wav_path: PathBuf,
    pub duration_ms: i64,
}

enum WriterMsg {
    Samples(Vec<i16>),
    Barrier(std_mpsc::Sender<()>),
}

/// Owns the capture thread and the serial writer thread for one recording
/// session. `stop` tears both down and returns the finalized file.
pub struct AudioGraph {
    is_running: Arc<AtomicBool>,
    total_frames: Arc<AtomicU64>,
    writer_tx: std_mpsc::Sender<WriterMsg>,
    capture_thread: Option<JoinHandle<()>>,
    writer_thread: Option<JoinHandle<Result<PathBuf, WavError>>>,
}

impl AudioGraph {
    /// Start capturing from the default input device, fanning samples out
    /// to `ring` and to a freshly-created WAV file at `wav_path`.
    pub fn start(wav_path: PathBuf, ring: Arc<RingBuffer>) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or(AudioError::NoInputDevice)?;
        let config = device.default_input_config()?;
        let device_sample_rate = config.sample_rate().0;
        let device_channels = config.channels() as usize;

        let is_running = Arc::new(AtomicBool::new(true));
        let total_frames = Arc::new(AtomicU64::new(0));

        let (writer_tx, writer_rx) = std_mpsc::channel::<WriterMsg>();

        if let Some(parent) = wav_path.parent() {
            std::fs::create_dir_all(parent).map_err(WavError::Open)?;
        }
        let mut writer = WavWriter::create(&wav_path)?;
        let writer_path = wav_path.clone();
        let total_frames_writer = total_frames.clone();
        let writer_thread = std::thread::spawn(move || -> Result<PathBuf, WavError> {
            loop {
                match writer_rx.recv() {
                    Ok(WriterMsg::Samples(samples)) => {
                        writer.append(&samples)?;
                        total_frames_writer.fetch_add(samples.len() as u64, Ordering::SeqCst);
                    }
                    Ok(WriterMsg::Barrier(ack)) => {
                        let _ = ack.send(());
                    }
                    Err(_) => break,
                }
            }
            writer.finish().map(|_| writer_path)
        });

        let is_running_cb = is_running.clone();
        let ring_cb = ring.clone();
        let writer_tx_cb = writer_tx.clone();

        let err_fn = |err| tracing::error!(%err, "audio stream error");

        let stream = match config.sample_format() {
            SampleFormat::F32 => device.build_input_stream(
                &config.clone().into(),
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    on_audio(
                        data,
                        device_sample_rate,
                        device_channels,
                        &is_running_cb,
                        &ring_cb,
                        &writer_tx_cb,
                    );
                },
                err_fn,
                None,
            )?,
            SampleFormat::I16 => {
                let is_running_cb = is_running.clone();
                let ring_cb = ring.clone();
                let writer_tx_cb = writer_tx.clone();
                device.build_input_stream(
                    &config.clone().into(),
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let float: Vec<f32> = data.iter().map(|&s| s.to_float_sample()).collect();
                        on_audio(
                            &float,
                            device_sample_rate,
                            device_channels,
                            &is_running_cb,
                            &ring_cb,
                            &writer_tx_cb,
                        );
                    },
                    err_fn,
                    None,
                )?
            }
            SampleFormat::U16 => {
                let is_running_cb = is_running.clone();
                let ring_cb = ring.clone();
                let writer_tx_cb = writer_tx.clone();
                device.build_input_stream(
                    &config.clone().into(),
                    move |data: &[u16], _: &cpal::InputCallbackInfo| {
                        let float: Vec<f32> = data.iter().map(|&s| s.to_float_sample()).collect();
                        on_audio(
                            &float,
                            device_sample_rate,
                            device_channels,
                            &is_running_cb,
                            &ring_cb,
                            &writer_tx_cb,
                        );
                    },
                    err_fn,
                    None,
                )?
            }
            other => {
                tracing::warn!(?other, "unsupported sample format, using default f32 path");
                device.build_input_stream(
                    &config.clone().into(),
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        on_audio(
                            data,
                            device_sample_rate,
                            device_channels,
                            &is_running_cb,
                            &ring_cb,
                            &writer_tx_cb,
                        );
                    },
                    err_fn,
                    None,
                )?
            }
        };

        mute_output_route();

        let is_running_capture = is_running.clone();
        let capture_thread = std::thread::spawn(move || {
            if let Err(err) = stream.play() {
                tracing::error!(%err, "failed to start capture stream");
                is_running_capture.store(false, Ordering::SeqCst);
                return;
            }
            while is_running_capture.load(Ordering::SeqCst) {
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            drop(stream);
        });

        Ok(Self {
            is_running,
            total_frames,
            writer_tx,
            capture_thread: Some(capture_thread),
            writer_thread: Some(writer_thread),
        })
    }

    /// Halt capture, barrier the writer queue, finalize the WAV file and
    /// report the authoritative duration.
    pub fn stop(mut self) -> Result<AudioGraphResult, AudioError> {
        self.is_running.store(false, Ordering::SeqCst);
        if let Some(t) = self.capture_thread.take() {
            t.join().map_err(|_| AudioError::CaptureThreadPanicked)?;
        }

        let (ack_tx, ack_rx) = std_mpsc::channel();
        // A closed receiver (writer thread already exited) just means the
        // barrier is moot; proceed to collect the writer's final result.
        let _ = self.writer_tx.send(WriterMsg::Barrier(ack_tx));
        let _ = ack_rx.recv();

        drop(self.writer_tx);
        let wav_path = self
            .writer_thread
            .take()
            .expect("writer thread present")
            .join()
            .map_err(|_| AudioError::WriterThreadPanicked)??;

        let frames = self.total_frames.load(Ordering::SeqCst);
        let duration_ms = (frames * 1000 / SAMPLE_RATE as u64) as i64;

        Ok(AudioGraphResult {
            wav_path,
            duration_ms,
        })
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::SeqCst)
    }
}

fn on_audio(
    data: &[f32],
    device_sample_rate: u32,
    device_channels: usize,
    is_running: &AtomicBool,
    ring: &RingBuffer,
    writer_tx: &std_mpsc::Sender<WriterMsg>,
) {
    if !is_running.load(Ordering::SeqCst) {
        return;
    }

    let mono: Vec<f32> = if device_channels > 1 {
        data.chunks(device_channels)
            .map(|c| c.iter().sum::<f32>() / device_channels as f32)
            .collect()
    } else {
        data.to_vec()
    };

    let resampled = if device_sample_rate != SAMPLE_RATE {
        resample(&mono, device_sample_rate, SAMPLE_RATE)
    } else {
        mono
    };

    let samples: Vec<i16> = resampled
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect();

    if samples.is_empty() {
        return;
    }

    ring.append(&samples);
    let _ = writer_tx.send(WriterMsg::Samples(samples));
}

/// Linear-interpolation resampler shared by capture and by any future
/// offline resampling need, instead of re-deriving it per call site.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    let mut out = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_idx = i as f64 / ratio;
        let idx0 = src_idx.floor() as usize;
        let idx1 = (idx0 + 1).min(samples.len().saturating_sub(1));
        let frac = src_idx - idx0 as f64;
        if idx0 < samples.len() {
            let v = samples[idx0] as f64 * (1.0 - frac) + samples[idx1] as f64 * frac;
            out.push(v as f32);
        }
    }
    out
}

/// Mute the output route so monitored audio never feeds back into capture.
/// A no-op stub behind a per-target `cfg`, ready for a host app to fill in
/// with a real platform output-gain call.
#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn mute_output_route() {}

#[cfg(any(target_os = "macos", target_os = "windows"))]
fn mute_output_route() {
    // Platform output-routing APIs are not part of this crate's scope.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_when_rates_match() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_downsamples_to_expected_length() {
        let samples = vec![0.0; 48000];
        let out = resample(&samples, 48000, 16000);
        assert_eq!(out.len(), 16000);
    }

    #[test]
    fn resample_upsamples_to_expected_length() {
        let samples = vec![0.0; 16000];
        let out = resample(&samples, 16000, 48000);
        assert_eq!(out.len(), 48000);
    }
}
