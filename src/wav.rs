//! RIFF/WAVE authoring for 16 kHz mono 16-bit PCM.
//!
//! Hand-rolled rather than delegated to `hound::WavWriter`, since the exact
//! byte layout and the placeholder-then-patch crash-recovery contract
//! (a valid, if short, WAV file exists at every point during recording)
//! need to be held precisely. Reads elsewhere in the crate still go through
//! `hound`.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::SAMPLE_RATE;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const HEADER_LEN: u64 = 44;

#[derive(Debug, Error)]
pub enum WavError {
    #[error("failed to open wav file for writing: {0}")]
    Open(#[source] io::Error),
    #[error("I/O error writing wav data: {0}")]
    Io(#[from] io::Error),
}

/// Append-only RIFF/WAVE writer. Truncates any existing file at
/// construction and writes a zeroed placeholder header; [`Self::finish`]
/// seeks back and patches the size fields once the real length is known.
pub struct WavWriter {
    file: File,
    path: PathBuf,
    data_size: u32,
}

impl WavWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, WavError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(WavError::Open)?;

        write_header(&mut file, 0)?;

        Ok(Self {
            file,
            path,
            data_size: 0,
        })
    }

    /// Write raw little-endian i16 samples and advance `data_size`.
    pub fn append(&mut self, samples: &[i16]) -> Result<(), WavError> {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for &s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        self.file.write_all(&bytes)?;
        self.data_size = self
            .data_size
            .saturating_add(bytes.len() as u32);
        Ok(())
    }

    /// Flush, patch the header with the final sizes, flush again, and
    /// return the finalized path. Consumes the writer.
    pub fn finish(mut self) -> Result<PathBuf, WavError> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        write_header(&mut self.file, self.data_size)?;
        self.file.flush()?;
        Ok(self.path)
    }

    pub fn data_size(&self) -> u32 {
        self.data_size
    }
}

fn write_header(file: &mut File, data_size: u32) -> io::Result<()> {
    let byte_rate = SAMPLE_RATE * CHANNELS as u32 * (BITS_PER_SAMPLE as u32 / 8);
    let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
    let chunk_size = 36u32.saturating_add(data_size);

    let mut header = [0u8; HEADER_LEN as usize];
    header[0..4].copy_from_slice(b"RIFF");
    header[4..8].copy_from_slice(&chunk_size.to_le_bytes());
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    header[16..20].copy_from_slice(&16u32.to_le_bytes());
    header[20..22].copy_from_slice(&1u16.to_le_bytes()); // PCM
    header[22..24].copy_from_slice(&CHANNELS.to_le_bytes());
    header[24..28].copy_from_slice(&SAMPLE_RATE.to_le_bytes());
    header[28..32].copy_from_slice(&byte_rate.to_le_bytes());
    header[32..34].copy_from_slice(&block_align.to_le_bytes());
    header[34..36].copy_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    header[36..40].copy_from_slice(b"data");
    header[40..44].copy_from_slice(&data_size.to_le_bytes());

    file.write_all(&header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn finish_writes_byte_exact_header_and_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");

        let mut w = WavWriter::create(&path).unwrap();
        let samples: Vec<i16> = (0..5000_i32).map(|i| (i % 100) as i16).collect();
        w.append(&samples).unwrap();
        let finished = w.finish().unwrap();
        assert_eq!(finished, path);

        let bytes = std::fs::read(&path).unwrap();
        let file_len = bytes.len() as u32;
        assert_eq!(file_len, HEADER_LEN as u32 + samples.len() as u32 * 2);

        let data_size = u32::from_le_bytes(bytes[40..44].try_into().unwrap());
        assert_eq!(data_size, file_len - HEADER_LEN as u32);

        let chunk_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        assert_eq!(chunk_size, file_len - 8);

        // Round-trip the raw PCM back out.
        let mut reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.sample_rate, SAMPLE_RATE);
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.bits_per_sample, 16);
        let decoded: Vec<i16> = reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(decoded, samples);
        let _ = File::open(&path).unwrap().read(&mut [0u8; 0]);
    }

    #[test]
    fn construction_truncates_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        std::fs::write(&path, b"garbage-from-a-previous-session").unwrap();

        let w = WavWriter::create(&path).unwrap();
        let finished = w.finish().unwrap();
        let bytes = std::fs::read(&finished).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN as usize);
    }

    #[test]
    fn unfinished_writer_leaves_placeholder_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        {
            let mut w = WavWriter::create(&path).unwrap();
            w.append(&[1, 2, 3]).unwrap();
            // dropped without calling finish()
        }
        let bytes = std::fs::read(&path).unwrap();
        // data/chunk size fields are still zero; not a valid WAV duration-wise.
        assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 0);
    }
}
