//! # Audio Decoding
//!
//! Turns an uploaded file into 16 kHz mono `f32` samples in `[-1.0, 1.0]`,
//! the only input Whisper accepts.
//!
//! ## Decoding paths:
//! - **WAV**: decoded in-process with `hound`, down-mixed and resampled
//! - **everything else**: piped through `ffmpeg`, which emits raw
//!   little-endian `f32` PCM already at 16 kHz mono

use super::format::AudioFormat;
use crate::transcription::engine::EngineError;
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Cursor, Write};
use std::process::{Command, Stdio};
use tracing::debug;

/// Sample rate expected by Whisper.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decodes uploads into Whisper-ready PCM.
#[derive(Debug, Clone)]
pub struct AudioDecoder {
    ffmpeg_path: String,
}

impl AudioDecoder {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    pub fn decode(&self, data: &[u8], filename_hint: Option<&str>) -> Result<Vec<f32>, EngineError> {
        let format = AudioFormat::detect(data, filename_hint).ok_or_else(|| {
            EngineError::UnsupportedFormat(
                filename_hint.unwrap_or("unrecognised container").to_string(),
            )
        })?;

        let samples = match format {
            AudioFormat::Wav => decode_wav(data)?,
            other => self.decode_with_ffmpeg(data, other)?,
        };

        if samples.is_empty() {
            return Err(EngineError::Decode("file contains no audio samples".to_string()));
        }

        debug!(
            format = format.name(),
            seconds = samples.len() as f64 / TARGET_SAMPLE_RATE as f64,
            "Decoded upload"
        );
        Ok(samples)
    }

    fn decode_with_ffmpeg(&self, data: &[u8], format: AudioFormat) -> Result<Vec<f32>, EngineError> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-loglevel",
                "error",
                "-i",
                "pipe:0",
                "-f",
                "f32le",
                "-ac",
                "1",
                "-ar",
                "16000",
                "pipe:1",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                EngineError::UnsupportedFormat(format!(
                    "{} audio needs ffmpeg ({}): {}",
                    format.name(),
                    self.ffmpeg_path,
                    e
                ))
            })?;

        // Feed stdin from another thread so a full stdout pipe can't deadlock us.
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Decode("ffmpeg stdin unavailable".to_string()))?;
        let input = data.to_vec();
        let writer = std::thread::spawn(move || {
            // ffmpeg may close stdin early once it has seen enough; that's fine.
            let _ = stdin.write_all(&input);
        });

        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::Decode(format!("ffmpeg failed: {}", e)))?;
        let _ = writer.join();

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Decode(format!(
                "ffmpeg could not decode {} audio: {}",
                format.name(),
                stderr.trim()
            )));
        }

        Ok(f32le_to_samples(&output.stdout))
    }
}

/// Parse raw little-endian `f32` PCM; a trailing partial sample is dropped.
fn f32le_to_samples(bytes: &[u8]) -> Vec<f32> {
    let count = bytes.len() / 4;
    let mut samples = vec![0f32; count];
    LittleEndian::read_f32_into(&bytes[..count * 4], &mut samples);
    samples
}

fn decode_wav(data: &[u8]) -> Result<Vec<f32>, EngineError> {
    let mut reader = hound::WavReader::new(Cursor::new(data))
        .map_err(|e| EngineError::Decode(format!("invalid WAV file: {}", e)))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| EngineError::Decode(format!("invalid WAV samples: {}", e)))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(|e| EngineError::Decode(format!("invalid WAV samples: {}", e)))?
        }
    };

    let mono = downmix(&interleaved, spec.channels as usize);
    Ok(resample_linear(&mono, spec.sample_rate, TARGET_SAMPLE_RATE))
}

fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

fn resample_linear(samples: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = from as f64 / to as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = pos.floor() as usize;
            let frac = (pos - idx as f64) as f32;
            let a = samples[idx.min(last)];
            let b = samples[(idx + 1).min(last)];
            a + (b - a) * frac
        })
        .collect()
}
