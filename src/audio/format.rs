//! Container detection for uploaded audio.
//!
//! Browsers record in WebM/Opus (Chrome, Firefox) or MP4/AAC (Safari), and
//! desktop clients usually upload WAV. The magic bytes decide; the file name
//! extension is only consulted when the header is not recognised.

use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    WebM,
    Ogg,
    Flac,
    Mp3,
    Mp4,
}

impl AudioFormat {
    /// Identify the container from the leading bytes, falling back to the
    /// file name extension.
    pub fn detect(data: &[u8], filename_hint: Option<&str>) -> Option<Self> {
        Self::sniff(data).or_else(|| filename_hint.and_then(Self::from_filename))
    }

    fn sniff(data: &[u8]) -> Option<Self> {
        if data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE" {
            return Some(AudioFormat::Wav);
        }
        if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
            return Some(AudioFormat::WebM);
        }
        if data.starts_with(b"OggS") {
            return Some(AudioFormat::Ogg);
        }
        if data.starts_with(b"fLaC") {
            return Some(AudioFormat::Flac);
        }
        if data.starts_with(b"ID3") {
            return Some(AudioFormat::Mp3);
        }
        // Bare MPEG frame sync
        if data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xE0) == 0xE0 {
            return Some(AudioFormat::Mp3);
        }
        if data.len() >= 8 && &data[4..8] == b"ftyp" {
            return Some(AudioFormat::Mp4);
        }
        None
    }

    fn from_filename(name: &str) -> Option<Self> {
        let ext = Path::new(name).extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "wav" | "wave" => Some(AudioFormat::Wav),
            "webm" | "mkv" => Some(AudioFormat::WebM),
            "ogg" | "oga" | "opus" => Some(AudioFormat::Ogg),
            "flac" => Some(AudioFormat::Flac),
            "mp3" => Some(AudioFormat::Mp3),
            "mp4" | "m4a" | "aac" => Some(AudioFormat::Mp4),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::WebM => "webm",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Mp4 => "mp4",
        }
    }
}
