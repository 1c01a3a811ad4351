//! # Audio Processing Module
//!
//! Everything between "bytes uploaded by a browser" and "samples the model
//! can read".
//!
//! ## Key Components:
//! - **Format detection**: magic-byte sniffing with an extension fallback
//! - **Decoding**: WAV in-process, other containers through ffmpeg
//! - **Mel filters**: the filter bank used for Whisper's log-mel input
//!
//! ## Output Format:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Channels**: Mono
//! - **Samples**: `f32` in `[-1.0, 1.0]`

pub mod decode; // WAV / ffmpeg decoding to 16 kHz mono
pub mod format; // Container detection
pub mod mel;    // Slaney mel filter bank

pub use decode::AudioDecoder;
