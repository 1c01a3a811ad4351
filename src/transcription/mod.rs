//! # Speech Transcription Module
//!
//! Whisper model management and the transcription pipeline.
//!
//! ## Key Components:
//! - **model**: the tier table and per-tier status descriptors
//! - **download**: fetching tier files from the model hub into the cache
//! - **lifecycle**: download/load/unload state and the current model
//! - **engine**: the `SpeechEngine` / `ModelLoader` seam
//! - **whisper**: the candle implementation of that seam
//! - **gateway**: upload validation plus optional LLM optimization

pub mod download;
pub mod engine;
pub mod gateway;
pub mod lifecycle;
pub mod model;
pub mod whisper;

pub use gateway::TranscriptionGateway;
pub use lifecycle::{DownloadTicket, LoadOutcome, ModelManager};
pub use model::{ModelDescriptor, ModelSize};
