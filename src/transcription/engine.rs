//! # Speech Engine Interface
//!
//! The seam between the model lifecycle and the actual inference code. The
//! lifecycle manager only ever sees `dyn SpeechEngine` and `dyn ModelLoader`;
//! the candle implementation lives in `whisper.rs` and tests substitute fakes.
//!
//! Both traits are synchronous: loading weights and running the decoder are
//! CPU-bound, so callers run them on `tokio::task::spawn_blocking`.

use super::model::ModelSize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Text produced from one uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transcript {
    pub text: String,

    /// Language the model transcribed in, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to decode audio: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

/// A loaded speech-recognition model.
pub trait SpeechEngine: Send + Sync {
    /// Transcribe one complete audio file.
    ///
    /// `filename_hint` is the uploaded file name; it is only used to guess the
    /// container when the bytes themselves are ambiguous.
    fn transcribe(&self, audio: &[u8], filename_hint: Option<&str>) -> Result<Transcript, EngineError>;
}

/// Builds a `SpeechEngine` from the files of one downloaded tier.
pub trait ModelLoader: Send + Sync {
    fn load(&self, size: ModelSize, model_dir: &Path) -> anyhow::Result<Arc<dyn SpeechEngine>>;
}
