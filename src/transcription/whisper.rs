//! # Whisper Inference (candle)
//!
//! The production `SpeechEngine`: a Whisper checkpoint loaded with candle and
//! decoded greedily, 30 seconds of audio at a time.
//!
//! ## Transcription Process:
//! 1. Decode the upload to 16 kHz mono PCM (`audio::decode`)
//! 2. Compute the log-mel spectrogram with the Slaney filter bank
//! 3. Run the encoder on each 30 s segment
//! 4. Greedy-decode tokens after `<|startoftranscript|><|lang|><|transcribe|><|notimestamps|>`
//! 5. Drop segments the model flags as silence, join the rest

use super::download::{CONFIG_FILE, TOKENIZER_FILE, WEIGHTS_FILE};
use super::engine::{EngineError, ModelLoader, SpeechEngine, Transcript};
use super::model::ModelSize;
use crate::audio::{mel, AudioDecoder};
use crate::device::{self, DevicePreference};
use anyhow::{anyhow, Context, Result};
use candle_core::{Device, IndexOp, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, audio, Config};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

/// Loads Whisper checkpoints from a tier directory.
pub struct WhisperLoader {
    device: DevicePreference,
    language: Option<String>,
    decoder: AudioDecoder,
}

impl WhisperLoader {
    pub fn new(device: DevicePreference, language: Option<String>, decoder: AudioDecoder) -> Self {
        Self {
            device,
            language,
            decoder,
        }
    }
}

impl ModelLoader for WhisperLoader {
    fn load(&self, size: ModelSize, model_dir: &Path) -> Result<Arc<dyn SpeechEngine>> {
        let start = Instant::now();
        let device = device::select_device(self.device);
        info!(model = %size, device = device::describe(&device), "Loading Whisper weights");

        let config: Config = serde_json::from_reader(
            std::fs::File::open(model_dir.join(CONFIG_FILE))
                .with_context(|| format!("Missing {} for {}", CONFIG_FILE, size))?,
        )
        .with_context(|| format!("Invalid {} for {}", CONFIG_FILE, size))?;

        let tokenizer = Tokenizer::from_file(model_dir.join(TOKENIZER_FILE))
            .map_err(|e| anyhow!("Failed to load tokenizer for {}: {}", size, e))?;

        // SAFETY: the weights file is owned by this process's model cache and
        // is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[model_dir.join(WEIGHTS_FILE)], m::DTYPE, &device)?
        };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        let tokens = SpecialTokens::resolve(&tokenizer, self.language.as_deref())?;
        let suppress = suppress_mask(&config, &device)?;
        let mel_filters = mel::mel_filters(m::SAMPLE_RATE as u32, config.num_mel_bins);

        info!(
            model = %size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Whisper model loaded"
        );

        Ok(Arc::new(WhisperEngine {
            model: Mutex::new(model),
            config,
            tokenizer,
            device,
            mel_filters,
            suppress,
            tokens,
            language: self.language.clone(),
            decoder: self.decoder.clone(),
        }))
    }
}

/// Token ids looked up once from the tokenizer.
struct SpecialTokens {
    sot: u32,
    eot: u32,
    transcribe: u32,
    no_timestamps: u32,
    no_speech: Option<u32>,
    language: Option<u32>,
}

impl SpecialTokens {
    fn resolve(tokenizer: &Tokenizer, language: Option<&str>) -> Result<Self> {
        let id = |token: &str| {
            tokenizer
                .token_to_id(token)
                .ok_or_else(|| anyhow!("Tokenizer has no {} token", token))
        };

        let language = match language {
            Some(lang) => {
                let token = tokenizer.token_to_id(&format!("<|{}|>", lang));
                if token.is_none() {
                    warn!(language = lang, "Model has no token for language, letting it detect");
                }
                token
            }
            None => None,
        };

        Ok(Self {
            sot: id(m::SOT_TOKEN)?,
            eot: id(m::EOT_TOKEN)?,
            transcribe: id(m::TRANSCRIBE_TOKEN)?,
            no_timestamps: id(m::NO_TIMESTAMPS_TOKEN)?,
            no_speech: m::NO_SPEECH_TOKENS
                .iter()
                .find_map(|token| tokenizer.token_to_id(token)),
            language,
        })
    }

    fn prompt(&self) -> Vec<u32> {
        let mut tokens = vec![self.sot];
        tokens.extend(self.language);
        tokens.push(self.transcribe);
        tokens.push(self.no_timestamps);
        tokens
    }
}

/// Additive logit mask: `-inf` for every token the config says to suppress.
fn suppress_mask(config: &Config, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..config.vocab_size as u32)
        .map(|i| {
            if config.suppress_tokens.contains(&i) {
                f32::NEG_INFINITY
            } else {
                0.0
            }
        })
        .collect();
    Ok(Tensor::new(mask.as_slice(), device)?)
}

struct SegmentResult {
    text: String,
    avg_logprob: f64,
    no_speech_prob: f64,
}

/// One loaded Whisper tier.
///
/// Audio is decoded to 16 kHz mono, cut into 30 s windows and each window
/// is greedily decoded on its own. Windows the model marks as silence are
/// dropped from the transcript.
pub struct WhisperEngine {
    /// The decoder keeps a cross-attention cache, so decoding needs `&mut`.
    model: Mutex<m::model::Whisper>,
    config: Config,
    tokenizer: Tokenizer,
    device: Device,
    mel_filters: Vec<f32>,
    suppress: Tensor,
    tokens: SpecialTokens,
    language: Option<String>,
    decoder: AudioDecoder,
}

impl WhisperEngine {
    fn run(&self, pcm: &[f32]) -> Result<String> {
        let mel = audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let n_mels = self.config.num_mel_bins;
        let mel_len = mel.len() / n_mels;
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len), &self.device)?;

        // Frames that actually carry audio; the rest is padding added by pcm_to_mel.
        let content_frames = (pcm.len() / m::HOP_LENGTH).min(mel_len);

        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow!("Whisper model lock poisoned"))?;

        let mut pieces = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let segment_size = usize::min(content_frames - seek, m::N_FRAMES);
            let segment = mel.narrow(2, seek, segment_size)?;
            let result = self.decode_segment(&mut model, &segment)?;
            seek += segment_size;

            if result.no_speech_prob > m::NO_SPEECH_THRESHOLD
                && result.avg_logprob < m::LOGPROB_THRESHOLD
            {
                debug!(seek, no_speech_prob = result.no_speech_prob, "Skipping silent segment");
                continue;
            }
            if !result.text.is_empty() {
                pieces.push(result.text);
            }
        }

        Ok(pieces.join(" ").trim().to_string())
    }

    fn decode_segment(&self, model: &mut m::model::Whisper, mel: &Tensor) -> Result<SegmentResult> {
        let audio_features = model.encoder.forward(mel, true)?;
        let sample_len = model.config.max_target_positions / 2;

        let mut tokens = self.tokens.prompt();
        let prompt_len = tokens.len();
        let mut sum_logprob = 0f64;
        let mut no_speech_prob = f64::NAN;

        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            if i == 0 {
                if let Some(no_speech) = self.tokens.no_speech {
                    let logits = model.decoder.final_linear(&ys.i(..1)?)?.i(0)?.i(0)?;
                    no_speech_prob = softmax(&logits, 0)?
                        .i(no_speech as usize)?
                        .to_scalar::<f32>()? as f64;
                }
            }

            let (_, seq_len, _) = ys.dims3()?;
            let logits = model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?;
            let logits = logits.broadcast_add(&self.suppress)?;

            let next_token = logits.argmax(D::Minus1)?.to_scalar::<u32>()?;
            let prob = softmax(&logits, D::Minus1)?
                .i(next_token as usize)?
                .to_scalar::<f32>()? as f64;

            if next_token == self.tokens.eot || tokens.len() > model.config.max_target_positions {
                break;
            }
            tokens.push(next_token);
            sum_logprob += prob.ln();
        }

        let generated = &tokens[prompt_len..];
        let text = self
            .tokenizer
            .decode(generated, true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;

        Ok(SegmentResult {
            text: text.trim().to_string(),
            avg_logprob: sum_logprob / generated.len().max(1) as f64,
            no_speech_prob,
        })
    }
}

impl SpeechEngine for WhisperEngine {
    fn transcribe(&self, audio: &[u8], filename_hint: Option<&str>) -> Result<Transcript, EngineError> {
        let start = Instant::now();
        let pcm = self.decoder.decode(audio, filename_hint)?;
        let text = self
            .run(&pcm)
            .map_err(|e| EngineError::Inference(format!("{:#}", e)))?;

        debug!(
            audio_seconds = pcm.len() as f64 / m::SAMPLE_RATE as f64,
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = text.chars().count(),
            "Transcribed upload"
        );

        Ok(Transcript {
            text,
            language: self.language.clone(),
        })
    }
}
