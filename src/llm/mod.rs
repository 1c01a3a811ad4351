//! # Text Optimization (LLM)
//!
//! Optional cleanup of transcribed text by an external OpenAI-compatible
//! endpoint.
//!
//! ## Components:
//! - **config**: stored endpoint records and key masking
//! - **registry**: the JSON-file backed CRUD store with a single default
//! - **client**: chat-completion calls, probes and optimization
//! - **prompt**: system prompt loading and the user message template

pub mod client;
pub mod config;
pub mod prompt;
pub mod registry;

pub use client::LlmClient;
pub use self::config::{LlmConfigPatch, LlmConfigView, NewLlmConfig};
pub use registry::LlmConfigRegistry;
