//! Incremental detokenization engine
//!
//! Turns the token ids a streaming LLM engine produces, a slice at a time,
//! into stable text fragments per request, and prepares requests (EOS ids,
//! prompt tokenization) before they are scheduled.

pub mod config;
pub mod detokenizer;
pub mod error;
pub mod logging;
pub mod processor;

pub use config::{ConfigError, EngineConfig, ModelConfig};
pub use detokenizer::{create_detokenizer, DecodeMode, Detokenize, StoreStats};
pub use error::{ProcessorError, ProcessorResult};
pub use processor::{ProcessorOptions, RequestProcessor};
