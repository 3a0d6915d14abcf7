//! Engine configuration
//!
//! `EngineConfig` is loaded from YAML or JSON (chosen by file extension) and
//! may be overridden by CLI flags. `ModelConfig` holds what the engine reads
//! from the model directory itself: `config.json` and
//! `generation_config.json`, both optional.

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{detokenizer::DecodeMode, logging::LoggingConfig};
use llm_tokenizer::TokenIdType;

/// Fallback when neither the engine config nor `config.json` set `max_length`
pub const DEFAULT_MAX_LENGTH: usize = 1024;

const MODEL_CONFIG_FILE: &str = "config.json";
const GENERATION_CONFIG_FILE: &str = "generation_config.json";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding `tokenizer.json` and the model's config files
    pub model_dir: PathBuf,
    /// Tokenizer file or directory, when not `model_dir`
    pub tokenizer_path: Option<PathBuf>,
    /// Explicit chat template (`.jinja`, or `.json` with a `chat_template` field)
    pub chat_template_path: Option<PathBuf>,
    pub decode_mode: DecodeMode,
    pub max_length: Option<usize>,
    /// Tokens reserved for generation; subtracted from `max_length`
    pub max_dec_len: usize,
    /// Idle time after which abandoned request state is swept
    pub state_ttl_secs: Option<u64>,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            ..Default::default()
        }
    }

    /// Load from a `.yaml`/`.yml` or `.json` file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        let config: Self = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => {
                serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unsupported config file extension {:?} for '{}'",
                    other.unwrap_or(""),
                    path.display()
                )))
            }
        };

        debug!(path = %path.display(), "Loaded engine config");
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.model_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("model_dir is required".to_string()));
        }
        if self.state_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "state_ttl_secs must be positive".to_string(),
            ));
        }
        if let Some(max_length) = self.max_length {
            source_length(max_length, self.max_dec_len)?;
        }
        Ok(())
    }

    /// Where the tokenizer is loaded from
    pub fn tokenizer_source(&self) -> &Path {
        self.tokenizer_path.as_deref().unwrap_or(&self.model_dir)
    }

    pub fn state_ttl(&self) -> Option<Duration> {
        self.state_ttl_secs.map(Duration::from_secs)
    }

    /// Maximum prompt length after encoding: `max_length - max_dec_len`
    pub fn max_src_length(&self, model: &ModelConfig) -> ConfigResult<usize> {
        let max_length = self
            .max_length
            .or(model.max_length)
            .unwrap_or(DEFAULT_MAX_LENGTH);
        source_length(max_length, self.max_dec_len)
    }
}

fn source_length(max_length: usize, max_dec_len: usize) -> ConfigResult<usize> {
    max_length
        .checked_sub(max_dec_len)
        .filter(|len| *len > 0)
        .ok_or_else(|| {
            ConfigError::Invalid(format!(
                "max_dec_len ({}) must be smaller than max_length ({})",
                max_dec_len, max_length
            ))
        })
}

/// Settings read from the model directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelConfig {
    pub max_length: Option<usize>,
    /// `eos_token_id` from `generation_config.json`, in file order
    pub eos_token_ids: Vec<TokenIdType>,
}

#[derive(Deserialize)]
struct RawModelConfig {
    max_length: Option<usize>,
}

#[derive(Deserialize)]
struct RawGenerationConfig {
    eos_token_id: Option<OneOrMany>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(TokenIdType),
    Many(Vec<TokenIdType>),
}

impl ModelConfig {
    pub fn load(model_dir: &Path) -> ConfigResult<Self> {
        let max_length = read_optional_json::<RawModelConfig>(&model_dir.join(MODEL_CONFIG_FILE))?
            .and_then(|config| config.max_length);

        let eos_token_ids =
            match read_optional_json::<RawGenerationConfig>(&model_dir.join(GENERATION_CONFIG_FILE))?
                .and_then(|config| config.eos_token_id)
            {
                Some(OneOrMany::One(id)) => vec![id],
                Some(OneOrMany::Many(ids)) => ids,
                None => Vec::new(),
            };

        debug!(
            model_dir = %model_dir.display(),
            ?max_length,
            ?eos_token_ids,
            "Loaded model config"
        );
        Ok(Self {
            max_length,
            eos_token_ids,
        })
    }
}

fn read_optional_json<T: serde::de::DeserializeOwned>(path: &Path) -> ConfigResult<Option<T>> {
    if !path.is_file() {
        return Ok(None);
    }
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_from_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.yaml");
        fs::write(
            &path,
            "model_dir: /models/llama\ndecode_mode: full_redecode\nmax_dec_len: 24\nstate_ttl_secs: 300\nlogging:\n  level: debug\n  json: true\n",
        )
        .unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/models/llama"));
        assert_eq!(config.decode_mode, DecodeMode::FullRedecode);
        assert_eq!(config.max_dec_len, 24);
        assert_eq!(config.state_ttl(), Some(Duration::from_secs(300)));
        assert_eq!(config.logging.level, "debug");
        assert!(config.logging.json);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.json");
        fs::write(&path, r#"{"model_dir": "/models/tiny"}"#).unwrap();

        let config = EngineConfig::from_file(&path).unwrap();
        assert_eq!(config.decode_mode, DecodeMode::OffsetTracking);
        assert_eq!(config.max_dec_len, 0);
        assert_eq!(config.tokenizer_source(), Path::new("/models/tiny"));
        assert_eq!(config.state_ttl(), None);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_from_file_errors() {
        let dir = TempDir::new().unwrap();

        let missing = EngineConfig::from_file(dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));

        let toml = dir.path().join("engine.toml");
        fs::write(&toml, "model_dir = 'x'").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&toml).unwrap_err(),
            ConfigError::Invalid(_)
        ));

        let bad = dir.path().join("engine.yaml");
        fs::write(&bad, "decode_mode: sideways\n").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&bad).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }

    #[test]
    fn test_validate() {
        assert!(EngineConfig::default().validate().is_err());

        let mut config = EngineConfig::new("/models/tiny");
        assert!(config.validate().is_ok());

        config.max_length = Some(16);
        config.max_dec_len = 16;
        assert!(config.validate().is_err());

        config.max_dec_len = 8;
        config.state_ttl_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_src_length_resolution() {
        let mut config = EngineConfig::new("/models/tiny");
        config.max_dec_len = 24;

        let model = ModelConfig::default();
        assert_eq!(config.max_src_length(&model).unwrap(), DEFAULT_MAX_LENGTH - 24);

        let model = ModelConfig {
            max_length: Some(2048),
            ..Default::default()
        };
        assert_eq!(config.max_src_length(&model).unwrap(), 2024);

        config.max_length = Some(128);
        assert_eq!(config.max_src_length(&model).unwrap(), 104);

        config.max_dec_len = 200;
        assert!(config.max_src_length(&model).is_err());
    }

    #[test]
    fn test_model_config_files() {
        let dir = TempDir::new().unwrap();
        assert_eq!(ModelConfig::load(dir.path()).unwrap(), ModelConfig::default());

        fs::write(dir.path().join(MODEL_CONFIG_FILE), r#"{"max_length": 4096}"#).unwrap();
        fs::write(
            dir.path().join(GENERATION_CONFIG_FILE),
            r#"{"eos_token_id": [2, 32000]}"#,
        )
        .unwrap();
        let config = ModelConfig::load(dir.path()).unwrap();
        assert_eq!(config.max_length, Some(4096));
        assert_eq!(config.eos_token_ids, vec![2, 32000]);

        fs::write(dir.path().join(GENERATION_CONFIG_FILE), r#"{"eos_token_id": 7}"#).unwrap();
        assert_eq!(ModelConfig::load(dir.path()).unwrap().eos_token_ids, vec![7]);

        fs::write(dir.path().join(MODEL_CONFIG_FILE), "{").unwrap();
        assert!(matches!(
            ModelConfig::load(dir.path()).unwrap_err(),
            ConfigError::Parse { .. }
        ));
    }
}
