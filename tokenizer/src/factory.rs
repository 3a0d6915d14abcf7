//! Tokenizer construction from local files
//!
//! A source is either a `tokenizer.json` file or a model directory containing
//! one. Load failures are fatal for callers: a detokenizer without a tokenizer
//! cannot be used.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Error, Result};
use tracing::debug;

use crate::{huggingface::HuggingFaceTokenizer, traits::Tokenizer as TokenizerTrait};

const TOKENIZER_FILE: &str = "tokenizer.json";

/// Chat template file names probed in a model directory, in priority order
const CHAT_TEMPLATE_FILES: &[&str] = &["chat_template.jinja", "chat_template.json"];

/// Create a tokenizer from a file or model directory
pub fn create_tokenizer(source: &str) -> Result<Arc<dyn TokenizerTrait>> {
    create_tokenizer_with_chat_template(source, None)
}

/// Create a tokenizer, overriding the chat template with an explicit file
pub fn create_tokenizer_with_chat_template(
    source: &str,
    chat_template_path: Option<&str>,
) -> Result<Arc<dyn TokenizerTrait>> {
    let tokenizer_file = resolve_tokenizer_file(Path::new(source))?;
    let tokenizer_file = tokenizer_file
        .to_str()
        .ok_or_else(|| Error::msg("Tokenizer path is not valid UTF-8"))?;

    // An explicit template wins; otherwise a standalone template file in the
    // model directory takes precedence over tokenizer_config.json.
    let discovered = match chat_template_path {
        Some(_) => None,
        None => Path::new(tokenizer_file)
            .parent()
            .and_then(discover_chat_template_in_dir),
    };
    let template = chat_template_path.or(discovered.as_deref());

    debug!(source, tokenizer_file, chat_template = ?template, "Creating tokenizer");
    let tokenizer = HuggingFaceTokenizer::from_file_with_chat_template(tokenizer_file, template)?;
    Ok(Arc::new(tokenizer))
}

fn resolve_tokenizer_file(source: &Path) -> Result<PathBuf> {
    if source.is_file() {
        return Ok(source.to_path_buf());
    }
    if source.is_dir() {
        let candidate = source.join(TOKENIZER_FILE);
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(Error::msg(format!(
            "No {} found in '{}'",
            TOKENIZER_FILE,
            source.display()
        )));
    }
    Err(Error::msg(format!(
        "Tokenizer source '{}' does not exist",
        source.display()
    )))
}

/// Find a standalone chat template file in `dir`
pub fn discover_chat_template_in_dir(dir: &Path) -> Option<String> {
    CHAT_TEMPLATE_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .and_then(|path| path.to_str().map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_source_is_an_error() {
        let err = create_tokenizer("/nonexistent/model/dir").err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_directory_without_tokenizer_json() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_tokenizer_file(dir.path()).unwrap_err();
        assert!(err.to_string().contains("No tokenizer.json"));
    }

    #[test]
    fn test_discover_chat_template_prefers_jinja() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(discover_chat_template_in_dir(dir.path()), None);

        std::fs::write(dir.path().join("chat_template.json"), "{}").unwrap();
        std::fs::write(dir.path().join("chat_template.jinja"), "{{ x }}").unwrap();
        let found = discover_chat_template_in_dir(dir.path()).unwrap();
        assert!(found.ends_with("chat_template.jinja"));
    }
}
