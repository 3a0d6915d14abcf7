//! Chat template rendering
//!
//! Templates are the Jinja strings shipped in `tokenizer_config.json`
//! (`chat_template`) or as standalone `.jinja` files. Rendering uses minijinja
//! with the Python-compat string methods most HuggingFace templates rely on.

use std::path::Path;

use anyhow::Result;
use minijinja::{context, Environment, ErrorKind};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatTemplateError {
    #[error("Tokenizer has no chat template configured")]
    NotConfigured,

    #[error("Failed to read chat template file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to render chat template: {0}")]
    Render(#[from] minijinja::Error),
}

/// Parameters forwarded into the template context
#[derive(Debug, Clone, Default)]
pub struct ChatTemplateParams<'a> {
    pub add_generation_prompt: bool,
    pub bos_token: Option<&'a str>,
    pub eos_token: Option<&'a str>,
}

/// Optional chat template owned by a tokenizer
#[derive(Debug, Clone, Default)]
pub struct ChatTemplateState {
    template: Option<String>,
}

impl ChatTemplateState {
    pub fn new(template: Option<String>) -> Self {
        Self { template }
    }

    pub fn is_configured(&self) -> bool {
        self.template.is_some()
    }

    pub fn set(&mut self, template: String) {
        self.template = Some(template);
    }

    pub fn apply(&self, messages: &[Value], params: ChatTemplateParams) -> Result<String> {
        let template = self
            .template
            .as_deref()
            .ok_or(ChatTemplateError::NotConfigured)?;
        Ok(render_chat_template(template, messages, &params)?)
    }
}

fn raise_exception(message: String) -> std::result::Result<String, minijinja::Error> {
    Err(minijinja::Error::new(ErrorKind::InvalidOperation, message))
}

/// Render `messages` through a Jinja chat template
pub fn render_chat_template(
    template: &str,
    messages: &[Value],
    params: &ChatTemplateParams,
) -> std::result::Result<String, ChatTemplateError> {
    let mut env = Environment::new();
    minijinja_contrib::add_to_environment(&mut env);
    env.set_unknown_method_callback(minijinja_contrib::pycompat::unknown_method_callback);
    env.add_function("raise_exception", raise_exception);

    let tmpl = env.template_from_str(template)?;
    let rendered = tmpl.render(context! {
        messages => messages,
        add_generation_prompt => params.add_generation_prompt,
        bos_token => params.bos_token.unwrap_or_default(),
        eos_token => params.eos_token.unwrap_or_default(),
    })?;
    Ok(rendered)
}

/// Load a chat template from a `.jinja` file, or from a JSON file carrying a
/// `chat_template` field.
pub fn load_chat_template_from_file(path: &str) -> Result<Option<String>> {
    let content = std::fs::read_to_string(path).map_err(|source| ChatTemplateError::Read {
        path: path.to_string(),
        source,
    })?;

    if Path::new(path)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        let config: Value = serde_json::from_str(&content)?;
        return Ok(chat_template_from_config(&config));
    }

    Ok(Some(content.trim_end_matches('\n').to_string()))
}

/// Extract `chat_template` from a parsed `tokenizer_config.json`.
///
/// Handles both a plain string and the list form
/// `[{"name": "default", "template": "..."}, ...]`.
pub fn chat_template_from_config(config: &Value) -> Option<String> {
    match config.get("chat_template")? {
        Value::String(template) => Some(template.clone()),
        Value::Array(entries) => entries
            .iter()
            .find(|entry| entry.get("name").and_then(Value::as_str) == Some("default"))
            .or_else(|| entries.first())
            .and_then(|entry| entry.get("template"))
            .and_then(Value::as_str)
            .map(String::from),
        _ => None,
    }
}
