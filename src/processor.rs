//! Request/response processing around the incremental detokenizer
//!
//! Requests are completed before scheduling: end-of-sequence ids are merged
//! in and prompts are tokenized (through the chat template when the tokenizer
//! has one). Responses coming back from the engine are detokenized step by
//! step, and the full completion is attached to the final response.

use std::{sync::Arc, time::Duration};

use detok_protocol::{GenerateRequest, GenerateResponse, Usage};
use llm_tokenizer::{
    chat_template::ChatTemplateParams, create_tokenizer_with_chat_template, traits::Tokenizer,
    TokenIdType,
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    config::{ConfigError, EngineConfig, ModelConfig, DEFAULT_MAX_LENGTH},
    detokenizer::{create_detokenizer, DecodeMode, Detokenize, StoreStats},
    error::{ProcessorError, ProcessorResult},
};

/// Processor settings that do not come from the tokenizer itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOptions {
    pub decode_mode: DecodeMode,
    /// Encoded prompts are cut to this many tokens
    pub max_src_length: usize,
    /// Extra end-of-sequence ids (from `generation_config.json`)
    pub generation_eos_token_ids: Vec<TokenIdType>,
    pub state_ttl: Option<Duration>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            decode_mode: DecodeMode::default(),
            max_src_length: DEFAULT_MAX_LENGTH,
            generation_eos_token_ids: Vec::new(),
            state_ttl: None,
        }
    }
}

pub struct RequestProcessor {
    tokenizer: Arc<dyn Tokenizer>,
    detokenizer: Arc<dyn Detokenize>,
    options: ProcessorOptions,
}

impl RequestProcessor {
    /// Load the tokenizer and model config named by `config`
    pub fn new(config: &EngineConfig) -> ProcessorResult<Self> {
        config.validate()?;

        let model = ModelConfig::load(&config.model_dir)?;
        let source = path_str(config.tokenizer_source())?;
        let chat_template = config
            .chat_template_path
            .as_deref()
            .map(path_str)
            .transpose()?;
        let tokenizer = create_tokenizer_with_chat_template(source, chat_template)?;

        let options = ProcessorOptions {
            decode_mode: config.decode_mode,
            max_src_length: config.max_src_length(&model)?,
            generation_eos_token_ids: model.eos_token_ids,
            state_ttl: config.state_ttl(),
        };
        info!(
            tokenizer = source,
            decode_mode = %options.decode_mode,
            max_src_length = options.max_src_length,
            chat_template = tokenizer.has_chat_template(),
            "Request processor ready"
        );
        Ok(Self::with_tokenizer(tokenizer, options))
    }

    pub fn with_tokenizer(tokenizer: Arc<dyn Tokenizer>, options: ProcessorOptions) -> Self {
        let detokenizer = create_detokenizer(options.decode_mode, Arc::clone(&tokenizer));
        Self {
            tokenizer,
            detokenizer,
            options,
        }
    }

    pub fn decode_mode(&self) -> DecodeMode {
        self.detokenizer.mode()
    }

    /// Merge EOS ids into `request` and make sure it carries `input_ids`.
    ///
    /// When `max_seq_len` is given and the prompt is longer, the prompt keeps
    /// its first `max_seq_len - 1` ids.
    pub fn process_request(
        &self,
        mut request: GenerateRequest,
        max_seq_len: Option<usize>,
    ) -> ProcessorResult<GenerateRequest> {
        let mut eos_token_ids = request.eos_token_ids.take().unwrap_or_default();
        eos_token_ids.extend(self.eos_token_ids());
        request.eos_token_ids = Some(eos_token_ids);

        let mut input_ids = match request.input_ids.take() {
            Some(ids) => ids,
            None => self.encode_prompt(&request)?,
        };
        if let Some(max_seq_len) = max_seq_len {
            if input_ids.len() > max_seq_len {
                input_ids.truncate(max_seq_len.saturating_sub(1));
            }
        }

        debug!(
            request_id = %request.req_id,
            input_len = input_ids.len(),
            eos_token_ids = ?request.eos_token_ids,
            "Processed request"
        );
        request.input_ids = Some(input_ids);
        Ok(request)
    }

    /// Attach the decoded text of one engine step to `response`.
    ///
    /// Batched responses (`choices` present) decode every candidate under the
    /// shared request id and skip usage and finalization.
    pub fn process_response(
        &self,
        mut response: GenerateResponse,
    ) -> ProcessorResult<GenerateResponse> {
        if let Some(choices) = response.choices.as_mut() {
            for choice in choices.iter_mut() {
                choice.token = Some(self.ids_to_text(&response.req_id, &choice.token_ids)?);
            }
            return Ok(response);
        }

        let token = self.ids_to_text(&response.req_id, &response.token_ids)?;
        response.token = Some(token);
        response.usage = Some(Usage {
            completion_tokens: response.send_idx + 1,
        });
        if response.is_end {
            response.tokens_all = Some(self.clear_request_status(&response.req_id));
        }
        Ok(response)
    }

    /// Decode the next slice of `request_id`'s output
    pub fn ids_to_text(&self, request_id: &str, token_ids: &[TokenIdType]) -> ProcessorResult<String> {
        Ok(self.detokenizer.decode(request_id, token_ids)?)
    }

    /// Full text of `request_id`; drops its decode state
    pub fn clear_request_status(&self, request_id: &str) -> String {
        self.detokenizer.finalize(request_id)
    }

    /// Drop the decode state of an abandoned request
    pub fn cancel_request(&self, request_id: &str) -> bool {
        self.detokenizer.cancel(request_id)
    }

    /// Sweep states idle longer than the configured TTL; no-op without one
    pub fn evict_idle(&self) -> Vec<String> {
        match self.options.state_ttl {
            Some(ttl) => self.detokenizer.evict_idle(ttl),
            None => Vec::new(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.detokenizer.stats()
    }

    /// Tokenizer EOS id followed by the generation config ids, deduplicated
    pub fn eos_token_ids(&self) -> Vec<TokenIdType> {
        let mut ids = Vec::new();
        let candidates = self
            .tokenizer
            .eos_token_id()
            .into_iter()
            .chain(self.options.generation_eos_token_ids.iter().copied());
        for id in candidates {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn eos_token_count(&self) -> usize {
        self.eos_token_ids().len()
    }

    pub fn pad_token_id(&self) -> Option<TokenIdType> {
        self.tokenizer
            .pad_token_id()
            .or_else(|| self.eos_token_ids().first().copied())
    }

    /// Encode `text` and cut it to the source length
    pub fn text_to_ids(&self, text: &str, add_special_tokens: bool) -> ProcessorResult<Vec<TokenIdType>> {
        let mut ids = self
            .tokenizer
            .encode(text, add_special_tokens)?
            .into_token_ids();
        ids.truncate(self.options.max_src_length);
        Ok(ids)
    }

    /// Render `messages` through the chat template and encode the prompt
    pub fn messages_to_ids(&self, messages: &[Value]) -> ProcessorResult<Vec<TokenIdType>> {
        let prompt = self.render_messages(messages)?;
        self.text_to_ids(&prompt, false)
    }

    fn encode_prompt(&self, request: &GenerateRequest) -> ProcessorResult<Vec<TokenIdType>> {
        let has_template = self.tokenizer.has_chat_template();
        match (&request.messages, &request.text) {
            (Some(_), _) if !has_template => {
                Err(ProcessorError::ChatTemplateRequired(request.req_id.clone()))
            }
            (Some(messages), _) => self.messages_to_ids(messages),
            (None, Some(text)) if has_template => {
                self.messages_to_ids(&[json!({"role": "user", "content": text})])
            }
            (None, Some(text)) => self.text_to_ids(text, true),
            (None, None) => Err(ProcessorError::MissingPrompt(request.req_id.clone())),
        }
    }

    fn render_messages(&self, messages: &[Value]) -> ProcessorResult<String> {
        let special_tokens = self.tokenizer.get_special_tokens();
        let params = ChatTemplateParams {
            add_generation_prompt: true,
            bos_token: special_tokens.bos_token.as_deref(),
            eos_token: special_tokens.eos_token.as_deref(),
        };
        Ok(self.tokenizer.apply_chat_template(messages, params)?)
    }
}

fn path_str(path: &std::path::Path) -> Result<&str, ConfigError> {
    path.to_str().ok_or_else(|| {
        ConfigError::Invalid(format!("Path is not valid UTF-8: {}", path.display()))
    })
}
