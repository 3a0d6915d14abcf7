use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;
use validator::{Validate, ValidationError};

// ============================================================================
// Request Type
// ============================================================================

/// Generation request as handed to the detokenizer before scheduling
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_generate_request"))]
pub struct GenerateRequest {
    /// Request identifier; keys all per-request decode state
    #[validate(length(min = 1, message = "req_id is required and cannot be empty"))]
    pub req_id: String,

    /// Prompt text, encoded when `input_ids` is absent
    pub text: Option<String>,

    /// Chat messages, rendered through the tokenizer's chat template
    pub messages: Option<Vec<Value>>,

    /// Pre-tokenized prompt; skips encoding when present
    pub input_ids: Option<Vec<u32>>,

    /// Caller-supplied end-of-sequence ids (`null` entries are dropped)
    #[serde(default, deserialize_with = "deserialize_token_ids")]
    pub eos_token_ids: Option<Vec<u32>>,

    /// Fields the detokenizer passes through untouched
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl GenerateRequest {
    pub fn from_text(req_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            req_id: req_id.into(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn from_messages(req_id: impl Into<String>, messages: Vec<Value>) -> Self {
        Self {
            req_id: req_id.into(),
            messages: Some(messages),
            ..Default::default()
        }
    }

    pub fn from_input_ids(req_id: impl Into<String>, input_ids: Vec<u32>) -> Self {
        Self {
            req_id: req_id.into(),
            input_ids: Some(input_ids),
            ..Default::default()
        }
    }
}

fn validate_generate_request(req: &GenerateRequest) -> Result<(), ValidationError> {
    if req.input_ids.is_none() && req.text.is_none() && req.messages.is_none() {
        return Err(ValidationError::new("prompt_required")
            .with_message("one of input_ids, text or messages is required".into()));
    }
    Ok(())
}

// ============================================================================
// Response Types
// ============================================================================

/// One generation step reported by the engine
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Validate)]
pub struct GenerateResponse {
    #[validate(length(min = 1, message = "req_id is required and cannot be empty"))]
    pub req_id: String,

    /// Token ids produced in this step
    #[serde(default)]
    pub token_ids: Vec<u32>,

    /// Zero-based index of this step within the request
    #[serde(default)]
    pub send_idx: u64,

    /// Set on the last step of the request; accepts `true`/`false` or `1`/`0`
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_end: bool,

    /// Parallel candidates sharing this request (batched responses)
    pub choices: Option<Vec<ResponseChoice>>,

    /// Text fragment decoded from `token_ids`
    pub token: Option<String>,

    pub usage: Option<Usage>,

    /// Full reconstructed completion, only on the final step
    pub tokens_all: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl GenerateResponse {
    pub fn step(req_id: impl Into<String>, token_ids: Vec<u32>, send_idx: u64) -> Self {
        Self {
            req_id: req_id.into(),
            token_ids,
            send_idx,
            ..Default::default()
        }
    }

    pub fn with_end(mut self, is_end: bool) -> Self {
        self.is_end = is_end;
        self
    }
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResponseChoice {
    #[serde(default)]
    pub token_ids: Vec<u32>,

    pub token: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Usage {
    pub completion_tokens: u64,
}

// ============================================================================
// Deserialization helpers
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Int(i64),
}

fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(flag)) => flag,
        Some(Flag::Int(flag)) => flag != 0,
        None => false,
    })
}

fn deserialize_token_ids<'de, D>(deserializer: D) -> Result<Option<Vec<u32>>, D::Error>
where
    D: Deserializer<'de>,
{
    let ids = Option::<Vec<Option<u32>>>::deserialize(deserializer)?;
    Ok(ids.map(|ids| ids.into_iter().flatten().collect()))
}
