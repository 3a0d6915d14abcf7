// Validated JSON parsing
//
// Deserializes a record and runs the validator crate's Validate trait on it,
// so callers only ever see well-formed requests and responses.

use serde::de::DeserializeOwned;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),
}

/// Parse `input` as JSON and validate the result
pub fn from_json_validated<T>(input: &str) -> Result<T, ProtocolError>
where
    T: DeserializeOwned + Validate,
{
    let data: T = serde_json::from_str(input)?;
    data.validate()?;
    Ok(data)
}

/// Parse a sequence of whitespace-separated JSON values (one document or
/// JSON lines), validating each
pub fn iter_json_validated<'a, T>(input: &'a str) -> impl Iterator<Item = Result<T, ProtocolError>> + 'a
where
    T: DeserializeOwned + Validate + 'a,
{
    serde_json::Deserializer::from_str(input)
        .into_iter::<T>()
        .map(|item| {
            let data = item?;
            data.validate()?;
            Ok(data)
        })
}
