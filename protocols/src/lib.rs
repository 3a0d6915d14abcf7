//! Records exchanged between the serving layer and the detokenizer.

pub mod generate;
pub mod validated;

pub use generate::{GenerateRequest, GenerateResponse, ResponseChoice, Usage};
pub use validated::{from_json_validated, iter_json_validated, ProtocolError};
