pub mod client;
pub mod json;
pub mod provider;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

pub use client::*;
pub use json::*;
pub use provider::*;
pub use types::*;

use thiserror::Error;

use crate::pipeline::context::RunLog;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{provider} rejected the request (HTTP {status}): {body}")]
    Client {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Network error: {provider} failed after {attempts} attempt(s), last: {last}")]
    Exhausted {
        provider: String,
        attempts: usize,
        last: String,
    },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed response from {provider}: {detail}")]
    MalformedResponse { provider: String, detail: String },

    #[error("Response from {0} carried no choices")]
    EmptyChoices(String),

    #[error("Image too large for inline OCR ({0} bytes base64, limit {max})", max = OCR_MAX_BASE64_BYTES)]
    ImageTooLarge(usize),

    #[error("Request encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Provider '{provider}' has an empty {field}")]
    EmptyField {
        provider: String,
        field: &'static str,
    },

    #[error("Invalid provider URL: '{0}'")]
    InvalidUrl(String),
}

/// Model capability calls used by the extraction engine (allows mocking).
///
/// Retried and rejected attempts are appended to `log`.
pub trait ModelClient: Send + Sync {
    /// Chat completion; returns the content of the first choice.
    fn chat(
        &self,
        provider: &Provider,
        request: &ChatRequest,
        log: &mut RunLog,
    ) -> Result<String, TransportError>;

    /// Text detection on one inline image; returns the flattened text.
    fn ocr(
        &self,
        provider: &Provider,
        image: &EncodedImage,
        log: &mut RunLog,
    ) -> Result<String, TransportError>;
}
