use thiserror::Error;

/// Errors surfaced by [`crate::LlmClient`].
#[derive(Error, Debug)]
pub enum LlmError {
    /// Client construction or configuration problems (missing key, bad base URL).
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level failures before a response body was obtained.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The API answered with a non-success status.
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::Parse(err.to_string())
    }
}
