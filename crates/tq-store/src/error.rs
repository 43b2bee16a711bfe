use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("query API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("cannot decode response: {0}")]
    Decode(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("query timed out after {0:?}")]
    Timeout(Duration),

    /// The response carried no table.
    #[error("query returned no tables")]
    EmptyResponse,
}
