//! Error types for the upstream clients.

use crate::data::models::DataKind;

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("request to {url} failed after {attempts} attempts")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("upstream returned status {status} for {url}")]
    Status { status: u16, url: String },
    #[error("failed to parse response")]
    ParseFailed {
        status: u16,
        url: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("a world is required to fetch {0}")]
    MissingScope(DataKind),
    #[error("invalid upstream url")]
    InvalidUrl(#[from] url::ParseError),
}

impl UpstreamError {
    /// Whether the upstream reported that nothing exists for the request.
    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::Status { status: 404, .. })
    }
}
