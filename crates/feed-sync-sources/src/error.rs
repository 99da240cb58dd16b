use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{context} failed: {status} - {body}")]
    Http {
        context: String,
        status: u16,
        body: String,
    },

    #[error("{0}: unauthorized")]
    Unauthorized(String),

    /// The playlist changed remotely since the revision we submitted against
    #[error("revision conflict on playlist {playlist_id}")]
    RevisionConflict { playlist_id: String },

    #[error("credentials rejected: {0}")]
    Credentials(String),

    #[error("secret sealing failed: {0}")]
    Crypto(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl SourceError {
    pub fn new(message: impl Into<String>) -> Self {
        SourceError::Other(message.into())
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SourceError::Unauthorized(_))
    }

    pub fn is_revision_conflict(&self) -> bool {
        matches!(self, SourceError::RevisionConflict { .. })
    }
}

/// Turn a non-success response into the matching error variant
pub(crate) async fn check_response(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(SourceError::Unauthorized(context.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(SourceError::Http {
        context: context.to_string(),
        status: status.as_u16(),
        body,
    })
}
