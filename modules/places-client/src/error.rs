use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlacesError>;

#[derive(Debug, Error)]
pub enum PlacesError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Run failed with status: {0}")]
    RunFailed(String),
}

impl PlacesError {
    /// Client-side rejections (bad input, auth) will not succeed on retry.
    pub fn is_client_error(&self) -> bool {
        matches!(self, PlacesError::Api { status, .. } if (400..500).contains(status))
    }
}

impl From<reqwest::Error> for PlacesError {
    fn from(err: reqwest::Error) -> Self {
        PlacesError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for PlacesError {
    fn from(err: serde_json::Error) -> Self {
        PlacesError::Parse(err.to_string())
    }
}
