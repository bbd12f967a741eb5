use thiserror::Error;

pub type Result<T> = std::result::Result<T, MediaError>;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    Http(u16),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("Parsing error")]
    Parse,
    #[error("Invalid read: {0}")]
    InvalidRead(String),
    /// Returned to every read issued after, or pending during,
    /// `stop`/`abort` of a data source.
    #[error("Data source stopped")]
    Stopped,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MediaError {
    /// True for the error a stopped or aborted data source reports.
    pub fn is_stopped(&self) -> bool {
        matches!(self, MediaError::Stopped)
    }
}

impl From<serde_json::Error> for MediaError {
    fn from(_: serde_json::Error) -> Self {
        Self::Parse
    }
}

impl From<Box<dyn std::error::Error + Send + Sync>> for MediaError {
    fn from(e: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Other(anyhow::anyhow!(e.to_string()))
    }
}
