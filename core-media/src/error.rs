use bridge_traits::error::BridgeError;
use thiserror::Error;

/// Download phase that ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Response,
    Idle,
    Total,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            TimeoutPhase::Response => "response",
            TimeoutPhase::Idle => "idle",
            TimeoutPhase::Total => "total",
        };
        f.write_str(phase)
    }
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Unsupported media URL: {0}")]
    UnsupportedUrl(String),

    #[error("Inline base64 payloads are not supported")]
    InlinePayload,

    #[error("Token key cannot be used as a path: {0}")]
    UnsafeKey(String),

    #[error("Download failed: {0}")]
    Download(#[from] BridgeError),

    #[error("Download exceeded the {0} timeout")]
    Timeout(TimeoutPhase),

    #[error("Download exceeded {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("Image decode failed: {0}")]
    Decode(String),

    #[error("Image encode failed: {0}")]
    Encode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl MediaError {
    /// Failures that no amount of retrying will fix
    pub fn is_permanent(&self) -> bool {
        matches!(self, MediaError::UnsupportedUrl(_) | MediaError::UnsafeKey(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
