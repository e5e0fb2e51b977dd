use core_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote {source_id} failed: {message}")]
    Remote { source_id: String, message: String },

    #[error("Remote {0} is not configured")]
    UnknownSource(String),

    #[error("Local store error: {0}")]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn remote(source_id: impl ToString, error: impl std::fmt::Display) -> Self {
        SyncError::Remote {
            source_id: source_id.to_string(),
            message: error.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
