use thiserror::Error;

/// Startup failures: bad configuration or a logging setup that cannot be installed
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
