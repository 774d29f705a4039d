//! Error types for the consultation core

use thiserror::Error;

use crate::models::CallMedium;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Device unavailable for {medium} call: {reason}")]
    DeviceUnavailable { medium: CallMedium, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio::runtime::TryCurrentError> for Error {
    fn from(e: tokio::runtime::TryCurrentError) -> Self {
        Error::Runtime(e.to_string())
    }
}
