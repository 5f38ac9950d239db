//! Error types for parsing shared values

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for value parsing and conversion
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Address string was not 20 bytes of hex
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Amount string could not be parsed
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Conversion exceeded the 128-bit amount range
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),
}

impl CoreError {
    /// Create an invalid address error
    pub fn invalid_address<S: Into<String>>(msg: S) -> Self {
        CoreError::InvalidAddress(msg.into())
    }

    /// Create an invalid amount error
    pub fn invalid_amount<S: Into<String>>(msg: S) -> Self {
        CoreError::InvalidAmount(msg.into())
    }
}
