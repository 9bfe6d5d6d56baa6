#[derive(Debug, thiserror::Error)]
pub enum DdoError {
    #[error("invalid timestamp '{0}': expected YYYY-MM-DDTHH:MM:SSZ")]
    InvalidTimestamp(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type Result<T> = std::result::Result<T, DdoError>;
