use thiserror::Error;

#[derive(Error, Debug)]
pub enum IceWatchError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Correlator invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
