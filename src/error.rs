use thiserror::Error;

/// All errors produced by cadenza-core.
#[derive(Debug, Error)]
pub enum CadenzaError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("transform length {0} is not a power of two")]
    InvalidLength(usize),

    #[error("sample source read failed: {0}")]
    SourceRead(String),

    #[error("processor failed: {0}")]
    Processing(String),

    #[error("dispatcher is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, CadenzaError>;
