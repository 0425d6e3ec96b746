use thiserror::Error;

pub type Result<T, E = PillwatchError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum PillwatchError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("invalid region: {0}")]
    InvalidRegion(String),
    #[error("capture error: {0}")]
    Capture(String),
    /// The camera itself is gone (permission revoked, device removed).
    #[error("video source lost: {0}")]
    SourceLost(String),
    #[error("vision error: {0}")]
    Vision(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("session error: {0}")]
    Session(String),
    #[error("notification error: {0}")]
    Notify(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PillwatchError {
    /// Camera-level failures stop monitoring entirely instead of degrading a single cell.
    pub fn is_source_lost(&self) -> bool {
        matches!(self, PillwatchError::SourceLost(_))
    }
}
