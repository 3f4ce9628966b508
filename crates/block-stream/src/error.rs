//! Block Stream Errors

use thiserror::Error;

/// Block stream errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockStreamError {
    #[error("Block stream is closed")]
    Closed,

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Record serialization failed: {0}")]
    Serialization(String),

    #[error("Record write failed: {0}")]
    Write(String),

    #[error("Record file signing failed: {0}")]
    Signing(String),

    #[error("State store failure: {0}")]
    Store(String),
}

impl BlockStreamError {
    /// Whether the running hash chain or its output can no longer be trusted.
    ///
    /// A node must stop handling transactions after a fatal error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            BlockStreamError::Serialization(_)
                | BlockStreamError::Write(_)
                | BlockStreamError::Signing(_)
                | BlockStreamError::Store(_)
        )
    }
}

impl From<std::io::Error> for BlockStreamError {
    fn from(e: std::io::Error) -> Self {
        BlockStreamError::Write(e.to_string())
    }
}

impl From<anyhow::Error> for BlockStreamError {
    fn from(e: anyhow::Error) -> Self {
        BlockStreamError::Store(format!("{:#}", e))
    }
}

/// Result alias for block stream operations
pub type Result<T> = std::result::Result<T, BlockStreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(!BlockStreamError::Closed.is_fatal());
        assert!(!BlockStreamError::InvalidState("no block".into()).is_fatal());
        assert!(BlockStreamError::Write("disk full".into()).is_fatal());
        assert!(BlockStreamError::Signing("bad key".into()).is_fatal());
        assert!(BlockStreamError::Store("corrupt".into()).is_fatal());
    }

    #[test]
    fn test_io_error_is_write_failure() {
        let err: BlockStreamError = std::io::Error::other("boom").into();
        assert!(matches!(err, BlockStreamError::Write(_)));
        assert!(err.is_fatal());
    }
}
