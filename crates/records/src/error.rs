//! Record assembly errors

use crate::types::ResponseCode;
use std::fmt;
use thiserror::Error;

/// Which side of the user transaction a synthetic record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordDirection {
    Preceding,
    Following,
}

impl fmt::Display for RecordDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordDirection::Preceding => f.write_str("preceding"),
            RecordDirection::Following => f.write_str("following"),
        }
    }
}

/// Record list builder errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("Too many {direction} records (limit {limit})")]
    ChildRecordLimitExceeded {
        direction: RecordDirection,
        limit: usize,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl RecordError {
    /// Transaction-level status a dispatcher should report for this error
    pub const fn response_code(&self) -> ResponseCode {
        match self {
            RecordError::ChildRecordLimitExceeded { .. } => ResponseCode::MaxChildRecordsExceeded,
            RecordError::InvalidArgument(_) => ResponseCode::FailInvalid,
        }
    }
}
