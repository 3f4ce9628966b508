//! Record list limits

use serde::{Deserialize, Serialize};

/// Default cap on preceding records per user transaction
pub const DEFAULT_MAX_PRECEDING_RECORDS: usize = 3;

/// Default cap on following records per user transaction
pub const DEFAULT_MAX_FOLLOWING_RECORDS: usize = 50;

/// Per-transaction record limits
///
/// Each direction owns a range of nanoseconds around the user transaction's
/// consensus time, so these caps also bound the timestamps a transaction can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordLimits {
    /// Maximum preceding records (slots, removed ones included)
    pub max_preceding_records: usize,
    /// Maximum following records (slots, removed ones included)
    pub max_following_records: usize,
}

impl Default for RecordLimits {
    fn default() -> Self {
        Self {
            max_preceding_records: DEFAULT_MAX_PRECEDING_RECORDS,
            max_following_records: DEFAULT_MAX_FOLLOWING_RECORDS,
        }
    }
}
