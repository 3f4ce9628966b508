//! Block Stream Configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default block period in seconds
pub const DEFAULT_BLOCK_PERIOD_SECS: u64 = 2;

/// Default number of trailing block hashes kept for lookups
pub const DEFAULT_NUM_BLOCK_HASHES_RETAINED: usize = 256;

/// Default depth of the concurrent producer's queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Which stream producer hands records to the block writer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProducerKind {
    /// Writes on the calling thread
    Sync,
    /// Writes on a dedicated writer thread
    Concurrent,
}

/// Block stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockStreamConfig {
    /// Stream records at all (hashing and block tracking always run)
    pub enabled: bool,
    /// Length of a block period in seconds
    pub block_period_secs: u64,
    /// Number of closed block hashes retained
    pub num_block_hashes_retained: usize,
    /// Producer implementation
    pub producer: ProducerKind,
    /// Bounded queue depth for the concurrent producer
    pub queue_capacity: usize,
    /// Directory receiving record files
    pub record_dir: PathBuf,
}

impl Default for BlockStreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            block_period_secs: DEFAULT_BLOCK_PERIOD_SECS,
            num_block_hashes_retained: DEFAULT_NUM_BLOCK_HASHES_RETAINED,
            producer: ProducerKind::Concurrent,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            record_dir: PathBuf::from("data/records"),
        }
    }
}
