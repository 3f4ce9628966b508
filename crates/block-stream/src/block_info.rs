//! Persisted block stream state
//!
//! Written once per round and read once at startup. Hashes are stored as
//! plain byte vectors; an empty vector means "not set".

use ledger_records::Timestamp;
use serde::{Deserialize, Serialize};

/// Block boundary recovery state
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Number of the last closed block, -1 before the first block closes
    pub last_block_number: i64,
    /// First consensus time of the last closed block
    pub first_cons_time_of_last_block: Option<Timestamp>,
    /// Hashes of the most recent closed blocks, oldest first
    pub block_hashes: Vec<Vec<u8>>,
    /// Consensus time of the last handled transaction
    pub cons_time_of_last_handled_txn: Option<Timestamp>,
    /// Whether migration-generated records were already streamed
    pub migration_records_streamed: bool,
    /// First consensus time of the block in progress, `None` if no block is open
    pub first_cons_time_of_current_block: Option<Timestamp>,
}

impl Default for BlockInfo {
    fn default() -> Self {
        Self {
            last_block_number: -1,
            first_cons_time_of_last_block: None,
            block_hashes: Vec::new(),
            cons_time_of_last_handled_txn: None,
            migration_records_streamed: false,
            first_cons_time_of_current_block: None,
        }
    }
}

/// Running hash recovery state
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RunningHashesInfo {
    pub running_hash: Vec<u8>,
    pub n_minus_1_running_hash: Vec<u8>,
    pub n_minus_2_running_hash: Vec<u8>,
    pub n_minus_3_running_hash: Vec<u8>,
}
