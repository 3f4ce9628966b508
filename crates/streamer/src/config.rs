//! Streamer Configuration

use anyhow::Context;
use block_stream::BlockStreamConfig;
use ledger_records::RecordLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Streamer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamerConfig {
    /// Directory holding the sled state database
    pub state_dir: PathBuf,
    /// Per-transaction record limits
    pub record_limits: RecordLimits,
    /// Block stream settings
    pub block_stream: BlockStreamConfig,
    /// Sign record files
    pub sign_files: bool,
    /// File with a 32-byte ed25519 secret key; a fresh key is generated when absent
    pub signing_key_file: Option<PathBuf>,
    /// Commit state after every N transactions (0 = only where the script says so)
    pub round_size: usize,
}

impl Default for StreamerConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from("data/state"),
            record_limits: RecordLimits::default(),
            block_stream: BlockStreamConfig::default(),
            sign_files: true,
            signing_key_file: None,
            round_size: 16,
        }
    }
}

impl StreamerConfig {
    /// Load from a JSON file, or defaults when no file is given
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {:?}", path))?;
        let config = serde_json::from_str(&text).with_context(|| format!("parsing config {:?}", path))?;
        Ok(config)
    }
}
