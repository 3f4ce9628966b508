//! Persistence Layer for Block Stream State
//!
//! Uses sled embedded database to keep block boundaries and running hashes
//! across restarts. Values are written at round boundaries and read on startup.

use crate::block_info::{BlockInfo, RunningHashesInfo};
use crate::error::Result;
use crate::state_store::StateStore;
use serde::{de::DeserializeOwned, Serialize};
use sled::{transaction::TransactionResult, Db, Transactional};
use std::path::Path;

/// Key of the single value in each tree
const LATEST_KEY: &[u8] = b"latest";

/// Persistent storage for block stream state
pub struct SledStateStore {
    /// Sled database instance
    db: Db,
    /// Block info tree
    block_info: sled::Tree,
    /// Running hashes tree
    running_hashes: sled::Tree,
    /// Values waiting for the next commit
    staged_block_info: Option<BlockInfo>,
    staged_running_hashes: Option<RunningHashesInfo>,
}

impl SledStateStore {
    /// Open or create a state store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let db = sled::open(&path)?;
        let block_info = db.open_tree("block_info")?;
        let running_hashes = db.open_tree("running_hashes")?;

        tracing::info!("Opened block stream state at {:?}", path.as_ref());

        Ok(Self {
            db,
            block_info,
            running_hashes,
            staged_block_info: None,
            staged_running_hashes: None,
        })
    }

    fn load<T: DeserializeOwned>(tree: &sled::Tree) -> anyhow::Result<Option<T>> {
        match tree.get(LATEST_KEY)? {
            Some(bytes) => {
                let value: T = bincode::deserialize(&bytes)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn encode<T: Serialize>(value: &Option<T>) -> anyhow::Result<Option<Vec<u8>>> {
        value
            .as_ref()
            .map(|v| bincode::serialize(v).map_err(anyhow::Error::from))
            .transpose()
    }

    fn write_staged(&mut self) -> anyhow::Result<()> {
        let block_info = Self::encode(&self.staged_block_info)?;
        let running_hashes = Self::encode(&self.staged_running_hashes)?;

        let result: TransactionResult<()> = (&self.block_info, &self.running_hashes).transaction(
            |(block_info_tree, running_hashes_tree)| {
                if let Some(bytes) = &block_info {
                    block_info_tree.insert(LATEST_KEY, bytes.as_slice())?;
                }
                if let Some(bytes) = &running_hashes {
                    running_hashes_tree.insert(LATEST_KEY, bytes.as_slice())?;
                }
                Ok(())
            },
        );
        result.map_err(|e| anyhow::anyhow!("State commit failed: {:?}", e))?;

        self.db.flush()?;
        self.staged_block_info = None;
        self.staged_running_hashes = None;
        Ok(())
    }

    /// Clear all data (for testing)
    pub fn clear(&self) -> anyhow::Result<()> {
        self.block_info.clear()?;
        self.running_hashes.clear()?;
        Ok(())
    }
}

impl StateStore for SledStateStore {
    fn block_info(&self) -> Result<Option<BlockInfo>> {
        Ok(Self::load(&self.block_info)?)
    }

    fn running_hashes(&self) -> Result<Option<RunningHashesInfo>> {
        Ok(Self::load(&self.running_hashes)?)
    }

    fn put_block_info(&mut self, info: BlockInfo) {
        self.staged_block_info = Some(info);
    }

    fn put_running_hashes(&mut self, hashes: RunningHashesInfo) {
        self.staged_running_hashes = Some(hashes);
    }

    fn commit(&mut self) -> Result<()> {
        if self.staged_block_info.is_none() && self.staged_running_hashes.is_none() {
            return Ok(());
        }
        self.write_staged()?;
        tracing::debug!("Committed block stream state");
        Ok(())
    }
}
