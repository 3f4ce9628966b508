//! State store seam
//!
//! The block manager reads its recovery state once at startup and stages new
//! values at every round boundary; staged values become visible only after
//! [`StateStore::commit`].

use crate::block_info::{BlockInfo, RunningHashesInfo};
use crate::error::Result;

/// Key-value storage for block stream recovery state
pub trait StateStore: Send {
    /// Last committed block info
    fn block_info(&self) -> Result<Option<BlockInfo>>;

    /// Last committed running hashes
    fn running_hashes(&self) -> Result<Option<RunningHashesInfo>>;

    /// Stage a new block info
    fn put_block_info(&mut self, info: BlockInfo);

    /// Stage new running hashes
    fn put_running_hashes(&mut self, hashes: RunningHashesInfo);

    /// Apply every staged value atomically
    fn commit(&mut self) -> Result<()>;
}

/// Volatile state store
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    block_info: Option<BlockInfo>,
    running_hashes: Option<RunningHashesInfo>,
    staged_block_info: Option<BlockInfo>,
    staged_running_hashes: Option<RunningHashesInfo>,
    commits: usize,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits that applied at least one staged value
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Whether puts are waiting for a commit
    pub fn has_staged(&self) -> bool {
        self.staged_block_info.is_some() || self.staged_running_hashes.is_some()
    }
}

impl StateStore for InMemoryStateStore {
    fn block_info(&self) -> Result<Option<BlockInfo>> {
        Ok(self.block_info.clone())
    }

    fn running_hashes(&self) -> Result<Option<RunningHashesInfo>> {
        Ok(self.running_hashes.clone())
    }

    fn put_block_info(&mut self, info: BlockInfo) {
        self.staged_block_info = Some(info);
    }

    fn put_running_hashes(&mut self, hashes: RunningHashesInfo) {
        self.staged_running_hashes = Some(hashes);
    }

    fn commit(&mut self) -> Result<()> {
        if !self.has_staged() {
            return Ok(());
        }
        if let Some(info) = self.staged_block_info.take() {
            self.block_info = Some(info);
        }
        if let Some(hashes) = self.staged_running_hashes.take() {
            self.running_hashes = Some(hashes);
        }
        self.commits += 1;
        Ok(())
    }
}
