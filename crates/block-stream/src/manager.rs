//! Block Record Manager
//!
//! Owns the running hash chain and the block boundaries. Every user
//! transaction goes through [`BlockRecordManager::start_user_transaction`]
//! (which may close the current block and open the next one) and then
//! [`BlockRecordManager::end_user_transaction`] (which hashes and streams the
//! transaction's records in their final order). Recovery state is staged into
//! the [`StateStore`] at round boundaries only.
//!
//! Blocks are aligned to fixed consensus-time periods: two transactions share
//! a block exactly when `seconds / block_period_secs` is equal for both.

use crate::block_info::BlockInfo;
use crate::config::BlockStreamConfig;
use crate::error::{BlockStreamError, Result};
use crate::producer::StreamProducer;
use crate::running_hash::{to_hash, Hash, RunningHashes};
use crate::state_store::StateStore;
use ledger_records::{SingleTransactionRecord, Timestamp};
use std::collections::VecDeque;
use tokio::sync::broadcast;

/// Capacity of the block-closed notification channel
const NOTIFICATION_CAPACITY: usize = 64;

/// Notification sent to subscribers when a block closes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockClosed {
    /// Block number
    pub number: i64,
    /// Consensus time of the block's first transaction
    pub first_cons_time: Timestamp,
    /// Running hash after the block's last record
    pub hash: Hash,
    /// Records streamed into the block by this process
    pub record_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingFirstTransaction,
    InBlock,
    Closed,
}

/// Tracks blocks and the running hash over all streamed records
pub struct BlockRecordManager {
    config: BlockStreamConfig,
    producer: Box<dyn StreamProducer>,
    phase: Phase,

    // Chain state
    running_hashes: RunningHashes,
    /// Hashes of the most recent closed blocks, oldest first
    block_hashes: VecDeque<Hash>,
    last_block_number: i64,
    first_cons_time_of_last_block: Option<Timestamp>,

    // Current block
    block_timestamp: Option<Timestamp>,
    block_record_count: u64,

    last_handled: Option<Timestamp>,
    migration_records_streamed: bool,
    /// Whether anything changed since the last round boundary
    dirty: bool,

    notifier: broadcast::Sender<BlockClosed>,
}

impl BlockRecordManager {
    /// Restore the chain from `state`, or start at genesis if it holds nothing
    pub fn new(
        config: BlockStreamConfig,
        producer: Box<dyn StreamProducer>,
        state: &dyn StateStore,
    ) -> Result<Self> {
        let info = state.block_info()?.unwrap_or_default();
        let running_hashes = match state.running_hashes()? {
            Some(hashes) => RunningHashes::from_info(&hashes)?,
            None => RunningHashes::default(),
        };

        let mut block_hashes = info
            .block_hashes
            .iter()
            .map(|h| to_hash(h))
            .collect::<Result<VecDeque<_>>>()?;
        while block_hashes.len() > config.num_block_hashes_retained {
            block_hashes.pop_front();
        }

        if config.block_period_secs == 0 {
            tracing::warn!("Block period is zero; every transaction will share one block");
        }

        tracing::info!(
            "Block record manager starting after block {} (running hash {})",
            info.last_block_number,
            hex::encode(&running_hashes.current())
        );

        let (notifier, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        Ok(Self {
            config,
            producer,
            phase: Phase::AwaitingFirstTransaction,
            running_hashes,
            block_hashes,
            last_block_number: info.last_block_number,
            first_cons_time_of_last_block: info.first_cons_time_of_last_block,
            block_timestamp: info.first_cons_time_of_current_block,
            block_record_count: 0,
            last_handled: info.cons_time_of_last_handled_txn,
            migration_records_streamed: info.migration_records_streamed,
            dirty: false,
            notifier,
        })
    }

    /// Subscribe to block-closed notifications
    pub fn subscribe(&self) -> broadcast::Receiver<BlockClosed> {
        self.notifier.subscribe()
    }

    /// Prepare for a user transaction at `consensus_time`.
    ///
    /// Returns `true` when this transaction opened a new block. The first call
    /// after startup resumes the persisted in-progress block if its period is
    /// still current; otherwise that block is closed and the next one opened.
    pub fn start_user_transaction(
        &mut self,
        consensus_time: Timestamp,
        state: &mut dyn StateStore,
    ) -> Result<bool> {
        self.ensure_open()?;

        let persisted_start = self.block_timestamp;
        match self.phase {
            Phase::AwaitingFirstTransaction => match persisted_start {
                None => {
                    self.open_block(consensus_time)?;
                    Ok(true)
                }
                Some(started) if self.same_period(started, consensus_time) => {
                    self.resume_block(started, consensus_time)?;
                    Ok(false)
                }
                Some(started) => {
                    self.finish_persisted_block(started);
                    self.open_block(consensus_time)?;
                    self.stage(state);
                    Ok(true)
                }
            },
            Phase::InBlock => {
                let started = self.block_timestamp.unwrap_or(consensus_time);
                if self.same_period(started, consensus_time) {
                    return Ok(false);
                }
                self.close_block()?;
                self.open_block(consensus_time)?;
                self.stage(state);
                Ok(true)
            }
            Phase::Closed => Err(BlockStreamError::Closed),
        }
    }

    /// Hash and stream the records of one user transaction, in order
    pub fn end_user_transaction(&mut self, records: &[SingleTransactionRecord]) -> Result<()> {
        self.ensure_open()?;
        if self.phase != Phase::InBlock {
            return Err(BlockStreamError::InvalidState(
                "no block is open; call start_user_transaction first".to_string(),
            ));
        }

        // Consensus times are unique and strictly increasing across the stream
        let mut previous = self.last_handled;
        for record in records {
            let time = record.consensus_timestamp();
            if let Some(last) = previous.filter(|last| time <= *last) {
                return Err(BlockStreamError::InvalidState(format!(
                    "record at {} is not after the last handled consensus time {}",
                    time, last
                )));
            }
            previous = Some(time);
        }

        for record in records {
            let bytes = record
                .to_bytes()
                .map_err(|e| BlockStreamError::Serialization(e.to_string()))?;
            self.running_hashes.add(&bytes);
            self.producer.write(bytes)?;
            self.block_record_count += 1;
            self.last_handled = Some(record.consensus_timestamp());
        }

        self.dirty = true;
        tracing::debug!(
            "Streamed {} records into block {} (running hash {})",
            records.len(),
            self.block_number(),
            hex::encode(&self.running_hashes.current())
        );
        Ok(())
    }

    /// Stage and commit recovery state; does nothing when nothing changed
    pub fn end_round(&mut self, state: &mut dyn StateStore) -> Result<()> {
        self.ensure_open()?;
        if !self.dirty {
            return Ok(());
        }
        self.stage(state);
        state.commit()?;
        self.dirty = false;
        tracing::debug!("Round ended in block {}", self.block_number());
        Ok(())
    }

    /// Close the current block now; the next transaction opens a new one
    pub fn switch_blocks_at(&mut self, timestamp: Timestamp) -> Result<()> {
        self.ensure_open()?;
        match self.phase {
            Phase::InBlock => {
                self.close_block()?;
                self.block_timestamp = None;
                self.phase = Phase::AwaitingFirstTransaction;
                tracing::info!("Forced block switch at {}", timestamp);
            }
            Phase::AwaitingFirstTransaction => {
                if let Some(started) = self.block_timestamp.take() {
                    self.finish_persisted_block(started);
                    tracing::info!("Forced close of persisted block at {}", timestamp);
                }
            }
            Phase::Closed => return Err(BlockStreamError::Closed),
        }
        self.dirty = true;
        Ok(())
    }

    /// Move the last-handled consensus time forward without streaming records
    pub fn advance_consensus_clock(
        &mut self,
        consensus_time: Timestamp,
        state: &mut dyn StateStore,
    ) -> Result<()> {
        self.ensure_open()?;
        if self.last_handled.map_or(true, |last| consensus_time > last) {
            self.last_handled = Some(consensus_time);
            self.dirty = true;
            self.stage(state);
        }
        Ok(())
    }

    /// Whether records produced by state migration were already streamed
    pub fn are_migration_records_streamed(&self) -> bool {
        self.migration_records_streamed
    }

    pub fn mark_migration_records_streamed(&mut self, state: &mut dyn StateStore) -> Result<()> {
        self.ensure_open()?;
        if !self.migration_records_streamed {
            self.migration_records_streamed = true;
            self.dirty = true;
            self.stage(state);
        }
        Ok(())
    }

    /// Number of the block in progress (or about to start)
    pub fn block_number(&self) -> i64 {
        self.last_block_number + 1
    }

    /// Consensus time of the current block's first transaction
    pub fn block_timestamp(&self) -> Option<Timestamp> {
        self.block_timestamp
    }

    /// Number of the last closed block, -1 if none closed yet
    pub fn last_block_number(&self) -> i64 {
        self.last_block_number
    }

    pub fn first_cons_time_of_last_block(&self) -> Option<Timestamp> {
        self.first_cons_time_of_last_block
    }

    pub fn last_block_hash(&self) -> Option<Hash> {
        self.block_hashes.back().copied()
    }

    /// Hash of block `number` if it is within the retained window
    pub fn block_hash_by_number(&self, number: i64) -> Option<Hash> {
        let retained = self.block_hashes.len() as i64;
        if number > self.last_block_number || number <= self.last_block_number - retained {
            return None;
        }
        let back = (self.last_block_number - number) as usize;
        self.block_hashes.get(self.block_hashes.len() - 1 - back).copied()
    }

    pub fn running_hash(&self) -> Hash {
        self.running_hashes.current()
    }

    /// Running hash three records back, `None` until three records were hashed
    pub fn prng_seed(&self) -> Option<Hash> {
        self.running_hashes.n_minus_3()
    }

    pub fn cons_time_of_last_handled_transaction(&self) -> Option<Timestamp> {
        self.last_handled
    }

    pub fn is_closed(&self) -> bool {
        self.phase == Phase::Closed
    }

    /// Finish the open record file and wait for every pending write
    pub fn close(&mut self) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        let was_in_block = self.phase == Phase::InBlock;
        self.phase = Phase::Closed;

        // The block itself stays open in the persisted state and resumes on restart
        let end_result = if was_in_block {
            self.producer.end_block(self.running_hashes.current())
        } else {
            Ok(())
        };
        let close_result = self.producer.close();

        tracing::info!(
            "Block record manager closed in block {} (running hash {})",
            self.block_number(),
            hex::encode(&self.running_hashes.current())
        );
        end_result.and(close_result)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.phase == Phase::Closed {
            Err(BlockStreamError::Closed)
        } else {
            Ok(())
        }
    }

    /// Whether two consensus times fall in the same block period.
    ///
    /// Boundaries that cannot be classified count as the same block.
    fn same_period(&self, a: Timestamp, b: Timestamp) -> bool {
        let period = self.config.block_period_secs as i64;
        if period <= 0 {
            return true;
        }
        if !a.is_valid() || !b.is_valid() {
            tracing::warn!("Cannot classify block boundary between {} and {}; keeping current block", a, b);
            return true;
        }
        a.seconds.div_euclid(period) == b.seconds.div_euclid(period)
    }

    fn open_block(&mut self, consensus_time: Timestamp) -> Result<()> {
        let number = self.block_number();
        self.producer
            .begin_block(number as u64, consensus_time, self.running_hashes.current())?;
        self.block_timestamp = Some(consensus_time);
        self.block_record_count = 0;
        self.phase = Phase::InBlock;
        self.dirty = true;
        tracing::info!("Opened block {} at {}", number, consensus_time);
        Ok(())
    }

    fn resume_block(&mut self, started: Timestamp, consensus_time: Timestamp) -> Result<()> {
        let number = self.block_number();
        // A new record file picks up where the previous process stopped
        self.producer
            .begin_block(number as u64, consensus_time, self.running_hashes.current())?;
        self.block_record_count = 0;
        self.phase = Phase::InBlock;
        tracing::info!("Resumed block {} (started at {})", number, started);
        Ok(())
    }

    fn close_block(&mut self) -> Result<()> {
        let hash = self.running_hashes.current();
        self.producer.end_block(hash)?;
        let first_cons_time = self.block_timestamp.unwrap_or_default();
        self.record_closed_block(first_cons_time, hash);
        Ok(())
    }

    /// Close a block left open by a previous process; nothing was begun here
    fn finish_persisted_block(&mut self, started: Timestamp) {
        let hash = self.running_hashes.current();
        self.record_closed_block(started, hash);
    }

    fn record_closed_block(&mut self, first_cons_time: Timestamp, hash: Hash) {
        let number = self.block_number();
        self.block_hashes.push_back(hash);
        while self.block_hashes.len() > self.config.num_block_hashes_retained {
            self.block_hashes.pop_front();
        }
        self.last_block_number = number;
        self.first_cons_time_of_last_block = Some(first_cons_time);
        self.dirty = true;

        tracing::info!(
            "Closed block {} ({} records, hash {})",
            number,
            self.block_record_count,
            hex::encode(&hash)
        );

        // Ignore errors if no subscribers
        let _ = self.notifier.send(BlockClosed {
            number,
            first_cons_time,
            hash,
            record_count: self.block_record_count,
        });
    }

    fn snapshot(&self) -> BlockInfo {
        BlockInfo {
            last_block_number: self.last_block_number,
            first_cons_time_of_last_block: self.first_cons_time_of_last_block,
            block_hashes: self.block_hashes.iter().map(|h| h.to_vec()).collect(),
            cons_time_of_last_handled_txn: self.last_handled,
            migration_records_streamed: self.migration_records_streamed,
            first_cons_time_of_current_block: self.block_timestamp,
        }
    }

    fn stage(&self, state: &mut dyn StateStore) {
        state.put_block_info(self.snapshot());
        state.put_running_hashes(self.running_hashes.to_info());
    }
}

impl Drop for BlockRecordManager {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Block record manager closed with error: {}", e);
        }
    }
}
