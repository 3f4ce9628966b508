//! Transaction Replay
//!
//! Replays a JSON script of already-ordered user transactions through the
//! record list builder and the block record manager.

use anyhow::{bail, Context};
use block_stream::{BlockRecordManager, StateStore};
use ledger_records::{
    EntityId, RecordError, RecordHandle, RecordLimits, RecordListBuilder, ResponseCode,
    ReversingBehavior, Timestamp, Transaction, TransactionCategory, TransactionId,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

/// A replay script
#[derive(Debug, Clone, Deserialize)]
pub struct ReplayScript {
    pub transactions: Vec<ScriptTransaction>,
}

impl ReplayScript {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading script {:?}", path))?;
        let script = serde_json::from_str(&text).with_context(|| format!("parsing script {:?}", path))?;
        Ok(script)
    }
}

fn default_status() -> ResponseCode {
    ResponseCode::Success
}

fn default_behavior() -> ReversingBehavior {
    ReversingBehavior::Reversible
}

fn default_category() -> TransactionCategory {
    TransactionCategory::Child
}

/// One user transaction
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptTransaction {
    pub consensus_time: Timestamp,
    /// Payer account number
    pub payer: i64,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub fee: u64,
    #[serde(default = "default_status")]
    pub status: ResponseCode,
    /// Signed transaction bytes, opaque to the stream
    #[serde(default)]
    pub body: Vec<u8>,
    #[serde(default)]
    pub preceding: Vec<ScriptRecord>,
    #[serde(default)]
    pub children: Vec<ScriptRecord>,
    #[serde(default)]
    pub revert: Option<Revert>,
    /// Commit recovery state after this transaction
    #[serde(default)]
    pub end_round: bool,
}

/// A preceding or child record
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptRecord {
    #[serde(default = "default_behavior")]
    pub behavior: ReversingBehavior,
    #[serde(default = "default_category")]
    pub category: TransactionCategory,
    #[serde(default = "default_status")]
    pub status: ResponseCode,
    #[serde(default)]
    pub memo: String,
    #[serde(default)]
    pub fee: u64,
}

/// Reversion applied after all records of a transaction were added
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Revert {
    /// Revert children added after child `anchor` (0 is the user record)
    ChildrenOf { anchor: usize },
    /// Revert everything added after the first `after_children` children
    FromCheckpoint { after_children: usize },
}

/// Totals of a replay run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub transactions: usize,
    pub records: usize,
    pub blocks_opened: usize,
    pub interrupted: bool,
}

/// Feeds script transactions into a block record manager
pub struct Replayer<'a> {
    manager: &'a mut BlockRecordManager,
    state: &'a mut dyn StateStore,
    limits: RecordLimits,
    round_size: usize,
}

impl<'a> Replayer<'a> {
    pub fn new(
        manager: &'a mut BlockRecordManager,
        state: &'a mut dyn StateStore,
        limits: RecordLimits,
        round_size: usize,
    ) -> Self {
        Self {
            manager,
            state,
            limits,
            round_size,
        }
    }

    /// Replay every transaction, stopping early once `stop` is set
    pub fn run(&mut self, script: &ReplayScript, stop: &AtomicBool) -> anyhow::Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();

        for (i, tx) in script.transactions.iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                tracing::warn!("Replay interrupted after {} transactions", summary.transactions);
                summary.interrupted = true;
                break;
            }

            let (records, new_block) = self
                .replay_transaction(tx)
                .with_context(|| format!("transaction {} at {}", i, tx.consensus_time))?;
            summary.transactions += 1;
            summary.records += records;
            if new_block {
                summary.blocks_opened += 1;
            }

            let round_due = self.round_size > 0 && summary.transactions % self.round_size == 0;
            if tx.end_round || round_due {
                self.manager.end_round(self.state)?;
            }
        }

        self.manager.end_round(self.state)?;
        Ok(summary)
    }

    /// Replay one transaction; returns the number of streamed records and
    /// whether it opened a new block
    pub fn replay_transaction(&mut self, tx: &ScriptTransaction) -> anyhow::Result<(usize, bool)> {
        let records = self.assemble(tx);

        // Preceding records sit before the user record, so the earliest one
        // has to clear everything already streamed
        let earliest = records
            .first()
            .map_or(tx.consensus_time, |r| r.consensus_timestamp());
        if let Some(last) = self.manager.cons_time_of_last_handled_transaction() {
            if earliest <= last {
                bail!(
                    "transaction at {} starts its records at {}, not after the last handled consensus time {}",
                    tx.consensus_time,
                    earliest,
                    last
                );
            }
        }

        let new_block = self.manager.start_user_transaction(tx.consensus_time, self.state)?;
        self.manager.end_user_transaction(&records)?;

        tracing::debug!(
            "Replayed transaction at {} ({} records, status {:?})",
            tx.consensus_time,
            records.len(),
            records.iter().find(|r| r.consensus_timestamp() == tx.consensus_time).map(|r| r.status())
        );
        Ok((records.len(), new_block))
    }

    fn assemble(&self, tx: &ScriptTransaction) -> Vec<ledger_records::SingleTransactionRecord> {
        let payer = EntityId::num(tx.payer);
        let mut list = RecordListBuilder::new(tx.consensus_time);
        list.primary_mut()
            .set_transaction(Transaction::new(tx.body.clone()))
            .set_transaction_id(TransactionId::new(payer, tx.consensus_time.minus_nanos(1_000_000)))
            .set_memo(tx.memo.clone())
            .set_transaction_fee(tx.fee)
            .set_status(tx.status);

        let start = list.checkpoint();
        if let Err(e) = self.add_records(&mut list, tx) {
            tracing::warn!("Transaction at {} failed: {}", tx.consensus_time, e);
            list.primary_mut().set_status(e.response_code());
            if let Err(e) = list.revert_children_from(start) {
                tracing::error!("Could not revert records of failed transaction at {}: {}", tx.consensus_time, e);
            }
        }
        list.build().into_records()
    }

    fn add_records(&self, list: &mut RecordListBuilder, tx: &ScriptTransaction) -> Result<(), RecordError> {
        for record in &tx.preceding {
            let handle = list.add_preceding(&self.limits, record.behavior)?;
            fill(list, handle, record)?;
        }

        let checkpoint_at = match tx.revert {
            Some(Revert::FromCheckpoint { after_children }) => Some(after_children),
            _ => None,
        };
        let mut checkpoint = (checkpoint_at == Some(0)).then(|| list.checkpoint());

        let mut children: Vec<RecordHandle> = Vec::with_capacity(tx.children.len());
        for record in &tx.children {
            let handle = list.add_following(&self.limits, record.category, record.behavior)?;
            fill(list, handle, record)?;
            children.push(handle);
            if checkpoint_at == Some(children.len()) {
                checkpoint = Some(list.checkpoint());
            }
        }

        match tx.revert {
            Some(Revert::ChildrenOf { anchor }) => {
                let anchor = match anchor {
                    0 => list.primary_handle(),
                    n => *children.get(n - 1).ok_or_else(|| {
                        RecordError::InvalidArgument(format!("no child {} to revert from", n))
                    })?,
                };
                list.revert_children_of(anchor)?;
            }
            Some(Revert::FromCheckpoint { .. }) => {
                let checkpoint = checkpoint.unwrap_or_else(|| list.checkpoint());
                list.revert_children_from(checkpoint)?;
            }
            None => {}
        }
        Ok(())
    }
}

fn fill(list: &mut RecordListBuilder, handle: RecordHandle, record: &ScriptRecord) -> Result<(), RecordError> {
    list.builder_mut(handle)?
        .set_memo(record.memo.clone())
        .set_transaction_fee(record.fee)
        .set_status(record.status);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use block_stream::{
        BlockStreamConfig, InMemoryBlockWriter, InMemoryStateStore, SyncProducer,
    };
    use ledger_records::SingleTransactionRecord;

    fn script(json: &str) -> ReplayScript {
        serde_json::from_str(json).unwrap()
    }

    fn run(script: &ReplayScript) -> (ReplaySummary, Vec<SingleTransactionRecord>, InMemoryStateStore) {
        let writer = InMemoryBlockWriter::new();
        let mut state = InMemoryStateStore::new();
        let mut manager = BlockRecordManager::new(
            BlockStreamConfig::default(),
            Box::new(SyncProducer::new(Box::new(writer.clone()))),
            &state,
        )
        .unwrap();
        let summary = Replayer::new(&mut manager, &mut state, RecordLimits::default(), 0)
            .run(script, &AtomicBool::new(false))
            .unwrap();
        manager.close().unwrap();

        let records = writer
            .blocks()
            .iter()
            .flat_map(|b| b.items.iter())
            .map(|bytes| SingleTransactionRecord::from_bytes(bytes).unwrap())
            .collect();
        (summary, records, state)
    }

    #[test]
    fn test_replay_with_children_and_revert() {
        let script = script(
            r#"{ "transactions": [
                { "consensus_time": { "seconds": 10, "nanos": 0 }, "payer": 1001,
                  "preceding": [ { "behavior": "irreversible" } ],
                  "children": [ {}, { "behavior": "removable" }, { "status": "INVALID_ACCOUNT_ID" } ],
                  "revert": { "kind": "children_of", "anchor": 0 } },
                { "consensus_time": { "seconds": 13, "nanos": 0 }, "payer": 1002, "end_round": true }
            ] }"#,
        );
        let (summary, records, state) = run(&script);

        assert_eq!(summary.transactions, 2);
        assert_eq!(summary.blocks_opened, 2);
        assert_eq!(summary.records, 5);

        let statuses: Vec<_> = records.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                ResponseCode::Success,
                ResponseCode::Success,
                ResponseCode::RevertedSuccess,
                ResponseCode::InvalidAccountId,
                ResponseCode::Success,
            ]
        );
        // The removed child leaves a gap at +2
        assert_eq!(records[3].consensus_timestamp(), Timestamp::new(10, 3));

        let info = state.block_info().unwrap().unwrap();
        assert_eq!(info.last_block_number, 0);
    }

    #[test]
    fn test_replay_checkpoint_revert() {
        let script = script(
            r#"{ "transactions": [
                { "consensus_time": { "seconds": 20, "nanos": 0 }, "payer": 7,
                  "children": [ {}, {}, { "behavior": "removable" } ],
                  "revert": { "kind": "from_checkpoint", "after_children": 1 } }
            ] }"#,
        );
        let (summary, records, _) = run(&script);
        assert_eq!(summary.records, 3);
        assert_eq!(records[1].status(), ResponseCode::Success);
        assert_eq!(records[2].status(), ResponseCode::RevertedSuccess);
    }

    #[test]
    fn test_limit_exceeded_marks_user_record() {
        let children = vec!["{}"; 51].join(",");
        let script = script(&format!(
            r#"{{ "transactions": [ {{ "consensus_time": {{ "seconds": 30, "nanos": 0 }}, "payer": 1, "children": [{}] }} ] }}"#,
            children
        ));
        let (summary, records, _) = run(&script);
        assert_eq!(summary.records, 51);
        assert_eq!(records[0].status(), ResponseCode::MaxChildRecordsExceeded);
        assert!(records[1..]
            .iter()
            .all(|r| r.status() == ResponseCode::RevertedSuccess));
    }

    #[test]
    fn test_failed_transaction_reverts_preceding_records() {
        let script = script(
            r#"{ "transactions": [
                { "consensus_time": { "seconds": 35, "nanos": 0 }, "payer": 1,
                  "preceding": [ {}, { "behavior": "removable" }, { "behavior": "irreversible" }, {} ] }
            ] }"#,
        );
        let (_, records, _) = run(&script);

        // The fourth preceding record exceeds the limit of three; the removable one is dropped
        let statuses: Vec<_> = records.iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                ResponseCode::RevertedSuccess,
                ResponseCode::Success,
                ResponseCode::MaxChildRecordsExceeded,
            ]
        );
    }

    #[test]
    fn test_preceding_record_cannot_reuse_streamed_time() {
        let script = script(
            r#"{ "transactions": [
                { "consensus_time": { "seconds": 10, "nanos": 0 }, "payer": 1, "children": [ {} ] },
                { "consensus_time": { "seconds": 10, "nanos": 2 }, "payer": 1, "preceding": [ {} ] }
            ] }"#,
        );
        let writer = InMemoryBlockWriter::new();
        let mut state = InMemoryStateStore::new();
        let mut manager = BlockRecordManager::new(
            BlockStreamConfig::default(),
            Box::new(SyncProducer::new(Box::new(writer.clone()))),
            &state,
        )
        .unwrap();
        let result = Replayer::new(&mut manager, &mut state, RecordLimits::default(), 0)
            .run(&script, &AtomicBool::new(false));
        assert!(result.is_err());

        assert_eq!(
            manager.cons_time_of_last_handled_transaction(),
            Some(Timestamp::new(10, 1))
        );
        manager.close().unwrap();
        let streamed: usize = writer.blocks().iter().map(|b| b.items.len()).sum();
        assert_eq!(streamed, 2);
    }

    #[test]
    fn test_out_of_order_transaction_rejected() {
        let script = script(
            r#"{ "transactions": [
                { "consensus_time": { "seconds": 40, "nanos": 0 }, "payer": 1 },
                { "consensus_time": { "seconds": 39, "nanos": 0 }, "payer": 1 }
            ] }"#,
        );
        let mut state = InMemoryStateStore::new();
        let mut manager = BlockRecordManager::new(
            BlockStreamConfig::default(),
            Box::new(SyncProducer::new(Box::new(InMemoryBlockWriter::new()))),
            &state,
        )
        .unwrap();
        let result = Replayer::new(&mut manager, &mut state, RecordLimits::default(), 0)
            .run(&script, &AtomicBool::new(false));
        assert!(result.is_err());
    }

    #[test]
    fn test_stop_flag_interrupts() {
        let script = script(
            r#"{ "transactions": [ { "consensus_time": { "seconds": 50, "nanos": 0 }, "payer": 1 } ] }"#,
        );
        let mut state = InMemoryStateStore::new();
        let mut manager = BlockRecordManager::new(
            BlockStreamConfig::default(),
            Box::new(SyncProducer::new(Box::new(InMemoryBlockWriter::new()))),
            &state,
        )
        .unwrap();
        let summary = Replayer::new(&mut manager, &mut state, RecordLimits::default(), 0)
            .run(&script, &AtomicBool::new(true))
            .unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.transactions, 0);
    }
}
