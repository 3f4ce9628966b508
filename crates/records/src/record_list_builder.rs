//! Record List Builder
//!
//! Collects every record produced while handling one user transaction:
//! records that precede it, the user record itself, and the child records
//! that follow it. Child dispatches may later be reverted, either back to a
//! given record or back to a saved [`Checkpoint`].
//!
//! Builders live in an arena owned by the list; callers hold [`RecordHandle`]s
//! (arena indices tagged with the owning list) instead of references. Arena
//! order is add order, and removed records keep their slot so handles and
//! checkpoints stay valid.

use crate::config::RecordLimits;
use crate::error::{RecordDirection, RecordError};
use crate::record_builder::RecordBuilder;
use crate::types::{
    ResponseCode, ReversingBehavior, SingleTransactionRecord, Timestamp, TransactionCategory,
};
use std::sync::atomic::{AtomicU64, Ordering};

/// Distinguishes handles of different list builder instances
static NEXT_LIST_ID: AtomicU64 = AtomicU64::new(1);

/// Arena index of the user transaction's record
const PRIMARY_INDEX: usize = 0;

/// Stable reference to a record inside one [`RecordListBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle {
    list_id: u64,
    index: usize,
}

impl RecordHandle {
    /// Position of the record in add order (the primary record is 0)
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Saved position in a record list, used to revert everything added after it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    list_id: u64,
    last_preceding: Option<usize>,
    last_following: Option<usize>,
}

impl Checkpoint {
    /// Last preceding record at checkpoint time, `None` if there was none
    pub fn last_preceding(&self) -> Option<RecordHandle> {
        self.last_preceding.map(|index| RecordHandle {
            list_id: self.list_id,
            index,
        })
    }

    /// Last following record at checkpoint time, `None` if there was none
    pub fn last_following(&self) -> Option<RecordHandle> {
        self.last_following.map(|index| RecordHandle {
            list_id: self.list_id,
            index,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Primary,
    Preceding,
    Following,
}

#[derive(Debug)]
struct Slot {
    builder: RecordBuilder,
    position: Position,
    /// Nanoseconds away from the primary record (0 for the primary itself)
    offset: u64,
    removed: bool,
}

/// Ordered records of one user transaction
#[derive(Debug, Clone)]
pub struct RecordListResult {
    records: Vec<SingleTransactionRecord>,
    user_index: usize,
}

impl RecordListResult {
    /// The user transaction's own record
    pub fn user_record(&self) -> &SingleTransactionRecord {
        &self.records[self.user_index]
    }

    /// All records in stream order
    pub fn records(&self) -> &[SingleTransactionRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<SingleTransactionRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Assembles the records of a single user transaction
#[derive(Debug)]
pub struct RecordListBuilder {
    id: u64,
    consensus_time: Timestamp,
    /// Arena in add order; index 0 is the primary record
    slots: Vec<Slot>,
    /// Arena indices of preceding records, in add order
    preceding: Vec<usize>,
    /// Arena indices of following records, in add order
    following: Vec<usize>,
}

impl RecordListBuilder {
    /// Start a list for the user transaction handled at `consensus_time`
    pub fn new(consensus_time: Timestamp) -> Self {
        let primary = RecordBuilder::new(
            consensus_time,
            ReversingBehavior::Irreversible,
            TransactionCategory::User,
        );
        Self {
            id: NEXT_LIST_ID.fetch_add(1, Ordering::Relaxed),
            consensus_time,
            slots: vec![Slot {
                builder: primary,
                position: Position::Primary,
                offset: 0,
                removed: false,
            }],
            preceding: Vec::new(),
            following: Vec::new(),
        }
    }

    /// Consensus time of the user transaction
    pub fn consensus_time(&self) -> Timestamp {
        self.consensus_time
    }

    pub fn primary_handle(&self) -> RecordHandle {
        self.handle(PRIMARY_INDEX)
    }

    pub fn primary(&self) -> &RecordBuilder {
        &self.slots[PRIMARY_INDEX].builder
    }

    pub fn primary_mut(&mut self) -> &mut RecordBuilder {
        &mut self.slots[PRIMARY_INDEX].builder
    }

    /// Live (not removed) preceding records
    pub fn preceding_count(&self) -> usize {
        self.live(&self.preceding).count()
    }

    /// Live (not removed) following records
    pub fn following_count(&self) -> usize {
        self.live(&self.following).count()
    }

    /// Look up a record builder
    pub fn builder(&self, handle: RecordHandle) -> Result<&RecordBuilder, RecordError> {
        let index = self.resolve(handle)?;
        Ok(&self.slots[index].builder)
    }

    /// Look up a record builder for further mutation
    pub fn builder_mut(&mut self, handle: RecordHandle) -> Result<&mut RecordBuilder, RecordError> {
        let index = self.resolve(handle)?;
        if self.slots[index].removed {
            return Err(RecordError::InvalidArgument(format!(
                "record {} was removed by a reversion",
                index
            )));
        }
        Ok(&mut self.slots[index].builder)
    }

    /// Whether the record was removed by a reversion
    pub fn is_removed(&self, handle: RecordHandle) -> Result<bool, RecordError> {
        let index = self.resolve(handle)?;
        Ok(self.slots[index].removed)
    }

    /// Add a record that precedes the user transaction.
    ///
    /// The new record becomes the closest one to the user transaction; every
    /// live preceding record added before it moves one nanosecond further back.
    pub fn add_preceding(
        &mut self,
        limits: &RecordLimits,
        reversing_behavior: ReversingBehavior,
    ) -> Result<RecordHandle, RecordError> {
        if self.preceding.len() >= limits.max_preceding_records {
            return Err(RecordError::ChildRecordLimitExceeded {
                direction: RecordDirection::Preceding,
                limit: limits.max_preceding_records,
            });
        }

        let now = self.consensus_time;
        let live: Vec<usize> = self.live(&self.preceding).collect();
        for index in live {
            let slot = &mut self.slots[index];
            slot.offset += 1;
            let offset = slot.offset;
            Self::stamp(&mut slot.builder, now.minus_nanos(offset), offset);
        }

        let index = self.push(
            Position::Preceding,
            1,
            now.minus_nanos(1),
            reversing_behavior,
            TransactionCategory::Preceding,
        );
        self.preceding.push(index);

        tracing::trace!(
            "Added preceding record {} ({} live) before {}",
            index,
            self.preceding_count(),
            self.consensus_time
        );
        Ok(self.handle(index))
    }

    /// Add a reversible child record that follows the user transaction
    pub fn add_child(
        &mut self,
        limits: &RecordLimits,
        category: TransactionCategory,
    ) -> Result<RecordHandle, RecordError> {
        self.add_following(limits, category, ReversingBehavior::Reversible)
    }

    /// Add a child record that disappears entirely if its parent is reverted
    pub fn add_removable_child(
        &mut self,
        limits: &RecordLimits,
        category: TransactionCategory,
    ) -> Result<RecordHandle, RecordError> {
        self.add_following(limits, category, ReversingBehavior::Removable)
    }

    /// Add a following record with an explicit reversing behavior.
    ///
    /// Offsets come from a counter that never goes back, so a record removed
    /// by a reversion leaves a gap instead of shifting later records.
    pub fn add_following(
        &mut self,
        limits: &RecordLimits,
        category: TransactionCategory,
        reversing_behavior: ReversingBehavior,
    ) -> Result<RecordHandle, RecordError> {
        if self.following.len() >= limits.max_following_records {
            return Err(RecordError::ChildRecordLimitExceeded {
                direction: RecordDirection::Following,
                limit: limits.max_following_records,
            });
        }

        let parent = self.consensus_time;
        let offset = self.following.len() as u64 + 1;
        let index = self.push(
            Position::Following,
            offset,
            parent.plus_nanos(offset),
            reversing_behavior,
            category,
        );
        self.slots[index].builder.set_parent_consensus_timestamp(parent);
        self.following.push(index);

        tracing::trace!(
            "Added following record {} at offset {} after {}",
            index,
            offset,
            self.consensus_time
        );
        Ok(self.handle(index))
    }

    /// Capture the current end of both record sequences
    pub fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            list_id: self.id,
            last_preceding: self.preceding.last().copied(),
            last_following: self.following.last().copied(),
        }
    }

    /// Revert every following record added after `anchor`.
    ///
    /// Preceding records and the primary record are never touched.
    pub fn revert_children_of(&mut self, anchor: RecordHandle) -> Result<(), RecordError> {
        let anchor = self.resolve(anchor)?;
        let targets: Vec<usize> = self
            .following
            .iter()
            .copied()
            .filter(|&index| index > anchor)
            .collect();
        let reverted = self.revert_all(&targets);

        tracing::debug!(
            "Reverted {} following records after record {} of {}",
            reverted,
            anchor,
            self.consensus_time
        );
        Ok(())
    }

    /// Revert every preceding and following record added after `checkpoint`
    pub fn revert_children_from(&mut self, checkpoint: Checkpoint) -> Result<(), RecordError> {
        if checkpoint.list_id != self.id {
            return Err(RecordError::InvalidArgument(
                "checkpoint belongs to a different record list".to_string(),
            ));
        }

        let preceding_start = Self::position_after(&self.preceding, checkpoint.last_preceding)?;
        let following_start = Self::position_after(&self.following, checkpoint.last_following)?;

        let mut targets: Vec<usize> = self.preceding[preceding_start..].to_vec();
        targets.extend_from_slice(&self.following[following_start..]);
        let reverted = self.revert_all(&targets);

        tracing::debug!(
            "Reverted {} records from checkpoint of {}",
            reverted,
            self.consensus_time
        );
        Ok(())
    }

    /// Freeze all records in stream order: preceding, primary, following
    pub fn build(self) -> RecordListResult {
        let Self {
            slots,
            preceding,
            following,
            ..
        } = self;

        let user_transaction_id = slots[PRIMARY_INDEX].builder.transaction_id();
        let mut slots: Vec<Option<Slot>> = slots.into_iter().map(Some).collect();
        let order = preceding
            .iter()
            .copied()
            .chain(std::iter::once(PRIMARY_INDEX))
            .chain(following.iter().copied());

        let mut records = Vec::with_capacity(slots.len());
        let mut user_index = 0;
        for index in order {
            let Some(slot) = slots[index].take() else {
                continue;
            };
            if slot.removed {
                continue;
            }
            let mut builder = slot.builder;
            if slot.position == Position::Primary {
                user_index = records.len();
            } else {
                let base = builder.transaction_id().or(user_transaction_id);
                if let Some(id) = base {
                    builder.set_transaction_id(id.with_nonce(slot.offset as u32));
                }
            }
            records.push(builder.build());
        }

        RecordListResult {
            records,
            user_index,
        }
    }

    fn handle(&self, index: usize) -> RecordHandle {
        RecordHandle {
            list_id: self.id,
            index,
        }
    }

    fn resolve(&self, handle: RecordHandle) -> Result<usize, RecordError> {
        if handle.list_id != self.id || handle.index >= self.slots.len() {
            return Err(RecordError::InvalidArgument(format!(
                "record {} was not added to this record list",
                handle.index
            )));
        }
        Ok(handle.index)
    }

    fn live<'a>(&'a self, indices: &'a [usize]) -> impl Iterator<Item = usize> + 'a {
        indices
            .iter()
            .copied()
            .filter(move |&index| !self.slots[index].removed)
    }

    fn push(
        &mut self,
        position: Position,
        offset: u64,
        consensus_time: Timestamp,
        reversing_behavior: ReversingBehavior,
        category: TransactionCategory,
    ) -> usize {
        let mut builder = RecordBuilder::new(consensus_time, reversing_behavior, category);
        if let Some(id) = self.primary().transaction_id() {
            builder.set_transaction_id(id.with_nonce(offset as u32));
        }
        self.slots.push(Slot {
            builder,
            position,
            offset,
            removed: false,
        });
        self.slots.len() - 1
    }

    fn stamp(builder: &mut RecordBuilder, consensus_time: Timestamp, nonce: u64) {
        builder.set_consensus_timestamp(consensus_time);
        if let Some(id) = builder.transaction_id() {
            builder.set_transaction_id(id.with_nonce(nonce as u32));
        }
    }

    /// Index into `sequence` of the first record added after `last`
    fn position_after(sequence: &[usize], last: Option<usize>) -> Result<usize, RecordError> {
        match last {
            None => Ok(0),
            Some(last) => sequence
                .iter()
                .position(|&index| index == last)
                .map(|position| position + 1)
                .ok_or_else(|| {
                    RecordError::InvalidArgument(format!(
                        "checkpoint record {} is not part of this record list",
                        last
                    ))
                }),
        }
    }

    fn revert_all(&mut self, targets: &[usize]) -> usize {
        let mut reverted = 0;
        for &index in targets {
            let slot = &mut self.slots[index];
            if slot.removed {
                continue;
            }
            match slot.builder.reversing_behavior() {
                ReversingBehavior::Removable => {
                    slot.removed = true;
                    reverted += 1;
                }
                ReversingBehavior::Reversible => {
                    // A real failure is never overwritten by the revert marker
                    if slot.builder.status().is_success() {
                        slot.builder.set_status(ResponseCode::RevertedSuccess);
                        slot.builder.null_out_side_effect_fields();
                        reverted += 1;
                    }
                }
                ReversingBehavior::Irreversible => {}
            }
        }
        reverted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityId, TransactionId};
    use proptest::prelude::*;

    const NOW: Timestamp = Timestamp::new(1_700_000_000, 500);

    fn limits() -> RecordLimits {
        RecordLimits {
            max_preceding_records: 3,
            max_following_records: 10,
        }
    }

    fn list() -> RecordListBuilder {
        let mut list = RecordListBuilder::new(NOW);
        list.primary_mut()
            .set_transaction_id(TransactionId::new(EntityId::num(2), Timestamp::new(1_699_999_990, 0)));
        list
    }

    fn nonces(result: &RecordListResult) -> Vec<u32> {
        result
            .records()
            .iter()
            .map(|r| r.transaction_id().unwrap().nonce)
            .collect()
    }

    #[test]
    fn test_initial_list_holds_only_primary() {
        let result = list().build();
        assert_eq!(result.len(), 1);
        assert_eq!(result.user_record().consensus_timestamp(), NOW);
        assert_eq!(result.user_record().transaction_id().unwrap().nonce, 0);
        assert!(result.user_record().record.parent_consensus_timestamp.is_none());
    }

    #[test]
    fn test_preceding_and_following_order() {
        let mut list = list();
        let limits = limits();
        list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();
        list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.add_preceding(&limits, ReversingBehavior::Irreversible).unwrap();
        list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.add_removable_child(&limits, TransactionCategory::Child).unwrap();

        let result = list.build();
        assert_eq!(result.len(), 6);
        assert_eq!(nonces(&result), vec![2, 1, 0, 1, 2, 3]);

        let times: Vec<_> = result.records().iter().map(|r| r.consensus_timestamp()).collect();
        assert_eq!(
            times,
            vec![
                NOW.minus_nanos(2),
                NOW.minus_nanos(1),
                NOW,
                NOW.plus_nanos(1),
                NOW.plus_nanos(2),
                NOW.plus_nanos(3),
            ]
        );
        assert_eq!(result.user_record().consensus_timestamp(), NOW);
    }

    #[test]
    fn test_parent_timestamp_only_on_following() {
        let mut list = list();
        let limits = limits();
        list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();
        list.add_child(&limits, TransactionCategory::Child).unwrap();

        let result = list.build();
        assert!(result.records()[0].record.parent_consensus_timestamp.is_none());
        assert!(result.records()[1].record.parent_consensus_timestamp.is_none());
        assert_eq!(result.records()[2].record.parent_consensus_timestamp, Some(NOW));
    }

    #[test]
    fn test_limits_are_atomic() {
        let mut list = list();
        let limits = RecordLimits {
            max_preceding_records: 1,
            max_following_records: 1,
        };
        list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();
        list.add_child(&limits, TransactionCategory::Child).unwrap();

        let err = list
            .add_preceding(&limits, ReversingBehavior::Reversible)
            .unwrap_err();
        assert_eq!(
            err,
            RecordError::ChildRecordLimitExceeded {
                direction: RecordDirection::Preceding,
                limit: 1
            }
        );
        assert_eq!(err.response_code(), ResponseCode::MaxChildRecordsExceeded);

        let err = list
            .add_removable_child(&limits, TransactionCategory::Child)
            .unwrap_err();
        assert!(matches!(
            err,
            RecordError::ChildRecordLimitExceeded {
                direction: RecordDirection::Following,
                ..
            }
        ));

        assert_eq!(list.preceding_count(), 1);
        assert_eq!(list.following_count(), 1);
        assert_eq!(list.build().len(), 3);
    }

    #[test]
    fn test_revert_children_of_primary() {
        let mut list = list();
        let limits = limits();
        let child = list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.builder_mut(child).unwrap().set_transaction_fee(10);

        let primary = list.primary_handle();
        list.revert_children_of(primary).unwrap();

        let result = list.build();
        assert_eq!(result.len(), 2);
        let child = &result.records()[1];
        assert_eq!(child.status(), ResponseCode::RevertedSuccess);
        assert_eq!(child.consensus_timestamp(), NOW.plus_nanos(1));
        assert_eq!(child.record.transaction_fee, 0);
    }

    #[test]
    fn test_revert_keeps_real_failures_and_irreversible() {
        let mut list = list();
        let limits = limits();
        let failed = list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.builder_mut(failed)
            .unwrap()
            .set_status(ResponseCode::InsufficientAccountBalance);
        let fixed = list
            .add_following(&limits, TransactionCategory::Child, ReversingBehavior::Irreversible)
            .unwrap();
        list.builder_mut(fixed).unwrap().set_status(ResponseCode::Success);

        let primary = list.primary_handle();
        list.revert_children_of(primary).unwrap();

        let result = list.build();
        assert_eq!(result.records()[1].status(), ResponseCode::InsufficientAccountBalance);
        assert_eq!(result.records()[2].status(), ResponseCode::Success);
    }

    #[test]
    fn test_revert_children_of_only_after_anchor() {
        let mut list = list();
        let limits = limits();
        let first = list.add_child(&limits, TransactionCategory::Child).unwrap();
        let second = list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.add_removable_child(&limits, TransactionCategory::Child).unwrap();

        list.revert_children_of(first).unwrap();
        assert_eq!(list.builder(first).unwrap().status(), ResponseCode::Ok);
        assert_eq!(list.builder(second).unwrap().status(), ResponseCode::RevertedSuccess);
        assert_eq!(list.following_count(), 2);
    }

    #[test]
    fn test_revert_children_of_ignores_preceding() {
        let mut list = list();
        let limits = limits();
        let before = list.add_preceding(&limits, ReversingBehavior::Removable).unwrap();
        list.add_child(&limits, TransactionCategory::Child).unwrap();
        let after = list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();

        let primary = list.primary_handle();
        list.revert_children_of(primary).unwrap();

        assert!(!list.is_removed(before).unwrap());
        assert_eq!(list.builder(after).unwrap().status(), ResponseCode::Ok);
        assert_eq!(list.preceding_count(), 2);
    }

    #[test]
    fn test_removed_child_leaves_gap() {
        let mut list = list();
        let limits = limits();
        list.add_child(&limits, TransactionCategory::Child).unwrap();
        let anchor = list.add_child(&limits, TransactionCategory::Child).unwrap();
        let removable = list.add_removable_child(&limits, TransactionCategory::Child).unwrap();
        list.revert_children_of(anchor).unwrap();
        assert!(list.is_removed(removable).unwrap());
        assert!(list.builder_mut(removable).is_err());

        list.add_child(&limits, TransactionCategory::Child).unwrap();

        let result = list.build();
        assert_eq!(result.len(), 4);
        let times: Vec<_> = result.records()[1..]
            .iter()
            .map(|r| r.consensus_timestamp())
            .collect();
        assert_eq!(times, vec![NOW.plus_nanos(1), NOW.plus_nanos(2), NOW.plus_nanos(4)]);
        assert_eq!(nonces(&result), vec![0, 1, 2, 4]);
    }

    #[test]
    fn test_revert_children_from_checkpoint() {
        let mut list = list();
        let limits = limits();
        let kept_preceding = list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();
        let kept_child = list.add_child(&limits, TransactionCategory::Child).unwrap();

        let checkpoint = list.checkpoint();
        assert_eq!(checkpoint.last_preceding(), Some(kept_preceding));
        assert_eq!(checkpoint.last_following(), Some(kept_child));

        let reverted_preceding = list.add_preceding(&limits, ReversingBehavior::Reversible).unwrap();
        let removed_preceding = list.add_preceding(&limits, ReversingBehavior::Removable).unwrap();
        let reverted_child = list.add_child(&limits, TransactionCategory::Child).unwrap();
        let failed_child = list.add_child(&limits, TransactionCategory::Child).unwrap();
        list.builder_mut(failed_child)
            .unwrap()
            .set_status(ResponseCode::ContractRevertExecuted);

        list.revert_children_from(checkpoint).unwrap();

        assert_eq!(list.builder(kept_preceding).unwrap().status(), ResponseCode::Ok);
        assert_eq!(list.builder(kept_child).unwrap().status(), ResponseCode::Ok);
        assert_eq!(
            list.builder(reverted_preceding).unwrap().status(),
            ResponseCode::RevertedSuccess
        );
        assert!(list.is_removed(removed_preceding).unwrap());
        assert_eq!(
            list.builder(reverted_child).unwrap().status(),
            ResponseCode::RevertedSuccess
        );
        assert_eq!(
            list.builder(failed_child).unwrap().status(),
            ResponseCode::ContractRevertExecuted
        );

        let result = list.build();
        assert_eq!(result.len(), 6);
        let statuses: Vec<_> = result.records().iter().map(|r| r.status()).collect();
        assert_eq!(
            statuses,
            vec![
                ResponseCode::Ok,
                ResponseCode::RevertedSuccess,
                ResponseCode::Ok,
                ResponseCode::Ok,
                ResponseCode::RevertedSuccess,
                ResponseCode::ContractRevertExecuted,
            ]
        );
        assert_eq!(result.user_record().consensus_timestamp(), NOW);
    }

    #[test]
    fn test_empty_checkpoint_reverts_everything() {
        let mut list = list();
        let limits = limits();
        let checkpoint = list.checkpoint();
        assert_eq!(checkpoint.last_preceding(), None);
        list.add_preceding(&limits, ReversingBehavior::Removable).unwrap();
        list.add_removable_child(&limits, TransactionCategory::Child).unwrap();

        list.revert_children_from(checkpoint).unwrap();
        assert_eq!(list.build().len(), 1);
    }

    #[test]
    fn test_foreign_references_rejected() {
        let mut list = list();
        let mut other = RecordListBuilder::new(NOW);
        let limits = limits();
        let foreign = other.add_child(&limits, TransactionCategory::Child).unwrap();

        assert!(matches!(
            list.revert_children_of(foreign),
            Err(RecordError::InvalidArgument(_))
        ));
        assert!(matches!(
            list.revert_children_from(other.checkpoint()),
            Err(RecordError::InvalidArgument(_))
        ));
        assert!(list.builder_mut(foreign).is_err());
    }

    #[test]
    fn test_child_inherits_payer_and_valid_start() {
        let mut list = list();
        let limits = limits();
        list.add_child(&limits, TransactionCategory::Child).unwrap();
        let result = list.build();

        let user = result.user_record().transaction_id().unwrap();
        let child = result.records()[1].transaction_id().unwrap();
        assert_eq!(child.payer, user.payer);
        assert_eq!(child.valid_start, user.valid_start);
        assert_eq!(child.nonce, 1);
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Preceding(bool),
        Following(bool),
        RevertFromPrimary,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            any::<bool>().prop_map(Op::Preceding),
            any::<bool>().prop_map(Op::Following),
            Just(Op::RevertFromPrimary),
        ]
    }

    proptest! {
        #[test]
        fn prop_timestamps_strictly_increase(ops in proptest::collection::vec(op(), 0..40)) {
            let mut list = list();
            let limits = RecordLimits { max_preceding_records: 8, max_following_records: 16 };
            for op in ops {
                match op {
                    Op::Preceding(removable) => {
                        let behavior = if removable { ReversingBehavior::Removable } else { ReversingBehavior::Reversible };
                        let _ = list.add_preceding(&limits, behavior);
                    }
                    Op::Following(removable) => {
                        let _ = if removable {
                            list.add_removable_child(&limits, TransactionCategory::Child)
                        } else {
                            list.add_child(&limits, TransactionCategory::Child)
                        };
                    }
                    Op::RevertFromPrimary => {
                        let primary = list.primary_handle();
                        list.revert_children_of(primary).unwrap();
                    }
                }
            }
            let result = list.build();
            let times: Vec<_> = result.records().iter().map(|r| r.consensus_timestamp()).collect();
            prop_assert!(times.windows(2).all(|w| w[0] < w[1]));
            prop_assert!(times.first().copied().unwrap() >= NOW.minus_nanos(8));
            prop_assert!(times.last().copied().unwrap() <= NOW.plus_nanos(16));
        }

        #[test]
        fn prop_removed_following_never_compacts(count in 1usize..12, removed in proptest::collection::vec(any::<bool>(), 12)) {
            let mut list = list();
            let limits = RecordLimits { max_preceding_records: 0, max_following_records: 32 };
            let mut handles = Vec::new();
            for i in 0..count {
                let handle = if removed[i] {
                    list.add_removable_child(&limits, TransactionCategory::Child)
                } else {
                    list.add_child(&limits, TransactionCategory::Child)
                };
                handles.push(handle.unwrap());
            }
            let primary = list.primary_handle();
            list.revert_children_of(primary).unwrap();

            let expected: Vec<_> = (0..count)
                .filter(|&i| !removed[i])
                .map(|i| NOW.plus_nanos(i as u64 + 1))
                .collect();
            let result = list.build();
            let times: Vec<_> = result.records()[1..].iter().map(|r| r.consensus_timestamp()).collect();
            prop_assert_eq!(times, expected);
        }
    }
}
