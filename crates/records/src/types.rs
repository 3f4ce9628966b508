//! Core record types
//!
//! Everything in here is part of the serialized record stream, so every type
//! derives borsh (deterministic stream encoding) as well as serde (config,
//! scripts and persisted metadata).

use borsh::{BorshDeserialize, BorshSerialize};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds in one second
pub const NANOS_PER_SECOND: u32 = 1_000_000_000;

/// A consensus timestamp with nanosecond precision
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Timestamp {
    /// Whole seconds since the unix epoch
    pub seconds: i64,
    /// Nanoseconds within the second, always below one billion
    pub nanos: u32,
}

impl Timestamp {
    /// The unix epoch
    pub const EPOCH: Timestamp = Timestamp { seconds: 0, nanos: 0 };

    /// Create a new timestamp
    pub const fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Whether the nanosecond field is in range
    pub const fn is_valid(&self) -> bool {
        self.nanos < NANOS_PER_SECOND
    }

    /// Total nanoseconds since the epoch
    pub fn as_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SECOND as i128 + self.nanos as i128
    }

    /// Earliest representable timestamp
    pub const MIN: Timestamp = Timestamp { seconds: i64::MIN, nanos: 0 };

    /// Latest representable timestamp
    pub const MAX: Timestamp = Timestamp { seconds: i64::MAX, nanos: NANOS_PER_SECOND - 1 };

    /// Build a timestamp from total nanoseconds since the epoch, saturating
    /// at [`Timestamp::MIN`] and [`Timestamp::MAX`]
    pub fn from_nanos(total: i128) -> Self {
        let per_second = NANOS_PER_SECOND as i128;
        match i64::try_from(total.div_euclid(per_second)) {
            Ok(seconds) => Self {
                seconds,
                nanos: total.rem_euclid(per_second) as u32,
            },
            Err(_) if total < 0 => Self::MIN,
            Err(_) => Self::MAX,
        }
    }

    /// This timestamp moved `nanos` nanoseconds into the future
    pub fn plus_nanos(&self, nanos: u64) -> Self {
        Self::from_nanos(self.as_nanos() + nanos as i128)
    }

    /// This timestamp moved `nanos` nanoseconds into the past
    pub fn minus_nanos(&self, nanos: u64) -> Self {
        Self::from_nanos(self.as_nanos() - nanos as i128)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.seconds, self.nanos)
    }
}

/// `shard.realm.num` identifier shared by every ledger entity type
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct EntityId {
    pub shard: i64,
    pub realm: i64,
    pub num: i64,
}

impl EntityId {
    pub const fn new(shard: i64, realm: i64, num: i64) -> Self {
        Self { shard, realm, num }
    }

    /// Entity `0.0.num`
    pub const fn num(num: i64) -> Self {
        Self::new(0, 0, num)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

pub type AccountId = EntityId;
pub type ContractId = EntityId;
pub type FileId = EntityId;
pub type TokenId = EntityId;
pub type TopicId = EntityId;
pub type ScheduleId = EntityId;

/// Identity of a transaction: payer, valid start and nonce
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct TransactionId {
    /// Account paying for the transaction
    pub payer: AccountId,
    /// Start of the transaction's validity window
    pub valid_start: Timestamp,
    /// Zero for user transactions, positive for synthetic records
    pub nonce: u32,
    /// Whether this is a scheduled execution
    pub scheduled: bool,
}

impl TransactionId {
    pub const fn new(payer: AccountId, valid_start: Timestamp) -> Self {
        Self {
            payer,
            valid_start,
            nonce: 0,
            scheduled: false,
        }
    }

    /// Same payer and valid start, different nonce
    pub const fn with_nonce(&self, nonce: u32) -> Self {
        Self {
            payer: self.payer,
            valid_start: self.valid_start,
            nonce,
            scheduled: self.scheduled,
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.payer, self.valid_start)?;
        if self.scheduled {
            write!(f, "?scheduled")?;
        }
        if self.nonce != 0 {
            write!(f, "/{}", self.nonce)?;
        }
        Ok(())
    }
}

/// Final status of a transaction
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResponseCode {
    #[default]
    Ok,
    Success,
    FeeScheduleFilePartUploaded,
    SuccessButMissingExpectedOperation,
    /// Marker for child records undone by a failure in their parent
    RevertedSuccess,
    IdenticalScheduleAlreadyCreated,
    InvalidSignature,
    InsufficientPayerBalance,
    InsufficientAccountBalance,
    InsufficientGas,
    InvalidAccountId,
    InvalidTokenId,
    InvalidContractId,
    TokenNotAssociatedToAccount,
    ContractRevertExecuted,
    ContractExecutionException,
    MaxChildRecordsExceeded,
    FailInvalid,
}

impl ResponseCode {
    /// Statuses a reversion is allowed to overwrite with [`ResponseCode::RevertedSuccess`]
    pub const fn is_success(&self) -> bool {
        matches!(
            self,
            ResponseCode::Ok
                | ResponseCode::Success
                | ResponseCode::FeeScheduleFilePartUploaded
                | ResponseCode::SuccessButMissingExpectedOperation
        )
    }
}

/// How a record reacts when the transaction that caused it is reverted
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ReversingBehavior {
    /// Status flips to `RevertedSuccess`, the record stays in the stream
    Reversible,
    /// The record disappears from the stream
    Removable,
    /// Never touched by a reversion
    Irreversible,
}

/// Where a record came from
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TransactionCategory {
    User,
    Preceding,
    Child,
    Scheduled,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AccountAmount {
    pub account: AccountId,
    pub amount: i64,
    pub is_approval: bool,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct NftTransfer {
    pub sender: AccountId,
    pub receiver: AccountId,
    pub serial_number: i64,
    pub is_approval: bool,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TokenTransferList {
    pub token: TokenId,
    pub transfers: Vec<AccountAmount>,
    pub nft_transfers: Vec<NftTransfer>,
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct AssessedCustomFee {
    pub amount: i64,
    /// `None` when the fee is charged in the native currency
    pub token: Option<TokenId>,
    pub fee_collector: AccountId,
    pub effective_payers: Vec<AccountId>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct TokenAssociation {
    pub token: TokenId,
    pub account: AccountId,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct ExchangeRate {
    pub hbar_equiv: i32,
    pub cent_equiv: i32,
    pub expiration_seconds: i64,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct ExchangeRateSet {
    pub current: Option<ExchangeRate>,
    pub next: Option<ExchangeRate>,
}

impl ExchangeRateSet {
    /// Only complete rate sets are externalized in receipts
    pub const fn is_complete(&self) -> bool {
        self.current.is_some() && self.next.is_some()
    }
}

/// Output of a contract call or create
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct ContractFunctionResult {
    pub contract_id: Option<ContractId>,
    pub result: Vec<u8>,
    pub error_message: String,
    pub gas_used: u64,
    pub logs: Vec<Vec<u8>>,
}

/// Pseudo-random output attached to a record. At most one form is ever set.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum Entropy {
    #[default]
    None,
    Number(i32),
    Bytes(Vec<u8>),
}

/// Receipt substructure of a record
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TransactionReceipt {
    pub status: ResponseCode,
    pub account_id: Option<AccountId>,
    pub contract_id: Option<ContractId>,
    pub file_id: Option<FileId>,
    pub token_id: Option<TokenId>,
    pub topic_id: Option<TopicId>,
    pub schedule_id: Option<ScheduleId>,
    pub scheduled_transaction_id: Option<TransactionId>,
    pub topic_sequence_number: u64,
    pub topic_running_hash: Vec<u8>,
    pub new_total_supply: u64,
    pub serial_numbers: Vec<i64>,
    pub exchange_rate: Option<ExchangeRateSet>,
}

/// The externalized outcome of one transaction
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct TransactionRecord {
    pub transaction_id: Option<TransactionId>,
    pub receipt: TransactionReceipt,
    /// SHA-384 of the signed transaction bytes
    pub transaction_hash: Vec<u8>,
    pub consensus_timestamp: Timestamp,
    /// Set only on following (child) records
    pub parent_consensus_timestamp: Option<Timestamp>,
    pub memo: String,
    pub transaction_fee: u64,
    pub transfer_list: Vec<AccountAmount>,
    pub token_transfer_lists: Vec<TokenTransferList>,
    pub assessed_custom_fees: Vec<AssessedCustomFee>,
    pub automatic_token_associations: Vec<TokenAssociation>,
    pub paid_staking_rewards: Vec<AccountAmount>,
    pub alias: Vec<u8>,
    pub ethereum_hash: Vec<u8>,
    pub evm_address: Vec<u8>,
    pub contract_result: Option<ContractFunctionResult>,
    pub entropy: Entropy,
}

/// Payload of a sidecar record
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub enum SidecarKind {
    StateChanges(Vec<u8>),
    Actions(Vec<u8>),
    Bytecode(Vec<u8>),
}

/// Auxiliary execution trace attached to a record
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SidecarRecord {
    pub consensus_timestamp: Timestamp,
    /// Produced by a state migration rather than by execution
    pub migration: bool,
    pub kind: SidecarKind,
}

/// Signed transaction as submitted by the user (or synthesized by the node)
#[derive(
    Debug, Clone, Default, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct Transaction {
    pub signed_transaction_bytes: Vec<u8>,
}

impl Transaction {
    pub fn new(signed_transaction_bytes: Vec<u8>) -> Self {
        Self {
            signed_transaction_bytes,
        }
    }
}

/// One finished, immutable entry of the record stream
#[derive(
    Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize, Serialize, Deserialize,
)]
pub struct SingleTransactionRecord {
    pub transaction: Transaction,
    pub record: TransactionRecord,
    pub sidecars: Vec<SidecarRecord>,
}

impl SingleTransactionRecord {
    pub fn consensus_timestamp(&self) -> Timestamp {
        self.record.consensus_timestamp
    }

    pub fn status(&self) -> ResponseCode {
        self.record.receipt.status
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.record.transaction_id
    }

    /// Deterministic stream encoding, the input to the running hash
    pub fn to_bytes(&self) -> Result<Vec<u8>, borsh::io::Error> {
        borsh::to_vec(self)
    }

    /// Decode a record previously produced by [`Self::to_bytes`]
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_nanos_arithmetic_carries_seconds() {
        let ts = Timestamp::new(10, 999_999_999);
        assert_eq!(ts.plus_nanos(1), Timestamp::new(11, 0));
        assert_eq!(Timestamp::new(11, 0).minus_nanos(1), ts);
        assert_eq!(Timestamp::new(0, 0).minus_nanos(1), Timestamp::new(-1, 999_999_999));
    }

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let near_end = Timestamp::new(i64::MAX, 999_999_998);
        assert_eq!(near_end.plus_nanos(1), Timestamp::MAX);
        assert_eq!(near_end.plus_nanos(5), Timestamp::MAX);
        assert!(near_end.plus_nanos(5) > near_end);

        let near_start = Timestamp::new(i64::MIN, 1);
        assert_eq!(near_start.minus_nanos(1), Timestamp::MIN);
        assert_eq!(near_start.minus_nanos(u64::MAX), Timestamp::MIN);
    }

    #[test]
    fn test_timestamp_ordering() {
        assert!(Timestamp::new(1, 5) < Timestamp::new(1, 6));
        assert!(Timestamp::new(1, 999_999_999) < Timestamp::new(2, 0));
    }

    #[test]
    fn test_success_family() {
        assert!(ResponseCode::Ok.is_success());
        assert!(ResponseCode::Success.is_success());
        assert!(!ResponseCode::RevertedSuccess.is_success());
        assert!(!ResponseCode::InvalidSignature.is_success());
    }

    #[test]
    fn test_transaction_id_display() {
        let id = TransactionId::new(EntityId::num(2), Timestamp::new(5, 1)).with_nonce(3);
        assert_eq!(id.to_string(), "0.0.2@5.000000001/3");
    }
}
