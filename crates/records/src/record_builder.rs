//! Record Builder
//!
//! Mutable accumulator for everything one transaction externalizes. Handlers
//! set and append fields while executing; `build()` freezes the result into a
//! [`SingleTransactionRecord`].

use crate::types::{
    AccountAmount, AccountId, AssessedCustomFee, ContractFunctionResult, ContractId, Entropy,
    ExchangeRateSet, FileId, ResponseCode, ReversingBehavior, ScheduleId, SidecarKind,
    SidecarRecord, SingleTransactionRecord, Timestamp, TokenAssociation, TokenId,
    TokenTransferList, TopicId, Transaction, TransactionCategory, TransactionId,
    TransactionReceipt, TransactionRecord,
};
use sha2::{Digest, Sha384};

/// Accumulates the output fields of a single transaction
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    // Fixed at creation
    reversing_behavior: ReversingBehavior,
    category: TransactionCategory,

    // Base transaction data
    consensus_timestamp: Timestamp,
    parent_consensus_timestamp: Option<Timestamp>,
    transaction: Transaction,
    transaction_bytes: Vec<u8>,
    transaction_id: Option<TransactionId>,
    memo: String,
    transaction_fee: u64,

    // Record fields
    transfer_list: Vec<AccountAmount>,
    token_transfer_lists: Vec<TokenTransferList>,
    assessed_custom_fees: Vec<AssessedCustomFee>,
    automatic_token_associations: Vec<TokenAssociation>,
    paid_staking_rewards: Vec<AccountAmount>,
    alias: Vec<u8>,
    ethereum_hash: Vec<u8>,
    evm_address: Vec<u8>,
    contract_result: Option<ContractFunctionResult>,
    entropy: Entropy,

    // Receipt fields
    status: ResponseCode,
    account_id: Option<AccountId>,
    contract_id: Option<ContractId>,
    file_id: Option<FileId>,
    token_id: Option<TokenId>,
    topic_id: Option<TopicId>,
    schedule_id: Option<ScheduleId>,
    scheduled_transaction_id: Option<TransactionId>,
    topic_sequence_number: u64,
    topic_running_hash: Vec<u8>,
    new_total_supply: u64,
    serial_numbers: Vec<i64>,
    exchange_rate: ExchangeRateSet,

    // Sidecars in call order, with their migration flag
    sidecars: Vec<(SidecarKind, bool)>,
}

impl RecordBuilder {
    /// Create a builder for a transaction handled at `consensus_timestamp`
    pub fn new(
        consensus_timestamp: Timestamp,
        reversing_behavior: ReversingBehavior,
        category: TransactionCategory,
    ) -> Self {
        Self {
            reversing_behavior,
            category,
            consensus_timestamp,
            parent_consensus_timestamp: None,
            transaction: Transaction::default(),
            transaction_bytes: Vec::new(),
            transaction_id: None,
            memo: String::new(),
            transaction_fee: 0,
            transfer_list: Vec::new(),
            token_transfer_lists: Vec::new(),
            assessed_custom_fees: Vec::new(),
            automatic_token_associations: Vec::new(),
            paid_staking_rewards: Vec::new(),
            alias: Vec::new(),
            ethereum_hash: Vec::new(),
            evm_address: Vec::new(),
            contract_result: None,
            entropy: Entropy::None,
            status: ResponseCode::Ok,
            account_id: None,
            contract_id: None,
            file_id: None,
            token_id: None,
            topic_id: None,
            schedule_id: None,
            scheduled_transaction_id: None,
            topic_sequence_number: 0,
            topic_running_hash: Vec::new(),
            new_total_supply: 0,
            serial_numbers: Vec::new(),
            exchange_rate: ExchangeRateSet::default(),
            sidecars: Vec::new(),
        }
    }

    /// Freeze the accumulated fields into an immutable record
    pub fn build(self) -> SingleTransactionRecord {
        let transaction_hash = Sha384::digest(&self.transaction_bytes).to_vec();

        // Incomplete rate sets are never externalized
        let exchange_rate = self
            .exchange_rate
            .is_complete()
            .then_some(self.exchange_rate);

        let receipt = TransactionReceipt {
            status: self.status,
            account_id: self.account_id,
            contract_id: self.contract_id,
            file_id: self.file_id,
            token_id: self.token_id,
            topic_id: self.topic_id,
            schedule_id: self.schedule_id,
            scheduled_transaction_id: self.scheduled_transaction_id,
            topic_sequence_number: self.topic_sequence_number,
            topic_running_hash: self.topic_running_hash,
            new_total_supply: self.new_total_supply,
            serial_numbers: self.serial_numbers,
            exchange_rate,
        };

        let mut automatic_token_associations = self.automatic_token_associations;
        automatic_token_associations.sort();

        let record = TransactionRecord {
            transaction_id: self.transaction_id,
            receipt,
            transaction_hash,
            consensus_timestamp: self.consensus_timestamp,
            parent_consensus_timestamp: self.parent_consensus_timestamp,
            memo: self.memo,
            transaction_fee: self.transaction_fee,
            transfer_list: self.transfer_list,
            token_transfer_lists: self.token_transfer_lists,
            assessed_custom_fees: self.assessed_custom_fees,
            automatic_token_associations,
            paid_staking_rewards: self.paid_staking_rewards,
            alias: self.alias,
            ethereum_hash: self.ethereum_hash,
            evm_address: self.evm_address,
            contract_result: self.contract_result,
            entropy: self.entropy,
        };

        let consensus_timestamp = self.consensus_timestamp;
        let sidecars = self
            .sidecars
            .into_iter()
            .map(|(kind, migration)| SidecarRecord {
                consensus_timestamp,
                migration,
                kind,
            })
            .collect();

        tracing::trace!(
            "Built record at {} ({:?}, {:?})",
            consensus_timestamp,
            record.receipt.status,
            self.category
        );

        SingleTransactionRecord {
            transaction: self.transaction,
            record,
            sidecars,
        }
    }

    /// Clear every field describing a side effect of the transaction.
    ///
    /// Called when the transaction is reverted: the record survives but must
    /// not claim effects that were rolled back.
    pub fn null_out_side_effect_fields(&mut self) {
        self.serial_numbers.clear();
        self.token_transfer_lists.clear();
        self.automatic_token_associations.clear();
        self.transfer_list.clear();
        self.paid_staking_rewards.clear();
        self.assessed_custom_fees.clear();

        self.new_total_supply = 0;
        self.transaction_fee = 0;
        self.contract_result = None;

        self.account_id = None;
        self.contract_id = None;
        self.file_id = None;
        self.token_id = None;
        self.topic_id = None;
        if self.status != ResponseCode::IdenticalScheduleAlreadyCreated {
            self.schedule_id = None;
            self.scheduled_transaction_id = None;
        }

        self.topic_running_hash.clear();
        self.topic_sequence_number = 0;
        self.alias.clear();
        self.ethereum_hash.clear();
        self.evm_address.clear();
    }

    pub fn reversing_behavior(&self) -> ReversingBehavior {
        self.reversing_behavior
    }

    pub fn category(&self) -> TransactionCategory {
        self.category
    }

    pub fn consensus_timestamp(&self) -> Timestamp {
        self.consensus_timestamp
    }

    pub fn parent_consensus_timestamp(&self) -> Option<Timestamp> {
        self.parent_consensus_timestamp
    }

    pub fn status(&self) -> ResponseCode {
        self.status
    }

    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.transaction_id
    }

    pub fn transaction_fee(&self) -> u64 {
        self.transaction_fee
    }

    pub fn entropy(&self) -> &Entropy {
        &self.entropy
    }

    pub fn serial_numbers(&self) -> &[i64] {
        &self.serial_numbers
    }

    pub fn transfer_list(&self) -> &[AccountAmount] {
        &self.transfer_list
    }

    pub fn sidecar_count(&self) -> usize {
        self.sidecars.len()
    }

    pub(crate) fn set_consensus_timestamp(&mut self, consensus_timestamp: Timestamp) -> &mut Self {
        self.consensus_timestamp = consensus_timestamp;
        self
    }

    pub(crate) fn set_parent_consensus_timestamp(&mut self, parent: Timestamp) -> &mut Self {
        self.parent_consensus_timestamp = Some(parent);
        self
    }

    /// Set the transaction; its signed bytes become the input of the transaction hash
    pub fn set_transaction(&mut self, transaction: Transaction) -> &mut Self {
        self.transaction_bytes = transaction.signed_transaction_bytes.clone();
        self.transaction = transaction;
        self
    }

    /// Override the bytes the transaction hash is computed from
    pub fn set_transaction_bytes(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.transaction_bytes = bytes;
        self
    }

    pub fn set_transaction_id(&mut self, transaction_id: TransactionId) -> &mut Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn set_memo(&mut self, memo: impl Into<String>) -> &mut Self {
        self.memo = memo.into();
        self
    }

    pub fn set_transaction_fee(&mut self, fee: u64) -> &mut Self {
        self.transaction_fee = fee;
        self
    }

    pub fn set_status(&mut self, status: ResponseCode) -> &mut Self {
        self.status = status;
        self
    }

    pub fn set_transfer_list(&mut self, transfers: Vec<AccountAmount>) -> &mut Self {
        self.transfer_list = transfers;
        self
    }

    pub fn add_token_transfer_list(&mut self, transfers: TokenTransferList) -> &mut Self {
        self.token_transfer_lists.push(transfers);
        self
    }

    pub fn add_assessed_custom_fee(&mut self, fee: AssessedCustomFee) -> &mut Self {
        self.assessed_custom_fees.push(fee);
        self
    }

    pub fn add_automatic_token_association(&mut self, association: TokenAssociation) -> &mut Self {
        self.automatic_token_associations.push(association);
        self
    }

    pub fn add_paid_staking_reward(&mut self, reward: AccountAmount) -> &mut Self {
        self.paid_staking_rewards.push(reward);
        self
    }

    pub fn set_account_id(&mut self, account_id: AccountId) -> &mut Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn set_contract_id(&mut self, contract_id: ContractId) -> &mut Self {
        self.contract_id = Some(contract_id);
        self
    }

    pub fn set_file_id(&mut self, file_id: FileId) -> &mut Self {
        self.file_id = Some(file_id);
        self
    }

    pub fn set_token_id(&mut self, token_id: TokenId) -> &mut Self {
        self.token_id = Some(token_id);
        self
    }

    pub fn set_topic_id(&mut self, topic_id: TopicId) -> &mut Self {
        self.topic_id = Some(topic_id);
        self
    }

    pub fn set_schedule_id(&mut self, schedule_id: ScheduleId) -> &mut Self {
        self.schedule_id = Some(schedule_id);
        self
    }

    pub fn set_scheduled_transaction_id(&mut self, transaction_id: TransactionId) -> &mut Self {
        self.scheduled_transaction_id = Some(transaction_id);
        self
    }

    pub fn set_topic_sequence_number(&mut self, sequence_number: u64) -> &mut Self {
        self.topic_sequence_number = sequence_number;
        self
    }

    pub fn set_topic_running_hash(&mut self, running_hash: Vec<u8>) -> &mut Self {
        self.topic_running_hash = running_hash;
        self
    }

    pub fn set_new_total_supply(&mut self, supply: u64) -> &mut Self {
        self.new_total_supply = supply;
        self
    }

    pub fn add_serial_number(&mut self, serial_number: i64) -> &mut Self {
        self.serial_numbers.push(serial_number);
        self
    }

    pub fn set_exchange_rate(&mut self, exchange_rate: ExchangeRateSet) -> &mut Self {
        self.exchange_rate = exchange_rate;
        self
    }

    pub fn set_alias(&mut self, alias: Vec<u8>) -> &mut Self {
        self.alias = alias;
        self
    }

    pub fn set_ethereum_hash(&mut self, hash: Vec<u8>) -> &mut Self {
        self.ethereum_hash = hash;
        self
    }

    pub fn set_evm_address(&mut self, address: Vec<u8>) -> &mut Self {
        self.evm_address = address;
        self
    }

    pub fn set_contract_result(&mut self, result: ContractFunctionResult) -> &mut Self {
        self.contract_result = Some(result);
        self
    }

    /// Set numeric entropy, replacing any byte entropy
    pub fn set_entropy_number(&mut self, number: i32) -> &mut Self {
        self.entropy = Entropy::Number(number);
        self
    }

    /// Set byte entropy, replacing any numeric entropy
    pub fn set_entropy_bytes(&mut self, bytes: Vec<u8>) -> &mut Self {
        self.entropy = Entropy::Bytes(bytes);
        self
    }

    pub fn add_sidecar(&mut self, kind: SidecarKind, migration: bool) -> &mut Self {
        self.sidecars.push((kind, migration));
        self
    }
}
