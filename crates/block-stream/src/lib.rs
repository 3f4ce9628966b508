//! Block Stream
//!
//! Turns the ordered records of each user transaction into a chained,
//! block-partitioned record stream:
//! - SHA-384 running hash over every streamed record
//! - Block boundaries on fixed consensus-time periods
//! - Recovery state in a pluggable [`StateStore`] (in memory or sled)
//! - Background production of signed record files

pub mod block_info;
pub mod config;
pub mod error;
pub mod manager;
pub mod persistence;
pub mod producer;
pub mod running_hash;
pub mod state_store;
pub mod writer;


pub use block_info::{BlockInfo, RunningHashesInfo};
pub use config::{BlockStreamConfig, ProducerKind};
pub use error::{BlockStreamError, Result};
pub use manager::{BlockClosed, BlockRecordManager};
pub use persistence::SledStateStore;
pub use producer::{producer_for, ConcurrentProducer, DisabledProducer, StreamProducer, SyncProducer};
pub use running_hash::{Hash, RunningHashes, GENESIS_HASH, HASH_SIZE};
pub use state_store::{InMemoryStateStore, StateStore};
pub use writer::{
    BlockSigner, BlockWriter, Ed25519BlockSigner, FileBlockWriter, InMemoryBlockWriter, RecordFile,
    WrittenBlock,
};
