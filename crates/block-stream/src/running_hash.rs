//! Running Hash Chain
//!
//! Every streamed record is folded into a chained SHA-384 hash:
//!
//! `H_i = SHA384(H_{i-1} || SHA384(record_bytes_i))`
//!
//! The last three previous values are kept as well; the oldest of them seeds
//! the pseudo-random number generator exposed to transactions.

use crate::block_info::RunningHashesInfo;
use crate::error::{BlockStreamError, Result};
use sha2::{Digest, Sha384};

/// Size of every hash in the stream
pub const HASH_SIZE: usize = 48;

/// A SHA-384 digest
pub type Hash = [u8; HASH_SIZE];

/// Hash chain seed used at genesis
pub const GENESIS_HASH: Hash = [0u8; HASH_SIZE];

/// SHA-384 of arbitrary bytes
pub fn sha384(data: &[u8]) -> Hash {
    let mut hasher = Sha384::new();
    hasher.update(data);
    finish(hasher)
}

/// Finalize a digest into a fixed-size hash
pub fn finish(hasher: Sha384) -> Hash {
    let mut hash = [0u8; HASH_SIZE];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

/// Fold one serialized record into the chain
pub fn fold(previous: &Hash, record_bytes: &[u8]) -> Hash {
    let item_hash = sha384(record_bytes);
    let mut hasher = Sha384::new();
    hasher.update(previous);
    hasher.update(item_hash);
    finish(hasher)
}


/// Current running hash plus the three values before it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunningHashes {
    current: Hash,
    n_minus_1: Option<Hash>,
    n_minus_2: Option<Hash>,
    n_minus_3: Option<Hash>,
}

impl Default for RunningHashes {
    fn default() -> Self {
        Self::new(GENESIS_HASH)
    }
}

impl RunningHashes {
    /// Start a chain from `seed`
    pub fn new(seed: Hash) -> Self {
        Self {
            current: seed,
            n_minus_1: None,
            n_minus_2: None,
            n_minus_3: None,
        }
    }

    /// Fold a serialized record, shifting the history by one
    pub fn add(&mut self, record_bytes: &[u8]) -> Hash {
        let next = fold(&self.current, record_bytes);
        self.n_minus_3 = self.n_minus_2;
        self.n_minus_2 = self.n_minus_1;
        self.n_minus_1 = Some(self.current);
        self.current = next;
        next
    }

    pub fn current(&self) -> Hash {
        self.current
    }

    pub fn n_minus_1(&self) -> Option<Hash> {
        self.n_minus_1
    }

    pub fn n_minus_2(&self) -> Option<Hash> {
        self.n_minus_2
    }

    /// Running hash three records back; `None` until three records were folded
    pub fn n_minus_3(&self) -> Option<Hash> {
        self.n_minus_3
    }

    /// Persistable form
    pub fn to_info(&self) -> RunningHashesInfo {
        RunningHashesInfo {
            running_hash: self.current.to_vec(),
            n_minus_1_running_hash: self.n_minus_1.map(|h| h.to_vec()).unwrap_or_default(),
            n_minus_2_running_hash: self.n_minus_2.map(|h| h.to_vec()).unwrap_or_default(),
            n_minus_3_running_hash: self.n_minus_3.map(|h| h.to_vec()).unwrap_or_default(),
        }
    }

    /// Restore from the persisted form; an empty current hash means genesis
    pub fn from_info(info: &RunningHashesInfo) -> Result<Self> {
        let current = if info.running_hash.is_empty() {
            GENESIS_HASH
        } else {
            to_hash(&info.running_hash)?
        };
        Ok(Self {
            current,
            n_minus_1: to_optional_hash(&info.n_minus_1_running_hash)?,
            n_minus_2: to_optional_hash(&info.n_minus_2_running_hash)?,
            n_minus_3: to_optional_hash(&info.n_minus_3_running_hash)?,
        })
    }
}

/// Convert persisted bytes into a hash
pub fn to_hash(bytes: &[u8]) -> Result<Hash> {
    bytes.try_into().map_err(|_| {
        BlockStreamError::Store(format!(
            "expected a {}-byte hash, found {} bytes",
            HASH_SIZE,
            bytes.len()
        ))
    })
}

fn to_optional_hash(bytes: &[u8]) -> Result<Option<Hash>> {
    if bytes.is_empty() {
        Ok(None)
    } else {
        to_hash(bytes).map(Some)
    }
}
