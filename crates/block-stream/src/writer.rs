//! Block Writers
//!
//! A writer receives the serialized records of one block between
//! `open_block` and `close_block`. [`FileBlockWriter`] produces one record
//! file per block plus a signature file; [`InMemoryBlockWriter`] keeps
//! everything in memory for tests and tooling.
//!
//! Record files are a borsh-encoded [`RecordFileHeader`] followed by
//! [`RecordFileFrame`]s: one `Item` per streamed record and a final `End`
//! carrying the block hash. The signature file next to it is a borsh-encoded
//! [`SignatureFile`] over the SHA-384 of the whole record file.

use crate::error::{BlockStreamError, Result};
use crate::running_hash::{finish, Hash};
use borsh::{BorshDeserialize, BorshSerialize};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use ledger_records::Timestamp;
use parking_lot::Mutex;
use sha2::{Digest, Sha384};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Record file format version
pub const RECORD_FILE_VERSION: u32 = 1;

/// Record file extension
pub const RECORD_FILE_EXTENSION: &str = "rcd";

/// Signature file extension
pub const SIGNATURE_FILE_EXTENSION: &str = "rcd_sig";

/// Leading section of a record file
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct RecordFileHeader {
    pub version: u32,
    pub block_number: u64,
    pub start_hash: Hash,
}

/// Everything after the header
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum RecordFileFrame {
    /// One serialized record
    Item(Vec<u8>),
    /// Running hash after the block's last record
    End(Hash),
}

/// Contents of a `.rcd_sig` file
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignatureFile {
    pub file_hash: Hash,
    pub signature: Vec<u8>,
}

/// Sink for the serialized records of consecutive blocks
pub trait BlockWriter: Send {
    /// Start a block whose first streamed record has `first_cons_time`
    fn open_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: &Hash) -> Result<()>;

    /// Append one serialized record to the open block
    fn write_item(&mut self, bytes: &[u8]) -> Result<()>;

    /// Finish the open block with the running hash after its last record
    fn close_block(&mut self, end_hash: &Hash) -> Result<()>;

    /// Push buffered output to its destination
    fn flush(&mut self) -> Result<()>;
}

/// Signs finished record files
pub trait BlockSigner: Send + Sync {
    fn sign(&self, file_hash: &Hash) -> Result<Vec<u8>>;

    fn public_key(&self) -> Vec<u8>;
}

/// ed25519 record file signer
pub struct Ed25519BlockSigner {
    key: SigningKey,
}

impl Ed25519BlockSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(secret))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }
}

impl BlockSigner for Ed25519BlockSigner {
    fn sign(&self, file_hash: &Hash) -> Result<Vec<u8>> {
        Ok(self.key.sign(file_hash).to_bytes().to_vec())
    }

    fn public_key(&self) -> Vec<u8> {
        self.key.verifying_key().to_bytes().to_vec()
    }
}

/// File name stem for a block whose first record has `time`
pub fn record_file_stem(time: Timestamp) -> Result<String> {
    let datetime: DateTime<Utc> = DateTime::from_timestamp(time.seconds, time.nanos)
        .ok_or_else(|| BlockStreamError::Write(format!("timestamp {} out of range", time)))?;
    Ok(datetime.format("%Y-%m-%dT%H_%M_%S%.9fZ").to_string())
}

/// Hashes everything written through it
struct HashingWriter<W> {
    inner: W,
    hasher: Sha384,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.hasher.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct OpenRecordFile {
    path: PathBuf,
    number: u64,
    out: HashingWriter<BufWriter<File>>,
    items: usize,
}

impl OpenRecordFile {
    fn put<T: BorshSerialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        borsh::to_writer(&mut self.out, value)?;
        Ok(())
    }
}

/// Writes one signed record file per block into a directory
pub struct FileBlockWriter {
    dir: PathBuf,
    signer: Option<Box<dyn BlockSigner>>,
    current: Option<OpenRecordFile>,
}

impl FileBlockWriter {
    /// Create a writer, creating the output directory if needed
    pub fn new<P: AsRef<Path>>(dir: P, signer: Option<Box<dyn BlockSigner>>) -> Result<Self> {
        fs::create_dir_all(dir.as_ref())?;
        tracing::info!(
            "Writing record files to {:?} ({})",
            dir.as_ref(),
            if signer.is_some() { "signed" } else { "unsigned" }
        );
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            signer,
            current: None,
        })
    }

    fn write_signature(&self, path: &Path, file_hash: &Hash) -> Result<()> {
        let Some(signer) = &self.signer else {
            return Ok(());
        };
        let contents = SignatureFile {
            file_hash: *file_hash,
            signature: signer.sign(file_hash)?,
        };
        let mut out = BufWriter::new(File::create(path.with_extension(SIGNATURE_FILE_EXTENSION))?);
        borsh::to_writer(&mut out, &contents)?;
        out.flush()?;
        Ok(())
    }
}

impl BlockWriter for FileBlockWriter {
    fn open_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: &Hash) -> Result<()> {
        if let Some(open) = &self.current {
            return Err(BlockStreamError::InvalidState(format!(
                "block {} is still open in {:?}",
                open.number, open.path
            )));
        }

        let path = self
            .dir
            .join(format!("{}.{}", record_file_stem(first_cons_time)?, RECORD_FILE_EXTENSION));
        let file = File::create(&path)?;
        let mut open = OpenRecordFile {
            path,
            number,
            out: HashingWriter {
                inner: BufWriter::new(file),
                hasher: Sha384::new(),
            },
            items: 0,
        };
        open.put(&RecordFileHeader {
            version: RECORD_FILE_VERSION,
            block_number: number,
            start_hash: *start_hash,
        })?;

        tracing::debug!("Opened record file {:?} for block {}", open.path, number);
        self.current = Some(open);
        Ok(())
    }

    fn write_item(&mut self, bytes: &[u8]) -> Result<()> {
        let open = self
            .current
            .as_mut()
            .ok_or_else(|| BlockStreamError::InvalidState("no record file is open".to_string()))?;
        open.put(&RecordFileFrame::Item(bytes.to_vec()))?;
        open.items += 1;
        Ok(())
    }

    fn close_block(&mut self, end_hash: &Hash) -> Result<()> {
        let mut open = self
            .current
            .take()
            .ok_or_else(|| BlockStreamError::InvalidState("no record file is open".to_string()))?;
        open.put(&RecordFileFrame::End(*end_hash))?;
        open.out.flush()?;
        open.out.inner.get_ref().sync_all()?;

        let file_hash = finish(open.out.hasher);
        self.write_signature(&open.path, &file_hash)?;

        tracing::info!(
            "Closed record file {:?} (block {}, {} items)",
            open.path,
            open.number,
            open.items
        );
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(open) = self.current.as_mut() {
            open.out.flush()?;
        }
        Ok(())
    }
}

/// Contents of a record file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFile {
    pub version: u32,
    pub block_number: u64,
    pub start_hash: Hash,
    pub items: Vec<Vec<u8>>,
    /// `None` when the file was never finished
    pub end_hash: Option<Hash>,
}

/// Parse a record file written by [`FileBlockWriter`]
pub fn read_record_file<P: AsRef<Path>>(path: P) -> Result<RecordFile> {
    let mut reader = BufReader::new(File::open(path.as_ref())?);
    let header = RecordFileHeader::deserialize_reader(&mut reader)?;

    let mut items = Vec::new();
    let mut end_hash = None;
    while !reader.fill_buf()?.is_empty() {
        match RecordFileFrame::deserialize_reader(&mut reader)? {
            RecordFileFrame::Item(bytes) => items.push(bytes),
            RecordFileFrame::End(hash) => {
                end_hash = Some(hash);
                break;
            }
        }
    }

    Ok(RecordFile {
        version: header.version,
        block_number: header.block_number,
        start_hash: header.start_hash,
        items,
        end_hash,
    })
}

/// Check a signature file against its record file and the signer's public key
pub fn verify_signature_file<P: AsRef<Path>>(record_path: P, public_key: &VerifyingKey) -> Result<bool> {
    let record_path = record_path.as_ref();
    let contents = fs::read(record_path)?;
    let sig_file: SignatureFile =
        borsh::from_slice(&fs::read(record_path.with_extension(SIGNATURE_FILE_EXTENSION))?)?;
    let signature = Signature::from_slice(&sig_file.signature)
        .map_err(|e| BlockStreamError::Signing(e.to_string()))?;

    let mut hasher = Sha384::new();
    hasher.update(&contents);
    if finish(hasher) != sig_file.file_hash {
        return Ok(false);
    }
    Ok(public_key.verify(&sig_file.file_hash, &signature).is_ok())
}

/// A block captured by [`InMemoryBlockWriter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenBlock {
    pub number: u64,
    pub first_cons_time: Timestamp,
    pub start_hash: Hash,
    pub items: Vec<Vec<u8>>,
    pub end_hash: Option<Hash>,
}

/// Keeps written blocks in memory; clones share the same blocks
#[derive(Clone, Default)]
pub struct InMemoryBlockWriter {
    blocks: Arc<Mutex<Vec<WrittenBlock>>>,
    open: bool,
}

impl InMemoryBlockWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every block written so far
    pub fn blocks(&self) -> Vec<WrittenBlock> {
        self.blocks.lock().clone()
    }

    /// Total number of items across all blocks
    pub fn item_count(&self) -> usize {
        self.blocks.lock().iter().map(|b| b.items.len()).sum()
    }
}

impl BlockWriter for InMemoryBlockWriter {
    fn open_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: &Hash) -> Result<()> {
        if self.open {
            return Err(BlockStreamError::InvalidState("a block is still open".to_string()));
        }
        self.blocks.lock().push(WrittenBlock {
            number,
            first_cons_time,
            start_hash: *start_hash,
            items: Vec::new(),
            end_hash: None,
        });
        self.open = true;
        Ok(())
    }

    fn write_item(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.open {
            return Err(BlockStreamError::InvalidState("no block is open".to_string()));
        }
        if let Some(block) = self.blocks.lock().last_mut() {
            block.items.push(bytes.to_vec());
        }
        Ok(())
    }

    fn close_block(&mut self, end_hash: &Hash) -> Result<()> {
        if !self.open {
            return Err(BlockStreamError::InvalidState("no block is open".to_string()));
        }
        if let Some(block) = self.blocks.lock().last_mut() {
            block.end_hash = Some(*end_hash);
        }
        self.open = false;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::running_hash::{fold, GENESIS_HASH, HASH_SIZE};
    use rand::rngs::OsRng;
    use tempfile::tempdir;

    #[test]
    fn test_record_file_stem() {
        let stem = record_file_stem(Timestamp::new(0, 5)).unwrap();
        assert_eq!(stem, "1970-01-01T00_00_00.000000005Z");
    }

    #[test]
    fn test_file_writer_layout() {
        let dir = tempdir().unwrap();
        let mut writer = FileBlockWriter::new(dir.path(), None).unwrap();
        let first = Timestamp::new(1_700_000_000, 0);

        writer.open_block(3, first, &GENESIS_HASH).unwrap();
        writer.write_item(b"one").unwrap();
        writer.write_item(b"two").unwrap();
        let end = fold(&fold(&GENESIS_HASH, b"one"), b"two");
        writer.close_block(&end).unwrap();

        let path = dir
            .path()
            .join(format!("{}.rcd", record_file_stem(first).unwrap()));
        let file = read_record_file(&path).unwrap();
        assert_eq!(file.version, RECORD_FILE_VERSION);
        assert_eq!(file.block_number, 3);
        assert_eq!(file.start_hash, GENESIS_HASH);
        assert_eq!(file.items, vec![b"one".to_vec(), b"two".to_vec()]);
        assert_eq!(file.end_hash, Some(end));
        assert!(!path.with_extension(SIGNATURE_FILE_EXTENSION).exists());
    }

    #[test]
    fn test_signed_file_verifies() {
        let dir = tempdir().unwrap();
        let signer = Ed25519BlockSigner::new(SigningKey::generate(&mut OsRng));
        let public_key = signer.verifying_key();
        let mut writer = FileBlockWriter::new(dir.path(), Some(Box::new(signer))).unwrap();
        let first = Timestamp::new(1_700_000_002, 42);

        writer.open_block(0, first, &GENESIS_HASH).unwrap();
        writer.write_item(b"payload").unwrap();
        writer.close_block(&fold(&GENESIS_HASH, b"payload")).unwrap();

        let path = dir
            .path()
            .join(format!("{}.rcd", record_file_stem(first).unwrap()));
        assert!(verify_signature_file(&path, &public_key).unwrap());

        let other = SigningKey::generate(&mut OsRng).verifying_key();
        assert!(!verify_signature_file(&path, &other).unwrap());

        // Tampering invalidates the file hash
        let mut data = fs::read(&path).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xff;
        fs::write(&path, data).unwrap();
        assert!(!verify_signature_file(&path, &public_key).unwrap());
    }

    #[test]
    fn test_unfinished_file_has_no_end_hash() {
        let dir = tempdir().unwrap();
        let mut writer = FileBlockWriter::new(dir.path(), None).unwrap();
        let first = Timestamp::new(10, 0);
        writer.open_block(1, first, &GENESIS_HASH).unwrap();
        writer.write_item(b"partial").unwrap();
        writer.flush().unwrap();

        let path = dir
            .path()
            .join(format!("{}.rcd", record_file_stem(first).unwrap()));
        let file = read_record_file(&path).unwrap();
        assert_eq!(file.items.len(), 1);
        assert_eq!(file.end_hash, None);
    }

    #[test]
    fn test_truncated_record_file_is_rejected() {
        let dir = tempdir().unwrap();
        let mut writer = FileBlockWriter::new(dir.path(), None).unwrap();
        let first = Timestamp::new(20, 0);
        writer.open_block(2, first, &GENESIS_HASH).unwrap();
        writer.write_item(b"complete item").unwrap();
        writer.close_block(&fold(&GENESIS_HASH, b"complete item")).unwrap();

        let path = dir
            .path()
            .join(format!("{}.rcd", record_file_stem(first).unwrap()));
        let data = fs::read(&path).unwrap();

        // Cut into the end hash
        fs::write(&path, &data[..data.len() - 10]).unwrap();
        assert!(matches!(read_record_file(&path), Err(BlockStreamError::Write(_))));

        // Cut into the header
        fs::write(&path, &data[..20]).unwrap();
        assert!(read_record_file(&path).is_err());
    }

    #[test]
    fn test_signature_file_contents() {
        let dir = tempdir().unwrap();
        let signer = Ed25519BlockSigner::new(SigningKey::generate(&mut OsRng));
        let public_key = signer.verifying_key();
        let mut writer = FileBlockWriter::new(dir.path(), Some(Box::new(signer))).unwrap();
        let first = Timestamp::new(30, 0);
        writer.open_block(0, first, &GENESIS_HASH).unwrap();
        writer.close_block(&GENESIS_HASH).unwrap();

        let path = dir
            .path()
            .join(format!("{}.rcd", record_file_stem(first).unwrap()));
        let sig: SignatureFile =
            borsh::from_slice(&fs::read(path.with_extension(SIGNATURE_FILE_EXTENSION)).unwrap()).unwrap();
        assert_eq!(sig.file_hash.to_vec(), Sha384::digest(fs::read(&path).unwrap()).to_vec());
        assert_eq!(sig.signature.len(), 64);
        let signature = Signature::from_slice(&sig.signature).unwrap();
        assert!(public_key.verify(&sig.file_hash, &signature).is_ok());
    }

    #[test]
    fn test_writer_rejects_out_of_order_calls() {
        let dir = tempdir().unwrap();
        let mut writer = FileBlockWriter::new(dir.path(), None).unwrap();
        assert!(writer.write_item(b"x").is_err());
        assert!(writer.close_block(&GENESIS_HASH).is_err());

        let mut memory = InMemoryBlockWriter::new();
        assert!(memory.write_item(b"x").is_err());
        memory.open_block(0, Timestamp::EPOCH, &GENESIS_HASH).unwrap();
        assert!(memory.open_block(1, Timestamp::EPOCH, &GENESIS_HASH).is_err());
    }

    #[test]
    fn test_in_memory_writer_shares_blocks() {
        let mut writer = InMemoryBlockWriter::new();
        let view = writer.clone();
        writer.open_block(0, Timestamp::new(2, 0), &GENESIS_HASH).unwrap();
        writer.write_item(b"a").unwrap();
        writer.close_block(&[7u8; HASH_SIZE]).unwrap();

        let blocks = view.blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].items, vec![b"a".to_vec()]);
        assert_eq!(blocks[0].end_hash, Some([7u8; HASH_SIZE]));
        assert_eq!(view.item_count(), 1);
    }
}
