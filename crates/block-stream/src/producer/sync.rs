//! Producer that writes on the calling thread

use super::StreamProducer;
use crate::error::{BlockStreamError, Result};
use crate::running_hash::Hash;
use crate::writer::BlockWriter;
use ledger_records::Timestamp;

/// Writes every call straight through to the block writer
pub struct SyncProducer {
    writer: Box<dyn BlockWriter>,
    /// Number of the block currently being written
    current_block: Option<u64>,
    closed: bool,
}

impl SyncProducer {
    pub fn new(writer: Box<dyn BlockWriter>) -> Self {
        tracing::info!("Synchronous record producer started");
        Self {
            writer,
            current_block: None,
            closed: false,
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(BlockStreamError::Closed)
        } else {
            Ok(())
        }
    }
}

impl StreamProducer for SyncProducer {
    fn begin_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: Hash) -> Result<()> {
        self.check_open()?;
        self.writer.open_block(number, first_cons_time, &start_hash)?;
        self.current_block = Some(number);
        Ok(())
    }

    fn write(&mut self, item: Vec<u8>) -> Result<()> {
        self.check_open()?;
        self.writer.write_item(&item)
    }

    fn end_block(&mut self, end_hash: Hash) -> Result<()> {
        self.check_open()?;
        self.writer.close_block(&end_hash)?;
        self.current_block = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.flush()?;
        tracing::info!(
            "Synchronous record producer stopped (open block: {:?})",
            self.current_block
        );
        Ok(())
    }
}
