//! Stream Producers
//!
//! Producers sit between the block manager and a [`BlockWriter`]. Calls arrive
//! in chain order on the handle thread; every producer must hand them to the
//! writer in that same order.

mod concurrent;
mod sync;

pub use concurrent::ConcurrentProducer;
pub use sync::SyncProducer;

use crate::config::{BlockStreamConfig, ProducerKind};
use crate::error::{BlockStreamError, Result};
use crate::running_hash::Hash;
use crate::writer::BlockWriter;
use ledger_records::Timestamp;

/// Hands serialized records to a block writer
pub trait StreamProducer: Send {
    /// Start a block whose first streamed record has `first_cons_time`
    fn begin_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: Hash) -> Result<()>;

    /// Stream one serialized record
    fn write(&mut self, item: Vec<u8>) -> Result<()>;

    /// Finish the current block with its block hash
    fn end_block(&mut self, end_hash: Hash) -> Result<()>;

    /// Wait for every pending write and release the writer
    fn close(&mut self) -> Result<()>;
}

/// Build the producer selected by `config`
pub fn producer_for(config: &BlockStreamConfig, writer: Box<dyn BlockWriter>) -> Box<dyn StreamProducer> {
    if !config.enabled {
        tracing::info!("Record streaming disabled");
        return Box::new(DisabledProducer::default());
    }
    match config.producer {
        ProducerKind::Sync => Box::new(SyncProducer::new(writer)),
        ProducerKind::Concurrent => Box::new(ConcurrentProducer::new(writer, config.queue_capacity)),
    }
}

/// Producer used when streaming is turned off; only tracks closure
#[derive(Debug, Default)]
pub struct DisabledProducer {
    closed: bool,
}

impl DisabledProducer {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(BlockStreamError::Closed)
        } else {
            Ok(())
        }
    }
}

impl StreamProducer for DisabledProducer {
    fn begin_block(&mut self, _number: u64, _first_cons_time: Timestamp, _start_hash: Hash) -> Result<()> {
        self.check_open()
    }

    fn write(&mut self, _item: Vec<u8>) -> Result<()> {
        self.check_open()
    }

    fn end_block(&mut self, _end_hash: Hash) -> Result<()> {
        self.check_open()
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
