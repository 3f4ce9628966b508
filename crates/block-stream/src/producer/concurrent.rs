//! Producer with a dedicated writer thread
//!
//! The handle thread enqueues commands on a bounded channel and returns
//! immediately unless the queue is full. A single writer thread drains the
//! queue in order, so the writer sees exactly the handle thread's call order.
//! The first writer failure is parked in a shared slot and reported on the
//! next call from the handle thread.

use super::StreamProducer;
use crate::error::{BlockStreamError, Result};
use crate::running_hash::Hash;
use crate::writer::BlockWriter;
use crossbeam_channel::{bounded, Receiver, Sender};
use ledger_records::Timestamp;
use parking_lot::Mutex;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

/// Work for the writer thread
enum Command {
    Begin {
        number: u64,
        first_cons_time: Timestamp,
        start_hash: Hash,
    },
    Write(Vec<u8>),
    End(Hash),
}

/// Streams records through a background writer thread
pub struct ConcurrentProducer {
    /// Command queue; dropped on close to stop the writer thread
    sender: Option<Sender<Command>>,
    /// Writer thread handle
    worker: Option<JoinHandle<()>>,
    /// First failure seen by the writer thread
    failure: Arc<Mutex<Option<BlockStreamError>>>,
    /// Running flag
    running: Arc<AtomicBool>,
    closed: bool,
}

impl ConcurrentProducer {
    /// Start the writer thread with a queue of `capacity` commands
    pub fn new(writer: Box<dyn BlockWriter>, capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        let failure = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let failure = failure.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("record-writer".to_string())
                .spawn(move || run_writer(writer, receiver, failure, running))
        };

        let worker = match worker {
            Ok(handle) => {
                tracing::info!("Concurrent record producer started (queue capacity {})", capacity.max(1));
                Some(handle)
            }
            Err(e) => {
                tracing::error!("Failed to start record writer thread: {}", e);
                running.store(false, Ordering::SeqCst);
                *failure.lock() = Some(BlockStreamError::Write(format!(
                    "record writer thread failed to start: {}",
                    e
                )));
                None
            }
        };

        Self {
            sender: Some(sender),
            worker,
            failure,
            running,
            closed: false,
        }
    }

    /// Whether the writer thread is still accepting work
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn check_failure(&self) -> Result<()> {
        match self.failure.lock().as_ref() {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn submit(&mut self, command: Command) -> Result<()> {
        if self.closed {
            return Err(BlockStreamError::Closed);
        }
        self.check_failure()?;

        let sender = self.sender.as_ref().ok_or(BlockStreamError::Closed)?;
        if sender.send(command).is_err() {
            // The writer thread exited; it parks its failure before leaving
            self.check_failure()?;
            return Err(BlockStreamError::Write("record writer thread stopped".to_string()));
        }
        Ok(())
    }
}

impl StreamProducer for ConcurrentProducer {
    fn begin_block(&mut self, number: u64, first_cons_time: Timestamp, start_hash: Hash) -> Result<()> {
        self.submit(Command::Begin {
            number,
            first_cons_time,
            start_hash,
        })
    }

    fn write(&mut self, item: Vec<u8>) -> Result<()> {
        self.submit(Command::Write(item))
    }

    fn end_block(&mut self, end_hash: Hash) -> Result<()> {
        self.submit(Command::End(end_hash))
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        // Disconnect the queue; the writer drains what is left and exits
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                return Err(BlockStreamError::Write("record writer thread panicked".to_string()));
            }
        }

        self.check_failure()?;
        tracing::info!("Concurrent record producer stopped");
        Ok(())
    }
}

impl Drop for ConcurrentProducer {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!("Record producer closed with error: {}", e);
        }
    }
}

/// Writer thread loop
fn run_writer(
    mut writer: Box<dyn BlockWriter>,
    receiver: Receiver<Command>,
    failure: Arc<Mutex<Option<BlockStreamError>>>,
    running: Arc<AtomicBool>,
) {
    let mut written = 0u64;

    for command in receiver.iter() {
        let result = match command {
            Command::Begin {
                number,
                first_cons_time,
                start_hash,
            } => writer.open_block(number, first_cons_time, &start_hash),
            Command::Write(item) => {
                written += 1;
                writer.write_item(&item)
            }
            Command::End(end_hash) => writer.close_block(&end_hash),
        };

        if let Err(e) = result {
            tracing::error!("Record writer failed after {} items: {}", written, e);
            *failure.lock() = Some(e);
            running.store(false, Ordering::SeqCst);
            return;
        }
    }

    if let Err(e) = writer.flush() {
        tracing::error!("Record writer flush failed: {}", e);
        *failure.lock() = Some(e);
    }
    running.store(false, Ordering::SeqCst);
    tracing::debug!("Record writer thread exiting after {} items", written);
}
