//! Record Streamer
//!
//! Replays a script of consensus-ordered transactions into a signed,
//! hash-chained record stream. Block state is persisted to disk and the
//! stream continues where the previous run stopped.

use anyhow::{Context, Result};
use block_stream::{
    producer_for, BlockRecordManager, BlockSigner, Ed25519BlockSigner,
    FileBlockWriter, ProducerKind, SledStateStore,
};
use clap::{Parser, ValueEnum};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::path::{Path, PathBuf};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod replay;

use config::StreamerConfig;
use replay::{ReplayScript, Replayer};

/// Producer selection
#[derive(Debug, Clone, Copy, ValueEnum)]
enum Producer {
    /// Write record files on the replay thread
    Sync,
    /// Write record files on a background thread
    Concurrent,
}

impl From<Producer> for ProducerKind {
    fn from(p: Producer) -> Self {
        match p {
            Producer::Sync => ProducerKind::Sync,
            Producer::Concurrent => ProducerKind::Concurrent,
        }
    }
}

/// Hash-chained record stream replay
#[derive(Parser, Debug)]
#[command(name = "record-streamer")]
#[command(about = "Replay ordered transactions into a signed record stream", long_about = None)]
struct Args {
    /// Replay script (JSON)
    script: PathBuf,

    /// Configuration file (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for persistent block state
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Directory for record files
    #[arg(long)]
    record_dir: Option<PathBuf>,

    /// Stream producer
    #[arg(long, value_enum)]
    producer: Option<Producer>,

    /// Block period in seconds
    #[arg(long)]
    block_period_secs: Option<u64>,

    /// Hash and track blocks without writing record files
    #[arg(long)]
    no_stream: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// Config file values overridden by command line flags
    fn resolve_config(&self) -> Result<StreamerConfig> {
        let mut config = StreamerConfig::load(self.config.as_deref())?;
        if let Some(dir) = &self.state_dir {
            config.state_dir = dir.clone();
        }
        if let Some(dir) = &self.record_dir {
            config.block_stream.record_dir = dir.clone();
        }
        if let Some(producer) = self.producer {
            config.block_stream.producer = producer.into();
        }
        if let Some(period) = self.block_period_secs {
            config.block_stream.block_period_secs = period;
        }
        if self.no_stream {
            config.block_stream.enabled = false;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.resolve_config()?;
    let script = ReplayScript::load(&args.script)?;

    tracing::info!("Starting record streamer");
    tracing::info!("  Script: {:?} ({} transactions)", args.script, script.transactions.len());
    tracing::info!("  State directory: {:?}", config.state_dir);
    tracing::info!("  Record directory: {:?}", config.block_stream.record_dir);
    tracing::info!("  Producer: {:?}", config.block_stream.producer);
    tracing::info!("  Block period: {}s", config.block_stream.block_period_secs);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, stopping after the current transaction");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    let replay = tokio::task::spawn_blocking(move || run(config, script, &stop));
    match replay.await.context("replay task panicked")? {
        Ok(()) => Ok(()),
        Err(e) => {
            if let Some(stream_error) = e.downcast_ref::<block_stream::BlockStreamError>() {
                if stream_error.is_fatal() {
                    tracing::error!("Fatal record stream failure: {:#}", e);
                    std::process::exit(2);
                }
            }
            Err(e)
        }
    }
}

/// Open state, build the stream pipeline and replay the script
fn run(config: StreamerConfig, script: ReplayScript, stop: &AtomicBool) -> Result<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    let mut state = SledStateStore::open(&config.state_dir)?;

    let signer = if config.sign_files {
        let signer = load_signer(config.signing_key_file.as_deref())?;
        tracing::info!("Signing record files with key {}", hex::encode(&signer.public_key()));
        Some(Box::new(signer) as Box<dyn BlockSigner>)
    } else {
        None
    };
    let writer = FileBlockWriter::new(&config.block_stream.record_dir, signer)?;
    let producer = producer_for(&config.block_stream, Box::new(writer));
    let mut manager = BlockRecordManager::new(config.block_stream.clone(), producer, &state)?;

    let mut closed_blocks = manager.subscribe();

    let outcome = Replayer::new(&mut manager, &mut state, config.record_limits, config.round_size)
        .run(&script, stop);

    // Always finish the open record file, even after a failure
    let closed = manager.close();

    while let Ok(block) = closed_blocks.try_recv() {
        tracing::debug!(
            "Block {} closed: {} records from {}",
            block.number,
            block.record_count,
            block.first_cons_time
        );
    }

    let summary = outcome?;
    closed?;

    tracing::info!(
        "Replayed {} transactions ({} records, {} new blocks{})",
        summary.transactions,
        summary.records,
        summary.blocks_opened,
        if summary.interrupted { ", interrupted" } else { "" }
    );
    println!("block {}", manager.block_number());
    println!("running hash {}", hex::encode(&manager.running_hash()));
    Ok(())
}

/// Read a 32-byte ed25519 secret, or generate a fresh one
fn load_signer(path: Option<&Path>) -> Result<Ed25519BlockSigner> {
    match path {
        Some(path) => {
            let bytes = std::fs::read(path).with_context(|| format!("reading signing key {:?}", path))?;
            let secret: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("signing key {:?} must be 32 bytes, found {}", path, bytes.len()))?;
            Ok(Ed25519BlockSigner::from_bytes(&secret))
        }
        None => {
            tracing::warn!("No signing key configured; using an ephemeral key");
            Ok(Ed25519BlockSigner::new(SigningKey::generate(&mut OsRng)))
        }
    }
}
