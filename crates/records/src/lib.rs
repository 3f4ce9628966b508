//! Ledger Records
//!
//! Assembly of transaction records for the record stream:
//! - [`RecordBuilder`]: mutable accumulator for one record
//! - [`RecordListBuilder`]: preceding, user and child records of one user transaction
//! - Wire types shared with the block stream

pub mod config;
pub mod error;
pub mod record_builder;
pub mod record_list_builder;
pub mod types;

pub use config::RecordLimits;
pub use error::{RecordDirection, RecordError};
pub use record_builder::RecordBuilder;
pub use record_list_builder::{Checkpoint, RecordHandle, RecordListBuilder, RecordListResult};
pub use types::*;
