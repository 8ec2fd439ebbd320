//! # Prevail Core
//!
//! An embeddable prevalence engine. The application state lives entirely in
//! memory; every change goes through a named operation that is recorded in
//! an append-only journal before or after it is acknowledged, depending on
//! the write mode. On startup the journal is replayed to rebuild the state.
//!
//! This crate provides:
//! - A transaction coordinator that assigns strictly increasing ids
//! - A buffering stage that coalesces bursts of writes into one fsync
//! - A writer stage with time-based journal file rotation
//! - Chunked recovery that restores the state and the id counter
//! - An operation registry binding journaled names to code

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod coordinator;
pub mod dir;
mod engine;
mod error;
pub mod journal;
pub mod recovery;
pub mod registry;
mod state;
mod types;

/// Version of the engine crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use config::Config;
pub use engine::Engine;
pub use error::{CoreError, CoreResult, OperationError};
pub use journal::{FileJournal, JournalEntry, TransactionLog, WriteAck};
pub use recovery::{IdGap, RecoveryReport, TornTail};
pub use registry::{OperationFn, OperationRegistry};
pub use state::RootState;
pub use types::{TransactionId, WriteMode};

pub use prevail_codec::Value;
