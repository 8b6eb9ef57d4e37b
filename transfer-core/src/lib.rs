//! Transfer Core
//!
//! Account balances, ledger entries and two-party money transfers over a
//! transactional RocksDB store.
//!
//! # Architecture
//!
//! - **Units of work**: every transfer is one pessimistic store transaction
//! - **Lock ordering**: account rows are locked in ascending id order
//! - **Bounded waits**: one deadline covers lock waits, commit and retries
//! - **Retry**: transient store failures are retried with linear backoff
//!
//! # Invariants
//!
//! - Money conservation: each transfer posts `-amount` and `+amount`
//! - Balance integrity: an account's balance equals the sum of its entries
//! - Atomicity: a failed transfer leaves no transfer, entry or balance change
//! - No deadlock: concurrent transfers over the same accounts never cycle

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod retry;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use config::Config;
pub use coordinator::TxCoordinator;
pub use engine::TransferEngine;
pub use error::{Error, ErrorKind, Result, TransferStep, TransientCause};
pub use ledger::Ledger;
pub use metrics::Metrics;
pub use retry::RetryPolicy;
pub use storage::Storage;
pub use store::{RowStore, UnitOfWork};
pub use types::{
    Account, AccountId, Currency, Entry, EntryId, Page, Transfer, TransferId, TransferOutcome,
    TransferRequest, TransferResult,
};
