//! Error types for the transfer engine
//!
//! Every failure is classified into a closed [`ErrorKind`] at the store
//! boundary. Callers (and the retry policy) branch on the kind, never on
//! error text.

use crate::types::{AccountId, Currency, EntryId, TransferId};
use std::fmt;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed taxonomy surfaced to request-handling callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Account, entry or transfer does not exist
    NotFound,
    /// Connection loss or lock contention; safe to re-run the unit
    TransientStoreFailure,
    /// A store rule rejected the write (overdraft, overflow)
    ConstraintViolation,
    /// The caller's deadline expired; the unit was rolled back
    DeadlineExceeded,
    /// Anything else coming out of the store
    InternalStoreError,
    /// Request rejected before the engine ran
    InvalidRequest,
    /// Requester does not own the debited account
    Unauthorized,
}

impl ErrorKind {
    /// Stable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::TransientStoreFailure => "TRANSIENT_STORE_FAILURE",
            ErrorKind::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorKind::DeadlineExceeded => "DEADLINE_EXCEEDED",
            ErrorKind::InternalStoreError => "INTERNAL_STORE_ERROR",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
        }
    }
}

/// Why a store failure is considered transient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransientCause {
    /// Connection to the store was lost or reset
    ConnectionLost,
    /// Statement cancelled because of lock contention or a detected deadlock
    Contention,
}

impl fmt::Display for TransientCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientCause::ConnectionLost => write!(f, "connection lost"),
            TransientCause::Contention => write!(f, "contention"),
        }
    }
}

/// Step of the transfer unit of work, attached to errors for context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStep {
    /// Inserting the transfer row
    InsertTransfer,
    /// Inserting the debit entry
    InsertFromEntry,
    /// Inserting the credit entry
    InsertToEntry,
    /// Adjusting one of the two balances
    AdjustBalance(AccountId),
}

impl fmt::Display for TransferStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStep::InsertTransfer => write!(f, "insert transfer"),
            TransferStep::InsertFromEntry => write!(f, "insert debit entry"),
            TransferStep::InsertToEntry => write!(f, "insert credit entry"),
            TransferStep::AdjustBalance(id) => write!(f, "adjust balance of account {}", id),
        }
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Entry not found
    #[error("Entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(TransferId),

    /// Transient store failure (retryable)
    #[error("Transient store failure ({cause}): {message}")]
    Transient {
        /// Classified cause
        cause: TransientCause,
        /// Store message
        message: String,
    },

    /// Store rule rejected the write
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Deadline of the unit of work expired
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A transfer step failed
    #[error("Transfer step '{step}' failed: {source}")]
    Step {
        /// Step that failed
        step: TransferStep,
        /// Underlying cause, unchanged
        #[source]
        source: Box<Error>,
    },

    /// The unit failed and its rollback failed as well
    #[error("Transaction failed: {source}; rollback failed: {rollback}")]
    RollbackFailed {
        /// Original failure
        #[source]
        source: Box<Error>,
        /// Rollback failure
        rollback: Box<Error>,
    },

    /// Retry policy gave up
    #[error("Failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Last failure
        #[source]
        source: Box<Error>,
    },

    /// Request rejected before the engine ran
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Account currency differs from the requested currency
    #[error("Account {account} currency mismatch: {actual} vs {expected}")]
    CurrencyMismatch {
        /// Account checked
        account: AccountId,
        /// Currency of the request
        expected: Currency,
        /// Currency of the account
        actual: Currency,
    },

    /// Requester does not own the debited account
    #[error("Account {account} doesn't belong to {requested_by}")]
    Unauthorized {
        /// Debited account
        account: AccountId,
        /// Requesting owner
        requested_by: String,
    },

    /// Concurrency error (blocking task panicked or was cancelled)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify into the closed taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AccountNotFound(_) | Error::EntryNotFound(_) | Error::TransferNotFound(_) => {
                ErrorKind::NotFound
            }
            Error::Transient { .. } => ErrorKind::TransientStoreFailure,
            Error::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            Error::DeadlineExceeded(_) => ErrorKind::DeadlineExceeded,
            Error::Step { source, .. } | Error::RetriesExhausted { source, .. } => source.kind(),
            // Effects of the failed attempt may still be in place
            Error::RollbackFailed { .. } => ErrorKind::InternalStoreError,
            Error::InvalidRequest(_) | Error::CurrencyMismatch { .. } => ErrorKind::InvalidRequest,
            Error::Unauthorized { .. } => ErrorKind::Unauthorized,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::InternalStoreError,
        }
    }

    /// Whether re-running the whole unit of work is safe
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::TransientStoreFailure
    }

    /// Innermost error, skipping step/retry wrappers
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Step { source, .. } | Error::RetriesExhausted { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Attach the failing transfer step
    pub fn at_step(self, step: TransferStep) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    pub(crate) fn transient(cause: TransientCause, message: impl Into<String>) -> Self {
        Error::Transient {
            cause,
            message: message.into(),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        use rocksdb::ErrorKind as RocksKind;

        match err.kind() {
            RocksKind::Busy | RocksKind::TryAgain | RocksKind::TimedOut => {
                Error::transient(TransientCause::Contention, err.into_string())
            }
            RocksKind::Expired => Error::DeadlineExceeded(err.into_string()),
            _ => Error::Storage(err.into_string()),
        }
    }
}
