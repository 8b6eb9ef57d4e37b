//! Core types for the ledger
//!
//! All rows are designed for:
//! - Deterministic serialization (bincode)
//! - Integer arithmetic in the smallest currency unit
//! - Immutability after creation (except `Account::balance`/`version`)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            /// Wrap a raw id
            pub fn new(id: i64) -> Self {
                Self(id)
            }

            /// Raw id
            pub fn get(&self) -> i64 {
                self.0
            }

            /// Big-endian key bytes (ids are positive, so byte order == id order)
            pub fn to_key(&self) -> [u8; 8] {
                self.0.to_be_bytes()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Account identifier. Ordering defines the lock-acquisition order.
    AccountId
);
row_id!(
    /// Entry identifier
    EntryId
);
row_id!(
    /// Transfer identifier
    TransferId
);

/// ISO 4217 currency code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Currency {
    /// US Dollar
    USD,
    /// Euro
    EUR,
    /// Canadian Dollar
    CAD,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::USD => "USD",
            Currency::EUR => "EUR",
            Currency::CAD => "CAD",
        }
    }

    /// Parse from an ISO code
    pub fn from_code(s: &str) -> Option<Self> {
        match s {
            "USD" => Some(Currency::USD),
            "EUR" => Some(Currency::EUR),
            "CAD" => Some(Currency::CAD),
            _ => None,
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Bank account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Stable identity
    pub id: AccountId,

    /// Owner reference (immutable)
    pub owner: String,

    /// Balance in the smallest currency unit
    pub balance: i64,

    /// Currency, fixed at creation
    pub currency: Currency,

    /// Bumped on every balance adjustment
    pub version: u64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Ledger posting against one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry ID
    pub id: EntryId,

    /// Owning account
    pub account_id: AccountId,

    /// Negative = debit, positive = credit
    pub amount: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Record of a two-account balance movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Transfer ID
    pub id: TransferId,

    /// Debited account
    pub from_account_id: AccountId,

    /// Credited account
    pub to_account_id: AccountId,

    /// Positive magnitude
    pub amount: i64,

    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

/// Everything a committed transfer produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferResult {
    /// Transfer row
    pub transfer: Transfer,
    /// Debit entry (`-amount` on `from`)
    pub from_entry: Entry,
    /// Credit entry (`+amount` on `to`)
    pub to_entry: Entry,
    /// Debited account after adjustment
    pub from_account: Account,
    /// Credited account after adjustment
    pub to_account: Account,
}

impl TransferResult {
    /// Compact outcome for request-handling callers
    pub fn outcome(&self) -> TransferOutcome {
        TransferOutcome {
            transfer_id: self.transfer.id,
            from_entry_id: self.from_entry.id,
            to_entry_id: self.to_entry.id,
            from_account_new_balance: self.from_account.balance,
            to_account_new_balance: self.to_account.balance,
        }
    }
}

/// Identifiers and new balances of a committed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Transfer ID
    pub transfer_id: TransferId,
    /// Debit entry ID
    pub from_entry_id: EntryId,
    /// Credit entry ID
    pub to_entry_id: EntryId,
    /// Balance of the debited account after commit
    pub from_account_new_balance: i64,
    /// Balance of the credited account after commit
    pub to_account_new_balance: i64,
}

/// Transfer request as received from the request-handling layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Debited account
    pub from_account_id: AccountId,
    /// Credited account
    pub to_account_id: AccountId,
    /// Amount in the smallest currency unit
    pub amount: i64,
    /// Currency both accounts must hold
    pub currency: Currency,
    /// Owner making the request, checked against the debited account
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Pagination window, ascending id order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Maximum rows returned
    pub limit: usize,
    /// Rows skipped
    pub offset: usize,
}

impl Page {
    /// Create a page
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
        }
    }
}
