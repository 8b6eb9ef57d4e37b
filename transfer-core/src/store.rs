//! Row-store boundary
//!
//! The engine only talks to storage through these two traits. A
//! [`UnitOfWork`] groups writes that commit or roll back together; reads on
//! [`RowStore`] see committed data only.
//!
//! Implementations must classify every failure into the crate's
//! [`ErrorKind`](crate::ErrorKind) taxonomy before returning it.

use crate::{
    types::{Account, AccountId, Currency, Entry, EntryId, Page, Transfer, TransferId},
    Result,
};
use std::time::Instant;

/// Durable store of accounts, entries and transfers
pub trait RowStore: Send + Sync {
    /// Begin an atomic unit at read-committed isolation, bounded by `deadline`
    fn begin(&self, deadline: Instant) -> Result<Box<dyn UnitOfWork + '_>>;

    /// Committed account row
    fn get_account(&self, id: AccountId) -> Result<Account>;

    /// Committed entry row
    fn get_entry(&self, id: EntryId) -> Result<Entry>;

    /// Committed transfer row
    fn get_transfer(&self, id: TransferId) -> Result<Transfer>;

    /// Accounts of one owner
    fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>>;

    /// Entries of one account
    fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>>;

    /// Transfers debiting or crediting one account
    fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>>;
}

/// Handle on one open atomic unit of work
///
/// Dropping a handle without calling [`commit`](UnitOfWork::commit) discards
/// its writes.
pub trait UnitOfWork {
    /// Read an account and hold its row lock until the unit ends
    fn get_account_for_update(&mut self, id: AccountId) -> Result<Account>;

    /// Insert a new account with zero balance
    fn insert_account(&mut self, owner: &str, currency: Currency) -> Result<Account>;

    /// Insert a transfer row; both accounts must exist
    fn insert_transfer(&mut self, from: AccountId, to: AccountId, amount: i64) -> Result<Transfer>;

    /// Insert an entry row; the account must exist
    fn insert_entry(&mut self, account_id: AccountId, amount: i64) -> Result<Entry>;

    /// `balance += delta` under the row's exclusive lock
    fn adjust_balance(&mut self, id: AccountId, delta: i64) -> Result<Account>;

    /// Make every write of the unit visible at once
    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard every write of the unit
    fn rollback(&mut self) -> Result<()>;
}
