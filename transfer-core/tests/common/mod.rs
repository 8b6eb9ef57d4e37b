//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tempfile::TempDir;
use transfer_core::{
    Account, AccountId, Config, Currency, Entry, EntryId, Error, Ledger, Page, RowStore, Storage,
    Transfer, TransferId, TransientCause, UnitOfWork,
};

/// Config on a fresh temp directory with fast retries
pub fn test_config(dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.data_dir = dir.path().to_path_buf();
    config.retry.base_delay_ms = 5;
    config
}

/// Ledger over plain RocksDB storage
pub async fn create_test_ledger() -> (Ledger, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::open(test_config(&temp_dir)).await.unwrap();
    (ledger, temp_dir)
}

/// Ledger over a probe wrapping RocksDB storage
pub fn create_probed_ledger() -> (Ledger, Arc<ProbeStore>, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir);
    let probe = Arc::new(ProbeStore::new(Storage::open(&config).unwrap()));
    let ledger = Ledger::with_store(probe.clone(), config).unwrap();
    (ledger, probe, temp_dir)
}

/// Fund a USD account
pub async fn funded(ledger: &Ledger, owner: &str, balance: i64) -> Account {
    ledger
        .create_account(owner, Currency::USD, balance)
        .await
        .unwrap()
}

/// Sum of committed balances
pub fn total_balance(ledger: &Ledger, ids: &[AccountId]) -> i64 {
    ids.iter()
        .map(|id| ledger.get_account(*id).unwrap().balance)
        .sum()
}

/// Committed transfers touching an account
pub fn transfers_of(ledger: &Ledger, id: AccountId) -> Vec<Transfer> {
    ledger.list_transfers(id, Page::new(10_000, 0)).unwrap()
}

/// Committed entries of an account
pub fn entries_of(ledger: &Ledger, id: AccountId) -> Vec<Entry> {
    ledger.list_entries(id, Page::new(10_000, 0)).unwrap()
}

/// Row store that records balance adjustments and injects faults on the
/// second entry insert of a unit (the credit leg of a transfer).
pub struct ProbeStore {
    inner: Storage,
    /// Remaining credit-leg inserts to fail with a transient error
    transient_faults: AtomicU32,
    /// Remaining credit-leg inserts to fail with an internal error
    internal_faults: AtomicU32,
    /// Account ids in the order their balances were adjusted
    adjusted: Mutex<Vec<AccountId>>,
}

impl ProbeStore {
    pub fn new(inner: Storage) -> Self {
        Self {
            inner,
            transient_faults: AtomicU32::new(0),
            internal_faults: AtomicU32::new(0),
            adjusted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_transiently(&self, times: u32) {
        self.transient_faults.store(times, Ordering::SeqCst);
    }

    pub fn fail_internally(&self, times: u32) {
        self.internal_faults.store(times, Ordering::SeqCst);
    }

    pub fn take_adjusted(&self) -> Vec<AccountId> {
        std::mem::take(&mut *self.adjusted.lock().unwrap())
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct ProbeUnit<'a> {
    store: &'a ProbeStore,
    inner: Box<dyn UnitOfWork + 'a>,
    entries: usize,
}

impl UnitOfWork for ProbeUnit<'_> {
    fn get_account_for_update(&mut self, id: AccountId) -> transfer_core::Result<Account> {
        self.inner.get_account_for_update(id)
    }

    fn insert_account(
        &mut self,
        owner: &str,
        currency: Currency,
    ) -> transfer_core::Result<Account> {
        self.inner.insert_account(owner, currency)
    }

    fn insert_transfer(
        &mut self,
        from: AccountId,
        to: AccountId,
        amount: i64,
    ) -> transfer_core::Result<Transfer> {
        self.inner.insert_transfer(from, to, amount)
    }

    fn insert_entry(&mut self, account_id: AccountId, amount: i64) -> transfer_core::Result<Entry> {
        let entry = self.inner.insert_entry(account_id, amount)?;
        self.entries += 1;

        if self.entries == 2 {
            if ProbeStore::take_fault(&self.store.transient_faults) {
                return Err(Error::Transient {
                    cause: TransientCause::ConnectionLost,
                    message: "connection reset by peer".to_string(),
                });
            }
            if ProbeStore::take_fault(&self.store.internal_faults) {
                return Err(Error::Storage("disk I/O error".to_string()));
            }
        }
        Ok(entry)
    }

    fn adjust_balance(&mut self, id: AccountId, delta: i64) -> transfer_core::Result<Account> {
        self.store.adjusted.lock().unwrap().push(id);
        self.inner.adjust_balance(id, delta)
    }

    fn commit(self: Box<Self>) -> transfer_core::Result<()> {
        self.inner.commit()
    }

    fn rollback(&mut self) -> transfer_core::Result<()> {
        self.inner.rollback()
    }
}

impl RowStore for ProbeStore {
    fn begin(&self, deadline: Instant) -> transfer_core::Result<Box<dyn UnitOfWork + '_>> {
        Ok(Box::new(ProbeUnit {
            store: self,
            inner: self.inner.begin(deadline)?,
            entries: 0,
        }))
    }

    fn get_account(&self, id: AccountId) -> transfer_core::Result<Account> {
        self.inner.get_account(id)
    }

    fn get_entry(&self, id: EntryId) -> transfer_core::Result<Entry> {
        self.inner.get_entry(id)
    }

    fn get_transfer(&self, id: TransferId) -> transfer_core::Result<Transfer> {
        self.inner.get_transfer(id)
    }

    fn list_accounts(&self, owner: &str, page: Page) -> transfer_core::Result<Vec<Account>> {
        self.inner.list_accounts(owner, page)
    }

    fn list_entries(&self, account_id: AccountId, page: Page) -> transfer_core::Result<Vec<Entry>> {
        self.inner.list_entries(account_id, page)
    }

    fn list_transfers(
        &self,
        account_id: AccountId,
        page: Page,
    ) -> transfer_core::Result<Vec<Transfer>> {
        self.inner.list_transfers(account_id, page)
    }
}
