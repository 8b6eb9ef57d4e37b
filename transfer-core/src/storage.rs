//! Storage layer using a RocksDB `TransactionDB`
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `entries` - Entry rows, insert-only (key: entry_id)
//! - `transfers` - Transfer rows, insert-only (key: transfer_id)
//! - `indices` - Secondary indices for listings
//!
//! Units of work are pessimistic RocksDB transactions without a snapshot,
//! i.e. read committed. Balance adjustments take the account row's exclusive
//! lock with `get_for_update` and hold it until commit or rollback.

use crate::{
    error::{Error, Result},
    store::{RowStore, UnitOfWork},
    types::{Account, AccountId, Currency, Entry, EntryId, Page, Transfer, TransferId},
    Config,
};
use chrono::Utc;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction, IteratorMode, Options,
    SingleThreaded, Transaction, TransactionDB, TransactionDBOptions, TransactionOptions,
    WriteOptions,
};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Instant;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_ENTRIES: &str = "entries";
const CF_TRANSFERS: &str = "transfers";
const CF_INDICES: &str = "indices";

/// Index key tags
const IDX_OWNER_ACCOUNT: u8 = b'o';
const IDX_ACCOUNT_ENTRY: u8 = b'e';
const IDX_ACCOUNT_TRANSFER: u8 = b't';

type Db = TransactionDB<SingleThreaded>;

/// Id sequences, seeded from the highest stored key on open
#[derive(Debug)]
struct Sequences {
    account: AtomicI64,
    entry: AtomicI64,
    transfer: AtomicI64,
}

fn next_id(seq: &AtomicI64) -> i64 {
    seq.fetch_add(1, Ordering::SeqCst) + 1
}

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Db,
    sequences: Sequences,
    lock_timeout_ms: u64,
    deadlock_detect: bool,
    allow_overdraft: bool,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("sequences", &self.sequences)
            .field("allow_overdraft", &self.allow_overdraft)
            .finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);
        db_opts.set_compaction_style(DBCompactionStyle::Level);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let mut txn_db_opts = TransactionDBOptions::default();
        txn_db_opts.set_txn_lock_timeout(config.transaction.lock_timeout_ms as i64);

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_accounts()),
            ColumnFamilyDescriptor::new(CF_ENTRIES, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        let db: Db =
            TransactionDB::open_cf_descriptors(&db_opts, &txn_db_opts, path, cf_descriptors)?;

        let sequences = Sequences {
            account: AtomicI64::new(Self::last_id(&db, CF_ACCOUNTS)?),
            entry: AtomicI64::new(Self::last_id(&db, CF_ENTRIES)?),
            transfer: AtomicI64::new(Self::last_id(&db, CF_TRANSFERS)?),
        };

        tracing::info!(
            path = ?path,
            last_account_id = sequences.account.load(Ordering::SeqCst),
            last_transfer_id = sequences.transfer.load(Ordering::SeqCst),
            "Opened RocksDB transaction store"
        );

        Ok(Self {
            db,
            sequences,
            lock_timeout_ms: config.transaction.lock_timeout_ms,
            deadlock_detect: config.transaction.deadlock_detect,
            allow_overdraft: config.ledger.allow_overdraft,
        })
    }

    // Column family options

    fn cf_options_accounts() -> Options {
        let mut opts = Options::default();
        // Hot rows, read on every transfer
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    fn last_id(db: &Db, name: &str) -> Result<i64> {
        let cf = db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))?;

        match db.iterator_cf(cf, IteratorMode::End).next() {
            Some(item) => {
                let (key, _) = item?;
                decode_id(&key)
            }
            None => Ok(0),
        }
    }

    // Helper: get column family handle

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn get_row<T: DeserializeOwned>(&self, cf_name: &str, key: [u8; 8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(value) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }

    /// Ids stored under an index prefix, ascending, windowed by `page`
    fn scan_index(&self, prefix: &[u8], page: Page) -> Result<Vec<i64>> {
        let cf = self.cf(CF_INDICES)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward));

        let mut ids = Vec::new();
        let mut skipped = 0;
        for item in iter {
            if ids.len() >= page.limit {
                break;
            }
            let (key, _) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            if skipped < page.offset {
                skipped += 1;
                continue;
            }
            ids.push(decode_id(&key[prefix.len()..])?);
        }

        Ok(ids)
    }
}

impl RowStore for Storage {
    fn begin(&self, deadline: Instant) -> Result<Box<dyn UnitOfWork + '_>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(Error::DeadlineExceeded(
                "deadline passed before the unit began".to_string(),
            ));
        }
        let remaining_ms = remaining.as_millis().max(1) as i64;

        let mut txn_opts = TransactionOptions::default();
        txn_opts.set_lock_timeout(remaining_ms.min(self.lock_timeout_ms as i64));
        txn_opts.set_expiration(remaining_ms);
        txn_opts.set_deadlock_detect(self.deadlock_detect);

        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);

        Ok(Box::new(RocksUnit {
            storage: self,
            txn,
            deadline,
        }))
    }

    fn get_account(&self, id: AccountId) -> Result<Account> {
        self.get_row(CF_ACCOUNTS, id.to_key())?
            .ok_or(Error::AccountNotFound(id))
    }

    fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.get_row(CF_ENTRIES, id.to_key())?
            .ok_or(Error::EntryNotFound(id))
    }

    fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.get_row(CF_TRANSFERS, id.to_key())?
            .ok_or(Error::TransferNotFound(id))
    }

    fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        self.scan_index(&owner_prefix(owner), page)?
            .into_iter()
            .map(|id| self.get_account(AccountId::new(id)))
            .collect()
    }

    fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.scan_index(&account_prefix(IDX_ACCOUNT_ENTRY, account_id), page)?
            .into_iter()
            .map(|id| self.get_entry(EntryId::new(id)))
            .collect()
    }

    fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>> {
        self.scan_index(&account_prefix(IDX_ACCOUNT_TRANSFER, account_id), page)?
            .into_iter()
            .map(|id| self.get_transfer(TransferId::new(id)))
            .collect()
    }
}

/// One open RocksDB transaction
struct RocksUnit<'a> {
    storage: &'a Storage,
    txn: Transaction<'a, Db>,
    deadline: Instant,
}

impl RocksUnit<'_> {
    fn check_deadline(&self) -> Result<()> {
        if Instant::now() >= self.deadline {
            return Err(Error::DeadlineExceeded(
                "unit of work ran past its deadline".to_string(),
            ));
        }
        Ok(())
    }

    /// Lock waits are capped by the deadline, so a timeout after it is the
    /// caller's deadline rather than contention.
    fn classify(&self, err: rocksdb::Error) -> Error {
        match Error::from(err) {
            Error::Transient { message, .. } if Instant::now() >= self.deadline => {
                Error::DeadlineExceeded(message)
            }
            other => other,
        }
    }

    fn exists(&self, cf_name: &str, key: [u8; 8]) -> Result<bool> {
        let cf = self.storage.cf(cf_name)?;
        let value = self.txn.get_cf(cf, key).map_err(|e| self.classify(e))?;
        Ok(value.is_some())
    }

    fn require_account(&self, id: AccountId) -> Result<()> {
        if self.exists(CF_ACCOUNTS, id.to_key())? {
            Ok(())
        } else {
            Err(Error::AccountNotFound(id))
        }
    }

    fn put_row<T: Serialize>(&self, cf_name: &str, key: [u8; 8], row: &T) -> Result<()> {
        let cf = self.storage.cf(cf_name)?;
        let value = bincode::serialize(row)?;
        self.txn.put_cf(cf, key, value).map_err(|e| self.classify(e))
    }

    fn put_index(&self, key: Vec<u8>) -> Result<()> {
        let cf = self.storage.cf(CF_INDICES)?;
        self.txn.put_cf(cf, key, b"").map_err(|e| self.classify(e))
    }
}

impl UnitOfWork for RocksUnit<'_> {
    fn get_account_for_update(&mut self, id: AccountId) -> Result<Account> {
        self.check_deadline()?;
        let cf = self.storage.cf(CF_ACCOUNTS)?;
        let value = self
            .txn
            .get_for_update_cf(cf, id.to_key(), true)
            .map_err(|e| self.classify(e))?
            .ok_or(Error::AccountNotFound(id))?;
        Ok(bincode::deserialize(&value)?)
    }

    fn insert_account(&mut self, owner: &str, currency: Currency) -> Result<Account> {
        self.check_deadline()?;
        let account = Account {
            id: AccountId::new(next_id(&self.storage.sequences.account)),
            owner: owner.to_string(),
            balance: 0,
            currency,
            version: 0,
            created_at: Utc::now(),
        };

        self.put_row(CF_ACCOUNTS, account.id.to_key(), &account)?;
        let mut idx = owner_prefix(owner);
        idx.extend_from_slice(&account.id.to_key());
        self.put_index(idx)?;

        tracing::debug!(account_id = %account.id, owner = %owner, "Account inserted");
        Ok(account)
    }

    fn insert_transfer(&mut self, from: AccountId, to: AccountId, amount: i64) -> Result<Transfer> {
        self.check_deadline()?;
        self.require_account(from)?;
        self.require_account(to)?;

        let transfer = Transfer {
            id: TransferId::new(next_id(&self.storage.sequences.transfer)),
            from_account_id: from,
            to_account_id: to,
            amount,
            created_at: Utc::now(),
        };

        self.put_row(CF_TRANSFERS, transfer.id.to_key(), &transfer)?;
        for account in [from, to] {
            let mut idx = account_prefix(IDX_ACCOUNT_TRANSFER, account);
            idx.extend_from_slice(&transfer.id.to_key());
            self.put_index(idx)?;
        }

        tracing::debug!(
            transfer_id = %transfer.id,
            from = %from,
            to = %to,
            amount,
            "Transfer inserted"
        );
        Ok(transfer)
    }

    fn insert_entry(&mut self, account_id: AccountId, amount: i64) -> Result<Entry> {
        self.check_deadline()?;
        self.require_account(account_id)?;

        let entry = Entry {
            id: EntryId::new(next_id(&self.storage.sequences.entry)),
            account_id,
            amount,
            created_at: Utc::now(),
        };

        self.put_row(CF_ENTRIES, entry.id.to_key(), &entry)?;
        let mut idx = account_prefix(IDX_ACCOUNT_ENTRY, account_id);
        idx.extend_from_slice(&entry.id.to_key());
        self.put_index(idx)?;

        tracing::debug!(entry_id = %entry.id, account_id = %account_id, amount, "Entry inserted");
        Ok(entry)
    }

    fn adjust_balance(&mut self, id: AccountId, delta: i64) -> Result<Account> {
        let mut account = self.get_account_for_update(id)?;

        let balance = account.balance.checked_add(delta).ok_or_else(|| {
            Error::ConstraintViolation(format!("balance of account {} would overflow", id))
        })?;
        if balance < 0 && delta < 0 && !self.storage.allow_overdraft {
            return Err(Error::ConstraintViolation(format!(
                "balance of account {} would drop to {}",
                id, balance
            )));
        }

        account.balance = balance;
        account.version += 1;
        self.put_row(CF_ACCOUNTS, id.to_key(), &account)?;

        tracing::debug!(
            account_id = %id,
            delta,
            balance,
            version = account.version,
            "Balance adjusted"
        );
        Ok(account)
    }

    fn commit(self: Box<Self>) -> Result<()> {
        self.check_deadline()?;
        let deadline = self.deadline;
        self.txn.commit().map_err(|e| match Error::from(e) {
            Error::Transient { message, .. } if Instant::now() >= deadline => {
                Error::DeadlineExceeded(message)
            }
            other => other,
        })
    }

    fn rollback(&mut self) -> Result<()> {
        self.txn.rollback().map_err(Error::from)
    }
}

// Index key helpers

fn owner_prefix(owner: &str) -> Vec<u8> {
    // Length prefix keeps "al" from matching "alice"
    let mut key = vec![IDX_OWNER_ACCOUNT];
    key.extend_from_slice(&(owner.len() as u32).to_be_bytes());
    key.extend_from_slice(owner.as_bytes());
    key
}

fn account_prefix(tag: u8, account: AccountId) -> Vec<u8> {
    let mut key = vec![tag];
    key.extend_from_slice(&account.to_key());
    key
}

fn decode_id(bytes: &[u8]) -> Result<i64> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| Error::Storage(format!("malformed id key of {} bytes", bytes.len())))?;
    Ok(i64::from_be_bytes(raw))
}
