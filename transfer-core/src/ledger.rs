//! Main ledger orchestration layer
//!
//! This module ties together storage, the transfer engine and the retry
//! policy into the async API used by request handlers.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use transfer_core::{Config, Currency, Ledger};
//!
//! #[tokio::main]
//! async fn main() -> transfer_core::Result<()> {
//!     let ledger = Ledger::open(Config::default()).await?;
//!
//!     let x = ledger.create_account("xavier", Currency::USD, 100).await?;
//!     let y = ledger.create_account("yolanda", Currency::USD, 50).await?;
//!
//!     let outcome = ledger
//!         .execute_transfer(x.id, y.id, 10, Duration::from_secs(5))
//!         .await?;
//!     assert_eq!(outcome.from_account_new_balance, 90);
//!
//!     Ok(())
//! }
//! ```

use crate::{
    coordinator::{deadline_after, TxCoordinator},
    engine::TransferEngine,
    metrics::Metrics,
    retry::RetryPolicy,
    storage::Storage,
    store::RowStore,
    types::{
        Account, AccountId, Currency, Entry, EntryId, Page, Transfer, TransferId,
        TransferOutcome, TransferRequest, TransferResult,
    },
    Config, Error, Result,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main ledger interface
pub struct Ledger {
    /// Transfer engine (owns the coordinator)
    engine: TransferEngine,

    /// Store for committed reads
    store: Arc<dyn RowStore>,

    /// Retry policy for transfers
    retry: RetryPolicy,

    /// Prometheus metrics
    metrics: Metrics,

    /// Configuration
    config: Config,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("retry", &self.retry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Open ledger on RocksDB with configuration
    pub async fn open(config: Config) -> Result<Self> {
        let storage = Arc::new(Storage::open(&config)?);
        Self::with_store(storage, config)
    }

    /// Build a ledger over any row store
    pub fn with_store(store: Arc<dyn RowStore>, config: Config) -> Result<Self> {
        let metrics = Metrics::new()
            .map_err(|e| Error::Config(format!("Failed to register metrics: {}", e)))?;

        Ok(Self {
            engine: TransferEngine::new(TxCoordinator::new(store.clone())),
            store,
            retry: RetryPolicy::new(config.retry.clone()),
            metrics,
            config,
        })
    }

    /// Metrics collected by this ledger
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Create an account, optionally funded by an opening entry
    pub async fn create_account(
        &self,
        owner: &str,
        currency: Currency,
        opening_balance: i64,
    ) -> Result<Account> {
        if owner.trim().is_empty() {
            return Err(Error::InvalidRequest("owner must not be empty".to_string()));
        }

        let coordinator = self.engine.coordinator().clone();
        let owner = owner.to_string();
        let timeout = self.config.transaction.default_timeout();

        let account = tokio::task::spawn_blocking(move || {
            coordinator.run_atomic_within(timeout, |unit| {
                let account = unit.insert_account(&owner, currency)?;
                if opening_balance == 0 {
                    return Ok(account);
                }
                unit.insert_entry(account.id, opening_balance)?;
                unit.adjust_balance(account.id, opening_balance)
            })
        })
        .await
        .map_err(|e| Error::Concurrency(format!("account task failed: {}", e)))??;

        tracing::info!(
            account_id = %account.id,
            owner = %account.owner,
            currency = %account.currency,
            balance = account.balance,
            "Account created"
        );
        Ok(account)
    }

    /// Get account by ID
    pub fn get_account(&self, id: AccountId) -> Result<Account> {
        self.store.get_account(id)
    }

    /// Accounts of one owner
    pub fn list_accounts(&self, owner: &str, page: Page) -> Result<Vec<Account>> {
        self.store.list_accounts(owner, page)
    }

    /// Get entry by ID
    pub fn get_entry(&self, id: EntryId) -> Result<Entry> {
        self.store.get_entry(id)
    }

    /// Entries posted against an account
    pub fn list_entries(&self, account_id: AccountId, page: Page) -> Result<Vec<Entry>> {
        self.store.list_entries(account_id, page)
    }

    /// Get transfer by ID
    pub fn get_transfer(&self, id: TransferId) -> Result<Transfer> {
        self.store.get_transfer(id)
    }

    /// Transfers debiting or crediting an account
    pub fn list_transfers(&self, account_id: AccountId, page: Page) -> Result<Vec<Transfer>> {
        self.store.list_transfers(account_id, page)
    }

    /// Move `amount` from `from` to `to`, retrying transient store failures.
    ///
    /// `timeout` bounds the whole call, every attempt included. Dropping the
    /// returned future does not stop an attempt already running; that attempt
    /// still commits or rolls back before the deadline.
    pub async fn execute_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        timeout: Duration,
    ) -> Result<TransferOutcome> {
        self.run_transfer(from, to, amount, timeout)
            .await
            .map(|result| result.outcome())
    }

    /// Validate a request the way the API layer does, then run the transfer
    pub async fn transfer(
        &self,
        request: TransferRequest,
        timeout: Duration,
    ) -> Result<TransferResult> {
        if request.amount <= 0 {
            return Err(Error::InvalidRequest(format!(
                "amount must be positive, got {}",
                request.amount
            )));
        }
        if request.from_account_id == request.to_account_id {
            return Err(Error::InvalidRequest(
                "source and target account cannot be the same".to_string(),
            ));
        }

        let from_account = self.valid_account(request.from_account_id, request.currency)?;
        self.valid_account(request.to_account_id, request.currency)?;

        if let Some(requested_by) = &request.requested_by {
            if from_account.owner != *requested_by {
                return Err(Error::Unauthorized {
                    account: from_account.id,
                    requested_by: requested_by.clone(),
                });
            }
        }

        self.run_transfer(
            request.from_account_id,
            request.to_account_id,
            request.amount,
            timeout,
        )
        .await
    }

    /// Check that an account's balance equals the sum of its entries.
    ///
    /// Reads committed rows one by one, so only meaningful while no transfer
    /// touches the account.
    pub fn verify_account_balance(&self, id: AccountId) -> Result<bool> {
        let entries = self.store.list_entries(id, Page::new(usize::MAX, 0))?;
        let account = self.store.get_account(id)?;

        let posted = entries
            .iter()
            .try_fold(0i64, |sum, entry| sum.checked_add(entry.amount))
            .ok_or_else(|| {
                Error::ConstraintViolation(format!("entries of account {} overflow", id))
            })?;

        if posted != account.balance {
            tracing::error!(
                account_id = %id,
                balance = account.balance,
                posted,
                "Balance does not match entries"
            );
        }
        Ok(posted == account.balance)
    }

    fn valid_account(&self, id: AccountId, currency: Currency) -> Result<Account> {
        let account = self.store.get_account(id)?;
        if account.currency != currency {
            return Err(Error::CurrencyMismatch {
                account: id,
                expected: currency,
                actual: account.currency,
            });
        }
        Ok(account)
    }

    async fn run_transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        timeout: Duration,
    ) -> Result<TransferResult> {
        let started = Instant::now();
        let deadline = deadline_after(timeout);
        let attempts = AtomicU32::new(0);

        let result = self
            .retry
            .execute("transfer", deadline, |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                let engine = self.engine.clone();
                async move {
                    tokio::task::spawn_blocking(move || engine.execute(from, to, amount, deadline))
                        .await
                        .map_err(|e| Error::Concurrency(format!("transfer task failed: {}", e)))?
                }
            })
            .await;

        self.metrics.record_transfer(
            result.is_ok(),
            attempts.load(Ordering::Relaxed),
            started.elapsed().as_secs_f64(),
        );

        result
    }
}
