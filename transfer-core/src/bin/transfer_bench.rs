//! Transfer load binary
//!
//! Opens a ledger, funds two accounts and fires concurrent transfers in both
//! directions between them, then checks that no money was created or lost.
//!
//! Usage: `transfer-bench [config.toml]`. Without a path the configuration
//! comes from `TRANSFER_*` environment variables. `TRANSFER_BENCH_TRANSFERS`
//! sets the number of concurrent transfers (default 10).

use anyhow::{ensure, Context};
use std::sync::Arc;
use std::time::Instant;
use transfer_core::{Config, Currency, Ledger};

const OPENING_BALANCE: i64 = 1_000;
const AMOUNT: i64 = 10;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path).with_context(|| format!("loading {}", path))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.logging.json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let transfers: usize = match std::env::var("TRANSFER_BENCH_TRANSFERS") {
        Ok(raw) => raw
            .parse()
            .with_context(|| format!("TRANSFER_BENCH_TRANSFERS={}", raw))?,
        Err(_) => 10,
    };

    tracing::info!(
        service = %config.service_name,
        data_dir = %config.data_dir.display(),
        transfers,
        "Starting transfer bench"
    );

    let timeout = config.transaction.default_timeout();
    let ledger = Arc::new(Ledger::open(config).await?);

    let a = ledger.create_account("bench-a", Currency::USD, OPENING_BALANCE).await?;
    let b = ledger.create_account("bench-b", Currency::USD, OPENING_BALANCE).await?;

    let started = Instant::now();
    let mut handles = Vec::with_capacity(transfers);
    for i in 0..transfers {
        let ledger = ledger.clone();
        let (from, to) = if i % 2 == 0 { (a.id, b.id) } else { (b.id, a.id) };
        handles.push(tokio::spawn(async move {
            ledger.execute_transfer(from, to, AMOUNT, timeout).await
        }));
    }

    let mut committed = 0usize;
    let mut failed = 0usize;
    for handle in handles {
        match handle.await? {
            Ok(_) => committed += 1,
            Err(e) => {
                failed += 1;
                tracing::warn!(error = %e, kind = ?e.kind(), "Transfer failed");
            }
        }
    }
    let elapsed = started.elapsed();

    let a_balance = ledger.get_account(a.id)?.balance;
    let b_balance = ledger.get_account(b.id)?.balance;

    ensure!(
        a_balance + b_balance == 2 * OPENING_BALANCE,
        "money not conserved: {} + {} != {}",
        a_balance,
        b_balance,
        2 * OPENING_BALANCE
    );
    ensure!(
        ledger.verify_account_balance(a.id)? && ledger.verify_account_balance(b.id)?,
        "balances do not match posted entries"
    );

    let metrics = ledger.metrics();
    let report = serde_json::json!({
        "transfers": transfers,
        "committed": committed,
        "failed": failed,
        "retries": metrics.transfer_retries_total.get(),
        "elapsed_ms": elapsed.as_millis() as u64,
        "accounts": [
            { "id": a.id, "balance": a_balance },
            { "id": b.id, "balance": b_balance },
        ],
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    tracing::info!(committed, failed, "Transfer bench finished");
    Ok(())
}
