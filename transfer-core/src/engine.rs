//! Transfer engine
//!
//! Moves funds between two accounts as one atomic unit:
//!
//! 1. insert the transfer row
//! 2. insert the debit entry (`-amount` on `from`)
//! 3. insert the credit entry (`+amount` on `to`)
//! 4. adjust both balances in lock order
//! 5. commit
//!
//! # Lock order
//!
//! Account rows are always locked in ascending [`AccountId`] order, whoever
//! pays. Two transfers touching `{X, Y}` therefore both wait on `X` before
//! `Y`, and no cycle of waiters can form. Every operation that adjusts more
//! than one account must go through [`adjust_in_lock_order`].

use crate::{
    coordinator::{deadline_after, TxCoordinator},
    error::{Error, Result, TransferStep},
    store::UnitOfWork,
    types::{Account, AccountId, TransferResult},
};
use std::time::{Duration, Instant};

/// Sort balance adjustments into lock-acquisition order
pub fn lock_order(adjustments: &[(AccountId, i64)]) -> Vec<(AccountId, i64)> {
    let mut ordered = adjustments.to_vec();
    ordered.sort_by_key(|(id, _)| *id);
    ordered
}

/// Apply signed deltas in lock order; accounts come back in input order.
///
/// Account ids must be distinct.
pub fn adjust_in_lock_order(
    unit: &mut (dyn UnitOfWork + '_),
    adjustments: &[(AccountId, i64)],
) -> Result<Vec<Account>> {
    debug_assert!(
        {
            let ordered = lock_order(adjustments);
            ordered.windows(2).all(|w| w[0].0 != w[1].0)
        },
        "duplicate account in adjustment set"
    );

    let mut adjusted: Vec<Option<Account>> = vec![None; adjustments.len()];
    let mut positions: Vec<usize> = (0..adjustments.len()).collect();
    positions.sort_by_key(|&i| adjustments[i].0);

    for i in positions {
        let (id, delta) = adjustments[i];
        let account = unit
            .adjust_balance(id, delta)
            .map_err(|e| e.at_step(TransferStep::AdjustBalance(id)))?;
        adjusted[i] = Some(account);
    }

    Ok(adjusted.into_iter().flatten().collect())
}

/// Executes two-party transfers
#[derive(Debug, Clone)]
pub struct TransferEngine {
    coordinator: TxCoordinator,
}

impl TransferEngine {
    /// Create an engine on top of a coordinator
    pub fn new(coordinator: TxCoordinator) -> Self {
        Self { coordinator }
    }

    /// Coordinator used for every unit
    pub fn coordinator(&self) -> &TxCoordinator {
        &self.coordinator
    }

    /// Execute a transfer bounded by `timeout` from now
    pub fn execute_within(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        timeout: Duration,
    ) -> Result<TransferResult> {
        self.execute(from, to, amount, deadline_after(timeout))
    }

    /// Execute a transfer as one atomic unit.
    ///
    /// Blocks on row locks of accounts held by concurrent transfers; call from
    /// a blocking context.
    pub fn execute(
        &self,
        from: AccountId,
        to: AccountId,
        amount: i64,
        deadline: Instant,
    ) -> Result<TransferResult> {
        if amount <= 0 {
            return Err(Error::InvalidRequest(format!(
                "amount must be positive, got {}",
                amount
            )));
        }
        if from == to {
            return Err(Error::InvalidRequest(format!(
                "cannot transfer from account {} to itself",
                from
            )));
        }

        let result = self.coordinator.run_atomic(deadline, |unit| {
            let transfer = unit
                .insert_transfer(from, to, amount)
                .map_err(|e| e.at_step(TransferStep::InsertTransfer))?;

            let from_entry = unit
                .insert_entry(from, -amount)
                .map_err(|e| e.at_step(TransferStep::InsertFromEntry))?;

            let to_entry = unit
                .insert_entry(to, amount)
                .map_err(|e| e.at_step(TransferStep::InsertToEntry))?;

            let adjusted = adjust_in_lock_order(unit, &[(from, -amount), (to, amount)])?;
            let [from_account, to_account]: [Account; 2] = adjusted
                .try_into()
                .map_err(|_| Error::Storage("balance adjustment lost an account".to_string()))?;

            Ok(TransferResult {
                transfer,
                from_entry,
                to_entry,
                from_account,
                to_account,
            })
        })?;

        tracing::info!(
            transfer_id = %result.transfer.id,
            from = %from,
            to = %to,
            amount,
            from_balance = result.from_account.balance,
            to_balance = result.to_account.balance,
            "Transfer committed"
        );

        Ok(result)
    }
}
