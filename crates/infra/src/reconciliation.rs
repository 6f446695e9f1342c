//! Reconciliation: recompute balances from the Movement Log and compare.
//!
//! Drift is reported and logged, never corrected silently. The only write
//! path is the explicit [`StockLedger::repair_balance`].

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use stockledger_core::{ProductId, UserId, WarehouseId};
use stockledger_inventory::{
    ReplayedBalance, StockBalance, StockKey, StockMovement, replay, sum_quantities,
};

use crate::catalog::{Catalog, resolve_key};
use crate::error::{IntegrityIssue, LedgerError};
use crate::ledger::StockLedger;
use crate::store::{InMemoryStockStore, UnitOfWork};

/// Result of a clean `verify_balance`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceCheck {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    /// Balance rows checked (warehouse level plus each location).
    pub rows: usize,
    pub movements: usize,
    pub qty_on_hand: Decimal,
}

/// Outcome of a full sweep. Every row is checked; nothing short-circuits.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub rows_checked: usize,
    pub movements_checked: usize,
    pub issues: Vec<IntegrityIssue>,
}

impl ReconciliationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Compare one stored row against the replay of its chain.
pub fn check_row(
    key: StockKey,
    stored: Option<&StockBalance>,
    movements: &[StockMovement],
) -> Result<ReplayedBalance, IntegrityIssue> {
    let replayed = replay(key, movements).map_err(IntegrityIssue::BrokenChain)?;
    let stored = stored.cloned().unwrap_or_else(|| StockBalance::empty(key));
    if replayed.matches(&stored) {
        Ok(replayed)
    } else {
        Err(IntegrityIssue::BalanceDrift {
            key,
            stored_qty: stored.qty_on_hand,
            recomputed_qty: replayed.qty_on_hand,
            stored_avg_cost: stored.avg_cost,
            recomputed_avg_cost: replayed.avg_cost,
        })
    }
}

impl<C: Catalog> StockLedger<C> {
    /// Sum of every committed movement for the product in the warehouse.
    pub fn recompute_balance(&self, product_id: ProductId, warehouse_id: WarehouseId) -> Decimal {
        let slots = self
            .store()
            .slots_where(|k| k.product_id == product_id && k.warehouse_id == warehouse_id);
        InMemoryStockStore::read_many(&slots, |_, state| sum_quantities(&state.movements))
            .into_iter()
            .sum()
    }

    /// Sum of the committed movements of one key.
    pub fn recompute_balance_at(&self, key: StockKey) -> Decimal {
        sum_quantities(&self.store().committed_movements(&key))
    }

    /// Check every row of the product in the warehouse against its movements.
    #[instrument(skip(self), err)]
    pub fn verify_balance(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<BalanceCheck, LedgerError> {
        let mut check = BalanceCheck {
            product_id,
            warehouse_id,
            rows: 0,
            movements: 0,
            qty_on_hand: Decimal::ZERO,
        };
        let slots = self
            .store()
            .slots_where(|k| k.product_id == product_id && k.warehouse_id == warehouse_id);
        for (key, slot) in slots {
            let verdict = slot.read(|state| {
                check_row(key, state.balance.as_ref(), &state.movements)
                    .map(|replayed| (replayed, state.movements.len()))
            });
            match verdict {
                Ok((replayed, movements)) => {
                    check.rows += 1;
                    check.movements += movements;
                    check.qty_on_hand += replayed.qty_on_hand;
                }
                Err(issue) => {
                    error!(%issue, "stock integrity violation");
                    return Err(LedgerError::IntegrityViolation(issue));
                }
            }
        }
        Ok(check)
    }

    /// Sweep every row and collect all issues.
    #[instrument(skip(self))]
    pub fn verify_all(&self) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();
        for (key, slot) in self.store().slots() {
            let (verdict, movements) = slot.read(|state| {
                (
                    check_row(key, state.balance.as_ref(), &state.movements),
                    state.movements.len(),
                )
            });
            report.rows_checked += 1;
            report.movements_checked += movements;
            if let Err(issue) = verdict {
                error!(%issue, "stock integrity violation");
                report.issues.push(issue);
            }
        }
        info!(
            rows = report.rows_checked,
            movements = report.movements_checked,
            issues = report.issues.len(),
            "reconciliation finished"
        );
        report
    }

    /// Rewrite a row's on-hand quantity and average cost from its movements.
    ///
    /// Adds no movement. A broken chain cannot be repaired this way.
    #[instrument(skip(self, uow, key), fields(key = %key), err)]
    pub fn repair_balance(
        &self,
        uow: &mut UnitOfWork<'_>,
        key: StockKey,
        actor: Option<UserId>,
    ) -> Result<ReplayedBalance, LedgerError> {
        resolve_key(self.catalog(), &key)?;
        uow.belongs_to(self.store())?;
        let row = uow.lock(key)?;
        let replayed = replay(key, &row.chain())
            .map_err(|brk| LedgerError::IntegrityViolation(IntegrityIssue::BrokenChain(brk)))?;
        let before = row.balance().clone();
        if replayed.matches(&before) {
            info!("balance already matches its movements");
            return Ok(replayed);
        }
        row.update(|b| {
            b.reset_from_replay(replayed.qty_on_hand, replayed.avg_cost, replayed.last_sequence);
            Ok(())
        })?;
        warn!(
            actor = ?actor,
            stored_qty = %before.qty_on_hand,
            repaired_qty = %replayed.qty_on_hand,
            stored_avg_cost = %before.avg_cost,
            repaired_avg_cost = %replayed.avg_cost,
            "stock balance repaired from movement log"
        );
        Ok(replayed)
    }
}
