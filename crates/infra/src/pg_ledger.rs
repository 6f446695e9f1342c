//! Postgres-backed Stock Ledger Service.
//!
//! Mutations run inside the caller's `sqlx::Transaction`: the ledger locks
//! and writes rows on that transaction and never commits it, so the stock
//! change and the caller's document update commit or roll back together.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, error, info, instrument, warn};

use stockledger_core::{MovementId, ProductId, UserId, WarehouseId};
use stockledger_inventory::{
    AdjustStock, BalanceSnapshot, CountStock, DocumentRef, MovementType, ReleaseOutcome,
    ReplayedBalance, StockBalance, StockKey, StockMovement, TransferStock, replay, sum_quantities,
};

use crate::catalog::{Catalog, resolve_key};
use crate::config::LedgerConfig;
use crate::error::{IntegrityIssue, LedgerError};
use crate::ledger::log_posted;
use crate::reconciliation::{BalanceCheck, ReconciliationReport, check_row};
use crate::store::postgres::{self as pg, map_sqlx_error};
use crate::store::{DateRange, MovementFilter, MovementPage, Pagination};

pub type PgTx<'c> = Transaction<'c, Postgres>;

#[derive(Clone)]
pub struct PgStockLedger<C> {
    pool: Arc<PgPool>,
    catalog: C,
    config: LedgerConfig,
}

impl<C: Catalog> PgStockLedger<C> {
    pub fn new(pool: PgPool, catalog: C, config: LedgerConfig) -> Self {
        Self {
            pool: Arc::new(pool),
            catalog,
            config,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<PgTx<'static>, LedgerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    #[instrument(
        skip(self, tx, cmd),
        fields(
            product_id = %cmd.key.product_id,
            warehouse_id = %cmd.key.warehouse_id,
            location_id = ?cmd.key.location_id,
            qty = %cmd.qty,
            movement_type = %cmd.movement_type
        ),
        err
    )]
    pub async fn adjust_stock(
        &self,
        tx: &mut PgTx<'_>,
        cmd: AdjustStock,
    ) -> Result<StockMovement, LedgerError> {
        let key = cmd.key;
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let warehouse = resolve_key(&self.catalog, &key)?;

        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        self.post(tx, &mut balance, &cmd, warehouse.allow_negative_stock)
            .await
    }

    #[instrument(
        skip(self, tx, cmd),
        fields(
            product_id = %cmd.product_id,
            from_warehouse = %cmd.from_warehouse,
            to_warehouse = %cmd.to_warehouse,
            qty = %cmd.qty
        ),
        err
    )]
    pub async fn transfer(
        &self,
        tx: &mut PgTx<'_>,
        cmd: TransferStock,
    ) -> Result<(StockMovement, StockMovement), LedgerError> {
        let source = cmd.source();
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(source, e))?;
        let destination = cmd.destination();
        let from = resolve_key(&self.catalog, &source)?;
        let to = resolve_key(&self.catalog, &destination)?;

        // Stable lock order across concurrent transfers.
        let (mut out_balance, mut in_balance) = if source < destination {
            let s = pg::lock_row(&mut **tx, source, self.config.lock_timeout).await?;
            let d = pg::lock_row(&mut **tx, destination, self.config.lock_timeout).await?;
            (s, d)
        } else {
            let d = pg::lock_row(&mut **tx, destination, self.config.lock_timeout).await?;
            let s = pg::lock_row(&mut **tx, source, self.config.lock_timeout).await?;
            (s, d)
        };

        let transfer_cost = out_balance.avg_cost;
        let out_cmd = AdjustStock {
            key: source,
            qty: -cmd.qty,
            unit_cost: None,
            movement_type: MovementType::Transfer,
            reference: cmd.reference.clone(),
            notes: cmd.notes.clone(),
            external_reference: cmd.external_reference.clone(),
            created_by: cmd.created_by,
            allow_negative_override: false,
        };
        let out = self
            .post(tx, &mut out_balance, &out_cmd, from.allow_negative_stock)
            .await?;
        let in_cmd = AdjustStock {
            key: destination,
            qty: cmd.qty,
            unit_cost: Some(transfer_cost),
            ..out_cmd
        };
        let inbound = self
            .post(tx, &mut in_balance, &in_cmd, to.allow_negative_stock)
            .await?;
        Ok((out, inbound))
    }

    #[instrument(skip(self, tx, cmd), fields(key = %cmd.key, counted_qty = %cmd.counted_qty), err)]
    pub async fn count_stock(
        &self,
        tx: &mut PgTx<'_>,
        cmd: CountStock,
    ) -> Result<Option<StockMovement>, LedgerError> {
        let key = cmd.key;
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let warehouse = resolve_key(&self.catalog, &key)?;

        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        let delta = cmd.counted_qty - balance.qty_on_hand;
        if delta.is_zero() {
            debug!("count matches on-hand stock; nothing to post");
            return Ok(None);
        }
        let adjustment = AdjustStock {
            key,
            qty: delta,
            unit_cost: None,
            movement_type: MovementType::Opname,
            reference: cmd.reference,
            notes: cmd.notes,
            external_reference: None,
            created_by: cmd.created_by,
            allow_negative_override: false,
        };
        self.post(tx, &mut balance, &adjustment, warehouse.allow_negative_stock)
            .await
            .map(Some)
    }

    #[instrument(skip(self, tx, key), fields(key = %key), err)]
    pub async fn update_projections(
        &self,
        tx: &mut PgTx<'_>,
        key: StockKey,
        incoming_delta: Decimal,
        outgoing_delta: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        balance
            .shift_projections(incoming_delta, outgoing_delta)
            .map_err(|e| LedgerError::from_domain(key, e))?;
        pg::write_balance(&mut **tx, &balance).await?;
        Ok(balance.snapshot())
    }

    pub async fn reserve(
        &self,
        tx: &mut PgTx<'_>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        qty: Decimal,
    ) -> Result<bool, LedgerError> {
        self.reserve_at(tx, StockKey::warehouse_level(product_id, warehouse_id), qty)
            .await
    }

    #[instrument(skip(self, tx, key), fields(key = %key), err)]
    pub async fn reserve_at(
        &self,
        tx: &mut PgTx<'_>,
        key: StockKey,
        qty: Decimal,
    ) -> Result<bool, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        let reserved = balance
            .try_reserve(qty)
            .map_err(|e| LedgerError::from_domain(key, e))?;
        if reserved {
            pg::write_balance(&mut **tx, &balance).await?;
        } else {
            debug!(
                available = %balance.available_qty(),
                "reservation refused: not enough available stock"
            );
        }
        Ok(reserved)
    }

    pub async fn release_reservation(
        &self,
        tx: &mut PgTx<'_>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        qty: Decimal,
    ) -> Result<ReleaseOutcome, LedgerError> {
        self.release_reservation_at(tx, StockKey::warehouse_level(product_id, warehouse_id), qty)
            .await
    }

    #[instrument(skip(self, tx, key), fields(key = %key), err)]
    pub async fn release_reservation_at(
        &self,
        tx: &mut PgTx<'_>,
        key: StockKey,
        qty: Decimal,
    ) -> Result<ReleaseOutcome, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        let outcome = balance
            .release_reservation(qty)
            .map_err(|e| LedgerError::from_domain(key, e))?;
        if outcome.over_released > Decimal::ZERO {
            warn!(
                requested = %qty,
                released = %outcome.released,
                over_released = %outcome.over_released,
                "reservation over-released; floored at zero"
            );
        }
        pg::write_balance(&mut **tx, &balance).await?;
        Ok(outcome)
    }

    /// Release up to `|qty|` of the reservation and post the decrease under
    /// the same row lock.
    #[instrument(skip(self, tx, cmd), fields(key = %cmd.key, qty = %cmd.qty), err)]
    pub async fn adjust_reserved_stock(
        &self,
        tx: &mut PgTx<'_>,
        cmd: AdjustStock,
    ) -> Result<(StockMovement, ReleaseOutcome), LedgerError> {
        let key = cmd.key;
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(key, e))?;
        if cmd.qty > Decimal::ZERO {
            return Err(LedgerError::validation(
                "reserved consumption must be a decrease",
            ));
        }
        let warehouse = resolve_key(&self.catalog, &key)?;
        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;

        let movement = balance
            .decide_adjustment(&cmd, warehouse.allow_negative_stock, MovementId::new(), Utc::now())
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let outcome = if balance.qty_reserved > Decimal::ZERO {
            balance
                .release_reservation(-cmd.qty)
                .map_err(|e| LedgerError::from_domain(key, e))?
        } else {
            ReleaseOutcome {
                released: Decimal::ZERO,
                over_released: -cmd.qty,
            }
        };
        balance
            .apply(&movement)
            .map_err(|e| LedgerError::from_domain(key, e))?;
        pg::write_balance(&mut **tx, &balance).await?;
        pg::insert_movement(&mut **tx, &movement).await?;
        info!(
            movement_id = %movement.id,
            sequence = movement.sequence,
            released = %outcome.released,
            "reserved stock consumed"
        );
        Ok((movement, outcome))
    }

    /// Committed balance for `key`; a key never written reads as zero.
    pub async fn get_balance(&self, key: StockKey) -> Result<BalanceSnapshot, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        let mut conn = self.acquire().await?;
        let balance = pg::read_balance(&mut conn, key, false).await?;
        Ok(balance
            .unwrap_or_else(|| StockBalance::empty(key))
            .snapshot())
    }

    pub async fn movements_for(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        range: Option<DateRange>,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let range = range.unwrap_or_default();
        let mut conn = self.acquire().await?;
        pg::movements_for(&mut conn, product_id, warehouse_id, range.from, range.to).await
    }

    pub async fn query_movements(
        &self,
        filter: &MovementFilter,
        pagination: Pagination,
    ) -> Result<MovementPage, LedgerError> {
        let mut conn = self.acquire().await?;
        pg::query_movements(&mut conn, filter, pagination).await
    }

    pub async fn movements_by_reference(
        &self,
        reference: &DocumentRef,
    ) -> Result<Vec<StockMovement>, LedgerError> {
        let mut conn = self.acquire().await?;
        pg::movements_by_reference(&mut conn, reference).await
    }

    pub async fn recompute_balance(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<Decimal, LedgerError> {
        let mut conn = self.acquire().await?;
        pg::sum_movements(&mut conn, product_id, warehouse_id).await
    }

    #[instrument(skip(self), err)]
    pub async fn verify_balance(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> Result<BalanceCheck, LedgerError> {
        let mut tx = self.begin().await?;
        let keys = pg::balance_keys(&mut tx, Some((product_id, warehouse_id))).await?;
        let mut check = BalanceCheck {
            product_id,
            warehouse_id,
            rows: 0,
            movements: 0,
            qty_on_hand: Decimal::ZERO,
        };
        for key in keys {
            match self.check_key(&mut tx, key).await? {
                (Ok(replayed), movements) => {
                    check.rows += 1;
                    check.movements += movements;
                    check.qty_on_hand += replayed.qty_on_hand;
                }
                (Err(issue), _) => {
                    error!(%issue, "stock integrity violation");
                    return Err(LedgerError::IntegrityViolation(issue));
                }
            }
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(check)
    }

    /// Sweep every balance row. Each row is checked in its own short
    /// transaction holding a share lock, so writers are only paused per row.
    #[instrument(skip(self), err)]
    pub async fn verify_all(&self) -> Result<ReconciliationReport, LedgerError> {
        let keys = {
            let mut conn = self.acquire().await?;
            pg::balance_keys(&mut conn, None).await?
        };
        let mut report = ReconciliationReport::default();
        for key in keys {
            let mut tx = self.begin().await?;
            let (verdict, movements) = self.check_key(&mut tx, key).await?;
            tx.commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e))?;
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
        Ok(report)
    }

    /// Rewrite a row's on-hand quantity and average cost from its movements.
    #[instrument(skip(self, tx, key), fields(key = %key), err)]
    pub async fn repair_balance(
        &self,
        tx: &mut PgTx<'_>,
        key: StockKey,
        actor: Option<UserId>,
    ) -> Result<ReplayedBalance, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        let mut balance = pg::lock_row(&mut **tx, key, self.config.lock_timeout).await?;
        let chain = pg::load_chain(&mut **tx, key).await?;
        let replayed = replay(key, &chain)
            .map_err(|brk| LedgerError::IntegrityViolation(IntegrityIssue::BrokenChain(brk)))?;
        if replayed.matches(&balance) {
            info!("balance already matches its movements");
            return Ok(replayed);
        }
        let before = balance.clone();
        balance.reset_from_replay(replayed.qty_on_hand, replayed.avg_cost, replayed.last_sequence);
        pg::write_balance(&mut **tx, &balance).await?;
        warn!(
            actor = ?actor,
            stored_qty = %before.qty_on_hand,
            repaired_qty = %replayed.qty_on_hand,
            movement_sum = %sum_quantities(&chain),
            "stock balance repaired from movement log"
        );
        Ok(replayed)
    }

    async fn check_key(
        &self,
        tx: &mut PgTx<'_>,
        key: StockKey,
    ) -> Result<(Result<ReplayedBalance, IntegrityIssue>, usize), LedgerError> {
        let stored = pg::read_balance(&mut **tx, key, true).await?;
        let chain = pg::load_chain(&mut **tx, key).await?;
        Ok((check_row(key, stored.as_ref(), &chain), chain.len()))
    }

    async fn acquire(&self) -> Result<sqlx::pool::PoolConnection<Postgres>, LedgerError> {
        self.pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire_connection", e))
    }

    /// Decide, apply and persist one movement on a row locked by `tx`.
    async fn post(
        &self,
        tx: &mut PgTx<'_>,
        balance: &mut StockBalance,
        cmd: &AdjustStock,
        negative_allowed: bool,
    ) -> Result<StockMovement, LedgerError> {
        let movement = balance
            .decide_adjustment(cmd, negative_allowed, MovementId::new(), Utc::now())
            .map_err(|e| LedgerError::from_domain(cmd.key, e))?;
        balance
            .apply(&movement)
            .map_err(|e| LedgerError::from_domain(cmd.key, e))?;
        pg::write_balance(&mut **tx, balance).await?;
        pg::insert_movement(&mut **tx, &movement).await?;
        log_posted(balance, &movement, negative_allowed);
        Ok(movement)
    }
}
