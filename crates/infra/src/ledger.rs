//! Stock Ledger Service: the only writer of balances and movements.

use std::thread;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument, warn};

use stockledger_core::MovementId;
use stockledger_inventory::{
    AdjustStock, BalanceSnapshot, CountStock, MovementType, StockBalance, StockKey, StockMovement,
    TransferStock,
};

use crate::catalog::{Catalog, resolve_key};
use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::store::in_memory::StagedRow;
use crate::store::{InMemoryStockStore, UnitOfWork};

/// In-process stock ledger over the in-memory store.
///
/// Mutations take the caller's [`UnitOfWork`] so the stock change commits or
/// rolls back together with the caller's own document update.
pub struct StockLedger<C> {
    store: InMemoryStockStore,
    catalog: C,
    config: LedgerConfig,
}

impl<C: Catalog> StockLedger<C> {
    pub fn new(catalog: C) -> Self {
        Self::with_config(catalog, LedgerConfig::default())
    }

    pub fn with_config(catalog: C, config: LedgerConfig) -> Self {
        Self {
            store: InMemoryStockStore::new(),
            catalog,
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    pub fn store(&self) -> &InMemoryStockStore {
        &self.store
    }

    pub fn begin(&self) -> UnitOfWork<'_> {
        self.store.begin(self.config.lock_timeout)
    }

    /// Run `op` in a fresh unit of work and commit it.
    ///
    /// Concurrency failures retry the whole closure up to `max_retries` times
    /// with linear backoff; any other error is returned at once.
    pub fn transact<T>(
        &self,
        mut op: impl FnMut(&mut UnitOfWork<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut attempt: u32 = 0;
        loop {
            let mut uow = self.begin();
            match op(&mut uow) {
                Ok(value) => {
                    uow.commit();
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_retries => {
                    drop(uow);
                    attempt += 1;
                    let backoff = self.config.retry_backoff * attempt;
                    warn!(
                        attempt,
                        max_retries = self.config.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "retrying stock transaction after concurrency conflict"
                    );
                    thread::sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Apply one signed quantity change and record its movement.
    #[instrument(
        skip(self, uow, cmd),
        fields(
            product_id = %cmd.key.product_id,
            warehouse_id = %cmd.key.warehouse_id,
            location_id = ?cmd.key.location_id,
            qty = %cmd.qty,
            movement_type = %cmd.movement_type
        ),
        err
    )]
    pub fn adjust_stock(
        &self,
        uow: &mut UnitOfWork<'_>,
        cmd: AdjustStock,
    ) -> Result<StockMovement, LedgerError> {
        let key = cmd.key;
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let warehouse = resolve_key(&self.catalog, &key)?;
        uow.belongs_to(&self.store)?;

        let row = uow.lock(key)?;
        post(row, &cmd, warehouse.allow_negative_stock)
    }

    /// Move stock between two keys as a paired `transfer` out/in.
    ///
    /// The destination receives the source's average cost.
    #[instrument(
        skip(self, uow, cmd),
        fields(
            product_id = %cmd.product_id,
            from_warehouse = %cmd.from_warehouse,
            to_warehouse = %cmd.to_warehouse,
            qty = %cmd.qty
        ),
        err
    )]
    pub fn transfer(
        &self,
        uow: &mut UnitOfWork<'_>,
        cmd: TransferStock,
    ) -> Result<(StockMovement, StockMovement), LedgerError> {
        let source = cmd.source();
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(source, e))?;
        let destination = cmd.destination();
        let from = resolve_key(&self.catalog, &source)?;
        let to = resolve_key(&self.catalog, &destination)?;
        uow.belongs_to(&self.store)?;

        uow.lock_all(&[source, destination])?;

        let out_row = uow.lock(source)?;
        let transfer_cost = out_row.balance().avg_cost;
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
        let out = post(out_row, &out_cmd, from.allow_negative_stock)?;

        let in_cmd = AdjustStock {
            key: destination,
            qty: cmd.qty,
            unit_cost: Some(transfer_cost),
            allow_negative_override: false,
            ..out_cmd
        };
        let inbound = post(uow.lock(destination)?, &in_cmd, to.allow_negative_stock)?;
        Ok((out, inbound))
    }

    /// Physical count: post `counted - on_hand` as one `opname` movement.
    ///
    /// Returns `None` when the count matches and nothing was written.
    #[instrument(
        skip(self, uow, cmd),
        fields(
            product_id = %cmd.key.product_id,
            warehouse_id = %cmd.key.warehouse_id,
            location_id = ?cmd.key.location_id,
            counted_qty = %cmd.counted_qty
        ),
        err
    )]
    pub fn count_stock(
        &self,
        uow: &mut UnitOfWork<'_>,
        cmd: CountStock,
    ) -> Result<Option<StockMovement>, LedgerError> {
        let key = cmd.key;
        let cmd = cmd
            .normalized()
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let warehouse = resolve_key(&self.catalog, &key)?;
        uow.belongs_to(&self.store)?;

        let row = uow.lock(key)?;
        let delta = cmd.counted_qty - row.balance().qty_on_hand;
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
        post(row, &adjustment, warehouse.allow_negative_stock).map(Some)
    }

    /// Shift the informational incoming/outgoing projections. No movement.
    #[instrument(skip(self, uow, key), fields(key = %key), err)]
    pub fn update_projections(
        &self,
        uow: &mut UnitOfWork<'_>,
        key: StockKey,
        incoming_delta: Decimal,
        outgoing_delta: Decimal,
    ) -> Result<BalanceSnapshot, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        uow.belongs_to(&self.store)?;
        let row = uow.lock(key)?;
        row.update(|b| b.shift_projections(incoming_delta, outgoing_delta))?;
        Ok(row.balance().snapshot())
    }

    /// Committed balance for `key`; a key never written reads as zero.
    pub fn get_balance(&self, key: StockKey) -> Result<BalanceSnapshot, LedgerError> {
        Ok(self.get_stock_balance(key)?.snapshot())
    }

    /// Committed balances of several keys as one snapshot: a unit of work
    /// touching more than one of them is seen entirely or not at all.
    pub fn get_balances(&self, keys: &[StockKey]) -> Result<Vec<BalanceSnapshot>, LedgerError> {
        for key in keys {
            resolve_key(&self.catalog, key)?;
        }
        Ok(self
            .store
            .committed_balances(keys)
            .into_iter()
            .map(|(key, balance)| balance.unwrap_or_else(|| StockBalance::empty(key)).snapshot())
            .collect())
    }

    /// Full committed balance row, including projections and sequence.
    pub fn get_stock_balance(&self, key: StockKey) -> Result<StockBalance, LedgerError> {
        resolve_key(&self.catalog, &key)?;
        Ok(self
            .store
            .committed_balance(&key)
            .unwrap_or_else(|| StockBalance::empty(key)))
    }
}

/// Decide and stage one movement on a locked row.
pub(crate) fn post(
    row: &mut StagedRow,
    cmd: &AdjustStock,
    negative_allowed: bool,
) -> Result<StockMovement, LedgerError> {
    let movement = row
        .balance()
        .decide_adjustment(cmd, negative_allowed, MovementId::new(), Utc::now())
        .map_err(|e| LedgerError::from_domain(cmd.key, e))?;
    row.record(movement.clone())?;
    log_posted(row.balance(), &movement, negative_allowed);
    Ok(movement)
}

/// Log a movement that was just recorded against `balance`.
pub(crate) fn log_posted(balance: &StockBalance, movement: &StockMovement, negative_allowed: bool) {
    let key = balance.key;
    if movement.balance_after < Decimal::ZERO && !negative_allowed {
        warn!(
            key = %key,
            balance_after = %movement.balance_after,
            "negative stock override used"
        );
    }
    if balance.reservations_uncovered() {
        warn!(
            key = %key,
            qty_reserved = %balance.qty_reserved,
            available = %balance.available_qty(),
            "reservations no longer covered by on-hand stock"
        );
    }
    info!(
        movement_id = %movement.id,
        sequence = movement.sequence,
        balance_before = %movement.balance_before,
        balance_after = %movement.balance_after,
        avg_cost = %movement.avg_cost_after,
        "stock movement recorded"
    );
}
