//! Reservation Manager: soft holds on available stock.
//!
//! A reservation never writes a movement. Plain `reserve` + `adjust_stock` is
//! not atomic across the two calls; callers that need the consumption checked
//! against the reservation under one lock use `adjust_reserved_stock`.

use rust_decimal::Decimal;
use tracing::{debug, instrument, warn};

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{AdjustStock, ReleaseOutcome, StockKey, StockMovement};

use crate::catalog::{Catalog, resolve_key};
use crate::error::LedgerError;
use crate::ledger::{StockLedger, post};
use crate::store::UnitOfWork;

impl<C: Catalog> StockLedger<C> {
    /// Reserve on the warehouse-level row. `Ok(false)` means not enough is
    /// available, which is a normal business outcome.
    pub fn reserve(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        qty: Decimal,
    ) -> Result<bool, LedgerError> {
        self.reserve_at(uow, StockKey::warehouse_level(product_id, warehouse_id), qty)
    }

    #[instrument(skip(self, uow, key), fields(key = %key), err)]
    pub fn reserve_at(
        &self,
        uow: &mut UnitOfWork<'_>,
        key: StockKey,
        qty: Decimal,
    ) -> Result<bool, LedgerError> {
        resolve_key(self.catalog(), &key)?;
        uow.belongs_to(self.store())?;
        let row = uow.lock(key)?;
        let reserved = row.update(|b| b.try_reserve(qty))?;
        if reserved {
            debug!(qty_reserved = %row.balance().qty_reserved, "stock reserved");
        } else {
            debug!(
                available = %row.balance().available_qty(),
                "reservation refused: not enough available stock"
            );
        }
        Ok(reserved)
    }

    /// Release on the warehouse-level row; floors at zero.
    pub fn release_reservation(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        qty: Decimal,
    ) -> Result<ReleaseOutcome, LedgerError> {
        self.release_reservation_at(uow, StockKey::warehouse_level(product_id, warehouse_id), qty)
    }

    #[instrument(skip(self, uow, key), fields(key = %key), err)]
    pub fn release_reservation_at(
        &self,
        uow: &mut UnitOfWork<'_>,
        key: StockKey,
        qty: Decimal,
    ) -> Result<ReleaseOutcome, LedgerError> {
        resolve_key(self.catalog(), &key)?;
        uow.belongs_to(self.store())?;
        let row = uow.lock(key)?;
        let outcome = row.update(|b| b.release_reservation(qty))?;
        if outcome.over_released > Decimal::ZERO {
            warn!(
                requested = %qty,
                released = %outcome.released,
                over_released = %outcome.over_released,
                "reservation over-released; floored at zero"
            );
        }
        Ok(outcome)
    }

    /// Consume reserved stock: release up to `|qty|` of the reservation and
    /// post the decrease under the same row lock.
    #[instrument(
        skip(self, uow, cmd),
        fields(key = %cmd.key, qty = %cmd.qty, movement_type = %cmd.movement_type),
        err
    )]
    pub fn adjust_reserved_stock(
        &self,
        uow: &mut UnitOfWork<'_>,
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
        let warehouse = resolve_key(self.catalog(), &key)?;
        uow.belongs_to(self.store())?;

        let row = uow.lock(key)?;
        let consumed = -cmd.qty;
        // Check the decrease first so a refused decrease keeps the reservation.
        row.balance()
            .decide_adjustment(
                &cmd,
                warehouse.allow_negative_stock,
                stockledger_core::MovementId::new(),
                chrono::Utc::now(),
            )
            .map_err(|e| LedgerError::from_domain(key, e))?;
        let outcome = if row.balance().qty_reserved > Decimal::ZERO {
            row.update(|b| b.release_reservation(consumed))?
        } else {
            ReleaseOutcome {
                released: Decimal::ZERO,
                over_released: consumed,
            }
        };
        let movement = post(row, &cmd, warehouse.allow_negative_stock)?;
        debug!(released = %outcome.released, "reservation consumed");
        Ok((movement, outcome))
    }
}
