use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, DomainResult, LocationId, MovementId, ProductId, ValueObject, WarehouseId,
};

use crate::command::AdjustStock;
use crate::costing::next_avg_cost;
use crate::movement::StockMovement;
use crate::quantity::{checked_add, checked_sub};

/// Address of one balance row: product + warehouse (+ optional location).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,
}

impl StockKey {
    pub fn new(
        product_id: ProductId,
        warehouse_id: WarehouseId,
        location_id: Option<LocationId>,
    ) -> Self {
        Self {
            product_id,
            warehouse_id,
            location_id,
        }
    }

    /// Warehouse-level row (no location).
    pub fn warehouse_level(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self::new(product_id, warehouse_id, None)
    }
}

impl ValueObject for StockKey {}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)?;
        if let Some(location) = self.location_id {
            write!(f, "/{location}")?;
        }
        Ok(())
    }
}

/// Current quantity and cost state of one key.
///
/// This is a materialized projection of the key's movements: `qty_on_hand`,
/// `avg_cost` and `last_sequence` always equal a replay of the movement chain.
/// Reservations and the incoming/outgoing projections are not movement-backed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub key: StockKey,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
    pub qty_incoming: Decimal,
    pub qty_outgoing: Decimal,
    pub avg_cost: Decimal,
    /// Sequence of the last applied movement (0 = none yet).
    pub last_sequence: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

/// The read shape returned by balance lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub key: StockKey,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
    pub qty_available: Decimal,
    pub avg_cost: Decimal,
}

impl StockBalance {
    /// Default zero state used on first touch of a key.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            qty_on_hand: Decimal::ZERO,
            qty_reserved: Decimal::ZERO,
            qty_incoming: Decimal::ZERO,
            qty_outgoing: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            last_sequence: 0,
            updated_at: None,
        }
    }

    pub fn available_qty(&self) -> Decimal {
        self.qty_on_hand - self.qty_reserved
    }

    /// Reservations exceed what is physically on hand.
    pub fn reservations_uncovered(&self) -> bool {
        self.qty_reserved > Decimal::ZERO && self.available_qty() < Decimal::ZERO
    }

    pub fn projected_qty(&self) -> Decimal {
        self.qty_on_hand + self.qty_incoming - self.qty_outgoing
    }

    /// Stock value at average cost; negative stock is valued at zero.
    pub fn value(&self) -> Decimal {
        self.qty_on_hand.max(Decimal::ZERO) * self.avg_cost
    }

    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            key: self.key,
            qty_on_hand: self.qty_on_hand,
            qty_reserved: self.qty_reserved,
            qty_available: self.available_qty(),
            avg_cost: self.avg_cost,
        }
    }

    /// Decide the movement for an adjustment (no mutation).
    ///
    /// `negative_allowed` is the warehouse policy; the command's own override
    /// flag is honoured on top of it. The command must already be normalized.
    pub fn decide_adjustment(
        &self,
        cmd: &AdjustStock,
        negative_allowed: bool,
        movement_id: MovementId,
        created_at: DateTime<Utc>,
    ) -> DomainResult<StockMovement> {
        if cmd.key != self.key {
            return Err(DomainError::invariant("adjustment targets a different key"));
        }
        if cmd.qty.is_zero() {
            return Err(DomainError::validation("qty cannot be zero"));
        }

        let balance_before = self.qty_on_hand;
        let balance_after = checked_add(balance_before, cmd.qty)?;

        if balance_after < Decimal::ZERO && !(negative_allowed || cmd.allow_negative_override) {
            return Err(DomainError::insufficient_stock(balance_before, -cmd.qty));
        }

        let unit_cost = if cmd.qty > Decimal::ZERO {
            cmd.unit_cost
        } else {
            None
        };
        let avg_cost_after = next_avg_cost(balance_before, self.avg_cost, cmd.qty, unit_cost)?;

        Ok(StockMovement {
            id: movement_id,
            product_id: self.key.product_id,
            warehouse_id: self.key.warehouse_id,
            location_id: self.key.location_id,
            sequence: self.last_sequence + 1,
            qty: cmd.qty,
            unit_cost,
            balance_before,
            balance_after,
            avg_cost_after,
            movement_type: cmd.movement_type,
            reference: cmd.reference.clone(),
            external_reference: cmd.external_reference.clone(),
            notes: cmd.notes.clone(),
            created_by: cmd.created_by,
            created_at,
        })
    }

    /// Evolve state from a single movement.
    ///
    /// Rejects movements that do not continue this key's chain, so a balance can
    /// only ever be the fold of a contiguous history.
    pub fn apply(&mut self, movement: &StockMovement) -> DomainResult<()> {
        if movement.key() != self.key {
            return Err(DomainError::invariant("movement belongs to a different key"));
        }
        if movement.sequence != self.last_sequence + 1 {
            return Err(DomainError::invariant(format!(
                "movement sequence {} does not follow {}",
                movement.sequence, self.last_sequence
            )));
        }
        if movement.balance_before != self.qty_on_hand {
            return Err(DomainError::invariant(format!(
                "movement balance_before {} does not match on hand {}",
                movement.balance_before, self.qty_on_hand
            )));
        }
        if checked_add(movement.balance_before, movement.qty)? != movement.balance_after {
            return Err(DomainError::invariant(
                "movement balance_after != balance_before + qty",
            ));
        }

        self.qty_on_hand = movement.balance_after;
        self.avg_cost = movement.avg_cost_after;
        self.last_sequence = movement.sequence;
        self.updated_at = Some(movement.created_at);
        Ok(())
    }

    /// Shift the informational incoming/outgoing projections, floored at zero.
    pub fn shift_projections(
        &mut self,
        incoming_delta: Decimal,
        outgoing_delta: Decimal,
    ) -> DomainResult<()> {
        self.qty_incoming = checked_add(self.qty_incoming, incoming_delta)?.max(Decimal::ZERO);
        self.qty_outgoing = checked_add(self.qty_outgoing, outgoing_delta)?.max(Decimal::ZERO);
        Ok(())
    }

    /// Overwrite the movement-backed fields from a replay (repair path only).
    pub fn reset_from_replay(&mut self, qty_on_hand: Decimal, avg_cost: Decimal, last_sequence: u64) {
        self.qty_on_hand = qty_on_hand;
        self.avg_cost = avg_cost;
        self.last_sequence = last_sequence;
    }

    pub(crate) fn sub_reserved(&mut self, qty: Decimal) -> DomainResult<()> {
        self.qty_reserved = checked_sub(self.qty_reserved, qty)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::movement::MovementType;
    use rust_decimal_macros::dec;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new(), None)
    }

    fn adjust(
        balance: &mut StockBalance,
        cmd: AdjustStock,
        negative_allowed: bool,
    ) -> DomainResult<StockMovement> {
        let cmd = cmd.normalized()?;
        let mv = balance.decide_adjustment(&cmd, negative_allowed, MovementId::new(), Utc::now())?;
        balance.apply(&mv)?;
        Ok(mv)
    }

    fn seeded(qty: Decimal, cost: Decimal) -> StockBalance {
        let mut b = StockBalance::empty(key());
        let k = b.key;
        adjust(
            &mut b,
            AdjustStock::new(k, qty, MovementType::PoReceive).with_unit_cost(cost),
            false,
        )
        .unwrap();
        b
    }

    #[test]
    fn receipt_updates_weighted_average() {
        let mut b = seeded(dec!(100), dec!(10));
        let k = b.key;
        let mv = adjust(
            &mut b,
            AdjustStock::new(k, dec!(50), MovementType::PoReceive).with_unit_cost(dec!(16)),
            false,
        )
        .unwrap();

        assert_eq!(b.qty_on_hand, dec!(150));
        assert_eq!(b.avg_cost, dec!(12));
        assert_eq!(mv.balance_before, dec!(100));
        assert_eq!(mv.balance_after, dec!(150));
        assert_eq!(mv.sequence, 2);
    }

    #[test]
    fn decrease_leaves_cost_unchanged() {
        let mut b = seeded(dec!(150), dec!(12));
        let k = b.key;
        adjust(&mut b, AdjustStock::new(k, dec!(-30), MovementType::SoDelivery), false).unwrap();
        assert_eq!(b.qty_on_hand, dec!(120));
        assert_eq!(b.avg_cost, dec!(12));
    }

    #[test]
    fn negative_stock_policy_is_enforced() {
        let mut b = seeded(dec!(5), dec!(1));
        let k = b.key;

        let err = adjust(&mut b, AdjustStock::new(k, dec!(-6), MovementType::SoDelivery), false)
            .unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(dec!(5), dec!(6)));
        assert_eq!(b.qty_on_hand, dec!(5));
        assert_eq!(b.last_sequence, 1);

        adjust(&mut b, AdjustStock::new(k, dec!(-6), MovementType::SoDelivery), true).unwrap();
        assert_eq!(b.qty_on_hand, dec!(-1));
    }

    #[test]
    fn override_flag_permits_single_negative_decrease() {
        let mut b = seeded(dec!(1), dec!(1));
        let k = b.key;
        adjust(
            &mut b,
            AdjustStock::new(k, dec!(-3), MovementType::ProductionOut).allow_negative(),
            false,
        )
        .unwrap();
        assert_eq!(b.qty_on_hand, dec!(-2));
    }

    #[test]
    fn apply_rejects_gaps_in_the_chain() {
        let mut b = StockBalance::empty(key());
        let cmd = AdjustStock::new(b.key, dec!(1), MovementType::Adjustment);
        let mut mv = b
            .decide_adjustment(&cmd, false, MovementId::new(), Utc::now())
            .unwrap();
        mv.sequence = 2;
        assert!(matches!(b.apply(&mv), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn projections_floor_at_zero() {
        let mut b = StockBalance::empty(key());
        b.shift_projections(dec!(10), dec!(4)).unwrap();
        b.shift_projections(dec!(-15), dec!(-1)).unwrap();
        assert_eq!(b.qty_incoming, dec!(0));
        assert_eq!(b.qty_outgoing, dec!(3));
        assert_eq!(b.projected_qty(), dec!(-3));
    }

    #[test]
    fn value_ignores_negative_stock() {
        let mut b = seeded(dec!(4), dec!(2.5));
        assert_eq!(b.value(), dec!(10));
        b.qty_on_hand = dec!(-1);
        assert_eq!(b.value(), dec!(0));
    }

    #[test]
    fn plain_decrease_can_leave_reservations_uncovered() {
        let mut b = seeded(dec!(10), dec!(1));
        assert!(b.try_reserve(dec!(8)).unwrap());
        assert!(!b.reservations_uncovered());

        let k = b.key;
        adjust(&mut b, AdjustStock::new(k, dec!(-5), MovementType::SoDelivery), false).unwrap();
        assert!(b.reservations_uncovered());
        assert!(!StockBalance::empty(k).reservations_uncovered());
    }
}
