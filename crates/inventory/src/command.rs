use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, DomainResult, LocationId, ProductId, UserId, WarehouseId};

use crate::balance::StockKey;
use crate::movement::{DocumentRef, MovementType};
use crate::quantity::round_qty;

/// Command: AdjustStock.
///
/// One signed quantity change against one balance row. Built with
/// [`AdjustStock::new`] and the `with_*` helpers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub key: StockKey,
    pub qty: Decimal,
    pub unit_cost: Option<Decimal>,
    pub movement_type: MovementType,
    pub reference: Option<DocumentRef>,
    pub notes: Option<String>,
    pub external_reference: Option<String>,
    pub created_by: Option<UserId>,
    /// Let this one decrease go below zero even where the warehouse forbids it.
    pub allow_negative_override: bool,
}

impl AdjustStock {
    pub fn new(key: StockKey, qty: Decimal, movement_type: MovementType) -> Self {
        Self {
            key,
            qty,
            unit_cost: None,
            movement_type,
            reference: None,
            notes: None,
            external_reference: None,
            created_by: None,
            allow_negative_override: false,
        }
    }

    pub fn with_unit_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_reference(mut self, reference: DocumentRef) -> Self {
        self.reference = Some(reference);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_external_reference(mut self, external_reference: impl Into<String>) -> Self {
        self.external_reference = Some(external_reference.into());
        self
    }

    pub fn created_by(mut self, user: UserId) -> Self {
        self.created_by = Some(user);
        self
    }

    pub fn allow_negative(mut self) -> Self {
        self.allow_negative_override = true;
        self
    }

    /// Validate shape and normalise the quantity to the ledger's scale.
    ///
    /// Catalog checks (product/warehouse existence) happen in the service.
    pub fn normalized(mut self) -> DomainResult<Self> {
        self.qty = round_qty(self.qty);
        if self.qty.is_zero() {
            return Err(DomainError::validation("qty cannot be zero"));
        }
        if let Some(cost) = self.unit_cost {
            if cost < Decimal::ZERO {
                return Err(DomainError::validation("unit cost cannot be negative"));
            }
        }
        if self.qty > Decimal::ZERO
            && self.unit_cost.is_none()
            && self.movement_type.requires_unit_cost_on_increase()
        {
            return Err(DomainError::validation(format!(
                "unit cost is required for {} increases",
                self.movement_type
            )));
        }
        Ok(self)
    }
}

/// Command: TransferStock (paired out/in movements of type `transfer`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub product_id: ProductId,
    pub from_warehouse: WarehouseId,
    pub from_location: Option<LocationId>,
    pub to_warehouse: WarehouseId,
    pub to_location: Option<LocationId>,
    pub qty: Decimal,
    pub reference: Option<DocumentRef>,
    pub notes: Option<String>,
    pub external_reference: Option<String>,
    pub created_by: Option<UserId>,
}

impl TransferStock {
    pub fn source(&self) -> StockKey {
        StockKey::new(self.product_id, self.from_warehouse, self.from_location)
    }

    pub fn destination(&self) -> StockKey {
        StockKey::new(self.product_id, self.to_warehouse, self.to_location)
    }

    pub fn normalized(mut self) -> DomainResult<Self> {
        self.qty = round_qty(self.qty);
        if self.qty <= Decimal::ZERO {
            return Err(DomainError::validation("transfer qty must be positive"));
        }
        if self.source() == self.destination() {
            return Err(DomainError::validation(
                "transfer source and destination must differ",
            ));
        }
        Ok(self)
    }
}

/// Command: CountStock (physical count / opname).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountStock {
    pub key: StockKey,
    pub counted_qty: Decimal,
    pub reference: Option<DocumentRef>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
}

impl CountStock {
    pub fn normalized(mut self) -> DomainResult<Self> {
        self.counted_qty = round_qty(self.counted_qty);
        if self.counted_qty < Decimal::ZERO {
            return Err(DomainError::validation("counted qty cannot be negative"));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new(), None)
    }

    #[test]
    fn zero_qty_is_rejected() {
        let err = AdjustStock::new(key(), dec!(0), MovementType::Adjustment)
            .normalized()
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn qty_that_rounds_to_zero_is_rejected() {
        let err = AdjustStock::new(key(), dec!(0.00001), MovementType::Adjustment)
            .normalized()
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn valued_receipt_needs_cost() {
        let err = AdjustStock::new(key(), dec!(5), MovementType::PoReceive)
            .normalized()
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // A delivery is a decrease; no cost needed.
        assert!(
            AdjustStock::new(key(), dec!(-5), MovementType::SoDelivery)
                .normalized()
                .is_ok()
        );
        // A sales return may come back without a cost.
        assert!(
            AdjustStock::new(key(), dec!(5), MovementType::SalesReturn)
                .normalized()
                .is_ok()
        );
    }

    #[test]
    fn transfer_to_same_key_is_rejected() {
        let product_id = ProductId::new();
        let wh = WarehouseId::new();
        let cmd = TransferStock {
            product_id,
            from_warehouse: wh,
            from_location: None,
            to_warehouse: wh,
            to_location: None,
            qty: dec!(1),
            reference: None,
            notes: None,
            external_reference: None,
            created_by: None,
        };
        assert!(matches!(cmd.normalized(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn negative_count_is_rejected() {
        let cmd = CountStock {
            key: key(),
            counted_qty: dec!(-1),
            reference: None,
            notes: None,
            created_by: None,
        };
        assert!(matches!(cmd.normalized(), Err(DomainError::Validation(_))));
    }
}
