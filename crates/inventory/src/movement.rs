use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{
    DomainError, LocationId, MovementId, ProductId, UserId, ValueObject, WarehouseId,
};

use crate::balance::StockKey;

/// Kind of business event behind a movement.
///
/// The serialized names are persisted and must stay stable.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Adjustment,
    PoReceive,
    SoDelivery,
    ProductionIn,
    ProductionOut,
    Transfer,
    Opname,
    PurchaseReturn,
    SalesReturn,
    Correction,
}

impl MovementType {
    pub const ALL: [MovementType; 10] = [
        MovementType::Adjustment,
        MovementType::PoReceive,
        MovementType::SoDelivery,
        MovementType::ProductionIn,
        MovementType::ProductionOut,
        MovementType::Transfer,
        MovementType::Opname,
        MovementType::PurchaseReturn,
        MovementType::SalesReturn,
        MovementType::Correction,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Adjustment => "adjustment",
            MovementType::PoReceive => "po_receive",
            MovementType::SoDelivery => "so_delivery",
            MovementType::ProductionIn => "production_in",
            MovementType::ProductionOut => "production_out",
            MovementType::Transfer => "transfer",
            MovementType::Opname => "opname",
            MovementType::PurchaseReturn => "purchase_return",
            MovementType::SalesReturn => "sales_return",
            MovementType::Correction => "correction",
        }
    }

    /// Increases of these types are valued receipts and must carry a unit cost.
    ///
    /// Other increases (returns, count corrections) leave the average cost as is.
    pub fn requires_unit_cost_on_increase(self) -> bool {
        matches!(
            self,
            MovementType::PoReceive | MovementType::ProductionIn | MovementType::Transfer
        )
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Closed set of documents that can cause a movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    GoodsReceipt,
    DeliveryOrder,
    WorkOrder,
    MaterialConsumption,
    SubcontractOrder,
    PurchaseReturn,
    SalesReturn,
    StockAdjustment,
    StockOpname,
    StockTransfer,
    Manual,
}

impl DocumentKind {
    pub const ALL: [DocumentKind; 11] = [
        DocumentKind::GoodsReceipt,
        DocumentKind::DeliveryOrder,
        DocumentKind::WorkOrder,
        DocumentKind::MaterialConsumption,
        DocumentKind::SubcontractOrder,
        DocumentKind::PurchaseReturn,
        DocumentKind::SalesReturn,
        DocumentKind::StockAdjustment,
        DocumentKind::StockOpname,
        DocumentKind::StockTransfer,
        DocumentKind::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::GoodsReceipt => "goods_receipt",
            DocumentKind::DeliveryOrder => "delivery_order",
            DocumentKind::WorkOrder => "work_order",
            DocumentKind::MaterialConsumption => "material_consumption",
            DocumentKind::SubcontractOrder => "subcontract_order",
            DocumentKind::PurchaseReturn => "purchase_return",
            DocumentKind::SalesReturn => "sales_return",
            DocumentKind::StockAdjustment => "stock_adjustment",
            DocumentKind::StockOpname => "stock_opname",
            DocumentKind::StockTransfer => "stock_transfer",
            DocumentKind::Manual => "manual",
        }
    }
}

impl FromStr for DocumentKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown document kind '{s}'")))
    }
}

/// Reference to the source document of a movement, e.g. `goods_receipt#123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub kind: DocumentKind,
    pub id: String,
}

impl DocumentRef {
    pub fn new(kind: DocumentKind, id: impl Into<String>) -> Self {
        Self { kind, id: id.into() }
    }
}

impl ValueObject for DocumentRef {}

impl core::fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}#{}", self.kind.as_str(), self.id)
    }
}

/// One immutable ledger entry.
///
/// `balance_after == balance_before + qty` always holds. Movements are never
/// updated or deleted; a mistake is fixed by posting a `correction`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
    pub location_id: Option<LocationId>,

    /// 1-based position in the key's chain, contiguous per key.
    pub sequence: u64,

    /// Signed: positive increases stock, negative decreases it.
    pub qty: Decimal,
    /// Unit cost supplied with an increase, if any.
    pub unit_cost: Option<Decimal>,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    /// Average cost of the key once this movement was applied.
    pub avg_cost_after: Decimal,

    pub movement_type: MovementType,
    pub reference: Option<DocumentRef>,
    pub external_reference: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    pub fn key(&self) -> StockKey {
        StockKey {
            product_id: self.product_id,
            warehouse_id: self.warehouse_id,
            location_id: self.location_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        let wire: Vec<String> = MovementType::ALL
            .iter()
            .map(|t| serde_json::to_value(t).unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            wire,
            vec![
                "adjustment",
                "po_receive",
                "so_delivery",
                "production_in",
                "production_out",
                "transfer",
                "opname",
                "purchase_return",
                "sales_return",
                "correction",
            ]
        );
        for t in MovementType::ALL {
            assert_eq!(serde_json::to_value(t).unwrap(), t.as_str());
            assert_eq!(t.as_str().parse::<MovementType>().unwrap(), t);
        }
    }

    #[test]
    fn unknown_movement_type_is_rejected() {
        assert!(matches!(
            "teleport".parse::<MovementType>(),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn only_valued_receipts_require_cost() {
        let valued: Vec<_> = MovementType::ALL
            .into_iter()
            .filter(|t| t.requires_unit_cost_on_increase())
            .collect();
        assert_eq!(
            valued,
            vec![
                MovementType::PoReceive,
                MovementType::ProductionIn,
                MovementType::Transfer
            ]
        );
    }

    #[test]
    fn document_ref_displays_kind_and_id() {
        let r = DocumentRef::new(DocumentKind::GoodsReceipt, "123");
        assert_eq!(r.to_string(), "goods_receipt#123");
        for k in DocumentKind::ALL {
            assert_eq!(k.as_str().parse::<DocumentKind>().unwrap(), k);
        }
    }
}
