//! Catalog descriptors the ledger validates against.
//!
//! Products and warehouses are owned by other modules; the ledger only needs
//! the few attributes that gate a stock mutation.

use serde::{Deserialize, Serialize};

use stockledger_core::{LocationId, ProductId, WarehouseId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInfo {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    /// Services and non-inventory items are not stock-managed.
    pub stock_managed: bool,
    pub active: bool,
}

impl ProductInfo {
    pub fn stocked(id: ProductId, sku: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            sku: sku.into(),
            name: name.into(),
            stock_managed: true,
            active: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarehouseKind {
    Warehouse,
    Production,
    Transit,
    Scrap,
    /// Virtual warehouse holding material sent to a subcontractor.
    Subcontract,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseInfo {
    pub id: WarehouseId,
    pub code: String,
    pub name: String,
    pub kind: WarehouseKind,
    pub allow_negative_stock: bool,
    pub active: bool,
    pub locations: Vec<LocationId>,
}

impl WarehouseInfo {
    pub fn new(id: WarehouseId, code: impl Into<String>, kind: WarehouseKind) -> Self {
        let code = code.into();
        Self {
            id,
            name: code.clone(),
            code,
            kind,
            allow_negative_stock: false,
            active: true,
            locations: Vec::new(),
        }
    }

    pub fn allowing_negative_stock(mut self) -> Self {
        self.allow_negative_stock = true;
        self
    }

    pub fn with_location(mut self, location: LocationId) -> Self {
        self.locations.push(location);
        self
    }

    pub fn has_location(&self, location: LocationId) -> bool {
        self.locations.contains(&location)
    }
}
