//! Catalog lookup boundary (products and warehouses owned by other modules).

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{ProductInfo, StockKey, WarehouseInfo};

use crate::error::LedgerError;

/// Read-only view of the product and warehouse master data.
pub trait Catalog: Send + Sync {
    fn product(&self, id: ProductId) -> Option<ProductInfo>;
    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseInfo>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn product(&self, id: ProductId) -> Option<ProductInfo> {
        (**self).product(id)
    }

    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseInfo> {
        (**self).warehouse(id)
    }
}

/// Check that `key` addresses a live, stock-managed product in an active
/// warehouse (and a location of that warehouse). Returns the warehouse.
pub fn resolve_key<C: Catalog + ?Sized>(
    catalog: &C,
    key: &StockKey,
) -> Result<WarehouseInfo, LedgerError> {
    let product = catalog
        .product(key.product_id)
        .ok_or_else(|| LedgerError::validation(format!("unknown product {}", key.product_id)))?;
    if !product.active {
        return Err(LedgerError::validation(format!(
            "product {} is inactive",
            product.sku
        )));
    }
    if !product.stock_managed {
        return Err(LedgerError::validation(format!(
            "product {} is not stock-managed",
            product.sku
        )));
    }

    let warehouse = catalog.warehouse(key.warehouse_id).ok_or_else(|| {
        LedgerError::validation(format!("unknown warehouse {}", key.warehouse_id))
    })?;
    if !warehouse.active {
        return Err(LedgerError::validation(format!(
            "warehouse {} is inactive",
            warehouse.code
        )));
    }
    if let Some(location) = key.location_id {
        if !warehouse.has_location(location) {
            return Err(LedgerError::validation(format!(
                "location {location} does not belong to warehouse {}",
                warehouse.code
            )));
        }
    }
    Ok(warehouse)
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<ProductId, ProductInfo>>,
    warehouses: RwLock<HashMap<WarehouseId, WarehouseInfo>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_product(&self, product: ProductInfo) {
        self.products.write().insert(product.id, product);
    }

    pub fn upsert_warehouse(&self, warehouse: WarehouseInfo) {
        self.warehouses.write().insert(warehouse.id, warehouse);
    }
}

impl Catalog for InMemoryCatalog {
    fn product(&self, id: ProductId) -> Option<ProductInfo> {
        self.products.read().get(&id).cloned()
    }

    fn warehouse(&self, id: WarehouseId) -> Option<WarehouseInfo> {
        self.warehouses.read().get(&id).cloned()
    }
}
