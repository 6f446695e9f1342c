//! Read models over committed balances: warehouse valuation and per-product
//! stock summaries.

use rust_decimal::Decimal;
use serde::Serialize;

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::BalanceSnapshot;

use crate::catalog::Catalog;
use crate::ledger::StockLedger;
use crate::store::InMemoryStockStore;

/// Stock value of one warehouse at average cost.
///
/// Rows with negative stock count towards `negative_rows` and contribute
/// no value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WarehouseValuation {
    pub warehouse_id: WarehouseId,
    pub rows: usize,
    pub valued_rows: usize,
    pub negative_rows: usize,
    pub total_qty: Decimal,
    pub total_value: Decimal,
}

/// On-hand, reserved and available quantity of a product across warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductStockSummary {
    pub product_id: ProductId,
    pub qty_on_hand: Decimal,
    pub qty_reserved: Decimal,
    pub qty_available: Decimal,
    pub rows: Vec<BalanceSnapshot>,
}

impl<C: Catalog> StockLedger<C> {
    pub fn warehouse_valuation(&self, warehouse_id: WarehouseId) -> WarehouseValuation {
        let mut valuation = WarehouseValuation {
            warehouse_id,
            rows: 0,
            valued_rows: 0,
            negative_rows: 0,
            total_qty: Decimal::ZERO,
            total_value: Decimal::ZERO,
        };
        let slots = self.store().slots_where(|k| k.warehouse_id == warehouse_id);
        let balances = InMemoryStockStore::read_many(&slots, |_, state| state.balance.clone());
        for balance in balances.into_iter().flatten() {
            valuation.rows += 1;
            valuation.total_qty += balance.qty_on_hand;
            if balance.qty_on_hand < Decimal::ZERO {
                valuation.negative_rows += 1;
            } else if balance.qty_on_hand > Decimal::ZERO {
                valuation.valued_rows += 1;
                valuation.total_value += balance.value();
            }
        }
        valuation
    }

    pub fn product_stock_summary(&self, product_id: ProductId) -> ProductStockSummary {
        let slots = self.store().slots_where(|k| k.product_id == product_id);
        let rows: Vec<BalanceSnapshot> =
            InMemoryStockStore::read_many(&slots, |_, state| state.balance.as_ref().map(|b| b.snapshot()))
                .into_iter()
                .flatten()
                .collect();
        ProductStockSummary {
            product_id,
            qty_on_hand: rows.iter().map(|r| r.qty_on_hand).sum(),
            qty_reserved: rows.iter().map(|r| r.qty_reserved).sum(),
            qty_available: rows.iter().map(|r| r.qty_available).sum(),
            rows,
        }
    }
}
