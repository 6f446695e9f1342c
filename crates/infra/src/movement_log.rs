//! Movement Log read surface over the in-memory store.

use stockledger_core::{ProductId, WarehouseId};
use stockledger_inventory::{DocumentRef, StockKey, StockMovement};

use crate::catalog::Catalog;
use crate::ledger::StockLedger;
use crate::store::{DateRange, MovementFilter, MovementPage, Pagination};

impl<C: Catalog> StockLedger<C> {
    /// Committed movements of a product in a warehouse (every location),
    /// oldest first. Within one key the order is the chain order.
    pub fn movements_for(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
        range: Option<DateRange>,
    ) -> Vec<StockMovement> {
        let mut out: Vec<StockMovement> = self
            .store()
            .slots_where(|k| k.product_id == product_id && k.warehouse_id == warehouse_id)
            .into_iter()
            .flat_map(|(_, slot)| {
                slot.read(|state| {
                    state
                        .movements
                        .iter()
                        .filter(|m| range.is_none_or(|r| r.contains(m.created_at)))
                        .cloned()
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.key().cmp(&b.key()))
                .then_with(|| a.sequence.cmp(&b.sequence))
        });
        out
    }

    /// The committed chain of one key, in sequence order.
    pub fn movements_at(&self, key: StockKey) -> Vec<StockMovement> {
        self.store().committed_movements(&key)
    }

    /// Audit query: filtered, newest first, paginated.
    pub fn query_movements(&self, filter: &MovementFilter, pagination: Pagination) -> MovementPage {
        let matched = self
            .store()
            .slots_where(|k| {
                filter.product_id.is_none_or(|p| k.product_id == p)
                    && filter.warehouse_id.is_none_or(|w| k.warehouse_id == w)
            })
            .into_iter()
            .flat_map(|(_, slot)| {
                slot.read(|state| {
                    state
                        .movements
                        .iter()
                        .filter(|m| filter.matches(m))
                        .cloned()
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        MovementPage::paginate(matched, pagination)
    }

    /// Every movement a document produced, in creation order.
    pub fn movements_by_reference(&self, reference: &DocumentRef) -> Vec<StockMovement> {
        let mut out: Vec<StockMovement> = self
            .store()
            .slots()
            .into_iter()
            .flat_map(|(_, slot)| {
                slot.read(|state| {
                    state
                        .movements
                        .iter()
                        .filter(|m| m.reference.as_ref() == Some(reference))
                        .cloned()
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        out
    }
}
