//! Inventory stock ledger domain module.
//!
//! This crate contains the business rules of the stock ledger, implemented purely
//! as deterministic domain logic (no IO, no locking, no storage):
//!
//! - `StockBalance` is the materialized projection for one `StockKey`.
//! - `StockMovement` is the immutable ledger entry; balances are a fold over them.
//! - `costing` is the one place the weighted-average cost is computed.
//! - `replay` rebuilds and verifies balances from movement history.

pub mod balance;
pub mod catalog;
pub mod command;
pub mod costing;
pub mod movement;
pub mod quantity;
pub mod replay;
pub mod reservation;

pub use balance::{BalanceSnapshot, StockBalance, StockKey};
pub use catalog::{ProductInfo, WarehouseInfo, WarehouseKind};
pub use command::{AdjustStock, CountStock, TransferStock};
pub use costing::next_avg_cost;
pub use movement::{DocumentKind, DocumentRef, MovementType, StockMovement};
pub use replay::{ChainBreak, ChainBreakKind, ReplayedBalance, replay, sum_quantities, verify_chain};
pub use reservation::ReleaseOutcome;
