//! Stock Ledger Service: unit of work, row locking, storage backends,
//! reconciliation and configuration.

pub mod catalog;
pub mod config;
pub mod error;
pub mod ledger;
pub mod movement_log;
pub mod pg_ledger;
pub mod reconciliation;
pub mod reservation;
pub mod store;
pub mod valuation;

pub use catalog::{Catalog, InMemoryCatalog};
pub use config::{ConfigError, LedgerConfig};
pub use error::{IntegrityIssue, LedgerError};
pub use ledger::StockLedger;
pub use pg_ledger::{PgStockLedger, PgTx};
pub use reconciliation::{BalanceCheck, ReconciliationReport};
pub use store::{DateRange, InMemoryStockStore, MovementFilter, MovementPage, Pagination, UnitOfWork};
pub use valuation::{ProductStockSummary, WarehouseValuation};
