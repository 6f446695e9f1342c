//! Balance Store + Movement Log backends.
//!
//! Both tables are written only through a unit of work: the in-memory backend
//! has its own [`UnitOfWork`], the Postgres backend uses the caller's
//! `sqlx::Transaction`.

pub mod in_memory;
pub mod postgres;
pub mod query;

pub use in_memory::{InMemoryStockStore, UnitOfWork};
pub use postgres::{MIGRATION, migrate};
pub use query::{DateRange, MovementFilter, MovementPage, Pagination};
