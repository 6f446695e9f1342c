//! Operator tool: verify every stock balance row against its movements.
//!
//! Exits non-zero when any integrity issue is found.

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;

use stockledger_infra::{InMemoryCatalog, LedgerConfig, PgStockLedger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stockledger_observability::init();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let config = LedgerConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    // Verification reads balances and movements only; no catalog lookups.
    let ledger = PgStockLedger::new(pool, InMemoryCatalog::new(), config);
    let report = ledger.verify_all().await?;

    for issue in &report.issues {
        tracing::error!(key = %issue.key(), %issue, "balance needs manual review");
    }
    tracing::info!(
        rows = report.rows_checked,
        movements = report.movements_checked,
        issues = report.issues.len(),
        "stock reconciliation complete"
    );

    if !report.is_clean() {
        std::process::exit(1);
    }
    Ok(())
}
