//! Postgres Balance Store + Movement Log primitives.
//!
//! Every function here runs on the caller's connection (normally the
//! connection behind a `sqlx::Transaction`) and never opens or commits a
//! transaction of its own.
//!
//! ## Error Mapping
//!
//! | SQLSTATE | meaning | LedgerError |
//! |---|---|---|
//! | `55P03` | lock_not_available (`lock_timeout` expired) | `Concurrency` |
//! | `40P01` | deadlock_detected | `Concurrency` |
//! | `40001` | serialization_failure | `Concurrency` |
//! | `23505` | unique violation (duplicate sequence) | `Concurrency` |
//! | `23514` | check violation | `Store` |
//! | other / pool / network | | `Store` |

use std::time::Duration;

use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};
use tracing::debug;

use stockledger_core::{LocationId, MovementId, ProductId, UserId, WarehouseId};
use stockledger_inventory::{DocumentKind, DocumentRef, MovementType, StockBalance, StockKey, StockMovement};

use crate::error::LedgerError;
use crate::store::query::{MovementFilter, MovementPage, Pagination};

/// Schema for `stock_balances` and `stock_movements`.
pub const MIGRATION: &str = include_str!("../../migrations/0001_stock_ledger.sql");

/// Apply the ledger schema (idempotent).
pub async fn migrate(pool: &PgPool) -> Result<(), LedgerError> {
    sqlx::raw_sql(MIGRATION)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("migrate", e))?;
    Ok(())
}

const BALANCE_COLUMNS: &str = "product_id, warehouse_id, location_id, qty_on_hand, qty_reserved, \
     qty_incoming, qty_outgoing, avg_cost, last_sequence, updated_at";

const MOVEMENT_COLUMNS: &str = "id, product_id, warehouse_id, location_id, sequence, qty, unit_cost, \
     balance_before, balance_after, avg_cost_after, movement_type, reference_kind, reference_id, \
     external_reference, notes, created_by, created_at";

/// Get-or-create the balance row for `key` and lock it `FOR UPDATE`.
///
/// `lock_timeout` is applied only while waiting for the row; the caller's
/// previous setting is put back once the lock is held. An expired wait
/// surfaces as `Concurrency` and aborts the transaction.
pub async fn lock_row(
    conn: &mut PgConnection,
    key: StockKey,
    lock_timeout: Duration,
) -> Result<StockBalance, LedgerError> {
    let previous: String = sqlx::query_scalar("SELECT current_setting('lock_timeout')")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("read_lock_timeout", e))?;
    set_lock_timeout(conn, &format!("{}ms", lock_timeout.as_millis())).await?;

    sqlx::query(
        r#"
        INSERT INTO stock_balances (product_id, warehouse_id, location_id)
        VALUES ($1, $2, $3)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(|l| *l.as_uuid()))
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("create_balance", e))?;

    let row = sqlx::query(&format!(
        "SELECT {BALANCE_COLUMNS} FROM stock_balances \
         WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3 \
         FOR UPDATE"
    ))
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(|l| *l.as_uuid()))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("lock_balance", e))?;

    set_lock_timeout(conn, &previous).await?;

    let balance = balance_from_row(&row).map_err(|e| map_sqlx_error("decode_balance", e))?;
    debug!(%key, last_sequence = balance.last_sequence, "row locked");
    Ok(balance)
}

async fn set_lock_timeout(conn: &mut PgConnection, value: &str) -> Result<(), LedgerError> {
    sqlx::query("SELECT set_config('lock_timeout', $1, true)")
        .bind(value)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("set_lock_timeout", e))?;
    Ok(())
}

/// Read a balance row without locking it. `FOR SHARE` when `share` is set.
pub async fn read_balance(
    conn: &mut PgConnection,
    key: StockKey,
    share: bool,
) -> Result<Option<StockBalance>, LedgerError> {
    let lock = if share { " FOR SHARE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {BALANCE_COLUMNS} FROM stock_balances \
         WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3{lock}"
    ))
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(|l| *l.as_uuid()))
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("read_balance", e))?;

    row.map(|r| balance_from_row(&r))
        .transpose()
        .map_err(|e| map_sqlx_error("decode_balance", e))
}

/// All balance keys of a product in a warehouse, or of everything.
pub async fn balance_keys(
    conn: &mut PgConnection,
    scope: Option<(ProductId, WarehouseId)>,
) -> Result<Vec<StockKey>, LedgerError> {
    let rows = match scope {
        Some((product_id, warehouse_id)) => sqlx::query(
            "SELECT product_id, warehouse_id, location_id FROM stock_balances \
             WHERE product_id = $1 AND warehouse_id = $2 \
             ORDER BY product_id, warehouse_id, location_id NULLS FIRST",
        )
        .bind(product_id.as_uuid())
        .bind(warehouse_id.as_uuid())
        .fetch_all(&mut *conn)
        .await,
        None => sqlx::query(
            "SELECT product_id, warehouse_id, location_id FROM stock_balances \
             ORDER BY product_id, warehouse_id, location_id NULLS FIRST",
        )
        .fetch_all(&mut *conn)
        .await,
    }
    .map_err(|e| map_sqlx_error("balance_keys", e))?;

    rows.iter()
        .map(key_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error("decode_key", e))
}

/// Write back the mutable columns of a locked balance row.
pub async fn write_balance(conn: &mut PgConnection, balance: &StockBalance) -> Result<(), LedgerError> {
    let key = balance.key;
    sqlx::query(
        r#"
        UPDATE stock_balances
        SET qty_on_hand = $4,
            qty_reserved = $5,
            qty_incoming = $6,
            qty_outgoing = $7,
            avg_cost = $8,
            last_sequence = $9,
            updated_at = now()
        WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3
        "#,
    )
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(|l| *l.as_uuid()))
    .bind(balance.qty_on_hand)
    .bind(balance.qty_reserved)
    .bind(balance.qty_incoming)
    .bind(balance.qty_outgoing)
    .bind(balance.avg_cost)
    .bind(to_i64(balance.last_sequence)?)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("write_balance", e))?;
    Ok(())
}

pub async fn insert_movement(conn: &mut PgConnection, m: &StockMovement) -> Result<(), LedgerError> {
    sqlx::query(&format!(
        "INSERT INTO stock_movements ({MOVEMENT_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
    ))
    .bind(m.id.as_uuid())
    .bind(m.product_id.as_uuid())
    .bind(m.warehouse_id.as_uuid())
    .bind(m.location_id.map(|l| *l.as_uuid()))
    .bind(to_i64(m.sequence)?)
    .bind(m.qty)
    .bind(m.unit_cost)
    .bind(m.balance_before)
    .bind(m.balance_after)
    .bind(m.avg_cost_after)
    .bind(m.movement_type.as_str())
    .bind(m.reference.as_ref().map(|r| r.kind.as_str()))
    .bind(m.reference.as_ref().map(|r| r.id.clone()))
    .bind(m.external_reference.clone())
    .bind(m.notes.clone())
    .bind(m.created_by.map(|u| *u.as_uuid()))
    .bind(m.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_movement", e))?;
    Ok(())
}

/// The chain of one key, in sequence order.
pub async fn load_chain(conn: &mut PgConnection, key: StockKey) -> Result<Vec<StockMovement>, LedgerError> {
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
         WHERE product_id = $1 AND warehouse_id = $2 AND location_id IS NOT DISTINCT FROM $3 \
         ORDER BY sequence ASC"
    ))
    .bind(key.product_id.as_uuid())
    .bind(key.warehouse_id.as_uuid())
    .bind(key.location_id.map(|l| *l.as_uuid()))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_chain", e))?;
    decode_movements(&rows)
}

/// Movements of a product in a warehouse (every location), oldest first.
pub async fn movements_for(
    conn: &mut PgConnection,
    product_id: ProductId,
    warehouse_id: WarehouseId,
    from: Option<chrono::DateTime<chrono::Utc>>,
    to: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<Vec<StockMovement>, LedgerError> {
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
         WHERE product_id = $1 AND warehouse_id = $2 \
           AND ($3::timestamptz IS NULL OR created_at >= $3) \
           AND ($4::timestamptz IS NULL OR created_at < $4) \
         ORDER BY created_at ASC, location_id NULLS FIRST, sequence ASC"
    ))
    .bind(product_id.as_uuid())
    .bind(warehouse_id.as_uuid())
    .bind(from)
    .bind(to)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("movements_for", e))?;
    decode_movements(&rows)
}

/// Sum of movement quantities of a product in a warehouse.
pub async fn sum_movements(
    conn: &mut PgConnection,
    product_id: ProductId,
    warehouse_id: WarehouseId,
) -> Result<Decimal, LedgerError> {
    let row = sqlx::query(
        "SELECT COALESCE(SUM(qty), 0) AS total FROM stock_movements \
         WHERE product_id = $1 AND warehouse_id = $2",
    )
    .bind(product_id.as_uuid())
    .bind(warehouse_id.as_uuid())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("sum_movements", e))?;
    row.try_get::<Decimal, _>("total")
        .map_err(|e| map_sqlx_error("decode_sum", e))
}

/// Audit query: filtered, newest first, paginated.
pub async fn query_movements(
    conn: &mut PgConnection,
    filter: &MovementFilter,
    pagination: Pagination,
) -> Result<MovementPage, LedgerError> {
    let pagination = pagination.clamped();
    let types: Vec<String> = filter
        .movement_types
        .iter()
        .map(|t| t.as_str().to_string())
        .collect();
    let (from, to) = filter
        .date_range
        .map(|r| (r.from, r.to))
        .unwrap_or((None, None));
    let where_clause = "WHERE ($1::uuid IS NULL OR product_id = $1) \
           AND ($2::uuid IS NULL OR warehouse_id = $2) \
           AND ($3::uuid IS NULL OR location_id = $3) \
           AND (cardinality($4::text[]) = 0 OR movement_type = ANY($4)) \
           AND ($5::timestamptz IS NULL OR created_at >= $5) \
           AND ($6::timestamptz IS NULL OR created_at < $6) \
           AND ($7::text IS NULL OR (reference_kind = $7 AND reference_id = $8))";

    let total_row = sqlx::query(&format!(
        "SELECT COUNT(*) AS total FROM stock_movements {where_clause}"
    ))
    .bind(filter.product_id.map(|p| *p.as_uuid()))
    .bind(filter.warehouse_id.map(|w| *w.as_uuid()))
    .bind(filter.location_id.map(|l| *l.as_uuid()))
    .bind(&types)
    .bind(from)
    .bind(to)
    .bind(filter.reference.as_ref().map(|r| r.kind.as_str()))
    .bind(filter.reference.as_ref().map(|r| r.id.clone()))
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("count_movements", e))?;
    let total: i64 = total_row
        .try_get("total")
        .map_err(|e| map_sqlx_error("decode_count", e))?;

    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements {where_clause} \
         ORDER BY created_at DESC, id DESC LIMIT $9 OFFSET $10"
    ))
    .bind(filter.product_id.map(|p| *p.as_uuid()))
    .bind(filter.warehouse_id.map(|w| *w.as_uuid()))
    .bind(filter.location_id.map(|l| *l.as_uuid()))
    .bind(&types)
    .bind(from)
    .bind(to)
    .bind(filter.reference.as_ref().map(|r| r.kind.as_str()))
    .bind(filter.reference.as_ref().map(|r| r.id.clone()))
    .bind(i64::from(pagination.limit))
    .bind(i64::from(pagination.offset))
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("query_movements", e))?;

    let movements = decode_movements(&rows)?;
    let total = u64::try_from(total).unwrap_or(0);
    let has_more = u64::from(pagination.offset) + (movements.len() as u64) < total;
    Ok(MovementPage {
        movements,
        total,
        pagination,
        has_more,
    })
}

pub async fn movements_by_reference(
    conn: &mut PgConnection,
    reference: &DocumentRef,
) -> Result<Vec<StockMovement>, LedgerError> {
    let rows = sqlx::query(&format!(
        "SELECT {MOVEMENT_COLUMNS} FROM stock_movements \
         WHERE reference_kind = $1 AND reference_id = $2 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(reference.kind.as_str())
    .bind(&reference.id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("movements_by_reference", e))?;
    decode_movements(&rows)
}

fn decode_movements(rows: &[PgRow]) -> Result<Vec<StockMovement>, LedgerError> {
    rows.iter()
        .map(movement_from_row)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| map_sqlx_error("decode_movement", e))
}

fn key_from_row(row: &PgRow) -> Result<StockKey, sqlx::Error> {
    Ok(StockKey::new(
        ProductId::from_uuid(row.try_get("product_id")?),
        WarehouseId::from_uuid(row.try_get("warehouse_id")?),
        row.try_get::<Option<uuid::Uuid>, _>("location_id")?
            .map(LocationId::from_uuid),
    ))
}

fn balance_from_row(row: &PgRow) -> Result<StockBalance, sqlx::Error> {
    Ok(StockBalance {
        key: key_from_row(row)?,
        qty_on_hand: row.try_get("qty_on_hand")?,
        qty_reserved: row.try_get("qty_reserved")?,
        qty_incoming: row.try_get("qty_incoming")?,
        qty_outgoing: row.try_get("qty_outgoing")?,
        avg_cost: row.try_get("avg_cost")?,
        last_sequence: from_i64(row.try_get("last_sequence")?)?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn movement_from_row(row: &PgRow) -> Result<StockMovement, sqlx::Error> {
    let movement_type: String = row.try_get("movement_type")?;
    let reference_kind: Option<String> = row.try_get("reference_kind")?;
    let reference_id: Option<String> = row.try_get("reference_id")?;
    let reference = match (reference_kind, reference_id) {
        (Some(kind), Some(id)) => Some(DocumentRef {
            kind: kind
                .parse::<DocumentKind>()
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
            id,
        }),
        _ => None,
    };

    Ok(StockMovement {
        id: MovementId::from_uuid(row.try_get("id")?),
        product_id: ProductId::from_uuid(row.try_get("product_id")?),
        warehouse_id: WarehouseId::from_uuid(row.try_get("warehouse_id")?),
        location_id: row
            .try_get::<Option<uuid::Uuid>, _>("location_id")?
            .map(LocationId::from_uuid),
        sequence: from_i64(row.try_get("sequence")?)?,
        qty: row.try_get("qty")?,
        unit_cost: row.try_get("unit_cost")?,
        balance_before: row.try_get("balance_before")?,
        balance_after: row.try_get("balance_after")?,
        avg_cost_after: row.try_get("avg_cost_after")?,
        movement_type: movement_type
            .parse::<MovementType>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        reference,
        external_reference: row.try_get("external_reference")?,
        notes: row.try_get("notes")?,
        created_by: row
            .try_get::<Option<uuid::Uuid>, _>("created_by")?
            .map(UserId::from_uuid),
        created_at: row.try_get("created_at")?,
    })
}

fn from_i64(v: i64) -> Result<u64, sqlx::Error> {
    u64::try_from(v).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn to_i64(v: u64) -> Result<i64, LedgerError> {
    i64::try_from(v).map_err(|_| LedgerError::store(format!("sequence {v} exceeds BIGINT")))
}

pub(crate) fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {operation}: {}", db_err.message());
            match db_err.code().as_deref() {
                Some("55P03") | Some("40P01") | Some("40001") => LedgerError::Concurrency(msg),
                // Two writers raced past the row lock on the same sequence.
                Some("23505") => LedgerError::Concurrency(msg),
                _ => LedgerError::Store(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            LedgerError::store(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::PoolTimedOut => {
            LedgerError::concurrency(format!("connection pool timed out in {operation}"))
        }
        other => LedgerError::store(format!("sqlx error in {operation}: {other}")),
    }
}
