//! Ledger service error taxonomy.
//!
//! | variant | meaning | caller action |
//! |---|---|---|
//! | `Validation` | bad reference, zero qty, missing cost | fix the request; nothing was written |
//! | `InsufficientStock` | decrease below zero where forbidden | reject, partially fulfill, or force |
//! | `Concurrency` | lock timeout, deadlock, serialization failure | retry the whole business transaction |
//! | `IntegrityViolation` | stored balance disagrees with its movements | manual review |
//! | `Store` | backend failure | surface / alert |

use rust_decimal::Decimal;
use thiserror::Error;

use stockledger_core::DomainError;
use stockledger_inventory::{ChainBreak, StockKey};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient stock for {key}: on hand {on_hand}, requested {requested}")]
    InsufficientStock {
        key: StockKey,
        on_hand: Decimal,
        requested: Decimal,
    },

    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(IntegrityIssue),

    #[error("storage error: {0}")]
    Store(String),
}

/// A disagreement between a stored balance and its movement history.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// `qty_on_hand` (or the cost/sequence it carries) differs from the replay.
    BalanceDrift {
        key: StockKey,
        stored_qty: Decimal,
        recomputed_qty: Decimal,
        stored_avg_cost: Decimal,
        recomputed_avg_cost: Decimal,
    },
    /// The movement chain itself is broken.
    BrokenChain(ChainBreak),
}

impl IntegrityIssue {
    pub fn key(&self) -> StockKey {
        match self {
            IntegrityIssue::BalanceDrift { key, .. } => *key,
            IntegrityIssue::BrokenChain(brk) => brk.key,
        }
    }
}

impl core::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            IntegrityIssue::BalanceDrift {
                key,
                stored_qty,
                recomputed_qty,
                ..
            } => write!(
                f,
                "{key}: stored qty {stored_qty} but movements sum to {recomputed_qty}"
            ),
            IntegrityIssue::BrokenChain(brk) => write!(f, "broken movement chain: {brk}"),
        }
    }
}

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Only lock/transaction conflicts are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Concurrency(_))
    }

    /// Map a domain failure for `key` into the service taxonomy.
    pub fn from_domain(key: StockKey, err: DomainError) -> Self {
        match err {
            DomainError::InsufficientStock { on_hand, requested } => LedgerError::InsufficientStock {
                key,
                on_hand,
                requested,
            },
            DomainError::InvariantViolation(msg) => {
                LedgerError::Store(format!("invariant violated on {key}: {msg}"))
            }
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => {
                LedgerError::Validation(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{ProductId, WarehouseId};

    #[test]
    fn insufficient_stock_keeps_the_key() {
        let key = StockKey::new(ProductId::new(), WarehouseId::new(), None);
        let err = LedgerError::from_domain(key, DomainError::insufficient_stock(dec!(1), dec!(2)));
        match err {
            LedgerError::InsufficientStock { key: k, on_hand, requested } => {
                assert_eq!(k, key);
                assert_eq!(on_hand, dec!(1));
                assert_eq!(requested, dec!(2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn only_concurrency_is_retryable() {
        assert!(LedgerError::concurrency("lock timeout").is_retryable());
        assert!(!LedgerError::validation("qty").is_retryable());
        assert!(!LedgerError::store("down").is_retryable());
    }
}
