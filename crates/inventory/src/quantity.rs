//! Fixed-point scales for quantities and costs.

use rust_decimal::{Decimal, RoundingStrategy};

use stockledger_core::{DomainError, DomainResult};

/// Decimal places kept for quantities (`decimal(15,4)` in storage).
pub const QTY_SCALE: u32 = 4;

/// Decimal places kept for unit and average costs.
pub const COST_SCALE: u32 = 4;

pub fn round_qty(qty: Decimal) -> Decimal {
    qty.round_dp_with_strategy(QTY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub fn round_cost(cost: Decimal) -> Decimal {
    cost.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

pub(crate) fn checked_add(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| DomainError::validation("quantity arithmetic overflow"))
}

pub(crate) fn checked_sub(a: Decimal, b: Decimal) -> DomainResult<Decimal> {
    a.checked_sub(b)
        .ok_or_else(|| DomainError::validation("quantity arithmetic overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rounds_half_away_from_zero() {
        assert_eq!(round_qty(dec!(1.00005)), dec!(1.0001));
        assert_eq!(round_qty(dec!(-1.00005)), dec!(-1.0001));
        assert_eq!(round_cost(dec!(12.34564)), dec!(12.3456));
    }
}
