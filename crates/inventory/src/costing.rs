//! Weighted-average costing.
//!
//! This is the only place the average cost is computed. Every caller (adjust,
//! transfer, replay) goes through [`next_avg_cost`].

use rust_decimal::Decimal;

use stockledger_core::{DomainError, DomainResult};

use crate::quantity::round_cost;

/// Average cost after applying `qty` (signed) at `unit_cost` to a balance of
/// `on_hand` units valued at `avg_cost`.
///
/// - Decreases, and increases without a cost, leave the average unchanged.
/// - Increases blend the prior stock with the incoming lot:
///   `(on_hand * avg_cost + qty * unit_cost) / (on_hand + qty)`.
/// - Negative prior stock carries no value, so it is clamped to zero before
///   blending. Receiving into a zero or negative balance therefore resets the
///   average to the incoming cost.
pub fn next_avg_cost(
    on_hand: Decimal,
    avg_cost: Decimal,
    qty: Decimal,
    unit_cost: Option<Decimal>,
) -> DomainResult<Decimal> {
    let unit_cost = match unit_cost {
        Some(cost) if qty > Decimal::ZERO => cost,
        _ => return Ok(avg_cost),
    };
    if unit_cost < Decimal::ZERO {
        return Err(DomainError::validation("unit cost cannot be negative"));
    }

    let prior_qty = on_hand.max(Decimal::ZERO);
    if prior_qty.is_zero() {
        return Ok(round_cost(unit_cost));
    }

    let overflow = || DomainError::validation("cost arithmetic overflow");
    let prior_value = prior_qty.checked_mul(avg_cost).ok_or_else(overflow)?;
    let incoming_value = qty.checked_mul(unit_cost).ok_or_else(overflow)?;
    let total_value = prior_value.checked_add(incoming_value).ok_or_else(overflow)?;
    let total_qty = prior_qty.checked_add(qty).ok_or_else(overflow)?;

    let avg = total_value.checked_div(total_qty).ok_or_else(overflow)?;
    Ok(round_cost(avg))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn blends_prior_and_incoming_cost() {
        // 100 @ 10 + 50 @ 16 = 1800 / 150
        let avg = next_avg_cost(dec!(100), dec!(10), dec!(50), Some(dec!(16))).unwrap();
        assert_eq!(avg, dec!(12));
    }

    #[test]
    fn decrease_keeps_cost() {
        let avg = next_avg_cost(dec!(150), dec!(12), dec!(-30), None).unwrap();
        assert_eq!(avg, dec!(12));

        // A cost passed with a decrease is ignored.
        let avg = next_avg_cost(dec!(150), dec!(12), dec!(-30), Some(dec!(99))).unwrap();
        assert_eq!(avg, dec!(12));
    }

    #[test]
    fn increase_without_cost_keeps_cost() {
        let avg = next_avg_cost(dec!(10), dec!(7.5), dec!(5), None).unwrap();
        assert_eq!(avg, dec!(7.5));
    }

    #[test]
    fn receipt_into_empty_stock_takes_incoming_cost() {
        let avg = next_avg_cost(dec!(0), dec!(42), dec!(5), Some(dec!(9))).unwrap();
        assert_eq!(avg, dec!(9));
    }

    #[test]
    fn receipt_that_lands_exactly_on_zero_resets_to_incoming_cost() {
        // on_hand + qty == 0 must not zero the cost basis.
        let avg = next_avg_cost(dec!(-5), dec!(11), dec!(5), Some(dec!(13))).unwrap();
        assert_eq!(avg, dec!(13));
    }

    #[test]
    fn negative_prior_stock_carries_no_value() {
        let avg = next_avg_cost(dec!(-10), dec!(10), dec!(15), Some(dec!(16))).unwrap();
        assert_eq!(avg, dec!(16));
    }

    #[test]
    fn result_is_rounded_to_cost_scale() {
        // (1 * 1 + 2 * 2) / 3 = 1.6666...
        let avg = next_avg_cost(dec!(1), dec!(1), dec!(2), Some(dec!(2))).unwrap();
        assert_eq!(avg, dec!(1.6667));
    }

    #[test]
    fn negative_cost_is_rejected() {
        let err = next_avg_cost(dec!(1), dec!(1), dec!(1), Some(dec!(-1))).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the blended cost always lies between the prior and incoming cost.
        #[test]
        fn blended_cost_is_bounded_by_inputs(
            on_hand in 1i64..1_000_000i64,
            avg_cents in 0i64..10_000_000i64,
            qty in 1i64..1_000_000i64,
            cost_cents in 0i64..10_000_000i64,
        ) {
            let avg = Decimal::new(avg_cents, 2);
            let cost = Decimal::new(cost_cents, 2);
            let next = next_avg_cost(Decimal::from(on_hand), avg, Decimal::from(qty), Some(cost)).unwrap();

            let lo = round_cost(avg.min(cost));
            let hi = round_cost(avg.max(cost));
            prop_assert!(next >= lo && next <= hi, "{next} not in [{lo}, {hi}]");
        }
    }
}
