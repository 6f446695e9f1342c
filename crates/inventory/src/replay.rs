//! Rebuild and verify balances from movement history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::balance::{StockBalance, StockKey};
use crate::costing::next_avg_cost;
use crate::movement::StockMovement;

/// Movement-backed state reconstructed from a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayedBalance {
    pub key: StockKey,
    pub qty_on_hand: Decimal,
    pub avg_cost: Decimal,
    pub last_sequence: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// A movement from another key was mixed into the chain.
    ForeignKey,
    /// Sequence numbers are not 1, 2, 3, ...
    SequenceGap { expected: u64 },
    /// `balance_before` does not equal the previous `balance_after`.
    BalanceMismatch { expected_before: Decimal },
    /// `balance_after != balance_before + qty`, or the sum overflows.
    Arithmetic,
    /// `avg_cost_after` is not what costing the movement yields.
    CostMismatch { expected_avg_cost: Decimal },
}

/// First point where a movement chain stops being a valid history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub key: StockKey,
    pub sequence: u64,
    pub kind: ChainBreakKind,
}

impl core::fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.kind {
            ChainBreakKind::ForeignKey => {
                write!(f, "movement {} of {} belongs to another key", self.sequence, self.key)
            }
            ChainBreakKind::SequenceGap { expected } => write!(
                f,
                "{}: expected sequence {expected}, found {}",
                self.key, self.sequence
            ),
            ChainBreakKind::BalanceMismatch { expected_before } => write!(
                f,
                "{}: movement {} starts at a balance other than {expected_before}",
                self.key, self.sequence
            ),
            ChainBreakKind::Arithmetic => write!(
                f,
                "{}: movement {} has balance_after != balance_before + qty",
                self.key, self.sequence
            ),
            ChainBreakKind::CostMismatch { expected_avg_cost } => write!(
                f,
                "{}: movement {} records an average cost other than {expected_avg_cost}",
                self.key, self.sequence
            ),
        }
    }
}

/// Sum of signed quantities. Independent of the chain snapshots.
pub fn sum_quantities<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Decimal {
    movements.into_iter().map(|m| m.qty).sum()
}

/// Check that `movements` (in sequence order) form one unbroken chain from zero.
pub fn verify_chain(key: StockKey, movements: &[StockMovement]) -> Result<(), ChainBreak> {
    replay(key, movements).map(|_| ())
}

/// Fold a key's movements into its movement-backed state.
///
/// Quantities follow the recorded chain; the average cost is recomputed with
/// [`next_avg_cost`] and must agree with each movement's `avg_cost_after`.
pub fn replay(key: StockKey, movements: &[StockMovement]) -> Result<ReplayedBalance, ChainBreak> {
    let mut expected_before = Decimal::ZERO;
    let mut avg_cost = Decimal::ZERO;
    let mut last_sequence = 0u64;

    for m in movements {
        let brk = |kind| ChainBreak {
            key,
            sequence: m.sequence,
            kind,
        };
        if m.key() != key {
            return Err(brk(ChainBreakKind::ForeignKey));
        }
        if m.sequence != last_sequence + 1 {
            return Err(brk(ChainBreakKind::SequenceGap {
                expected: last_sequence + 1,
            }));
        }
        if m.balance_before != expected_before {
            return Err(brk(ChainBreakKind::BalanceMismatch { expected_before }));
        }
        if m.balance_before.checked_add(m.qty) != Some(m.balance_after) {
            return Err(brk(ChainBreakKind::Arithmetic));
        }
        let expected_avg_cost = next_avg_cost(m.balance_before, avg_cost, m.qty, m.unit_cost)
            .map_err(|_| brk(ChainBreakKind::Arithmetic))?;
        if m.avg_cost_after != expected_avg_cost {
            return Err(brk(ChainBreakKind::CostMismatch { expected_avg_cost }));
        }
        expected_before = m.balance_after;
        avg_cost = expected_avg_cost;
        last_sequence = m.sequence;
    }

    Ok(ReplayedBalance {
        key,
        qty_on_hand: expected_before,
        avg_cost,
        last_sequence,
    })
}

impl ReplayedBalance {
    /// Whether a stored balance agrees with this replay.
    pub fn matches(&self, stored: &StockBalance) -> bool {
        stored.qty_on_hand == self.qty_on_hand
            && stored.avg_cost == self.avg_cost
            && stored.last_sequence == self.last_sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::AdjustStock;
    use crate::movement::MovementType;
    use chrono::Utc;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockledger_core::{MovementId, ProductId, WarehouseId};

    fn key() -> StockKey {
        StockKey::new(ProductId::new(), WarehouseId::new(), None)
    }

    fn history(key: StockKey, deltas: &[(Decimal, Option<Decimal>)]) -> (StockBalance, Vec<StockMovement>) {
        let mut b = StockBalance::empty(key);
        let mut out = Vec::new();
        for (qty, cost) in deltas {
            let mut cmd = AdjustStock::new(key, *qty, MovementType::Adjustment);
            cmd.unit_cost = *cost;
            let mv = b
                .decide_adjustment(&cmd, true, MovementId::new(), Utc::now())
                .unwrap();
            b.apply(&mv).unwrap();
            out.push(mv);
        }
        (b, out)
    }

    #[test]
    fn replay_matches_live_balance() {
        let k = key();
        let (live, movements) = history(
            k,
            &[
                (dec!(100), Some(dec!(10))),
                (dec!(50), Some(dec!(16))),
                (dec!(-30), None),
            ],
        );
        let replayed = replay(k, &movements).unwrap();
        assert!(replayed.matches(&live));
        assert_eq!(replayed.qty_on_hand, dec!(120));
        assert_eq!(replayed.avg_cost, dec!(12));
        assert_eq!(sum_quantities(&movements), dec!(120));
    }

    #[test]
    fn detects_a_broken_link() {
        let k = key();
        let (_, mut movements) = history(k, &[(dec!(5), None), (dec!(5), None), (dec!(-2), None)]);
        movements[2].balance_before = dec!(11);
        movements[2].balance_after = dec!(9);

        let brk = verify_chain(k, &movements).unwrap_err();
        assert_eq!(brk.sequence, 3);
        assert_eq!(
            brk.kind,
            ChainBreakKind::BalanceMismatch {
                expected_before: dec!(10)
            }
        );
    }

    #[test]
    fn detects_a_missing_movement() {
        let k = key();
        let (_, mut movements) = history(k, &[(dec!(5), None), (dec!(5), None), (dec!(5), None)]);
        movements.remove(1);
        let brk = verify_chain(k, &movements).unwrap_err();
        assert_eq!(brk.kind, ChainBreakKind::SequenceGap { expected: 2 });
    }

    #[test]
    fn detects_a_rewritten_average_cost() {
        let k = key();
        let (_, mut movements) = history(
            k,
            &[(dec!(100), Some(dec!(10))), (dec!(50), Some(dec!(16))), (dec!(-30), None)],
        );
        movements[1].avg_cost_after = dec!(11);

        let brk = verify_chain(k, &movements).unwrap_err();
        assert_eq!(brk.sequence, 2);
        assert_eq!(
            brk.kind,
            ChainBreakKind::CostMismatch {
                expected_avg_cost: dec!(12)
            }
        );
    }

    #[test]
    fn overflowing_link_is_a_break_not_a_panic() {
        let k = key();
        let (_, mut movements) = history(k, &[(dec!(1), None), (dec!(1), None)]);
        movements[0].qty = Decimal::MAX;
        movements[0].balance_after = Decimal::MAX;
        movements[1].balance_before = Decimal::MAX;

        let brk = verify_chain(k, &movements).unwrap_err();
        assert_eq!(brk.sequence, 2);
        assert_eq!(brk.kind, ChainBreakKind::Arithmetic);
    }

    #[test]
    fn empty_history_replays_to_zero() {
        let k = key();
        let r = replay(k, &[]).unwrap();
        assert_eq!(r.qty_on_hand, dec!(0));
        assert_eq!(r.last_sequence, 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: for any accepted history, the chain verifies and its
        /// quantity sum equals the live on-hand quantity.
        #[test]
        fn chain_sum_equals_on_hand(
            deltas in prop::collection::vec((-500i64..500i64, 0i64..10_000i64), 1..30)
        ) {
            let k = key();
            let deltas: Vec<_> = deltas
                .into_iter()
                .filter(|(q, _)| *q != 0)
                .map(|(q, c)| (Decimal::from(q), Some(Decimal::new(c, 2))))
                .collect();
            let (live, movements) = history(k, &deltas);

            let replayed = replay(k, &movements).unwrap();
            prop_assert!(replayed.matches(&live));
            prop_assert_eq!(sum_quantities(&movements), live.qty_on_hand);
        }
    }
}
