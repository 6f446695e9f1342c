//! Reservation arithmetic on a single balance row.
//!
//! Reservations hold available quantity for in-flight outbound documents. They
//! never touch `qty_on_hand` and never produce a movement.

use rust_decimal::Decimal;

use stockledger_core::{DomainError, DomainResult};

use crate::balance::StockBalance;
use crate::quantity::{checked_add, round_qty};

/// Result of releasing a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Quantity actually taken off `qty_reserved`.
    pub released: Decimal,
    /// Part of the request that exceeded what was reserved (floored away).
    pub over_released: Decimal,
}

impl StockBalance {
    /// Reserve `qty` if enough is available. Returns `Ok(false)` on shortfall.
    ///
    /// `qty_reserved` can never exceed `qty_on_hand` through this path.
    pub fn try_reserve(&mut self, qty: Decimal) -> DomainResult<bool> {
        let qty = positive(qty, "reservation qty")?;
        if self.available_qty() < qty {
            return Ok(false);
        }
        self.qty_reserved = checked_add(self.qty_reserved, qty)?;
        Ok(true)
    }

    /// Release up to `qty` of the reservation; `qty_reserved` floors at zero.
    pub fn release_reservation(&mut self, qty: Decimal) -> DomainResult<ReleaseOutcome> {
        let qty = positive(qty, "release qty")?;
        let released = qty.min(self.qty_reserved);
        self.sub_reserved(released)?;
        Ok(ReleaseOutcome {
            released,
            over_released: qty - released,
        })
    }
}

fn positive(qty: Decimal, what: &str) -> DomainResult<Decimal> {
    let qty = round_qty(qty);
    if qty <= Decimal::ZERO {
        return Err(DomainError::validation(format!("{what} must be positive")));
    }
    Ok(qty)
}
