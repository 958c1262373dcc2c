//! Price arithmetic in integer minor units.
//!
//! All client-facing amounts are `i64` minor units; fractional intermediate
//! results go through `rust_decimal` and are settled with banker's rounding
//! (midpoint-to-even). The rounding residual of the per-line split is
//! assigned to the last line so the line items always sum to the charged
//! amount.

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::EngineError;
use crate::models::{SeatLine, SeatTier};

/// Basis points in a whole (100%).
pub const BP_SCALE: u32 = 10_000;

/// Fixed promo table. Codes are matched case-sensitively.
const PROMOS: &[(&str, u32)] = &[
    ("CINE10", 1_000),
    ("ESTRENO15", 1_500),
    ("MATINEE5", 500),
];

/// Resolve a promo code to its discount in basis points.
pub fn promo_discount_bp(code: &str) -> Result<u32, EngineError> {
    PROMOS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, bp)| *bp)
        .ok_or_else(|| EngineError::PromoUnknown(code.to_string()))
}

/// Computed totals for one transaction, minor units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub discounted: i64,
    pub tax: i64,
    pub total: i64,
}

#[inline]
fn round_even(value: Decimal) -> i64 {
    value
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .unwrap_or(0)
}

#[inline]
fn apply_discount(amount: i64, discount_bp: u32) -> Decimal {
    let keep = Decimal::from(BP_SCALE.saturating_sub(discount_bp));
    Decimal::from(amount) * keep / Decimal::from(BP_SCALE)
}

/// Build priced line items for the requested seats and compute the totals.
///
/// `seats` must already be validated against the function's hall. The
/// combined discount is clamped at 100%; the discounted subtotal is clamped
/// at zero.
pub fn price_seats(
    seats: &[(char, u16, SeatTier, i64)],
    customer_discount_bp: u32,
    promo_discount_bp: u32,
    tax_rate_bp: u32,
) -> (Vec<SeatLine>, Totals) {
    let discount_bp = (customer_discount_bp + promo_discount_bp).min(BP_SCALE);

    let subtotal: i64 = seats.iter().map(|(_, _, _, unit)| unit).sum();
    let discounted = round_even(apply_discount(subtotal, discount_bp)).max(0);

    let tax = round_even(Decimal::from(discounted) * Decimal::from(tax_rate_bp) / Decimal::from(BP_SCALE));
    let total = discounted + tax;

    let mut lines: Vec<SeatLine> = seats
        .iter()
        .map(|(row, number, tier, unit_price)| {
            let code = crate::core_types::SeatCode::parse(&format!("{row}{number}"))
                .expect("validated seat codes");
            SeatLine {
                code,
                row: *row,
                number: *number,
                tier: *tier,
                unit_price: *unit_price,
                applied_discount_bp: discount_bp,
                final_price: round_even(apply_discount(*unit_price, discount_bp)).max(0),
            }
        })
        .collect();

    // Assign the rounding residual to the last line so the lines sum to the
    // discounted subtotal and lines + tax == total.
    let line_sum: i64 = lines.iter().map(|l| l.final_price).sum();
    let residual = discounted - line_sum;
    if residual != 0
        && let Some(last) = lines.last_mut()
    {
        last.final_price += residual;
    }

    (
        lines,
        Totals {
            subtotal,
            discounted,
            tax,
            total,
        },
    )
}
