//! Matching supplier invoices against expected order cost.

use rust_decimal::Decimal;

use super::money::round_money;
use crate::models::{MismatchReason, OrderLine};

/// Default accepted deviation between expected and claimed totals.
pub const DEFAULT_TOLERANCE_PERCENT: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

/// Unit cost of the first tier containing the quantity, else the base cost.
pub fn unit_cost(line: &OrderLine) -> Decimal {
    line.tiers
        .iter()
        .find(|tier| tier.contains(line.quantity))
        .map(|tier| tier.supplier_cost)
        .unwrap_or(line.base_cost)
}

/// Sum of unit cost × quantity over all lines, rounded once.
pub fn expected_cost(lines: &[OrderLine]) -> Decimal {
    round_money(
        lines
            .iter()
            .map(|line| unit_cost(line) * Decimal::from(line.quantity))
            .sum(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    pub matched: bool,
    pub reasons: Vec<MismatchReason>,
}

/// Compare a claimed total and currency with the expected ones.
///
/// Matches iff `|expected − claimed| / expected ≤ tolerance` and the
/// currencies agree. With nothing expected only a zero claim matches.
pub fn match_invoice(
    expected: Decimal,
    expected_currency: &str,
    claimed: Decimal,
    claimed_currency: &str,
    tolerance_percent: Decimal,
) -> MatchOutcome {
    let mut reasons = Vec::new();

    let expected_currency = expected_currency.trim().to_ascii_uppercase();
    let claimed_currency = claimed_currency.trim().to_ascii_uppercase();
    if expected_currency != claimed_currency {
        reasons.push(MismatchReason::CurrencyMismatch {
            expected: expected_currency,
            claimed: claimed_currency,
        });
    }

    if expected.is_zero() {
        if !claimed.is_zero() {
            reasons.push(MismatchReason::NoExpectedCost { claimed });
        }
    } else {
        let delta_percent = (expected - claimed).abs() / expected.abs() * Decimal::ONE_HUNDRED;
        if delta_percent > tolerance_percent {
            reasons.push(MismatchReason::TotalDelta {
                expected,
                claimed,
                delta_percent: round_money(delta_percent),
            });
        }
    }

    MatchOutcome {
        matched: reasons.is_empty(),
        reasons,
    }
}
