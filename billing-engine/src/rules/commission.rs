//! Commission on reported turnover.

use rust_decimal::Decimal;
use serde::Serialize;

use super::money::{percent_of, round_money};
use crate::error::{BillingError, Result};
use crate::models::CommissionConfig;

/// Which part of the model produced the amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommissionBasis {
    FixedAmount,
    PercentOfTurnover,
    /// Hybrid model at or below the threshold.
    BaseFee,
    /// Hybrid model above the threshold.
    BaseFeePlusExcess,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commission {
    pub amount: Decimal,
    pub basis: CommissionBasis,
}

/// Compute commission for a turnover under `config`, rounded half-up to cents.
pub fn compute_commission(turnover: Decimal, config: &CommissionConfig) -> Result<Commission> {
    if turnover.is_sign_negative() && !turnover.is_zero() {
        return Err(BillingError::Validation(format!(
            "turnover must not be negative, got {}",
            turnover
        )));
    }

    let (exact, basis) = match config {
        CommissionConfig::LegacyFixed { amount } => (*amount, CommissionBasis::FixedAmount),
        CommissionConfig::LegacyPercent { percent } => {
            (percent_of(turnover, *percent), CommissionBasis::PercentOfTurnover)
        }
        CommissionConfig::Hybrid {
            base_fee,
            threshold,
            percent,
        } => {
            if turnover <= *threshold {
                (*base_fee, CommissionBasis::BaseFee)
            } else {
                (
                    *base_fee + percent_of(turnover - *threshold, *percent),
                    CommissionBasis::BaseFeePlusExcess,
                )
            }
        }
    };

    Ok(Commission {
        amount: round_money(exact),
        basis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn hybrid() -> CommissionConfig {
        CommissionConfig::Hybrid {
            base_fee: dec!(150),
            threshold: dec!(5000),
            percent: dec!(3),
        }
    }

    #[test]
    fn fixed_ignores_turnover() {
        let config = CommissionConfig::LegacyFixed { amount: dec!(99.90) };
        for turnover in [dec!(0), dec!(10), dec!(1000000)] {
            let c = compute_commission(turnover, &config).unwrap();
            assert_eq!(c.amount, dec!(99.90));
            assert_eq!(c.basis, CommissionBasis::FixedAmount);
        }
    }

    #[test]
    fn percent_rounds_half_up_once() {
        let config = CommissionConfig::LegacyPercent { percent: dec!(2.5) };
        let c = compute_commission(dec!(10.10), &config).unwrap();
        // 0.2525 -> 0.25
        assert_eq!(c.amount, dec!(0.25));
        let c = compute_commission(dec!(10.30), &config).unwrap();
        // 0.2575 -> 0.26
        assert_eq!(c.amount, dec!(0.26));
    }

    #[test]
    fn hybrid_threshold_is_a_floor() {
        let config = hybrid();
        assert_eq!(compute_commission(dec!(0), &config).unwrap().amount, dec!(150));
        assert_eq!(compute_commission(dec!(5000), &config).unwrap().amount, dec!(150));

        let above = compute_commission(dec!(8000), &config).unwrap();
        assert_eq!(above.amount, dec!(240));
        assert_eq!(above.basis, CommissionBasis::BaseFeePlusExcess);
    }

    #[test]
    fn hybrid_is_monotonic() {
        let config = hybrid();
        let mut previous = Decimal::ZERO;
        let mut turnover = dec!(0);
        while turnover <= dec!(12000) {
            let amount = compute_commission(turnover, &config).unwrap().amount;
            assert!(amount >= previous, "commission dropped at {}", turnover);
            previous = amount;
            turnover += dec!(123.45);
        }
    }

    #[test]
    fn negative_turnover_is_rejected() {
        let err = compute_commission(dec!(-1), &hybrid()).unwrap_err();
        assert!(matches!(err, BillingError::Validation(_)));
    }
}
