//! Commission configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// How commission is charged on a client's reported turnover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CommissionConfig {
    /// Flat amount regardless of turnover.
    LegacyFixed { amount: Decimal },
    /// Flat percentage of turnover.
    LegacyPercent { percent: Decimal },
    /// `base_fee` up to `threshold`, plus `percent` of the excess above it.
    Hybrid {
        base_fee: Decimal,
        threshold: Decimal,
        percent: Decimal,
    },
}

impl CommissionConfig {
    pub fn model_name(&self) -> &'static str {
        match self {
            CommissionConfig::LegacyFixed { .. } => "legacy_fixed",
            CommissionConfig::LegacyPercent { .. } => "legacy_percent",
            CommissionConfig::Hybrid { .. } => "hybrid",
        }
    }
}
