//! VAT treatment per client.
//!
//! Rules are evaluated in order:
//! 1. private individual ⇒ home standard rate (`private_individual`)
//! 2. buyer in the home country ⇒ home standard rate (`domestic`)
//! 3. business with a format-valid foreign VAT id ⇒ 0% (`reverse_charge`)
//! 4. anything else ⇒ home standard rate (`domestic_default`)

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::UnknownVariant;

/// VAT prefixes of the union member states (Greece uses `EL`, Northern Ireland `XI`).
pub const MEMBER_STATE_PREFIXES: [&str; 28] = [
    "AT", "BE", "BG", "CY", "CZ", "DE", "DK", "EE", "EL", "ES", "FI", "FR", "HR", "HU", "IE",
    "IT", "LT", "LU", "LV", "MT", "NL", "PL", "PT", "RO", "SE", "SI", "SK", "XI",
];

static VAT_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Z]{2})([A-Z0-9]{2,12})$").expect("VAT format regex is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxMode {
    PrivateIndividual,
    Domestic,
    ReverseCharge,
    DomesticDefault,
}

impl TaxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxMode::PrivateIndividual => "private_individual",
            TaxMode::Domestic => "domestic",
            TaxMode::ReverseCharge => "reverse_charge",
            TaxMode::DomesticDefault => "domestic_default",
        }
    }
}

impl FromStr for TaxMode {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private_individual" => Ok(TaxMode::PrivateIndividual),
            "domestic" => Ok(TaxMode::Domestic),
            "reverse_charge" => Ok(TaxMode::ReverseCharge),
            "domestic_default" => Ok(TaxMode::DomesticDefault),
            other => Err(UnknownVariant::new("tax mode", other)),
        }
    }
}

impl fmt::Display for TaxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A VAT identifier that passed format validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VatId {
    pub prefix: String,
    pub number: String,
}

impl VatId {
    /// Normalize case and whitespace, then check prefix and body.
    ///
    /// Returns `None` for anything that is not a plausible member-state id.
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        let captures = VAT_FORMAT.captures(&normalized)?;
        let prefix = captures.get(1)?.as_str();
        if !MEMBER_STATE_PREFIXES.contains(&prefix) {
            return None;
        }

        Some(Self {
            prefix: prefix.to_string(),
            number: captures.get(2)?.as_str().to_string(),
        })
    }
}

impl fmt::Display for VatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)
    }
}

/// Buyer facts the decision depends on.
#[derive(Debug, Clone, Copy)]
pub struct TaxBuyer<'a> {
    pub country: &'a str,
    pub is_business: bool,
    pub vat_number: Option<&'a str>,
}

/// What the VAT registry said about the buyer's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryVerdict {
    NotChecked,
    Valid,
    Invalid,
    /// Lookup failed; the format-only decision stands but needs a human look.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaxDecision {
    pub rate: Decimal,
    pub mode: TaxMode,
    pub vat_id: Option<VatId>,
    pub review_required: bool,
}

/// Seller-side tax settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxResolver {
    home_country: String,
    standard_rate: Decimal,
}

impl TaxResolver {
    pub fn new(home_country: &str, standard_rate: Decimal) -> Self {
        Self {
            home_country: home_country.trim().to_ascii_uppercase(),
            standard_rate,
        }
    }

    pub fn home_country(&self) -> &str {
        &self.home_country
    }

    pub fn standard_rate(&self) -> Decimal {
        self.standard_rate
    }

    /// Format-only decision.
    pub fn resolve(&self, buyer: &TaxBuyer<'_>) -> TaxDecision {
        if !buyer.is_business {
            return self.home_rate(TaxMode::PrivateIndividual);
        }

        let country = buyer.country.trim().to_ascii_uppercase();
        if country == self.home_country {
            return self.home_rate(TaxMode::Domestic);
        }

        match self.foreign_vat_id(buyer.vat_number) {
            Some(vat_id) if !country.is_empty() => TaxDecision {
                rate: Decimal::ZERO,
                mode: TaxMode::ReverseCharge,
                vat_id: Some(vat_id),
                review_required: false,
            },
            _ => self.home_rate(TaxMode::DomesticDefault),
        }
    }

    /// Decision refined by a registry lookup of the identifier.
    ///
    /// Only a reverse-charge decision is affected: an identifier the registry
    /// rejects falls back to `domestic_default`; an unavailable registry keeps
    /// the reverse charge and flags the client for review.
    pub fn resolve_with_registry(
        &self,
        buyer: &TaxBuyer<'_>,
        verdict: RegistryVerdict,
    ) -> TaxDecision {
        let decision = self.resolve(buyer);
        if decision.mode != TaxMode::ReverseCharge {
            return decision;
        }

        match verdict {
            RegistryVerdict::NotChecked | RegistryVerdict::Valid => decision,
            RegistryVerdict::Invalid => self.home_rate(TaxMode::DomesticDefault),
            RegistryVerdict::Unavailable => TaxDecision {
                review_required: true,
                ..decision
            },
        }
    }

    /// The identifier that would justify a reverse charge, if any.
    pub fn foreign_vat_id(&self, vat_number: Option<&str>) -> Option<VatId> {
        vat_number
            .and_then(VatId::parse)
            .filter(|id| id.prefix != self.home_country)
    }

    fn home_rate(&self, mode: TaxMode) -> TaxDecision {
        TaxDecision {
            rate: self.standard_rate,
            mode,
            vat_id: None,
            review_required: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::money::{percent_of, round_money};
    use rust_decimal_macros::dec;

    fn resolver() -> TaxResolver {
        TaxResolver::new("LU", dec!(17))
    }

    fn business<'a>(country: &'a str, vat: Option<&'a str>) -> TaxBuyer<'a> {
        TaxBuyer {
            country,
            is_business: true,
            vat_number: vat,
        }
    }

    #[test]
    fn french_business_with_vat_is_reverse_charged() {
        let decision = resolver().resolve(&business("FR", Some("FR12345678")));
        assert_eq!(decision.mode, TaxMode::ReverseCharge);
        assert_eq!(decision.rate, Decimal::ZERO);

        let subtotal = dec!(1000);
        let vat = round_money(percent_of(subtotal, decision.rate));
        assert_eq!(vat, dec!(0));
        assert_eq!(subtotal + vat, dec!(1000));
    }

    #[test]
    fn private_individual_pays_home_rate_even_abroad() {
        let buyer = TaxBuyer {
            country: "FR",
            is_business: false,
            vat_number: Some("FR12345678"),
        };
        let decision = resolver().resolve(&buyer);
        assert_eq!(decision.mode, TaxMode::PrivateIndividual);
        assert_eq!(decision.rate, dec!(17));
    }

    #[test]
    fn domestic_business_pays_home_rate() {
        let decision = resolver().resolve(&business("lu", Some("LU12345678")));
        assert_eq!(decision.mode, TaxMode::Domestic);
        assert_eq!(decision.rate, dec!(17));
    }

    #[test]
    fn missing_or_malformed_vat_falls_back() {
        for vat in [None, Some(""), Some("FR1"), Some("XX123456789"), Some("12FR3456")] {
            let decision = resolver().resolve(&business("FR", vat));
            assert_eq!(decision.mode, TaxMode::DomesticDefault, "vat {:?}", vat);
            assert_eq!(decision.rate, dec!(17));
        }
    }

    #[test]
    fn home_country_vat_id_abroad_is_not_reverse_charged() {
        let decision = resolver().resolve(&business("BE", Some("LU12345678")));
        assert_eq!(decision.mode, TaxMode::DomesticDefault);
    }

    #[test]
    fn vat_format_is_case_and_whitespace_normalized() {
        let id = VatId::parse(" fr 12 345 678 ").unwrap();
        assert_eq!(id.prefix, "FR");
        assert_eq!(id.number, "12345678");
        assert!(VatId::parse("EL123456789").is_some());
        assert!(VatId::parse("DE1234567890123").is_none());
    }

    #[test]
    fn registry_refines_reverse_charge_only() {
        let r = resolver();
        let buyer = business("FR", Some("FR12345678"));

        let invalid = r.resolve_with_registry(&buyer, RegistryVerdict::Invalid);
        assert_eq!(invalid.mode, TaxMode::DomesticDefault);

        let unavailable = r.resolve_with_registry(&buyer, RegistryVerdict::Unavailable);
        assert_eq!(unavailable.mode, TaxMode::ReverseCharge);
        assert!(unavailable.review_required);

        let domestic = r.resolve_with_registry(&business("LU", None), RegistryVerdict::Invalid);
        assert_eq!(domestic.mode, TaxMode::Domestic);
        assert!(!domestic.review_required);
    }
}
