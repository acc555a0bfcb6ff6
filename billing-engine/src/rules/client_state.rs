//! Client lifecycle.
//!
//! ```text
//! prospect ─▶ pending_confirmation ─▶ active ─▶ pending_cancellation ─▶ inactive
//! ```
//! `active → pending_cancellation` is the only way into cancellation and
//! `pending_cancellation → inactive` the only way out, gated by the
//! effective date.

use chrono::NaiveDate;

use crate::error::{BillingError, Result};
use crate::models::ClientStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// The quote was signed by a prospect.
    QuoteSigned,
    /// An operator confirmed the signed quote.
    Confirmed,
    /// A full cancellation was initiated.
    CancellationInitiated,
    /// The sweep reached a signed cancellation's effective date.
    CancellationEffective {
        today: NaiveDate,
        effective_at: NaiveDate,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::QuoteSigned => "quote_signed",
            ClientEvent::Confirmed => "confirmed",
            ClientEvent::CancellationInitiated => "cancellation_initiated",
            ClientEvent::CancellationEffective { .. } => "cancellation_effective",
        }
    }
}

/// The single transition function for client status.
pub fn apply(from: ClientStatus, event: ClientEvent) -> Result<ClientStatus> {
    use ClientEvent as E;
    use ClientStatus as S;

    match (from, event) {
        (S::Prospect, E::QuoteSigned) => Ok(S::PendingConfirmation),
        (S::PendingConfirmation, E::Confirmed) => Ok(S::Active),
        (S::Active, E::CancellationInitiated) => Ok(S::PendingCancellation),
        (
            S::PendingCancellation,
            E::CancellationEffective {
                today,
                effective_at,
            },
        ) if today >= effective_at => Ok(S::Inactive),
        (from, event) => Err(BillingError::IllegalTransition {
            entity: "client",
            from: from.as_str(),
            event: event.name(),
        }),
    }
}

/// Whether a service-level cancellation may be opened for a client.
///
/// Only active clients can drop single services; a client already leaving
/// (or gone) has nothing left to cancel piecemeal.
pub fn ensure_service_cancellable(status: ClientStatus) -> Result<()> {
    match status {
        ClientStatus::Active => Ok(()),
        other => Err(BillingError::IllegalTransition {
            entity: "client",
            from: other.as_str(),
            event: "service_cancellation_initiated",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn happy_path_walks_every_state() {
        let s = apply(ClientStatus::Prospect, ClientEvent::QuoteSigned).unwrap();
        let s = apply(s, ClientEvent::Confirmed).unwrap();
        let s = apply(s, ClientEvent::CancellationInitiated).unwrap();
        assert_eq!(s, ClientStatus::PendingCancellation);
        let s = apply(
            s,
            ClientEvent::CancellationEffective {
                today: d(2025, 3, 31),
                effective_at: d(2025, 3, 31),
            },
        )
        .unwrap();
        assert_eq!(s, ClientStatus::Inactive);
    }

    #[test]
    fn double_confirmation_is_rejected() {
        let err = apply(ClientStatus::Active, ClientEvent::Confirmed).unwrap_err();
        assert!(matches!(
            err,
            BillingError::IllegalTransition {
                from: "active",
                event: "confirmed",
                ..
            }
        ));
    }

    #[test]
    fn cancellation_only_from_active() {
        for from in [
            ClientStatus::Prospect,
            ClientStatus::PendingConfirmation,
            ClientStatus::PendingCancellation,
            ClientStatus::Inactive,
        ] {
            assert!(apply(from, ClientEvent::CancellationInitiated).is_err(), "{:?}", from);
        }
    }

    #[test]
    fn deactivation_waits_for_effective_date() {
        let early = apply(
            ClientStatus::PendingCancellation,
            ClientEvent::CancellationEffective {
                today: d(2025, 3, 30),
                effective_at: d(2025, 3, 31),
            },
        );
        assert!(early.is_err());

        let from_active = apply(
            ClientStatus::Active,
            ClientEvent::CancellationEffective {
                today: d(2025, 4, 1),
                effective_at: d(2025, 3, 31),
            },
        );
        assert!(from_active.is_err());
    }

    #[test]
    fn inactive_is_terminal() {
        for event in [
            ClientEvent::QuoteSigned,
            ClientEvent::Confirmed,
            ClientEvent::CancellationInitiated,
        ] {
            assert!(apply(ClientStatus::Inactive, event).is_err());
        }
    }

    #[test]
    fn service_cancellation_needs_an_active_client() {
        assert!(ensure_service_cancellable(ClientStatus::Active).is_ok());
        assert!(ensure_service_cancellable(ClientStatus::PendingCancellation).is_err());
        assert!(ensure_service_cancellable(ClientStatus::Inactive).is_err());
    }
}
