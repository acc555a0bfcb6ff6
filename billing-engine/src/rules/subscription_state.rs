//! Subscription lifecycle.
//!
//! ```text
//! active ──signed partial cancellation──▶ paused ──effective date──▶ cancelled
//!    └───────────── administrative / client deactivation ───────────────┘
//! ```
//! `cancelled` is terminal.

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::{BillingError, Result};
use crate::models::{Subscription, SubscriptionStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubscriptionState {
    Active,
    /// Billing continues until `cancel_on`.
    Paused { cancel_on: NaiveDate },
    Cancelled { on: Option<NaiveDate> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// A partial cancellation was signed.
    CancellationSigned { effective_at: NaiveDate },
    /// The sweep found the pause has run out.
    EffectiveDateReached { today: NaiveDate },
    /// Direct cancellation by an operator.
    AdministrativeCancel { on: NaiveDate },
    /// The owning client became inactive.
    ClientDeactivated { on: NaiveDate },
}

impl SubscriptionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SubscriptionEvent::CancellationSigned { .. } => "cancellation_signed",
            SubscriptionEvent::EffectiveDateReached { .. } => "effective_date_reached",
            SubscriptionEvent::AdministrativeCancel { .. } => "administrative_cancel",
            SubscriptionEvent::ClientDeactivated { .. } => "client_deactivated",
        }
    }
}

impl SubscriptionState {
    /// Read the state from stored fields.
    pub fn of(subscription: &Subscription) -> Result<Self> {
        match (subscription.status, subscription.cancelled_at) {
            (SubscriptionStatus::Active, _) => Ok(SubscriptionState::Active),
            (SubscriptionStatus::Paused, Some(cancel_on)) => {
                Ok(SubscriptionState::Paused { cancel_on })
            }
            (SubscriptionStatus::Paused, None) => Err(BillingError::store(anyhow::anyhow!(
                "paused subscription {} has no cancellation date",
                subscription.subscription_id
            ))),
            (SubscriptionStatus::Cancelled, on) => Ok(SubscriptionState::Cancelled { on }),
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        match self {
            SubscriptionState::Active => SubscriptionStatus::Active,
            SubscriptionState::Paused { .. } => SubscriptionStatus::Paused,
            SubscriptionState::Cancelled { .. } => SubscriptionStatus::Cancelled,
        }
    }

    pub fn cancelled_at(&self) -> Option<NaiveDate> {
        match self {
            SubscriptionState::Active => None,
            SubscriptionState::Paused { cancel_on } => Some(*cancel_on),
            SubscriptionState::Cancelled { on } => *on,
        }
    }

    /// The single transition function; everything not listed is illegal.
    pub fn apply(self, event: SubscriptionEvent) -> Result<Self> {
        use SubscriptionEvent as E;
        use SubscriptionState as S;

        match (self, event) {
            (S::Active, E::CancellationSigned { effective_at }) => Ok(S::Paused {
                cancel_on: effective_at,
            }),
            (S::Paused { cancel_on }, E::EffectiveDateReached { today }) if today >= cancel_on => {
                Ok(S::Cancelled {
                    on: Some(cancel_on),
                })
            }
            (S::Active, E::AdministrativeCancel { on }) => Ok(S::Cancelled { on: Some(on) }),
            (S::Active | S::Paused { .. }, E::ClientDeactivated { on }) => {
                Ok(S::Cancelled { on: Some(on) })
            }
            (from, event) => Err(BillingError::IllegalTransition {
                entity: "subscription",
                from: from.status().as_str(),
                event: event.name(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn soft_path_pauses_then_cancels_on_the_effective_date() {
        let paused = SubscriptionState::Active
            .apply(SubscriptionEvent::CancellationSigned {
                effective_at: d(2025, 3, 31),
            })
            .unwrap();
        assert_eq!(paused.status(), SubscriptionStatus::Paused);
        assert_eq!(paused.cancelled_at(), Some(d(2025, 3, 31)));

        let early = paused.apply(SubscriptionEvent::EffectiveDateReached {
            today: d(2025, 3, 30),
        });
        assert!(matches!(early, Err(BillingError::IllegalTransition { .. })));

        let cancelled = paused
            .apply(SubscriptionEvent::EffectiveDateReached {
                today: d(2025, 3, 31),
            })
            .unwrap();
        assert_eq!(cancelled.status(), SubscriptionStatus::Cancelled);
    }

    #[test]
    fn administrative_cancel_is_direct_from_active_only() {
        let on = d(2025, 4, 10);
        let cancelled = SubscriptionState::Active
            .apply(SubscriptionEvent::AdministrativeCancel { on })
            .unwrap();
        assert_eq!(cancelled, SubscriptionState::Cancelled { on: Some(on) });

        let paused = SubscriptionState::Paused {
            cancel_on: d(2025, 5, 31),
        };
        assert!(paused
            .apply(SubscriptionEvent::AdministrativeCancel { on })
            .is_err());
    }

    #[test]
    fn cancelled_is_terminal() {
        let cancelled = SubscriptionState::Cancelled {
            on: Some(d(2025, 1, 31)),
        };
        let events = [
            SubscriptionEvent::CancellationSigned {
                effective_at: d(2025, 3, 31),
            },
            SubscriptionEvent::EffectiveDateReached {
                today: d(2025, 6, 1),
            },
            SubscriptionEvent::AdministrativeCancel { on: d(2025, 6, 1) },
            SubscriptionEvent::ClientDeactivated { on: d(2025, 6, 1) },
        ];
        for event in events {
            let err = cancelled.apply(event).unwrap_err();
            assert!(
                matches!(err, BillingError::IllegalTransition { from: "cancelled", .. }),
                "{:?}",
                event
            );
        }
    }

    #[test]
    fn pause_cannot_be_signed_twice() {
        let paused = SubscriptionState::Paused {
            cancel_on: d(2025, 3, 31),
        };
        assert!(paused
            .apply(SubscriptionEvent::CancellationSigned {
                effective_at: d(2025, 4, 30)
            })
            .is_err());
    }
}
