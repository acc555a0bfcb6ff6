//! Operator-driven charges and subscription changes.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::Engine;
use crate::error::{BillingError, Result};
use crate::models::{
    ChargeSource, Client, ClientStatus, CreateCharge, CreateSubscription, OneTimeCharge,
    Subscription,
};
use crate::rules::calendar::{first_day_of_month, same_month};
use crate::rules::{
    cancellation_proration, compute_commission, start_proration, Commission, Proration,
    SubscriptionEvent, SubscriptionState,
};
use crate::services::metrics::record_transition;

#[derive(Debug, Clone, Deserialize)]
pub struct ManualCharge {
    pub description: String,
    pub amount: Decimal,
    #[serde(default)]
    pub tax_rate_override: Option<Decimal>,
    /// `manual` or `usage`.
    #[serde(default = "default_source")]
    pub source: ChargeSource,
}

fn default_source() -> ChargeSource {
    ChargeSource::Manual
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSubscription {
    pub service_type: String,
    pub description: String,
    pub monthly_amount: Decimal,
    #[serde(default)]
    pub tax_rate_override: Option<Decimal>,
    /// Defaults to today.
    #[serde(default)]
    pub started_at: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionAdded {
    pub subscription: Subscription,
    pub proration: Option<OneTimeCharge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminCancellation {
    pub subscription: Subscription,
    pub proration: Option<OneTimeCharge>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionCharged {
    pub commission: Commission,
    /// `None` when the commission is zero.
    pub charge: Option<OneTimeCharge>,
}

fn ensure_chargeable(client: &Client) -> Result<()> {
    if client.status.is_billable() {
        Ok(())
    } else {
        Err(BillingError::IllegalTransition {
            entity: "client",
            from: client.status.as_str(),
            event: "charge_added",
        })
    }
}

pub(super) fn proration_charge(
    subscription: &Subscription,
    proration: &Proration,
    label: &str,
    now: DateTime<Utc>,
) -> OneTimeCharge {
    OneTimeCharge::new(
        CreateCharge {
            client_id: subscription.client_id,
            subscription_id: Some(subscription.subscription_id),
            source: ChargeSource::Proration,
            description: format!(
                "{} ({} {}/{} days)",
                subscription.description, label, proration.days_charged, proration.days_in_month
            ),
            amount: proration.amount,
            tax_rate_override: subscription.tax_rate_override,
        },
        now,
    )
}

impl Engine {
    /// Queue a one-time charge for the client's next invoice.
    #[tracing::instrument(skip(self, input), fields(amount = %input.amount))]
    pub async fn add_charge(&self, client_id: Uuid, input: ManualCharge) -> Result<OneTimeCharge> {
        if input.amount <= Decimal::ZERO {
            return Err(BillingError::Validation(
                "charge amount must be positive".to_string(),
            ));
        }
        if !matches!(input.source, ChargeSource::Manual | ChargeSource::Usage) {
            return Err(BillingError::Validation(format!(
                "charges of source {} are created by the engine",
                input.source.as_str()
            )));
        }

        let client = self.load_client(client_id).await?;
        ensure_chargeable(&client)?;

        let charge = OneTimeCharge::new(
            CreateCharge {
                client_id,
                subscription_id: None,
                source: input.source,
                description: input.description,
                amount: input.amount,
                tax_rate_override: input.tax_rate_override,
            },
            self.now(),
        );
        self.store.insert_charge(&charge).await?;

        tracing::info!(charge_id = %charge.charge_id, client_id = %client_id, "Charge added");
        Ok(charge)
    }

    /// Turn a reported turnover into a commission charge.
    #[tracing::instrument(skip(self))]
    pub async fn report_turnover(
        &self,
        client_id: Uuid,
        turnover: Decimal,
        period: &str,
    ) -> Result<CommissionCharged> {
        let client = self.load_client(client_id).await?;
        ensure_chargeable(&client)?;
        let config = client.commission.as_ref().ok_or_else(|| {
            BillingError::Validation(format!("client {} has no commission model", client_id))
        })?;

        let commission = compute_commission(turnover, config)?;
        if commission.amount.is_zero() {
            return Ok(CommissionCharged {
                commission,
                charge: None,
            });
        }

        let charge = OneTimeCharge::new(
            CreateCharge {
                client_id,
                subscription_id: None,
                source: ChargeSource::Commission,
                description: format!("Commission {} on turnover {}", period, turnover),
                amount: commission.amount,
                tax_rate_override: None,
            },
            self.now(),
        );
        self.store.insert_charge(&charge).await?;

        tracing::info!(
            client_id = %client_id,
            model = config.model_name(),
            amount = %commission.amount,
            "Commission charged"
        );
        Ok(CommissionCharged {
            commission,
            charge: Some(charge),
        })
    }

    /// Add a subscription to an active client, prorating a mid-month start.
    #[tracing::instrument(skip(self, input), fields(service_type = %input.service_type))]
    pub async fn add_subscription(
        &self,
        client_id: Uuid,
        input: NewSubscription,
    ) -> Result<SubscriptionAdded> {
        if input.monthly_amount < Decimal::ZERO {
            return Err(BillingError::Validation(
                "monthly_amount must not be negative".to_string(),
            ));
        }

        let client = self.load_client(client_id).await?;
        if client.status != ClientStatus::Active {
            return Err(BillingError::IllegalTransition {
                entity: "client",
                from: client.status.as_str(),
                event: "subscription_added",
            });
        }

        let now = self.now();
        let today = self.today();
        let subscription = Subscription::new(
            CreateSubscription {
                client_id,
                service_type: input.service_type,
                description: input.description,
                monthly_amount: input.monthly_amount,
                tax_rate_override: input.tax_rate_override,
                started_at: input.started_at.unwrap_or(today),
            },
            now,
        );
        self.store.insert_subscription(&subscription).await?;
        record_transition("subscription", subscription.status.as_str());

        let proration =
            match start_proration(subscription.monthly_amount, subscription.started_at, today) {
                Some(p) => {
                    let charge = proration_charge(&subscription, &p, "prorated", now);
                    self.store.insert_charge(&charge).await?;
                    Some(charge)
                }
                None => None,
            };

        tracing::info!(
            subscription_id = %subscription.subscription_id,
            prorated = proration.is_some(),
            "Subscription added"
        );
        Ok(SubscriptionAdded {
            subscription,
            proration,
        })
    }

    /// Cancel a subscription directly, without the signed-notice path.
    ///
    /// Days used in the current month are charged only when that month's
    /// recurring amount was not already invoiced in advance.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_subscription(
        &self,
        client_id: Uuid,
        subscription_id: Uuid,
        on: Option<NaiveDate>,
    ) -> Result<AdminCancellation> {
        let subscription = self.owned_subscription(client_id, subscription_id).await?;
        let today = self.today();
        let on = on.unwrap_or(today);

        let next = SubscriptionState::of(&subscription)?
            .apply(SubscriptionEvent::AdministrativeCancel { on })?;
        let now = self.now();
        let mut updated = subscription.clone();
        updated.status = next.status();
        updated.cancelled_at = next.cancelled_at();
        updated.updated_utc = now;
        if !self
            .store
            .update_subscription(&updated, subscription.status)
            .await?
        {
            return Err(BillingError::Conflict(format!(
                "subscription {} changed while cancelling",
                subscription_id
            )));
        }
        record_transition("subscription", next.status().as_str());

        let period_start = first_day_of_month(on);
        let owes_days_used = same_month(on, today)
            && subscription.started_at <= period_start
            && !self.billed_this_period(&subscription, period_start).await?;

        let proration = match cancellation_proration(subscription.monthly_amount, on) {
            Some(p) if owes_days_used => {
                let charge = proration_charge(&updated, &p, "used", now);
                self.store.insert_charge(&charge).await?;
                Some(charge)
            }
            _ => None,
        };

        tracing::info!(
            subscription_id = %subscription_id,
            cancelled_on = %on,
            prorated = proration.is_some(),
            "Subscription cancelled"
        );
        Ok(AdminCancellation {
            subscription: updated,
            proration,
        })
    }
}
