//! Scheduled cancellation sweep.
//!
//! Safe to re-run: every step is guarded by the entity's current status or
//! the request's `processed` flag, and the client is flipped last so an
//! interrupted pass is picked up again by the next one.

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use super::engine::{best_effort, Engine};
use super::EntityFailure;
use crate::error::{BillingError, Result};
use crate::models::{
    CancelType, Client, ClientStatus, MandateStatus, PaymentMethod, Subscription,
    SubscriptionStatus,
};
use crate::rules::client_state::{self, ClientEvent};
use crate::rules::{SubscriptionEvent, SubscriptionState};
use crate::services::metrics::{record_error, record_transition};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepSummary {
    pub today: Option<NaiveDate>,
    pub clients_deactivated: u32,
    /// Pending clients whose cancellation is unsigned or not yet due.
    pub clients_waiting: u32,
    pub subscriptions_cancelled: u32,
    pub mandates_cancelled: u32,
    pub failures: Vec<EntityFailure>,
}

enum ClientSweep {
    Deactivated {
        subscriptions_cancelled: u32,
        mandate_cancelled: bool,
    },
    Waiting,
}

impl Engine {
    #[tracing::instrument(skip(self))]
    pub async fn run_cancellation_sweep(&self) -> Result<SweepSummary> {
        let today = self.today();
        let mut summary = SweepSummary {
            today: Some(today),
            ..Default::default()
        };

        let pending = self
            .store
            .list_clients_by_status(&[ClientStatus::PendingCancellation])
            .await?;

        for client in pending {
            let client_id = client.client_id;
            match self.sweep_client(client, today).await {
                Ok(ClientSweep::Deactivated {
                    subscriptions_cancelled,
                    mandate_cancelled,
                }) => {
                    summary.clients_deactivated += 1;
                    summary.subscriptions_cancelled += subscriptions_cancelled;
                    if mandate_cancelled {
                        summary.mandates_cancelled += 1;
                    }
                }
                Ok(ClientSweep::Waiting) => summary.clients_waiting += 1,
                Err(e) => {
                    tracing::error!(client_id = %client_id, error = %e, "Client sweep failed");
                    record_error(e.kind(), "sweep_client");
                    summary.failures.push(EntityFailure::new(client_id, &e));
                }
            }
        }

        let paused = self
            .store
            .list_subscriptions_by_status(SubscriptionStatus::Paused)
            .await?;

        for subscription in paused {
            let subscription_id = subscription.subscription_id;
            match self.sweep_paused(subscription, today).await {
                Ok(true) => summary.subscriptions_cancelled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        subscription_id = %subscription_id,
                        error = %e,
                        "Subscription sweep failed"
                    );
                    record_error(e.kind(), "sweep_subscription");
                    summary.failures.push(EntityFailure::new(subscription_id, &e));
                }
            }
        }

        tracing::info!(
            deactivated = summary.clients_deactivated,
            waiting = summary.clients_waiting,
            subscriptions_cancelled = summary.subscriptions_cancelled,
            failures = summary.failures.len(),
            "Cancellation sweep finished"
        );
        Ok(summary)
    }

    async fn sweep_client(&self, client: Client, today: NaiveDate) -> Result<ClientSweep> {
        let request = self
            .store
            .find_open_cancellation(client.client_id, CancelType::Client)
            .await?;

        // The open request is authoritative; the client's mirror covers a
        // pass interrupted after the request was processed.
        let (signed, effective_at) = match &request {
            Some(r) => (r.is_signed(), Some(r.effective_at)),
            None => (
                client.cancellation.signed_at.is_some(),
                client.cancellation.effective_at,
            ),
        };
        let effective_at = match effective_at {
            Some(date) if signed && date <= today => date,
            _ => return Ok(ClientSweep::Waiting),
        };

        let next = client_state::apply(
            client.status,
            ClientEvent::CancellationEffective {
                today,
                effective_at,
            },
        )?;

        let mut subscriptions_cancelled = 0;
        for subscription in self.store.list_subscriptions(client.client_id).await? {
            if self
                .cancel_for_deactivation(subscription, effective_at)
                .await?
            {
                subscriptions_cancelled += 1;
            }
        }

        if let Some(open_service) = self
            .store
            .find_open_cancellation(client.client_id, CancelType::Service)
            .await?
        {
            self.store
                .mark_cancellation_processed(open_service.request_id)
                .await?;
        }

        let mandate_cancelled = self.cancel_mandate(client.client_id).await?;

        if let Some(r) = &request {
            self.store.mark_cancellation_processed(r.request_id).await?;
        }

        let mut updated = client.clone();
        updated.status = next;
        if mandate_cancelled && updated.payment_method == PaymentMethod::DirectDebit {
            updated.payment_method = PaymentMethod::BankTransfer;
        }
        updated.updated_utc = self.now();
        if !self.store.update_client(&updated, client.status).await? {
            return Err(BillingError::Conflict(format!(
                "client {} changed during sweep",
                client.client_id
            )));
        }

        record_transition("client", next.as_str());
        tracing::info!(
            client_id = %client.client_id,
            effective_at = %effective_at,
            subscriptions_cancelled,
            "Client deactivated"
        );

        Ok(ClientSweep::Deactivated {
            subscriptions_cancelled,
            mandate_cancelled,
        })
    }

    async fn cancel_for_deactivation(
        &self,
        subscription: Subscription,
        on: NaiveDate,
    ) -> Result<bool> {
        if !subscription.status.is_billable() {
            return Ok(false);
        }

        let next = SubscriptionState::of(&subscription)?
            .apply(SubscriptionEvent::ClientDeactivated { on })?;
        let mut updated = subscription.clone();
        updated.status = next.status();
        updated.cancelled_at = next.cancelled_at();
        updated.updated_utc = self.now();

        let applied = self
            .store
            .update_subscription(&updated, subscription.status)
            .await?;
        if applied {
            record_transition("subscription", next.status().as_str());
        }
        Ok(applied)
    }

    /// Mark the client's live mandate cancelled, telling the processor when it
    /// knows the mandate.
    async fn cancel_mandate(&self, client_id: Uuid) -> Result<bool> {
        let Some(mut mandate) = self.store.get_mandate_for_client(client_id).await? else {
            return Ok(false);
        };
        if !matches!(
            mandate.status,
            MandateStatus::Active | MandateStatus::PendingAuthorization
        ) {
            return Ok(false);
        }

        if let Some(external_id) = mandate.external_id.as_deref() {
            best_effort(
                "cancel_mandate",
                self.collaborators.direct_debit.cancel_mandate(external_id).await,
            );
        }

        mandate.status = MandateStatus::Cancelled;
        mandate.updated_utc = self.now();
        self.store.update_mandate(&mandate).await?;
        Ok(true)
    }

    async fn sweep_paused(&self, subscription: Subscription, today: NaiveDate) -> Result<bool> {
        let state = SubscriptionState::of(&subscription)?;
        match state {
            SubscriptionState::Paused { cancel_on } if cancel_on <= today => {}
            _ => return Ok(false),
        }

        let next = state.apply(SubscriptionEvent::EffectiveDateReached { today })?;
        let mut updated = subscription.clone();
        updated.status = next.status();
        updated.cancelled_at = next.cancelled_at();
        updated.updated_utc = self.now();

        if !self
            .store
            .update_subscription(&updated, subscription.status)
            .await?
        {
            return Ok(false);
        }
        record_transition("subscription", next.status().as_str());

        if let Some(request) = self
            .store
            .find_open_cancellation(subscription.client_id, CancelType::Service)
            .await?
            .filter(|r| r.subscription_id == Some(subscription.subscription_id))
        {
            self.store
                .mark_cancellation_processed(request.request_id)
                .await?;
        }

        tracing::info!(
            subscription_id = %subscription.subscription_id,
            cancel_on = ?next.cancelled_at(),
            "Paused subscription cancelled"
        );
        Ok(true)
    }
}
