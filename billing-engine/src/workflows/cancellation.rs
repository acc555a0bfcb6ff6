//! Two-stage cancellation: initiate with a single-use token, then sign.

use chrono::{DateTime, NaiveDate, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::{best_effort, Engine};
use crate::error::{BillingError, Result};
use crate::models::{
    CancelType, CancellationRequest, Client, ClientStatus, SignerIdentity, Subscription,
    SubscriptionStatus,
};
use crate::rules::calendar::{add_months, end_of_month_after};
use crate::rules::client_state::{self, ClientEvent};
use crate::rules::{SubscriptionEvent, SubscriptionState};
use crate::services::metrics::{record_cancellation, record_transition};
use crate::services::Notification;

const TOKEN_LENGTH: usize = 48;

#[derive(Debug, Clone, Deserialize)]
pub struct InitiateCancellation {
    pub cancel_type: CancelType,
    /// Required for `CancelType::Service`.
    pub subscription_id: Option<Uuid>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancellationInitiated {
    pub request_id: Uuid,
    pub token: String,
    pub signing_url: String,
    /// Provisional until signed.
    pub effective_at: NaiveDate,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelledService {
    pub subscription_id: Uuid,
    pub description: String,
}

/// What the signer sees before signing.
#[derive(Debug, Clone, Serialize)]
pub struct CancellationContext {
    pub request_id: Uuid,
    pub client_id: Uuid,
    pub company_name: String,
    pub cancel_type: CancelType,
    pub service: Option<CancelledService>,
    pub requested_at: DateTime<Utc>,
    pub signed_at: Option<DateTime<Utc>>,
    pub processed: bool,
    /// Final date once signed; otherwise the date a signature today would yield.
    pub effective_at: NaiveDate,
}

fn new_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl Engine {
    fn signing_url(&self, token: &str) -> String {
        format!(
            "{}/cancellations/{}",
            self.settings.public_base_url.trim_end_matches('/'),
            token
        )
    }

    pub(crate) async fn owned_subscription(
        &self,
        client_id: Uuid,
        subscription_id: Uuid,
    ) -> Result<Subscription> {
        self.store
            .get_subscription(subscription_id)
            .await?
            .filter(|s| s.client_id == client_id)
            .ok_or_else(|| BillingError::not_found("subscription", subscription_id))
    }

    /// Open a cancellation request and hand out its signing token.
    ///
    /// A full cancellation moves the client to `pending_cancellation` right
    /// away; a service cancellation leaves the client active.
    #[tracing::instrument(skip(self, input), fields(cancel_type = input.cancel_type.as_str()))]
    pub async fn initiate_cancellation(
        &self,
        client_id: Uuid,
        input: InitiateCancellation,
    ) -> Result<CancellationInitiated> {
        let client = self.load_client(client_id).await?;

        let subscription_id = match input.cancel_type {
            CancelType::Client => {
                client_state::apply(client.status, ClientEvent::CancellationInitiated)?;
                None
            }
            CancelType::Service => {
                client_state::ensure_service_cancellable(client.status)?;
                let subscription_id = input.subscription_id.ok_or_else(|| {
                    BillingError::Validation(
                        "subscription_id is required for a service cancellation".to_string(),
                    )
                })?;
                let subscription = self.owned_subscription(client_id, subscription_id).await?;
                if subscription.status != SubscriptionStatus::Active {
                    return Err(BillingError::IllegalTransition {
                        entity: "subscription",
                        from: subscription.status.as_str(),
                        event: "cancellation_initiated",
                    });
                }
                Some(subscription_id)
            }
        };

        let now = self.now();
        let today = self.today();
        let request = CancellationRequest {
            request_id: Uuid::new_v4(),
            client_id,
            subscription_id,
            cancel_type: input.cancel_type,
            token: new_token(),
            reason: input.reason,
            requested_at: now,
            signed_at: None,
            signer: None,
            effective_at: add_months(today, self.settings.policy.notice_period_months),
            processed: false,
        };
        self.store.insert_cancellation(&request).await?;

        if input.cancel_type == CancelType::Client {
            let mut updated = client.clone();
            updated.status = ClientStatus::PendingCancellation;
            updated.cancellation.requested_at = Some(now);
            updated.cancellation.effective_at = Some(request.effective_at);
            updated.cancellation.signed_at = None;
            updated.cancellation.reason = request.reason.clone();
            updated.updated_utc = now;

            if !self.store.update_client(&updated, client.status).await? {
                // Lost a race with another status change; void the request.
                self.store.mark_cancellation_processed(request.request_id).await?;
                return Err(BillingError::Conflict(format!(
                    "client {} changed status while initiating cancellation",
                    client_id
                )));
            }
            record_transition("client", ClientStatus::PendingCancellation.as_str());
        }

        record_cancellation(input.cancel_type.as_str(), "initiated");
        tracing::info!(
            client_id = %client_id,
            request_id = %request.request_id,
            effective_at = %request.effective_at,
            "Cancellation initiated"
        );

        let signing_url = self.signing_url(&request.token);
        let notification = Notification::CancellationRequested {
            to: client.email.clone(),
            company_name: client.company_name.clone(),
            cancel_type: input.cancel_type,
            signing_url: signing_url.clone(),
            effective_at: request.effective_at,
        };
        best_effort(
            "notify_cancellation_requested",
            self.collaborators.notifier.send(&notification).await,
        );

        Ok(CancellationInitiated {
            request_id: request.request_id,
            token: request.token,
            signing_url,
            effective_at: request.effective_at,
        })
    }

    async fn request_by_token(&self, token: &str) -> Result<CancellationRequest> {
        self.store
            .get_cancellation_by_token(token)
            .await?
            .ok_or_else(|| BillingError::not_found("cancellation", "token"))
    }

    #[tracing::instrument(skip(self, token))]
    pub async fn cancellation_context(&self, token: &str) -> Result<CancellationContext> {
        let request = self.request_by_token(token).await?;
        let client = self.load_client(request.client_id).await?;

        let service = match request.subscription_id {
            Some(id) => self
                .store
                .get_subscription(id)
                .await?
                .map(|s| CancelledService {
                    subscription_id: s.subscription_id,
                    description: s.description,
                }),
            None => None,
        };

        let effective_at = if request.is_signed() {
            request.effective_at
        } else {
            end_of_month_after(self.today(), self.settings.policy.notice_period_months)
        };

        Ok(CancellationContext {
            request_id: request.request_id,
            client_id: client.client_id,
            company_name: client.company_name,
            cancel_type: request.cancel_type,
            service,
            requested_at: request.requested_at,
            signed_at: request.signed_at,
            processed: request.processed,
            effective_at,
        })
    }

    /// Record the one signature a request accepts and fix its effective date.
    #[tracing::instrument(skip(self, token, signer), fields(signer = %signer.email))]
    pub async fn sign_cancellation(
        &self,
        token: &str,
        signer: SignerIdentity,
    ) -> Result<CancellationContext> {
        let request = self.request_by_token(token).await?;
        if request.is_signed() || request.processed {
            return Err(BillingError::Conflict(
                "cancellation has already been signed".to_string(),
            ));
        }

        let now = self.now();
        let effective_at =
            end_of_month_after(self.today(), self.settings.policy.notice_period_months);
        if !self
            .store
            .sign_cancellation(request.request_id, now, &signer, effective_at)
            .await?
        {
            return Err(BillingError::Conflict(
                "cancellation has already been signed".to_string(),
            ));
        }

        let client = self.load_client(request.client_id).await?;
        match request.cancel_type {
            CancelType::Client => self.mirror_signature(&client, now, effective_at).await?,
            CancelType::Service => {
                if let Some(subscription_id) = request.subscription_id {
                    self.pause_subscription(&request, subscription_id, effective_at)
                        .await?;
                }
            }
        }

        record_cancellation(request.cancel_type.as_str(), "signed");
        tracing::info!(
            client_id = %client.client_id,
            request_id = %request.request_id,
            effective_at = %effective_at,
            "Cancellation signed"
        );

        let notification = Notification::CancellationSigned {
            to: client.email.clone(),
            company_name: client.company_name.clone(),
            cancel_type: request.cancel_type,
            effective_at,
        };
        best_effort(
            "notify_cancellation_signed",
            self.collaborators.notifier.send(&notification).await,
        );

        self.cancellation_context(token).await
    }

    async fn mirror_signature(
        &self,
        client: &Client,
        signed_at: DateTime<Utc>,
        effective_at: NaiveDate,
    ) -> Result<()> {
        let mut updated = client.clone();
        updated.cancellation.signed_at = Some(signed_at);
        updated.cancellation.effective_at = Some(effective_at);
        updated.updated_utc = signed_at;

        if !self.store.update_client(&updated, client.status).await? {
            tracing::warn!(
                client_id = %client.client_id,
                "Client changed while recording cancellation signature"
            );
        }
        Ok(())
    }

    pub(crate) async fn pause_subscription(
        &self,
        request: &CancellationRequest,
        subscription_id: Uuid,
        effective_at: NaiveDate,
    ) -> Result<()> {
        let subscription = self.owned_subscription(request.client_id, subscription_id).await?;
        let state = SubscriptionState::of(&subscription)?;

        if let SubscriptionState::Cancelled { .. } = state {
            // Cancelled by other means in the meantime; nothing left to pause.
            self.store.mark_cancellation_processed(request.request_id).await?;
            tracing::warn!(
                subscription_id = %subscription_id,
                "Signed service cancellation targets an already cancelled subscription"
            );
            return Ok(());
        }

        let next = state.apply(SubscriptionEvent::CancellationSigned { effective_at })?;
        let mut updated = subscription.clone();
        updated.status = next.status();
        updated.cancelled_at = next.cancelled_at();
        updated.updated_utc = self.now();

        if !self
            .store
            .update_subscription(&updated, subscription.status)
            .await?
        {
            return Err(BillingError::Conflict(format!(
                "subscription {} changed while pausing",
                subscription_id
            )));
        }
        record_transition("subscription", next.status().as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_long_and_distinct() {
        let a = new_token();
        let b = new_token();
        assert_eq!(a.len(), TOKEN_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }
}
