//! From signed quote to active client.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::charges::proration_charge;
use super::engine::{best_effort, Engine};
use super::WebhookOutcome;
use crate::error::{BillingError, Result};
use crate::models::{
    ChargeSource, Client, ClientProfile, ClientStatus, CreateCharge, CreateSubscription,
    OneTimeCharge, Project, ProjectTask, Quote, QuoteLine, QuoteStatus, Subscription,
};
use crate::rules::client_state::{self, ClientEvent};
use crate::rules::start_proration;
use crate::services::accounting::ContactProfile;
use crate::services::metrics::{record_transition, record_webhook_event};
use crate::services::signing::{
    Signer, SigningDocument, SigningEvent, SigningSession, QUOTE_NUMBER_KEY,
};

const SIGNING_SOURCE: &str = "signing";

/// Tasks every onboarding project starts with.
const ONBOARDING_TASKS: [&str; 3] = [
    "Kick-off call",
    "Collect access credentials",
    "Verify billing details",
];

#[derive(Debug, Clone, Deserialize)]
pub struct NewQuote {
    /// Generated when absent.
    #[serde(default)]
    pub quote_number: Option<String>,
    /// An existing client buying more; `None` for a prospect.
    #[serde(default)]
    pub client_id: Option<Uuid>,
    pub profile: ClientProfile,
    pub lines: Vec<QuoteLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Confirmation {
    pub client_id: Uuid,
    pub project_id: Option<Uuid>,
    pub subscriptions: Vec<Subscription>,
    pub charges: Vec<OneTimeCharge>,
}

fn project_for(client: &Client, quote: &Quote, now: DateTime<Utc>) -> Project {
    let tasks = ONBOARDING_TASKS
        .iter()
        .map(|title| title.to_string())
        .chain(quote.lines.iter().map(|l| format!("Set up {}", l.description)))
        .map(|title| ProjectTask { title, done: false })
        .collect();

    Project {
        project_id: Uuid::new_v4(),
        client_id: client.client_id,
        quote_id: quote.quote_id,
        name: format!("{} onboarding ({})", client.company_name, quote.quote_number),
        tasks,
        created_utc: now,
    }
}

fn generate_quote_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(char::from)
        .collect();
    format!("Q-{}-{}", now.format("%Y%m%d"), suffix.to_ascii_uppercase())
}

impl Engine {
    /// Record a draft quote.
    #[tracing::instrument(skip(self, input), fields(company = %input.profile.company_name))]
    pub async fn create_quote(&self, input: NewQuote) -> Result<Quote> {
        if input.lines.is_empty() {
            return Err(BillingError::Validation(
                "a quote needs at least one line".to_string(),
            ));
        }
        if input.lines.iter().any(|l| l.amount < Decimal::ZERO) {
            return Err(BillingError::Validation(
                "quote line amounts must not be negative".to_string(),
            ));
        }
        if let Some(client_id) = input.client_id {
            self.load_client(client_id).await?;
        }

        let now = self.now();
        let quote_number = input
            .quote_number
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| generate_quote_number(now));
        if self.store.get_quote_by_number(&quote_number).await?.is_some() {
            return Err(BillingError::Conflict(format!(
                "quote number {} is already used",
                quote_number
            )));
        }

        let quote = Quote {
            quote_id: Uuid::new_v4(),
            quote_number,
            client_id: input.client_id,
            profile: input.profile,
            lines: input.lines,
            status: QuoteStatus::Draft,
            signing_session: None,
            signed_at: None,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_quote(&quote).await?;
        record_transition("quote", quote.status.as_str());

        tracing::info!(quote_number = %quote.quote_number, "Quote created");
        Ok(quote)
    }

    /// Open an e-signature session for a draft quote.
    #[tracing::instrument(skip(self))]
    pub async fn send_quote_for_signature(&self, quote_number: &str) -> Result<SigningSession> {
        let quote = self
            .store
            .get_quote_by_number(quote_number)
            .await?
            .ok_or_else(|| BillingError::not_found("quote", quote_number))?;
        if quote.status != QuoteStatus::Draft {
            return Err(BillingError::IllegalTransition {
                entity: "quote",
                from: quote.status.as_str(),
                event: "sent_for_signature",
            });
        }

        let documents = vec![SigningDocument {
            name: format!("quote-{}.pdf", quote.quote_number),
            url: format!(
                "{}/quotes/{}/document",
                self.settings.public_base_url.trim_end_matches('/'),
                quote.quote_number
            ),
            metadata: HashMap::from([(
                QUOTE_NUMBER_KEY.to_string(),
                quote.quote_number.clone(),
            )]),
        }];
        let signer = Signer {
            name: quote.profile.contact_name.clone(),
            email: quote.profile.email.clone(),
        };

        let session = self
            .critical("init_signing_session", || {
                self.collaborators
                    .signing
                    .init_signing_session(&documents, &signer)
            })
            .await?;

        let mut updated = quote.clone();
        updated.status = QuoteStatus::SentForSignature;
        updated.signing_session = Some(session.slug.clone());
        updated.updated_utc = self.now();
        if !self.store.update_quote(&updated, quote.status).await? {
            return Err(BillingError::Conflict(format!(
                "quote {} changed while sending",
                quote_number
            )));
        }

        tracing::info!(
            quote_number = %quote_number,
            slug = %session.slug,
            "Quote sent for signature"
        );
        Ok(session)
    }

    /// Handle an e-signature webhook event. Redeliveries are no-ops.
    #[tracing::instrument(
        skip(self, event),
        fields(event_id = %event.event_id, event_type = %event.event_type)
    )]
    pub async fn handle_signing_event(&self, event: SigningEvent) -> Result<WebhookOutcome> {
        if self
            .store
            .is_event_processed(SIGNING_SOURCE, &event.event_id)
            .await?
        {
            record_webhook_event(SIGNING_SOURCE, WebhookOutcome::Duplicate.as_str());
            return Ok(WebhookOutcome::Duplicate);
        }

        let outcome = self.apply_signing_event(&event).await?;

        self.store
            .mark_event_processed(SIGNING_SOURCE, &event.event_id, self.now())
            .await?;
        record_webhook_event(SIGNING_SOURCE, outcome.as_str());
        Ok(outcome)
    }

    async fn apply_signing_event(&self, event: &SigningEvent) -> Result<WebhookOutcome> {
        if event.event_type != SigningEvent::SUBMISSION_COMPLETED {
            tracing::debug!("Unhandled signing event type");
            return Ok(WebhookOutcome::Ignored);
        }

        let Some(quote_number) = event.quote_number() else {
            tracing::warn!(
                submission_id = %event.data.submission_id,
                "Signed submission carries no quote number"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let Some(quote) = self.store.get_quote_by_number(quote_number).await? else {
            tracing::warn!(
                quote_number = %quote_number,
                "Signed submission references an unknown quote"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let signed_at = event.data.completed_at.unwrap_or_else(|| self.now());
        self.record_quote_signature(quote, signed_at).await
    }

    async fn record_quote_signature(
        &self,
        quote: Quote,
        signed_at: DateTime<Utc>,
    ) -> Result<WebhookOutcome> {
        let quote = match quote.status {
            QuoteStatus::Draft | QuoteStatus::SentForSignature => {
                // The client id is fixed on the quote first so a retried
                // delivery reuses it.
                let mut signed = quote.clone();
                signed.client_id = Some(quote.client_id.unwrap_or_else(Uuid::new_v4));
                signed.status = QuoteStatus::Signed;
                signed.signed_at = Some(signed_at);
                signed.updated_utc = self.now();
                if !self.store.update_quote(&signed, quote.status).await? {
                    return Ok(WebhookOutcome::Duplicate);
                }
                signed
            }
            QuoteStatus::Signed => quote,
            QuoteStatus::Accepted => return Ok(WebhookOutcome::Ignored),
        };

        let client_id = quote
            .client_id
            .ok_or_else(|| BillingError::store(anyhow::anyhow!("signed quote has no client")))?;

        match self.store.get_client(client_id).await? {
            Some(client) if client.status == ClientStatus::Prospect => {
                let mut updated = client.clone();
                updated.status = client_state::apply(client.status, ClientEvent::QuoteSigned)?;
                updated.updated_utc = self.now();
                if self.store.update_client(&updated, client.status).await? {
                    record_transition("client", updated.status.as_str());
                }
            }
            Some(client) => {
                tracing::debug!(
                    client_id = %client_id,
                    status = client.status.as_str(),
                    "Client already past signature"
                );
            }
            None => {
                let status = client_state::apply(ClientStatus::Prospect, ClientEvent::QuoteSigned)?;
                let mut client = Client::new(
                    quote.profile.clone().into_create_client(status),
                    self.now(),
                );
                client.client_id = client_id;
                self.store.insert_client(&client).await?;
                record_transition("client", status.as_str());
            }
        }

        tracing::info!(
            quote_number = %quote.quote_number,
            client_id = %client_id,
            "Quote signed, client awaiting confirmation"
        );
        Ok(WebhookOutcome::Processed)
    }

    /// Confirm a signed client: activate it and materialize what the quote sold.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_client(&self, client_id: Uuid) -> Result<Confirmation> {
        let client = self.load_client(client_id).await?;
        let next = client_state::apply(client.status, ClientEvent::Confirmed)?;
        let quote = self
            .store
            .find_quote_for_client(client_id)
            .await?
            .filter(|q| q.status == QuoteStatus::Signed);

        let now = self.now();
        let today = self.today();

        let mut activated = client.clone();
        activated.status = next;
        activated.updated_utc = now;
        if !self.store.update_client(&activated, client.status).await? {
            return Err(BillingError::Conflict(format!(
                "client {} is already confirmed",
                client_id
            )));
        }
        record_transition("client", next.as_str());

        let mut subscriptions = Vec::new();
        let mut charges = Vec::new();
        let mut project_id = None;

        if let Some(quote) = &quote {
            for line in &quote.lines {
                if line.recurring {
                    let subscription = Subscription::new(
                        CreateSubscription {
                            client_id,
                            service_type: line.service_type.clone(),
                            description: line.description.clone(),
                            monthly_amount: line.amount,
                            tax_rate_override: line.tax_rate_override,
                            started_at: today,
                        },
                        now,
                    );
                    self.store.insert_subscription(&subscription).await?;

                    if let Some(proration) =
                        start_proration(subscription.monthly_amount, subscription.started_at, today)
                    {
                        let charge = proration_charge(&subscription, &proration, "prorated", now);
                        self.store.insert_charge(&charge).await?;
                        charges.push(charge);
                    }
                    subscriptions.push(subscription);
                } else if !line.amount.is_zero() {
                    let charge = OneTimeCharge::new(
                        CreateCharge {
                            client_id,
                            subscription_id: None,
                            source: ChargeSource::Quote,
                            description: line.description.clone(),
                            amount: line.amount,
                            tax_rate_override: line.tax_rate_override,
                        },
                        now,
                    );
                    self.store.insert_charge(&charge).await?;
                    charges.push(charge);
                }
            }

            let project = project_for(&activated, quote, now);
            match self.store.insert_project(&project).await {
                Ok(()) => project_id = Some(project.project_id),
                Err(e) => tracing::warn!(
                    client_id = %client_id,
                    error = %e,
                    "Project provisioning failed, continuing"
                ),
            }

            let mut accepted = quote.clone();
            accepted.status = QuoteStatus::Accepted;
            accepted.updated_utc = now;
            self.store.update_quote(&accepted, QuoteStatus::Signed).await?;
        }

        self.attach_accounting_contact(&mut activated).await?;

        tracing::info!(
            client_id = %client_id,
            subscriptions = subscriptions.len(),
            charges = charges.len(),
            "Client confirmed"
        );

        Ok(Confirmation {
            client_id,
            project_id,
            subscriptions,
            charges,
        })
    }

    /// Best-effort lookup of the ledger contact, stored on the client.
    async fn attach_accounting_contact(&self, client: &mut Client) -> Result<Option<String>> {
        if client.accounting_contact_id.is_some() {
            return Ok(client.accounting_contact_id.clone());
        }

        let profile = contact_profile(client);
        let Some(contact_id) = best_effort(
            "get_or_create_contact",
            self.collaborators.ledger.get_or_create_contact(&profile).await,
        ) else {
            return Ok(None);
        };

        self.store_contact_id(client, &contact_id).await?;
        Ok(Some(contact_id))
    }

    pub(crate) async fn store_contact_id(
        &self,
        client: &mut Client,
        contact_id: &str,
    ) -> Result<()> {
        client.accounting_contact_id = Some(contact_id.to_string());
        client.updated_utc = self.now();
        if !self.store.update_client(client, client.status).await? {
            tracing::warn!(
                client_id = %client.client_id,
                "Client changed before contact id was stored"
            );
        }
        Ok(())
    }
}

pub(crate) fn contact_profile(client: &Client) -> ContactProfile {
    ContactProfile {
        company_name: client.company_name.clone(),
        contact_name: client.contact_name.clone(),
        email: client.email.clone(),
        country: client.country.clone(),
        vat_number: client.vat_number.clone(),
    }
}
