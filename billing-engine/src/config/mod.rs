//! Configuration module for billing-engine.

use rust_decimal::Decimal;
use secrecy::Secret;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

use crate::rules::reconcile::DEFAULT_TOLERANCE_PERCENT;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: core_config::Config,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    /// `None` runs on the in-memory store.
    pub database: Option<DatabaseConfig>,
    pub tax: TaxConfig,
    pub billing: BillingPolicy,
    pub public_base_url: String,
    pub accounting: CollaboratorConfig,
    pub direct_debit: WebhookCollaboratorConfig,
    pub signing: WebhookCollaboratorConfig,
    pub vat_registry: CollaboratorConfig,
    /// `None` logs notifications instead of sending them.
    pub notifications: Option<CollaboratorConfig>,
    pub scheduler_interval_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub run_migrations: bool,
}

#[derive(Debug, Clone)]
pub struct TaxConfig {
    pub home_country: String,
    pub standard_rate: Decimal,
}

#[derive(Debug, Clone)]
pub struct BillingPolicy {
    pub currency: String,
    pub notice_period_months: u32,
    pub payment_terms_days: u32,
    pub reconciliation_tolerance_percent: Decimal,
    /// Clients invoiced in parallel by the monthly run.
    pub invoicing_concurrency: usize,
    /// A period claimed longer ago than this is treated as abandoned and may
    /// be claimed again.
    pub invoicing_claim_lease: chrono::Duration,
}

impl Default for BillingPolicy {
    fn default() -> Self {
        Self {
            currency: "EUR".to_string(),
            notice_period_months: 2,
            payment_terms_days: 14,
            reconciliation_tolerance_percent: DEFAULT_TOLERANCE_PERCENT,
            invoicing_concurrency: 8,
            invoicing_claim_lease: chrono::Duration::minutes(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollaboratorConfig {
    pub url: String,
    pub api_key: Option<Secret<String>>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct WebhookCollaboratorConfig {
    pub api: CollaboratorConfig,
    pub webhook_secret: Secret<String>,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn required(name: &str) -> Result<String, AppError> {
    env::var(name).map_err(|_| AppError::ConfigError(anyhow::anyhow!("{} is required", name)))
}

fn collaborator(prefix: &str, default_url: &str) -> CollaboratorConfig {
    CollaboratorConfig {
        url: var_or(&format!("{}_URL", prefix), default_url),
        api_key: env::var(format!("{}_API_KEY", prefix)).ok().map(Secret::new),
        timeout_secs: parsed_or(&format!("{}_TIMEOUT_SECS", prefix), 10),
    }
}

fn webhook_collaborator(
    prefix: &str,
    default_url: &str,
) -> Result<WebhookCollaboratorConfig, AppError> {
    Ok(WebhookCollaboratorConfig {
        api: collaborator(prefix, default_url),
        webhook_secret: Secret::new(required(&format!("{}_WEBHOOK_SECRET", prefix))?),
    })
}

impl BillingConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let defaults = BillingPolicy::default();

        let standard_rate = env::var("TAX_STANDARD_RATE").unwrap_or_else(|_| "17".to_string());
        let standard_rate = Decimal::from_str(&standard_rate).map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("TAX_STANDARD_RATE is not a number: {}", e))
        })?;

        let database = match env::var("DATABASE_URL") {
            Ok(url) => Some(DatabaseConfig {
                url: Secret::new(url),
                max_connections: parsed_or("DATABASE_MAX_CONNECTIONS", 10),
                min_connections: parsed_or("DATABASE_MIN_CONNECTIONS", 2),
                run_migrations: parsed_or("DATABASE_RUN_MIGRATIONS", true),
            }),
            Err(_) => None,
        };

        let notifications = env::var("NOTIFICATION_RELAY_URL")
            .ok()
            .map(|_| collaborator("NOTIFICATION_RELAY", ""));

        Ok(Self {
            common,
            service_name: var_or("SERVICE_NAME", "billing-engine"),
            service_version: env::var("SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            log_level: var_or("LOG_LEVEL", "info"),
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok(),
            database,
            tax: TaxConfig {
                home_country: var_or("TAX_HOME_COUNTRY", "LU").to_ascii_uppercase(),
                standard_rate,
            },
            billing: BillingPolicy {
                currency: var_or("BILLING_CURRENCY", &defaults.currency),
                notice_period_months: parsed_or(
                    "CANCELLATION_NOTICE_MONTHS",
                    defaults.notice_period_months,
                ),
                payment_terms_days: parsed_or("PAYMENT_TERMS_DAYS", defaults.payment_terms_days),
                reconciliation_tolerance_percent: parsed_or(
                    "RECONCILIATION_TOLERANCE_PERCENT",
                    defaults.reconciliation_tolerance_percent,
                ),
                invoicing_concurrency: parsed_or(
                    "INVOICING_CONCURRENCY",
                    defaults.invoicing_concurrency,
                )
                .max(1),
                invoicing_claim_lease: chrono::Duration::seconds(parsed_or(
                    "INVOICING_CLAIM_LEASE_SECS",
                    defaults.invoicing_claim_lease.num_seconds(),
                )),
            },
            public_base_url: var_or("PUBLIC_BASE_URL", "http://localhost:8080"),
            accounting: collaborator("ACCOUNTING", "http://accounting:8080/api"),
            direct_debit: webhook_collaborator("DIRECT_DEBIT", "https://api.direct-debit.local")?,
            signing: webhook_collaborator("SIGNING", "http://signing:3000/api")?,
            vat_registry: collaborator(
                "VAT_REGISTRY",
                "https://ec.europa.eu/taxation_customs/vies/rest-api",
            ),
            notifications,
            scheduler_interval_secs: env::var("SCHEDULER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0),
        })
    }
}
