//! Application startup and lifecycle management.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::external::{ExternalError, RetryConfig};
use service_core::middleware::{request_id_middleware, REQUEST_ID_HEADER};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{BillingConfig, CollaboratorConfig};
use crate::handlers;
use crate::rules::TaxResolver;
use crate::services::metrics::record_http_request_duration;
use crate::services::{
    HttpAccountingLedger, HttpDirectDebit, HttpNotifier, HttpSignatureService, HttpVatRegistry,
    InMemoryStore, JsonApi, LogNotifier, Notifier, PgStore, Store, SystemClock,
};
use crate::workflows::{Collaborators, Engine, EngineSettings};

/// Secrets used to authenticate inbound webhooks.
#[derive(Clone)]
pub struct WebhookSecrets {
    pub signing: Secret<String>,
    pub direct_debit: Secret<String>,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub secrets: WebhookSecrets,
    pub service_name: String,
}

fn json_api(
    service: &'static str,
    config: &CollaboratorConfig,
) -> Result<JsonApi, ExternalError> {
    JsonApi::new(
        service,
        &config.url,
        config.api_key.clone(),
        Duration::from_secs(config.timeout_secs),
    )
}

async fn build_store(config: &BillingConfig) -> Result<Arc<dyn Store>, AppError> {
    let Some(database) = &config.database else {
        tracing::warn!("DATABASE_URL not set, using the in-memory store");
        return Ok(Arc::new(InMemoryStore::new()));
    };

    let store = PgStore::new(
        database.url.expose_secret(),
        database.max_connections,
        database.min_connections,
    )
    .await
    .map_err(|e| {
        tracing::error!("Failed to connect to PostgreSQL: {}", e);
        AppError::DatabaseError(e.into())
    })?;

    if database.run_migrations {
        store.run_migrations().await.map_err(|e| {
            tracing::error!("Failed to run database migrations: {}", e);
            AppError::DatabaseError(e.into())
        })?;
    }
    Ok(Arc::new(store))
}

fn build_collaborators(config: &BillingConfig) -> Result<Collaborators, AppError> {
    let notifier: Arc<dyn Notifier> = match &config.notifications {
        Some(relay) => {
            tracing::info!("Notification relay configured");
            Arc::new(HttpNotifier::new(json_api("notifications", relay)?))
        }
        None => {
            tracing::info!("Notification relay not configured, logging notifications");
            Arc::new(LogNotifier)
        }
    };

    Ok(Collaborators {
        ledger: Arc::new(HttpAccountingLedger::new(json_api(
            "accounting",
            &config.accounting,
        )?)),
        direct_debit: Arc::new(HttpDirectDebit::new(json_api(
            "direct_debit",
            &config.direct_debit.api,
        )?)),
        signing: Arc::new(HttpSignatureService::new(json_api(
            "signing",
            &config.signing.api,
        )?)),
        vat_registry: Arc::new(HttpVatRegistry::new(json_api(
            "vat_registry",
            &config.vat_registry,
        )?)),
        notifier,
    })
}

/// Record request latency by method and status.
async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    record_http_request_duration(
        &method,
        response.status().as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        // Clients
        .route("/clients/:id", get(handlers::clients::get_client))
        .route("/clients/:id/invoices", get(handlers::clients::list_invoices))
        .route("/clients/:id/confirm", post(handlers::clients::confirm_client))
        .route(
            "/clients/:id/cancellations",
            post(handlers::clients::initiate_cancellation),
        )
        .route(
            "/clients/:id/subscriptions",
            post(handlers::clients::add_subscription),
        )
        .route(
            "/clients/:id/subscriptions/:sid/cancel",
            post(handlers::clients::cancel_subscription),
        )
        .route("/clients/:id/charges", post(handlers::clients::add_charge))
        .route("/clients/:id/turnover", post(handlers::clients::report_turnover))
        .route(
            "/clients/:id/direct-debit",
            post(handlers::clients::start_direct_debit),
        )
        // Cancellation signing (token-authenticated)
        .route(
            "/cancellations/:token",
            get(handlers::cancellations::get_cancellation),
        )
        .route(
            "/cancellations/:token/sign",
            post(handlers::cancellations::sign_cancellation),
        )
        // Quotes
        .route("/quotes", post(handlers::quotes::create_quote))
        .route("/quotes/:number/send", post(handlers::quotes::send_quote))
        // Supplier orders
        .route("/orders", post(handlers::orders::create_order))
        .route(
            "/orders/:id/supplier-invoices",
            post(handlers::orders::reconcile_supplier_invoice),
        )
        // Batch jobs
        .route(
            "/jobs/monthly-invoicing",
            post(handlers::jobs::monthly_invoicing),
        )
        .route(
            "/jobs/cancellation-sweep",
            post(handlers::jobs::cancellation_sweep),
        )
        .route(
            "/jobs/invoice-status-sync",
            post(handlers::jobs::invoice_status_sync),
        )
        // Collaborator webhooks
        .route("/webhooks/signing", post(handlers::webhooks::signing))
        .route(
            "/webhooks/direct-debit",
            post(handlers::webhooks::direct_debit),
        )
        .layer(middleware::from_fn(http_metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        )
        .with_state(state)
}

/// Run the cancellation sweep and then the invoicing batch on every tick.
///
/// The sweep goes first so a client deactivated today is not invoiced.
async fn run_scheduler(engine: Engine, every: Duration) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        match engine.run_cancellation_sweep().await {
            Ok(summary) => tracing::info!(
                deactivated = summary.clients_deactivated,
                failures = summary.failures.len(),
                "Scheduled sweep finished"
            ),
            Err(e) => tracing::error!(error = %e, "Scheduled sweep failed"),
        }
        match engine.run_monthly_invoicing().await {
            Ok(summary) => tracing::info!(
                invoiced = summary.invoiced.len(),
                failures = summary.failures.len(),
                "Scheduled invoicing finished"
            ),
            Err(e) => tracing::error!(error = %e, "Scheduled invoicing failed"),
        }
    }
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    scheduler_interval: Option<Duration>,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        let store = build_store(&config).await?;
        let collaborators = build_collaborators(&config)?;

        let settings = EngineSettings {
            tax: TaxResolver::new(&config.tax.home_country, config.tax.standard_rate),
            policy: config.billing.clone(),
            public_base_url: config.public_base_url.clone(),
            retry: RetryConfig::default(),
        };
        let engine = Engine::new(store, Arc::new(SystemClock), collaborators, settings);

        let state = AppState {
            engine,
            secrets: WebhookSecrets {
                signing: config.signing.webhook_secret.clone(),
                direct_debit: config.direct_debit.webhook_secret.clone(),
            },
            service_name: config.service_name.clone(),
        };

        let mut app = Self::with_state(state, config.common.socket_addr()).await?;
        app.scheduler_interval = config.scheduler_interval_secs.map(Duration::from_secs);
        Ok(app)
    }

    /// Bind an application around prepared state (port 0 picks a free port).
    pub async fn with_state(state: AppState, addr: SocketAddr) -> Result<Self, AppError> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!("Billing engine: HTTP on port {}", port);

        Ok(Self {
            port,
            listener,
            state,
            scheduler_interval: None,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Serve until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let scheduler = self.scheduler_interval.map(|every| {
            tracing::info!(interval_secs = every.as_secs(), "In-process scheduler enabled");
            tokio::spawn(run_scheduler(self.state.engine.clone(), every))
        });

        let result = axum::serve(self.listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await;

        if let Some(handle) = scheduler {
            handle.abort();
        }
        result.map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
