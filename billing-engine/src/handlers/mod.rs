//! HTTP handlers for billing-engine.

pub mod cancellations;
pub mod clients;
pub mod health;
pub mod jobs;
pub mod orders;
pub mod quotes;
pub mod webhooks;

pub use health::{health_check, metrics_endpoint, readiness_check};
