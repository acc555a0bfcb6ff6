//! service-core: shared infrastructure for the billing engine services.
//!
//! HTTP errors, layered configuration, tracing setup, request ids, webhook
//! signatures and the retry policy for calls to external collaborators.
pub mod config;
pub mod error;
pub mod external;
pub mod middleware;
pub mod observability;
pub mod utils;
