pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod rules;
pub mod services;
pub mod startup;
pub mod workflows;

pub use startup::{AppState, Application};
