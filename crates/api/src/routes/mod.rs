//! HTTP route handlers.

pub mod health;
pub mod metrics;
pub mod operations;
pub mod tenants;

pub use operations::AppState;
