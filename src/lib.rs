//! Auth Gateway - an API gateway with per-path authentication
//!
//! This service provides:
//! - Prefix-based request routing to backend services
//! - Per-path access policy (fully protected, protected, public paths)
//! - Bearer token validation against an authorization service
//! - Identity propagation to backends via the `X-User-Info` header
//! - Health checks and Prometheus metrics

pub mod auth;
pub mod config;
pub mod health;
pub mod metrics;
pub mod policy;
pub mod proxy;
pub mod registry;
pub mod server;

pub use config::GatewayConfig;
pub use registry::ServiceRegistry;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
