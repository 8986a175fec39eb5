//! HTTP server assembly and process lifecycle
//!
//! Builds the axum router (health and metrics endpoints plus the gateway
//! fallback handler), attaches the logging and CORS middleware, and runs
//! the listener with graceful shutdown on SIGINT/SIGTERM.

use crate::auth::CredentialValidator;
use crate::config::GatewayConfig;
use crate::health::HealthChecker;
use crate::metrics::GatewayMetrics;
use crate::proxy::{ForwardingEngine, GatewayService};
use crate::registry::ServiceRegistry;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    gateway: GatewayService,
    metrics: Arc<GatewayMetrics>,
    health: Arc<HealthChecker>,
}

/// Build the gateway router from a resolved configuration
///
/// Fails if the configuration yields an ambiguous registry (overlapping
/// prefixes). An empty services map is accepted; the gateway then serves
/// only its own endpoints.
pub fn router_from_config(config: &GatewayConfig) -> anyhow::Result<Router> {
    let registry = ServiceRegistry::from_config(config)?;

    if registry.is_empty() {
        warn!("no services configured, gateway will only serve its own endpoints");
    }
    for route in registry.routes() {
        info!(
            service = %route.name,
            prefix = %route.prefix,
            url = %route.base_url,
            internal = route.internal,
            "registered service route"
        );
    }

    let timeout = Duration::from_secs(config.server.timeout);
    let registry = Arc::new(registry);
    let metrics = Arc::new(GatewayMetrics::new());
    let health = Arc::new(HealthChecker::new());
    let validator = CredentialValidator::new(&registry, timeout);
    let forwarder = ForwardingEngine::new(timeout);
    let gateway = GatewayService::new(registry, validator, forwarder, metrics.clone());

    let state = AppState {
        gateway,
        metrics,
        health,
    };

    Ok(Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(gateway_handler)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state))
}

/// Run the gateway server until shutdown
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let app = router_from_config(&config)?;

    let addr: SocketAddr = config.server_addr().parse()?;
    info!("starting gateway server on {}", addr);
    info!("services configured: {}", config.services.len());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

/// Permissive CORS policy for browser clients
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
        ])
        .expose_headers([header::CONTENT_LENGTH])
        .max_age(Duration::from_secs(12 * 60 * 60))
}

/// Resolve on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}

/// Health check handler
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.health.liveness()))
}

/// Metrics handler
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.metrics.prometheus_output())
}

/// Gateway handler: runs the request pipeline for everything that is not
/// one of the gateway's own endpoints
async fn gateway_handler(State(state): State<AppState>, req: Request<Body>) -> Response {
    state.gateway.handle(req).await
}
