//! Request pipeline and forwarding engine
//!
//! This module owns the per-request decision logic:
//! - Route resolution (which service owns the path)
//! - Access policy evaluation (does the path require authentication)
//! - Credential validation via the authorization service
//! - Forwarding the request to the backend and relaying its response
//!
//! Failure at any stage short-circuits with a terminal JSON error
//! response; nothing is retried.

use crate::auth::{self, AuthRejection, CredentialValidator, Identity, USER_INFO_HEADER};
use crate::metrics::GatewayMetrics;
use crate::policy;
use crate::registry::{ServiceRegistry, ServiceRoute};
use axum::body::Body;
use axum::http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, HOST};
use axum::http::{Request, Response, StatusCode, Uri};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while forwarding a request to a backend
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The route's base URL could not be parsed
    #[error("invalid target URL '{0}'")]
    InvalidTarget(String),
    /// The inbound request body could not be read
    #[error("failed to read request body: {0}")]
    RequestBody(axum::Error),
    /// The outbound request could not be constructed
    #[error("failed to build outbound request: {0}")]
    Build(axum::http::Error),
    /// The backend did not answer within the configured timeout
    #[error("request to backend timed out")]
    Timeout,
    /// The backend could not be reached
    #[error("transport error: {0}")]
    Transport(hyper_util::client::legacy::Error),
    /// The backend's response body could not be read
    #[error("failed to read backend response: {0}")]
    ResponseBody(hyper::Error),
}

impl ForwardError {
    /// Map onto the caller-facing status and error message
    ///
    /// Transport-level detail is logged, never exposed to the caller.
    pub fn response_parts(&self) -> (StatusCode, &'static str) {
        match self {
            ForwardError::InvalidTarget(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Gateway configuration error")
            }
            ForwardError::RequestBody(_) | ForwardError::Build(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error")
            }
            ForwardError::Timeout | ForwardError::Transport(_) | ForwardError::ResponseBody(_) => {
                (StatusCode::BAD_GATEWAY, "Service unavailable")
            }
        }
    }
}

/// Build a terminal JSON error response (`{"error": <message>}`)
pub fn error_response(status: StatusCode, message: &str) -> Response<Body> {
    let body = serde_json::json!({ "error": message });
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("static error response")
}

/// Forwards requests to backend services
#[derive(Clone)]
pub struct ForwardingEngine {
    client: Client<HttpConnector, http_body_util::combinators::BoxBody<bytes::Bytes, hyper::Error>>,
    timeout: Duration,
}

impl ForwardingEngine {
    /// Create a new forwarding engine with the given per-request timeout
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    /// Forward a request to the route's backend and relay its response
    ///
    /// Preserves the original method, full path, query string, and body.
    /// Headers are copied (hop-by-hop headers excluded), then `Host` is
    /// overridden to the target's authority. The inbound `X-User-Info`
    /// header is always dropped; when `identity` is present it is
    /// re-set to `base64(JSON(identity))` so downstream services only
    /// ever see an identity the gateway itself resolved.
    pub async fn forward(
        &self,
        route: &ServiceRoute,
        req: Request<Body>,
        identity: Option<&Identity>,
    ) -> Result<Response<Body>, ForwardError> {
        let target: Uri = route
            .base_url
            .parse()
            .map_err(|_| ForwardError::InvalidTarget(route.base_url.clone()))?;
        let authority = target
            .authority()
            .ok_or_else(|| ForwardError::InvalidTarget(route.base_url.clone()))?
            .to_string();
        let scheme = target.scheme_str().unwrap_or("http");

        // Full original path, no prefix stripping; backends are prefix-aware
        let path = req.uri().path();
        let target_url = match req.uri().query() {
            Some(q) if !q.is_empty() => format!("{}://{}{}?{}", scheme, authority, path, q),
            _ => format!("{}://{}{}", scheme, authority, path),
        };

        debug!(url = %target_url, "forwarding request");

        let (parts, body) = req.into_parts();

        let mut builder = Request::builder().method(parts.method).uri(&target_url);

        if let Some(headers) = builder.headers_mut() {
            for (key, value) in parts.headers.iter() {
                // Drop hop-by-hop headers and any caller-supplied identity
                // header; the latter is only ever set by the gateway itself.
                if is_hop_by_hop_header(key.as_str()) || key.as_str() == USER_INFO_HEADER {
                    continue;
                }
                headers.insert(key.clone(), value.clone());
            }

            match authority.parse::<HeaderValue>() {
                Ok(host) => {
                    headers.insert(HOST, host);
                }
                Err(e) => {
                    warn!(authority = %authority, error = %e, "failed to set Host header");
                }
            }

            if let Some(user) = identity {
                if let Ok(value) = HeaderValue::from_str(&encode_identity(user)) {
                    headers.insert(HeaderName::from_static(USER_INFO_HEADER), value);
                }
            }
        }

        let body_bytes = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(ForwardError::RequestBody)?;

        let boxed_body = http_body_util::Full::new(body_bytes)
            .map_err(|e| match e {})
            .boxed();

        let outbound = builder.body(boxed_body).map_err(ForwardError::Build)?;

        let response = tokio::time::timeout(self.timeout, self.client.request(outbound))
            .await
            .map_err(|_| ForwardError::Timeout)?
            .map_err(ForwardError::Transport)?;

        debug!(status = %response.status(), "received backend response");

        let (parts, body) = response.into_parts();
        let body_bytes = BodyExt::collect(body)
            .await
            .map_err(ForwardError::ResponseBody)?
            .to_bytes();

        Ok(Response::from_parts(parts, Body::from(body_bytes)))
    }
}

/// The gateway request pipeline: resolve, check policy, validate, forward
#[derive(Clone)]
pub struct GatewayService {
    registry: Arc<ServiceRegistry>,
    validator: CredentialValidator,
    forwarder: ForwardingEngine,
    metrics: Arc<GatewayMetrics>,
}

impl GatewayService {
    /// Assemble the pipeline from its components
    pub fn new(
        registry: Arc<ServiceRegistry>,
        validator: CredentialValidator,
        forwarder: ForwardingEngine,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            registry,
            validator,
            forwarder,
            metrics,
        }
    }

    /// Handle one inbound request through to a terminal response
    pub async fn handle(&self, req: Request<Body>) -> Response<Body> {
        let start = Instant::now();
        let method = req.method().to_string();
        let path = req.uri().path().to_string();

        let Some((route, relative_path)) = self.registry.resolve(&path) else {
            self.metrics
                .record_request(&method, &path, 404, start.elapsed());
            return error_response(StatusCode::NOT_FOUND, "Not found");
        };

        let mut identity = None;

        if policy::requires_auth(route, &relative_path) {
            let header = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok());

            let outcome = match auth::bearer_token(header) {
                Some(token) => self.validator.validate(token).await,
                None => Err(AuthRejection::MissingCredential),
            };

            match outcome {
                Ok(user) => identity = Some(user),
                Err(rejection) => {
                    warn!(
                        service = %route.name,
                        path = %path,
                        reason = rejection.reason(),
                        "rejected protected request: {rejection}"
                    );
                    self.metrics.record_auth_rejection(rejection.reason());
                    self.metrics
                        .record_request(&method, &path, 401, start.elapsed());
                    let message = match rejection {
                        AuthRejection::MissingCredential => "Authentication required",
                        _ => "Invalid or expired token",
                    };
                    return error_response(StatusCode::UNAUTHORIZED, message);
                }
            }
        }

        info!(
            service = %route.name,
            method = %method,
            path = %path,
            authenticated = identity.is_some(),
            "forwarding to backend"
        );

        let response = match self
            .forwarder
            .forward(route, req, identity.as_ref())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(service = %route.name, path = %path, "forward failed: {err}");
                let (status, message) = err.response_parts();
                self.metrics
                    .record_request(&method, &path, status.as_u16(), start.elapsed());
                return error_response(status, message);
            }
        };

        self.metrics.record_request(
            &method,
            &path,
            response.status().as_u16(),
            start.elapsed(),
        );
        response
    }
}

/// Check if a header is a hop-by-hop header that should not be forwarded.
///
/// Host is included even though RFC 7230 does not class it as hop-by-hop:
/// the forwarder must replace it with the target's authority, so the
/// inbound value is filtered out and the target value set afterwards.
fn is_hop_by_hop_header(name: &str) -> bool {
    matches!(
        name.to_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailers"
            | "transfer-encoding"
            | "upgrade"
            | "host"
    )
}

/// Encode an identity the way it is propagated downstream
pub fn encode_identity(identity: &Identity) -> String {
    let json = serde_json::to_vec(identity).unwrap_or_default();
    BASE64.encode(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_header_is_hop_by_hop() {
        assert!(is_hop_by_hop_header("host"));
        assert!(is_hop_by_hop_header("Host"));
        assert!(is_hop_by_hop_header("HOST"));
        assert!(is_hop_by_hop_header("connection"));
        assert!(is_hop_by_hop_header("transfer-encoding"));
    }

    #[test]
    fn test_regular_headers_are_forwarded() {
        assert!(!is_hop_by_hop_header("authorization"));
        assert!(!is_hop_by_hop_header("content-type"));
        assert!(!is_hop_by_hop_header("x-request-id"));
    }

    #[test]
    fn test_error_response_shape() {
        let response = error_response(StatusCode::BAD_GATEWAY, "Service unavailable");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_encode_identity() {
        let mut identity = Identity::new();
        identity.insert("id".to_string(), serde_json::json!("u1"));

        let encoded = encode_identity(&identity);
        let decoded = BASE64.decode(encoded).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&decoded).unwrap();
        assert_eq!(value["id"], "u1");
    }

    #[test]
    fn test_forward_error_mapping() {
        let (status, message) = ForwardError::Timeout.response_parts();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(message, "Service unavailable");

        let (status, message) =
            ForwardError::InvalidTarget("not a url".to_string()).response_parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Gateway configuration error");
    }

    #[tokio::test]
    async fn test_forward_rejects_invalid_target() {
        let engine = ForwardingEngine::new(Duration::from_secs(5));
        let route = ServiceRoute {
            name: "broken".to_string(),
            base_url: "::not a url::".to_string(),
            prefix: "/api/broken".to_string(),
            fully_protected: false,
            protected_paths: vec![],
            public_paths: vec![],
            internal: false,
        };
        let req = Request::builder()
            .uri("/api/broken/thing")
            .body(Body::empty())
            .unwrap();

        let err = engine.forward(&route, req, None).await.unwrap_err();
        assert!(matches!(err, ForwardError::InvalidTarget(_)));
    }

    #[tokio::test]
    async fn test_forward_connection_refused_is_transport_error() {
        let engine = ForwardingEngine::new(Duration::from_secs(5));
        // Port 9 (discard) is assumed closed
        let route = ServiceRoute {
            name: "down".to_string(),
            base_url: "http://127.0.0.1:9".to_string(),
            prefix: "/api/down".to_string(),
            fully_protected: false,
            protected_paths: vec![],
            public_paths: vec![],
            internal: false,
        };
        let req = Request::builder()
            .uri("/api/down/thing")
            .body(Body::empty())
            .unwrap();

        let err = engine.forward(&route, req, None).await.unwrap_err();
        let (status, _) = err.response_parts();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }
}
