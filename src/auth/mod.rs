//! Credential validation against the authorization service
//!
//! Protected requests carry a bearer token which the gateway validates by
//! POSTing `{"token": ...}` to the authorization service's `/validate`
//! endpoint. Validation is synchronous from the pipeline's point of view:
//! nothing is forwarded until the authorization service has answered, and
//! no result is cached, so every protected request costs one round trip.

use crate::registry::ServiceRegistry;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Header name used to propagate the authenticated identity downstream
pub const USER_INFO_HEADER: &str = "x-user-info";

/// Attributes of the authenticated caller, as returned by the authorization
/// service. The gateway never interprets these fields; it only serializes
/// and forwards them.
pub type Identity = serde_json::Map<String, serde_json::Value>;

/// Why a credential was rejected
///
/// All variants surface to the caller as 401; the distinction exists for
/// logs and metrics only.
#[derive(Debug, Error)]
pub enum AuthRejection {
    /// No bearer token was supplied
    #[error("missing or malformed Authorization header")]
    MissingCredential,
    /// The authorization service answered with a non-2xx status
    #[error("authorization service returned status {0}")]
    BackendStatus(u16),
    /// The authorization service's response body could not be parsed
    #[error("malformed response from authorization service")]
    MalformedResponse,
    /// The authorization service could not be reached (or timed out)
    #[error("authorization service unreachable")]
    Unreachable,
    /// The token was well-formed but rejected
    #[error("token is invalid")]
    InvalidToken,
    /// No authorization service is present in the registry
    #[error("authorization service not configured")]
    NotConfigured,
}

impl AuthRejection {
    /// Stable label for metrics and logs
    pub fn reason(&self) -> &'static str {
        match self {
            AuthRejection::MissingCredential => "missing_credential",
            AuthRejection::BackendStatus(_) => "backend_status",
            AuthRejection::MalformedResponse => "malformed_response",
            AuthRejection::Unreachable => "unreachable",
            AuthRejection::InvalidToken => "invalid_token",
            AuthRejection::NotConfigured => "not_configured",
        }
    }
}

/// Extract the bearer token from an `Authorization` header value
///
/// Returns `None` when the header is absent, uses a different scheme, or
/// carries an empty token.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header?
        .strip_prefix("Bearer ")
        .filter(|token| !token.is_empty())
}

/// Expected response shape from the authorization service
#[derive(Debug, Deserialize)]
struct ValidateResponse {
    valid: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    user: Identity,
}

/// Validates bearer tokens by calling the authorization service
#[derive(Clone)]
pub struct CredentialValidator {
    client: reqwest::Client,
    validate_url: Option<String>,
}

impl CredentialValidator {
    /// Create a validator bound to the registry's authorization service
    ///
    /// The validation endpoint is `{url}{prefix}/validate` of the service
    /// registered under the conventional `authorization` name. If none is
    /// configured, every validation fails with [`AuthRejection::NotConfigured`].
    pub fn new(registry: &ServiceRegistry, timeout: Duration) -> Self {
        let validate_url = registry.auth_service().map(|service| {
            format!(
                "{}{}/validate",
                service.base_url.trim_end_matches('/'),
                service.prefix
            )
        });

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build authorization HTTP client");

        Self {
            client,
            validate_url,
        }
    }

    /// Validate a bearer token and return the resolved identity
    pub async fn validate(&self, token: &str) -> Result<Identity, AuthRejection> {
        if token.is_empty() {
            return Err(AuthRejection::MissingCredential);
        }

        let url = self
            .validate_url
            .as_deref()
            .ok_or(AuthRejection::NotConfigured)?;

        debug!(url = %url, "calling authorization service");

        let response = self
            .client
            .post(url)
            .json(&serde_json::json!({ "token": token }))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "failed to call authorization service");
                AuthRejection::Unreachable
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthRejection::BackendStatus(status.as_u16()));
        }

        let body: ValidateResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                AuthRejection::MalformedResponse
            } else {
                AuthRejection::Unreachable
            }
        })?;

        if !body.valid {
            debug!(message = %body.message, "token rejected by authorization service");
            return Err(AuthRejection::InvalidToken);
        }

        Ok(body.user)
    }
}
