//! Service registry and route resolution
//!
//! The registry is built once from configuration and never mutated
//! afterwards, so request handlers can share it without locking. Route
//! resolution matches the request path against each registered prefix,
//! aligned on path segment boundaries so `/authx` never matches the
//! prefix `/auth`.

use crate::config::GatewayConfig;
use thiserror::Error;

/// Conventional name of the authorization service used for token validation
pub const AUTH_SERVICE_NAME: &str = "authorization";

/// One routable backend with its access policy
#[derive(Debug, Clone)]
pub struct ServiceRoute {
    /// Unique service name
    pub name: String,
    /// Backend base URL (scheme + host, no path)
    pub base_url: String,
    /// URL path prefix owning requests for this service
    pub prefix: String,
    /// Every path under the prefix requires authentication
    pub fully_protected: bool,
    /// Relative path fragments forcing authentication on
    pub protected_paths: Vec<String>,
    /// Relative path fragments forcing authentication off
    pub public_paths: Vec<String>,
    /// Service is not intended for direct external routing
    pub internal: bool,
}

/// Errors raised while building the registry
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Two services own overlapping URL prefixes; route resolution would be
    /// ambiguous, so the gateway refuses to start.
    #[error(
        "service '{first}' prefix '{first_prefix}' overlaps service '{second}' prefix '{second_prefix}'"
    )]
    PrefixConflict {
        first: String,
        first_prefix: String,
        second: String,
        second_prefix: String,
    },
}

/// Immutable mapping from URL prefixes to backend services
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    routes: Vec<ServiceRoute>,
}

impl ServiceRegistry {
    /// Build a registry from the resolved configuration
    ///
    /// Fails if any two configured prefixes overlap (one is a
    /// segment-aligned prefix of the other, or they are equal).
    pub fn from_config(config: &GatewayConfig) -> Result<Self, RegistryError> {
        let routes: Vec<ServiceRoute> = config
            .services
            .iter()
            .map(|(name, service)| ServiceRoute {
                name: name.clone(),
                base_url: service.url.clone(),
                prefix: service.prefix.clone(),
                fully_protected: service.fully_protected,
                protected_paths: service.protected_paths.clone(),
                public_paths: service.public_paths.clone(),
                internal: service.internal,
            })
            .collect();

        for (i, a) in routes.iter().enumerate() {
            for b in routes.iter().skip(i + 1) {
                if prefix_matches(&a.prefix, &b.prefix) || prefix_matches(&b.prefix, &a.prefix) {
                    return Err(RegistryError::PrefixConflict {
                        first: a.name.clone(),
                        first_prefix: a.prefix.clone(),
                        second: b.name.clone(),
                        second_prefix: b.prefix.clone(),
                    });
                }
            }
        }

        Ok(Self { routes })
    }

    /// Resolve a request path to its owning route and the path relative to
    /// the matched prefix
    ///
    /// The relative path always starts with `/`; an exact prefix match
    /// yields `/`. Returns `None` when no configured prefix matches.
    pub fn resolve(&self, path: &str) -> Option<(&ServiceRoute, String)> {
        let route = self.routes.iter().find(|r| prefix_matches(&r.prefix, path))?;

        let remainder = &path[route.prefix.len()..];
        let relative = if remainder.is_empty() {
            "/".to_string()
        } else {
            remainder.to_string()
        };

        Some((route, relative))
    }

    /// Look up a service by name
    pub fn get(&self, name: &str) -> Option<&ServiceRoute> {
        self.routes.iter().find(|r| r.name == name)
    }

    /// The authorization service, looked up by naming convention
    pub fn auth_service(&self) -> Option<&ServiceRoute> {
        self.get(AUTH_SERVICE_NAME)
    }

    /// All registered routes
    pub fn routes(&self) -> &[ServiceRoute] {
        &self.routes
    }

    /// Whether the registry has no routes
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Check whether `prefix` is a path-segment-aligned prefix of `path`
///
/// The character following the prefix, if any, must be `/`.
fn prefix_matches(prefix: &str, path: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
