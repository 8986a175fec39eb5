//! Access policy evaluation
//!
//! Decides whether a request needs authentication, from the owning route's
//! policy and the path relative to its prefix. Pure functions, no I/O.
//!
//! Evaluation order matters: full protection first, then protected-path
//! rules, then public-path rules. Public rules always win on conflict.
//! A route with no rules at all is open by default; services opt in to
//! protection.

use crate::registry::ServiceRoute;

/// Whether a request for `relative_path` under `route` requires a valid
/// credential before it may be forwarded
pub fn requires_auth(route: &ServiceRoute, relative_path: &str) -> bool {
    let mut required = route.fully_protected;

    if !required {
        required = route
            .protected_paths
            .iter()
            .any(|p| relative_path.starts_with(p.as_str()));
    }

    // Public rules override everything, including full protection
    if route
        .public_paths
        .iter()
        .any(|p| relative_path.starts_with(p.as_str()))
    {
        required = false;
    }

    required
}
