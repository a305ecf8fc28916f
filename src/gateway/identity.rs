//! Forwarded-identity middleware
//!
//! Resolves who is calling from the headers the hosting proxy forwards and
//! attaches the result to the request. Enrichment is advisory: it never
//! rejects a request, and the outcome is visible only through the
//! [`CallerContext`] extension.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::Result;
use crate::workspace::WorkspaceEndpoint;

/// Header carrying the end user's access token
pub const FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";
/// Header carrying the workspace host the user came from
pub const FORWARDED_HOST: &str = "x-forwarded-host";

/// Resolved end user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    /// User id
    pub id: String,
    /// Login name
    pub user_name: String,
    /// Display name
    pub display_name: Option<String>,
    /// Whether the account is active
    pub active: bool,
}

/// Request-scoped caller state placed in the request extensions
#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// Resolved user, when enrichment succeeded
    pub user_info: Option<UserInfo>,
}

/// Identity provider contract
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Look up the user that owns `token` on `host`
    async fn current_user(&self, host: &str, token: &str) -> Result<UserInfo>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScimUser {
    id: String,
    #[serde(default)]
    user_name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    active: Option<bool>,
}

/// Looks the caller up through the workspace SCIM `Me` endpoint
pub struct WorkspaceIdentityProvider {
    http: reqwest::Client,
}

impl WorkspaceIdentityProvider {
    /// Create a provider using `http` for lookups
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl IdentityProvider for WorkspaceIdentityProvider {
    async fn current_user(&self, host: &str, token: &str) -> Result<UserInfo> {
        let client = WorkspaceEndpoint::new(self.http.clone(), host)?.authorize(token);
        let user: ScimUser = client.get_json("/api/2.0/preview/scim/v2/Me", &[]).await?;
        Ok(UserInfo {
            id: user.id,
            user_name: user.user_name,
            display_name: user.display_name,
            active: user.active.unwrap_or(true),
        })
    }
}

/// Middleware state
#[derive(Clone)]
pub struct IdentityState {
    provider: Arc<dyn IdentityProvider>,
    fallback_host: Option<String>,
    enabled: bool,
}

impl IdentityState {
    /// Create middleware state; `fallback_host` is used when no host is forwarded
    pub fn new(provider: Arc<dyn IdentityProvider>, fallback_host: Option<String>, enabled: bool) -> Self {
        Self {
            provider,
            fallback_host,
            enabled,
        }
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Resolve the caller from forwarded headers.
///
/// Never fails: a missing header logs a warning, a provider error logs one
/// error, and either way the context comes back without `user_info`.
pub async fn resolve_caller(state: &IdentityState, headers: &HeaderMap) -> CallerContext {
    if !state.enabled {
        return CallerContext::default();
    }

    let token = header(headers, FORWARDED_ACCESS_TOKEN);
    let host = header(headers, FORWARDED_HOST).or(state.fallback_host.as_deref());

    let (Some(token), Some(host)) = (token, host) else {
        warn!(
            has_token = token.is_some(),
            has_host = host.is_some(),
            "Forwarded identity headers missing, continuing without user info"
        );
        return CallerContext::default();
    };

    match state.provider.current_user(host, token).await {
        Ok(user) => {
            debug!(user = %user.user_name, id = %user.id, "Resolved caller identity");
            CallerContext {
                user_info: Some(user),
            }
        }
        Err(e) => {
            error!(host = %host, error = %e, "Failed to resolve caller identity");
            CallerContext::default()
        }
    }
}

/// Attach a [`CallerContext`] to every request
pub async fn identity_middleware(
    State(state): State<IdentityState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let headers = request.headers().clone();
    let caller = resolve_caller(&state, &headers).await;
    request.extensions_mut().insert(caller);
    next.run(request).await
}
