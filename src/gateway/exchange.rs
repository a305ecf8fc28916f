//! On-behalf-of token exchange
//!
//! Every tool invocation trades the caller's bearer credential for a
//! short-lived scoped credential. Failures are closed: there is no fallback to
//! the service's own credential.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::config::ExchangeConfig;
use crate::workspace::WorkspaceEndpoint;
use crate::{Error, Result};

/// Credential minted for one invocation.
///
/// Lives only as long as the request that produced it.
#[derive(Clone)]
pub struct ScopedCredential {
    token: String,
    token_id: Option<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl ScopedCredential {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            token_id: None,
            expires_at: None,
        }
    }

    /// Attach the provider's token id and expiry
    #[must_use]
    pub fn with_metadata(mut self, token_id: Option<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        self.token_id = token_id;
        self.expires_at = expires_at;
        self
    }

    /// Raw token, for the outbound `Authorization` header only
    pub fn secret(&self) -> &str {
        &self.token
    }

    /// Provider-side token id
    pub fn token_id(&self) -> Option<&str> {
        self.token_id.as_deref()
    }

    /// Expiry reported by the provider
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("token", &"<redacted>")
            .field("token_id", &self.token_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Parameters sent with every exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    /// Requested validity window
    pub lifetime: Duration,
    /// Usage-intent label
    pub comment: String,
}

impl Default for ExchangeRequest {
    fn default() -> Self {
        Self::from(&ExchangeConfig::default())
    }
}

impl From<&ExchangeConfig> for ExchangeRequest {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            lifetime: config.lifetime,
            comment: config.comment.clone(),
        }
    }
}

/// Exchange provider contract
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    /// Trade `bearer` for a scoped credential
    async fn exchange(&self, bearer: &str, request: &ExchangeRequest) -> Result<ScopedCredential>;
}

#[derive(Debug, Deserialize)]
struct CreateTokenResponse {
    token_value: String,
    #[serde(default)]
    token_info: Option<TokenInfo>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    #[serde(default)]
    token_id: Option<String>,
    /// Milliseconds since the epoch
    #[serde(default)]
    expiry_time: Option<i64>,
}

/// Mints scoped tokens through the workspace token API, authenticated as the caller
pub struct WorkspaceTokenExchanger {
    endpoint: WorkspaceEndpoint,
}

impl WorkspaceTokenExchanger {
    /// Create an exchanger for the workspace behind `endpoint`
    pub fn new(endpoint: WorkspaceEndpoint) -> Self {
        Self { endpoint }
    }
}

#[async_trait]
impl TokenExchanger for WorkspaceTokenExchanger {
    async fn exchange(&self, bearer: &str, request: &ExchangeRequest) -> Result<ScopedCredential> {
        let client = self.endpoint.authorize(bearer);
        let response: CreateTokenResponse = client
            .post_json(
                "/api/2.0/token/create",
                &json!({
                    "lifetime_seconds": request.lifetime.as_secs(),
                    "comment": request.comment,
                }),
            )
            .await?;

        let (token_id, expires_at) = match response.token_info {
            Some(info) => (
                info.token_id,
                info.expiry_time
                    .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            ),
            None => (None, None),
        };

        Ok(ScopedCredential::new(response.token_value).with_metadata(token_id, expires_at))
    }
}

/// Extract the token from a `Bearer <token>` header value.
///
/// # Errors
///
/// Returns `Error::Unauthenticated` if the header is missing, uses another
/// scheme, or carries an empty token.
pub fn extract_bearer(authorization: Option<&str>) -> Result<&str> {
    let Some(value) = authorization else {
        return Err(Error::Unauthenticated(
            "Missing Authorization header. Use: Authorization: Bearer <token>".to_string(),
        ));
    };
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .ok_or_else(|| Error::Unauthenticated("Authorization scheme must be Bearer".to_string()))?
        .trim();
    if token.is_empty() {
        return Err(Error::Unauthenticated("Bearer token is empty".to_string()));
    }
    Ok(token)
}

/// Short stable fingerprint of a credential, safe to log
#[must_use]
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

/// Validates the caller credential and runs the exchange
#[derive(Clone)]
pub struct ExchangeGateway {
    exchanger: Arc<dyn TokenExchanger>,
    request: ExchangeRequest,
}

impl ExchangeGateway {
    /// Create a gateway around an exchange provider
    pub fn new(exchanger: Arc<dyn TokenExchanger>, request: ExchangeRequest) -> Self {
        Self { exchanger, request }
    }

    /// Parameters sent with every exchange
    pub fn request(&self) -> &ExchangeRequest {
        &self.request
    }

    /// Turn the raw `Authorization` header into a scoped credential.
    ///
    /// # Errors
    ///
    /// `Error::Unauthenticated` without contacting the provider when the
    /// header is unusable; `Error::ExchangeFailed` when the provider errors
    /// or returns an empty credential.
    pub async fn scoped_credential(&self, authorization: Option<&str>) -> Result<ScopedCredential> {
        let bearer = self.validate(authorization)?;
        self.exchange(bearer).await
    }

    /// Check the `Authorization` header without contacting the provider.
    ///
    /// # Errors
    ///
    /// `Error::Unauthenticated` when the header is missing or unusable.
    pub fn validate<'a>(&self, authorization: Option<&'a str>) -> Result<&'a str> {
        extract_bearer(authorization).inspect_err(|e| {
            warn!(error = %e, "Rejected tool call without usable bearer credential");
        })
    }

    /// Exchange an already validated bearer token.
    ///
    /// # Errors
    ///
    /// `Error::ExchangeFailed` when the provider errors or returns an empty
    /// credential.
    pub async fn exchange(&self, bearer: &str) -> Result<ScopedCredential> {
        let caller = token_fingerprint(bearer);

        match self.exchanger.exchange(bearer, &self.request).await {
            Ok(credential) if credential.secret().is_empty() => {
                error!(caller = %caller, "Token exchange returned an empty credential");
                Err(Error::ExchangeFailed("provider returned an empty credential".to_string()))
            }
            Ok(credential) => {
                debug!(
                    caller = %caller,
                    token_id = ?credential.token_id(),
                    expires_at = ?credential.expires_at(),
                    "Exchanged caller credential"
                );
                Ok(credential)
            }
            Err(e) => {
                error!(caller = %caller, error = %e, "Token exchange failed");
                Err(Error::ExchangeFailed(e.to_string()))
            }
        }
    }
}

impl std::fmt::Debug for ExchangeGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeGateway")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
