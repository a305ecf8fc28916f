//! Workspace REST client
//!
//! [`WorkspaceEndpoint`] is the token-free half (pooled HTTP client + host)
//! that tool handles keep. A [`WorkspaceClient`] only exists once a token is
//! attached, so execution code can only talk to the workspace with the
//! credential it was handed.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

use crate::config::WorkspaceConfig;
use crate::{Error, Result};

/// Build the shared HTTP client
///
/// # Errors
///
/// Returns an error if the TLS backend cannot be initialised.
pub fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("uc-mcp-gateway/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {e}")))
}

/// Normalise a workspace host into `scheme://host[:port]` without a trailing slash.
///
/// Bare hostnames get `https://`.
///
/// # Errors
///
/// Returns `Error::Config` if the host is empty or not a valid URL.
pub fn normalize_host(host: &str) -> Result<String> {
    let trimmed = host.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::Config("Workspace host is empty".to_string()));
    }
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| Error::Config(format!("Invalid workspace host '{host}': {e}")))?;
    if url.host_str().is_none() {
        return Err(Error::Config(format!("Invalid workspace host '{host}'")));
    }
    Ok(candidate)
}

/// Host plus pooled HTTP client, without any credential
#[derive(Debug, Clone)]
pub struct WorkspaceEndpoint {
    http: Client,
    host: String,
}

impl WorkspaceEndpoint {
    /// Create an endpoint for `host`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the host is invalid.
    pub fn new(http: Client, host: &str) -> Result<Self> {
        Ok(Self {
            http,
            host: normalize_host(host)?,
        })
    }

    /// Normalised host URL
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Shared HTTP client
    #[must_use]
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Attach a bearer token
    #[must_use]
    pub fn authorize(&self, token: impl Into<String>) -> WorkspaceClient {
        WorkspaceClient {
            endpoint: self.clone(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.host, path.trim_start_matches('/'))
    }
}

/// Workspace client bound to one bearer token
#[derive(Clone)]
pub struct WorkspaceClient {
    endpoint: WorkspaceEndpoint,
    token: String,
}

impl std::fmt::Debug for WorkspaceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceClient")
            .field("host", &self.endpoint.host)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Error body returned by workspace APIs
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl WorkspaceClient {
    /// Endpoint this client talks to
    #[must_use]
    pub fn endpoint(&self) -> &WorkspaceEndpoint {
        &self.endpoint
    }

    /// GET a JSON document
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` on network failure and `Error::Backend` on a
    /// non-success status.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let request = self.request(Method::GET, path).query(query);
        self.send(request, path).await
    }

    /// POST a JSON body and decode the JSON response
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` on network failure and `Error::Backend` on a
    /// non-success status.
    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let request = self.request(Method::POST, path).json(body);
        self.send(request, path).await
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.endpoint
            .http
            .request(method, self.endpoint.url(path))
            .bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder, path: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("Request to {path} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(path = %path, status = %status, "Workspace API returned an error");
            return Err(Error::Backend {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        response
            .json()
            .await
            .map_err(|e| Error::Transport(format!("Failed to decode response from {path}: {e}")))
    }
}

/// Pull `error_code: message` out of a workspace error body, falling back to the raw text
fn api_error_message(body: &str) -> String {
    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(ApiErrorBody {
            error_code: Some(code),
            message: Some(message),
        }) => format!("{code}: {message}"),
        Ok(ApiErrorBody {
            message: Some(message),
            ..
        }) => message,
        _ if body.is_empty() => "empty response".to_string(),
        _ => body.to_string(),
    }
}

/// OAuth token response for machine-to-machine login
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Build the client the service uses to enumerate tools at startup.
///
/// Prefers a configured token; otherwise performs an OAuth client-credentials
/// login with the service principal.
///
/// # Errors
///
/// Returns `Error::Config` if no service credential is configured, or the
/// login error if the token endpoint refuses.
pub async fn service_client(config: &WorkspaceConfig, http: Client) -> Result<WorkspaceClient> {
    let host = config
        .host
        .as_deref()
        .ok_or_else(|| Error::Config("Workspace host is not set".to_string()))?;
    let endpoint = WorkspaceEndpoint::new(http, host)?;

    if let Some(token) = &config.token {
        debug!(host = %endpoint.host(), "Using configured service token");
        return Ok(endpoint.authorize(token.clone()));
    }

    match (&config.client_id, &config.client_secret) {
        (Some(id), Some(secret)) => {
            let token = client_credentials_token(&endpoint, id, secret).await?;
            Ok(endpoint.authorize(token))
        }
        _ => Err(Error::Config(
            "No service credential configured (set DATABRICKS_TOKEN or \
             DATABRICKS_CLIENT_ID/DATABRICKS_CLIENT_SECRET)"
                .to_string(),
        )),
    }
}

async fn client_credentials_token(
    endpoint: &WorkspaceEndpoint,
    client_id: &str,
    client_secret: &str,
) -> Result<String> {
    let params = [("grant_type", "client_credentials"), ("scope", "all-apis")];

    let response = endpoint
        .http
        .post(endpoint.url("/oidc/v1/token"))
        .basic_auth(client_id, Some(client_secret))
        .form(&params)
        .send()
        .await
        .map_err(|e| Error::Transport(format!("Service login failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Config(format!(
            "Service login failed: HTTP {status} - {}",
            api_error_message(&body)
        )));
    }

    let token: TokenResponse = response
        .json()
        .await
        .map_err(|e| Error::Config(format!("Failed to parse service login response: {e}")))?;

    info!(
        client_id = %client_id,
        expires_in = ?token.expires_in,
        "Obtained service token via client credentials"
    );
    Ok(token.access_token)
}
