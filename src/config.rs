//! Configuration management

use std::{env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Environment variable holding the workspace host
pub const HOST_ENV_VAR: &str = "DATABRICKS_HOST";
/// Environment variable holding the service token used for enumeration
pub const TOKEN_ENV_VAR: &str = "DATABRICKS_TOKEN";
/// Environment variable holding the service principal client id
pub const CLIENT_ID_ENV_VAR: &str = "DATABRICKS_CLIENT_ID";
/// Environment variable holding the service principal client secret
pub const CLIENT_SECRET_ENV_VAR: &str = "DATABRICKS_CLIENT_SECRET";

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before resolving workspace settings.
    /// Missing files are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Workspace connection
    pub workspace: WorkspaceConfig,
    /// Catalog selection consumed by the tool sources
    pub catalog: CatalogSettings,
    /// On-behalf-of token exchange
    pub exchange: ExchangeConfig,
    /// Forwarded-identity lookup
    pub identity: IdentityConfig,
    /// Query-space (Genie) polling
    pub genie: GenieConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // UC_MCP_CATALOG__SCHEMA_FULL_NAME=main.default etc.
        figment = figment.merge(Env::prefixed("UC_MCP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        config.load_env_files();
        config.apply_workspace_env();
        config.expand_env_vars();

        Ok(config)
    }

    /// Load environment files into the process environment.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let path = Path::new(path_str);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => tracing::info!("Loaded env file: {path_str}"),
                    Err(e) => tracing::warn!("Failed to load env file {path_str}: {e}"),
                }
            } else {
                tracing::debug!("Env file not found (skipped): {path_str}");
            }
        }
    }

    /// Fill unset workspace fields from the standard `DATABRICKS_*` variables.
    fn apply_workspace_env(&mut self) {
        let ws = &mut self.workspace;
        for (slot, var) in [
            (&mut ws.host, HOST_ENV_VAR),
            (&mut ws.token, TOKEN_ENV_VAR),
            (&mut ws.client_id, CLIENT_ID_ENV_VAR),
            (&mut ws.client_secret, CLIENT_SECRET_ENV_VAR),
        ] {
            if slot.is_none() {
                *slot = env::var(var).ok().filter(|v| !v.trim().is_empty());
            }
        }
    }

    /// Expand `${VAR}` and `${VAR:-default}` patterns in workspace values
    fn expand_env_vars(&mut self) {
        let Ok(re) = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}") else {
            return;
        };

        let ws = &mut self.workspace;
        for value in [
            &mut ws.host,
            &mut ws.token,
            &mut ws.client_id,
            &mut ws.client_secret,
        ]
        .into_iter()
        .flatten()
        {
            *value = Self::expand_string(&re, value);
        }
    }

    /// Expand environment variables in a string
    fn expand_string(re: &Regex, value: &str) -> String {
        re.replace_all(value, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map_or("", |m| m.as_str());
            env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
    }

    /// Check cross-field constraints after all overrides are applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` naming the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        self.catalog.validate()?;

        if self.workspace.host.is_none() {
            return Err(Error::Config(format!(
                "Workspace host is not set (use workspace.host or {HOST_ENV_VAR})"
            )));
        }
        if self.exchange.lifetime.is_zero() {
            return Err(Error::Config(
                "exchange.lifetime must be greater than zero".to_string(),
            ));
        }
        if self.exchange.comment.trim().is_empty() {
            return Err(Error::Config(
                "exchange.comment must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Path prefix the MCP endpoint is mounted under
    pub mount_path: String,
    /// Graceful shutdown timeout
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            mount_path: "/api".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Workspace connection settings.
///
/// The token or client credentials identify the service itself and are only
/// used to enumerate tools at startup.
#[derive(Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Workspace host (`https://...` or bare hostname)
    pub host: Option<String>,
    /// Service token
    pub token: Option<String>,
    /// Service principal client id (OAuth machine-to-machine)
    pub client_id: Option<String>,
    /// Service principal client secret
    pub client_secret: Option<String>,
    /// Timeout for workspace REST calls
    #[serde(with = "humantime_serde::option")]
    pub timeout: Option<Duration>,
}

impl WorkspaceConfig {
    /// Request timeout, defaulting to 60s
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.timeout.unwrap_or(Duration::from_secs(60))
    }
}

impl std::fmt::Debug for WorkspaceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceConfig")
            .field("host", &self.host)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Catalog selection handed to every tool source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSettings {
    /// `catalog.schema` whose functions and vector indexes become tools
    pub schema_full_name: Option<String>,
    /// Query-space (Genie) ids exposed as tools
    #[serde(deserialize_with = "deserialize_id_list")]
    pub genie_space_ids: Vec<String>,
    /// Number of rows returned by similarity search
    pub vector_search_num_results: u32,
    /// SQL warehouse used to execute catalog functions
    pub warehouse_id: Option<String>,
}

impl Default for CatalogSettings {
    fn default() -> Self {
        Self {
            schema_full_name: None,
            genie_space_ids: Vec::new(),
            vector_search_num_results: 5,
            warehouse_id: None,
        }
    }
}

impl CatalogSettings {
    /// Catalog part of `schema_full_name`
    #[must_use]
    pub fn catalog_name(&self) -> Option<&str> {
        self.schema_parts().map(|(catalog, _)| catalog)
    }

    /// Schema part of `schema_full_name`
    #[must_use]
    pub fn schema_name(&self) -> Option<&str> {
        self.schema_parts().map(|(_, schema)| schema)
    }

    fn schema_parts(&self) -> Option<(&str, &str)> {
        self.schema_full_name.as_deref()?.split_once('.')
    }

    /// Validate the selection.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if neither a schema nor query spaces are
    /// selected, the schema is not `catalog.schema`, or the result count is 0.
    pub fn validate(&self) -> Result<()> {
        if let Some(name) = &self.schema_full_name {
            let parts: Vec<&str> = name.split('.').collect();
            if parts.len() != 2 || parts.iter().any(|p| p.trim().is_empty()) {
                return Err(Error::Config(format!(
                    "schema_full_name must be in the format 'catalog.schema', got '{name}'"
                )));
            }
        }
        if self.schema_full_name.is_none() && self.genie_space_ids.is_empty() {
            return Err(Error::Config(
                "At least one of --schema (-s) or --genie-space-ids (-g) must be provided"
                    .to_string(),
            ));
        }
        if self.vector_search_num_results == 0 {
            return Err(Error::Config(
                "vector_search_num_results must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Split a comma-separated id string, trimming and dropping empty entries
#[must_use]
pub fn split_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Accept either a list or a comma-separated string
fn deserialize_id_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdList {
        Joined(String),
        List(Vec<String>),
    }

    Ok(match IdList::deserialize(deserializer)? {
        IdList::Joined(raw) => split_id_list(&raw),
        IdList::List(ids) => ids
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
    })
}

/// On-behalf-of token exchange settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Validity window requested for each scoped credential
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// Usage-intent label attached to each scoped credential
    pub comment: String,
    /// Timeout for one exchange call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            lifetime: Duration::from_secs(3600),
            comment: "tool execution".to_string(),
            timeout: Duration::from_secs(15),
        }
    }
}

/// Forwarded-identity lookup settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Resolve callers from forwarded headers
    pub enabled: bool,
    /// Timeout for one identity lookup
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(10),
        }
    }
}

/// Query-space polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenieConfig {
    /// Delay between message status polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Give up waiting for an answer after this long
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for GenieConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            max_wait: Duration::from_secs(300),
        }
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (e.g., "30s")
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{}s", duration.as_secs()))
    }

    /// Deserialize a duration string (e.g., "30s", "5m", "100ms") or bare seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        DurationValue::deserialize(deserializer)?
            .into_duration()
            .map_err(serde::de::Error::custom)
    }

    /// A duration as written in config: bare seconds or a suffixed string
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationValue {
        Seconds(u64),
        Text(String),
    }

    impl DurationValue {
        fn into_duration(self) -> Result<Duration, std::num::ParseIntError> {
            match self {
                Self::Seconds(secs) => Ok(Duration::from_secs(secs)),
                Self::Text(text) => parse(&text),
            }
        }
    }

    /// Parse "30s", "5m", "1h", "100ms" or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns the integer parse error for malformed input.
    pub fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        let s = s.trim();
        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>().map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>().map(|m| Duration::from_secs(m * 60))
        } else if let Some(hours) = s.strip_suffix('h') {
            hours.parse::<u64>().map(|h| Duration::from_secs(h * 3600))
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }

    /// `Option<Duration>` variant
    pub mod option {
        use std::time::Duration;

        use serde::{Deserialize, Deserializer, Serializer};

        /// Serialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a serialization error if the serializer fails.
        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        /// Deserialize an optional duration
        ///
        /// # Errors
        ///
        /// Returns a deserialization error if the string cannot be parsed.
        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<super::DurationValue>::deserialize(deserializer)?
                .map(|v| v.into_duration().map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
