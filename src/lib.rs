//! Unity Catalog MCP Gateway Library
//!
//! Exposes catalog capabilities as MCP tools over Streamable HTTP and runs
//! every call as the end user who made it.
//!
//! # Features
//!
//! - **Tool Registry**: query spaces (Genie), vector indexes and catalog
//!   functions aggregated into one namespace at startup
//! - **On-behalf-of execution**: each `tools/call` exchanges the caller's
//!   bearer token for a short-lived scoped token; no fallback credential
//! - **Identity enrichment**: forwarded user headers resolved per request
//!
//! # Protocol Version
//!
//! Implements MCP protocol versions 2024-11-05 and 2025-03-26 (Streamable HTTP).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod protocol;
pub mod tools;
pub mod workspace;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// # Errors
///
/// Returns `Error::Config` if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
