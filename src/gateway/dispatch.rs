//! Tool invocation pipeline
//!
//! `Received -> CredentialValidated -> Exchanged -> Resolved -> Executed`.
//! Any failure ends the invocation; nothing is retried.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, trace, warn};

use super::exchange::ExchangeGateway;
use super::identity::CallerContext;
use crate::tools::{ToolRegistry, schema};
use crate::{Error, Result};

/// Stage an invocation reached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationStage {
    /// Request accepted by the handler
    Received,
    /// Bearer credential present and well formed
    CredentialValidated,
    /// Scoped credential minted
    Exchanged,
    /// Tool found in the registry
    Resolved,
    /// Handle returned
    Executed,
}

impl fmt::Display for InvocationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::CredentialValidated => "credential_validated",
            Self::Exchanged => "exchanged",
            Self::Resolved => "resolved",
            Self::Executed => "executed",
        };
        f.write_str(name)
    }
}

/// Resolves tools and runs them with the caller's scoped credential
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    exchange: ExchangeGateway,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(registry: Arc<ToolRegistry>, exchange: ExchangeGateway) -> Self {
        Self { registry, exchange }
    }

    /// Registry the dispatcher resolves against
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Invoke `name` on behalf of the caller identified by `authorization`.
    ///
    /// # Errors
    ///
    /// - `Error::Unauthenticated` / `Error::ExchangeFailed` from the exchange step
    /// - `Error::ToolNotFound` for an unknown name
    /// - `Error::InvalidArguments` when arguments violate the input schema
    /// - whatever the tool's backend reported, unchanged
    pub async fn invoke(
        &self,
        authorization: Option<&str>,
        caller: &CallerContext,
        name: &str,
        arguments: Value,
    ) -> Result<Value> {
        let started = Instant::now();
        let user = caller.user_info.as_ref().map(|u| u.user_name.as_str());
        trace!(tool = %name, stage = %InvocationStage::Received, user = ?user, "Tool call");

        let bearer = self.exchange.validate(authorization)?;
        trace!(tool = %name, stage = %InvocationStage::CredentialValidated, "Tool call");

        let credential = self.exchange.exchange(bearer).await?;
        trace!(tool = %name, stage = %InvocationStage::Exchanged, "Tool call");

        let Some(tool) = self.registry.resolve(name) else {
            debug!(tool = %name, "Unknown tool requested");
            return Err(Error::ToolNotFound(name.to_string()));
        };
        trace!(tool = %name, stage = %InvocationStage::Resolved, kind = %tool.kind(), "Tool call");

        let violations = schema::validate_arguments(&arguments, tool.input_schema());
        if !violations.is_empty() {
            let message = schema::format_error(&violations);
            debug!(tool = %name, error = %message, "Rejected tool arguments");
            return Err(Error::InvalidArguments(message));
        }

        let result = tool.handle().execute(&credential, arguments).await;
        let elapsed_ms = started.elapsed().as_millis();

        match &result {
            Ok(_) => debug!(
                tool = %name,
                stage = %InvocationStage::Executed,
                user = ?user,
                elapsed_ms,
                "Tool call completed"
            ),
            Err(e) if e.is_client_error() => {
                debug!(tool = %name, error = %e, elapsed_ms, "Tool rejected arguments");
            }
            Err(e) => warn!(tool = %name, kind = %tool.kind(), error = %e, elapsed_ms, "Tool call failed"),
        }
        result
    }
}
