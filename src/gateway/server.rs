//! Gateway server

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use super::dispatch::Dispatcher;
use super::exchange::{ExchangeGateway, ExchangeRequest, TokenExchanger, WorkspaceTokenExchanger};
use super::identity::{IdentityProvider, IdentityState, WorkspaceIdentityProvider};
use super::router::{AppState, create_router};
use crate::config::Config;
use crate::tools::functions::FunctionAdapter;
use crate::tools::genie::GenieAdapter;
use crate::tools::vector_search::VectorSearchAdapter;
use crate::tools::{SourceAdapter, ToolRegistry};
use crate::workspace::{self, WorkspaceEndpoint};
use crate::{Error, Result};

/// MCP server exposing catalog tools with on-behalf-of execution
pub struct Gateway {
    config: Config,
    state: Arc<AppState>,
    identity: IdentityState,
}

impl Gateway {
    /// Connect to the workspace, enumerate tools and wire the request pipeline.
    ///
    /// # Errors
    ///
    /// Fails if the workspace host or service credential is unusable, or if
    /// any tool source fails to list.
    pub async fn new(config: Config) -> Result<Self> {
        let host = config
            .workspace
            .host
            .clone()
            .ok_or_else(|| Error::Config("Workspace host is not set".to_string()))?;

        let http = workspace::http_client(config.workspace.request_timeout())?;
        let service = workspace::service_client(&config.workspace, http).await?;

        // Query spaces first, then similarity search, then functions
        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(GenieAdapter::new(service.clone(), config.genie.clone())),
            Arc::new(VectorSearchAdapter::new(service.clone())),
            Arc::new(FunctionAdapter::new(service)),
        ];

        let exchange_endpoint =
            WorkspaceEndpoint::new(workspace::http_client(config.exchange.timeout)?, &host)?;
        let exchanger: Arc<dyn TokenExchanger> =
            Arc::new(WorkspaceTokenExchanger::new(exchange_endpoint));
        let identity: Arc<dyn IdentityProvider> = Arc::new(WorkspaceIdentityProvider::new(
            workspace::http_client(config.identity.timeout)?,
        ));

        Self::with_components(config, &adapters, identity, exchanger).await
    }

    /// Build a gateway from explicit components
    ///
    /// # Errors
    ///
    /// Fails if any adapter fails to list its tools.
    pub async fn with_components(
        config: Config,
        adapters: &[Arc<dyn SourceAdapter>],
        identity_provider: Arc<dyn IdentityProvider>,
        exchanger: Arc<dyn TokenExchanger>,
    ) -> Result<Self> {
        let registry = Arc::new(ToolRegistry::build(adapters, &config.catalog).await?);
        let names: Vec<&str> = registry.names().collect();
        info!(count = names.len(), tools = %names.join(", "), "Registered tools");

        let exchange = ExchangeGateway::new(exchanger, ExchangeRequest::from(&config.exchange));
        let state = Arc::new(AppState {
            dispatcher: Dispatcher::new(registry, exchange),
        });
        let identity = IdentityState::new(
            identity_provider,
            config.workspace.host.clone(),
            config.identity.enabled,
        );

        Ok(Self {
            config,
            state,
            identity,
        })
    }

    /// Tools being served
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        self.state.dispatcher.registry()
    }

    /// HTTP application
    pub fn router(&self) -> Router {
        create_router(
            Arc::clone(&self.state),
            self.identity.clone(),
            &self.config.server.mount_path,
        )
    }

    /// Bind and serve until Ctrl-C / SIGTERM
    ///
    /// # Errors
    ///
    /// Fails if the address is invalid or cannot be bound.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );

        let app = self.router();
        let listener = TcpListener::bind(addr).await?;

        info!("============================================================");
        info!("UC MCP GATEWAY v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(tools = self.registry().len(), "Tools registered");
        info!(
            "  POST http://{}:{}{}/mcp",
            self.config.server.host,
            self.config.server.port,
            self.config.server.mount_path.trim_end_matches('/')
        );
        info!("============================================================");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        let mut drain_rx = shutdown_tx.subscribe();
        let drain_timeout = self.config.server.shutdown_timeout;

        let server = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal(shutdown_tx))
                .await
        };

        tokio::select! {
            result = server => result.map_err(|e| Error::Internal(e.to_string()))?,
            () = async {
                let _ = drain_rx.recv().await;
                tokio::time::sleep(drain_timeout).await;
            } => {
                warn!(timeout = ?drain_timeout, "In-flight requests did not finish before shutdown timeout");
            }
        }

        info!("Server stopped");
        Ok(())
    }
}

/// Shutdown signal handler
async fn shutdown_signal(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
