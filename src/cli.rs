//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Unity Catalog MCP server - catalog tools executed on behalf of each caller
#[derive(Parser, Debug)]
#[command(name = "uc-mcp-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "UC_MCP_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Schema whose functions and vector indexes become tools (`catalog.schema`)
    #[arg(short = 's', long = "schema", env = "UC_MCP_SCHEMA", global = true)]
    pub schema_full_name: Option<String>,

    /// Comma-separated Genie space ids to expose as tools
    #[arg(
        short = 'g',
        long,
        env = "UC_MCP_GENIE_SPACE_IDS",
        value_delimiter = ',',
        global = true
    )]
    pub genie_space_ids: Vec<String>,

    /// Number of rows returned by similarity search
    #[arg(long, env = "UC_MCP_VECTOR_SEARCH_NUM_RESULTS", global = true)]
    pub vector_search_num_results: Option<u32>,

    /// SQL warehouse used to execute catalog functions
    #[arg(long, env = "UC_MCP_WAREHOUSE_ID", global = true)]
    pub warehouse_id: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "UC_MCP_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "UC_MCP_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "UC_MCP_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "UC_MCP_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the server (default)
    Serve,

    /// Enumerate the tools the server would expose and exit
    Tools {
        /// Output format (table, json, yaml)
        #[arg(short, long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    /// Apply command-line overrides on top of file and environment settings
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(schema) = &self.schema_full_name {
            config.catalog.schema_full_name = Some(schema.trim().to_string());
        }
        let ids: Vec<String> = self
            .genie_space_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect();
        if !ids.is_empty() {
            config.catalog.genie_space_ids = ids;
        }
        if let Some(n) = self.vector_search_num_results {
            config.catalog.vector_search_num_results = n;
        }
        if let Some(warehouse) = &self.warehouse_id {
            config.catalog.warehouse_id = Some(warehouse.clone());
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(host) = &self.host {
            config.server.host = host.clone();
        }
    }
}
