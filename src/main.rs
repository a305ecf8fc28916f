//! Unity Catalog MCP server
//!
//! Serves catalog tools over MCP, executing each call on behalf of the caller.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use uc_mcp_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    match cli.command {
        Some(Command::Tools { ref format }) => list_tools(config, format).await,
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load file + environment settings, apply CLI overrides and validate
fn load_config(cli: &Cli) -> Option<Config> {
    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return None;
        }
    };
    cli.apply_overrides(&mut config);

    if let Err(e) = config.validate() {
        error!("{e}");
        return None;
    }
    Some(config)
}

/// Print the tools the server would register
async fn list_tools(config: Config, format: &str) -> ExitCode {
    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to enumerate tools: {e}");
            return ExitCode::FAILURE;
        }
    };

    let tools: Vec<_> = gateway
        .registry()
        .list()
        .iter()
        .map(uc_mcp_gateway::tools::ToolDescriptor::to_mcp_tool)
        .collect();

    if format == "json" || format == "yaml" {
        let rendered = if format == "json" {
            serde_json::to_string_pretty(&tools).map_err(|e| e.to_string())
        } else {
            serde_yaml::to_string(&tools).map_err(|e| e.to_string())
        };
        match rendered {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Failed to serialize tools: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{} tool(s):\n", tools.len());
        for tool in &tools {
            println!("  {} - {}", tool.name, tool.description.as_deref().unwrap_or(""));
        }
    }
    ExitCode::SUCCESS
}

/// Run the server
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = ?config.workspace.host,
        schema = ?config.catalog.schema_full_name,
        genie_spaces = ?config.catalog.genie_space_ids,
        vector_search_num_results = config.catalog.vector_search_num_results,
        warehouse = ?config.catalog.warehouse_id,
        "Starting Unity Catalog MCP server"
    );

    let gateway = match Gateway::new(config).await {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
