// KubeGuard - Main Entry Point
//
// Operator CLI around the agent core:
// - classify: show how a command would be classified
// - evaluate: show the approval decision under the loaded policy
// - mcp-tools: start the configured MCP servers and list their tools

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kubeguard_agent::approval::{classify, PolicyEnforcer};
use kubeguard_agent::config::Config;
use kubeguard_agent::logging;
use kubeguard_agent::mcp::{ConnectionObserver, McpManager};
use kubeguard_agent::tools::{default_builtins, ToolRegistry};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// KubeGuard: approval-gated tool execution for Kubernetes agents
#[derive(Parser, Debug)]
#[command(name = "kubeguard")]
#[command(version)]
#[command(about = "Command safety classification and MCP tool management", long_about = None)]
struct Args {
    /// Config file (default: platform config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: pretty or json
    #[arg(long, global = true)]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the classification report for a command as JSON
    Classify {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Print the policy decision for a command, before any human prompt
    Evaluate {
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Start configured MCP servers, list all tools, then shut down
    McpTools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load().context("Failed to load config")?,
    };
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(format) = args.log_format {
        config.logging.format = format;
    }
    logging::init(&config.logging)?;

    match args.command {
        Commands::Classify { command } => {
            let report = classify(&command.join(" "));
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Evaluate { command } => {
            let enforcer = PolicyEnforcer::new(config.approval_policy())?;
            let (report, decision) = enforcer.evaluate_command(&command.join(" "));
            let output = json!({
                "command": report.command,
                "severity": report.severity,
                "rationale": report.rationale,
                "decision": decision,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::McpTools => list_tools(&config).await?,
    }

    Ok(())
}

async fn list_tools(config: &Config) -> Result<()> {
    let registry = Arc::new(ToolRegistry::new());
    for tool in default_builtins(&config.builtin_settings()) {
        registry.register_builtin(tool);
    }

    let observer: Arc<dyn ConnectionObserver> = registry.clone();
    let manager = McpManager::new(config.connection_settings(), Some(observer));
    let failures = manager.start_all(&config.mcp.servers).await;
    for (server, error) in &failures {
        warn!(server = %server, error = %error, "MCP server failed to start");
    }

    for definition in registry.definitions() {
        println!(
            "{:<40} {:<20} {}",
            definition.name, definition.origin, definition.description
        );
    }
    for status in manager.status() {
        info!(
            server = %status.name,
            state = %status.state,
            tools = status.tool_count,
            "server status"
        );
    }

    manager.shutdown().await;
    Ok(())
}
