//! MCP Server Manager
//!
//! Owns one [`McpConnection`] per configured server. Servers that fail to
//! spawn or handshake stay listed with their error so `status()` can report
//! them; nothing here retries.

use crate::config::McpServerConfig;
use crate::mcp::client::{
    ClientError, ConnectionObserver, ConnectionSettings, ConnectionState, McpConnection,
    ServerStatus,
};
use crate::mcp::transport::StdioTransport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

enum Entry {
    Live(Arc<McpConnection>),
    StartFailed(String),
}

/// Tracks every configured MCP server
pub struct McpManager {
    settings: ConnectionSettings,
    observer: Option<Arc<dyn ConnectionObserver>>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl McpManager {
    /// `observer` is handed to every connection (normally the tool registry).
    pub fn new(settings: ConnectionSettings, observer: Option<Arc<dyn ConnectionObserver>>) -> Self {
        Self {
            settings,
            observer,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Connect every enabled server.
    ///
    /// Failures are logged and returned; they do not stop the remaining
    /// servers from starting.
    pub async fn start_all(&self, servers: &[McpServerConfig]) -> Vec<(String, ClientError)> {
        let mut failures = Vec::new();
        for server in servers {
            if !server.enabled {
                info!(server = %server.name, "MCP server disabled, skipping");
                continue;
            }
            if let Err(e) = self.connect(server).await {
                failures.push((server.name.clone(), e));
            }
        }
        info!(
            started = servers.iter().filter(|s| s.enabled).count() - failures.len(),
            failed = failures.len(),
            "MCP servers started"
        );
        failures
    }

    /// Spawn and handshake one server, replacing any previous connection
    /// with the same name.
    ///
    /// # Errors
    ///
    /// Returns the spawn or handshake error. The server is still listed in
    /// `status()` as failed.
    pub async fn connect(&self, config: &McpServerConfig) -> Result<Arc<McpConnection>, ClientError> {
        self.disconnect(&config.name).await;

        let result = match StdioTransport::spawn(&config.name, &config.command, &config.args, &config.env) {
            Ok(transport) => {
                McpConnection::connect(
                    config.name.clone(),
                    transport,
                    self.settings,
                    self.observer.clone(),
                )
                .await
            }
            Err(e) => Err(ClientError::from(e)),
        };

        let entry = match &result {
            Ok(connection) => Entry::Live(Arc::clone(connection)),
            Err(e) => {
                warn!(server = %config.name, error = %e, "failed to start MCP server");
                Entry::StartFailed(e.to_string())
            }
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(config.name.clone(), entry);
        result
    }

    /// Close one server. Returns whether it was known.
    pub async fn disconnect(&self, name: &str) -> bool {
        let entry = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
        match entry {
            Some(Entry::Live(connection)) => {
                info!(server = name, "disconnecting MCP server");
                connection.close().await;
                true
            }
            Some(Entry::StartFailed(_)) => true,
            None => false,
        }
    }

    /// Close every server.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, Entry)> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        for (name, entry) in entries {
            if let Entry::Live(connection) = entry {
                info!(server = %name, "shutting down MCP server");
                connection.close().await;
            }
        }
    }

    /// Status of every known server, sorted by name
    pub fn status(&self) -> Vec<ServerStatus> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let mut statuses: Vec<ServerStatus> = entries
            .iter()
            .map(|(name, entry)| match entry {
                Entry::Live(connection) => connection.status(),
                Entry::StartFailed(error) => ServerStatus {
                    name: name.clone(),
                    state: ConnectionState::Failed,
                    tool_count: 0,
                    last_error: Some(error.clone()),
                },
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn connection(&self, name: &str) -> Option<Arc<McpConnection>> {
        match self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
        {
            Some(Entry::Live(connection)) => Some(Arc::clone(connection)),
            _ => None,
        }
    }
}
