//! The tool-server multiplexer (C3): aggregates N child tool servers into a
//! single tool namespace and routes calls by name.

use std::collections::HashMap;

use serde_json::Value;

use qa_domain::config::McpServerConfig;

use crate::protocol::{self, McpToolDef, ToolCallResult, ToolsListResult};
use crate::transport::{McpTransport, StdioTransport, TransportError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolServer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One connected child tool server.
pub struct ToolServer {
    pub id: String,
    pub tools: Vec<McpToolDef>,
    transport: Box<dyn McpTransport>,
}

impl ToolServer {
    /// Spawn the process, perform the handshake (`initialize` →
    /// `notifications/initialized` → `tools/list`), and record its catalog.
    async fn initialize(config: &McpServerConfig) -> Result<Self, McpError> {
        let transport: Box<dyn McpTransport> = Box::new(StdioTransport::spawn(config).map_err(McpError::Transport)?);

        let init_params = protocol::initialize_params();
        let params_value = serde_json::to_value(&init_params)
            .map_err(|e| McpError::Protocol(format!("failed to serialize initialize params: {e}")))?;

        let resp = transport
            .send_request("initialize", Some(params_value))
            .await
            .map_err(McpError::Transport)?;
        if resp.is_error() {
            return Err(McpError::Protocol(format!("initialize failed: {}", resp.error.unwrap())));
        }
        tracing::debug!(server_id = %config.id, "tool server initialize response received");

        transport
            .send_notification("notifications/initialized")
            .await
            .map_err(McpError::Transport)?;

        let tools_resp = transport.send_request("tools/list", None).await.map_err(McpError::Transport)?;
        let tools = if tools_resp.is_error() {
            tracing::warn!(server_id = %config.id, "tools/list returned an error, server will have no tools");
            Vec::new()
        } else {
            let result_value = tools_resp.result.unwrap_or(Value::Null);
            match serde_json::from_value::<ToolsListResult>(result_value) {
                Ok(r) => r.tools,
                Err(e) => {
                    tracing::warn!(server_id = %config.id, error = %e, "failed to parse tools/list result");
                    Vec::new()
                }
            }
        };

        tracing::info!(server_id = %config.id, tool_count = tools.len(), "tool server initialized");

        Ok(Self { id: config.id.clone(), tools, transport })
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Dispatch a single call. `arguments` is forwarded verbatim as the
    /// JSON-RPC `arguments` payload; the executor is responsible for shaping
    /// positional arguments into whatever form the server expects.
    pub async fn call_tool(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        if !self.transport.is_alive() {
            return Err(McpError::ServerDown(self.id.clone()));
        }

        let params = serde_json::json!({ "name": tool_name, "arguments": arguments });
        let resp = self.transport.send_request("tools/call", Some(params)).await.map_err(McpError::Transport)?;
        if resp.is_error() {
            return Err(McpError::Protocol(format!("tools/call failed: {}", resp.error.unwrap())));
        }

        let result_value = resp.result.unwrap_or(Value::Null);
        serde_json::from_value::<ToolCallResult>(result_value)
            .map_err(|e| McpError::Protocol(format!("failed to parse tools/call result: {e}")))
    }

    async fn shutdown(&self) {
        tracing::info!(server_id = %self.id, "shutting down tool server");
        self.transport.shutdown().await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Multiplexer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Aggregates every configured tool server into one `tool_name → server_id`
/// namespace. Tool-name collisions across servers are rejected at init.
pub struct ToolMultiplexer {
    servers: HashMap<String, ToolServer>,
    /// tool_name -> owning server id, built once at init.
    routes: HashMap<String, String>,
}

impl ToolMultiplexer {
    pub fn empty() -> Self {
        Self { servers: HashMap::new(), routes: HashMap::new() }
    }

    /// Initialize from config: spawn each server, discover its tools, and
    /// build the global route table. A server that fails to initialize is
    /// logged and skipped rather than aborting startup.
    pub async fn from_config(configs: &[McpServerConfig]) -> Self {
        let mut servers = HashMap::new();
        let mut routes: HashMap<String, String> = HashMap::new();

        for server_config in configs {
            tracing::info!(server_id = %server_config.id, command = %server_config.command, "initializing tool server");

            match ToolServer::initialize(server_config).await {
                Ok(server) => {
                    for tool in &server.tools {
                        if let Some(existing) = routes.get(&tool.name) {
                            tracing::error!(
                                tool = %tool.name,
                                existing_server = %existing,
                                new_server = %server.id,
                                "tool name collision at init, keeping the first registration"
                            );
                            continue;
                        }
                        routes.insert(tool.name.clone(), server.id.clone());
                    }
                    servers.insert(server_config.id.clone(), server);
                }
                Err(e) => {
                    tracing::warn!(server_id = %server_config.id, error = %e, "failed to initialize tool server, skipping");
                }
            }
        }

        tracing::info!(server_count = servers.len(), tool_count = routes.len(), "tool multiplexer ready");
        Self { servers, routes }
    }

    /// The aggregated tool catalog across all alive servers.
    pub fn list_tools(&self) -> Vec<&McpToolDef> {
        self.servers
            .values()
            .filter(|s| s.is_alive())
            .flat_map(|server| server.tools.iter())
            .collect()
    }

    /// Route a call by tool name to its owning server.
    pub async fn call(&self, tool_name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let server_id = self.routes.get(tool_name).ok_or_else(|| McpError::ToolNotFound(tool_name.to_string()))?;
        let server = self.servers.get(server_id).ok_or_else(|| McpError::ServerNotFound(server_id.clone()))?;
        server.call_tool(tool_name, arguments).await
    }

    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    pub fn tool_count(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub async fn shutdown(&self) {
        let futs: Vec<_> = self.servers.values().map(|s| s.shutdown()).collect();
        futures_util::future::join_all(futs).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error type
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("tool server transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("tool server protocol error: {0}")]
    Protocol(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool server not found: {0}")]
    ServerNotFound(String),

    #[error("tool server is down: {0}")]
    ServerDown(String),
}

impl From<McpError> for qa_domain::error::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::ToolNotFound(name) => qa_domain::error::Error::ToolNotFound(name),
            McpError::ServerDown(id) => qa_domain::error::Error::ToolServerDown(id),
            other => qa_domain::error::Error::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_multiplexer_has_no_tools() {
        let mux = ToolMultiplexer::empty();
        assert!(mux.is_empty());
        assert_eq!(mux.tool_count(), 0);
    }
}
