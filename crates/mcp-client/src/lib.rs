//! `qa-mcp-client` — the tool-server multiplexer (C3).
//!
//! Connects to every configured child tool server over a line-oriented
//! JSON-RPC channel, aggregates their tool catalogs into one namespace, and
//! routes calls by name. See [`ToolMultiplexer`].

pub mod manager;
pub mod protocol;
pub mod transport;

pub use manager::{McpError, ToolMultiplexer, ToolServer};
pub use protocol::{McpToolDef, ToolCallContent, ToolCallResult};
pub use qa_domain::config::McpServerConfig;
