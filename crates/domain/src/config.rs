use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The orchestrator's single startup YAML document.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
}

/// One child tool server, spawned as a stdio subprocess per the
/// line-oriented JSON-RPC protocol in the tool-server contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub id: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// Tunables for the tiered retriever (C4) and session memory (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub session_similarity_threshold: f32,
    pub memory_top_k: usize,
    pub document_top_k: usize,
    pub memory_promotion_confidence_floor: f32,
    pub memory_promotion_min_answer_len: usize,
    pub embedding_dimension: usize,
    pub index_root: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            session_similarity_threshold: 0.85,
            memory_top_k: 3,
            document_top_k: 5,
            memory_promotion_confidence_floor: 0.9,
            memory_promotion_min_answer_len: 20,
            embedding_dimension: 768,
            index_root: "index".to_string(),
        }
    }
}

/// Tunables for the sandboxed executor (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub max_operations: usize,
    pub per_call_budget_secs: u64,
    pub min_timeout_secs: u64,
    pub max_tool_retries: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_operations: 50,
            per_call_budget_secs: 1,
            min_timeout_secs: 3,
            max_tool_retries: 3,
        }
    }
}

/// Tunables for the coordinator state machine (C10).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_steps: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self { max_steps: 20 }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "error",
            ConfigSeverity::Warning => "warning",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the loaded config, returning every issue found rather than
    /// failing on the first one, so a caller can decide whether warnings are
    /// acceptable for its environment.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let mut seen_ids = std::collections::HashSet::new();
        for server in &self.mcp_servers {
            if server.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp_servers[].id".into(),
                    message: "server id must not be empty".into(),
                });
            }
            if server.id.contains(':') {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp_servers[].id".into(),
                    message: format!("server id '{}' must not contain ':'", server.id),
                });
            }
            if !seen_ids.insert(server.id.clone()) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp_servers[].id".into(),
                    message: format!("duplicate server id '{}'", server.id),
                });
            }
            if server.command.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "mcp_servers[].command".into(),
                    message: format!("server '{}' has an empty command", server.id),
                });
            }
        }

        if self.mcp_servers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "mcp_servers".into(),
                message: "no tool servers configured; the executor will have no tool functions".into(),
            });
        }

        if self.retrieval.session_similarity_threshold <= 0.0
            || self.retrieval.session_similarity_threshold > 1.0
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "retrieval.session_similarity_threshold".into(),
                message: "must be in (0, 1]".into(),
            });
        }

        if self.executor.max_operations == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "executor.max_operations".into(),
                message: "must be greater than zero".into(),
            });
        }

        if self.coordinator.max_steps == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "coordinator.max_steps".into(),
                message: "must be greater than zero".into(),
            });
        }

        errors
    }

    pub fn has_fatal_errors(errors: &[ConfigError]) -> bool {
        errors.iter().any(|e| e.severity == ConfigSeverity::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_only_the_no_servers_warning() {
        let cfg = Config::default();
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].severity, ConfigSeverity::Warning);
    }

    #[test]
    fn duplicate_server_ids_are_fatal() {
        let cfg = Config {
            mcp_servers: vec![
                McpServerConfig { id: "math".into(), command: "./math_server".into(), args: vec![], env: Default::default() },
                McpServerConfig { id: "math".into(), command: "./other".into(), args: vec![], env: Default::default() },
            ],
            ..Default::default()
        };
        let errors = cfg.validate();
        assert!(Config::has_fatal_errors(&errors));
    }

    #[test]
    fn parses_from_yaml() {
        let yaml = r#"
mcp_servers:
  - id: math
    command: "./mcp_server_2.py"
    args: ["--mode", "stdio"]
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.mcp_servers.len(), 1);
        assert_eq!(cfg.mcp_servers[0].id, "math");
        assert!(cfg.validate().is_empty());
    }
}
