pub mod blackboard;
pub mod capability;
pub mod config;
pub mod error;
pub mod memory;
pub mod perception;
pub mod plan;
pub mod tool;

pub use blackboard::{BlackboardState, ContextEntry, HitlConfig};
pub use config::{Config, ConfigError, ConfigSeverity, CoordinatorConfig, ExecutorConfig, McpServerConfig, RetrievalConfig};
pub use error::{Error, Result};
pub use memory::{contains_freshness_keyword, DocumentChunk, MemoryEntry, SessionTurn, SourceClass};
pub use perception::{PerceptionKind, PerceptionSnapshot};
pub use plan::{PlanStep, StepKind, StepStatus};
