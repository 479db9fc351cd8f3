//! Demo entry point for the orchestrator: loads a config file, wires up the
//! tool multiplexer and tiered retriever, and drives one query through the
//! coordinator.
//!
//! The real LLM/embedding clients (C1) are external collaborators this repo
//! does not implement (see the top-level design notes); this binary runs
//! against the scripted fakes in `qa-providers::fake` so the full state
//! machine is exercisable end to end without a network dependency.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use qa_coordinator::io::AutoApproveIo;
use qa_coordinator::{new_session, Coordinator, Outcome};
use qa_domain::blackboard::HitlConfig;
use qa_domain::config::Config;
use qa_providers::fake::{DeterministicEmbeddingProvider, ScriptedLlmProvider};
use qa_providers::{EmbeddingProvider, LlmProvider};
use qa_retrieval::{SessionMemory, TieredRetriever};

#[derive(Parser)]
#[command(name = "qa-orchestrator", about = "Run one query through the coordinator")]
struct Cli {
    /// Path to the YAML config document.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// The user query to answer.
    query: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config);
    tracing::info!(mcp_servers = config.mcp_servers.len(), max_steps = config.coordinator.max_steps, "config loaded");

    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            qa_domain::config::ConfigSeverity::Warning => tracing::warn!("{issue}"),
            qa_domain::config::ConfigSeverity::Error => tracing::error!("{issue}"),
        }
    }
    if qa_domain::config::Config::has_fatal_errors(&issues) {
        anyhow::bail!("config validation failed with {} fatal error(s)", issues.iter().filter(|i| i.severity == qa_domain::config::ConfigSeverity::Error).count());
    }

    let multiplexer = Arc::new(qa_mcp_client::ToolMultiplexer::from_config(&config.mcp_servers).await);
    tracing::info!(tools = multiplexer.tool_count(), servers = multiplexer.server_count(), "tool multiplexer ready");
    let tool_names: HashSet<String> = multiplexer.list_tools().into_iter().map(|t| t.name.clone()).collect();

    let index_root = PathBuf::from(&config.retrieval.index_root);
    std::fs::create_dir_all(&index_root)?;

    // No real embedding/LLM vendor client ships in this repo; see module docs.
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(DeterministicEmbeddingProvider::new(config.retrieval.embedding_dimension));
    let llm: Arc<dyn LlmProvider> = Arc::new(ScriptedLlmProvider::new(vec![]));

    let retriever = TieredRetriever::open(&index_root, config.retrieval.clone(), embeddings.clone())?;

    let (session_id, mut blackboard) = new_session(&index_root, cli.query.clone(), HitlConfig::default());
    let mut session_memory = SessionMemory::load_or_new(&index_root, session_id)?;

    let coordinator = Coordinator {
        llm,
        embeddings,
        retriever: &retriever,
        multiplexer,
        tool_names,
        executor_config: config.executor.clone(),
        coordinator_config: config.coordinator.clone(),
        index_root: index_root.clone(),
    };

    let outcome = coordinator.run_query(&mut blackboard, &mut session_memory, &AutoApproveIo).await;

    match outcome {
        Outcome::Done { answer } => {
            println!("{answer}");
            Ok(())
        }
        Outcome::Aborted { message } => {
            tracing::warn!(%message, "run aborted");
            Ok(())
        }
        Outcome::MaxStepsReached => {
            tracing::warn!("max steps reached without a conclusion");
            Ok(())
        }
        Outcome::Failed { message } => {
            anyhow::bail!(message);
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,qa_coordinator=debug")))
        .init();
}

/// Load config from `path`, falling back to defaults (with a warning) if the
/// file is missing or malformed.
fn load_config(path: &PathBuf) -> Config {
    match std::fs::read_to_string(path) {
        Ok(text) => match serde_yaml::from_str(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse config, using defaults");
                Config::default()
            }
        },
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "config file not found, using defaults");
            Config::default()
        }
    }
}
