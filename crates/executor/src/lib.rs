//! `qa-executor` — the sandboxed executor (C6).
//!
//! Runs a planner-emitted snippet through the full pipeline: parse, guard
//! the call-count budget, rewrite keyword args to positional, collect local
//! definitions, auto-suspend bare tool calls, auto-inject a trailing
//! `return result`, then interpret under a timeout with a restricted
//! builtin/import surface.

pub mod ast;
pub mod error;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod rewrite;
pub mod value;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use qa_mcp_client::ToolMultiplexer;

pub use error::ExecError;
pub use value::Value;

/// The outcome of one snippet run, per the executor's output contract.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub execution_time: Duration,
    pub total_time: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Success,
    Error,
}

pub struct ExecutorConfig {
    pub max_operations: usize,
    pub per_call_budget: Duration,
    pub min_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_operations: 50, per_call_budget: Duration::from_secs(1), min_timeout: Duration::from_secs(3) }
    }
}

/// Run one snippet end to end against the given tool catalog.
pub async fn run_snippet(
    source: &str,
    tool_names: &HashSet<String>,
    multiplexer: Arc<ToolMultiplexer>,
    config: &ExecutorConfig,
) -> ExecutionOutcome {
    let total_start = Instant::now();

    let outcome = run_snippet_inner(source, tool_names, multiplexer, config, total_start).await;
    let total_time = total_start.elapsed();

    match outcome {
        Ok((value, execution_time)) => ExecutionOutcome {
            status: ExecutionStatus::Success,
            result: Some(value),
            error: None,
            execution_time,
            total_time,
        },
        Err(e) => ExecutionOutcome {
            status: ExecutionStatus::Error,
            result: None,
            error: Some(e.to_string()),
            execution_time: total_start.elapsed(),
            total_time,
        },
    }
}

async fn run_snippet_inner(
    source: &str,
    tool_names: &HashSet<String>,
    multiplexer: Arc<ToolMultiplexer>,
    config: &ExecutorConfig,
    total_start: Instant,
) -> Result<(String, Duration), ExecError> {
    // Step 1: parse.
    let block = parser::parse(source).map_err(|e| ExecError::Syntax { line: e.line })?;

    // Step 2: static call-count guard, before any rewriting.
    let call_count = rewrite::count_calls(&block);
    if call_count > config.max_operations {
        return Err(ExecError::OperationBudgetExceeded { count: call_count, limit: config.max_operations });
    }

    // Steps 3-6: keyword-to-positional, local-def collection, auto-suspend,
    // auto-return.
    let block = rewrite::rewrite_keywords_to_positional(block);
    let local_defs = rewrite::collect_local_defs(&block);
    let block = rewrite::auto_suspend(block, tool_names, &local_defs);
    let block = rewrite::auto_return(block);

    // Step 9: execute under a timeout.
    let timeout = std::cmp::max(config.min_timeout, config.per_call_budget * call_count as u32);
    let exec_start = Instant::now();

    let mut interpreter = interpreter::Interpreter::new(multiplexer, tool_names.clone());
    let run_result = tokio::time::timeout(timeout, interpreter.run(&block)).await;

    let execution_time = exec_start.elapsed();
    let _ = total_start; // kept for symmetry with `total_time`, computed by the caller

    let return_value = match run_result {
        Ok(Ok(v)) => v,
        Ok(Err(e)) => return Err(e),
        Err(_) => return Err(ExecError::Timeout),
    };

    // Step 10: resolve effective value in priority order.
    let final_answer = interpreter.take_final_answer();
    let stdout = interpreter.take_stdout();

    let effective = match (return_value, final_answer) {
        (Some(v), _) => v,
        (None, Some(v)) => v,
        (None, None) if !stdout.trim_end_matches('\n').is_empty() => {
            Value::Str(stdout.trim_end_matches('\n').to_string())
        }
        (None, None) => Value::Str("Executed successfully (no output)".to_string()),
    };

    // Step 11: tool-error unwrap.
    if let Value::ToolResult { is_error: true, text } = &effective {
        return Err(ExecError::ToolError { tool: "unknown".to_string(), message: text.clone() });
    }

    Ok((effective.display_string(), execution_time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ExecutorConfig {
        ExecutorConfig::default()
    }

    #[tokio::test]
    async fn zero_call_snippet_succeeds_with_timeout_floor() {
        let outcome =
            run_snippet("result = 1 + 1", &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.result.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn operation_budget_boundary_51_calls_rejected() {
        let mut src = String::new();
        for _ in 0..51 {
            src.push_str("abs(1)\n");
        }
        let cfg = ExecutorConfig { max_operations: 50, ..config() };
        let outcome = run_snippet(&src, &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &cfg).await;
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.error.unwrap().contains("budget"));
    }

    #[tokio::test]
    async fn operation_budget_boundary_50_calls_accepted() {
        let mut src = String::new();
        for _ in 0..50 {
            src.push_str("abs(1)\n");
        }
        src.push_str("result = 1\n");
        let cfg = ExecutorConfig { max_operations: 50, ..config() };
        let outcome = run_snippet(&src, &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &cfg).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn syntax_error_surfaces_as_parse_error() {
        let outcome =
            run_snippet("result = (1 +", &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Error);
        assert!(outcome.error.unwrap().contains("SyntaxError"));
    }

    #[tokio::test]
    async fn print_output_is_the_effective_value_when_no_return_or_final_answer() {
        let outcome = run_snippet("print('hello world')", &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.result.as_deref(), Some("hello world"));
    }

    #[tokio::test]
    async fn no_output_sentinel_when_nothing_was_produced() {
        let outcome = run_snippet("x = 1", &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.result.as_deref(), Some("Executed successfully (no output)"));
    }

    #[tokio::test]
    async fn final_answer_sink_takes_priority_over_stdout() {
        let src = "print('not this')\nfinal_answer('this')";
        let outcome = run_snippet(src, &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.result.as_deref(), Some("this"));
    }

    #[tokio::test]
    async fn keyword_rewrite_end_to_end_s4() {
        let src = r#"
def add(a, b) {
    return a + b
}
result = add(b=2, a=3)
"#;
        let outcome = run_snippet(src, &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Success);
        assert_eq!(outcome.result.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn undefined_name_is_a_runtime_error_not_a_panic() {
        let outcome = run_snippet("result = undefined_thing()", &HashSet::new(), Arc::new(ToolMultiplexer::empty()), &config()).await;
        assert_eq!(outcome.status, ExecutionStatus::Error);
    }
}
