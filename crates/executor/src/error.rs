//! The error taxonomy a snippet run can surface, per the error kinds the
//! coordinator's replan logic switches on.

#[derive(Debug, Clone, thiserror::Error)]
pub enum ExecError {
    #[error("SyntaxError at line {line}")]
    Syntax { line: usize },
    #[error("operation budget exceeded: {count} calls > {limit}")]
    OperationBudgetExceeded { count: usize, limit: usize },
    #[error("timeout")]
    Timeout,
    #[error("tool error from '{tool}': {message}")]
    ToolError { tool: String, message: String },
    #[error("{kind}: {message}")]
    RuntimeError { kind: String, message: String },
}
