//! Runtime values for the interpreter.

use std::fmt;

use crate::ast::Block;

#[derive(Debug, Clone)]
pub enum Value {
    Number(f64),
    Str(String),
    Bool(bool),
    None,
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Function { params: Vec<String>, body: Block },
    /// A tool result still carrying its structured shape, so the caller can
    /// unwrap a trailing `{result: ...}` envelope or detect an error flag.
    ToolResult { is_error: bool, text: String },
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bool(b) => *b,
            Value::None => false,
            Value::List(items) => !items.is_empty(),
            Value::Dict(pairs) => !pairs.is_empty(),
            Value::Function { .. } => true,
            Value::ToolResult { is_error, .. } => !is_error,
        }
    }

    /// The rendering used for `result`, captured stdout, and `print`.
    pub fn display_string(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::ToolResult { text, .. } => text.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{n}")
                }
            }
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::None => write!(f, "None"),
            Value::List(items) => {
                write!(f, "[{}]", items.iter().map(|v| v.repr()).collect::<Vec<_>>().join(", "))
            }
            Value::Dict(pairs) => {
                write!(
                    f,
                    "{{{}}}",
                    pairs.iter().map(|(k, v)| format!("{}: {}", k.repr(), v.repr())).collect::<Vec<_>>().join(", ")
                )
            }
            Value::Function { .. } => write!(f, "<function>"),
            Value::ToolResult { text, .. } => write!(f, "{text}"),
        }
    }
}

impl Value {
    fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{s}'"),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}
