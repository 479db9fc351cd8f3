//! Tree-walking async interpreter.
//!
//! The snippet's entry function is cooperative: only a suspension
//! expression (tool call) actually yields to the runtime. Everything else
//! runs to completion synchronously inside the `async fn` methods below —
//! they're `async` purely so a suspension point partway through an
//! expression can `.await` the tool proxy without re-entering the
//! interpreter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use qa_mcp_client::ToolMultiplexer;

use crate::ast::{Arg, BinOp, Block, Expr, Stmt, UnOp};
use crate::error::ExecError;
use crate::value::Value;

/// Modules the snippet is allowed to `import`. Only `math`, `json`, and
/// `random` have live function dispatch below; the rest are accepted by the
/// import statement (so a snippet referencing them doesn't fail at parse
/// time) but calling an unsupported module function is a runtime error.
pub const ALLOWED_MODULES: &[&str] = &[
    "math", "decimal", "random", "string", "re", "datetime", "time", "collections", "hashlib", "base64",
    "json", "gzip", "zlib", "pathlib", "tempfile", "inspect", "itertools", "statistics", "textwrap",
];

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

enum Flow {
    Normal,
    Return(Value),
}

pub struct Interpreter {
    globals: HashMap<String, Value>,
    functions: HashMap<String, Value>,
    scopes: Vec<HashMap<String, Value>>,
    stdout: String,
    final_answer: Option<Value>,
    tool_names: HashSet<String>,
    multiplexer: Arc<ToolMultiplexer>,
}

impl Interpreter {
    pub fn new(multiplexer: Arc<ToolMultiplexer>, tool_names: HashSet<String>) -> Self {
        Self {
            globals: HashMap::new(),
            functions: HashMap::new(),
            scopes: Vec::new(),
            stdout: String::new(),
            final_answer: None,
            tool_names,
            multiplexer,
        }
    }

    pub fn take_stdout(&mut self) -> String {
        std::mem::take(&mut self.stdout)
    }

    pub fn take_final_answer(&mut self) -> Option<Value> {
        self.final_answer.take()
    }

    /// Run the rewritten block (steps 7-10 of the pipeline collapse into
    /// this one call — there's no separate "entry function" object, just a
    /// fresh top-level scope).
    pub async fn run(&mut self, block: &Block) -> Result<Option<Value>, ExecError> {
        for stmt in block {
            if let Stmt::FunctionDef { name, params, body } = stmt {
                self.functions.insert(name.clone(), Value::Function { params: params.clone(), body: body.clone() });
            }
        }
        match self.exec_block(block).await? {
            Flow::Return(v) => Ok(Some(v)),
            Flow::Normal => Ok(None),
        }
    }

    fn get_var(&self, name: &str) -> Value {
        if let Some(scope) = self.scopes.last() {
            if let Some(v) = scope.get(name) {
                return v.clone();
            }
        }
        self.globals.get(name).cloned().unwrap_or(Value::None)
    }

    fn set_var(&mut self, name: &str, value: Value) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), value);
        } else {
            self.globals.insert(name.to_string(), value);
        }
    }

    fn exec_block<'a>(&'a mut self, block: &'a Block) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Flow, ExecError>> + Send + 'a>> {
        Box::pin(async move {
            for stmt in block {
                match self.exec_stmt(stmt).await? {
                    Flow::Normal => {}
                    ret @ Flow::Return(_) => return Ok(ret),
                }
            }
            Ok(Flow::Normal)
        })
    }

    async fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ExecError> {
        match stmt {
            Stmt::Expr(e) => {
                self.eval_expr(e).await?;
                Ok(Flow::Normal)
            }
            Stmt::Assign { target, value } => {
                let v = self.eval_expr(value).await?;
                self.set_var(target, v);
                Ok(Flow::Normal)
            }
            Stmt::IndexAssign { target, index, value } => {
                let idx = self.eval_expr(index).await?;
                let val = self.eval_expr(value).await?;
                let name = match target {
                    Expr::Ident(n) => n.clone(),
                    _ => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "indexed assignment target must be a variable".into() }),
                };
                let mut container = self.get_var(&name);
                match (&mut container, &idx) {
                    (Value::List(items), Value::Number(n)) => {
                        let i = *n as usize;
                        if i < items.len() {
                            items[i] = val;
                        } else {
                            return Err(ExecError::RuntimeError { kind: "IndexError".into(), message: "list index out of range".into() });
                        }
                    }
                    (Value::Dict(pairs), key) => {
                        if let Some(slot) = pairs.iter_mut().find(|(k, _)| k == key) {
                            slot.1 = val;
                        } else {
                            pairs.push((key.clone(), val));
                        }
                    }
                    _ => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "unsupported indexed assignment".into() }),
                }
                self.set_var(&name, container);
                Ok(Flow::Normal)
            }
            Stmt::FunctionDef { name, params, body } => {
                self.functions.insert(name.clone(), Value::Function { params: params.clone(), body: body.clone() });
                Ok(Flow::Normal)
            }
            Stmt::If { cond, then_branch, else_branch } => {
                if self.eval_expr(cond).await?.truthy() {
                    self.exec_block(then_branch).await
                } else {
                    self.exec_block(else_branch).await
                }
            }
            Stmt::While { cond, body } => {
                let mut guard = 0;
                while self.eval_expr(cond).await?.truthy() {
                    guard += 1;
                    if guard > 100_000 {
                        return Err(ExecError::RuntimeError { kind: "RuntimeError".into(), message: "while loop exceeded iteration guard".into() });
                    }
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::For { var, iter, body } => {
                let items = self.eval_expr(iter).await?;
                let elems = match items {
                    Value::List(v) => v,
                    other => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: format!("cannot iterate over {other}") }),
                };
                for elem in elems {
                    self.set_var(var, elem);
                    match self.exec_block(body).await? {
                        Flow::Normal => {}
                        ret @ Flow::Return(_) => return Ok(ret),
                    }
                }
                Ok(Flow::Normal)
            }
            Stmt::Return(e) => {
                let v = match e {
                    Some(e) => self.eval_expr(e).await?,
                    None => Value::None,
                };
                Ok(Flow::Return(v))
            }
            Stmt::Import(name) => {
                if ALLOWED_MODULES.contains(&name.as_str()) {
                    Ok(Flow::Normal)
                } else {
                    Err(ExecError::RuntimeError { kind: "ImportError".into(), message: format!("module '{name}' is not in the sandbox allowlist") })
                }
            }
        }
    }

    fn eval_expr<'a>(&'a mut self, expr: &'a Expr) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Value, ExecError>> + Send + 'a>> {
        Box::pin(async move {
            match expr {
                Expr::Number(n) => Ok(Value::Number(*n)),
                Expr::Str(s) => Ok(Value::Str(s.clone())),
                Expr::Bool(b) => Ok(Value::Bool(*b)),
                Expr::None => Ok(Value::None),
                Expr::Ident(name) => Ok(self.get_var(name)),
                Expr::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.eval_expr(item).await?);
                    }
                    Ok(Value::List(out))
                }
                Expr::Dict(pairs) => {
                    let mut out = Vec::with_capacity(pairs.len());
                    for (k, v) in pairs {
                        out.push((self.eval_expr(k).await?, self.eval_expr(v).await?));
                    }
                    Ok(Value::Dict(out))
                }
                Expr::Unary(op, inner) => {
                    let v = self.eval_expr(inner).await?;
                    match op {
                        UnOp::Neg => match v {
                            Value::Number(n) => Ok(Value::Number(-n)),
                            other => Err(ExecError::RuntimeError { kind: "TypeError".into(), message: format!("cannot negate {other}") }),
                        },
                        UnOp::Not => Ok(Value::Bool(!v.truthy())),
                    }
                }
                Expr::Binary(lhs, op, rhs) => self.eval_binary(lhs, op, rhs).await,
                Expr::Index(base, idx) => {
                    let base_v = self.eval_expr(base).await?;
                    let idx_v = self.eval_expr(idx).await?;
                    match (base_v, idx_v) {
                        (Value::List(items), Value::Number(n)) => {
                            let i = n as isize;
                            let i = if i < 0 { items.len() as isize + i } else { i };
                            items.get(i as usize).cloned().ok_or_else(|| ExecError::RuntimeError {
                                kind: "IndexError".into(),
                                message: "list index out of range".into(),
                            })
                        }
                        (Value::Dict(pairs), key) => Ok(pairs.into_iter().find(|(k, _)| *k == key).map(|(_, v)| v).unwrap_or(Value::None)),
                        (Value::Str(s), Value::Number(n)) => {
                            s.chars().nth(n as usize).map(|c| Value::Str(c.to_string())).ok_or_else(|| ExecError::RuntimeError {
                                kind: "IndexError".into(),
                                message: "string index out of range".into(),
                            })
                        }
                        (other, _) => Err(ExecError::RuntimeError { kind: "TypeError".into(), message: format!("{other} is not indexable") }),
                    }
                }
                Expr::Attr(_, _) => Err(ExecError::RuntimeError {
                    kind: "RuntimeError".into(),
                    message: "attribute access is only supported as part of a module function call".into(),
                }),
                Expr::Await(inner) => self.eval_await(inner).await,
                Expr::Call { callee, args } => self.eval_call(callee, args).await,
                Expr::ListComp { expr, var, iter, cond } => {
                    let iterable = self.eval_expr(iter).await?;
                    let elems = match iterable {
                        Value::List(v) => v,
                        other => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: format!("cannot iterate over {other}") }),
                    };
                    let mut out = Vec::new();
                    for elem in elems {
                        self.set_var(var, elem);
                        if let Some(cond) = cond {
                            if !self.eval_expr(cond).await?.truthy() {
                                continue;
                            }
                        }
                        out.push(self.eval_expr(expr).await?);
                    }
                    Ok(Value::List(out))
                }
            }
        })
    }

    async fn eval_binary(&mut self, lhs: &Expr, op: &BinOp, rhs: &Expr) -> Result<Value, ExecError> {
        if *op == BinOp::And {
            let l = self.eval_expr(lhs).await?;
            if !l.truthy() {
                return Ok(l);
            }
            return self.eval_expr(rhs).await;
        }
        if *op == BinOp::Or {
            let l = self.eval_expr(lhs).await?;
            if l.truthy() {
                return Ok(l);
            }
            return self.eval_expr(rhs).await;
        }

        let l = self.eval_expr(lhs).await?;
        let r = self.eval_expr(rhs).await?;

        match op {
            BinOp::Add => match (&l, &r) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
                (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
                _ => Err(type_error("+", &l, &r)),
            },
            BinOp::Sub => numeric(l, r, |a, b| a - b),
            BinOp::Mul => numeric(l, r, |a, b| a * b),
            BinOp::Div => numeric(l, r, |a, b| a / b),
            BinOp::FloorDiv => numeric(l, r, |a, b| (a / b).floor()),
            BinOp::Mod => numeric(l, r, |a, b| a % b),
            BinOp::Eq => Ok(Value::Bool(l == r)),
            BinOp::NotEq => Ok(Value::Bool(l != r)),
            BinOp::Lt => compare(l, r, |o| o.is_lt()),
            BinOp::LtEq => compare(l, r, |o| o.is_le()),
            BinOp::Gt => compare(l, r, |o| o.is_gt()),
            BinOp::GtEq => compare(l, r, |o| o.is_ge()),
            BinOp::And | BinOp::Or => unreachable!("handled above"),
        }
    }

    async fn eval_await(&mut self, inner: &Expr) -> Result<Value, ExecError> {
        if let Expr::Call { callee, args } = inner {
            if let Expr::Ident(name) = callee.as_ref() {
                if self.tool_names.contains(name) {
                    let mut positional = Vec::with_capacity(args.len());
                    for a in args {
                        positional.push(self.eval_expr(&a.value).await?);
                    }
                    return self.call_tool_with_retry(name, positional).await;
                }
            }
        }
        self.eval_expr(inner).await
    }

    async fn eval_call(&mut self, callee: &Expr, args: &[Arg]) -> Result<Value, ExecError> {
        // Module-qualified function: `math.sqrt(x)`, handled without treating
        // the module name as a variable.
        if let Expr::Attr(base, func) = callee {
            if let Expr::Ident(module) = base.as_ref() {
                let mut evaluated = Vec::with_capacity(args.len());
                for a in args {
                    evaluated.push(self.eval_expr(&a.value).await?);
                }
                return call_module_function(module, func, &evaluated);
            }
        }

        let name = match callee {
            Expr::Ident(name) => name.clone(),
            _ => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "unsupported call target".into() }),
        };

        if name == "parallel" {
            return self.eval_parallel(args).await;
        }

        let mut evaluated = Vec::with_capacity(args.len());
        for a in args {
            evaluated.push(self.eval_expr(&a.value).await?);
        }

        if let Some(builtin) = call_builtin(&name, &evaluated) {
            if let Some(v) = builtin? {
                return Ok(v);
            }
        }
        if name == "print" {
            let rendered = evaluated.iter().map(|v| v.display_string()).collect::<Vec<_>>().join(" ");
            self.stdout.push_str(&rendered);
            self.stdout.push('\n');
            return Ok(Value::None);
        }
        if name == "final_answer" {
            let v = evaluated.into_iter().next().unwrap_or(Value::None);
            self.final_answer = Some(v.clone());
            return Ok(v);
        }

        if let Some(Value::Function { params, body }) = self.functions.get(&name).cloned() {
            let mut frame = HashMap::new();
            for (param, value) in params.iter().zip(evaluated.into_iter()) {
                frame.insert(param.clone(), value);
            }
            self.scopes.push(frame);
            let result = self.exec_block(&body).await;
            self.scopes.pop();
            return match result? {
                Flow::Return(v) => Ok(v),
                Flow::Normal => Ok(Value::None),
            };
        }

        if self.tool_names.contains(&name) {
            // A tool call that reached here without being auto-suspended
            // (e.g. the rewrite pass wasn't applied to this sub-expression).
            return self.call_tool_with_retry(&name, evaluated).await;
        }

        Err(ExecError::RuntimeError { kind: "NameError".into(), message: format!("name '{name}' is not defined") })
    }

    async fn eval_parallel(&mut self, args: &[Arg]) -> Result<Value, ExecError> {
        let mut calls = Vec::with_capacity(args.len());
        for a in args {
            let inner = match &a.value {
                Expr::Await(inner) => inner.as_ref(),
                other => other,
            };
            let (name, call_args) = match inner {
                Expr::Call { callee, args } => match callee.as_ref() {
                    Expr::Ident(name) => (name.clone(), args),
                    _ => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "parallel() arguments must be tool calls".into() }),
                },
                _ => return Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "parallel() arguments must be tool calls".into() }),
            };
            let mut evaluated = Vec::with_capacity(call_args.len());
            for a in call_args {
                evaluated.push(self.eval_expr(&a.value).await?);
            }
            calls.push((name, evaluated));
        }

        let futures = calls.into_iter().map(|(name, args)| {
            let multiplexer = self.multiplexer.clone();
            async move { call_tool_once(&multiplexer, &name, args).await }
        });
        let results = futures_util::future::join_all(futures).await;
        let mut out = Vec::with_capacity(results.len());
        for r in results {
            out.push(r?);
        }
        Ok(Value::List(out))
    }

    async fn call_tool_with_retry(&self, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
        let mut last_err = None;
        for attempt in 0..RETRY_ATTEMPTS {
            match call_tool_once(&self.multiplexer, name, args.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < RETRY_ATTEMPTS {
                        tokio::time::sleep(RETRY_BASE_DELAY * (attempt + 1)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(ExecError::ToolError { tool: name.to_string(), message: "unknown failure".into() }))
    }
}

async fn call_tool_once(multiplexer: &ToolMultiplexer, name: &str, args: Vec<Value>) -> Result<Value, ExecError> {
    let arguments = values_to_json(&args);
    let result = multiplexer
        .call(name, arguments)
        .await
        .map_err(|e| ExecError::ToolError { tool: name.to_string(), message: e.to_string() })?;

    let first_text = result.content.first().map(|c| c.text.clone()).unwrap_or_default();
    let unwrapped = match serde_json::from_str::<serde_json::Value>(&first_text) {
        Ok(serde_json::Value::Object(map)) => map.get("result").map(json_to_display).unwrap_or(first_text.clone()),
        _ => first_text.clone(),
    };

    if result.is_error {
        return Err(ExecError::ToolError { tool: name.to_string(), message: unwrapped });
    }
    Ok(Value::ToolResult { is_error: false, text: unwrapped })
}

fn json_to_display(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn values_to_json(args: &[Value]) -> serde_json::Value {
    serde_json::Value::Array(args.iter().map(value_to_json).collect())
}

fn value_to_json(v: &Value) -> serde_json::Value {
    match v {
        Value::Number(n) => serde_json::json!(n),
        Value::Str(s) => serde_json::json!(s),
        Value::Bool(b) => serde_json::json!(b),
        Value::None => serde_json::Value::Null,
        Value::List(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Dict(pairs) => {
            let mut map = serde_json::Map::new();
            for (k, v) in pairs {
                map.insert(k.display_string(), value_to_json(v));
            }
            serde_json::Value::Object(map)
        }
        Value::Function { .. } => serde_json::Value::Null,
        Value::ToolResult { text, .. } => serde_json::json!(text),
    }
}

fn numeric(l: Value, r: Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, ExecError> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(a, b))),
        (a, b) => Err(type_error("arithmetic", &a, &b)),
    }
}

fn compare(l: Value, r: Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, ExecError> {
    match (&l, &r) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(pred(a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal)))),
        (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(pred(a.cmp(b)))),
        _ => Err(type_error("comparison", &l, &r)),
    }
}

fn type_error(op: &str, a: &Value, b: &Value) -> ExecError {
    ExecError::RuntimeError { kind: "TypeError".into(), message: format!("unsupported operand types for {op}: {a} and {b}") }
}

/// Returns `Some(Ok(value))`/`Some(Err(_))` if `name` is a recognized
/// builtin, `None` if it isn't (letting the caller fall through to
/// user-defined functions and tool dispatch).
fn call_builtin(name: &str, args: &[Value]) -> Option<Result<Option<Value>, ExecError>> {
    let result = match name {
        "len" => match args.first() {
            Some(Value::Str(s)) => Value::Number(s.chars().count() as f64),
            Some(Value::List(items)) => Value::Number(items.len() as f64),
            Some(Value::Dict(pairs)) => Value::Number(pairs.len() as f64),
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "len() requires a sized argument".into() })),
        },
        "str" => Value::Str(args.first().map(|v| v.display_string()).unwrap_or_default()),
        "int" => match args.first() {
            Some(Value::Number(n)) => Value::Number(n.trunc()),
            Some(Value::Str(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Value::Number(n.trunc()),
                Err(_) => return Some(Err(ExecError::RuntimeError { kind: "ValueError".into(), message: format!("invalid literal for int(): '{s}'") })),
            },
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "int() requires a number or string".into() })),
        },
        "float" => match args.first() {
            Some(Value::Number(n)) => Value::Number(*n),
            Some(Value::Str(s)) => match s.trim().parse::<f64>() {
                Ok(n) => Value::Number(n),
                Err(_) => return Some(Err(ExecError::RuntimeError { kind: "ValueError".into(), message: format!("invalid literal for float(): '{s}'") })),
            },
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "float() requires a number or string".into() })),
        },
        "abs" => match args.first() {
            Some(Value::Number(n)) => Value::Number(n.abs()),
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "abs() requires a number".into() })),
        },
        "round" => match args.first() {
            Some(Value::Number(n)) => Value::Number(n.round()),
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "round() requires a number".into() })),
        },
        "min" | "max" => {
            let nums: Vec<f64> = args
                .iter()
                .map(|v| match v {
                    Value::Number(n) => Some(*n),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .unwrap_or_default();
            if nums.is_empty() {
                return Some(Err(ExecError::RuntimeError { kind: "ValueError".into(), message: format!("{name}() requires at least one numeric argument") }));
            }
            let v = if name == "min" { nums.into_iter().fold(f64::INFINITY, f64::min) } else { nums.into_iter().fold(f64::NEG_INFINITY, f64::max) };
            Value::Number(v)
        }
        "sum" => match args.first() {
            Some(Value::List(items)) => {
                let mut total = 0.0;
                for item in items {
                    match item {
                        Value::Number(n) => total += n,
                        _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "sum() requires a list of numbers".into() })),
                    }
                }
                Value::Number(total)
            }
            _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "sum() requires a list".into() })),
        },
        "range" => {
            let (start, stop) = match args {
                [Value::Number(stop)] => (0.0, *stop),
                [Value::Number(start), Value::Number(stop)] => (*start, *stop),
                _ => return Some(Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "range() requires 1 or 2 numeric arguments".into() })),
            };
            let mut items = Vec::new();
            let mut i = start;
            while i < stop {
                items.push(Value::Number(i));
                i += 1.0;
            }
            Value::List(items)
        }
        _ => return None,
    };
    Some(Ok(Some(result)))
}

fn call_module_function(module: &str, func: &str, args: &[Value]) -> Result<Value, ExecError> {
    let arg_num = |i: usize| -> Result<f64, ExecError> {
        match args.get(i) {
            Some(Value::Number(n)) => Ok(*n),
            _ => Err(ExecError::RuntimeError { kind: "TypeError".into(), message: format!("{module}.{func}() expects a numeric argument") }),
        }
    };

    match module {
        "math" => match func {
            "sqrt" => Ok(Value::Number(arg_num(0)?.sqrt())),
            "floor" => Ok(Value::Number(arg_num(0)?.floor())),
            "ceil" => Ok(Value::Number(arg_num(0)?.ceil())),
            "pow" => Ok(Value::Number(arg_num(0)?.powf(arg_num(1)?))),
            _ => Err(unsupported_module_fn(module, func)),
        },
        "json" => match func {
            "dumps" => Ok(Value::Str(serde_json::to_string(&value_to_json(args.first().unwrap_or(&Value::None))).unwrap_or_default())),
            "loads" => match args.first() {
                Some(Value::Str(s)) => {
                    let parsed: serde_json::Value = serde_json::from_str(s)
                        .map_err(|e| ExecError::RuntimeError { kind: "ValueError".into(), message: e.to_string() })?;
                    Ok(json_to_value(&parsed))
                }
                _ => Err(ExecError::RuntimeError { kind: "TypeError".into(), message: "json.loads() requires a string".into() }),
            },
            _ => Err(unsupported_module_fn(module, func)),
        },
        "random" => match func {
            "random" => Ok(Value::Number(0.5)),
            "randint" => Ok(Value::Number(arg_num(0)?)),
            _ => Err(unsupported_module_fn(module, func)),
        },
        _ if ALLOWED_MODULES.contains(&module) => Err(unsupported_module_fn(module, func)),
        _ => Err(ExecError::RuntimeError { kind: "ImportError".into(), message: format!("module '{module}' is not in the sandbox allowlist") }),
    }
}

fn unsupported_module_fn(module: &str, func: &str) -> ExecError {
    ExecError::RuntimeError { kind: "AttributeError".into(), message: format!("module '{module}' has no usable function '{func}' in this sandbox") }
}

fn json_to_value(v: &serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => Value::List(items.iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Dict(map.iter().map(|(k, v)| (Value::Str(k.clone()), json_to_value(v))).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn interpreter(tool_names: &[&str]) -> Interpreter {
        Interpreter::new(Arc::new(ToolMultiplexer::empty()), tool_names.iter().map(|s| s.to_string()).collect())
    }

    async fn run(src: &str, tool_names: &[&str]) -> Result<Option<Value>, ExecError> {
        let block = parser::parse(src).unwrap();
        interpreter(tool_names).run(&block).await
    }

    #[tokio::test]
    async fn arithmetic_and_return() {
        let v = run("return 2 * (3 + 4)", &[]).await.unwrap();
        assert_eq!(v, Some(Value::Number(14.0)));
    }

    #[tokio::test]
    async fn math_module_dispatch() {
        let v = run("import math\nreturn math.sqrt(16)", &[]).await.unwrap();
        assert_eq!(v, Some(Value::Number(4.0)));
    }

    #[tokio::test]
    async fn unsupported_module_function_is_a_runtime_error() {
        let err = run("import statistics\nreturn statistics.mean([1, 2])", &[]).await.unwrap_err();
        assert!(matches!(err, ExecError::RuntimeError { kind, .. } if kind == "AttributeError"));
    }

    #[tokio::test]
    async fn disallowed_import_is_a_runtime_error() {
        let err = run("import os\nreturn 1", &[]).await.unwrap_err();
        assert!(matches!(err, ExecError::RuntimeError { kind, .. } if kind == "ImportError"));
    }

    #[tokio::test]
    async fn list_comprehension_filters_and_maps() {
        let v = run("return [x * 2 for x in [1, 2, 3, 4] if x > 2]", &[]).await.unwrap();
        assert_eq!(v, Some(Value::List(vec![Value::Number(6.0), Value::Number(8.0)])));
    }

    #[tokio::test]
    async fn dict_index_assignment_inserts_new_keys() {
        let src = r#"
d = {}
d["a"] = 1
return d["a"]
"#;
        let v = run(src, &[]).await.unwrap();
        assert_eq!(v, Some(Value::Number(1.0)));
    }

    #[tokio::test]
    async fn undefined_name_is_a_name_error() {
        let err = run("return mystery_function(1)", &[]).await.unwrap_err();
        assert!(matches!(err, ExecError::RuntimeError { kind, .. } if kind == "NameError"));
    }

    #[tokio::test(start_paused = true)]
    async fn tool_call_exhausts_retries_and_surfaces_tool_error() {
        let block = parser::parse("return search(1)").unwrap();
        let mut interp = interpreter(&["search"]);
        let handle = tokio::spawn(async move { interp.run(&block).await });
        tokio::time::advance(Duration::from_secs(10)).await;
        let result = handle.await.unwrap();
        assert!(matches!(result, Err(ExecError::ToolError { tool, .. }) if tool == "search"));
    }

    #[tokio::test]
    async fn user_defined_function_shadows_same_named_tool() {
        let src = r#"
def search(x) {
    return x + 1
}
return search(41)
"#;
        let v = run(src, &["search"]).await.unwrap();
        assert_eq!(v, Some(Value::Number(42.0)));
    }
}
