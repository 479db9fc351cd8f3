//! Static rewrite passes applied to a parsed snippet before interpretation:
//! keyword-to-positional argument rewriting, local-definition collection,
//! and auto-suspend wrapping of tool calls.

use std::collections::HashSet;

use crate::ast::{Arg, Block, Expr, Stmt};

/// Count every call expression in the block, recursively. Used for the
/// static call-count guard (step 2) before any rewriting happens.
pub fn count_calls(block: &Block) -> usize {
    let mut count = 0;
    for stmt in block {
        count_calls_stmt(stmt, &mut count);
    }
    count
}

fn count_calls_stmt(stmt: &Stmt, count: &mut usize) {
    match stmt {
        Stmt::Expr(e) => count_calls_expr(e, count),
        Stmt::Assign { value, .. } => count_calls_expr(value, count),
        Stmt::IndexAssign { target, index, value } => {
            count_calls_expr(target, count);
            count_calls_expr(index, count);
            count_calls_expr(value, count);
        }
        Stmt::FunctionDef { body, .. } => {
            for s in body {
                count_calls_stmt(s, count);
            }
        }
        Stmt::If { cond, then_branch, else_branch } => {
            count_calls_expr(cond, count);
            for s in then_branch {
                count_calls_stmt(s, count);
            }
            for s in else_branch {
                count_calls_stmt(s, count);
            }
        }
        Stmt::While { cond, body } => {
            count_calls_expr(cond, count);
            for s in body {
                count_calls_stmt(s, count);
            }
        }
        Stmt::For { iter, body, .. } => {
            count_calls_expr(iter, count);
            for s in body {
                count_calls_stmt(s, count);
            }
        }
        Stmt::Return(Some(e)) => count_calls_expr(e, count),
        Stmt::Return(None) | Stmt::Import(_) => {}
    }
}

fn count_calls_expr(expr: &Expr, count: &mut usize) {
    match expr {
        Expr::Call { callee, args } => {
            *count += 1;
            count_calls_expr(callee, count);
            for a in args {
                count_calls_expr(&a.value, count);
            }
        }
        Expr::Unary(_, inner) | Expr::Await(inner) => count_calls_expr(inner, count),
        Expr::Binary(lhs, _, rhs) => {
            count_calls_expr(lhs, count);
            count_calls_expr(rhs, count);
        }
        Expr::Index(base, idx) => {
            count_calls_expr(base, count);
            count_calls_expr(idx, count);
        }
        Expr::Attr(base, _) => count_calls_expr(base, count),
        Expr::List(items) => {
            for i in items {
                count_calls_expr(i, count);
            }
        }
        Expr::Dict(pairs) => {
            for (k, v) in pairs {
                count_calls_expr(k, count);
                count_calls_expr(v, count);
            }
        }
        Expr::ListComp { expr, iter, cond, .. } => {
            count_calls_expr(expr, count);
            count_calls_expr(iter, count);
            if let Some(c) = cond {
                count_calls_expr(c, count);
            }
        }
        Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None | Expr::Ident(_) => {}
    }
}

/// Step 3: discard keyword argument names, appending each value positionally
/// in source order.
pub fn rewrite_keywords_to_positional(block: Block) -> Block {
    block.into_iter().map(rewrite_keywords_stmt).collect()
}

fn rewrite_keywords_stmt(stmt: Stmt) -> Stmt {
    match stmt {
        Stmt::Expr(e) => Stmt::Expr(rewrite_keywords_expr(e)),
        Stmt::Assign { target, value } => Stmt::Assign { target, value: rewrite_keywords_expr(value) },
        Stmt::IndexAssign { target, index, value } => Stmt::IndexAssign {
            target: rewrite_keywords_expr(target),
            index: rewrite_keywords_expr(index),
            value: rewrite_keywords_expr(value),
        },
        Stmt::FunctionDef { name, params, body } => {
            Stmt::FunctionDef { name, params, body: rewrite_keywords_to_positional(body) }
        }
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond: rewrite_keywords_expr(cond),
            then_branch: rewrite_keywords_to_positional(then_branch),
            else_branch: rewrite_keywords_to_positional(else_branch),
        },
        Stmt::While { cond, body } => {
            Stmt::While { cond: rewrite_keywords_expr(cond), body: rewrite_keywords_to_positional(body) }
        }
        Stmt::For { var, iter, body } => {
            Stmt::For { var, iter: rewrite_keywords_expr(iter), body: rewrite_keywords_to_positional(body) }
        }
        Stmt::Return(e) => Stmt::Return(e.map(rewrite_keywords_expr)),
        Stmt::Import(m) => Stmt::Import(m),
    }
}

fn rewrite_keywords_expr(expr: Expr) -> Expr {
    match expr {
        Expr::Call { callee, args } => {
            let callee = Box::new(rewrite_keywords_expr(*callee));
            let args = args
                .into_iter()
                .map(|a| Arg { name: None, value: rewrite_keywords_expr(a.value) })
                .collect();
            Expr::Call { callee, args }
        }
        Expr::Unary(op, inner) => Expr::Unary(op, Box::new(rewrite_keywords_expr(*inner))),
        Expr::Await(inner) => Expr::Await(Box::new(rewrite_keywords_expr(*inner))),
        Expr::Binary(lhs, op, rhs) => {
            Expr::Binary(Box::new(rewrite_keywords_expr(*lhs)), op, Box::new(rewrite_keywords_expr(*rhs)))
        }
        Expr::Index(base, idx) => {
            Expr::Index(Box::new(rewrite_keywords_expr(*base)), Box::new(rewrite_keywords_expr(*idx)))
        }
        Expr::Attr(base, name) => Expr::Attr(Box::new(rewrite_keywords_expr(*base)), name),
        Expr::List(items) => Expr::List(items.into_iter().map(rewrite_keywords_expr).collect()),
        Expr::Dict(pairs) => {
            Expr::Dict(pairs.into_iter().map(|(k, v)| (rewrite_keywords_expr(k), rewrite_keywords_expr(v))).collect())
        }
        Expr::ListComp { expr, var, iter, cond } => Expr::ListComp {
            expr: Box::new(rewrite_keywords_expr(*expr)),
            var,
            iter: Box::new(rewrite_keywords_expr(*iter)),
            cond: cond.map(|c| Box::new(rewrite_keywords_expr(*c))),
        },
        other => other,
    }
}

/// Step 4: every function name defined anywhere in the snippet (at any
/// nesting depth — a local def inside a branch still shadows a tool name for
/// the whole snippet, matching the source's flat `collect local defs` pass).
pub fn collect_local_defs(block: &Block) -> HashSet<String> {
    let mut names = HashSet::new();
    collect_local_defs_into(block, &mut names);
    names
}

fn collect_local_defs_into(block: &Block, names: &mut HashSet<String>) {
    for stmt in block {
        match stmt {
            Stmt::FunctionDef { name, body, .. } => {
                names.insert(name.clone());
                collect_local_defs_into(body, names);
            }
            Stmt::If { then_branch, else_branch, .. } => {
                collect_local_defs_into(then_branch, names);
                collect_local_defs_into(else_branch, names);
            }
            Stmt::While { body, .. } | Stmt::For { body, .. } => collect_local_defs_into(body, names),
            _ => {}
        }
    }
}

/// Step 5: wrap every bare-identifier call whose callee names a registered
/// tool function, is not locally shadowed, and is not already wrapped in an
/// explicit `await`, in a suspension node.
pub fn auto_suspend(block: Block, tool_names: &HashSet<String>, local_defs: &HashSet<String>) -> Block {
    let suspendable: HashSet<&str> =
        tool_names.iter().filter(|t| !local_defs.contains(t.as_str())).map(|s| s.as_str()).collect();
    block.into_iter().map(|s| auto_suspend_stmt(s, &suspendable)).collect()
}

fn auto_suspend_stmt(stmt: Stmt, suspendable: &HashSet<&str>) -> Stmt {
    match stmt {
        Stmt::Expr(e) => Stmt::Expr(auto_suspend_expr(e, suspendable)),
        Stmt::Assign { target, value } => Stmt::Assign { target, value: auto_suspend_expr(value, suspendable) },
        Stmt::IndexAssign { target, index, value } => Stmt::IndexAssign {
            target: auto_suspend_expr(target, suspendable),
            index: auto_suspend_expr(index, suspendable),
            value: auto_suspend_expr(value, suspendable),
        },
        Stmt::FunctionDef { name, params, body } => {
            Stmt::FunctionDef { name, params, body: auto_suspend(body, &suspendable.iter().map(|s| s.to_string()).collect(), &HashSet::new()) }
        }
        Stmt::If { cond, then_branch, else_branch } => Stmt::If {
            cond: auto_suspend_expr(cond, suspendable),
            then_branch: then_branch.into_iter().map(|s| auto_suspend_stmt(s, suspendable)).collect(),
            else_branch: else_branch.into_iter().map(|s| auto_suspend_stmt(s, suspendable)).collect(),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: auto_suspend_expr(cond, suspendable),
            body: body.into_iter().map(|s| auto_suspend_stmt(s, suspendable)).collect(),
        },
        Stmt::For { var, iter, body } => Stmt::For {
            var,
            iter: auto_suspend_expr(iter, suspendable),
            body: body.into_iter().map(|s| auto_suspend_stmt(s, suspendable)).collect(),
        },
        Stmt::Return(e) => Stmt::Return(e.map(|e| auto_suspend_expr(e, suspendable))),
        Stmt::Import(m) => Stmt::Import(m),
    }
}

fn auto_suspend_expr(expr: Expr, suspendable: &HashSet<&str>) -> Expr {
    match expr {
        Expr::Call { callee, args } => {
            let args: Vec<Arg> =
                args.into_iter().map(|a| Arg { name: a.name, value: auto_suspend_expr(a.value, suspendable) }).collect();
            let is_bare_tool = matches!(callee.as_ref(), Expr::Ident(name) if suspendable.contains(name.as_str()));
            let call = Expr::Call { callee: Box::new(auto_suspend_expr(*callee, suspendable)), args };
            if is_bare_tool {
                Expr::Await(Box::new(call))
            } else {
                call
            }
        }
        // Already explicit: recurse into the inner call but never double-wrap.
        Expr::Await(inner) => Expr::Await(Box::new(auto_suspend_expr(*inner, suspendable))),
        Expr::Unary(op, inner) => Expr::Unary(op, Box::new(auto_suspend_expr(*inner, suspendable))),
        Expr::Binary(lhs, op, rhs) => {
            Expr::Binary(Box::new(auto_suspend_expr(*lhs, suspendable)), op, Box::new(auto_suspend_expr(*rhs, suspendable)))
        }
        Expr::Index(base, idx) => {
            Expr::Index(Box::new(auto_suspend_expr(*base, suspendable)), Box::new(auto_suspend_expr(*idx, suspendable)))
        }
        Expr::Attr(base, name) => Expr::Attr(Box::new(auto_suspend_expr(*base, suspendable)), name),
        Expr::List(items) => Expr::List(items.into_iter().map(|e| auto_suspend_expr(e, suspendable)).collect()),
        Expr::Dict(pairs) => Expr::Dict(
            pairs.into_iter().map(|(k, v)| (auto_suspend_expr(k, suspendable), auto_suspend_expr(v, suspendable))).collect(),
        ),
        Expr::ListComp { expr, var, iter, cond } => Expr::ListComp {
            expr: Box::new(auto_suspend_expr(*expr, suspendable)),
            var,
            iter: Box::new(auto_suspend_expr(*iter, suspendable)),
            cond: cond.map(|c| Box::new(auto_suspend_expr(*c, suspendable))),
        },
        other => other,
    }
}

/// Step 6: if the top level assigns to `result` and has no explicit
/// top-level `return`, append `return result`.
pub fn auto_return(mut block: Block) -> Block {
    let has_return = block.iter().any(|s| matches!(s, Stmt::Return(_)));
    if has_return {
        return block;
    }
    let assigns_result = block.iter().any(|s| matches!(s, Stmt::Assign { target, .. } if target == "result"));
    if assigns_result {
        block.push(Stmt::Return(Some(Expr::Ident("result".to_string()))));
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn keyword_rewrite_preserves_source_order_s4() {
        let block = parse("result = add(b=2, a=3)").unwrap();
        let rewritten = rewrite_keywords_to_positional(block);
        match &rewritten[0] {
            Stmt::Assign { value: Expr::Call { args, .. }, .. } => {
                assert_eq!(args.len(), 2);
                assert!(args.iter().all(|a| a.name.is_none()));
                assert_eq!(args[0].value, Expr::Number(2.0));
                assert_eq!(args[1].value, Expr::Number(3.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rewrite_preserves_call_count() {
        let block = parse("result = add(b=2, a=3)").unwrap();
        let before = count_calls(&block);
        let rewritten = rewrite_keywords_to_positional(block);
        assert_eq!(count_calls(&rewritten), before);
    }

    #[test]
    fn call_count_budget_boundary() {
        let mut src = String::new();
        for _ in 0..50 {
            src.push_str("noop()\n");
        }
        let block = parse(&src).unwrap();
        assert_eq!(count_calls(&block), 50);

        src.push_str("noop()\n");
        let block51 = parse(&src).unwrap();
        assert_eq!(count_calls(&block51), 51);
    }

    #[test]
    fn zero_calls_is_accepted_boundary() {
        let block = parse("result = 1 + 1").unwrap();
        assert_eq!(count_calls(&block), 0);
    }

    #[test]
    fn local_shadowing_suppresses_auto_suspend_s5() {
        let src = r#"
def factorial(n) {
    if n <= 1 {
        return 1
    }
    return n * factorial(n - 1)
}
result = [factorial(x) for x in items]
"#;
        let block = parse(src).unwrap();
        let local_defs = collect_local_defs(&block);
        assert!(local_defs.contains("factorial"));

        let mut tool_names = HashSet::new();
        tool_names.insert("factorial".to_string());
        let rewritten = auto_suspend(block, &tool_names, &local_defs);

        // The top-level comprehension's inner call must not be wrapped.
        match &rewritten[1] {
            Stmt::Assign { value: Expr::ListComp { expr, .. }, .. } => {
                assert!(matches!(expr.as_ref(), Expr::Call { .. }), "expected un-suspended call, got {expr:?}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bare_tool_call_is_wrapped_in_suspension() {
        let block = parse("result = search(query)").unwrap();
        let mut tool_names = HashSet::new();
        tool_names.insert("search".to_string());
        let rewritten = auto_suspend(block, &tool_names, &HashSet::new());
        match &rewritten[0] {
            Stmt::Assign { value: Expr::Await(inner), .. } => assert!(matches!(inner.as_ref(), Expr::Call { .. })),
            other => panic!("expected suspended call, got {other:?}"),
        }
    }

    #[test]
    fn auto_return_appends_when_result_assigned_without_explicit_return() {
        let block = parse("result = 1 + 1").unwrap();
        let rewritten = auto_return(block);
        assert!(matches!(rewritten.last(), Some(Stmt::Return(Some(Expr::Ident(name))) ) if name == "result"));
    }

    #[test]
    fn auto_return_is_noop_when_explicit_return_present() {
        let block = parse("result = 1\nreturn 2").unwrap();
        let rewritten = auto_return(block.clone());
        assert_eq!(rewritten.len(), block.len());
    }
}
