//! Recursive-descent parser from tokens to [`crate::ast`].

use crate::ast::{Arg, BinOp, Block, Expr, Stmt, UnOp};
use crate::lexer::{LexError, Lexer, Token};

#[derive(Debug, Clone)]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError { line: e.line, message: e.message }
    }
}

pub fn parse(src: &str) -> Result<Block, ParseError> {
    let tokens = Lexer::new(src).tokenize()?;
    let mut parser = Parser { tokens, pos: 0 };
    parser.skip_newlines();
    let mut stmts = Vec::new();
    while !parser.at_eof() {
        stmts.push(parser.statement()?);
        parser.skip_newlines();
    }
    Ok(stmts)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
}

impl Parser {
    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos].0
    }

    fn line(&self) -> usize {
        self.tokens[self.pos].1
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].0.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Token::Newline) {
            self.bump();
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<(), ParseError> {
        if self.peek() == tok {
            self.bump();
            Ok(())
        } else {
            Err(ParseError { line: self.line(), message: format!("expected {tok:?}, found {:?}", self.peek()) })
        }
    }

    fn expect_ident(&mut self) -> Result<String, ParseError> {
        match self.bump() {
            Token::Ident(s) => Ok(s),
            other => Err(ParseError { line: self.line(), message: format!("expected identifier, found {other:?}") }),
        }
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        self.expect(&Token::LBrace)?;
        self.skip_newlines();
        let mut stmts = Vec::new();
        while self.peek() != &Token::RBrace {
            stmts.push(self.statement()?);
            self.skip_newlines();
        }
        self.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn statement(&mut self) -> Result<Stmt, ParseError> {
        match self.peek().clone() {
            Token::Def => self.function_def(),
            Token::If => self.if_stmt(),
            Token::While => self.while_stmt(),
            Token::For => self.for_stmt(),
            Token::Return => {
                self.bump();
                if matches!(self.peek(), Token::Newline | Token::Eof | Token::RBrace) {
                    Ok(Stmt::Return(None))
                } else {
                    Ok(Stmt::Return(Some(self.expr()?)))
                }
            }
            Token::Import => {
                self.bump();
                let name = self.expect_ident()?;
                Ok(Stmt::Import(name))
            }
            Token::Ident(name) => {
                // Lookahead: `name = expr` assignment, `name[idx] = expr`, or an expression statement.
                let save = self.pos;
                self.bump();
                if self.peek() == &Token::Eq {
                    self.bump();
                    let value = self.expr()?;
                    return Ok(Stmt::Assign { target: name, value });
                }
                if self.peek() == &Token::LBracket {
                    self.bump();
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    if self.peek() == &Token::Eq {
                        self.bump();
                        let value = self.expr()?;
                        return Ok(Stmt::IndexAssign { target: Expr::Ident(name), index, value });
                    }
                }
                self.pos = save;
                Ok(Stmt::Expr(self.expr()?))
            }
            _ => Ok(Stmt::Expr(self.expr()?)),
        }
    }

    fn function_def(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&Token::Def)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while self.peek() != &Token::RParen {
            params.push(self.expect_ident()?);
            if self.peek() == &Token::Comma {
                self.bump();
            }
        }
        self.expect(&Token::RParen)?;
        let body = self.block()?;
        Ok(Stmt::FunctionDef { name, params, body })
    }

    fn if_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&Token::If)?;
        let cond = self.expr()?;
        let then_branch = self.block()?;
        self.skip_newlines();
        let else_branch = if self.peek() == &Token::Else {
            self.bump();
            if self.peek() == &Token::If {
                vec![self.if_stmt()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If { cond, then_branch, else_branch })
    }

    fn while_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&Token::While)?;
        let cond = self.expr()?;
        let body = self.block()?;
        Ok(Stmt::While { cond, body })
    }

    fn for_stmt(&mut self) -> Result<Stmt, ParseError> {
        self.expect(&Token::For)?;
        let var = self.expect_ident()?;
        self.expect(&Token::In)?;
        let iter = self.expr()?;
        let body = self.block()?;
        Ok(Stmt::For { var, iter, body })
    }

    // ─── Expressions, precedence-climbing ────────────────────────────

    fn expr(&mut self) -> Result<Expr, ParseError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.and_expr()?;
        while self.peek() == &Token::Or {
            self.bump();
            let rhs = self.and_expr()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.not_expr()?;
        while self.peek() == &Token::And {
            self.bump();
            let rhs = self.not_expr()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn not_expr(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Token::Not {
            self.bump();
            let inner = self.not_expr()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.peek() {
                Token::EqEq => BinOp::Eq,
                Token::NotEq => BinOp::NotEq,
                Token::Lt => BinOp::Lt,
                Token::LtEq => BinOp::LtEq,
                Token::Gt => BinOp::Gt,
                Token::GtEq => BinOp::GtEq,
                _ => break,
            };
            self.bump();
            let rhs = self.additive()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.bump();
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::SlashSlash => BinOp::FloorDiv,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Token::Minus {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        if self.peek() == &Token::Await {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Await(Box::new(inner)));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Token::LParen => {
                    self.bump();
                    let args = self.call_args()?;
                    self.expect(&Token::RParen)?;
                    expr = Expr::Call { callee: Box::new(expr), args };
                }
                Token::LBracket => {
                    self.bump();
                    let index = self.expr()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                Token::Dot => {
                    self.bump();
                    let name = self.expect_ident()?;
                    expr = Expr::Attr(Box::new(expr), name);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn call_args(&mut self) -> Result<Vec<Arg>, ParseError> {
        let mut args = Vec::new();
        while self.peek() != &Token::RParen {
            // `name=value` keyword form, else positional.
            if let Token::Ident(name) = self.peek().clone() {
                let save = self.pos;
                self.bump();
                if self.peek() == &Token::Eq {
                    self.bump();
                    let value = self.expr()?;
                    args.push(Arg { name: Some(name), value });
                    if self.peek() == &Token::Comma {
                        self.bump();
                    }
                    continue;
                }
                self.pos = save;
            }
            let value = self.expr()?;
            args.push(Arg { name: None, value });
            if self.peek() == &Token::Comma {
                self.bump();
            }
        }
        Ok(args)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.bump() {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::None => Ok(Expr::None),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => self.list_or_comprehension(),
            Token::LBrace => self.dict_literal(),
            other => Err(ParseError { line: self.line(), message: format!("unexpected token {other:?}") }),
        }
    }

    fn list_or_comprehension(&mut self) -> Result<Expr, ParseError> {
        if self.peek() == &Token::RBracket {
            self.bump();
            return Ok(Expr::List(Vec::new()));
        }
        let first = self.expr()?;
        if self.peek() == &Token::For {
            self.bump();
            let var = self.expect_ident()?;
            self.expect(&Token::In)?;
            let iter = self.expr()?;
            let cond = if self.peek() == &Token::If {
                self.bump();
                Some(Box::new(self.expr()?))
            } else {
                None
            };
            self.expect(&Token::RBracket)?;
            return Ok(Expr::ListComp { expr: Box::new(first), var, iter: Box::new(iter), cond });
        }
        let mut items = vec![first];
        while self.peek() == &Token::Comma {
            self.bump();
            if self.peek() == &Token::RBracket {
                break;
            }
            items.push(self.expr()?);
        }
        self.expect(&Token::RBracket)?;
        Ok(Expr::List(items))
    }

    fn dict_literal(&mut self) -> Result<Expr, ParseError> {
        let mut pairs = Vec::new();
        while self.peek() != &Token::RBrace {
            let key = self.expr()?;
            self.expect(&Token::Colon)?;
            let value = self.expr()?;
            pairs.push((key, value));
            if self.peek() == &Token::Comma {
                self.bump();
            }
        }
        self.expect(&Token::RBrace)?;
        Ok(Expr::Dict(pairs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_assignment_and_call() {
        let block = parse("result = add(b=2, a=3)").unwrap();
        assert_eq!(block.len(), 1);
        match &block[0] {
            Stmt::Assign { target, value } => {
                assert_eq!(target, "result");
                match value {
                    Expr::Call { args, .. } => {
                        assert_eq!(args.len(), 2);
                        assert_eq!(args[0].name.as_deref(), Some("b"));
                        assert_eq!(args[1].name.as_deref(), Some("a"));
                    }
                    other => panic!("expected call, got {other:?}"),
                }
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn parses_function_def_and_if() {
        let src = r#"
def factorial(n) {
    if n <= 1 {
        return 1
    } else {
        return n * factorial(n - 1)
    }
}
result = factorial(5)
"#;
        let block = parse(src).unwrap();
        assert_eq!(block.len(), 2);
        assert!(matches!(block[0], Stmt::FunctionDef { .. }));
    }

    #[test]
    fn parses_list_comprehension() {
        let block = parse("result = [x * 2 for x in items if x > 0]").unwrap();
        match &block[0] {
            Stmt::Assign { value: Expr::ListComp { cond, .. }, .. } => assert!(cond.is_some()),
            other => panic!("expected list comprehension assign, got {other:?}"),
        }
    }

    #[test]
    fn syntax_error_reports_line() {
        let err = parse("result = (1 +").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
