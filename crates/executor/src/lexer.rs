//! Tokenizer for the snippet language. Indentation is not significant;
//! blocks are delimited with `{`/`}` like the planner actually emits them
//! (the original Python-flavoured planner output is parsed one level
//! upstream, before it ever reaches the executor).

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    None,
    Def,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Import,
    Await,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Eq,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Newline,
    Eof,
}

pub struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { chars: src.chars().peekable(), line: 1 }
    }

    pub fn tokenize(mut self) -> Result<Vec<(Token, usize)>, LexError> {
        let mut out = Vec::new();
        loop {
            let (tok, line) = self.next_token()?;
            let done = tok == Token::Eof;
            out.push((tok, line));
            if done {
                break;
            }
        }
        Ok(out)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    fn next_token(&mut self) -> Result<(Token, usize), LexError> {
        loop {
            match self.peek() {
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('\n') => {
                    let line = self.line;
                    self.bump();
                    return Ok((Token::Newline, line));
                }
                _ => break,
            }
        }

        let line = self.line;
        let c = match self.peek() {
            Some(c) => c,
            None => return Ok((Token::Eof, line)),
        };

        if c.is_ascii_digit() {
            return Ok((self.read_number(), line));
        }
        if c == '"' || c == '\'' {
            return Ok((self.read_string(c)?, line));
        }
        if c.is_alphabetic() || c == '_' {
            return Ok((self.read_ident_or_keyword(), line));
        }

        self.bump();
        let tok = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => {
                if self.peek() == Some('/') {
                    self.bump();
                    Token::SlashSlash
                } else {
                    Token::Slash
                }
            }
            '%' => Token::Percent,
            '=' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::EqEq
                } else {
                    Token::Eq
                }
            }
            '!' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::NotEq
                } else {
                    return Err(LexError { line, message: "unexpected '!'".into() });
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::LtEq
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::GtEq
                } else {
                    Token::Gt
                }
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            '{' => Token::LBrace,
            '}' => Token::RBrace,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '.' => Token::Dot,
            ';' => Token::Newline,
            other => return Err(LexError { line, message: format!("unexpected character '{other}'") }),
        };
        Ok((tok, line))
    }

    fn read_number(&mut self) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        Token::Number(s.parse().unwrap_or(0.0))
    }

    fn read_string(&mut self, quote: char) -> Result<Token, LexError> {
        let line = self.line;
        self.bump();
        let mut s = String::new();
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(Token::Str(s)),
                Some('\\') => match self.bump() {
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some(c) => s.push(c),
                    None => return Err(LexError { line, message: "unterminated string".into() }),
                },
                Some(c) => s.push(c),
                None => return Err(LexError { line, message: "unterminated string".into() }),
            }
        }
    }

    fn read_ident_or_keyword(&mut self) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                s.push(c);
                self.bump();
            } else {
                break;
            }
        }
        match s.as_str() {
            "def" => Token::Def,
            "if" => Token::If,
            "else" => Token::Else,
            "while" => Token::While,
            "for" => Token::For,
            "in" => Token::In,
            "return" => Token::Return,
            "import" => Token::Import,
            "await" => Token::Await,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "True" => Token::True,
            "False" => Token::False,
            "None" => Token::None,
            _ => Token::Ident(s),
        }
    }
}
