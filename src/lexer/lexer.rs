/// Ember scanner.
/// A single left-to-right pass with one-character lookahead.
use super::token::{Spanned, Token};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    pub fn tokenize(&mut self) -> Result<Vec<Spanned>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments();
            if self.pos >= self.source.len() {
                tokens.push(Spanned::new(Token::Eof, self.line, self.col, self.pos, 0));
                break;
            }

            let start_line = self.line;
            let start_col = self.col;
            let start_offset = self.pos;
            let ch = self.current();

            let token = match ch {
                '0'..='9' => self.lex_number()?,
                '"' => self.lex_string()?,
                'a'..='z' | 'A'..='Z' | '_' => self.lex_ident(),

                '+' => {
                    self.advance();
                    Token::Plus
                }
                '-' => {
                    self.advance();
                    Token::Minus
                }
                '*' => {
                    self.advance();
                    Token::Star
                }
                '/' => {
                    self.advance();
                    Token::Slash
                }
                '(' => {
                    self.advance();
                    Token::LParen
                }
                ')' => {
                    self.advance();
                    Token::RParen
                }
                '{' => {
                    self.advance();
                    Token::LBrace
                }
                '}' => {
                    self.advance();
                    Token::RBrace
                }
                ',' => {
                    self.advance();
                    Token::Comma
                }
                '.' => {
                    self.advance();
                    Token::Dot
                }
                ';' => {
                    self.advance();
                    Token::Semicolon
                }
                '!' => {
                    self.advance();
                    if self.current_matches('=') {
                        self.advance();
                        Token::BangEq
                    } else {
                        Token::Bang
                    }
                }
                '=' => {
                    self.advance();
                    if self.current_matches('=') {
                        self.advance();
                        Token::EqEq
                    } else if self.current_matches('>') {
                        self.advance();
                        Token::FatArrow
                    } else {
                        Token::Eq
                    }
                }
                '<' => {
                    self.advance();
                    if self.current_matches('=') {
                        self.advance();
                        Token::LtEq
                    } else {
                        Token::Lt
                    }
                }
                '>' => {
                    self.advance();
                    if self.current_matches('=') {
                        self.advance();
                        Token::GtEq
                    } else {
                        Token::Gt
                    }
                }
                other => {
                    let lexeme = other.to_string();
                    return Err(self.error(&format!("unexpected character '{}'", lexeme)));
                }
            };

            let len = self.pos - start_offset;
            tokens.push(Spanned::new(token, start_line, start_col, start_offset, len));
        }

        Ok(tokens)
    }

    fn lex_number(&mut self) -> Result<Token, LexError> {
        let start = self.pos;
        let mut is_float = false;

        while self.pos < self.source.len() {
            let ch = self.current();
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.source[start..self.pos].iter().collect();
        if is_float {
            text.parse::<f64>()
                .map(Token::Float)
                .map_err(|_| self.error("invalid float literal"))
        } else {
            text.parse::<i64>()
                .map(Token::Int)
                .map_err(|_| self.error("invalid integer literal"))
        }
    }

    fn lex_string(&mut self) -> Result<Token, LexError> {
        let start_line = self.line;
        let start_col = self.col;
        self.advance(); // opening quote
        let mut result = String::new();

        while self.pos < self.source.len() {
            let ch = self.current();
            match ch {
                '"' => {
                    self.advance();
                    return Ok(Token::StringLit(result));
                }
                '\\' if self.peek() == Some('n') => {
                    result.push('\n');
                    self.advance();
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(LexError {
            message: "unterminated string".to_string(),
            line: start_line,
            col: start_col,
        })
    }

    fn lex_ident(&mut self) -> Token {
        let start = self.pos;
        while self.pos < self.source.len()
            && (self.current().is_alphanumeric() || self.current() == '_')
        {
            self.advance();
        }

        let word: String = self.source[start..self.pos].iter().collect();
        match word.as_str() {
            "true" => Token::True,
            "false" => Token::False,
            _ => Token::keyword(&word).unwrap_or(Token::Ident(word)),
        }
    }

    // --- Navigation helpers ---

    fn current(&self) -> char {
        self.source[self.pos]
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos + 1).copied()
    }

    fn current_matches(&self, ch: char) -> bool {
        self.pos < self.source.len() && self.source[self.pos] == ch
    }

    fn advance(&mut self) {
        if self.pos < self.source.len() {
            if self.source[self.pos] == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    /// `\r` is whitespace that neither advances the line nor resets column,
    /// matching the "CR before LF" tolerance described in §4.C.
    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.pos < self.source.len() {
                let ch = self.source[self.pos];
                if ch == ' ' || ch == '\t' || ch == '\n' {
                    self.advance();
                } else if ch == '\r' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.pos < self.source.len() && self.current() == '/' && self.peek() == Some('/') {
                self.skip_line_comment();
                continue;
            }
            break;
        }
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.source.len() && self.source[self.pos] != '\n' {
            self.advance();
        }
    }

    fn error(&self, msg: &str) -> LexError {
        LexError {
            message: msg.to_string(),
            line: self.line,
            col: self.col,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LexError {
    pub message: String,
    pub line: usize,
    pub col: usize,
}

impl std::fmt::Display for LexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] scan error: {}", self.line, self.col, self.message)
    }
}

impl std::error::Error for LexError {}
