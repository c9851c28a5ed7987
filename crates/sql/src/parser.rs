//! MERGE statement parser
//!
//! A small hand-rolled lexer and recursive-descent parser for the upsert
//! grammar:
//!
//! ```text
//! MERGE INTO <table> ( col [, col]* ) [ KEY ( col [, col]* ) ]
//!     VALUES ( literal [, literal]* ) [, ( ... )]*
//! ```
//!
//! Literals are NULL, integers and single-quoted strings (with `''` as the
//! escape). Query-fed MERGE skips the VALUES clause entirely and receives
//! its rows through the statement's row sink instead.

use crate::value::SqlValue;
use lattice_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Merge,
    Into,
    Key,
    Values,
    Null,
    Ident(String),
    Int(i64),
    Str(String),
    LParen,
    RParen,
    Comma,
    Minus,
}

fn syntax(reason: impl Into<String>) -> Error {
    Error::Syntax {
        reason: reason.into(),
    }
}

fn tokenize(sql: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '\'' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => {
                            if chars.peek() == Some(&'\'') {
                                chars.next();
                                text.push('\'');
                            } else {
                                break;
                            }
                        }
                        Some(c) => text.push(c),
                        None => return Err(syntax("unterminated string literal")),
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = digits
                    .parse::<i64>()
                    .map_err(|_| syntax(format!("integer out of range: {digits}")))?;
                tokens.push(Token::Int(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        word.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(match word.to_ascii_uppercase().as_str() {
                    "MERGE" => Token::Merge,
                    "INTO" => Token::Into,
                    "KEY" => Token::Key,
                    "VALUES" => Token::Values,
                    "NULL" => Token::Null,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(syntax(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

/// The parsed shape of a MERGE statement, before binding to a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMerge {
    /// Target table name.
    pub table: String,
    /// Insert column list.
    pub columns: Vec<String>,
    /// Declared KEY columns, if the clause was present.
    pub key_columns: Option<Vec<String>>,
    /// Literal rows from the VALUES clause; empty for query-fed MERGE.
    pub rows: Vec<Vec<SqlValue>>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            other => Err(syntax(format!("expected {expected:?}, found {other:?}"))),
        }
    }

    fn identifier(&mut self) -> Result<String> {
        match self.advance() {
            Some(Token::Ident(name)) => Ok(name),
            other => Err(syntax(format!("expected identifier, found {other:?}"))),
        }
    }

    fn column_list(&mut self) -> Result<Vec<String>> {
        self.expect(Token::LParen)?;
        let mut columns = vec![self.identifier()?];
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            columns.push(self.identifier()?);
        }
        self.expect(Token::RParen)?;
        Ok(columns)
    }

    fn literal(&mut self) -> Result<SqlValue> {
        match self.advance() {
            Some(Token::Null) => Ok(SqlValue::Null),
            Some(Token::Int(v)) => Ok(SqlValue::Int(v)),
            Some(Token::Minus) => match self.advance() {
                Some(Token::Int(v)) => Ok(SqlValue::Int(-v)),
                other => Err(syntax(format!("expected integer after '-', found {other:?}"))),
            },
            Some(Token::Str(s)) => Ok(SqlValue::Text(s)),
            other => Err(syntax(format!("expected literal, found {other:?}"))),
        }
    }

    fn row(&mut self) -> Result<Vec<SqlValue>> {
        self.expect(Token::LParen)?;
        let mut values = vec![self.literal()?];
        while self.peek() == Some(&Token::Comma) {
            self.advance();
            values.push(self.literal()?);
        }
        self.expect(Token::RParen)?;
        Ok(values)
    }

    fn merge(&mut self) -> Result<ParsedMerge> {
        self.expect(Token::Merge)?;
        self.expect(Token::Into)?;
        let table = self.identifier()?;
        let columns = self.column_list()?;

        let key_columns = if self.peek() == Some(&Token::Key) {
            self.advance();
            Some(self.column_list()?)
        } else {
            None
        };

        let mut rows = Vec::new();
        if self.peek() == Some(&Token::Values) {
            self.advance();
            rows.push(self.row()?);
            while self.peek() == Some(&Token::Comma) {
                self.advance();
                rows.push(self.row()?);
            }
        }

        if let Some(trailing) = self.peek() {
            return Err(syntax(format!("unexpected trailing token {trailing:?}")));
        }
        Ok(ParsedMerge {
            table,
            columns,
            key_columns,
            rows,
        })
    }
}

/// Parse one MERGE statement.
pub fn parse_merge(sql: &str) -> Result<ParsedMerge> {
    let tokens = tokenize(sql)?;
    Parser { tokens, pos: 0 }.merge()
}
