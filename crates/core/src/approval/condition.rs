//! Rule conditions: a small predicate language over record fields.
//!
//! A condition is compiled once when the rule is saved and then evaluated
//! against each candidate record. Grammar:
//!
//! ```text
//! expr       := or
//! or         := and ("or" and)*
//! and        := unary ("and" unary)*
//! unary      := "not" unary | primary
//! primary    := "(" expr ")" | path [op literal | ["not"] "in" list]
//! op         := "=" | "==" | "!=" | "<" | "<=" | ">" | ">="
//! literal    := number | string | "true" | "false" | "null"
//! list       := "[" [literal ("," literal)*] "]"
//! path       := ident ("." ident)*
//! ```
//!
//! A bare path is shorthand for `path == true`. An empty source always
//! matches. Numbers compare as exact decimals; JSON strings holding a decimal
//! compare as numbers when the literal is numeric.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while compiling or evaluating a condition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    /// The source text is not a valid condition.
    #[error("Invalid condition at offset {offset}: {message}")]
    Syntax {
        /// Byte offset of the offending token.
        offset: usize,
        /// What went wrong.
        message: String,
    },

    /// The record has no value at the referenced path.
    #[error("Field '{0}' is missing on the record")]
    MissingField(String),

    /// The field value cannot be ordered against the literal.
    #[error("Field '{path}' holds {found}, which cannot be compared with {literal}")]
    TypeMismatch {
        /// Field path.
        path: String,
        /// JSON type found on the record.
        found: &'static str,
        /// Literal it was compared against.
        literal: String,
    },
}

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `==` / `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

/// Literal on the right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// `null`
    Null,
    /// `true` / `false`
    Bool(bool),
    /// Exact decimal number.
    Number(Decimal),
    /// Quoted text.
    Text(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// Compiled condition tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    /// Matches every record.
    Always,
    /// Both sides hold.
    And(Box<Expr>, Box<Expr>),
    /// Either side holds.
    Or(Box<Expr>, Box<Expr>),
    /// Negation.
    Not(Box<Expr>),
    /// `path op literal`
    Compare {
        /// Dotted field path.
        path: String,
        /// Operator.
        op: CompareOp,
        /// Right-hand side.
        value: Literal,
    },
    /// `path [not] in [..]`
    In {
        /// Dotted field path.
        path: String,
        /// Candidate values.
        values: Vec<Literal>,
        /// `not in`
        negated: bool,
    },
}

/// A compiled rule condition together with its source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    /// Compiles a condition from source text.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let expr = if tokens.is_empty() {
            Expr::Always
        } else {
            let mut parser = Parser {
                tokens,
                pos: 0,
                end: source.len(),
            };
            let expr = parser.parse_or()?;
            if let Some(token) = parser.peek() {
                return Err(ConditionError::Syntax {
                    offset: token.offset,
                    message: format!("unexpected {}", token.kind),
                });
            }
            expr
        };

        Ok(Self {
            source: source.trim().to_string(),
            expr,
        })
    }

    /// A condition that matches every record.
    #[must_use]
    pub fn always() -> Self {
        Self {
            source: String::new(),
            expr: Expr::Always,
        }
    }

    /// The (trimmed) source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// The compiled tree.
    #[must_use]
    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Returns true if this condition matches every record.
    #[must_use]
    pub fn is_always(&self) -> bool {
        matches!(self.expr, Expr::Always)
    }

    /// Evaluates the condition against a record's fields.
    ///
    /// `and`/`or` short-circuit, so a missing field on the unevaluated side
    /// is not an error.
    pub fn evaluate(&self, fields: &Value) -> Result<bool, ConditionError> {
        eval(&self.expr, fields)
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::always()
    }
}

impl FromStr for Condition {
    type Err = ConditionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = ConditionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(value: Condition) -> Self {
        value.source
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

// ============================================================================
// Evaluation
// ============================================================================

fn eval(expr: &Expr, fields: &Value) -> Result<bool, ConditionError> {
    match expr {
        Expr::Always => Ok(true),
        Expr::And(lhs, rhs) => Ok(eval(lhs, fields)? && eval(rhs, fields)?),
        Expr::Or(lhs, rhs) => Ok(eval(lhs, fields)? || eval(rhs, fields)?),
        Expr::Not(inner) => Ok(!eval(inner, fields)?),
        Expr::Compare { path, op, value } => {
            let found = resolve(fields, path)?;
            compare(path, found, *op, value)
        }
        Expr::In {
            path,
            values,
            negated,
        } => {
            let found = resolve(fields, path)?;
            let hit = values.iter().any(|literal| equals(found, literal));
            Ok(hit != *negated)
        }
    }
}

fn resolve<'v>(fields: &'v Value, path: &str) -> Result<&'v Value, ConditionError> {
    path.split('.')
        .try_fold(fields, |current, segment| current.get(segment))
        .ok_or_else(|| ConditionError::MissingField(path.to_string()))
}

fn compare(path: &str, found: &Value, op: CompareOp, literal: &Literal) -> Result<bool, ConditionError> {
    match op {
        CompareOp::Eq => Ok(equals(found, literal)),
        CompareOp::Ne => Ok(!equals(found, literal)),
        CompareOp::Lt | CompareOp::Le | CompareOp::Gt | CompareOp::Ge => {
            let ordering = order(found, literal).ok_or_else(|| ConditionError::TypeMismatch {
                path: path.to_string(),
                found: json_type(found),
                literal: literal.to_string(),
            })?;
            Ok(match op {
                CompareOp::Lt => ordering == Ordering::Less,
                CompareOp::Le => ordering != Ordering::Greater,
                CompareOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            })
        }
    }
}

fn equals(found: &Value, literal: &Literal) -> bool {
    match (found, literal) {
        (Value::Null, Literal::Null) => true,
        (Value::Bool(a), Literal::Bool(b)) => a == b,
        (Value::String(a), Literal::Text(b)) => a == b,
        (_, Literal::Number(n)) => as_decimal(found).is_some_and(|d| d == *n),
        _ => false,
    }
}

fn order(found: &Value, literal: &Literal) -> Option<Ordering> {
    match (found, literal) {
        (Value::String(a), Literal::Text(b)) => Some(a.as_str().cmp(b.as_str())),
        (_, Literal::Number(n)) => as_decimal(found).map(|d| d.cmp(n)),
        _ => None,
    }
}

/// Reads a JSON number, or a string holding a decimal, as an exact decimal.
fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else if let Some(u) = n.as_u64() {
                Some(Decimal::from(u))
            } else {
                let text = n.to_string();
                Decimal::from_str(&text)
                    .or_else(|_| Decimal::from_scientific(&text))
                    .ok()
            }
        }
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "text",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(Decimal),
    Text(String),
    Op(CompareOp),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "'{name}'"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::Text(s) => write!(f, "text {s:?}"),
            Self::Op(_) => write!(f, "operator"),
            Self::LParen => write!(f, "'('"),
            Self::RParen => write!(f, "')'"),
            Self::LBracket => write!(f, "'['"),
            Self::RBracket => write!(f, "']'"),
            Self::Comma => write!(f, "','"),
            Self::Dot => write!(f, "'.'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

fn syntax(offset: usize, message: impl Into<String>) -> ConditionError {
    ConditionError::Syntax {
        offset,
        message: message.into(),
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        let kind = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' | ')' | '[' | ']' | ',' | '.' => {
                chars.next();
                match c {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    _ => TokenKind::Dot,
                }
            }
            '=' | '!' | '<' | '>' => {
                chars.next();
                let followed_by_eq = chars.next_if(|&(_, next)| next == '=').is_some();
                let op = match (c, followed_by_eq) {
                    ('=', _) => CompareOp::Eq,
                    ('!', true) => CompareOp::Ne,
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    ('>', true) => CompareOp::Ge,
                    _ => return Err(syntax(offset, "expected '=' after '!'")),
                };
                TokenKind::Op(op)
            }
            '"' | '\'' => {
                chars.next();
                let mut text = String::new();
                let mut closed = false;
                while let Some((_, next)) = chars.next() {
                    match next {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => text.push(escaped),
                            None => break,
                        },
                        quote if quote == c => {
                            closed = true;
                            break;
                        }
                        other => text.push(other),
                    }
                }
                if !closed {
                    return Err(syntax(offset, "unterminated string"));
                }
                TokenKind::Text(text)
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut literal = String::new();
                literal.push(c);
                chars.next();
                while let Some((_, next)) = chars.next_if(|&(_, n)| n.is_ascii_digit() || n == '.') {
                    literal.push(next);
                }
                let number = Decimal::from_str(&literal)
                    .map_err(|_| syntax(offset, format!("invalid number '{literal}'")))?;
                TokenKind::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some((_, next)) = chars.next_if(|&(_, n)| n.is_alphanumeric() || n == '_') {
                    ident.push(next);
                }
                TokenKind::Ident(ident)
            }
            other => return Err(syntax(offset, format!("unexpected character '{other}'"))),
        };
        tokens.push(Token { kind, offset });
    }

    Ok(tokens)
}

// ============================================================================
// Parser
// ============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |t| t.offset)
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token { kind: TokenKind::Ident(name), .. }) if name.eq_ignore_ascii_case(keyword))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), ConditionError> {
        let offset = self.offset();
        match self.advance() {
            Some(token) if &token.kind == expected => Ok(()),
            Some(token) => Err(syntax(offset, format!("expected {expected}, found {}", token.kind))),
            None => Err(syntax(offset, format!("expected {expected}, found end of input"))),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut lhs = self.parse_unary()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.eat_keyword("not") {
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        if matches!(self.peek(), Some(Token { kind: TokenKind::LParen, .. })) {
            self.pos += 1;
            let inner = self.parse_or()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(inner);
        }

        let path = self.parse_path()?;

        if let Some(Token {
            kind: TokenKind::Op(op),
            ..
        }) = self.peek()
        {
            let op = *op;
            self.pos += 1;
            let value = self.parse_literal()?;
            return Ok(Expr::Compare { path, op, value });
        }

        let negated = if self.at_keyword("not")
            && matches!(self.tokens.get(self.pos + 1), Some(Token { kind: TokenKind::Ident(name), .. }) if name.eq_ignore_ascii_case("in"))
        {
            self.pos += 1;
            true
        } else {
            false
        };
        if self.eat_keyword("in") {
            let values = self.parse_list()?;
            return Ok(Expr::In {
                path,
                values,
                negated,
            });
        }

        Ok(Expr::Compare {
            path,
            op: CompareOp::Eq,
            value: Literal::Bool(true),
        })
    }

    fn parse_path(&mut self) -> Result<String, ConditionError> {
        let offset = self.offset();
        let mut segments = Vec::new();
        loop {
            match self.advance() {
                Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) if !is_keyword(&name) => segments.push(name),
                Some(token) => {
                    return Err(syntax(token.offset, format!("expected field name, found {}", token.kind)));
                }
                None => return Err(syntax(offset, "expected field name, found end of input")),
            }
            if matches!(self.peek(), Some(Token { kind: TokenKind::Dot, .. })) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(segments.join("."))
    }

    fn parse_literal(&mut self) -> Result<Literal, ConditionError> {
        let offset = self.offset();
        match self.advance().map(|t| t.kind) {
            Some(TokenKind::Number(n)) => Ok(Literal::Number(n)),
            Some(TokenKind::Text(s)) => Ok(Literal::Text(s)),
            Some(TokenKind::Ident(name)) => match name.to_lowercase().as_str() {
                "true" => Ok(Literal::Bool(true)),
                "false" => Ok(Literal::Bool(false)),
                "null" | "none" => Ok(Literal::Null),
                _ => Err(syntax(offset, format!("expected literal, found '{name}'"))),
            },
            Some(other) => Err(syntax(offset, format!("expected literal, found {other}"))),
            None => Err(syntax(offset, "expected literal, found end of input")),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Literal>, ConditionError> {
        self.expect(&TokenKind::LBracket)?;
        let mut values = Vec::new();
        if matches!(self.peek(), Some(Token { kind: TokenKind::RBracket, .. })) {
            self.pos += 1;
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if matches!(self.peek(), Some(Token { kind: TokenKind::Comma, .. })) {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(values)
    }
}

fn is_keyword(name: &str) -> bool {
    ["and", "or", "not", "in", "true", "false", "null", "none"]
        .iter()
        .any(|k| name.eq_ignore_ascii_case(k))
}
