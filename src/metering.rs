// ABOUTME: Metering expression evaluator computing billable units from stream metrics
// ABOUTME: Sandboxed arithmetic over a fixed identifier set; parse errors refuse the expression
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 apigate contributors

//! # Metering Expressions
//!
//! A small arithmetic language computing billable units from stream
//! metrics. The grammar, in full:
//!
//! ```text
//! expr    := term (("+" | "-") term)*
//! term    := unary (("*" | "/" | "%") unary)*
//! unary   := "-" unary | primary
//! primary := NUMBER | IDENT | "(" expr ")"
//!          | ("min" | "max") "(" expr "," expr ")"
//! IDENT   := status | requestBytes | responseBytes | chunkCount
//!          | sseEvents | sseLastData
//! ```
//!
//! Unrecognized tokens are refused at parse time, so a bad expression
//! surfaces when the route is compiled rather than as a silent 1.0 at
//! request time. Runtime evaluation failures (division by zero,
//! non-numeric `sseLastData`) log a warning and yield 1.0; the request is
//! never failed by metering. The evaluator performs no I/O.

use crate::errors::{GatewayError, GatewayResult};
use crate::sse::parser;

/// Identifiers exposed to expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MeterIdent {
    Status,
    RequestBytes,
    ResponseBytes,
    ChunkCount,
    SseEvents,
    SseLastData,
}

impl MeterIdent {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "status" => Some(Self::Status),
            "requestBytes" => Some(Self::RequestBytes),
            "responseBytes" => Some(Self::ResponseBytes),
            "chunkCount" => Some(Self::ChunkCount),
            "sseEvents" => Some(Self::SseEvents),
            "sseLastData" => Some(Self::SseLastData),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Min,
    Max,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Ident(MeterIdent),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>, Box<Expr>),
}

/// Evaluation context assembled from stream metrics at stream end
#[derive(Debug, Clone, Default)]
pub struct MeterContext<'a> {
    pub status: u16,
    pub request_bytes: u64,
    pub response_bytes: u64,
    pub chunk_count: u64,
    /// Accumulated body, present only when the route accumulates
    pub all_data: Option<&'a [u8]>,
}

/// A parsed, validated metering expression
#[derive(Debug, Clone, PartialEq)]
pub struct MeterExpr {
    raw: String,
    kind: Kind,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    /// Empty or `"1"`: one billable unit per call
    Unit,
    /// Bare `"responseBytes"`: meter the byte count without accumulation
    ResponseBytes,
    /// Anything else: a compound expression
    Compound(Expr),
}

impl MeterExpr {
    /// Parse and validate an expression string
    ///
    /// # Errors
    ///
    /// Returns a configuration error on unrecognized tokens or malformed
    /// arithmetic. Routes carry pre-parsed expressions, so this surfaces
    /// at route load rather than on the request path.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let trimmed = raw.trim();
        let kind = match trimmed {
            "" | "1" => Kind::Unit,
            "responseBytes" => Kind::ResponseBytes,
            _ => {
                let tokens = tokenize(trimmed)?;
                let mut parser = Parser { tokens, pos: 0 };
                let expr = parser.parse_expr()?;
                if parser.pos != parser.tokens.len() {
                    return Err(GatewayError::config(format!(
                        "metering expression has trailing input: {trimmed}"
                    )));
                }
                Kind::Compound(expr)
            }
        };
        Ok(Self {
            raw: trimmed.to_owned(),
            kind,
        })
    }

    /// A per-call expression metering one unit
    #[must_use]
    pub fn unit() -> Self {
        Self {
            raw: String::new(),
            kind: Kind::Unit,
        }
    }

    /// The source text of the expression
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether the streaming forwarder must retain the full body for this
    /// expression. True for every compound expression; bare unit and
    /// `responseBytes` metering work from counters alone.
    #[must_use]
    pub const fn needs_accumulation(&self) -> bool {
        matches!(self.kind, Kind::Compound(_))
    }

    /// Compute the billable quantity for a finished interaction
    ///
    /// Never fails: evaluation errors log a warning and yield 1.0, and
    /// the result is clamped non-negative.
    #[must_use]
    pub fn evaluate(&self, ctx: &MeterContext<'_>) -> f64 {
        match &self.kind {
            Kind::Unit => 1.0,
            Kind::ResponseBytes => ctx.response_bytes as f64,
            Kind::Compound(expr) => match eval(expr, ctx) {
                Ok(value) if value.is_finite() => value.max(0.0),
                Ok(_) => {
                    tracing::warn!(expression = %self.raw, "metering produced non-finite value, using 1.0");
                    1.0
                }
                Err(reason) => {
                    tracing::warn!(expression = %self.raw, %reason, "metering evaluation failed, using 1.0");
                    1.0
                }
            },
        }
    }
}

fn eval(expr: &Expr, ctx: &MeterContext<'_>) -> Result<f64, String> {
    match expr {
        Expr::Num(n) => Ok(*n),
        Expr::Ident(ident) => eval_ident(*ident, ctx),
        Expr::Neg(inner) => Ok(-eval(inner, ctx)?),
        Expr::Bin(op, lhs, rhs) => {
            let l = eval(lhs, ctx)?;
            let r = eval(rhs, ctx)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        Err("division by zero".into())
                    } else {
                        Ok(l / r)
                    }
                }
                BinOp::Rem => {
                    if r == 0.0 {
                        Err("remainder by zero".into())
                    } else {
                        Ok(l % r)
                    }
                }
            }
        }
        Expr::Call(func, a, b) => {
            let a = eval(a, ctx)?;
            let b = eval(b, ctx)?;
            Ok(match func {
                Func::Min => a.min(b),
                Func::Max => a.max(b),
            })
        }
    }
}

fn eval_ident(ident: MeterIdent, ctx: &MeterContext<'_>) -> Result<f64, String> {
    match ident {
        MeterIdent::Status => Ok(f64::from(ctx.status)),
        MeterIdent::RequestBytes => Ok(ctx.request_bytes as f64),
        MeterIdent::ResponseBytes => Ok(ctx.response_bytes as f64),
        MeterIdent::ChunkCount => Ok(ctx.chunk_count as f64),
        MeterIdent::SseEvents => {
            let data = ctx.all_data.ok_or("sseEvents requires accumulated data")?;
            Ok(parser::parse_events(data).len() as f64)
        }
        MeterIdent::SseLastData => {
            let data = ctx.all_data.ok_or("sseLastData requires accumulated data")?;
            let last = parser::last_data(data).ok_or("stream contains no SSE data")?;
            last.trim()
                .parse::<f64>()
                .map_err(|_| format!("last SSE data is not numeric: {last:?}"))
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(MeterIdent),
    Func(Func),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> GatewayResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
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
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal.parse::<f64>().map_err(|_| {
                    GatewayError::config(format!("invalid number in metering expression: {literal}"))
                })?;
                tokens.push(Token::Num(value));
            }
            c if c.is_ascii_alphabetic() => {
                let mut name = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        name.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Some(ident) = MeterIdent::from_name(&name) {
                    tokens.push(Token::Ident(ident));
                } else if name == "min" {
                    tokens.push(Token::Func(Func::Min));
                } else if name == "max" {
                    tokens.push(Token::Func(Func::Max));
                } else {
                    return Err(GatewayError::config(format!(
                        "unrecognized identifier in metering expression: {name}"
                    )));
                }
            }
            other => {
                return Err(GatewayError::config(format!(
                    "unrecognized token in metering expression: {other:?}"
                )));
            }
        }
    }

    Ok(tokens)
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
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> GatewayResult<()> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(GatewayError::config(format!(
                "metering expression expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn parse_expr(&mut self) -> GatewayResult<Expr> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> GatewayResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinOp::Mul,
                Some(Token::Slash) => BinOp::Div,
                Some(Token::Percent) => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> GatewayResult<Expr> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> GatewayResult<Expr> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(ident)) => Ok(Expr::Ident(ident)),
            Some(Token::LParen) => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Func(func)) => {
                self.expect(&Token::LParen)?;
                let a = self.parse_expr()?;
                self.expect(&Token::Comma)?;
                let b = self.parse_expr()?;
                self.expect(&Token::RParen)?;
                Ok(Expr::Call(func, Box::new(a), Box::new(b)))
            }
            other => Err(GatewayError::config(format!(
                "metering expression expected a value, found {other:?}"
            ))),
        }
    }
}
