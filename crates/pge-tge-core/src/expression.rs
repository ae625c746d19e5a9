// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of PGE TGE.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Side-effect-free expression language for derived values.
//!
//! Covers the subset of Home Assistant templates that makes sense for a single
//! hourly number: arithmetic, comparisons, boolean logic, a few numeric
//! functions and `now()` bound to the hour being evaluated. An expression only
//! sees the [`Bindings`] it is given.

use crate::error::ExpressionError;
use chrono::{DateTime, Datelike, FixedOffset, Timelike};
use parking_lot::Mutex;
use pge_tge_types::{HourRecord, round_to};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

type EvalResult<T> = std::result::Result<T, ExpressionError>;

// ============= Public API =============

/// Read-only values visible to one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bindings {
    pub rate: f64,
    pub volume: f64,
    /// Returned by `now()`
    pub time: DateTime<FixedOffset>,
}

impl Bindings {
    pub fn for_hour(record: &HourRecord) -> Self {
        Self {
            rate: record.rate,
            volume: record.volume,
            time: record.time,
        }
    }
}

/// Expression engine injected into the derived value calculator
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, expr: &str, bindings: &Bindings) -> EvalResult<f64>;

    /// Validate an expression without evaluating it
    fn check(&self, expr: &str) -> EvalResult<()>;
}

/// Default [`Evaluator`]; parsed expressions are memoized per source string
#[derive(Debug, Default)]
pub struct ArithmeticEvaluator {
    compiled: Mutex<HashMap<String, Arc<Expr>>>,
}

impl ArithmeticEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    fn compile(&self, expr: &str) -> EvalResult<Arc<Expr>> {
        let cached = self.compiled.lock().get(expr).cloned();
        if let Some(compiled) = cached {
            return Ok(compiled);
        }

        let parsed = Arc::new(parse(expr)?);
        self.compiled
            .lock()
            .insert(expr.to_owned(), Arc::clone(&parsed));
        Ok(parsed)
    }
}

impl Evaluator for ArithmeticEvaluator {
    fn evaluate(&self, expr: &str, bindings: &Bindings) -> EvalResult<f64> {
        let compiled = self.compile(expr)?;
        match eval(&compiled, bindings)? {
            Value::Number(n) if n.is_finite() => Ok(n),
            Value::Number(_) | Value::Time(_) => Err(ExpressionError::NonNumeric),
        }
    }

    fn check(&self, expr: &str) -> EvalResult<()> {
        self.compile(expr).map(|_| ())
    }
}

// ============= Syntax Tree =============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variable {
    Rate,
    Volume,
}

impl Variable {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "fixing1_rate" | "rate" => Some(Self::Rate),
            "fixing1_volume" | "volume" => Some(Self::Volume),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Function {
    Now,
    Min,
    Max,
    Abs,
    Round,
    If,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "now" => Some(Self::Now),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "abs" => Some(Self::Abs),
            "round" => Some(Self::Round),
            "if" => Some(Self::If),
            _ => None,
        }
    }

    fn check_arity(self, name: &str, actual: usize) -> EvalResult<()> {
        let (ok, expected) = match self {
            Self::Now => (actual == 0, "0"),
            Self::Abs => (actual == 1, "1"),
            Self::Round => ((1..=2).contains(&actual), "1 or 2"),
            Self::Min | Self::Max => (actual >= 1, "at least 1"),
            Self::If => (actual == 3, "3"),
        };

        if ok {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                name: name.to_owned(),
                expected,
                actual,
            })
        }
    }
}

/// Timestamp members reachable from `now()`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeAttr {
    Hour,
    Minute,
    Day,
    Month,
    Year,
    Weekday,
    IsoWeekday,
}

impl TimeAttr {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "hour" => Some(Self::Hour),
            "minute" => Some(Self::Minute),
            "day" => Some(Self::Day),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            "weekday" => Some(Self::Weekday),
            "isoweekday" => Some(Self::IsoWeekday),
            _ => None,
        }
    }

    /// Weekdays are methods, the rest are plain attributes
    fn is_method(self) -> bool {
        matches!(self, Self::Weekday | Self::IsoWeekday)
    }

    fn read(self, time: &DateTime<FixedOffset>) -> f64 {
        match self {
            Self::Hour => f64::from(time.hour()),
            Self::Minute => f64::from(time.minute()),
            Self::Day => f64::from(time.day()),
            Self::Month => f64::from(time.month()),
            Self::Year => f64::from(time.year()),
            Self::Weekday => f64::from(time.weekday().num_days_from_monday()),
            Self::IsoWeekday => f64::from(time.weekday().number_from_monday()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Var(Variable),
    Call {
        func: Function,
        args: Vec<Expr>,
    },
    Attr {
        target: Box<Expr>,
        attr: TimeAttr,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

// ============= Tokenizer =============

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    Ne,
}

impl Token {
    fn comparison(&self) -> Option<BinaryOp> {
        match self {
            Self::Lt => Some(BinaryOp::Lt),
            Self::Le => Some(BinaryOp::Le),
            Self::Gt => Some(BinaryOp::Gt),
            Self::Ge => Some(BinaryOp::Ge),
            Self::EqEq => Some(BinaryOp::Eq),
            Self::Ne => Some(BinaryOp::Ne),
            _ => None,
        }
    }
}

/// Strip an optional `{{ ... }}` wrapper
fn strip_template(expr: &str) -> &str {
    let trimmed = expr.trim();
    trimmed
        .strip_prefix("{{")
        .and_then(|inner| inner.strip_suffix("}}"))
        .map_or(trimmed, str::trim)
}

fn tokenize(src: &str) -> EvalResult<Vec<(Token, usize)>> {
    let mut tokens = Vec::new();
    let mut chars = src.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() {
            let mut literal = String::new();
            let mut seen_dot = false;
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() || (d == '.' && !seen_dot) {
                    seen_dot |= d == '.';
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal.parse::<f64>().map_err(|e| ExpressionError::Parse {
                position,
                message: format!("invalid number '{literal}': {e}"),
            })?;
            tokens.push((Token::Number(value), position));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push((Token::Ident(ident), position));
            continue;
        }

        chars.next();
        let followed_by_eq = chars.peek().is_some_and(|&(_, d)| d == '=');
        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '.' => Token::Dot,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '<' if followed_by_eq => Token::Le,
            '>' if followed_by_eq => Token::Ge,
            '=' if followed_by_eq => Token::EqEq,
            '!' if followed_by_eq => Token::Ne,
            '<' => Token::Lt,
            '>' => Token::Gt,
            other => {
                return Err(ExpressionError::Parse {
                    position,
                    message: format!("unexpected character '{other}'"),
                });
            }
        };
        if matches!(token, Token::Le | Token::Ge | Token::EqEq | Token::Ne) {
            chars.next();
        }
        tokens.push((token, position));
    }

    Ok(tokens)
}

// ============= Parser =============

/// Parentheses, call arguments and prefix operators each open a level
const MAX_NESTING: usize = 64;

/// Bounds the depth of left-leaning operator chains as well
const MAX_TOKENS: usize = 1024;

fn parse(expr: &str) -> EvalResult<Expr> {
    let src = strip_template(expr);
    let tokens = tokenize(src)?;
    if let Some((_, position)) = tokens.get(MAX_TOKENS) {
        return Err(ExpressionError::Parse {
            position: *position,
            message: format!("expression longer than {MAX_TOKENS} tokens"),
        });
    }
    Parser {
        tokens,
        pos: 0,
        end: src.len(),
        depth: 0,
    }
    .parse()
}

/// Recursive descent, loosest binding first:
/// `or`, `and`, `not`, comparison, `+ -`, `* / %`, unary `-`, `.attr`
struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn parse(mut self) -> EvalResult<Expr> {
        if self.tokens.is_empty() {
            return Err(self.error("empty expression"));
        }
        let expr = self.parse_or()?;
        if self.peek().is_some() {
            return Err(self.error("unexpected trailing input"));
        }
        Ok(expr)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(_, p)| *p)
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Some(Token::Ident(name)) if name == keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> EvalResult<()> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    /// Run `parse` one nesting level deeper
    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> EvalResult<Expr>) -> EvalResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_and()?;
        while self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Self::binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_not()?;
        while self.eat_keyword("and") {
            let rhs = self.parse_not()?;
            lhs = Self::binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn parse_not(&mut self) -> EvalResult<Expr> {
        if self.eat_keyword("not") {
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> EvalResult<Expr> {
        let lhs = self.parse_additive()?;
        match self.peek().and_then(Token::comparison) {
            Some(op) => {
                self.pos += 1;
                let rhs = self.parse_additive()?;
                Ok(Self::binary(op, lhs, rhs))
            }
            None => Ok(lhs),
        }
    }

    fn parse_additive(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Self::binary(op, lhs, rhs);
        }
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Self::binary(op, lhs, rhs);
        }
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        if self.eat(&Token::Minus) {
            let operand = self.nested(Self::parse_unary)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Plus) {
            return self.nested(Self::parse_unary);
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> EvalResult<Expr> {
        let mut expr = self.parse_primary()?;

        while self.eat(&Token::Dot) {
            let position = self.position();
            let Some(Token::Ident(name)) = self.next_token() else {
                return Err(ExpressionError::Parse {
                    position,
                    message: "expected attribute name after '.'".to_owned(),
                });
            };
            let called = if self.eat(&Token::LParen) {
                self.expect(&Token::RParen, "')'")?;
                true
            } else {
                false
            };

            let attr = TimeAttr::from_name(&name)
                .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone()))?;
            if attr.is_method() != called {
                let message = if called {
                    format!("'{name}' is an attribute, not a method")
                } else {
                    format!("'{name}' is a method and must be called")
                };
                return Err(ExpressionError::Parse { position, message });
            }

            expr = Expr::Attr {
                target: Box::new(expr),
                attr,
            };
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        let position = self.position();
        match self.next_token() {
            Some(Token::Number(value)) => Ok(Expr::Number(value)),
            Some(Token::LParen) => {
                let inner = self.nested(Self::parse_or)?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_args()?;
                    let func = Function::from_name(&name)
                        .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                    func.check_arity(&name, args.len())?;
                    return Ok(Expr::Call { func, args });
                }

                match name.as_str() {
                    "true" | "True" => Ok(Expr::Number(1.0)),
                    "false" | "False" => Ok(Expr::Number(0.0)),
                    "and" | "or" | "not" => Err(ExpressionError::Parse {
                        position,
                        message: format!("unexpected keyword '{name}'"),
                    }),
                    _ => Variable::from_name(&name)
                        .map(Expr::Var)
                        .ok_or_else(|| ExpressionError::UnknownIdentifier(name.clone())),
                }
            }
            Some(token) => Err(ExpressionError::Parse {
                position,
                message: format!("unexpected token {token:?}"),
            }),
            None => Err(self.error("unexpected end of expression")),
        }
    }

    fn parse_args(&mut self) -> EvalResult<Vec<Expr>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.nested(Self::parse_or)?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen, "',' or ')'")?;
                return Ok(args);
            }
        }
    }
}

// ============= Evaluation =============

#[derive(Debug, Clone, Copy)]
enum Value {
    Number(f64),
    Time(DateTime<FixedOffset>),
}

impl Value {
    fn number(self) -> EvalResult<f64> {
        match self {
            Self::Number(n) => Ok(n),
            Self::Time(_) => Err(ExpressionError::Type(
                "expected a number, found a timestamp".to_owned(),
            )),
        }
    }
}

fn truthy(value: f64) -> bool {
    value != 0.0
}

fn flag(value: bool) -> Value {
    Value::Number(if value { 1.0 } else { 0.0 })
}

fn eval_number(expr: &Expr, bindings: &Bindings) -> EvalResult<f64> {
    eval(expr, bindings)?.number()
}

fn eval(expr: &Expr, bindings: &Bindings) -> EvalResult<Value> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Var(Variable::Rate) => Ok(Value::Number(bindings.rate)),
        Expr::Var(Variable::Volume) => Ok(Value::Number(bindings.volume)),
        Expr::Call { func, args } => eval_call(*func, args, bindings),
        Expr::Attr { target, attr } => match eval(target, bindings)? {
            Value::Time(time) => Ok(Value::Number(attr.read(&time))),
            Value::Number(_) => Err(ExpressionError::Type(format!(
                "{attr:?} is only available on now()"
            ))),
        },
        Expr::Unary { op, operand } => {
            let value = eval_number(operand, bindings)?;
            Ok(match op {
                UnaryOp::Neg => Value::Number(-value),
                UnaryOp::Not => flag(!truthy(value)),
            })
        }
        Expr::Binary {
            op: BinaryOp::And,
            lhs,
            rhs,
        } => {
            if !truthy(eval_number(lhs, bindings)?) {
                return Ok(flag(false));
            }
            Ok(flag(truthy(eval_number(rhs, bindings)?)))
        }
        Expr::Binary {
            op: BinaryOp::Or,
            lhs,
            rhs,
        } => {
            if truthy(eval_number(lhs, bindings)?) {
                return Ok(flag(true));
            }
            Ok(flag(truthy(eval_number(rhs, bindings)?)))
        }
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_number(lhs, bindings)?;
            let r = eval_number(rhs, bindings)?;
            apply_binary(*op, l, r)
        }
    }
}

fn apply_binary(op: BinaryOp, l: f64, r: f64) -> EvalResult<Value> {
    let ordering = l.partial_cmp(&r);
    let value = match op {
        BinaryOp::Add => Value::Number(l + r),
        BinaryOp::Sub => Value::Number(l - r),
        BinaryOp::Mul => Value::Number(l * r),
        BinaryOp::Div | BinaryOp::Rem if r == 0.0 => return Err(ExpressionError::DivisionByZero),
        BinaryOp::Div => Value::Number(l / r),
        // Result takes the sign of the divisor
        BinaryOp::Rem => Value::Number(l - r * (l / r).floor()),
        BinaryOp::Lt => flag(ordering == Some(Ordering::Less)),
        BinaryOp::Le => flag(matches!(ordering, Some(Ordering::Less | Ordering::Equal))),
        BinaryOp::Gt => flag(ordering == Some(Ordering::Greater)),
        BinaryOp::Ge => flag(matches!(
            ordering,
            Some(Ordering::Greater | Ordering::Equal)
        )),
        BinaryOp::Eq => flag(ordering == Some(Ordering::Equal)),
        BinaryOp::Ne => flag(ordering != Some(Ordering::Equal)),
        BinaryOp::And | BinaryOp::Or => {
            return Err(ExpressionError::Type(
                "logical operators are evaluated lazily".to_owned(),
            ));
        }
    };
    Ok(value)
}

fn eval_call(func: Function, args: &[Expr], bindings: &Bindings) -> EvalResult<Value> {
    match func {
        Function::Now => Ok(Value::Time(bindings.time)),
        Function::If => {
            let [cond, then, otherwise] = args else {
                return Err(ExpressionError::Arity {
                    name: "if".to_owned(),
                    expected: "3",
                    actual: args.len(),
                });
            };
            if truthy(eval_number(cond, bindings)?) {
                eval(then, bindings)
            } else {
                eval(otherwise, bindings)
            }
        }
        Function::Abs | Function::Round | Function::Min | Function::Max => {
            let values = args
                .iter()
                .map(|arg| eval_number(arg, bindings))
                .collect::<EvalResult<Vec<f64>>>()?;
            numeric_call(func, &values).map(Value::Number)
        }
    }
}

fn numeric_call(func: Function, values: &[f64]) -> EvalResult<f64> {
    match (func, values) {
        (Function::Abs, [x]) => Ok(x.abs()),
        (Function::Round, [x]) => Ok(x.round_ties_even()),
        (Function::Round, [x, digits]) => Ok(round_to(*x, round_digits(*digits)?)),
        (Function::Min, [first, rest @ ..]) => Ok(rest.iter().fold(*first, |acc, v| acc.min(*v))),
        (Function::Max, [first, rest @ ..]) => Ok(rest.iter().fold(*first, |acc, v| acc.max(*v))),
        _ => Err(ExpressionError::Type(format!(
            "{func:?} called with {} argument(s)",
            values.len()
        ))),
    }
}

#[expect(clippy::cast_possible_truncation)]
fn round_digits(digits: f64) -> EvalResult<i32> {
    if digits.fract() != 0.0 || !(-15.0..=15.0).contains(&digits) {
        return Err(ExpressionError::Type(format!(
            "round() digits must be a whole number between -15 and 15, got {digits}"
        )));
    }
    Ok(digits as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bindings(hour: u32) -> Bindings {
        // 2025-06-10 is a Tuesday
        let time = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 10, hour, 0, 0)
            .unwrap();
        Bindings {
            rate: 500.0,
            volume: 1250.0,
            time,
        }
    }

    fn eval_at(expr: &str, hour: u32) -> EvalResult<f64> {
        ArithmeticEvaluator::new().evaluate(expr, &bindings(hour))
    }

    fn eval_ok(expr: &str) -> f64 {
        eval_at(expr, 12).unwrap()
    }

    #[test]
    fn test_template_wrapper_and_variables() {
        assert_eq!(eval_ok("{{ fixing1_rate / 10 }}"), 50.0);
        assert_eq!(eval_ok("{{fixing1_volume}}"), 1250.0);
        assert_eq!(eval_ok("rate + volume"), 1750.0);
    }

    #[test]
    fn test_operator_precedence() {
        assert_eq!(eval_ok("1 + 2 * 3"), 7.0);
        assert_eq!(eval_ok("(1 + 2) * 3"), 9.0);
        assert_eq!(eval_ok("-2 * 3"), -6.0);
        assert_eq!(eval_ok("10 - 4 - 3"), 3.0);
        assert_eq!(eval_ok("7 % 3"), 1.0);
        assert_eq!(eval_ok("-7 % 3"), 2.0);
        assert_eq!(eval_ok("1 + 2 > 2 and not 0"), 1.0);
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_ok("rate >= 500"), 1.0);
        assert_eq!(eval_ok("rate != 500"), 0.0);
        assert_eq!(eval_ok("rate < 100 or volume > 1000"), 1.0);
        assert_eq!(eval_ok("true and false"), 0.0);
    }

    #[test]
    fn test_now_attributes() {
        assert_eq!(eval_at("now().hour", 18).unwrap(), 18.0);
        assert_eq!(eval_ok("now().day + now().month * 100"), 610.0);
        assert_eq!(eval_ok("now().year"), 2025.0);
        assert_eq!(eval_ok("now().weekday()"), 1.0);
        assert_eq!(eval_ok("now().isoweekday()"), 2.0);
    }

    #[test]
    fn test_peak_hour_template() {
        let expr = "{{ if(now().hour >= 17 and now().hour < 21, fixing1_rate * 1.2, fixing1_rate) }}";
        assert_eq!(eval_at(expr, 18).unwrap(), 600.0);
        assert_eq!(eval_at(expr, 9).unwrap(), 500.0);
    }

    #[test]
    fn test_functions() {
        assert_eq!(eval_ok("min(3, 1, 2)"), 1.0);
        assert_eq!(eval_ok("max(rate, 900)"), 900.0);
        assert_eq!(eval_ok("abs(-4)"), 4.0);
        assert_eq!(eval_ok("round(12.5)"), 12.0);
        assert_eq!(eval_ok("round(13.5)"), 14.0);
        assert_eq!(eval_ok("round(0.125, 2)"), 0.12);
        assert_eq!(eval_ok("round(412.355, 1)"), 412.4);
    }

    #[test]
    fn test_if_only_evaluates_chosen_branch() {
        assert_eq!(eval_ok("if(0, 1 / 0, 5)"), 5.0);
        assert_eq!(eval_ok("0 and 1 / 0"), 0.0);
    }

    #[test]
    fn test_division_by_zero() {
        assert_eq!(eval_at("rate / 0", 0), Err(ExpressionError::DivisionByZero));
        assert_eq!(eval_at("rate % 0", 0), Err(ExpressionError::DivisionByZero));
    }

    #[test]
    fn test_non_numeric_result() {
        assert_eq!(eval_at("now()", 0), Err(ExpressionError::NonNumeric));
    }

    #[test]
    fn test_type_errors() {
        assert!(matches!(eval_at("now() + 1", 0), Err(ExpressionError::Type(_))));
        assert!(matches!(eval_at("(1).hour", 0), Err(ExpressionError::Type(_))));
        assert!(matches!(
            eval_at("round(rate, 0.5)", 0),
            Err(ExpressionError::Type(_))
        ));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(
            eval_at("price * 2", 0),
            Err(ExpressionError::UnknownIdentifier("price".to_owned()))
        );
        assert_eq!(
            eval_at("sqrt(rate)", 0),
            Err(ExpressionError::UnknownFunction("sqrt".to_owned()))
        );
        assert_eq!(
            eval_at("now().second", 0),
            Err(ExpressionError::UnknownIdentifier("second".to_owned()))
        );
    }

    #[test]
    fn test_arity() {
        assert!(matches!(
            eval_at("if(rate, 1)", 0),
            Err(ExpressionError::Arity { actual: 2, .. })
        ));
        assert!(matches!(
            eval_at("now(1)", 0),
            Err(ExpressionError::Arity { actual: 1, .. })
        ));
    }

    #[test]
    fn test_parse_errors() {
        for expr in ["", "{{ }}", "rate +", "(rate", "rate rate", "rate = 1", "now().hour()", "now().weekday", "rate $ 2"] {
            assert!(
                matches!(eval_at(expr, 0), Err(ExpressionError::Parse { .. })),
                "expected parse error for {expr:?}"
            );
        }
    }

    #[test]
    fn test_deep_nesting_is_a_parse_error() {
        let evaluator = ArithmeticEvaluator::new();
        let nested = |depth: usize| format!("{}rate{}", "(".repeat(depth), ")".repeat(depth));

        assert_eq!(evaluator.evaluate(&nested(60), &bindings(0)).unwrap(), 500.0);
        match evaluator.check(&nested(100)) {
            Err(ExpressionError::Parse { message, .. }) => assert!(message.contains("nested")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(matches!(
            evaluator.check(&nested(10_000)),
            Err(ExpressionError::Parse { .. })
        ));
        assert!(matches!(
            evaluator.check(&format!("{}rate", "-".repeat(10_000))),
            Err(ExpressionError::Parse { .. })
        ));
        assert!(matches!(
            evaluator.check(&format!("{}rate", "not ".repeat(100))),
            Err(ExpressionError::Parse { .. })
        ));
    }

    #[test]
    fn test_overlong_expression_is_a_parse_error() {
        let evaluator = ArithmeticEvaluator::new();
        let chain = |terms: usize| vec!["1"; terms].join(" + ");

        assert_eq!(evaluator.evaluate(&chain(500), &bindings(0)).unwrap(), 500.0);
        match evaluator.check(&chain(100_000)) {
            Err(ExpressionError::Parse { message, .. }) => assert!(message.contains("tokens")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_check_validates_without_bindings() {
        let evaluator = ArithmeticEvaluator::new();
        assert!(evaluator.check("{{ fixing1_rate * 1.23 + 40 }}").is_ok());
        assert!(evaluator.check("fixing2_rate").is_err());
        assert!(evaluator.check("max(rate)").is_ok());
        assert!(evaluator.check("round()").is_err());
    }

    #[test]
    fn test_memoized_expression_reused() {
        let evaluator = ArithmeticEvaluator::new();
        assert_eq!(evaluator.evaluate("rate * 2", &bindings(1)).unwrap(), 1000.0);
        let other = Bindings {
            rate: 10.0,
            ..bindings(1)
        };
        assert_eq!(evaluator.evaluate("rate * 2", &other).unwrap(), 20.0);
        assert_eq!(evaluator.compiled.lock().len(), 1);
    }
}
