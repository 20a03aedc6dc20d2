//! Sandboxed expression evaluator for conditional nodes.
//!
//! A small closed grammar: numeric, string, and boolean literals, arithmetic
//! (`+ - * / % **`, power capped), comparisons, `and`/`or`/`not`, parentheses,
//! and a whitelist of builtin calls (`abs, min, max, len, int, float, str,
//! bool`). No attribute access, no indexing, no names beyond the provided
//! variables. Expression length is capped before any parsing happens.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;
use thiserror::Error;

/// Hard cap on expression length, enforced before evaluation.
pub const MAX_EXPRESSION_LEN: usize = 500;

/// Cap on the exponent magnitude of `**`.
pub const MAX_EXPONENT: i64 = 100;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("expression exceeds {MAX_EXPRESSION_LEN} characters")]
    TooLong,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("undefined variable '{0}'")]
    UndefinedVariable(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    DivisionByZero,
    #[error("exponent exceeds the power cap")]
    PowerCap,
}

/// Runtime value with Python-flavoured semantics (ints and floats are
/// distinct; `/` always yields a float; `None` exists).
#[derive(Clone, Debug, PartialEq)]
pub enum Val {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    None,
}

impl Val {
    fn truthy(&self) -> bool {
        match self {
            Val::Bool(b) => *b,
            Val::Int(i) => *i != 0,
            Val::Float(f) => *f != 0.0,
            Val::Str(s) => !s.is_empty(),
            Val::None => false,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Val::Int(i) => Value::from(*i),
            Val::Float(f) => Value::from(*f),
            Val::Bool(b) => Value::from(*b),
            Val::Str(s) => Value::from(s.clone()),
            Val::None => Value::Null,
        }
    }

    fn from_json(value: &Value) -> Result<Val, ExprError> {
        match value {
            Value::Null => Ok(Val::None),
            Value::Bool(b) => Ok(Val::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Val::Int(i))
                } else {
                    Ok(Val::Float(n.as_f64().unwrap_or(0.0)))
                }
            }
            Value::String(s) => Ok(Val::Str(s.clone())),
            other => Err(ExprError::Type(format!(
                "variables must be scalar, got {other}"
            ))),
        }
    }
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Int(i) => write!(f, "{i}"),
            Val::Float(v) => write!(f, "{v}"),
            Val::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Val::Str(s) => write!(f, "{s}"),
            Val::None => write!(f, "None"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    tokens.push(Token::Power);
                    i += 2;
                } else {
                    tokens.push(Token::Star);
                    i += 1;
                }
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Eq);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("assignment is not allowed".into()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ne);
                    i += 2;
                } else {
                    return Err(ExprError::Parse("unexpected '!'".into()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                        None => return Err(ExprError::Parse("unterminated string".into())),
                    }
                }
                tokens.push(Token::Str(s));
            }
            '0'..='9' => {
                let start = i;
                let mut saw_dot = false;
                while i < chars.len()
                    && (chars[i].is_ascii_digit() || (chars[i] == '.' && !saw_dot))
                {
                    if chars[i] == '.' {
                        saw_dot = true;
                    }
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                if saw_dot {
                    let f = text
                        .parse::<f64>()
                        .map_err(|_| ExprError::Parse(format!("bad number '{text}'")))?;
                    tokens.push(Token::Float(f));
                } else {
                    let n = text
                        .parse::<i64>()
                        .map_err(|_| ExprError::Parse(format!("bad number '{text}'")))?;
                    tokens.push(Token::Int(n));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(text));
            }
            other => return Err(ExprError::Parse(format!("unexpected character '{other}'"))),
        }
    }
    Ok(tokens)
}

/// Names callable from expressions; everything else is rejected.
const BUILTINS: &[&str] = &["abs", "min", "max", "len", "int", "float", "str", "bool"];

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    vars: &'a HashMap<String, Value>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, token: Token) -> Result<(), ExprError> {
        match self.next() {
            Some(t) if t == token => Ok(()),
            other => Err(ExprError::Parse(format!(
                "expected {token:?}, found {other:?}"
            ))),
        }
    }

    fn parse_or(&mut self) -> Result<Val, ExprError> {
        let mut left = self.parse_and()?;
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "or") {
            self.next();
            let right = self.parse_and()?;
            left = Val::Bool(left.truthy() || right.truthy());
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Val, ExprError> {
        let mut left = self.parse_not()?;
        while matches!(self.peek(), Some(Token::Ident(w)) if w == "and") {
            self.next();
            let right = self.parse_not()?;
            left = Val::Bool(left.truthy() && right.truthy());
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Val, ExprError> {
        if matches!(self.peek(), Some(Token::Ident(w)) if w == "not") {
            self.next();
            let operand = self.parse_not()?;
            return Ok(Val::Bool(!operand.truthy()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Val, ExprError> {
        let left = self.parse_additive()?;
        let op = match self.peek() {
            Some(Token::Lt) => Some("<"),
            Some(Token::Gt) => Some(">"),
            Some(Token::Le) => Some("<="),
            Some(Token::Ge) => Some(">="),
            Some(Token::Eq) => Some("=="),
            Some(Token::Ne) => Some("!="),
            _ => None,
        };
        let Some(op) = op else {
            return Ok(left);
        };
        self.next();
        let right = self.parse_additive()?;
        compare(&left, op, &right)
    }

    fn parse_additive(&mut self) -> Result<Val, ExprError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.next();
                    let right = self.parse_multiplicative()?;
                    left = add(&left, &right)?;
                }
                Some(Token::Minus) => {
                    self.next();
                    let right = self.parse_multiplicative()?;
                    left = arith(&left, &right, "-")?;
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Val, ExprError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => "*",
                Some(Token::Slash) => "/",
                Some(Token::Percent) => "%",
                _ => return Ok(left),
            };
            self.next();
            let right = self.parse_unary()?;
            left = arith(&left, &right, op)?;
        }
    }

    fn parse_unary(&mut self) -> Result<Val, ExprError> {
        if matches!(self.peek(), Some(Token::Minus)) {
            self.next();
            let operand = self.parse_unary()?;
            return match operand {
                Val::Int(i) => Ok(Val::Int(-i)),
                Val::Float(f) => Ok(Val::Float(-f)),
                other => Err(ExprError::Type(format!("cannot negate {other:?}"))),
            };
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Val, ExprError> {
        let base = self.parse_atom()?;
        if matches!(self.peek(), Some(Token::Power)) {
            self.next();
            // Right-associative, and unary minus binds tighter on the exponent.
            let exponent = self.parse_unary()?;
            return power(&base, &exponent);
        }
        Ok(base)
    }

    fn parse_atom(&mut self) -> Result<Val, ExprError> {
        match self.next() {
            Some(Token::Int(i)) => Ok(Val::Int(i)),
            Some(Token::Float(f)) => Ok(Val::Float(f)),
            Some(Token::Str(s)) => Ok(Val::Str(s)),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                if matches!(self.peek(), Some(Token::LParen)) {
                    return self.parse_call(&name);
                }
                match name.as_str() {
                    "True" | "true" => Ok(Val::Bool(true)),
                    "False" | "false" => Ok(Val::Bool(false)),
                    "None" | "null" => Ok(Val::None),
                    _ => match self.vars.get(&name) {
                        Some(v) => Val::from_json(v),
                        None => Err(ExprError::UndefinedVariable(name)),
                    },
                }
            }
            other => Err(ExprError::Parse(format!("unexpected token {other:?}"))),
        }
    }

    fn parse_call(&mut self, name: &str) -> Result<Val, ExprError> {
        if !BUILTINS.contains(&name) {
            return Err(ExprError::UnknownFunction(name.to_string()));
        }
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Some(Token::RParen)) {
            loop {
                args.push(self.parse_or()?);
                if matches!(self.peek(), Some(Token::Comma)) {
                    self.next();
                } else {
                    break;
                }
            }
        }
        self.expect(Token::RParen)?;
        call_builtin(name, &args)
    }
}

fn as_f64(v: &Val) -> Option<f64> {
    match v {
        Val::Int(i) => Some(*i as f64),
        Val::Float(f) => Some(*f),
        Val::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn add(left: &Val, right: &Val) -> Result<Val, ExprError> {
    if let (Val::Str(a), Val::Str(b)) = (left, right) {
        return Ok(Val::Str(format!("{a}{b}")));
    }
    arith(left, right, "+")
}

fn arith(left: &Val, right: &Val, op: &str) -> Result<Val, ExprError> {
    match (left, right) {
        (Val::Int(a), Val::Int(b)) => match op {
            "+" => Ok(Val::Int(a + b)),
            "-" => Ok(Val::Int(a - b)),
            "*" => Ok(Val::Int(a * b)),
            "/" => {
                if *b == 0 {
                    Err(ExprError::DivisionByZero)
                } else {
                    Ok(Val::Float(*a as f64 / *b as f64))
                }
            }
            "%" => {
                if *b == 0 {
                    Err(ExprError::DivisionByZero)
                } else {
                    Ok(Val::Int(a.rem_euclid(*b)))
                }
            }
            _ => Err(ExprError::Parse(format!("unknown operator {op}"))),
        },
        _ => {
            let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                return Err(ExprError::Type(format!(
                    "cannot apply '{op}' to {left:?} and {right:?}"
                )));
            };
            match op {
                "+" => Ok(Val::Float(a + b)),
                "-" => Ok(Val::Float(a - b)),
                "*" => Ok(Val::Float(a * b)),
                "/" => {
                    if b == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Val::Float(a / b))
                    }
                }
                "%" => {
                    if b == 0.0 {
                        Err(ExprError::DivisionByZero)
                    } else {
                        Ok(Val::Float(a.rem_euclid(b)))
                    }
                }
                _ => Err(ExprError::Parse(format!("unknown operator {op}"))),
            }
        }
    }
}

fn power(base: &Val, exponent: &Val) -> Result<Val, ExprError> {
    let exp_magnitude = match exponent {
        Val::Int(e) => *e,
        Val::Float(f) => *f as i64,
        other => return Err(ExprError::Type(format!("bad exponent {other:?}"))),
    };
    if exp_magnitude.abs() > MAX_EXPONENT {
        return Err(ExprError::PowerCap);
    }
    match (base, exponent) {
        (Val::Int(b), Val::Int(e)) if *e >= 0 => {
            let result = b
                .checked_pow(*e as u32)
                .ok_or_else(|| ExprError::Type("integer overflow in power".into()))?;
            Ok(Val::Int(result))
        }
        _ => {
            let (Some(b), Some(e)) = (as_f64(base), as_f64(exponent)) else {
                return Err(ExprError::Type("power needs numeric operands".into()));
            };
            Ok(Val::Float(b.powf(e)))
        }
    }
}

fn compare(left: &Val, op: &str, right: &Val) -> Result<Val, ExprError> {
    // Equality is defined across all value kinds; ordering needs numbers or
    // two strings.
    let result = match op {
        "==" | "!=" => {
            let equal = match (left, right) {
                (Val::Str(a), Val::Str(b)) => a == b,
                (Val::None, Val::None) => true,
                (Val::Bool(a), Val::Bool(b)) => a == b,
                _ => match (as_f64(left), as_f64(right)) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                },
            };
            if op == "==" {
                equal
            } else {
                !equal
            }
        }
        _ => match (left, right) {
            (Val::Str(a), Val::Str(b)) => match op {
                "<" => a < b,
                ">" => a > b,
                "<=" => a <= b,
                ">=" => a >= b,
                _ => unreachable!(),
            },
            _ => {
                let (Some(a), Some(b)) = (as_f64(left), as_f64(right)) else {
                    return Err(ExprError::Type(format!(
                        "cannot order {left:?} and {right:?}"
                    )));
                };
                match op {
                    "<" => a < b,
                    ">" => a > b,
                    "<=" => a <= b,
                    ">=" => a >= b,
                    _ => unreachable!(),
                }
            }
        },
    };
    Ok(Val::Bool(result))
}

fn call_builtin(name: &str, args: &[Val]) -> Result<Val, ExprError> {
    let arity = |n: usize| {
        if args.len() != n {
            Err(ExprError::Type(format!(
                "{name}() takes {n} argument(s), got {}",
                args.len()
            )))
        } else {
            Ok(())
        }
    };
    match name {
        "abs" => {
            arity(1)?;
            match &args[0] {
                Val::Int(i) => Ok(Val::Int(i.abs())),
                Val::Float(f) => Ok(Val::Float(f.abs())),
                other => Err(ExprError::Type(format!("abs() needs a number, got {other:?}"))),
            }
        }
        "min" | "max" => {
            if args.is_empty() {
                return Err(ExprError::Type(format!("{name}() needs arguments")));
            }
            let mut best = args[0].clone();
            for candidate in &args[1..] {
                let (Some(a), Some(b)) = (as_f64(candidate), as_f64(&best)) else {
                    return Err(ExprError::Type(format!("{name}() needs numbers")));
                };
                let better = if name == "min" { a < b } else { a > b };
                if better {
                    best = candidate.clone();
                }
            }
            Ok(best)
        }
        "len" => {
            arity(1)?;
            match &args[0] {
                Val::Str(s) => Ok(Val::Int(s.chars().count() as i64)),
                other => Err(ExprError::Type(format!("len() needs a string, got {other:?}"))),
            }
        }
        "int" => {
            arity(1)?;
            match &args[0] {
                Val::Int(i) => Ok(Val::Int(*i)),
                Val::Float(f) => Ok(Val::Int(*f as i64)),
                Val::Bool(b) => Ok(Val::Int(*b as i64)),
                Val::Str(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Val::Int)
                    .map_err(|_| ExprError::Type(format!("int() cannot parse '{s}'"))),
                Val::None => Err(ExprError::Type("int() cannot convert None".into())),
            }
        }
        "float" => {
            arity(1)?;
            match &args[0] {
                Val::Int(i) => Ok(Val::Float(*i as f64)),
                Val::Float(f) => Ok(Val::Float(*f)),
                Val::Bool(b) => Ok(Val::Float(*b as i64 as f64)),
                Val::Str(s) => s
                    .trim()
                    .parse::<f64>()
                    .map(Val::Float)
                    .map_err(|_| ExprError::Type(format!("float() cannot parse '{s}'"))),
                Val::None => Err(ExprError::Type("float() cannot convert None".into())),
            }
        }
        "str" => {
            arity(1)?;
            Ok(Val::Str(args[0].to_string()))
        }
        "bool" => {
            arity(1)?;
            Ok(Val::Bool(args[0].truthy()))
        }
        _ => Err(ExprError::UnknownFunction(name.to_string())),
    }
}

/// The evaluator. Stateless; safe to share.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExpressionEvaluator;

impl ExpressionEvaluator {
    /// Evaluates `expr` against scalar `variables`, preserving the result
    /// type (int stays int, bool stays bool, ...).
    pub fn evaluate(
        &self,
        expr: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, ExprError> {
        if expr.chars().count() > MAX_EXPRESSION_LEN {
            return Err(ExprError::TooLong);
        }
        let tokens = lex(expr)?;
        if tokens.is_empty() {
            return Err(ExprError::Parse("empty expression".into()));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
            vars: variables,
        };
        let value = parser.parse_or()?;
        if parser.pos != tokens.len() {
            return Err(ExprError::Parse(format!(
                "trailing tokens at position {}",
                parser.pos
            )));
        }
        Ok(value.to_json())
    }

    /// Syntax-only check: lexes and parses with every name treated as defined.
    pub fn validate(&self, expr: &str) -> bool {
        if expr.chars().count() > MAX_EXPRESSION_LEN {
            return false;
        }
        let Ok(tokens) = lex(expr) else {
            return false;
        };
        !tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(expr: &str) -> Result<Value, ExprError> {
        ExpressionEvaluator.evaluate(expr, &HashMap::new())
    }

    fn eval_with(expr: &str, vars: &[(&str, Value)]) -> Result<Value, ExprError> {
        let map = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        ExpressionEvaluator.evaluate(expr, &map)
    }

    #[test]
    fn basic_arithmetic() {
        assert_eq!(eval("2 + 3").unwrap(), json!(5));
        assert_eq!(eval("10 - 4").unwrap(), json!(6));
        assert_eq!(eval("3 * 4").unwrap(), json!(12));
        assert_eq!(eval("15 / 3").unwrap(), json!(5.0));
        assert_eq!(eval("17 % 5").unwrap(), json!(2));
        assert_eq!(eval("2 ** 3").unwrap(), json!(8));
    }

    #[test]
    fn comparisons() {
        assert_eq!(eval("5 > 3").unwrap(), json!(true));
        assert_eq!(eval("5 < 3").unwrap(), json!(false));
        assert_eq!(eval("5 >= 5").unwrap(), json!(true));
        assert_eq!(eval("5 <= 4").unwrap(), json!(false));
        assert_eq!(eval("5 == 5").unwrap(), json!(true));
        assert_eq!(eval("5 != 3").unwrap(), json!(true));
    }

    #[test]
    fn string_comparisons() {
        let vars = [
            ("status", json!("completed")),
            ("error", json!("")),
        ];
        assert_eq!(eval_with("status == 'completed'", &vars).unwrap(), json!(true));
        assert_eq!(eval_with("status != 'failed'", &vars).unwrap(), json!(true));
        assert_eq!(eval_with("error == ''", &vars).unwrap(), json!(true));
    }

    #[test]
    fn boolean_logic() {
        let vars = [("a", json!(true)), ("b", json!(false)), ("c", json!(true))];
        assert_eq!(eval_with("a and c", &vars).unwrap(), json!(true));
        assert_eq!(eval_with("a and b", &vars).unwrap(), json!(false));
        assert_eq!(eval_with("a or b", &vars).unwrap(), json!(true));
        assert_eq!(eval_with("b or False", &vars).unwrap(), json!(false));
        assert_eq!(eval_with("not b", &vars).unwrap(), json!(true));
        assert_eq!(eval_with("not a", &vars).unwrap(), json!(false));
    }

    #[test]
    fn complex_boolean_expressions() {
        let vars = [
            ("count", json!(15)),
            ("status", json!("ready")),
            ("urgent", json!(true)),
        ];
        assert_eq!(
            eval_with("(count > 10) and (status == 'ready')", &vars).unwrap(),
            json!(true)
        );
        assert_eq!(
            eval_with("(count > 20) or (urgent == True)", &vars).unwrap(),
            json!(true)
        );
        assert_eq!(eval_with("not (count < 10)", &vars).unwrap(), json!(true));
    }

    #[test]
    fn type_preservation() {
        assert_eq!(eval("85").unwrap(), json!(85));
        assert_eq!(eval("3.14").unwrap(), json!(3.14));
        assert_eq!(eval("True").unwrap(), json!(true));
        assert_eq!(eval("'completed'").unwrap(), json!("completed"));
        assert_eq!(eval("None").unwrap(), json!(null));
    }

    #[test]
    fn builtin_functions() {
        assert_eq!(eval("abs(-5)").unwrap(), json!(5));
        assert_eq!(eval_with("abs(negative)", &[("negative", json!(-10))]).unwrap(), json!(10));
        assert_eq!(eval("min(1, 5, 3)").unwrap(), json!(1));
        assert_eq!(eval("max(1, 5, 3)").unwrap(), json!(5));
        assert_eq!(eval("len('hello')").unwrap(), json!(5));
        assert_eq!(eval("str(123)").unwrap(), json!("123"));
        assert_eq!(eval("int('42')").unwrap(), json!(42));
        assert_eq!(eval("float('3.14')").unwrap(), json!(3.14));
        assert_eq!(eval("bool(1)").unwrap(), json!(true));
    }

    #[test]
    fn undefined_variables_error() {
        assert_eq!(
            eval("missing > 3"),
            Err(ExprError::UndefinedVariable("missing".into()))
        );
    }

    #[test]
    fn division_by_zero_errors() {
        assert_eq!(eval("1 / 0"), Err(ExprError::DivisionByZero));
        assert_eq!(eval("1 % 0"), Err(ExprError::DivisionByZero));
    }

    #[test]
    fn sandbox_rejects_non_whitelisted_calls_and_syntax() {
        assert!(matches!(
            eval("__import__('os')"),
            Err(ExprError::Parse(_)) | Err(ExprError::UnknownFunction(_))
        ));
        assert_eq!(
            eval("open('/etc/passwd')"),
            Err(ExprError::UnknownFunction("open".into()))
        );
        assert_eq!(
            eval("eval('1+1')"),
            Err(ExprError::UnknownFunction("eval".into()))
        );
        assert!(eval("a = 5").is_err());
    }

    #[test]
    fn length_cap_rejected_before_evaluation() {
        let expr = format!("1 + {}", "1 + ".repeat(200));
        assert_eq!(eval(&expr), Err(ExprError::TooLong));
    }

    #[test]
    fn power_cap_enforced() {
        assert_eq!(eval("2 ** 101"), Err(ExprError::PowerCap));
        assert_eq!(eval("2 ** 10").unwrap(), json!(1024));
    }

    #[test]
    fn conditional_reruns_are_deterministic() {
        let vars = [("score", json!(85))];
        let first = eval_with("score >= 80", &vars).unwrap();
        let second = eval_with("score >= 80", &vars).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, json!(true));
    }

    #[test]
    fn validate_checks_syntax_only() {
        assert!(ExpressionEvaluator.validate("a > b"));
        assert!(ExpressionEvaluator.validate("(x + y) * z"));
        assert!(ExpressionEvaluator.validate("status == 'completed'"));
        assert!(!ExpressionEvaluator.validate(""));
        assert!(!ExpressionEvaluator.validate(&"1 ".repeat(300)));
    }
}
