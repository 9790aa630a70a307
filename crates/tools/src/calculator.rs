//! Expression-evaluator capability.
//!
//! Evaluates arithmetic expressions with a fixed function allowlist and the
//! constants `pi` and `e`. The evaluator is a small recursive-descent parser;
//! nothing in the expression can reach outside it.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use reagent_core::error::{Error, Result};

use crate::{schema_value, Tool, ToolSpec};

/// Configuration fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CalculatorConfig {
    /// Decimal places in the formatted result.
    pub precision: u8,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self { precision: 10 }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CalculatorInput {
    /// Mathematical expression to evaluate.
    pub expression: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CalculatorOutput {
    /// Result of the calculation, formatted to the configured precision.
    pub result: String,
    /// Original expression.
    pub expression: String,
}

pub struct CalculatorTool {
    config: CalculatorConfig,
    alias: Option<String>,
}

impl CalculatorTool {
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config, alias: None }
    }

    pub fn with_alias(config: CalculatorConfig, alias: &str) -> Self {
        Self { config, alias: Some(alias.to_string()) }
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new(CalculatorConfig::default())
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "calculator",
            short_description: "Performs mathematical calculations",
            long_description: "Evaluates mathematical expressions safely. Supports basic \
                arithmetic, parentheses, and common math functions like sin, cos, sqrt, etc.",
            input_schema: schema_value(schemars::schema_for!(CalculatorInput)),
            output_schema: schema_value(schemars::schema_for!(CalculatorOutput)),
        }
    }

    fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or("calculator")
    }

    async fn execute(&self, input: Value) -> Result<Value> {
        let input: CalculatorInput = serde_json::from_value(input)?;
        let value = evaluate(&input.expression)
            .map_err(|reason| Error::Execution(format!("math evaluation failed: {reason}")))?;
        if !value.is_finite() {
            return Err(Error::Execution(format!(
                "math evaluation failed: '{}' does not evaluate to a finite number",
                input.expression
            )));
        }
        let output = CalculatorOutput {
            result: format!("{:.*}", self.config.precision as usize, value),
            expression: input.expression,
        };
        Ok(serde_json::to_value(output)?)
    }
}

/// Evaluates an expression. Errors carry a human-readable reason with the
/// offending position where it helps.
fn evaluate(expression: &str) -> std::result::Result<f64, String> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, position: 0 };
    let value = parser.expr()?;
    match parser.peek() {
        None => Ok(value),
        Some(token) => Err(format!("unexpected trailing token {token:?}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Power,
    LParen,
    RParen,
    Comma,
}

fn tokenize(expression: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = expression.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            ' ' | '\t' | '\n' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' {
                        literal.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = literal
                    .parse()
                    .map_err(|_| format!("invalid number '{literal}' at position {offset}"))?;
                tokens.push(Token::Number(value));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&(_, d)) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        ident.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
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
                if chars.peek().map(|&(_, d)| d) == Some('*') {
                    chars.next();
                    tokens.push(Token::Power);
                } else {
                    tokens.push(Token::Star);
                }
            }
            '^' => {
                chars.next();
                tokens.push(Token::Power);
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
            other => return Err(format!("unexpected character '{other}' at position {offset}")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expect(&mut self, token: Token) -> std::result::Result<(), String> {
        match self.advance() {
            Some(found) if found == token => Ok(()),
            Some(found) => Err(format!("expected {token:?}, found {found:?}")),
            None => Err(format!("expected {token:?}, found end of expression")),
        }
    }

    fn expr(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(Token::Plus) => {
                    self.advance();
                    value += self.term()?;
                }
                Some(Token::Minus) => {
                    self.advance();
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> std::result::Result<f64, String> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(Token::Star) => {
                    self.advance();
                    value *= self.unary()?;
                }
                Some(Token::Slash) => {
                    self.advance();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err("division by zero".to_string());
                    }
                    value /= divisor;
                }
                Some(Token::Percent) => {
                    self.advance();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".to_string());
                    }
                    value %= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn unary(&mut self) -> std::result::Result<f64, String> {
        if self.peek() == Some(&Token::Minus) {
            self.advance();
            return Ok(-self.unary()?);
        }
        self.power()
    }

    fn power(&mut self) -> std::result::Result<f64, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Power) {
            self.advance();
            // Right-associative, and the exponent may carry its own sign.
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> std::result::Result<f64, String> {
        match self.advance() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.peek() == Some(&Token::LParen) {
                    self.advance();
                    let args = self.arguments()?;
                    apply_function(&name, &args)
                } else {
                    match name.as_str() {
                        "pi" => Ok(std::f64::consts::PI),
                        "e" => Ok(std::f64::consts::E),
                        other => Err(format!("unknown constant '{other}'")),
                    }
                }
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn arguments(&mut self) -> std::result::Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => return Ok(args),
                Some(token) => return Err(format!("expected ',' or ')', found {token:?}")),
                None => return Err("unterminated argument list".to_string()),
            }
        }
    }
}

fn apply_function(name: &str, args: &[f64]) -> std::result::Result<f64, String> {
    let one = |args: &[f64]| -> std::result::Result<f64, String> {
        match args {
            [value] => Ok(*value),
            _ => Err(format!("function '{name}' takes exactly one argument")),
        }
    };

    match name {
        "abs" => Ok(one(args)?.abs()),
        "sqrt" => {
            let value = one(args)?;
            if value < 0.0 {
                return Err("sqrt of a negative number".to_string());
            }
            Ok(value.sqrt())
        }
        "sin" => Ok(one(args)?.sin()),
        "cos" => Ok(one(args)?.cos()),
        "tan" => Ok(one(args)?.tan()),
        "exp" => Ok(one(args)?.exp()),
        "log10" => {
            let value = one(args)?;
            if value <= 0.0 {
                return Err("log10 of a non-positive number".to_string());
            }
            Ok(value.log10())
        }
        "log" => match args {
            [value] if *value > 0.0 => Ok(value.ln()),
            [value, base] if *value > 0.0 && *base > 0.0 => Ok(value.log(*base)),
            [_] | [_, _] => Err("log of a non-positive number".to_string()),
            _ => Err("function 'log' takes one or two arguments".to_string()),
        },
        "round" => match args {
            [value] => Ok(value.round()),
            [value, digits] => {
                let factor = 10f64.powi(*digits as i32);
                Ok((value * factor).round() / factor)
            }
            _ => Err("function 'round' takes one or two arguments".to_string()),
        },
        "min" => {
            if args.is_empty() {
                return Err("function 'min' needs at least one argument".to_string());
            }
            Ok(args.iter().copied().fold(f64::INFINITY, f64::min))
        }
        "max" => {
            if args.is_empty() {
                return Err("function 'max' needs at least one argument".to_string());
            }
            Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max))
        }
        other => Err(format!("unknown function '{other}'")),
    }
}
