//! Tokenizer and recursive-descent parser for calculation formulas.
//!
//! Grammar:
//! ```text
//! expression := term (('+' | '-') term)*
//! term       := factor (('*' | '/') factor)*
//! factor     := ('-' | '+') factor | number | identifier | '(' expression ')'
//! ```

use thiserror::Error;

use super::ast::{BinaryOp, Expr};

/// Maximum nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

/// Formula parse error with the byte position where it was detected.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} at position {position}")]
pub struct FormulaError {
    /// Byte offset into the formula source
    pub position: usize,
    /// Human-readable description
    pub message: String,
}

impl FormulaError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Number(value) => write!(f, "number {}", value),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Op(op) => write!(f, "operator '{}'", op.symbol()),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, FormulaError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(start, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' => {
                let op = match ch {
                    '+' => BinaryOp::Add,
                    '-' => BinaryOp::Sub,
                    '*' => BinaryOp::Mul,
                    _ => BinaryOp::Div,
                };
                tokens.push((start, Token::Op(op)));
                chars.next();
            }
            '(' => {
                tokens.push((start, Token::LParen));
                chars.next();
            }
            ')' => {
                tokens.push((start, Token::RParen));
                chars.next();
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut end = start;
                let mut seen_dot = false;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        end = idx + 1;
                    } else if c == '.' && !seen_dot {
                        seen_dot = true;
                        end = idx + 1;
                    } else {
                        break;
                    }
                    chars.next();
                }
                let literal = &source[start..end];
                let value = literal.parse::<f64>().map_err(|_| {
                    FormulaError::new(start, format!("invalid number '{}'", literal))
                })?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut end = start;
                while let Some(&(idx, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        end = idx + 1;
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push((start, Token::Ident(source[start..end].to_string())));
            }
            other => {
                return Err(FormulaError::new(
                    start,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self, position: usize) -> Result<(), FormulaError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(FormulaError::new(position, "formula nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        while let Some((_, Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub)))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        while let Some((_, Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div)))) = self.peek() {
            let op = *op;
            self.pos += 1;
            let rhs = self.factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        let (position, token) = self
            .next()
            .ok_or_else(|| FormulaError::new(self.end, "unexpected end of formula"))?;

        match token {
            Token::Number(value) => Ok(Expr::Literal(value)),
            Token::Ident(name) => Ok(Expr::Variable(name)),
            Token::Op(BinaryOp::Sub) => {
                self.descend(position)?;
                let inner = self.factor()?;
                self.depth -= 1;
                Ok(Expr::Negate(Box::new(inner)))
            }
            Token::Op(BinaryOp::Add) => {
                self.descend(position)?;
                let inner = self.factor()?;
                self.depth -= 1;
                Ok(inner)
            }
            Token::LParen => {
                self.descend(position)?;
                let inner = self.expression()?;
                self.depth -= 1;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((pos, other)) => Err(FormulaError::new(
                        pos,
                        format!("expected ')' but found {}", other),
                    )),
                    None => Err(FormulaError::new(
                        self.end,
                        format!("unclosed '(' opened at position {}", position),
                    )),
                }
            }
            other => Err(FormulaError::new(
                position,
                format!("unexpected {}", other),
            )),
        }
    }
}

/// Parses a calculation formula into its syntax tree.
///
/// # Arguments
/// * `source` - Formula text, e.g. `num_bundles * unit_price`
///
/// # Returns
/// `Result<Expr, FormulaError>` containing the parsed formula.
pub fn parse(source: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(FormulaError::new(0, "formula is empty"));
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        end: source.len(),
    };
    let expr = parser.expression()?;

    if let Some((position, token)) = parser.peek() {
        return Err(FormulaError::new(
            *position,
            format!("unexpected {} after end of expression", token),
        ));
    }

    Ok(expr)
}
