//! Tokenizer and recursive-descent parser for `lhs = rhs` equations.
//!
//! Precedence, highest first: parentheses, `^` (right-associative, `**` accepted),
//! unary negation, `*` `/`, `+` `-`. Positions in errors are byte offsets into the
//! full equation text.

use crate::equation::Equation;
use crate::error::ParseError;
use crate::expression::{BinaryOp, Expr};

/// Parses a full equation `"<identifier> = <expression>"`.
pub fn parse_equation(input: &str) -> Result<Equation, ParseError> {
    let (lhs, rhs) = input.split_once('=').ok_or(ParseError::MissingEquals)?;
    let name = lhs.trim();
    if !is_identifier(name) {
        return Err(ParseError::InvalidLhs {
            lhs: name.to_string(),
        });
    }
    let rhs_offset = lhs.len() + 1;
    let tree = parse_at(rhs, rhs_offset)?;
    Ok(Equation::new(name, tree))
}

/// Parses a bare right-hand-side expression.
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    parse_at(input, 0)
}

/// Letters, digits and underscores, not starting with a digit.
pub fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Deepest chain of parentheses, negations and exponents accepted. Every later stage
/// walks trees recursively, so anything deeper is rejected here.
pub const MAX_NESTING: usize = 256;

fn parse_at(input: &str, offset: usize) -> Result<Expr, ParseError> {
    let tokens = tokenize(input, offset)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        nesting: 0,
        end: offset + input.len(),
    };
    let expr = parser.parse_sum()?;
    match parser.consume() {
        None => Ok(expr),
        Some(token) if token.kind == TokenKind::RParen => Err(ParseError::UnbalancedParens {
            position: token.position,
        }),
        Some(token) => Err(token.unexpected()),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    /// A `-` in operand position (start of input, after an operator or `(`).
    Negate,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

impl TokenKind {
    fn is_operand_end(&self) -> bool {
        matches!(
            self,
            TokenKind::Number(_) | TokenKind::Identifier(_) | TokenKind::RParen
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

impl Token {
    fn unexpected(&self) -> ParseError {
        ParseError::UnexpectedToken {
            token: self.text.clone(),
            position: self.position,
        }
    }
}

fn tokenize(input: &str, offset: usize) -> Result<Vec<Token>, ParseError> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c.is_ascii_digit() || c == '.' {
            let mut end = start;
            while let Some(&(i, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    end = i + d.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            // Optional exponent, only consumed when digits follow.
            if let Some(&(_, e)) = chars.peek() {
                if e == 'e' || e == 'E' {
                    let rest = &input[end + 1..];
                    let sign_len = usize::from(rest.starts_with(['+', '-']));
                    let digits = rest[sign_len..]
                        .chars()
                        .take_while(|d| d.is_ascii_digit())
                        .count();
                    if digits > 0 {
                        for _ in 0..1 + sign_len + digits {
                            chars.next();
                        }
                        end += 1 + sign_len + digits;
                    }
                }
            }
            let text = &input[start..end];
            let value: f64 = text.parse().map_err(|_| ParseError::UnexpectedToken {
                token: text.to_string(),
                position: offset + start,
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                text: text.to_string(),
                position: offset + start,
            });
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
            tokens.push(Token {
                kind: TokenKind::Identifier(ident.clone()),
                text: ident,
                position: offset + start,
            });
            continue;
        }

        chars.next();
        let (kind, text) = match c {
            '+' => (TokenKind::Plus, "+"),
            '-' => {
                let after_operand = tokens.last().is_some_and(|t| t.kind.is_operand_end());
                if after_operand {
                    (TokenKind::Minus, "-")
                } else {
                    (TokenKind::Negate, "-")
                }
            }
            '*' => {
                if chars.peek().is_some_and(|&(_, d)| d == '*') {
                    chars.next();
                    (TokenKind::Caret, "**")
                } else {
                    (TokenKind::Star, "*")
                }
            }
            '/' => (TokenKind::Slash, "/"),
            '^' => (TokenKind::Caret, "^"),
            '(' => (TokenKind::LParen, "("),
            ')' => (TokenKind::RParen, ")"),
            other => {
                return Err(ParseError::UnexpectedToken {
                    token: other.to_string(),
                    position: offset + start,
                })
            }
        };
        tokens.push(Token {
            kind,
            text: text.to_string(),
            position: offset + start,
        });
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    /// Open parentheses.
    depth: usize,
    /// Recursion depth through `(`, unary `-` and `^`.
    nesting: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Runs `parse` one nesting level deeper, failing at `opener` past `MAX_NESTING`.
    fn nested<T>(
        &mut self,
        opener: &Token,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.nesting >= MAX_NESTING {
            return Err(opener.unexpected());
        }
        self.nesting += 1;
        let result = parse(self);
        self.nesting -= 1;
        result
    }

    fn end_of_input(&self) -> ParseError {
        ParseError::UnexpectedToken {
            token: "end of input".to_string(),
            position: self.end,
        }
    }

    fn parse_sum(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Plus) => BinaryOp::Add,
                Some(TokenKind::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(TokenKind::Star) => BinaryOp::Mul,
                Some(TokenKind::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(TokenKind::Negate) = self.peek() {
            let Some(minus) = self.consume() else {
                return Err(self.end_of_input());
            };
            let operand = self.nested(&minus, Self::parse_unary)?;
            return Ok(match operand {
                Expr::Literal(value) => Expr::Literal(-value),
                other => Expr::neg(other),
            });
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;
        if let Some(TokenKind::Caret) = self.peek() {
            let Some(caret) = self.consume() else {
                return Err(self.end_of_input());
            };
            // Recursing through unary keeps `^` right-associative and allows `2^-x`.
            let exponent = self.nested(&caret, Self::parse_unary)?;
            return Ok(Expr::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let token = self.consume().ok_or_else(|| self.end_of_input())?;
        match &token.kind {
            TokenKind::Number(value) => Ok(Expr::Literal(*value)),
            TokenKind::Identifier(name) => Ok(Expr::Variable(name.clone())),
            TokenKind::LParen => {
                self.depth += 1;
                let inner = self.nested(&token, Self::parse_sum)?;
                match self.consume() {
                    Some(close) if close.kind == TokenKind::RParen => {
                        self.depth -= 1;
                        Ok(inner)
                    }
                    Some(other) => Err(other.unexpected()),
                    None => Err(ParseError::UnbalancedParens {
                        position: token.position,
                    }),
                }
            }
            TokenKind::RParen if self.depth == 0 => Err(ParseError::UnbalancedParens {
                position: token.position,
            }),
            _ => Err(token.unexpected()),
        }
    }
}
