//! Pratt parser producing the expression AST.

use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use super::{is_builtin, ExpressionError};

/// Parsed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
    /// `$name`; the empty name is the context value `$`.
    Variable(String),
    /// A bare name at the start of a path, resolved against `$`.
    Field(String),
    /// `base.name`
    Path(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    /// `$fn(args...)`
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Concat => "&",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }
}

// Binding powers, lowest first.
const BP_TERNARY: u8 = 20;
const BP_OR: u8 = 25;
const BP_AND: u8 = 30;
const BP_COMPARE: u8 = 40;
const BP_ADD: u8 = 50;
const BP_MUL: u8 = 60;
const BP_PREFIX: u8 = 70;
const BP_POSTFIX: u8 = 80;

/// Deepest expression tree the parser builds. Every operator application and
/// every bracketed sub-expression counts one level.
pub const MAX_NESTING: usize = 128;

/// Parse `src` into an expression.
pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(src)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: src.len(),
        depth: 0,
    };
    let expr = parser.expression(0)?;
    if let Some(extra) = parser.peek() {
        return Err(ExpressionError::Syntax {
            offset: extra.offset,
            message: format!("unexpected {}", describe(&extra.token)),
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.end, |s| s.offset)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExpressionError> {
        match self.peek_token() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!(
                "expected {}, found {}",
                describe(&expected),
                describe(t)
            ))),
            None => Err(self.error(format!(
                "expected {}, found end of expression",
                describe(&expected)
            ))),
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let saved = self.depth;
        let expr = self.nest().and_then(|()| self.climb(min_bp));
        self.depth = saved;
        expr
    }

    fn nest(&mut self) -> Result<(), ExpressionError> {
        if self.depth >= MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    fn climb(&mut self, min_bp: u8) -> Result<Expr, ExpressionError> {
        let mut lhs = self.prefix()?;

        loop {
            let Some(token) = self.peek_token().cloned() else {
                break;
            };

            match token {
                Token::Dot => {
                    if BP_POSTFIX < min_bp {
                        break;
                    }
                    self.nest()?;
                    self.pos += 1;
                    let name = match self.advance().map(|s| s.token) {
                        Some(Token::Name(name)) => name,
                        Some(Token::Str(name)) => name,
                        other => {
                            return Err(self.error(format!(
                                "expected field name after '.', found {}",
                                other.as_ref().map_or("end of expression".to_string(), describe)
                            )));
                        }
                    };
                    lhs = Expr::Path(Box::new(lhs), name);
                }
                Token::LBracket => {
                    if BP_POSTFIX < min_bp {
                        break;
                    }
                    self.nest()?;
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(Token::RBracket)?;
                    lhs = Expr::Index(Box::new(lhs), Box::new(index));
                }
                Token::Question => {
                    if BP_TERNARY < min_bp {
                        break;
                    }
                    self.nest()?;
                    self.pos += 1;
                    let then = self.expression(0)?;
                    let otherwise = if self.peek_token() == Some(&Token::Colon) {
                        self.pos += 1;
                        Some(Box::new(self.expression(BP_TERNARY)?))
                    } else {
                        None
                    };
                    lhs = Expr::Conditional {
                        condition: Box::new(lhs),
                        then: Box::new(then),
                        otherwise,
                    };
                }
                other => {
                    let Some((op, bp)) = infix(&other) else {
                        break;
                    };
                    if bp < min_bp {
                        break;
                    }
                    self.nest()?;
                    self.pos += 1;
                    let rhs = self.expression(bp + 1)?;
                    lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
                }
            }
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, ExpressionError> {
        let offset = self.offset();
        let Some(spanned) = self.advance() else {
            return Err(self.error("unexpected end of expression"));
        };

        match spanned.token {
            Token::Number(n) => Ok(Expr::Literal(number_literal(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Name(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Field(name),
            }),
            Token::Var(name) => {
                if self.peek_token() == Some(&Token::LParen) {
                    if !is_builtin(&name) {
                        return Err(ExpressionError::Syntax {
                            offset,
                            message: format!("unknown function '${name}'"),
                        });
                    }
                    self.pos += 1;
                    let args = self.sequence(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Token::Minus => {
                let operand = self.expression(BP_PREFIX)?;
                Ok(match operand {
                    Expr::Literal(Value::Number(n)) => {
                        Expr::Literal(number_literal(-n.as_f64().unwrap_or_default()))
                    }
                    other => Expr::Negate(Box::new(other)),
                })
            }
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.sequence(Token::RBracket)?)),
            Token::LBrace => self.object(),
            other => Err(ExpressionError::Syntax {
                offset,
                message: format!("unexpected {}", describe(&other)),
            }),
        }
    }

    /// Comma-separated expressions up to `close`; the opener is consumed.
    fn sequence(&mut self, close: Token) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.peek_token() == Some(&close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            match self.peek_token() {
                Some(Token::Comma) => self.pos += 1,
                Some(t) if *t == close => {
                    self.pos += 1;
                    return Ok(items);
                }
                _ => {
                    return Err(self.error(format!("expected ',' or {}", describe(&close))));
                }
            }
        }
    }

    fn object(&mut self) -> Result<Expr, ExpressionError> {
        let mut fields = Vec::new();
        if self.peek_token() == Some(&Token::RBrace) {
            self.pos += 1;
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.advance().map(|s| s.token) {
                Some(Token::Str(key)) | Some(Token::Name(key)) => key,
                _ => return Err(self.error("object keys must be string literals")),
            };
            self.expect(Token::Colon)?;
            let value = self.expression(0)?;
            fields.push((key, value));
            match self.peek_token() {
                Some(Token::Comma) => self.pos += 1,
                Some(Token::RBrace) => {
                    self.pos += 1;
                    return Ok(Expr::Object(fields));
                }
                _ => return Err(self.error("expected ',' or '}' in object constructor")),
            }
        }
    }
}

fn infix(token: &Token) -> Option<(BinaryOp, u8)> {
    Some(match token {
        Token::Amp => (BinaryOp::Concat, BP_ADD),
        Token::Plus => (BinaryOp::Add, BP_ADD),
        Token::Minus => (BinaryOp::Sub, BP_ADD),
        Token::Star => (BinaryOp::Mul, BP_MUL),
        Token::Slash => (BinaryOp::Div, BP_MUL),
        Token::Percent => (BinaryOp::Mod, BP_MUL),
        Token::Eq => (BinaryOp::Eq, BP_COMPARE),
        Token::Ne => (BinaryOp::Ne, BP_COMPARE),
        Token::Lt => (BinaryOp::Lt, BP_COMPARE),
        Token::Le => (BinaryOp::Le, BP_COMPARE),
        Token::Gt => (BinaryOp::Gt, BP_COMPARE),
        Token::Ge => (BinaryOp::Ge, BP_COMPARE),
        Token::Name(name) if name == "and" => (BinaryOp::And, BP_AND),
        Token::Name(name) if name == "or" => (BinaryOp::Or, BP_OR),
        _ => return None,
    })
}

pub(crate) fn number_literal(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(n) => format!("number {n}"),
        Token::Str(s) => format!("string '{s}'"),
        Token::Name(n) => format!("name '{n}'"),
        Token::Var(v) => format!("'${v}'"),
        Token::Dot => "'.'".into(),
        Token::Comma => "','".into(),
        Token::Colon => "':'".into(),
        Token::Question => "'?'".into(),
        Token::LParen => "'('".into(),
        Token::RParen => "')'".into(),
        Token::LBracket => "'['".into(),
        Token::RBracket => "']'".into(),
        Token::LBrace => "'{'".into(),
        Token::RBrace => "'}'".into(),
        Token::Amp => "'&'".into(),
        Token::Plus => "'+'".into(),
        Token::Minus => "'-'".into(),
        Token::Star => "'*'".into(),
        Token::Slash => "'/'".into(),
        Token::Percent => "'%'".into(),
        Token::Eq => "'='".into(),
        Token::Ne => "'!='".into(),
        Token::Lt => "'<'".into(),
        Token::Le => "'<='".into(),
        Token::Gt => "'>'".into(),
        Token::Ge => "'>='".into(),
    }
}
