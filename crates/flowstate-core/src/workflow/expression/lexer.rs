//! Tokenizer for the expression language.

use super::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    /// Bare or backtick-quoted name. Keywords (`and`, `or`, `true`, ...)
    /// are resolved by the parser depending on position.
    Name(String),
    /// `$name`; the bare `$` is `Var("")`.
    Var(String),
    Dot,
    Comma,
    Colon,
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Amp,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A token with the byte offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Spanned>, ExpressionError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let simple = match c {
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '?' => Some(Token::Question),
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '&' => Some(Token::Amp),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '=' => Some(Token::Eq),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        match c {
            '!' if next == Some('=') => {
                tokens.push(Spanned { token: Token::Ne, offset });
                i += 2;
            }
            '<' | '>' => {
                let token = match (c, next == Some('=')) {
                    ('<', true) => Token::Le,
                    ('<', false) => Token::Lt,
                    (_, true) => Token::Ge,
                    (_, false) => Token::Gt,
                };
                i += if next == Some('=') { 2 } else { 1 };
                tokens.push(Spanned { token, offset });
            }
            '\'' | '"' => {
                let (value, consumed) = read_string(&chars[i..], c, offset)?;
                tokens.push(Spanned {
                    token: Token::Str(value),
                    offset,
                });
                i += consumed;
            }
            '`' => {
                let (value, consumed) = read_string(&chars[i..], '`', offset)?;
                tokens.push(Spanned {
                    token: Token::Name(value),
                    offset,
                });
                i += consumed;
            }
            '$' => {
                let mut j = i + 1;
                while j < chars.len() && is_name_char(chars[j].1) {
                    j += 1;
                }
                let name: String = chars[i + 1..j].iter().map(|(_, c)| *c).collect();
                tokens.push(Spanned {
                    token: Token::Var(name),
                    offset,
                });
                i = j;
            }
            c if c.is_ascii_digit() => {
                let mut j = i;
                while j < chars.len() && chars[j].1.is_ascii_digit() {
                    j += 1;
                }
                // Fractional part only when a digit follows the dot, so that
                // `items[0].name` style paths are not swallowed.
                if j + 1 < chars.len() && chars[j].1 == '.' && chars[j + 1].1.is_ascii_digit() {
                    j += 1;
                    while j < chars.len() && chars[j].1.is_ascii_digit() {
                        j += 1;
                    }
                }
                if j < chars.len() && matches!(chars[j].1, 'e' | 'E') {
                    let mut k = j + 1;
                    if k < chars.len() && matches!(chars[k].1, '+' | '-') {
                        k += 1;
                    }
                    if k < chars.len() && chars[k].1.is_ascii_digit() {
                        j = k;
                        while j < chars.len() && chars[j].1.is_ascii_digit() {
                            j += 1;
                        }
                    }
                }
                let text: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                let value = text.parse::<f64>().map_err(|_| ExpressionError::Syntax {
                    offset,
                    message: format!("invalid number literal '{text}'"),
                })?;
                tokens.push(Spanned {
                    token: Token::Number(value),
                    offset,
                });
                i = j;
            }
            c if is_name_start(c) => {
                let mut j = i;
                while j < chars.len() && is_name_char(chars[j].1) {
                    j += 1;
                }
                let name: String = chars[i..j].iter().map(|(_, c)| *c).collect();
                tokens.push(Spanned {
                    token: Token::Name(name),
                    offset,
                });
                i = j;
            }
            other => {
                return Err(ExpressionError::Syntax {
                    offset,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Read a quoted literal starting at `chars[0]` (the opening quote).
/// Returns the unescaped value and the number of chars consumed.
fn read_string(
    chars: &[(usize, char)],
    quote: char,
    offset: usize,
) -> Result<(String, usize), ExpressionError> {
    let mut value = String::new();
    let mut i = 1;
    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\\' && quote != '`' {
            let escaped = chars.get(i + 1).map(|(_, c)| *c).ok_or_else(|| {
                ExpressionError::Syntax {
                    offset,
                    message: "unterminated escape sequence".to_string(),
                }
            })?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                other => other,
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }
    Err(ExpressionError::Syntax {
        offset,
        message: "unterminated string literal".to_string(),
    })
}
