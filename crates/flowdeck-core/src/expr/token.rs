//! Tokenizer for the condition expression language.
//!
//! Produces a flat token stream; all errors are positioned so the
//! fail-closed wrapper can log something useful before resolving to false.

use super::ExpressionError;

/// One lexical token.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    OrOr,
    AndAnd,
    EqEq,
    NotEq,
    Gt,
    Ge,
    Lt,
    Le,
    Plus,
    Minus,
    Star,
    Slash,
    Bang,
    Dot,
    LParen,
    RParen,
}

/// Tokenize an expression string.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                pos += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                pos += 1;
            }
            '|' => {
                if chars.get(pos + 1) == Some(&'|') {
                    tokens.push(Token::OrOr);
                    pos += 2;
                } else {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos });
                }
            }
            '&' => {
                if chars.get(pos + 1) == Some(&'&') {
                    tokens.push(Token::AndAnd);
                    pos += 2;
                } else {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos });
                }
            }
            '=' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    pos += 2;
                } else {
                    return Err(ExpressionError::UnexpectedChar { ch: c, pos });
                }
            }
            '!' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    pos += 2;
                } else {
                    tokens.push(Token::Bang);
                    pos += 1;
                }
            }
            '>' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    pos += 2;
                } else {
                    tokens.push(Token::Gt);
                    pos += 1;
                }
            }
            '<' => {
                if chars.get(pos + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    pos += 2;
                } else {
                    tokens.push(Token::Lt);
                    pos += 1;
                }
            }
            '\'' | '"' => {
                let (s, next) = read_string(&chars, pos, c)?;
                tokens.push(Token::Str(s));
                pos = next;
            }
            _ if c.is_ascii_digit() => {
                let (n, next) = read_number(&chars, pos)?;
                tokens.push(Token::Number(n));
                pos = next;
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len()
                    && (chars[pos].is_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            _ => return Err(ExpressionError::UnexpectedChar { ch: c, pos }),
        }
    }

    Ok(tokens)
}

/// Read a quoted string with backslash escapes, returning the content and
/// the position past the closing quote.
fn read_string(
    chars: &[char],
    start: usize,
    quote: char,
) -> Result<(String, usize), ExpressionError> {
    let mut out = String::new();
    let mut pos = start + 1;
    while pos < chars.len() {
        match chars[pos] {
            '\\' => {
                let escaped = chars
                    .get(pos + 1)
                    .ok_or(ExpressionError::UnterminatedString)?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => *other,
                });
                pos += 2;
            }
            c if c == quote => return Ok((out, pos + 1)),
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }
    Err(ExpressionError::UnterminatedString)
}

/// Read a numeric literal (digits with an optional fractional part).
fn read_number(chars: &[char], start: usize) -> Result<(f64, usize), ExpressionError> {
    let mut pos = start;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos < chars.len() && chars[pos] == '.' && chars.get(pos + 1).is_some_and(|c| c.is_ascii_digit())
    {
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }
    let text: String = chars[start..pos].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ExpressionError::InvalidNumber(text))?;
    Ok((value, pos))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
