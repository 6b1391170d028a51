//! Recursive-descent parser for the condition expression language.
//!
//! Precedence, loosest to tightest: `||`, `&&`, equality, relational,
//! additive, multiplicative, unary, primary. Nesting depth is capped so a
//! hostile expression cannot blow the stack.

use super::token::{tokenize, Token};
use super::ExpressionError;

/// Maximum nesting depth the parser will follow.
const MAX_DEPTH: usize = 64;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    /// A name outside the `vars.` root. Always evaluates to undefined.
    Undefined,
    /// The whole variable scope (`vars` with no path).
    Scope,
    /// A dotted path under `vars.`, e.g. `vars.user.name`.
    Var(Vec<String>),
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Add,
    Sub,
    Mul,
    Div,
}

/// Parse an expression string into a tree.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.or_expr(0)?;
    if let Some(extra) = parser.peek() {
        return Err(ExpressionError::UnexpectedToken(format!("{extra:?}")));
    }
    Ok(expr)
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

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.and_expr(depth + 1)?;
        while self.eat(&Token::OrOr) {
            let rhs = self.and_expr(depth + 1)?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.equality_expr(depth + 1)?;
        while self.eat(&Token::AndAnd) {
            let rhs = self.equality_expr(depth + 1)?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.relational_expr(depth + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::Eq,
                Some(Token::NotEq) => BinaryOp::Ne,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.relational_expr(depth + 1)?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relational_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.additive_expr(depth + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.additive_expr(depth + 1)?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn additive_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.multiplicative_expr(depth + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.multiplicative_expr(depth + 1)?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn multiplicative_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        let mut lhs = self.unary_expr(depth + 1)?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary_expr(depth + 1)?;
            lhs = binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn unary_expr(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        match self.peek() {
            Some(Token::Bang) => {
                self.pos += 1;
                let operand = self.unary_expr(depth + 1)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.unary_expr(depth + 1)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(operand),
                })
            }
            _ => self.primary(depth + 1),
        }
    }

    fn primary(&mut self, depth: usize) -> Result<Expr, ExpressionError> {
        check_depth(depth)?;
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Str(s)) => Ok(Expr::Str(s)),
            Some(Token::LParen) => {
                let inner = self.or_expr(depth + 1)?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(ExpressionError::UnexpectedEnd)
                }
            }
            Some(Token::Ident(name)) => self.ident_path(name),
            Some(other) => Err(ExpressionError::UnexpectedToken(format!("{other:?}"))),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }

    /// Consume a dotted path rooted at `name`. Only the `vars` root is a
    /// real lookup; `true`/`false` are keywords, and any other root parses
    /// to an always-undefined node so stray names cannot reach the host.
    fn ident_path(&mut self, name: String) -> Result<Expr, ExpressionError> {
        let mut path = Vec::new();
        while self.eat(&Token::Dot) {
            match self.advance() {
                Some(Token::Ident(segment)) => path.push(segment),
                Some(other) => {
                    return Err(ExpressionError::UnexpectedToken(format!("{other:?}")))
                }
                None => return Err(ExpressionError::UnexpectedEnd),
            }
        }
        match name.as_str() {
            "true" if path.is_empty() => Ok(Expr::Bool(true)),
            "false" if path.is_empty() => Ok(Expr::Bool(false)),
            "vars" if path.is_empty() => Ok(Expr::Scope),
            "vars" => Ok(Expr::Var(path)),
            _ => Ok(Expr::Undefined),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn check_depth(depth: usize) -> Result<(), ExpressionError> {
    if depth > MAX_DEPTH {
        Err(ExpressionError::TooDeep)
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
