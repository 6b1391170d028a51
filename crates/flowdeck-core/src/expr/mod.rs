//! Restricted expression language for branch and loop conditions.
//!
//! Flow authors write small JavaScript-flavored expressions over run
//! variables: `vars.count < 10 && vars.status == 'ready'`. The language
//! is deliberately closed: no function calls, no indexing, no assignment,
//! and the only name that resolves to anything is the `vars.` root. Any
//! other identifier is undefined by construction, so expressions cannot
//! observe or touch the host.
//!
//! Conditions are fail-closed: a malformed expression never aborts a run,
//! it evaluates to `false` and logs why.

mod eval;
mod parser;
mod token;

use std::collections::HashMap;

use serde_json::Value;

pub use eval::{truthy, ExprValue};
pub use parser::{parse, Expr};

/// Why an expression failed to parse.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("expression nested too deeply")]
    TooDeep,
    #[error("empty expression")]
    Empty,
}

/// Evaluate an expression to a JSON value. Undefined results collapse to
/// null at this boundary. Parse failures are returned to the caller.
pub fn evaluate(
    input: &str,
    scope: &HashMap<String, Value>,
) -> Result<Value, ExpressionError> {
    let expr = parser::parse(input)?;
    Ok(eval::eval(&expr, scope).into_json())
}

/// Evaluate an expression as a boolean condition. Fail-closed: parse
/// errors log at debug level and resolve to `false`, never a panic or an
/// aborted run.
pub fn evaluate_condition(input: &str, scope: &HashMap<String, Value>) -> bool {
    match parser::parse(input) {
        Ok(expr) => eval::truthy(&eval::eval(&expr, scope)),
        Err(err) => {
            tracing::debug!(expression = input, error = %err, "condition failed to parse, treating as false");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scope(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn evaluate_produces_json() {
        let scope = scope(&[("x", json!(5))]);
        assert_eq!(evaluate("vars.x + 1", &scope).unwrap(), json!(6.0));
        assert_eq!(evaluate("vars.x > 3", &scope).unwrap(), json!(true));
    }

    #[test]
    fn evaluate_maps_undefined_to_null() {
        let scope = HashMap::new();
        assert_eq!(evaluate("vars.nope", &scope).unwrap(), Value::Null);
    }

    #[test]
    fn evaluate_surfaces_parse_errors() {
        assert!(evaluate("1 +", &HashMap::new()).is_err());
    }

    #[test]
    fn condition_is_fail_closed_on_garbage() {
        let scope = scope(&[("x", json!(5))]);
        assert!(!evaluate_condition("", &scope));
        assert!(!evaluate_condition("(((", &scope));
        assert!(!evaluate_condition("vars.x >", &scope));
        assert!(!evaluate_condition("vars.x === 5", &scope));
        assert!(!evaluate_condition("@#$%", &scope));
    }

    #[test]
    fn condition_true_and_false() {
        let scope = scope(&[("x", json!(5)), ("name", json!("ada"))]);
        assert!(evaluate_condition("vars.x == 5", &scope));
        assert!(evaluate_condition("vars.x > 4 && vars.name == 'ada'", &scope));
        assert!(!evaluate_condition("vars.x > 4 && vars.name == 'bob'", &scope));
        assert!(!evaluate_condition("vars.missing", &scope));
    }

    #[test]
    fn host_names_never_resolve() {
        let scope = scope(&[("x", json!(1))]);
        assert!(!evaluate_condition("window", &scope));
        assert!(!evaluate_condition("process.env", &scope));
        assert!(evaluate_condition("document || vars.x", &scope));
    }
}
