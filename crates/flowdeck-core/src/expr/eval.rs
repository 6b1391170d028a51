//! Evaluator for parsed expressions.
//!
//! Evaluation is total: every expression tree produces a value, with
//! JavaScript-like truthiness and coercions. A variable that is not in
//! scope evaluates to a distinct undefined value rather than an error.

use std::collections::HashMap;

use serde_json::{Number, Value};

use super::parser::{BinaryOp, Expr, UnaryOp};

/// Runtime value. `Undefined` is distinct from JSON null: a missing
/// variable is undefined, an explicit null is not.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Undefined,
    Json(Value),
}

impl ExprValue {
    fn number(n: f64) -> Self {
        match Number::from_f64(n) {
            Some(num) => ExprValue::Json(Value::Number(num)),
            // NaN and infinities have no JSON form.
            None => ExprValue::Undefined,
        }
    }

    fn bool(b: bool) -> Self {
        ExprValue::Json(Value::Bool(b))
    }

    /// Collapse to plain JSON, mapping undefined to null at the boundary.
    pub fn into_json(self) -> Value {
        match self {
            ExprValue::Undefined => Value::Null,
            ExprValue::Json(v) => v,
        }
    }
}

/// Evaluate a parsed expression against the run's variable scope.
pub fn eval(expr: &Expr, scope: &HashMap<String, Value>) -> ExprValue {
    match expr {
        Expr::Number(n) => ExprValue::number(*n),
        Expr::Str(s) => ExprValue::Json(Value::String(s.clone())),
        Expr::Bool(b) => ExprValue::bool(*b),
        Expr::Undefined => ExprValue::Undefined,
        Expr::Scope => {
            let map = scope
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            ExprValue::Json(Value::Object(map))
        }
        Expr::Var(path) => lookup(path, scope),
        Expr::Unary { op, operand } => {
            let value = eval(operand, scope);
            match op {
                UnaryOp::Not => ExprValue::bool(!truthy(&value)),
                UnaryOp::Neg => ExprValue::number(-to_number(&value)),
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, scope),
    }
}

/// Whether a value counts as true in a condition. Follows JavaScript:
/// false, 0, "", null, and undefined are falsy; arrays and objects
/// (even empty ones) are truthy.
pub fn truthy(value: &ExprValue) -> bool {
    match value {
        ExprValue::Undefined => false,
        ExprValue::Json(Value::Null) => false,
        ExprValue::Json(Value::Bool(b)) => *b,
        ExprValue::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        ExprValue::Json(Value::String(s)) => !s.is_empty(),
        ExprValue::Json(Value::Array(_)) | ExprValue::Json(Value::Object(_)) => true,
    }
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    scope: &HashMap<String, Value>,
) -> ExprValue {
    // Short-circuit forms return an operand, not a coerced boolean.
    match op {
        BinaryOp::Or => {
            let left = eval(lhs, scope);
            return if truthy(&left) { left } else { eval(rhs, scope) };
        }
        BinaryOp::And => {
            let left = eval(lhs, scope);
            return if truthy(&left) { eval(rhs, scope) } else { left };
        }
        _ => {}
    }

    let left = eval(lhs, scope);
    let right = eval(rhs, scope);
    match op {
        BinaryOp::Eq => ExprValue::bool(loose_eq(&left, &right)),
        BinaryOp::Ne => ExprValue::bool(!loose_eq(&left, &right)),
        BinaryOp::Gt => compare(&left, &right, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Ge => compare(&left, &right, |o| o != std::cmp::Ordering::Less),
        BinaryOp::Lt => compare(&left, &right, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Le => compare(&left, &right, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Add => ExprValue::number(to_number(&left) + to_number(&right)),
        BinaryOp::Sub => ExprValue::number(to_number(&left) - to_number(&right)),
        BinaryOp::Mul => ExprValue::number(to_number(&left) * to_number(&right)),
        BinaryOp::Div => ExprValue::number(to_number(&left) / to_number(&right)),
        BinaryOp::Or | BinaryOp::And => unreachable!("handled above"),
    }
}

/// Loose equality: same-type scalars compare directly, everything else is
/// stringified first. Two undefineds are equal; undefined equals nothing
/// else except null.
fn loose_eq(left: &ExprValue, right: &ExprValue) -> bool {
    use ExprValue::{Json, Undefined};
    match (left, right) {
        (Undefined, Undefined) => true,
        (Undefined, Json(Value::Null)) | (Json(Value::Null), Undefined) => true,
        (Undefined, _) | (_, Undefined) => false,
        (Json(Value::Number(a)), Json(Value::Number(b))) => {
            a.as_f64() == b.as_f64()
        }
        (Json(Value::String(a)), Json(Value::String(b))) => a == b,
        (Json(Value::Bool(a)), Json(Value::Bool(b))) => a == b,
        (Json(a), Json(b)) => stringify(a) == stringify(b),
    }
}

fn compare(
    left: &ExprValue,
    right: &ExprValue,
    pick: impl Fn(std::cmp::Ordering) -> bool,
) -> ExprValue {
    use ExprValue::Json;
    let ordering = match (left, right) {
        (Json(Value::Number(a)), Json(Value::Number(b))) => {
            match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y),
                _ => None,
            }
        }
        (Json(Value::String(a)), Json(Value::String(b))) => Some(a.cmp(b)),
        (Json(Value::Bool(a)), Json(Value::Bool(b))) => Some(a.cmp(b)),
        _ => {
            let a = coerce_string(left);
            let b = coerce_string(right);
            Some(a.cmp(&b))
        }
    };
    match ordering {
        Some(o) => ExprValue::bool(pick(o)),
        None => ExprValue::bool(false),
    }
}

/// Numeric coercion for arithmetic: numbers pass through, everything else
/// becomes zero.
fn to_number(value: &ExprValue) -> f64 {
    match value {
        ExprValue::Json(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn coerce_string(value: &ExprValue) -> String {
    match value {
        ExprValue::Undefined => "undefined".to_string(),
        ExprValue::Json(v) => stringify(v),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Resolve a dotted path under the `vars.` root. Any step through a
/// missing key, an array, or a scalar yields undefined.
fn lookup(path: &[String], scope: &HashMap<String, Value>) -> ExprValue {
    let (first, rest) = match path.split_first() {
        Some(parts) => parts,
        None => return ExprValue::Undefined,
    };
    let mut current = match scope.get(first) {
        Some(value) => value,
        None => return ExprValue::Undefined,
    };
    for segment in rest {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(value) => current = value,
                None => return ExprValue::Undefined,
            },
            _ => return ExprValue::Undefined,
        }
    }
    ExprValue::Json(current.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parser::parse;
    use serde_json::json;

    fn eval_str(input: &str, scope: &HashMap<String, Value>) -> ExprValue {
        eval(&parse(input).unwrap(), scope)
    }

    fn scope(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn resolves_nested_paths() {
        let scope = scope(&[("user", json!({"name": "ada", "age": 36}))]);
        assert_eq!(
            eval_str("vars.user.name", &scope),
            ExprValue::Json(json!("ada"))
        );
        assert_eq!(eval_str("vars.user.age", &scope), ExprValue::Json(json!(36)));
    }

    #[test]
    fn missing_variable_is_undefined() {
        let scope = HashMap::new();
        assert_eq!(eval_str("vars.missing", &scope), ExprValue::Undefined);
        assert_eq!(eval_str("vars.a.b.c", &scope), ExprValue::Undefined);
    }

    #[test]
    fn undefined_is_distinct_from_null() {
        let scope = scope(&[("x", Value::Null)]);
        assert_eq!(eval_str("vars.x", &scope), ExprValue::Json(Value::Null));
        assert_eq!(eval_str("vars.y", &scope), ExprValue::Undefined);
        // Loose equality still treats them as equal, like JavaScript ==.
        assert_eq!(
            eval_str("vars.x == vars.y", &scope),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn path_through_scalar_is_undefined() {
        let scope = scope(&[("n", json!(5))]);
        assert_eq!(eval_str("vars.n.deeper", &scope), ExprValue::Undefined);
    }

    #[test]
    fn truthiness_matches_javascript() {
        assert!(!truthy(&ExprValue::Undefined));
        assert!(!truthy(&ExprValue::Json(json!(null))));
        assert!(!truthy(&ExprValue::Json(json!(false))));
        assert!(!truthy(&ExprValue::Json(json!(0))));
        assert!(!truthy(&ExprValue::Json(json!(""))));
        assert!(truthy(&ExprValue::Json(json!(1))));
        assert!(truthy(&ExprValue::Json(json!("0"))));
        assert!(truthy(&ExprValue::Json(json!([]))));
        assert!(truthy(&ExprValue::Json(json!({}))));
    }

    #[test]
    fn comparison_on_numbers() {
        let scope = scope(&[("x", json!(5))]);
        assert_eq!(eval_str("vars.x > 3", &scope), ExprValue::Json(json!(true)));
        assert_eq!(eval_str("vars.x >= 5", &scope), ExprValue::Json(json!(true)));
        assert_eq!(eval_str("vars.x < 5", &scope), ExprValue::Json(json!(false)));
    }

    #[test]
    fn comparison_on_strings_is_lexicographic() {
        let scope = HashMap::new();
        assert_eq!(
            eval_str("'apple' < 'banana'", &scope),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn mixed_comparison_stringifies() {
        let scope = HashMap::new();
        // "10" vs 9 stringified: "10" < "9" lexicographically.
        assert_eq!(
            eval_str("'10' < 9", &scope),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn equality_coerces_across_types() {
        let scope = HashMap::new();
        assert_eq!(eval_str("'5' == 5", &scope), ExprValue::Json(json!(true)));
        assert_eq!(eval_str("1 == true", &scope), ExprValue::Json(json!(false)));
        assert_eq!(eval_str("'a' != 'b'", &scope), ExprValue::Json(json!(true)));
    }

    #[test]
    fn arithmetic_coerces_non_numbers_to_zero() {
        let scope = scope(&[("s", json!("oops"))]);
        assert_eq!(eval_str("vars.s + 2", &scope), ExprValue::Json(json!(2.0)));
        assert_eq!(eval_str("vars.s * 7", &scope), ExprValue::Json(json!(0.0)));
    }

    #[test]
    fn division_by_zero_is_undefined_not_a_panic() {
        let scope = HashMap::new();
        assert_eq!(eval_str("1 / 0", &scope), ExprValue::Undefined);
    }

    #[test]
    fn short_circuit_returns_operand() {
        let scope = scope(&[("name", json!("ada"))]);
        assert_eq!(
            eval_str("vars.name || 'fallback'", &scope),
            ExprValue::Json(json!("ada"))
        );
        assert_eq!(
            eval_str("vars.missing || 'fallback'", &scope),
            ExprValue::Json(json!("fallback"))
        );
        assert_eq!(
            eval_str("vars.name && 'next'", &scope),
            ExprValue::Json(json!("next"))
        );
        assert_eq!(eval_str("0 && 'next'", &scope), ExprValue::Json(json!(0)));
    }

    #[test]
    fn negation_and_not() {
        let scope = scope(&[("x", json!(3))]);
        assert_eq!(eval_str("-vars.x", &scope), ExprValue::Json(json!(-3.0)));
        assert_eq!(eval_str("!vars.x", &scope), ExprValue::Json(json!(false)));
        assert_eq!(
            eval_str("!vars.missing", &scope),
            ExprValue::Json(json!(true))
        );
    }

    #[test]
    fn bare_scope_evaluates_to_object() {
        let scope = scope(&[("a", json!(1))]);
        assert_eq!(eval_str("vars", &scope), ExprValue::Json(json!({"a": 1})));
        // An empty scope is still truthy, it is an object.
        assert!(truthy(&eval_str("vars", &HashMap::new())));
    }

    #[test]
    fn foreign_names_evaluate_to_undefined() {
        let scope = scope(&[("x", json!(1))]);
        assert_eq!(eval_str("document.cookie", &scope), ExprValue::Undefined);
        assert_eq!(
            eval_str("globalThis || vars.x", &scope),
            ExprValue::Json(json!(1))
        );
    }
}
