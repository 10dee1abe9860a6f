//! Comparison and arithmetic on template values.

use std::cmp::Ordering;

use crate::ast::{BinaryOp, CompareOp};
use crate::error::{PublishError, PublishResult};
use crate::value::Value;

#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    const fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

/// Equality with numeric promotion: `1 == 1.0`.
pub(crate) fn values_equal(left: &Value, right: &Value) -> bool {
    match (Number::of(left), Number::of(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => a == b,
        (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn ordering(left: &Value, right: &Value) -> PublishResult<Ordering> {
    let ordering = match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        _ => match (Number::of(left), Number::of(right)) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        },
    };
    ordering.ok_or_else(|| {
        PublishError::render(format!(
            "cannot compare {} with {}",
            left.kind(),
            right.kind()
        ))
    })
}

/// `item in container` for sequences, map keys and substrings.
pub(crate) fn contains(container: &Value, item: &Value) -> bool {
    match container {
        Value::Seq(items) => items.iter().any(|candidate| values_equal(candidate, item)),
        Value::Map(entries) => entries.contains_key(&item.to_string()),
        Value::String(text) => text.contains(&item.to_string()),
        _ => false,
    }
}

pub(crate) fn compare(op: CompareOp, left: &Value, right: &Value) -> PublishResult<bool> {
    Ok(match op {
        CompareOp::Eq => values_equal(left, right),
        CompareOp::Ne => !values_equal(left, right),
        CompareOp::Lt => ordering(left, right)? == Ordering::Less,
        CompareOp::Le => ordering(left, right)? != Ordering::Greater,
        CompareOp::Gt => ordering(left, right)? == Ordering::Greater,
        CompareOp::Ge => ordering(left, right)? != Ordering::Less,
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => !contains(right, left),
    })
}

fn overflow(op: BinaryOp) -> PublishError {
    PublishError::render(format!("integer overflow in {op:?}"))
}

fn floor_div(a: i64, b: i64) -> Option<i64> {
    let quotient = a.checked_div(b)?;
    if a % b != 0 && (a < 0) != (b < 0) {
        quotient.checked_sub(1)
    } else {
        Some(quotient)
    }
}

fn floor_rem(a: i64, b: i64) -> Option<i64> {
    let rem = a.checked_rem(b)?;
    if rem != 0 && (rem < 0) != (b < 0) {
        rem.checked_add(b)
    } else {
        Some(rem)
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> PublishResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Rem) && b == 0 {
        return Err(PublishError::render("division by zero"));
    }
    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div => return Ok(Value::Float(a as f64 / b as f64)),
        BinaryOp::FloorDiv => floor_div(a, b),
        BinaryOp::Rem => floor_rem(a, b),
        BinaryOp::Pow => match u32::try_from(b) {
            Ok(exp) => a.checked_pow(exp),
            Err(_) => return Ok(Value::Float((a as f64).powf(b as f64))),
        },
        BinaryOp::Concat => return Ok(Value::String(format!("{a}{b}"))),
    };
    result.map(Value::Int).ok_or_else(|| overflow(op))
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> PublishResult<Value> {
    if matches!(op, BinaryOp::Div | BinaryOp::FloorDiv | BinaryOp::Rem) && b == 0.0 {
        return Err(PublishError::render("division by zero"));
    }
    Ok(Value::Float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::FloorDiv => (a / b).floor(),
        BinaryOp::Rem => a - b * (a / b).floor(),
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Concat => return Ok(Value::String(format!("{a}{b}"))),
    }))
}

pub(crate) fn binary(op: BinaryOp, left: Value, right: Value) -> PublishResult<Value> {
    if op == BinaryOp::Concat {
        return Ok(Value::String(format!("{left}{right}")));
    }

    match (op, left, right) {
        (BinaryOp::Add, Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (BinaryOp::Add, Value::Seq(mut a), Value::Seq(b)) => {
            a.extend(b);
            Ok(Value::Seq(a))
        }
        (op, left, right) => match (Number::of(&left), Number::of(&right)) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => int_op(op, a, b),
            (Some(a), Some(b)) => float_op(op, a.as_f64(), b.as_f64()),
            _ => Err(PublishError::render(format!(
                "unsupported operand types for {op:?}: {} and {}",
                left.kind(),
                right.kind()
            ))),
        },
    }
}

pub(crate) fn negate(value: &Value) -> PublishResult<Value> {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| PublishError::render("integer overflow in negation")),
        Value::Float(f) => Ok(Value::Float(-f)),
        other => Err(PublishError::render(format!("cannot negate {}", other.kind()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_equality_promotes() {
        assert!(values_equal(&Value::Int(1), &Value::Float(1.0)));
        assert!(!values_equal(&Value::Int(1), &Value::from("1")));
        assert!(values_equal(&Value::from("a"), &Value::from("a")));
    }

    #[test]
    fn test_compare_and_membership() {
        assert!(compare(CompareOp::Lt, &Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(compare(CompareOp::Ge, &Value::from("b"), &Value::from("a")).unwrap());
        assert!(compare(CompareOp::Lt, &Value::from("a"), &Value::Int(1)).is_err());

        let items = Value::Seq(vec![Value::Int(1), Value::from("x")]);
        assert!(compare(CompareOp::In, &Value::Float(1.0), &items).unwrap());
        assert!(compare(CompareOp::NotIn, &Value::from("y"), &items).unwrap());
        assert!(compare(CompareOp::In, &Value::from("ell"), &Value::from("hello")).unwrap());
    }

    #[test]
    fn test_floor_division_and_modulo_follow_divisor_sign() {
        assert_eq!(binary(BinaryOp::FloorDiv, Value::Int(-7), Value::Int(2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinaryOp::FloorDiv, Value::Int(7), Value::Int(-2)).unwrap(), Value::Int(-4));
        assert_eq!(binary(BinaryOp::Rem, Value::Int(-7), Value::Int(3)).unwrap(), Value::Int(2));
        assert_eq!(binary(BinaryOp::Rem, Value::Int(7), Value::Int(-3)).unwrap(), Value::Int(-2));
        assert!(binary(BinaryOp::Rem, Value::Int(1), Value::Int(0)).is_err());
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(binary(BinaryOp::Add, Value::Int(2), Value::Int(3)).unwrap(), Value::Int(5));
        assert_eq!(binary(BinaryOp::Div, Value::Int(3), Value::Int(2)).unwrap(), Value::Float(1.5));
        assert_eq!(binary(BinaryOp::Pow, Value::Int(2), Value::Int(10)).unwrap(), Value::Int(1024));
        assert_eq!(
            binary(BinaryOp::Add, Value::from("a"), Value::from("b")).unwrap(),
            Value::from("ab")
        );
        assert_eq!(
            binary(BinaryOp::Concat, Value::from("n"), Value::Int(1)).unwrap(),
            Value::from("n1")
        );
        assert!(binary(BinaryOp::Add, Value::Int(i64::MAX), Value::Int(1)).is_err());
        assert!(binary(BinaryOp::Sub, Value::from("a"), Value::Int(1)).is_err());
    }

    #[test]
    fn test_negate() {
        assert_eq!(negate(&Value::Int(3)).unwrap(), Value::Int(-3));
        assert!(negate(&Value::from("x")).is_err());
    }
}
