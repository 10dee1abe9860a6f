//! Built-in filters and tests.

use crate::date::{DEFAULT_DATE_PATTERN, DateLocale, format_value};
use crate::error::{PublishError, PublishResult};
use crate::ops::values_equal;
use crate::value::Value;

/// Filter names that supply a fallback for an undefined value.
pub(crate) const DEFAULT_FILTERS: [&str; 2] = ["default", "d"];

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
        None => String::new(),
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut previous_alnum = false;
    for ch in text.chars() {
        if previous_alnum {
            out.extend(ch.to_lowercase());
        } else {
            out.extend(ch.to_uppercase());
        }
        previous_alnum = ch.is_alphanumeric();
    }
    out
}

fn first_item(value: Value) -> Value {
    match value {
        Value::Seq(items) => items.into_iter().next().unwrap_or_default(),
        Value::String(text) => text.chars().next().map(String::from).map(Value::String).unwrap_or_default(),
        _ => Value::Undefined,
    }
}

fn last_item(value: Value) -> Value {
    match value {
        Value::Seq(items) => items.into_iter().next_back().unwrap_or_default(),
        Value::String(text) => text.chars().next_back().map(String::from).map(Value::String).unwrap_or_default(),
        _ => Value::Undefined,
    }
}

fn join(value: &Value, separator: &str) -> String {
    match value {
        Value::Seq(items) => items
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(separator),
        other => other.to_string(),
    }
}

fn required_arg<'v>(filter: &str, args: &'v [Value], index: usize) -> PublishResult<&'v Value> {
    args.get(index).ok_or_else(|| {
        PublishError::render(format!("filter '{filter}' expects at least {} argument(s)", index + 1))
    })
}

/// Applies the filter `name` to `value`.
pub(crate) fn apply_filter(
    name: &str,
    value: Value,
    args: &[Value],
    locale: DateLocale,
) -> PublishResult<Value> {
    Ok(match name {
        "default" | "d" => {
            let fallback = args.first().cloned().unwrap_or_else(|| Value::from(""));
            let boolean = args.get(1).is_some_and(Value::is_truthy);
            if value.is_undefined() || (boolean && !value.is_truthy()) {
                fallback
            } else {
                value
            }
        }
        "format" => {
            let pattern = args
                .first()
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_DATE_PATTERN);
            Value::String(format_value(&value, pattern, locale))
        }
        "upper" => Value::String(value.to_string().to_uppercase()),
        "lower" => Value::String(value.to_string().to_lowercase()),
        "capitalize" => Value::String(capitalize(&value.to_string())),
        "title" => Value::String(title_case(&value.to_string())),
        "trim" => Value::String(value.to_string().trim().to_owned()),
        "length" | "count" => Value::from(value.len().unwrap_or(0)),
        "first" => first_item(value),
        "last" => last_item(value),
        "join" => {
            let separator = args.first().map(ToString::to_string).unwrap_or_default();
            Value::String(join(&value, &separator))
        }
        "replace" => {
            let from = required_arg(name, args, 0)?.to_string();
            let to = required_arg(name, args, 1)?.to_string();
            Value::String(value.to_string().replace(&from, &to))
        }
        "string" => Value::String(value.to_string()),
        "safe" => value,
        other => return Err(PublishError::render(format!("unknown filter '{other}'"))),
    })
}

/// Evaluates the test `name` (as in `value is name(args)`).
pub(crate) fn apply_test(name: &str, value: &Value, args: &[Value]) -> PublishResult<bool> {
    Ok(match name {
        "defined" => !value.is_undefined(),
        "undefined" => value.is_undefined(),
        "none" | "null" => matches!(value, Value::Null),
        "string" => matches!(value, Value::String(_)),
        "number" => matches!(value, Value::Int(_) | Value::Float(_)),
        "mapping" => matches!(value, Value::Map(_)),
        "sequence" | "iterable" => matches!(value, Value::Seq(_) | Value::String(_)),
        "true" => matches!(value, Value::Bool(true)),
        "false" => matches!(value, Value::Bool(false)),
        "even" => matches!(value, Value::Int(i) if i % 2 == 0),
        "odd" => matches!(value, Value::Int(i) if i % 2 != 0),
        "divisibleby" => match (value, required_arg(name, args, 0)?) {
            (Value::Int(_), Value::Int(0)) => false,
            (Value::Int(n), Value::Int(d)) => n % d == 0,
            _ => false,
        },
        "eq" | "equalto" | "sameas" => values_equal(value, required_arg(name, args, 0)?),
        other => return Err(PublishError::render(format!("unknown test '{other}'"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn filter(name: &str, value: Value, args: &[Value]) -> Value {
        apply_filter(name, value, args, DateLocale::En).unwrap()
    }

    #[test]
    fn test_default_only_replaces_undefined() {
        let fallback = [Value::from("n/a")];
        assert_eq!(filter("default", Value::Undefined, &fallback), Value::from("n/a"));
        assert_eq!(filter("d", Value::from(""), &fallback), Value::from(""));
        assert_eq!(filter("default", Value::Null, &fallback), Value::Null);
        assert_eq!(
            filter("default", Value::from(""), &[Value::from("n/a"), Value::Bool(true)]),
            Value::from("n/a")
        );
        assert_eq!(filter("default", Value::Undefined, &[]), Value::from(""));
    }

    #[test]
    fn test_format_dates_and_strings() {
        let date = Value::Date(NaiveDate::from_ymd_opt(2026, 2, 21).unwrap());
        assert_eq!(filter("format", date.clone(), &[]), Value::from("21-02-2026"));
        assert_eq!(
            filter("format", date, &[Value::from("D MMMM")]),
            Value::from("21 February")
        );
        assert_eq!(
            apply_filter("format", Value::from("01-03-2026"), &[Value::from("D MMMM")], DateLocale::Nl)
                .unwrap(),
            Value::from("1 maart")
        );
        assert_eq!(filter("format", Value::Int(7), &[]), Value::from("7"));
    }

    #[test]
    fn test_string_filters() {
        assert_eq!(filter("upper", Value::from("abc"), &[]), Value::from("ABC"));
        assert_eq!(filter("capitalize", Value::from("hELLO world"), &[]), Value::from("Hello world"));
        assert_eq!(filter("title", Value::from("hello big-world"), &[]), Value::from("Hello Big-World"));
        assert_eq!(filter("trim", Value::from("  x "), &[]), Value::from("x"));
        assert_eq!(
            filter("replace", Value::from("a-b-c"), &[Value::from("-"), Value::from("+")]),
            Value::from("a+b+c")
        );
        assert!(apply_filter("replace", Value::from("x"), &[], DateLocale::En).is_err());
        assert_eq!(filter("upper", Value::Undefined, &[]), Value::from(""));
    }

    #[test]
    fn test_sequence_filters() {
        let items = Value::Seq(vec![Value::from("a"), Value::from("b"), Value::from("c")]);
        assert_eq!(filter("length", items.clone(), &[]), Value::Int(3));
        assert_eq!(filter("length", Value::Undefined, &[]), Value::Int(0));
        assert_eq!(filter("first", items.clone(), &[]), Value::from("a"));
        assert_eq!(filter("last", items.clone(), &[]), Value::from("c"));
        assert_eq!(filter("join", items, &[Value::from(", ")]), Value::from("a, b, c"));
        assert_eq!(filter("first", Value::Seq(vec![]), &[]), Value::Undefined);
    }

    #[test]
    fn test_unknown_filter_is_error() {
        assert!(apply_filter("nope", Value::Null, &[], DateLocale::En).is_err());
    }

    #[test]
    fn test_builtin_tests() {
        assert!(apply_test("even", &Value::Int(4), &[]).unwrap());
        assert!(apply_test("odd", &Value::Int(3), &[]).unwrap());
        assert!(apply_test("divisibleby", &Value::Int(9), &[Value::Int(3)]).unwrap());
        assert!(!apply_test("divisibleby", &Value::Int(9), &[Value::Int(0)]).unwrap());
        assert!(apply_test("none", &Value::Null, &[]).unwrap());
        assert!(apply_test("sameas", &Value::Int(1), &[Value::Float(1.0)]).unwrap());
        assert!(apply_test("bogus", &Value::Null, &[]).is_err());
    }
}
