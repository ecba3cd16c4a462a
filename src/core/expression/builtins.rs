//! Whitelisted functions callable from expressions
//!
//! Every function is pure and takes positional arguments only. Failures
//! inside a function are reported as [`TemplateError::Conversion`].

use std::cmp::Ordering;

use super::ast::BinaryOp;
use super::eval::{binary, order};
use crate::core::value::{format_float, Number, Value};
use crate::error::TemplateError;

/// Arity bounds of a whitelisted function
#[derive(Debug, Clone, Copy)]
struct FunctionSpec {
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
}

const FUNCTIONS: [FunctionSpec; 9] = [
    FunctionSpec { name: "str", min_args: 1, max_args: Some(1) },
    FunctionSpec { name: "int", min_args: 1, max_args: Some(1) },
    FunctionSpec { name: "float", min_args: 1, max_args: Some(1) },
    FunctionSpec { name: "bool", min_args: 1, max_args: Some(1) },
    FunctionSpec { name: "min", min_args: 1, max_args: None },
    FunctionSpec { name: "max", min_args: 1, max_args: None },
    FunctionSpec { name: "abs", min_args: 1, max_args: Some(1) },
    FunctionSpec { name: "round", min_args: 1, max_args: Some(2) },
    FunctionSpec { name: "sum", min_args: 1, max_args: Some(2) },
];

fn spec(name: &str) -> Option<&'static FunctionSpec> {
    FUNCTIONS.iter().find(|spec| spec.name == name)
}

/// Whether `name` is a callable function
pub fn is_allowed(name: &str) -> bool {
    spec(name).is_some()
}

/// Check arity and invoke a whitelisted function
pub fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    let spec = spec(name).ok_or_else(|| TemplateError::FunctionNotAllowed {
        name: name.to_string(),
    })?;
    if args.len() < spec.min_args {
        return Err(TemplateError::Arity {
            name: name.to_string(),
            bound: "at least",
            count: spec.min_args,
        });
    }
    if let Some(max) = spec.max_args {
        if args.len() > max {
            return Err(TemplateError::Arity {
                name: name.to_string(),
                bound: "at most",
                count: max,
            });
        }
    }

    let convert = |message: String| TemplateError::Conversion {
        name: name.to_string(),
        message,
    };
    let mut args = args.into_iter();
    let first = args.next().unwrap_or_default();
    let second = args.next();

    match name {
        "str" => Ok(Value::String(first.to_display_string())),
        "int" => to_int(&first).map(Value::Integer).map_err(convert),
        "float" => to_float(&first).map(Value::Float).map_err(convert),
        "bool" => Ok(Value::Bool(first.is_truthy())),
        "abs" => abs(&first).map_err(convert),
        "round" => round(&first, second.as_ref()).map_err(convert),
        "min" | "max" => {
            let candidates = match second {
                None => match first {
                    Value::List(items) => items,
                    other => {
                        return Err(convert(format!(
                            "'{}' object is not iterable",
                            other.type_name()
                        )))
                    }
                },
                Some(second) => [first, second].into_iter().chain(args).collect(),
            };
            let wanted = if name == "min" {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            extreme(name, candidates, wanted).map_err(convert)
        }
        "sum" => sum(first, second).map_err(convert),
        _ => Err(TemplateError::FunctionNotAllowed {
            name: name.to_string(),
        }),
    }
}

fn to_int(value: &Value) -> Result<i64, String> {
    match value {
        Value::Bool(b) => Ok(i64::from(*b)),
        Value::Integer(i) => Ok(*i),
        Value::Float(f) => float_to_int(f.trunc()),
        Value::String(s) => {
            let text = s.trim().replace('_', "");
            text.parse::<i64>()
                .map_err(|_| format!("invalid literal for int() with base 10: '{s}'"))
        }
        other => Err(format!(
            "int() argument must be a string or a number, not '{}'",
            other.type_name()
        )),
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn float_to_int(f: f64) -> Result<i64, String> {
    if f.is_nan() {
        return Err("cannot convert float NaN to integer".to_string());
    }
    if f.is_infinite() {
        return Err("cannot convert float infinity to integer".to_string());
    }
    if f < i64::MIN as f64 || f >= i64::MAX as f64 {
        return Err(format!("float {} is out of integer range", format_float(f)));
    }
    Ok(f as i64)
}

fn to_float(value: &Value) -> Result<f64, String> {
    match value.as_number() {
        Some(number) => Ok(number.as_f64()),
        None => match value {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("could not convert string to float: '{s}'")),
            other => Err(format!(
                "float() argument must be a string or a number, not '{}'",
                other.type_name()
            )),
        },
    }
}

fn abs(value: &Value) -> Result<Value, String> {
    match value.as_number() {
        Some(Number::Int(i)) => i
            .checked_abs()
            .map(Value::Integer)
            .ok_or_else(|| "integer overflow".to_string()),
        Some(Number::Float(f)) => Ok(Value::Float(f.abs())),
        None => Err(format!(
            "bad operand type for abs(): '{}'",
            value.type_name()
        )),
    }
}

fn round(value: &Value, digits: Option<&Value>) -> Result<Value, String> {
    let number = value.as_number().ok_or_else(|| {
        format!(
            "type {} doesn't define __round__ method",
            value.type_name()
        )
    })?;
    let digits = match digits {
        None | Some(Value::Null) => None,
        Some(Value::Integer(n)) => Some(*n),
        Some(Value::Bool(b)) => Some(i64::from(*b)),
        Some(other) => {
            return Err(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }
    };

    match (number, digits) {
        (Number::Int(i), None) => Ok(Value::Integer(i)),
        (Number::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Integer),
        (Number::Int(i), Some(n)) if n >= 0 => Ok(Value::Integer(i)),
        (Number::Int(i), Some(n)) => Ok(Value::Integer(round_int(i, n))),
        (Number::Float(f), Some(n)) => Ok(Value::Float(round_float(f, n))),
    }
}

/// Round an integer to a negative number of digits, ties to even
fn round_int(value: i64, digits: i64) -> i64 {
    let Some(factor) = u32::try_from(digits.saturating_neg())
        .ok()
        .and_then(|exp| 10_i64.checked_pow(exp))
    else {
        return 0;
    };
    let quotient = value.div_euclid(factor);
    let remainder = value.rem_euclid(factor);
    let doubled = remainder.saturating_mul(2);
    let rounded = match doubled.cmp(&factor) {
        Ordering::Less => quotient,
        Ordering::Greater => quotient + 1,
        Ordering::Equal if quotient % 2 == 0 => quotient,
        Ordering::Equal => quotient + 1,
    };
    rounded.saturating_mul(factor)
}

fn round_float(value: f64, digits: i64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    let Ok(exp) = i32::try_from(digits.clamp(-400, 400)) else {
        return value;
    };
    let factor = 10_f64.powi(exp.abs());
    if exp >= 0 {
        let scaled = value * factor;
        if scaled.is_infinite() {
            return value;
        }
        scaled.round_ties_even() / factor
    } else {
        (value / factor).round_ties_even() * factor
    }
}

fn extreme(name: &str, candidates: Vec<Value>, wanted: Ordering) -> Result<Value, String> {
    let mut candidates = candidates.into_iter();
    let Some(mut best) = candidates.next() else {
        return Err(format!("{name}() arg is an empty sequence"));
    };
    let symbol = if wanted == Ordering::Less { "<" } else { ">" };
    for candidate in candidates {
        let ordering = order(symbol, &candidate, &best).map_err(|e| e.to_string())?;
        if ordering == Some(wanted) {
            best = candidate;
        }
    }
    Ok(best)
}

fn sum(items: Value, start: Option<Value>) -> Result<Value, String> {
    let Value::List(items) = items else {
        return Err(format!("'{}' object is not iterable", items.type_name()));
    };
    let mut total = start.unwrap_or(Value::Integer(0));
    if matches!(total, Value::String(_)) {
        return Err("sum() can't sum strings [use ''.join(seq) instead]".to_string());
    }
    for item in items {
        total = binary(BinaryOp::Add, total, item).map_err(|e| e.to_string())?;
    }
    Ok(total)
}
