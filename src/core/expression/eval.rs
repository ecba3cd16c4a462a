//! Expression evaluation
//!
//! Arithmetic follows Python semantics: `/` always yields a float, `//` and
//! `%` floor toward negative infinity, booleans promote to integers.

use std::cmp::Ordering;
use std::mem::discriminant;

use super::ast::{BinaryOp, BoolOp, CompareOp, Expr, UnaryOp};
use super::builtins;
use crate::core::value::{Map, Number, Value};
use crate::error::TemplateError;

/// Largest string or list a repetition may produce
const MAX_REPEAT_LEN: usize = 1 << 20;

/// Evaluate a parsed expression
pub fn evaluate(expr: &Expr) -> Result<Value, TemplateError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::ListLit(items) | Expr::TupleLit(items) => items
            .iter()
            .map(evaluate)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Expr::MapLit(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match evaluate(key)? {
                    Value::String(s) => s,
                    other => other.to_display_string(),
                };
                map.insert(key, evaluate(value)?);
            }
            Ok(Value::Map(map))
        }
        Expr::BinaryOp { op, left, right } => binary(*op, evaluate(left)?, evaluate(right)?),
        Expr::UnaryOp { op, operand } => unary(*op, &evaluate(operand)?),
        Expr::BoolOp { op, values } => {
            for value in values {
                let truthy = evaluate(value)?.is_truthy();
                match op {
                    BoolOp::And if !truthy => return Ok(Value::Bool(false)),
                    BoolOp::Or if truthy => return Ok(Value::Bool(true)),
                    _ => {}
                }
            }
            Ok(Value::Bool(*op == BoolOp::And))
        }
        Expr::Compare { left, comparisons } => {
            let mut left = evaluate(left)?;
            for (op, right) in comparisons {
                let right = evaluate(right)?;
                if !compare(*op, &left, &right)? {
                    return Ok(Value::Bool(false));
                }
                left = right;
            }
            Ok(Value::Bool(true))
        }
        Expr::Ternary { test, body, orelse } => {
            if evaluate(test)?.is_truthy() {
                evaluate(body)
            } else {
                evaluate(orelse)
            }
        }
        Expr::Call { func, args } => {
            let args = args.iter().map(evaluate).collect::<Result<Vec<_>, _>>()?;
            builtins::call(func, args)
        }
    }
}

fn unsupported(op: &str, left: &Value, right: &Value) -> TemplateError {
    TemplateError::operand(
        op,
        format!(
            "unsupported operand type(s): '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ),
    )
}

fn overflow(op: &str) -> TemplateError {
    TemplateError::operand(op, "integer overflow")
}

fn division_by_zero(op: &str) -> TemplateError {
    TemplateError::operand(op, "division by zero")
}

fn unary(op: UnaryOp, operand: &Value) -> Result<Value, TemplateError> {
    let symbol = op.symbol();
    let bad_operand = || {
        TemplateError::operand(
            symbol,
            format!("bad operand type for unary {symbol}: '{}'", operand.type_name()),
        )
    };
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.is_truthy())),
        UnaryOp::Pos => match operand.as_number() {
            Some(Number::Int(i)) => Ok(Value::Integer(i)),
            Some(Number::Float(f)) => Ok(Value::Float(f)),
            None => Err(bad_operand()),
        },
        UnaryOp::Neg => match operand.as_number() {
            Some(Number::Int(i)) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| overflow(symbol)),
            Some(Number::Float(f)) => Ok(Value::Float(-f)),
            None => Err(bad_operand()),
        },
        UnaryOp::Invert => match operand.as_number() {
            Some(Number::Int(i)) => Ok(Value::Integer(!i)),
            _ => Err(bad_operand()),
        },
    }
}

/// Apply a binary operator to two evaluated operands
pub(super) fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, TemplateError> {
    let symbol = op.symbol();
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (left, right) => arithmetic(op, &left, &right),
        },
        BinaryOp::Mul => match (left, right) {
            (Value::String(s), count) | (count, Value::String(s))
                if matches!(count, Value::Integer(_) | Value::Bool(_)) =>
            {
                let times = repeat_count(symbol, &count, s.chars().count())?;
                Ok(Value::String(s.repeat(times)))
            }
            (Value::List(items), count) | (count, Value::List(items))
                if matches!(count, Value::Integer(_) | Value::Bool(_)) =>
            {
                let times = repeat_count(symbol, &count, items.len())?;
                let mut repeated = Vec::with_capacity(items.len() * times);
                for _ in 0..times {
                    repeated.extend(items.iter().cloned());
                }
                Ok(Value::List(repeated))
            }
            (left, right) => arithmetic(op, &left, &right),
        },
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
            if let (Value::Bool(a), Value::Bool(b)) = (&left, &right) {
                let result = match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    _ => a ^ b,
                };
                return Ok(Value::Bool(result));
            }
            let (a, b) = integer_operands(symbol, &left, &right)?;
            Ok(Value::Integer(match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                _ => a ^ b,
            }))
        }
        BinaryOp::LShift | BinaryOp::RShift => {
            let (a, b) = integer_operands(symbol, &left, &right)?;
            shift(op, a, b).map(Value::Integer)
        }
        _ => arithmetic(op, &left, &right),
    }
}

fn repeat_count(op: &str, count: &Value, unit_len: usize) -> Result<usize, TemplateError> {
    let count = match count.as_number() {
        Some(Number::Int(i)) => i,
        _ => 0,
    };
    if unit_len == 0 {
        return Ok(0);
    }
    let times = usize::try_from(count.max(0)).unwrap_or(usize::MAX);
    if unit_len.saturating_mul(times) > MAX_REPEAT_LEN {
        return Err(TemplateError::operand(op, "repetition result is too large"));
    }
    Ok(times)
}

fn integer_operands(op: &str, left: &Value, right: &Value) -> Result<(i64, i64), TemplateError> {
    match (left.as_number(), right.as_number()) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => Ok((a, b)),
        _ => Err(unsupported(op, left, right)),
    }
}

fn shift(op: BinaryOp, value: i64, count: i64) -> Result<i64, TemplateError> {
    let symbol = op.symbol();
    if count < 0 {
        return Err(TemplateError::operand(symbol, "negative shift count"));
    }
    let count = u32::try_from(count.min(64)).unwrap_or(64);
    if op == BinaryOp::RShift {
        return Ok(if count >= 64 {
            if value < 0 {
                -1
            } else {
                0
            }
        } else {
            value >> count
        });
    }
    if value == 0 {
        return Ok(0);
    }
    if count >= 63 {
        return Err(overflow(symbol));
    }
    let shifted = value << count;
    if shifted >> count == value {
        Ok(shifted)
    } else {
        Err(overflow(symbol))
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, TemplateError> {
    let symbol = op.symbol();
    let (Some(a), Some(b)) = (left.as_number(), right.as_number()) else {
        return Err(unsupported(symbol, left, right));
    };

    if let (Number::Int(a), Number::Int(b)) = (a, b) {
        return integer_arithmetic(op, a, b);
    }

    let (a, b) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(division_by_zero(symbol));
            }
            a / b
        }
        BinaryOp::FloorDiv => {
            if b == 0.0 {
                return Err(division_by_zero(symbol));
            }
            (a / b).floor()
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                return Err(division_by_zero(symbol));
            }
            float_mod(a, b)
        }
        BinaryOp::Pow => float_pow(a, b)?,
        _ => return Err(unsupported(symbol, left, right)),
    };
    Ok(Value::Float(result))
}

fn integer_arithmetic(op: BinaryOp, a: i64, b: i64) -> Result<Value, TemplateError> {
    let symbol = op.symbol();
    let checked = |result: Option<i64>| result.map(Value::Integer).ok_or_else(|| overflow(symbol));
    match op {
        BinaryOp::Add => checked(a.checked_add(b)),
        BinaryOp::Sub => checked(a.checked_sub(b)),
        BinaryOp::Mul => checked(a.checked_mul(b)),
        BinaryOp::Div => {
            if b == 0 {
                return Err(division_by_zero(symbol));
            }
            let (a, b) = (Number::Int(a).as_f64(), Number::Int(b).as_f64());
            Ok(Value::Float(a / b))
        }
        BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(division_by_zero(symbol));
            }
            let quotient = a.checked_div(b).ok_or_else(|| overflow(symbol))?;
            let adjust = a % b != 0 && ((a < 0) != (b < 0));
            Ok(Value::Integer(if adjust { quotient - 1 } else { quotient }))
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(division_by_zero(symbol));
            }
            let remainder = a.checked_rem(b).ok_or_else(|| overflow(symbol))?;
            let adjust = remainder != 0 && ((remainder < 0) != (b < 0));
            Ok(Value::Integer(if adjust { remainder + b } else { remainder }))
        }
        BinaryOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return Err(division_by_zero(symbol));
                }
                return float_pow(Number::Int(a).as_f64(), Number::Int(b).as_f64())
                    .map(Value::Float);
            }
            match a {
                0 => return Ok(Value::Integer(i64::from(b == 0))),
                1 => return Ok(Value::Integer(1)),
                -1 => return Ok(Value::Integer(if b % 2 == 0 { 1 } else { -1 })),
                _ => {}
            }
            let exp = u32::try_from(b).map_err(|_| overflow(symbol))?;
            checked(a.checked_pow(exp))
        }
        _ => Err(unsupported(symbol, &Value::Integer(a), &Value::Integer(b))),
    }
}

fn float_mod(a: f64, b: f64) -> f64 {
    let remainder = a % b;
    if remainder != 0.0 && ((remainder < 0.0) != (b < 0.0)) {
        remainder + b
    } else {
        remainder
    }
}

fn float_pow(base: f64, exp: f64) -> Result<f64, TemplateError> {
    if base == 0.0 && exp < 0.0 {
        return Err(division_by_zero("**"));
    }
    if base < 0.0 && exp.fract() != 0.0 {
        return Err(TemplateError::operand(
            "**",
            "negative number cannot be raised to a fractional power",
        ));
    }
    Ok(base.powf(exp))
}

/// Order two values for `<`, `<=`, `>`, `>=`, `min` and `max`
///
/// Returns `None` when the values are unordered (NaN involved).
pub(super) fn order(op: &str, left: &Value, right: &Value) -> Result<Option<Ordering>, TemplateError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b) {
                if x != y {
                    return order(op, x, y);
                }
            }
            Ok(Some(a.len().cmp(&b.len())))
        }
        _ => match (left.as_number(), right.as_number()) {
            (Some(Number::Int(a)), Some(Number::Int(b))) => Ok(Some(a.cmp(&b))),
            (Some(a), Some(b)) => Ok(a.as_f64().partial_cmp(&b.as_f64())),
            _ => Err(TemplateError::operand(
                op,
                format!(
                    "'{op}' not supported between instances of '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ),
            )),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, TemplateError> {
    match container {
        Value::String(haystack) => match item {
            Value::String(needle) => Ok(haystack.contains(needle.as_str())),
            other => Err(TemplateError::operand(
                "in",
                format!(
                    "'in <string>' requires string as left operand, not {}",
                    other.type_name()
                ),
            )),
        },
        Value::List(items) => Ok(items.contains(item)),
        Value::Map(map) => Ok(item.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(TemplateError::operand(
            "in",
            format!("argument of type '{}' is not iterable", other.type_name()),
        )),
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool, TemplateError> {
    let symbol = op.symbol();
    Ok(match op {
        CompareOp::Eq => left == right,
        CompareOp::NotEq => left != right,
        CompareOp::Lt => order(symbol, left, right)? == Some(Ordering::Less),
        CompareOp::LtE => matches!(
            order(symbol, left, right)?,
            Some(Ordering::Less | Ordering::Equal)
        ),
        CompareOp::Gt => order(symbol, left, right)? == Some(Ordering::Greater),
        CompareOp::GtE => matches!(
            order(symbol, left, right)?,
            Some(Ordering::Greater | Ordering::Equal)
        ),
        CompareOp::In => contains(right, left)?,
        CompareOp::NotIn => !contains(right, left)?,
        CompareOp::Is => discriminant(left) == discriminant(right) && left == right,
        CompareOp::IsNot => !(discriminant(left) == discriminant(right) && left == right),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::expression::parser::parse;

    fn eval(text: &str) -> Result<Value, TemplateError> {
        evaluate(&parse(text)?)
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval("1 + 2 * 3").unwrap(), Value::Integer(7));
        assert_eq!(eval("7 / 2").unwrap(), Value::Float(3.5));
        assert_eq!(eval("-7 // 2").unwrap(), Value::Integer(-4));
        assert_eq!(eval("-7 % 3").unwrap(), Value::Integer(2));
        assert_eq!(eval("7 % -3").unwrap(), Value::Integer(-2));
        assert_eq!(eval("2 ** 10").unwrap(), Value::Integer(1024));
        assert_eq!(eval("2 ** -1").unwrap(), Value::Float(0.5));
        assert_eq!(eval("-2 ** 2").unwrap(), Value::Integer(-4));
        assert_eq!(eval("1 ** 5000000000").unwrap(), Value::Integer(1));
        assert_eq!(eval("0 ** 5000000000").unwrap(), Value::Integer(0));
        assert_eq!(eval("0 ** 0").unwrap(), Value::Integer(1));
        assert_eq!(eval("(-1) ** 5000000001").unwrap(), Value::Integer(-1));
        assert_eq!(eval("(-1) ** 5000000000").unwrap(), Value::Integer(1));
        assert_eq!(eval("True + True").unwrap(), Value::Integer(2));
        assert_eq!(eval("1.5 * 2").unwrap(), Value::Float(3.0));
    }

    #[test]
    fn test_arithmetic_errors() {
        for text in ["1 / 0", "1 // 0", "1 % 0", "0 ** -1", "1 << -1", "2 ** 64", "'a' - 1"] {
            assert!(
                matches!(eval(text), Err(TemplateError::Operand { .. })),
                "{text} should fail"
            );
        }
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(eval("6 & 3").unwrap(), Value::Integer(2));
        assert_eq!(eval("6 | 3").unwrap(), Value::Integer(7));
        assert_eq!(eval("6 ^ 3").unwrap(), Value::Integer(5));
        assert_eq!(eval("~5").unwrap(), Value::Integer(-6));
        assert_eq!(eval("1 << 4").unwrap(), Value::Integer(16));
        assert_eq!(eval("-16 >> 2").unwrap(), Value::Integer(-4));
        assert!(matches!(eval("True & False").unwrap(), Value::Bool(false)));
    }

    #[test]
    fn test_sequences() {
        assert_eq!(eval("'ab' + 'cd'").unwrap(), Value::from("abcd"));
        assert_eq!(eval("'ab' * 3").unwrap(), Value::from("ababab"));
        assert_eq!(eval("2 * [1]").unwrap(), eval("[1, 1]").unwrap());
        assert_eq!(eval("[1] + [2]").unwrap(), eval("[1, 2]").unwrap());
        assert!(eval("'a' * 100000000").is_err());
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 < 2 < 3").unwrap(), Value::Bool(true));
        assert_eq!(eval("3 > 2 > 2").unwrap(), Value::Bool(false));
        assert_eq!(eval("'ab' < 'b'").unwrap(), Value::Bool(true));
        assert_eq!(eval("[1, 2] < [1, 3]").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 == 1.0").unwrap(), Value::Bool(true));
        assert_eq!(eval("'x' in 'xyz'").unwrap(), Value::Bool(true));
        assert_eq!(eval("2 not in [1, 3]").unwrap(), Value::Bool(true));
        assert_eq!(eval("'k' in {'k': 1}").unwrap(), Value::Bool(true));
        assert_eq!(eval("None is None").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 is not True").unwrap(), Value::Bool(true));
        assert!(eval("1 < 'a'").is_err());
    }

    #[test]
    fn test_chained_comparison_short_circuits() {
        // The failing comparison is never reached.
        assert_eq!(eval("2 < 1 < 'a'").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_bool_ops_short_circuit() {
        assert_eq!(eval("False and 1 / 0").unwrap(), Value::Bool(false));
        assert_eq!(eval("True or 1 / 0").unwrap(), Value::Bool(true));
        assert_eq!(eval("1 and 'x'").unwrap(), Value::Bool(true));
        assert_eq!(eval("0 or ''").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_ternary() {
        assert_eq!(eval("'a' if '1' == '1' else 'b'").unwrap(), Value::from("a"));
        assert_eq!(eval("'a' if [] else 'b'").unwrap(), Value::from("b"));
    }

    #[test]
    fn test_map_literal_keys_stringified() {
        let value = eval("{1: 'one', 'two': 2}").unwrap();
        let map = value.as_map().unwrap();
        assert_eq!(map["1"], Value::from("one"));
        assert_eq!(map["two"], Value::Integer(2));
    }

    #[test]
    fn test_calls() {
        assert_eq!(eval("int('4') + 1").unwrap(), Value::Integer(5));
        assert_eq!(eval("max([1, 5, 3])").unwrap(), Value::Integer(5));
        assert_eq!(eval("float('inf') > 1e308").unwrap(), Value::Bool(true));
        assert!(matches!(
            eval("round(1.5, 2, 3)").unwrap_err(),
            TemplateError::Arity { .. }
        ));
    }
}
