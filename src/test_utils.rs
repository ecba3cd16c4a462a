//! Test utilities for property-based testing
//!
//! This module provides generators and helpers for proptest.

#[cfg(test)]
pub mod generators {
    use proptest::prelude::*;

    use crate::core::value::Value;

    /// Generate a scalar value
    pub fn leaf_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            any::<f64>().prop_map(Value::Float),
            ".*".prop_map(Value::String),
        ]
    }

    /// Generate a value tree up to three levels deep
    pub fn value() -> impl Strategy<Value = Value> {
        leaf_value().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::btree_map("[a-z_]{0,6}", inner, 0..4).prop_map(Value::Map),
            ]
        })
    }

    /// Generate text without placeholder or expression markers
    pub fn plain_text() -> impl Strategy<Value = String> {
        "[^{\\[]*"
    }

    /// Generate an environment variable name
    pub fn env_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Z0-9_]{0,10}"
    }

    /// Structural equality that treats NaN as equal to itself
    pub fn same(a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Float(x), Value::Float(y)) if x.is_nan() && y.is_nan() => true,
            (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same(x, y))
            }
            (Value::Map(xs), Value::Map(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|((kx, x), (ky, y))| kx == ky && same(x, y))
            }
            _ => std::mem::discriminant(a) == std::mem::discriminant(b) && a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::generators::*;
    use crate::core::value::Value;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_plain_text_generator(text in plain_text()) {
            prop_assert!(!text.contains('{'), "plain text must not contain '{{'");
            prop_assert!(!text.contains('['));
        }

        #[test]
        fn test_env_name_generator(name in env_name()) {
            prop_assert!(name.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'));
        }

        #[test]
        fn test_same_is_reflexive(value in value()) {
            prop_assert!(same(&value, &value));
        }
    }

    #[test]
    fn test_same_distinguishes_numeric_kinds() {
        assert!(!same(&Value::Integer(1), &Value::Float(1.0)));
        assert!(same(&Value::Float(f64::NAN), &Value::Float(f64::NAN)));
    }
}
