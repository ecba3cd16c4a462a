//! Placeholder and expression syntax
//!
//! Placeholders are written `{{dotted.path}}`; expressions are written
//! `[[ ... ]]` and must span the whole value.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::core::value::Value;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([^{}]+)\}\}").expect("Invalid placeholder regex")
});

static SINGLE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\{\{([^{}]+)\}\}\s*$").expect("Invalid placeholder regex")
});

static EXPRESSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*\[\[(?P<expr>.*)\]\]\s*$").expect("Invalid expression regex")
});

/// Body of a `[[ ... ]]` expression spanning the whole string
pub fn expression_body(text: &str) -> Option<&str> {
    EXPRESSION
        .captures(text)
        .and_then(|caps| caps.name("expr"))
        .map(|m| m.as_str())
}

/// Path of a string that consists of exactly one placeholder
pub fn single_placeholder(text: &str) -> Option<&str> {
    SINGLE_PLACEHOLDER
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Whether the text contains any placeholder
pub fn has_placeholder(text: &str) -> bool {
    PLACEHOLDER.is_match(text)
}

/// Whether the text looks templated (placeholder or expression markers)
pub fn looks_like_template(text: &str) -> bool {
    text.contains("{{") || text.contains("[[")
}

/// Trimmed placeholder paths in the text, in order of appearance
pub fn placeholder_paths(text: &str) -> impl Iterator<Item = &str> {
    PLACEHOLDER
        .captures_iter(text)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .filter(|path| !path.is_empty())
}

/// Replace every placeholder using `replace(path)`, stopping at the first error
pub fn try_substitute<E>(
    text: &str,
    mut replace: impl FnMut(&str) -> Result<String, E>,
) -> Result<String, E> {
    let mut output = String::with_capacity(text.len());
    let mut last_end = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(full), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        output.push_str(&text[last_end..full.start()]);
        output.push_str(&replace(path.as_str().trim())?);
        last_end = full.end();
    }
    output.push_str(&text[last_end..]);
    Ok(output)
}

/// Replace every placeholder with a fixed literal (used for syntax-only checks)
pub fn neutralize(text: &str, literal: &str) -> String {
    PLACEHOLDER
        .replace_all(text, |_: &Captures<'_>| literal.to_string())
        .into_owned()
}

/// Collect all placeholder paths referenced anywhere within a value
pub fn extract_placeholders(value: &Value) -> BTreeSet<String> {
    let mut placeholders = BTreeSet::new();
    collect(value, &mut placeholders);
    placeholders
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => out.extend(placeholder_paths(s).map(str::to_string)),
        Value::List(items) => items.iter().for_each(|item| collect(item, out)),
        Value::Map(map) => map.values().for_each(|item| collect(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Map;

    #[test]
    fn test_expression_body() {
        assert_eq!(expression_body("  [[ 1 + 2 ]] "), Some(" 1 + 2 "));
        assert_eq!(expression_body("[[a\nb]]"), Some("a\nb"));
        assert_eq!(expression_body("x [[ 1 ]]"), None);
    }

    #[test]
    fn test_single_placeholder() {
        assert_eq!(single_placeholder(" {{ env.CC }} "), Some("env.CC"));
        assert_eq!(single_placeholder("{{a}}-{{b}}"), None);
        assert_eq!(single_placeholder("x{{a}}"), None);
    }

    #[test]
    fn test_try_substitute() {
        let out: Result<String, ()> =
            try_substitute("{{a}}/{{ b }}!", |p| Ok(p.to_uppercase()));
        assert_eq!(out.unwrap(), "A/B!");
    }

    #[test]
    fn test_neutralize() {
        assert_eq!(neutralize("{{a}} == {{b.c}}", "0"), "0 == 0");
    }

    #[test]
    fn test_extract_placeholders_nested() {
        let mut map = Map::new();
        map.insert("x".into(), "{{env.A}} {{env.B}}".into());
        map.insert(
            "y".into(),
            Value::List(vec!["{{preset.definitions.C}}".into(), Value::Integer(3)]),
        );
        let found = extract_placeholders(&Value::Map(map));
        let expected: BTreeSet<String> = ["env.A", "env.B", "preset.definitions.C"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(found, expected);
    }
}
