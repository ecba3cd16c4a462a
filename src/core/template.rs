//! Template resolution
//!
//! [`TemplateResolver`] turns raw values into resolved values by replacing
//! `{{path}}` placeholders and evaluating `[[ ... ]]` expressions against a
//! [`Context`]. Resolved paths are memoized; a visitation stack detects
//! reference cycles.

use std::collections::HashMap;

use tracing::trace;

use crate::core::context::Context;
use crate::core::expression::evaluate_expression;
use crate::core::placeholder::{
    expression_body, has_placeholder, single_placeholder, try_substitute,
};
use crate::core::value::{Map, Value};
use crate::error::TemplateError;

/// Resolves templates against a context, memoizing by path
///
/// The memo table is only valid for the context it was filled from. Use
/// [`TemplateResolver::set_path`] to change the context (which clears the
/// memo) or call [`TemplateResolver::clear_cache`] after any other change.
/// Not meant to be shared between threads; build one per context snapshot.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    context: Context,
    cache: HashMap<String, Value>,
}

impl TemplateResolver {
    /// Create a resolver over `context`
    pub fn new(context: Context) -> Self {
        Self {
            context,
            cache: HashMap::new(),
        }
    }

    /// Borrow the context
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Consume the resolver, returning its context
    pub fn into_context(self) -> Context {
        self.context
    }

    /// Forget all memoized path resolutions
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Set a value in the context and invalidate the memo table
    pub fn set_path(&mut self, path: &str, value: Value) {
        self.context.set_path(path, value);
        self.clear_cache();
    }

    /// Resolve a raw value
    pub fn resolve(&mut self, value: &Value) -> Result<Value, TemplateError> {
        let mut stack = Vec::new();
        self.resolve_value(value, &mut stack)
    }

    /// Resolve a raw string
    pub fn resolve_str(&mut self, text: &str) -> Result<Value, TemplateError> {
        let mut stack = Vec::new();
        self.resolve_string(text, &mut stack)
    }

    /// Resolve a raw string and stringify the result
    pub fn resolve_to_string(&mut self, text: &str) -> Result<String, TemplateError> {
        self.resolve_str(text).map(|value| value.to_display_string())
    }

    /// Resolve the context value stored at `path`
    pub fn resolve_path(&mut self, path: &str) -> Result<Value, TemplateError> {
        let mut stack = Vec::new();
        self.resolve_path_inner(path, &mut stack)
    }

    /// Resolve every value of a map, keeping keys
    pub fn resolve_map(&mut self, map: &Map) -> Result<Map, TemplateError> {
        let mut stack = Vec::new();
        map.iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(value, &mut stack)?)))
            .collect()
    }

    fn resolve_value(
        &mut self,
        value: &Value,
        stack: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::String(text) => self.resolve_string(text, stack),
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve_value(item, stack))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Value::Map(map) => map
                .iter()
                .map(|(key, item)| Ok((key.clone(), self.resolve_value(item, stack)?)))
                .collect::<Result<Map, TemplateError>>()
                .map(Value::Map),
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(
        &mut self,
        text: &str,
        stack: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        if let Some(body) = expression_body(text) {
            let substituted = self.substitute(body, stack, true)?;
            trace!("Evaluating expression: {}", substituted.trim());
            return evaluate_expression(&substituted);
        }
        if let Some(path) = single_placeholder(text) {
            return self.resolve_path_inner(path, stack);
        }
        if !has_placeholder(text) {
            return Ok(Value::String(text.to_string()));
        }
        self.substitute(text, stack, false).map(Value::String)
    }

    fn substitute(
        &mut self,
        text: &str,
        stack: &mut Vec<String>,
        for_expression: bool,
    ) -> Result<String, TemplateError> {
        try_substitute(text, |path| {
            let value = self.resolve_path_inner(path, stack)?;
            Ok(if for_expression || !value.is_scalar() {
                value.to_literal()
            } else {
                value.to_display_string()
            })
        })
    }

    fn resolve_path_inner(
        &mut self,
        path: &str,
        stack: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        if let Some(cached) = self.cache.get(path) {
            return Ok(cached.clone());
        }
        if stack.iter().any(|entry| entry == path) {
            let mut cycle = stack.clone();
            cycle.push(path.to_string());
            return Err(TemplateError::CircularDependency { cycle });
        }

        let raw = self.context.get_path(path)?.clone();
        trace!("Resolving path: {}", path);
        stack.push(path.to_string());
        let resolved = self.resolve_value(&raw, stack);
        stack.pop();
        let resolved = resolved?;

        self.cache.insert(path.to_string(), resolved.clone());
        Ok(resolved)
    }
}
