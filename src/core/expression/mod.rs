//! Sandboxed expression language used inside `[[ ... ]]`
//!
//! The grammar is a closed subset of Python expression syntax: literals,
//! containers, arithmetic, comparisons, boolean logic, conditional
//! expressions and a handful of pure functions. Bare names other than
//! `True`, `False` and `None` are rejected, so an expression can only see
//! values that were substituted into it as literals.

mod ast;
mod builtins;
mod eval;
mod lexer;
mod parser;

pub use ast::{BinaryOp, BoolOp, CompareOp, Expr, UnaryOp};

use crate::core::value::Value;
use crate::error::TemplateError;

/// Parse and evaluate expression text
pub fn evaluate_expression(text: &str) -> Result<Value, TemplateError> {
    let expr = parser::parse(text.trim())?;
    eval::evaluate(&expr)
}

/// Check that expression text is within the grammar without evaluating it
pub fn validate_expression_syntax(text: &str) -> Result<(), TemplateError> {
    parser::parse(text.trim()).map(|_| ())
}

/// Parse expression text into a syntax tree
pub fn parse_expression(text: &str) -> Result<Expr, TemplateError> {
    parser::parse(text.trim())
}
