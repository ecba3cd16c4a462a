//! Expression syntax tree
//!
//! The node set is closed: anything the parser cannot express with these
//! variants is rejected before evaluation.

use std::fmt;

use crate::core::value::Value;

/// Binary arithmetic and bitwise operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

impl BinaryOp {
    /// Map an operator token to a binary operator
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Self::Add,
            "-" => Self::Sub,
            "*" => Self::Mul,
            "/" => Self::Div,
            "//" => Self::FloorDiv,
            "%" => Self::Mod,
            "**" => Self::Pow,
            "&" => Self::BitAnd,
            "|" => Self::BitOr,
            "^" => Self::BitXor,
            "<<" => Self::LShift,
            ">>" => Self::RShift,
            _ => return None,
        })
    }

    /// Source symbol
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Mod => "%",
            Self::Pow => "**",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::LShift => "<<",
            Self::RShift => ">>",
        }
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Pos,
    Neg,
    Not,
    Invert,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Pos => "+",
            Self::Neg => "-",
            Self::Not => "not",
            Self::Invert => "~",
        }
    }
}

/// Short-circuit boolean operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    In,
    NotIn,
    Is,
    IsNot,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
            Self::In => "in",
            Self::NotIn => "not in",
            Self::Is => "is",
            Self::IsNot => "is not",
        }
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value (numbers, strings, True/False/None)
    Literal(Value),
    /// `[a, b]`
    ListLit(Vec<Expr>),
    /// `(a, b)`; evaluates to a list
    TupleLit(Vec<Expr>),
    /// `{k: v}`
    MapLit(Vec<(Expr, Expr)>),
    /// `left op right`
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `op operand`
    UnaryOp { op: UnaryOp, operand: Box<Expr> },
    /// `a and b and c` / `a or b`
    BoolOp { op: BoolOp, values: Vec<Expr> },
    /// `a < b <= c`
    Compare {
        left: Box<Expr>,
        comparisons: Vec<(CompareOp, Expr)>,
    },
    /// `body if test else orelse`
    Ternary {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    /// `name(args...)`
    Call { func: String, args: Vec<Expr> },
}

impl Expr {
    /// Node kind name used in messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Literal(_) => "Literal",
            Self::ListLit(_) => "ListLit",
            Self::TupleLit(_) => "TupleLit",
            Self::MapLit(_) => "MapLit",
            Self::BinaryOp { .. } => "BinaryOp",
            Self::UnaryOp { .. } => "UnaryOp",
            Self::BoolOp { .. } => "BoolOp",
            Self::Compare { .. } => "Compare",
            Self::Ternary { .. } => "Ternary",
            Self::Call { .. } => "Call",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(value) => f.write_str(&value.to_literal()),
            Self::ListLit(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            Self::TupleLit(items) => {
                f.write_str("(")?;
                write_joined(f, items)?;
                if items.len() == 1 {
                    f.write_str(",")?;
                }
                f.write_str(")")
            }
            Self::MapLit(entries) => {
                f.write_str("{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            Self::BinaryOp { op, left, right } => write!(f, "({left} {} {right})", op.symbol()),
            Self::UnaryOp { op, operand } => match op {
                UnaryOp::Not => write!(f, "(not {operand})"),
                _ => write!(f, "({}{operand})", op.symbol()),
            },
            Self::BoolOp { op, values } => {
                let sep = match op {
                    BoolOp::And => " and ",
                    BoolOp::Or => " or ",
                };
                f.write_str("(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(sep)?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str(")")
            }
            Self::Compare { left, comparisons } => {
                write!(f, "({left}")?;
                for (op, right) in comparisons {
                    write!(f, " {} {right}", op.symbol())?;
                }
                f.write_str(")")
            }
            Self::Ternary { test, body, orelse } => {
                write!(f, "({body} if {test} else {orelse})")
            }
            Self::Call { func, args } => {
                write!(f, "{func}(")?;
                write_joined(f, args)?;
                f.write_str(")")
            }
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
