//! Recursive-descent parser for the expression grammar
//!
//! Constructs outside the whitelist are rejected here, so a successfully
//! parsed [`Expr`] only contains permitted nodes, names and functions.

use super::ast::{BinaryOp, BoolOp, CompareOp, Expr, UnaryOp};
use super::builtins;
use super::lexer::{tokenize, Token};
use crate::core::value::Value;
use crate::error::TemplateError;

const MAX_DEPTH: usize = 64;

const KEYWORDS: [&str; 10] = [
    "and", "or", "not", "in", "is", "if", "else", "lambda", "for", "async",
];

/// Parse expression text into a syntax tree
pub fn parse(input: &str) -> Result<Expr, TemplateError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(syntax("empty expression"));
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_top()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(syntax(format!("unexpected '{}'", token.describe()))),
    }
}

fn syntax(message: impl Into<String>) -> TemplateError {
    TemplateError::Syntax {
        message: message.into(),
    }
}

fn not_allowed(node: &str) -> TemplateError {
    TemplateError::NodeNotAllowed {
        node: node.to_string(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Name(name)) if name == keyword)
    }

    fn at_op(&self, op: &str) -> bool {
        matches!(self.peek(), Some(Token::Op(found)) if *found == op)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), TemplateError> {
        match self.advance() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(syntax(format!(
                "expected '{}' but found '{}'",
                expected.describe(),
                token.describe()
            ))),
            None => Err(syntax(format!(
                "expected '{}' but reached end of expression",
                expected.describe()
            ))),
        }
    }

    fn enter(&mut self) -> Result<(), TemplateError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(syntax("expression is nested too deeply"));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Top level accepts a bare tuple (`1, 2`)
    fn parse_top(&mut self) -> Result<Expr, TemplateError> {
        let first = self.parse_expr()?;
        if !matches!(self.peek(), Some(Token::Comma)) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.peek().is_none() {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(Expr::TupleLit(items))
    }

    fn parse_expr(&mut self) -> Result<Expr, TemplateError> {
        self.enter()?;
        let result = self.parse_ternary();
        self.leave();
        result
    }

    fn parse_ternary(&mut self) -> Result<Expr, TemplateError> {
        if self.at_keyword("lambda") {
            return Err(not_allowed("Lambda"));
        }
        let body = self.parse_or()?;
        if self.at_op(":=") {
            return Err(not_allowed("NamedExpr"));
        }
        if !self.eat_keyword("if") {
            return Ok(body);
        }
        let test = self.parse_or()?;
        if !self.eat_keyword("else") {
            return Err(syntax("expected 'else' in conditional expression"));
        }
        let orelse = self.parse_expr()?;
        Ok(Expr::Ternary {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn parse_or(&mut self) -> Result<Expr, TemplateError> {
        let first = self.parse_and()?;
        if !self.at_keyword("or") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("or") {
            values.push(self.parse_and()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::Or,
            values,
        })
    }

    fn parse_and(&mut self) -> Result<Expr, TemplateError> {
        let first = self.parse_not()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.eat_keyword("and") {
            values.push(self.parse_not()?);
        }
        Ok(Expr::BoolOp {
            op: BoolOp::And,
            values,
        })
    }

    fn parse_not(&mut self) -> Result<Expr, TemplateError> {
        if self.eat_keyword("not") {
            self.enter()?;
            let operand = self.parse_not();
            self.leave();
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand?),
            });
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CompareOp> {
        let op = match self.peek()? {
            Token::Op("==") => CompareOp::Eq,
            Token::Op("!=") => CompareOp::NotEq,
            Token::Op("<") => CompareOp::Lt,
            Token::Op("<=") => CompareOp::LtE,
            Token::Op(">") => CompareOp::Gt,
            Token::Op(">=") => CompareOp::GtE,
            Token::Name(name) if name == "in" => CompareOp::In,
            Token::Name(name) if name == "is" => {
                if matches!(self.peek_at(1), Some(Token::Name(next)) if next == "not") {
                    self.pos += 2;
                    return Some(CompareOp::IsNot);
                }
                CompareOp::Is
            }
            Token::Name(name) if name == "not" => {
                if matches!(self.peek_at(1), Some(Token::Name(next)) if next == "in") {
                    self.pos += 2;
                    return Some(CompareOp::NotIn);
                }
                return None;
            }
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_comparison(&mut self) -> Result<Expr, TemplateError> {
        let left = self.parse_bitor()?;
        let mut comparisons = Vec::new();
        while let Some(op) = self.comparison_op() {
            comparisons.push((op, self.parse_bitor()?));
        }
        if comparisons.is_empty() {
            Ok(left)
        } else {
            Ok(Expr::Compare {
                left: Box::new(left),
                comparisons,
            })
        }
    }

    fn parse_binary_level(
        &mut self,
        ops: &[&str],
        next: fn(&mut Self) -> Result<Expr, TemplateError>,
    ) -> Result<Expr, TemplateError> {
        let mut left = next(self)?;
        loop {
            let op = match self.peek() {
                Some(Token::Op(symbol)) if ops.contains(symbol) => *symbol,
                _ => break,
            };
            self.pos += 1;
            let right = next(self)?;
            let op = BinaryOp::from_symbol(op).ok_or_else(|| not_allowed(op))?;
            left = Expr::BinaryOp {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_bitor(&mut self) -> Result<Expr, TemplateError> {
        self.parse_binary_level(&["|"], Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> Result<Expr, TemplateError> {
        self.parse_binary_level(&["^"], Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> Result<Expr, TemplateError> {
        self.parse_binary_level(&["&"], Self::parse_shift)
    }

    fn parse_shift(&mut self) -> Result<Expr, TemplateError> {
        self.parse_binary_level(&["<<", ">>"], Self::parse_arith)
    }

    fn parse_arith(&mut self) -> Result<Expr, TemplateError> {
        self.parse_binary_level(&["+", "-"], Self::parse_term)
    }

    fn parse_term(&mut self) -> Result<Expr, TemplateError> {
        if self.at_op("@") {
            return Err(not_allowed("MatMult"));
        }
        let expr = self.parse_binary_level(&["*", "/", "//", "%"], Self::parse_factor)?;
        if self.at_op("@") {
            return Err(not_allowed("MatMult"));
        }
        Ok(expr)
    }

    fn parse_factor(&mut self) -> Result<Expr, TemplateError> {
        let op = match self.peek() {
            Some(Token::Op("+")) => UnaryOp::Pos,
            Some(Token::Op("-")) => UnaryOp::Neg,
            Some(Token::Op("~")) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.parse_factor();
        self.leave();
        Ok(Expr::UnaryOp {
            op,
            operand: Box::new(operand?),
        })
    }

    fn parse_power(&mut self) -> Result<Expr, TemplateError> {
        let base = self.parse_postfix()?;
        if !self.at_op("**") {
            return Ok(base);
        }
        self.pos += 1;
        self.enter()?;
        let exponent = self.parse_factor();
        self.leave();
        Ok(Expr::BinaryOp {
            op: BinaryOp::Pow,
            left: Box::new(base),
            right: Box::new(exponent?),
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, TemplateError> {
        let atom = self.parse_atom()?;
        match self.peek() {
            Some(Token::Dot) => Err(not_allowed("Attribute")),
            Some(Token::LBracket) => Err(not_allowed("Subscript")),
            Some(Token::LParen) => Err(TemplateError::NodeNotAllowed {
                node: format!("Call on {}", atom.kind()),
            }),
            _ => Ok(atom),
        }
    }

    fn parse_atom(&mut self) -> Result<Expr, TemplateError> {
        let Some(token) = self.advance() else {
            return Err(syntax("unexpected end of expression"));
        };
        match token {
            Token::Int(i) => Ok(Expr::Literal(Value::Integer(i))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(mut text) => {
                // Adjacent string literals concatenate.
                while let Some(Token::Str(next)) = self.peek() {
                    text.push_str(next);
                    self.pos += 1;
                }
                Ok(Expr::Literal(Value::String(text)))
            }
            Token::Name(name) => self.parse_name(name),
            Token::LParen => self.parse_paren(),
            Token::LBracket => self.parse_list(),
            Token::LBrace => self.parse_map(),
            Token::Op("*" | "**") => Err(not_allowed("Starred")),
            Token::Op(":=") => Err(not_allowed("NamedExpr")),
            other => Err(syntax(format!("unexpected '{}'", other.describe()))),
        }
    }

    fn parse_name(&mut self, name: String) -> Result<Expr, TemplateError> {
        match name.as_str() {
            "True" => return Ok(Expr::Literal(Value::Bool(true))),
            "False" => return Ok(Expr::Literal(Value::Bool(false))),
            "None" => return Ok(Expr::Literal(Value::Null)),
            "lambda" => return Err(not_allowed("Lambda")),
            keyword if KEYWORDS.contains(&keyword) => {
                return Err(syntax(format!("unexpected keyword '{keyword}'")));
            }
            _ => {}
        }

        if !matches!(self.peek(), Some(Token::LParen)) {
            if matches!(self.peek(), Some(Token::Dot)) {
                return Err(not_allowed("Attribute"));
            }
            return Err(TemplateError::NameNotAllowed { name });
        }
        if !builtins::is_allowed(&name) {
            return Err(TemplateError::FunctionNotAllowed { name });
        }
        self.pos += 1;
        self.parse_call(name)
    }

    fn parse_call(&mut self, func: String) -> Result<Expr, TemplateError> {
        let mut args = Vec::new();
        loop {
            if self.eat(&Token::RParen) {
                break;
            }
            match (self.peek(), self.peek_at(1)) {
                (Some(Token::Name(_)), Some(Token::Assign)) | (Some(Token::Op("**")), _) => {
                    return Err(TemplateError::KeywordArguments { name: func });
                }
                (Some(Token::Op("*")), _) => return Err(not_allowed("Starred")),
                _ => {}
            }
            args.push(self.parse_expr()?);
            if self.at_keyword("for") {
                return Err(not_allowed("GeneratorExp"));
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(Expr::Call { func, args })
    }

    fn parse_paren(&mut self) -> Result<Expr, TemplateError> {
        if self.eat(&Token::RParen) {
            return Ok(Expr::TupleLit(Vec::new()));
        }
        let first = self.parse_expr()?;
        if self.at_keyword("for") {
            return Err(not_allowed("GeneratorExp"));
        }
        if self.eat(&Token::RParen) {
            return Ok(first);
        }
        self.expect(&Token::Comma)?;
        let mut items = vec![first];
        while !self.eat(&Token::RParen) {
            items.push(self.parse_expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RParen)?;
                break;
            }
        }
        Ok(Expr::TupleLit(items))
    }

    fn parse_list(&mut self) -> Result<Expr, TemplateError> {
        let mut items = Vec::new();
        while !self.eat(&Token::RBracket) {
            if self.at_op("*") {
                return Err(not_allowed("Starred"));
            }
            items.push(self.parse_expr()?);
            if self.at_keyword("for") {
                return Err(not_allowed("ListComp"));
            }
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBracket)?;
                break;
            }
        }
        Ok(Expr::ListLit(items))
    }

    fn parse_map(&mut self) -> Result<Expr, TemplateError> {
        let mut entries = Vec::new();
        while !self.eat(&Token::RBrace) {
            if self.at_op("**") {
                return Err(not_allowed("DictUnpack"));
            }
            let key = self.parse_expr()?;
            if self.at_keyword("for") {
                return Err(not_allowed("Comprehension"));
            }
            if matches!(self.peek(), Some(Token::Comma | Token::RBrace)) {
                return Err(not_allowed("Set"));
            }
            self.expect(&Token::Colon)?;
            let value = self.parse_expr()?;
            if self.at_keyword("for") {
                return Err(not_allowed("DictComp"));
            }
            entries.push((key, value));
            if !self.eat(&Token::Comma) {
                self.expect(&Token::RBrace)?;
                break;
            }
        }
        Ok(Expr::MapLit(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Expr {
        Expr::Literal(Value::Integer(i))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            Expr::BinaryOp {
                op: BinaryOp::Add,
                left: Box::new(int(1)),
                right: Box::new(Expr::BinaryOp {
                    op: BinaryOp::Mul,
                    left: Box::new(int(2)),
                    right: Box::new(int(3)),
                }),
            }
        );
    }

    #[test]
    fn test_power_binds_tighter_than_unary_minus() {
        let expr = parse("-2 ** 2").unwrap();
        assert!(matches!(expr, Expr::UnaryOp { op: UnaryOp::Neg, .. }));
        assert_eq!(expr.to_string(), "(-(2 ** 2))");
    }

    #[test]
    fn test_power_is_right_associative() {
        assert_eq!(parse("2 ** 3 ** 2").unwrap().to_string(), "(2 ** (3 ** 2))");
    }

    #[test]
    fn test_chained_comparison() {
        let expr = parse("1 < 2 <= 3 not in [4]").unwrap();
        let Expr::Compare { comparisons, .. } = expr else {
            panic!("expected comparison");
        };
        let ops: Vec<CompareOp> = comparisons.iter().map(|(op, _)| *op).collect();
        assert_eq!(ops, vec![CompareOp::Lt, CompareOp::LtE, CompareOp::NotIn]);
    }

    #[test]
    fn test_ternary_and_bool_ops() {
        let expr = parse("'a' if not x == 1 or True else 'b'");
        // bare name inside condition is rejected
        assert!(matches!(
            expr.unwrap_err(),
            TemplateError::NameNotAllowed { ref name } if name == "x"
        ));
        let expr = parse("'a' if 1 == 1 and not False else 'b'").unwrap();
        assert!(matches!(expr, Expr::Ternary { .. }));
    }

    #[test]
    fn test_containers() {
        assert_eq!(parse("[1, 2,]").unwrap(), Expr::ListLit(vec![int(1), int(2)]));
        assert_eq!(parse("(1,)").unwrap(), Expr::TupleLit(vec![int(1)]));
        assert_eq!(parse("()").unwrap(), Expr::TupleLit(vec![]));
        assert_eq!(parse("(1)").unwrap(), int(1));
        assert!(matches!(parse("{'a': 1}").unwrap(), Expr::MapLit(ref e) if e.len() == 1));
        assert_eq!(parse("1, 2").unwrap(), Expr::TupleLit(vec![int(1), int(2)]));
    }

    #[test]
    fn test_rejects_disallowed_nodes() {
        let cases = [
            ("'a'.upper()", "Attribute"),
            ("[1][0]", "Subscript"),
            ("lambda: 1", "Lambda"),
            ("[1 for x in []]", "ListComp"),
            ("{1, 2}", "Set"),
            ("[*[1]]", "Starred"),
            ("1 @ 2", "MatMult"),
        ];
        for (text, node) in cases {
            match parse(text) {
                Err(TemplateError::NodeNotAllowed { node: found }) => {
                    assert_eq!(found, node, "for {text}");
                }
                other => panic!("unexpected result for {text}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_rejects_names_and_functions() {
        assert!(matches!(
            parse("some_name").unwrap_err(),
            TemplateError::NameNotAllowed { ref name } if name == "some_name"
        ));
        assert!(matches!(
            parse("eval(1)").unwrap_err(),
            TemplateError::FunctionNotAllowed { ref name } if name == "eval"
        ));
        assert!(matches!(
            parse("int(x=1)").unwrap_err(),
            TemplateError::KeywordArguments { ref name } if name == "int"
        ));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("").unwrap_err(), TemplateError::Syntax { .. }));
        assert!(matches!(parse("1 +").unwrap_err(), TemplateError::Syntax { .. }));
        assert!(matches!(parse("(1").unwrap_err(), TemplateError::Syntax { .. }));
        assert!(matches!(parse("1 2").unwrap_err(), TemplateError::Syntax { .. }));
        assert!(matches!(
            parse("1 if True").unwrap_err(),
            TemplateError::Syntax { .. }
        ));
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let text = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(matches!(parse(&text).unwrap_err(), TemplateError::Syntax { .. }));
    }
}
