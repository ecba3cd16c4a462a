//! Expression tokenizer

use crate::error::TemplateError;

/// A lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    Op(&'static str),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Assign,
}

impl Token {
    /// Short description for syntax errors
    pub fn describe(&self) -> String {
        match self {
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Str(s) => format!("'{s}'"),
            Self::Name(n) => n.clone(),
            Self::Op(op) => (*op).to_string(),
            Self::LParen => "(".into(),
            Self::RParen => ")".into(),
            Self::LBracket => "[".into(),
            Self::RBracket => "]".into(),
            Self::LBrace => "{".into(),
            Self::RBrace => "}".into(),
            Self::Comma => ",".into(),
            Self::Colon => ":".into(),
            Self::Dot => ".".into(),
            Self::Assign => "=".into(),
        }
    }
}

// Longest operators first so `**` wins over `*`.
const OPERATORS: [&str; 21] = [
    "**", "//", "<<", ">>", "==", "!=", "<=", ">=", ":=", "+", "-", "*", "/", "%", "&", "|", "^",
    "~", "<", ">", "@",
];

/// Split expression text into tokens
pub fn tokenize(input: &str) -> Result<Vec<Token>, TemplateError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(char::is_ascii_digit))
        {
            let (token, next) = lex_number(&chars, pos)?;
            tokens.push(token);
            pos = next;
            continue;
        }

        if c == '\'' || c == '"' {
            let (text, next) = lex_string(&chars, pos)?;
            tokens.push(Token::Str(text));
            pos = next;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = pos;
            while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                pos += 1;
            }
            tokens.push(Token::Name(chars[start..pos].iter().collect()));
            continue;
        }

        let simple = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            ',' => Some(Token::Comma),
            '.' => Some(Token::Dot),
            _ => None,
        };
        if let Some(token) = simple {
            tokens.push(token);
            pos += 1;
            continue;
        }

        if let Some(op) = OPERATORS.iter().find(|op| matches_at(&chars, pos, op)) {
            tokens.push(Token::Op(*op));
            pos += op.len();
            continue;
        }

        match c {
            ':' => tokens.push(Token::Colon),
            '=' => tokens.push(Token::Assign),
            other => {
                return Err(TemplateError::Syntax {
                    message: format!("unexpected character '{other}'"),
                })
            }
        }
        pos += 1;
    }

    Ok(tokens)
}

fn matches_at(chars: &[char], pos: usize, op: &str) -> bool {
    op.chars()
        .enumerate()
        .all(|(i, expected)| chars.get(pos + i) == Some(&expected))
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), TemplateError> {
    let mut pos = start;
    let mut is_float = false;
    let digits = |pos: &mut usize| {
        while *pos < chars.len() && (chars[*pos].is_ascii_digit() || chars[*pos] == '_') {
            *pos += 1;
        }
    };

    digits(&mut pos);
    if pos < chars.len() && chars[pos] == '.' {
        is_float = true;
        pos += 1;
        digits(&mut pos);
    }
    if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
        let mut look = pos + 1;
        if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
            look += 1;
        }
        if look < chars.len() && chars[look].is_ascii_digit() {
            is_float = true;
            pos = look;
            digits(&mut pos);
        }
    }

    let text: String = chars[start..pos].iter().filter(|c| **c != '_').collect();
    if pos < chars.len() && (chars[pos].is_alphabetic() || chars[pos] == '_') {
        return Err(TemplateError::Syntax {
            message: format!("invalid number literal '{text}{}'", chars[pos]),
        });
    }

    let token = if is_float {
        text.parse::<f64>().map(Token::Float).map_err(|e| TemplateError::Syntax {
            message: format!("invalid float literal '{text}': {e}"),
        })?
    } else {
        text.parse::<i64>().map(Token::Int).map_err(|e| TemplateError::Syntax {
            message: format!("invalid integer literal '{text}': {e}"),
        })?
    };
    Ok((token, pos))
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), TemplateError> {
    let quote = chars[start];
    let mut pos = start + 1;
    let mut text = String::new();

    while pos < chars.len() {
        let c = chars[pos];
        if c == quote {
            return Ok((text, pos + 1));
        }
        if c == '\n' {
            break;
        }
        if c != '\\' {
            text.push(c);
            pos += 1;
            continue;
        }

        let Some(&escaped) = chars.get(pos + 1) else {
            break;
        };
        pos += 2;
        match escaped {
            'n' => text.push('\n'),
            't' => text.push('\t'),
            'r' => text.push('\r'),
            '0' => text.push('\0'),
            '\\' => text.push('\\'),
            '\'' => text.push('\''),
            '"' => text.push('"'),
            'x' => {
                text.push(hex_escape(chars, pos, 2)?);
                pos += 2;
            }
            'u' => {
                text.push(hex_escape(chars, pos, 4)?);
                pos += 4;
            }
            other => {
                // Unknown escapes are kept verbatim.
                text.push('\\');
                text.push(other);
            }
        }
    }

    Err(TemplateError::Syntax {
        message: "unterminated string literal".to_string(),
    })
}

fn hex_escape(chars: &[char], pos: usize, len: usize) -> Result<char, TemplateError> {
    let digits: String = chars.iter().skip(pos).take(len).collect();
    let invalid = || TemplateError::Syntax {
        message: format!("invalid escape sequence '{digits}'"),
    };
    if digits.len() != len {
        return Err(invalid());
    }
    u32::from_str_radix(&digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(invalid)
}
