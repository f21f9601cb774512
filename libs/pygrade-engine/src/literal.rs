// Tagged literal parser for printed values
//
// Accepts JSON syntax plus the Python tokens True/False/None and a single
// trailing comma inside containers, which is what printed tuples, lists and
// dicts look like once brackets and quotes are normalized.

use thiserror::Error;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Integer in canonical decimal form, compared digit for digit
    Int(String),
    Number(f64),
    Str(String),
    Array(Vec<Literal>),
    /// Key/value pairs in printed order; equality ignores order
    Object(Vec<(Literal, Literal)>),
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Literal::Null, Literal::Null) => true,
            (Literal::Bool(a), Literal::Bool(b)) => a == b,
            (Literal::Int(a), Literal::Int(b)) => a == b,
            (Literal::Int(a), Literal::Number(b)) | (Literal::Number(b), Literal::Int(a)) => {
                a.parse::<f64>().is_ok_and(|a| a == *b)
            }
            (Literal::Number(a), Literal::Number(b)) => a == b,
            (Literal::Str(a), Literal::Str(b)) => a == b,
            (Literal::Array(a), Literal::Array(b)) => a == b,
            (Literal::Object(a), Literal::Object(b)) => {
                a.len() == b.len() && contains_all(a, b) && contains_all(b, a)
            }
            _ => false,
        }
    }
}

fn contains_all(entries: &[(Literal, Literal)], other: &[(Literal, Literal)]) -> bool {
    entries.iter().all(|(key, value)| {
        other
            .iter()
            .any(|(other_key, other_value)| key == other_key && value == other_value)
    })
}

/// Canonical decimal form of an integer token: no `+`, no leading zeros, no `-0`
fn canonical_int(text: &str) -> Option<String> {
    let (negative, digits) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        _ => (false, text),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits = digits.trim_start_matches('0');
    Some(match (negative, digits.is_empty()) {
        (_, true) => "0".to_string(),
        (true, false) => format!("-{}", digits),
        (false, false) => digits.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct LiteralError {
    pub position: usize,
    pub message: String,
}

/// Parse a complete literal; trailing input is an error
pub fn parse_literal(text: &str) -> Result<Literal, LiteralError> {
    let mut parser = Parser {
        chars: text.chars().collect(),
        pos: 0,
    };
    parser.skip_whitespace();
    let value = parser.parse_value(0)?;
    parser.skip_whitespace();
    if parser.pos != parser.chars.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn error(&self, message: &str) -> LiteralError {
        LiteralError {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn expect(&mut self, expected: char) -> Result<(), LiteralError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(&format!("expected '{}'", expected))),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        if depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }

        match self.peek() {
            Some('[') => self.parse_array(depth),
            Some('{') => self.parse_object(depth),
            Some('"') => self.parse_string().map(Literal::Str),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                self.parse_number()
            }
            Some(c) if c.is_ascii_alphabetic() => self.parse_keyword(),
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Parses `open item (, item)* [,] close`, calling `item` for each element
    fn parse_sequence<F>(&mut self, open: char, close: char, mut item: F) -> Result<(), LiteralError>
    where
        F: FnMut(&mut Self) -> Result<(), LiteralError>,
    {
        self.expect(open)?;
        self.skip_whitespace();
        if self.peek() == Some(close) {
            self.pos += 1;
            return Ok(());
        }

        loop {
            item(self)?;
            self.skip_whitespace();
            match self.bump() {
                Some(',') => {
                    self.skip_whitespace();
                    if self.peek() == Some(close) {
                        self.pos += 1;
                        return Ok(());
                    }
                }
                Some(c) if c == close => return Ok(()),
                _ => return Err(self.error(&format!("expected ',' or '{}'", close))),
            }
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        let mut items = Vec::new();
        self.parse_sequence('[', ']', |parser| {
            items.push(parser.parse_value(depth + 1)?);
            Ok(())
        })?;
        Ok(Literal::Array(items))
    }

    fn parse_object(&mut self, depth: usize) -> Result<Literal, LiteralError> {
        let mut entries = Vec::new();
        self.parse_sequence('{', '}', |parser| {
            let key = parser.parse_value(depth + 1)?;
            parser.skip_whitespace();
            parser.expect(':')?;
            parser.skip_whitespace();
            let value = parser.parse_value(depth + 1)?;
            entries.push((key, value));
            Ok(())
        })?;
        Ok(Literal::Object(entries))
    }

    fn parse_string(&mut self) -> Result<String, LiteralError> {
        self.expect('"')?;
        let mut out = String::new();

        loop {
            match self.bump() {
                None => return Err(self.error("unterminated string")),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('b') => '\u{8}',
                        Some('f') => '\u{c}',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.parse_unicode_escape()?,
                        _ => return Err(self.error("invalid escape")),
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_unicode_escape(&mut self) -> Result<char, LiteralError> {
        let mut code = 0u32;
        for _ in 0..4 {
            let digit = self
                .bump()
                .and_then(|c| c.to_digit(16))
                .ok_or_else(|| self.error("invalid unicode escape"))?;
            code = code * 16 + digit;
        }
        char::from_u32(code).ok_or_else(|| self.error("invalid unicode code point"))
    }

    fn parse_number(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'))
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        if let Some(int) = canonical_int(&text) {
            return Ok(Literal::Int(int));
        }
        text.parse::<f64>()
            .map(Literal::Number)
            .map_err(|_| LiteralError {
                position: start,
                message: format!("invalid number '{}'", text),
            })
    }

    fn parse_keyword(&mut self) -> Result<Literal, LiteralError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == '_') {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match word.as_str() {
            "True" | "true" => Ok(Literal::Bool(true)),
            "False" | "false" => Ok(Literal::Bool(false)),
            "None" | "null" => Ok(Literal::Null),
            _ => Err(LiteralError {
                position: start,
                message: format!("unknown token '{}'", word),
            }),
        }
    }
}
