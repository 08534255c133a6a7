//! Predicate lexer.
//!
//! Converts predicate text into tokens. Errors carry only the detail part
//! of the message; the parser wraps them into `Invalid predicate: ...`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::NaiveDate;
use tessera_codec::{ObjectId, Uuid};

use super::token::{Token, TokenKind};

/// Predicate lexer over one source string.
pub(crate) struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self { src: source, pos: 0 }
    }

    /// Tokenizes the whole input, ending with [`TokenKind::Eof`].
    pub fn tokenize(source: &str) -> Result<Vec<Token>, String> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if eof {
                return Ok(tokens);
            }
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Token, String> {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
        let offset = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset,
            });
        };

        let kind = match ch {
            '\'' | '"' => self.lex_string(ch)?,
            '0'..='9' => self.lex_number_or_date()?,
            '-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit() || c == '.') => {
                self.lex_number_or_date()?
            }
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number_or_date()?,
            '$' => self.lex_arg()?,
            '@' => {
                self.bump();
                let name = self.take_word();
                if name.is_empty() {
                    return Err("unexpected character '@'".into());
                }
                TokenKind::At(name.to_string())
            }
            'T' if self.looks_like_timestamp() => self.lex_timestamp()?,
            'B' if self.rest().starts_with("B64\"") => self.lex_base64()?,
            c if c.is_alphabetic() || c == '_' => self.lex_word()?,
            '=' => {
                self.bump();
                self.eat('=');
                TokenKind::EqEq
            }
            '!' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Bang
                }
            }
            '<' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::LtEq
                } else if self.eat('>') {
                    TokenKind::NotEq
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                self.bump();
                if self.eat('=') {
                    TokenKind::GtEq
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                self.bump();
                if !self.eat('&') {
                    return Err("unexpected character '&'".into());
                }
                TokenKind::AndAnd
            }
            '|' => {
                self.bump();
                if !self.eat('|') {
                    return Err("unexpected character '|'".into());
                }
                TokenKind::OrOr
            }
            '[' if matches!(self.peek_at(1), Some('c' | 'C')) && self.peek_at(2) == Some(']') => {
                self.pos += 3;
                TokenKind::CaseInsensitive
            }
            _ => {
                self.bump();
                match ch {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '{' => TokenKind::LBrace,
                    '}' => TokenKind::RBrace,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    ',' => TokenKind::Comma,
                    '.' => TokenKind::Dot,
                    other => return Err(format!("unexpected character '{other}'")),
                }
            }
        };
        Ok(Token { kind, offset })
    }

    fn take_word(&mut self) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn lex_word(&mut self) -> Result<TokenKind, String> {
        let word = self.take_word();
        if self.peek() == Some('(') {
            if word.eq_ignore_ascii_case("oid") {
                let inner = self.take_parenthesized()?;
                return inner
                    .parse::<ObjectId>()
                    .map(TokenKind::ObjectId)
                    .map_err(|_| format!("invalid object id '{inner}'"));
            }
            if word.eq_ignore_ascii_case("uuid") {
                let inner = self.take_parenthesized()?;
                return Uuid::parse_str(inner)
                    .map(TokenKind::Uuid)
                    .map_err(|_| format!("invalid uuid '{inner}'"));
            }
        }
        Ok(TokenKind::Ident(word.to_string()))
    }

    fn take_parenthesized(&mut self) -> Result<&'a str, String> {
        self.bump();
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == ')' {
                return Ok(self.src[start..self.pos - 1].trim());
            }
        }
        Err("unexpected end of file, expecting ')'".into())
    }

    fn lex_string(&mut self, quote: char) -> Result<TokenKind, String> {
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err("unterminated string".into()),
                Some(c) if c == quote => return Ok(TokenKind::String(out)),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some('r') => out.push('\r'),
                    Some('u') => {
                        let hex: String = (0..4).filter_map(|_| self.bump()).collect();
                        let ch = u32::from_str_radix(&hex, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| format!("invalid escape '\\u{hex}'"))?;
                        out.push(ch);
                    }
                    Some(c) => out.push(c),
                    None => return Err("unterminated string".into()),
                },
                Some(c) => out.push(c),
            }
        }
    }

    fn lex_number_or_date(&mut self) -> Result<TokenKind, String> {
        let start = self.pos;
        if self.looks_like_date() {
            return self.lex_date();
        }
        self.eat('-');
        let mut float = false;
        if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            self.pos += 2;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let text = &self.src[start..self.pos];
            let digits = text.trim_start_matches('-').trim_start_matches("0x").trim_start_matches("0X");
            let value = i64::from_str_radix(digits, 16).map_err(|_| format!("invalid number '{text}'"))?;
            let value = if text.starts_with('-') { -value } else { value };
            return Ok(TokenKind::Number {
                text: value.to_string(),
                float: false,
            });
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.peek(), Some('e' | 'E'))
            && (self.peek_at(1).is_some_and(|c| c.is_ascii_digit())
                || (matches!(self.peek_at(1), Some('+' | '-'))
                    && self.peek_at(2).is_some_and(|c| c.is_ascii_digit())))
        {
            float = true;
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        Ok(TokenKind::Number {
            text: self.src[start..self.pos].to_string(),
            float,
        })
    }

    fn lex_arg(&mut self) -> Result<TokenKind, String> {
        self.bump();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        self.src[start..self.pos]
            .parse()
            .map(TokenKind::Arg)
            .map_err(|_| "unexpected character '$'".to_string())
    }

    /// `T<sec>:<nanos>`, as opposed to an identifier starting with `T`.
    fn looks_like_timestamp(&self) -> bool {
        let body = &self.rest()[1..];
        let body = body.strip_prefix('-').unwrap_or(body);
        let digits = body.chars().take_while(char::is_ascii_digit).count();
        digits > 0 && body[digits..].starts_with(':')
    }

    fn lex_timestamp(&mut self) -> Result<TokenKind, String> {
        self.bump();
        let seconds = self.signed_int()?;
        self.eat(':');
        let nanos = self.signed_int()?;
        if (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0) {
            return Err("timestamp seconds and nanoseconds must have the same sign".into());
        }
        Ok(TokenKind::Timestamp { seconds, nanos })
    }

    fn signed_int(&mut self) -> Result<i64, String> {
        let start = self.pos;
        self.eat('-');
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let text = &self.src[start..self.pos];
        text.parse().map_err(|_| format!("invalid number '{text}'"))
    }

    /// `YYYY-MM-DD@...` (the `@` distinguishes it from subtraction-free
    /// numbers).
    fn looks_like_date(&self) -> bool {
        let body = self.rest().strip_prefix('-').unwrap_or(self.rest());
        let digits = body.chars().take_while(char::is_ascii_digit).count();
        digits >= 1
            && body[digits..].starts_with('-')
            && body.find('@').is_some_and(|at| {
                body[digits..at]
                    .chars()
                    .all(|c| c.is_ascii_digit() || c == '-')
            })
    }

    fn lex_date(&mut self) -> Result<TokenKind, String> {
        let start = self.pos;
        let negative_year = self.eat('-');
        let year = self.signed_int()?;
        let year = if negative_year { -year } else { year };
        let mut fields = [0i64; 5];
        let separators = ['-', '-', '@', ':', ':'];
        for (i, sep) in separators.iter().enumerate() {
            if !self.eat(*sep) {
                return Err(format!("invalid timestamp '{}'", &self.src[start..self.pos]));
            }
            fields[i] = self.signed_int()?;
        }
        let nanos = if self.eat(':') { self.signed_int()? } else { 0 };
        let text = &self.src[start..self.pos];
        let invalid = || format!("invalid timestamp '{text}'");
        let [month, day, hour, minute, second] = fields;
        let date = NaiveDate::from_ymd_opt(
            i32::try_from(year).map_err(|_| invalid())?,
            u32::try_from(month).map_err(|_| invalid())?,
            u32::try_from(day).map_err(|_| invalid())?,
        )
        .and_then(|d| {
            d.and_hms_opt(
                u32::try_from(hour).ok()?,
                u32::try_from(minute).ok()?,
                u32::try_from(second).ok()?,
            )
        })
        .ok_or_else(invalid)?;
        Ok(TokenKind::Timestamp {
            seconds: date.and_utc().timestamp(),
            nanos,
        })
    }

    fn lex_base64(&mut self) -> Result<TokenKind, String> {
        self.pos += 4;
        let start = self.pos;
        while let Some(c) = self.bump() {
            if c == '"' {
                let text = &self.src[start..self.pos - 1];
                return STANDARD
                    .decode(text)
                    .map(TokenKind::Base64)
                    .map_err(|_| format!("invalid base64 '{text}'"));
            }
        }
        Err("unterminated base64 literal".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn ident(s: &str) -> TokenKind {
        TokenKind::Ident(s.into())
    }

    fn int(s: &str) -> TokenKind {
        TokenKind::Number {
            text: s.into(),
            float: false,
        }
    }

    #[test]
    fn comparison() {
        assert_eq!(
            kinds("age >= 10 && name ==[c] 'Bob'"),
            vec![
                ident("age"),
                TokenKind::GtEq,
                int("10"),
                TokenKind::AndAnd,
                ident("name"),
                TokenKind::EqEq,
                TokenKind::CaseInsensitive,
                TokenKind::String("Bob".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn operators_and_synonyms() {
        assert_eq!(
            kinds("a = 1 <> ! != <"),
            vec![
                ident("a"),
                TokenKind::EqEq,
                int("1"),
                TokenKind::NotEq,
                TokenKind::Bang,
                TokenKind::NotEq,
                TokenKind::Lt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn numbers_keep_sign_and_kind() {
        assert_eq!(
            kinds("-45 -10.2 1e3 0x1F"),
            vec![
                int("-45"),
                TokenKind::Number {
                    text: "-10.2".into(),
                    float: true
                },
                TokenKind::Number {
                    text: "1e3".into(),
                    float: true
                },
                int("31"),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn arguments_and_aggregates() {
        assert_eq!(
            kinds("list.@count == $0"),
            vec![
                ident("list"),
                TokenKind::Dot,
                TokenKind::At("count".into()),
                TokenKind::EqEq,
                TokenKind::Arg(0),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn timestamps() {
        assert_eq!(
            kinds("T10:5 2017-12-04@00:00:01:7")[..2],
            [
                TokenKind::Timestamp {
                    seconds: 10,
                    nanos: 5
                },
                TokenKind::Timestamp {
                    seconds: 1_512_345_601,
                    nanos: 7
                },
            ]
        );
        // An identifier starting with T is still an identifier.
        assert_eq!(kinds("Title")[0], ident("Title"));
    }

    #[test]
    fn typed_literals() {
        let toks = kinds("oid(507f1f77bcf86cd799439011) uuid(a4078b20-7b0c-4de4-929c-4cc1c7d8345f) B64\"AQI=\"");
        assert!(matches!(toks[0], TokenKind::ObjectId(_)));
        assert!(matches!(toks[1], TokenKind::Uuid(_)));
        assert_eq!(toks[2], TokenKind::Base64(vec![1, 2]));
    }

    #[test]
    fn strings_with_escapes() {
        assert_eq!(
            kinds(r#""a\"b" 'c\'d'"#)[..2],
            [TokenKind::String("a\"b".into()), TokenKind::String("c'd".into())]
        );
    }

    #[test]
    fn bad_character() {
        assert_eq!(Lexer::tokenize("a # b").unwrap_err(), "unexpected character '#'");
        assert!(Lexer::tokenize("'open").is_err());
    }
}
