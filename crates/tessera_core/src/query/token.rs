//! Predicate tokens.

use std::fmt;

use tessera_codec::{ObjectId, Uuid};

/// A single token with the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

/// Token discriminant.
///
/// Keywords are not lexed separately: an identifier is a keyword or a
/// property name depending on where the parser meets it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TokenKind {
    /// Identifier or keyword.
    Ident(String),
    /// `@count`, `@links`, ... (without the `@`).
    At(String),
    /// Numeric literal as written. `float` is set when it has a fraction or
    /// exponent.
    Number { text: String, float: bool },
    /// Quoted string with escapes resolved.
    String(String),
    /// `$N`.
    Arg(usize),
    /// `T<sec>:<nanos>` or `YYYY-MM-DD@HH:MM:SS[:NANOS]`, already split into
    /// seconds and nanoseconds.
    Timestamp { seconds: i64, nanos: i64 },
    /// `B64"..."` decoded.
    Base64(Vec<u8>),
    /// `oid(...)`.
    ObjectId(ObjectId),
    /// `uuid(...)`.
    Uuid(Uuid),

    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Dot,
    /// `[c]`.
    CaseInsensitive,

    Eof,
}

impl TokenKind {
    /// Whether this is the identifier `word`, ignoring case.
    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(self, TokenKind::Ident(s) if s.eq_ignore_ascii_case(word))
    }

    /// Name used in "unexpected ..." syntax errors.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Ident(_) => "identifier",
            TokenKind::At(_) => "aggregate",
            TokenKind::Number { .. } => "number",
            TokenKind::String(_) => "string",
            TokenKind::Arg(_) => "argument",
            TokenKind::Timestamp { .. } => "timestamp",
            TokenKind::Base64(_) => "base64",
            TokenKind::ObjectId(_) => "objectId",
            TokenKind::Uuid(_) => "uuid",
            TokenKind::Eof => "end of file",
            _ => "operator",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(s) => f.write_str(s),
            TokenKind::At(s) => write!(f, "@{s}"),
            TokenKind::Number { text, .. } => f.write_str(text),
            TokenKind::String(s) => write!(f, "'{s}'"),
            TokenKind::Arg(n) => write!(f, "${n}"),
            TokenKind::Timestamp { seconds, nanos } => write!(f, "T{seconds}:{nanos}"),
            TokenKind::Base64(_) => f.write_str("B64\"...\""),
            TokenKind::ObjectId(id) => write!(f, "oid({id})"),
            TokenKind::Uuid(u) => write!(f, "uuid({u})"),
            TokenKind::EqEq => f.write_str("=="),
            TokenKind::NotEq => f.write_str("!="),
            TokenKind::Lt => f.write_str("<"),
            TokenKind::LtEq => f.write_str("<="),
            TokenKind::Gt => f.write_str(">"),
            TokenKind::GtEq => f.write_str(">="),
            TokenKind::AndAnd => f.write_str("&&"),
            TokenKind::OrOr => f.write_str("||"),
            TokenKind::Bang => f.write_str("!"),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::LBrace => f.write_str("{"),
            TokenKind::RBrace => f.write_str("}"),
            TokenKind::LBracket => f.write_str("["),
            TokenKind::RBracket => f.write_str("]"),
            TokenKind::Comma => f.write_str(","),
            TokenKind::Dot => f.write_str("."),
            TokenKind::CaseInsensitive => f.write_str("[c]"),
            TokenKind::Eof => f.write_str("end of file"),
        }
    }
}
