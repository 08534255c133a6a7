//! Recursive-descent predicate parser.
//!
//! ```text
//! query      := or modifier*
//! or         := and (("OR" | "||") and)*
//! and        := not (("AND" | "&&") not)*
//! not        := ("NOT" | "!") not | atom
//! atom       := "(" or ")" | TRUEPREDICATE | FALSEPREDICATE | comparison
//! comparison := [ANY | SOME | ALL | NONE] operand op ["[c]"] operand
//! modifier   := SORT(path dir, ...) | DISTINCT(path, ...) | LIMIT(n)
//! ```

use tessera_codec::{Timestamp, Value};

use super::ast::{
    Comparison, GeoLiteral, GeoNumber, GeoPair, Operand, Operator, ParsedModifier, ParsedQuery,
    Predicate, Quantifier, Segment,
};
use super::lexer::Lexer;
use super::token::{Token, TokenKind};
use crate::error::{CoreError, CoreResult};

/// Parses `source` into a [`ParsedQuery`].
///
/// # Errors
///
/// `Invalid predicate: '<source>': syntax error, ...` on malformed input.
pub(crate) fn parse(source: &str) -> CoreResult<ParsedQuery> {
    let wrap = |detail: String| {
        CoreError::query(format!("Invalid predicate: '{source}': syntax error, {detail}"))
    };
    let tokens = Lexer::tokenize(source).map_err(wrap)?;
    Parser::new(tokens).parse_query().map_err(wrap)
}

type ParseResult<T> = Result<T, String>;

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &TokenKind {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + n)
            .or_else(|| self.tokens.last())
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn check(&self, kind: &TokenKind) -> bool {
        self.peek() == kind
    }

    fn check_kw(&self, word: &str) -> bool {
        self.peek().is_keyword(word)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_kw(&mut self, word: &str) -> bool {
        if self.check_kw(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind) -> ParseResult<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(self.err_expected(&format!("'{kind}'")))
        }
    }

    fn err_unexpected(&self) -> String {
        format!("unexpected {}", self.peek().describe())
    }

    fn err_expected(&self, what: &str) -> String {
        format!("unexpected {}, expecting {what}", self.peek().describe())
    }

    fn parse_query(mut self) -> ParseResult<ParsedQuery> {
        let predicate = self.parse_or()?;
        let mut modifiers = Vec::new();
        loop {
            if self.check_kw("SORT") && self.peek_nth(1) == &TokenKind::LParen {
                self.advance();
                modifiers.push(self.parse_sort()?);
            } else if self.check_kw("DISTINCT") && self.peek_nth(1) == &TokenKind::LParen {
                self.advance();
                modifiers.push(self.parse_distinct()?);
            } else if self.check_kw("LIMIT") && self.peek_nth(1) == &TokenKind::LParen {
                self.advance();
                modifiers.push(self.parse_limit()?);
            } else {
                break;
            }
        }
        if !self.check(&TokenKind::Eof) {
            return Err(self.err_unexpected());
        }
        Ok(ParsedQuery {
            predicate,
            modifiers,
        })
    }

    fn parse_or(&mut self) -> ParseResult<Predicate> {
        let mut left = self.parse_and()?;
        while self.eat(&TokenKind::OrOr) || self.eat_kw("OR") {
            let right = self.parse_and()?;
            left = Predicate::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Predicate> {
        let mut left = self.parse_not()?;
        while self.eat(&TokenKind::AndAnd) || self.eat_kw("AND") {
            let right = self.parse_not()?;
            left = Predicate::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> ParseResult<Predicate> {
        if self.eat(&TokenKind::Bang) || self.eat_kw("NOT") {
            return Ok(Predicate::Not(Box::new(self.parse_not()?)));
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> ParseResult<Predicate> {
        if self.eat(&TokenKind::LParen) {
            let inner = self.parse_or()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(inner);
        }
        if self.eat_kw("TRUEPREDICATE") {
            return Ok(Predicate::True);
        }
        if self.eat_kw("FALSEPREDICATE") {
            return Ok(Predicate::False);
        }
        self.parse_comparison().map(Predicate::Compare)
    }

    fn parse_comparison(&mut self) -> ParseResult<Comparison> {
        let quantifier = if self.starts_quantifier() {
            let word = self.advance();
            Some(if word.is_keyword("ALL") {
                Quantifier::All
            } else if word.is_keyword("NONE") {
                Quantifier::None
            } else {
                Quantifier::Any
            })
        } else {
            None
        };
        let left = self.parse_operand()?;
        let op = self.parse_operator()?;
        let case_insensitive = self.eat(&TokenKind::CaseInsensitive);
        let right = self.parse_operand()?;
        Ok(Comparison {
            quantifier,
            left,
            op,
            case_insensitive,
            right,
        })
    }

    /// A quantifier keyword followed by something that can start a path.
    fn starts_quantifier(&self) -> bool {
        ["ANY", "SOME", "ALL", "NONE"].iter().any(|w| self.check_kw(w))
            && matches!(self.peek_nth(1), TokenKind::Ident(_) | TokenKind::At(_))
    }

    fn parse_operator(&mut self) -> ParseResult<Operator> {
        let op = match self.peek() {
            TokenKind::EqEq => Operator::Equal,
            TokenKind::NotEq => Operator::NotEqual,
            TokenKind::Lt => Operator::Less,
            TokenKind::LtEq => Operator::LessEqual,
            TokenKind::Gt => Operator::Greater,
            TokenKind::GtEq => Operator::GreaterEqual,
            TokenKind::Ident(word) => match word.to_ascii_uppercase().as_str() {
                "BEGINSWITH" => Operator::BeginsWith,
                "ENDSWITH" => Operator::EndsWith,
                "CONTAINS" => Operator::Contains,
                "LIKE" => Operator::Like,
                "IN" => Operator::In,
                "BETWEEN" => Operator::Between,
                "TEXT" => Operator::Text,
                "GEOWITHIN" => Operator::GeoWithin,
                _ => return Err(self.err_expected("operator")),
            },
            _ => return Err(self.err_expected("operator")),
        };
        self.advance();
        Ok(op)
    }

    fn parse_operand(&mut self) -> ParseResult<Operand> {
        match self.peek().clone() {
            TokenKind::Ident(word) => {
                let lower = word.to_ascii_lowercase();
                match lower.as_str() {
                    "true" => {
                        self.advance();
                        Ok(Operand::Literal(Value::Bool(true)))
                    }
                    "false" => {
                        self.advance();
                        Ok(Operand::Literal(Value::Bool(false)))
                    }
                    "null" | "nil" => {
                        self.advance();
                        Ok(Operand::Literal(Value::Null))
                    }
                    "geocircle" | "geobox" | "geopolygon"
                        if self.peek_nth(1) == &TokenKind::LParen =>
                    {
                        self.advance();
                        self.advance();
                        let geo = match lower.as_str() {
                            "geocircle" => self.parse_geo_circle()?,
                            "geobox" => self.parse_geo_box()?,
                            _ => self.parse_geo_polygon()?,
                        };
                        self.expect(&TokenKind::RParen)?;
                        Ok(Operand::Geo(geo))
                    }
                    _ => self.parse_path().map(Operand::Path),
                }
            }
            TokenKind::At(_) => self.parse_path().map(Operand::Path),
            TokenKind::Number { text, float } => {
                self.advance();
                number_literal(&text, float).map(Operand::Literal)
            }
            TokenKind::String(s) => {
                self.advance();
                Ok(Operand::Literal(Value::String(s)))
            }
            TokenKind::Arg(n) => {
                self.advance();
                Ok(Operand::Arg(n))
            }
            TokenKind::Timestamp { seconds, nanos } => {
                self.advance();
                Ok(Operand::Literal(Value::Date(Timestamp::new(seconds, nanos))))
            }
            TokenKind::Base64(bytes) => {
                self.advance();
                Ok(Operand::Literal(Value::Data(bytes)))
            }
            TokenKind::ObjectId(id) => {
                self.advance();
                Ok(Operand::Literal(Value::ObjectId(id)))
            }
            TokenKind::Uuid(u) => {
                self.advance();
                Ok(Operand::Literal(Value::Uuid(u)))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&TokenKind::RBrace) {
                    loop {
                        items.push(self.parse_operand()?);
                        if self.eat(&TokenKind::RBrace) {
                            break;
                        }
                        self.expect(&TokenKind::Comma)?;
                    }
                }
                Ok(Operand::List(items))
            }
            _ => Err(self.err_unexpected()),
        }
    }

    fn parse_path(&mut self) -> ParseResult<Vec<Segment>> {
        let mut segments = vec![self.parse_segment()?];
        while self.eat(&TokenKind::Dot) {
            segments.push(self.parse_segment()?);
        }
        Ok(segments)
    }

    fn parse_segment(&mut self) -> ParseResult<Segment> {
        let segment = match self.peek() {
            TokenKind::Ident(name) => Segment::Name(name.clone()),
            TokenKind::At(name) => Segment::At(name.to_ascii_lowercase()),
            _ => return Err(self.err_expected("identifier")),
        };
        self.advance();
        Ok(segment)
    }

    fn parse_geo_number(&mut self) -> ParseResult<GeoNumber> {
        let expecting = "natural0 or float or argument";
        match self.peek().clone() {
            TokenKind::Number { text, float } => {
                if !float && text.starts_with('-') {
                    return Err(self.err_expected(expecting));
                }
                self.advance();
                text.parse::<f64>()
                    .map(GeoNumber::Literal)
                    .map_err(|_| format!("invalid number '{text}'"))
            }
            TokenKind::Arg(n) => {
                self.advance();
                Ok(GeoNumber::Arg(n))
            }
            _ => Err(self.err_expected(expecting)),
        }
    }

    fn parse_geo_point(&mut self) -> ParseResult<Vec<GeoNumber>> {
        self.expect(&TokenKind::LBracket)?;
        let mut coords = vec![self.parse_geo_number()?];
        while self.eat(&TokenKind::Comma) {
            coords.push(self.parse_geo_number()?);
        }
        self.expect(&TokenKind::RBracket)?;
        Ok(coords)
    }

    fn parse_geo_pair(&mut self) -> ParseResult<GeoPair> {
        self.expect(&TokenKind::LBracket)?;
        let lng = self.parse_geo_number()?;
        self.expect(&TokenKind::Comma)?;
        let lat = self.parse_geo_number()?;
        self.expect(&TokenKind::RBracket)?;
        Ok((lng, lat))
    }

    fn parse_geo_circle(&mut self) -> ParseResult<GeoLiteral> {
        let center = self.parse_geo_point()?;
        self.expect(&TokenKind::Comma)?;
        let radius = self.parse_geo_number()?;
        Ok(GeoLiteral::Circle { center, radius })
    }

    fn parse_geo_box(&mut self) -> ParseResult<GeoLiteral> {
        let bottom_left = self.parse_geo_pair()?;
        self.expect(&TokenKind::Comma)?;
        let top_right = self.parse_geo_pair()?;
        Ok(GeoLiteral::Box {
            bottom_left,
            top_right,
        })
    }

    fn parse_geo_polygon(&mut self) -> ParseResult<GeoLiteral> {
        let mut rings = Vec::new();
        loop {
            self.expect(&TokenKind::LBrace)?;
            let mut ring = vec![self.parse_geo_pair()?];
            while self.eat(&TokenKind::Comma) {
                ring.push(self.parse_geo_pair()?);
            }
            self.expect(&TokenKind::RBrace)?;
            rings.push(ring);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(GeoLiteral::Polygon { rings })
    }

    fn parse_sort(&mut self) -> ParseResult<ParsedModifier> {
        self.expect(&TokenKind::LParen)?;
        let mut keys = Vec::new();
        loop {
            let path = self.parse_path()?;
            let ascending = if self.eat_kw("ASC") || self.eat_kw("ASCENDING") {
                true
            } else if self.eat_kw("DESC") || self.eat_kw("DESCENDING") {
                false
            } else {
                return Err(self.err_expected("ascending or descending"));
            };
            keys.push((path, ascending));
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RParen)?;
        Ok(ParsedModifier::Sort(keys))
    }

    fn parse_distinct(&mut self) -> ParseResult<ParsedModifier> {
        self.expect(&TokenKind::LParen)?;
        let mut paths = vec![self.parse_path()?];
        while self.eat(&TokenKind::Comma) {
            paths.push(self.parse_path()?);
        }
        self.expect(&TokenKind::RParen)?;
        Ok(ParsedModifier::Distinct(paths))
    }

    fn parse_limit(&mut self) -> ParseResult<ParsedModifier> {
        self.expect(&TokenKind::LParen)?;
        let limit = match self.peek().clone() {
            TokenKind::Number { text, float: false } if !text.starts_with('-') => {
                self.advance();
                text.parse::<usize>()
                    .map_err(|_| format!("invalid number '{text}'"))?
            }
            _ => return Err(self.err_expected("natural0")),
        };
        self.expect(&TokenKind::RParen)?;
        Ok(ParsedModifier::Limit(limit))
    }
}

fn number_literal(text: &str, float: bool) -> ParseResult<Value> {
    if !float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::Int(n));
        }
    }
    text.parse::<f64>()
        .map(Value::Double)
        .map_err(|_| format!("invalid number '{text}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(names: &[&str]) -> Operand {
        Operand::Path(names.iter().map(|n| Segment::Name((*n).into())).collect())
    }

    fn cmp(q: &str) -> Comparison {
        match parse(q).unwrap().predicate {
            Predicate::Compare(c) => c,
            other => panic!("not a comparison: {other:?}"),
        }
    }

    #[test]
    fn and_binds_tighter_than_or() {
        let parsed = parse("a == 1 OR b == 2 AND c == 3").unwrap();
        let Predicate::Or(_, right) = parsed.predicate else {
            panic!("expected OR at the root");
        };
        assert!(matches!(*right, Predicate::And(_, _)));
    }

    #[test]
    fn parentheses_override_precedence() {
        let parsed = parse("(a == 1 || b == 2) && !c == 3").unwrap();
        let Predicate::And(left, right) = parsed.predicate else {
            panic!("expected AND at the root");
        };
        assert!(matches!(*left, Predicate::Or(_, _)));
        assert!(matches!(*right, Predicate::Not(_)));
    }

    #[test]
    fn comparison_parts() {
        let c = cmp("ANY friends.name BEGINSWITH[c] 'a'");
        assert_eq!(c.quantifier, Some(Quantifier::Any));
        assert_eq!(c.left, path(&["friends", "name"]));
        assert_eq!(c.op, Operator::BeginsWith);
        assert!(c.case_insensitive);
        assert_eq!(c.right, Operand::Literal(Value::String("a".into())));
    }

    #[test]
    fn keywords_are_case_insensitive() {
        let c = cmp("age in {14, 15}");
        assert_eq!(c.op, Operator::In);
        assert_eq!(
            c.right,
            Operand::List(vec![
                Operand::Literal(Value::Int(14)),
                Operand::Literal(Value::Int(15))
            ])
        );
        assert_eq!(parse("truepredicate").unwrap().predicate, Predicate::True);
    }

    #[test]
    fn aggregates_and_backlinks() {
        let c = cmp("@links.Country.languages.@count == 3");
        assert_eq!(
            c.left,
            Operand::Path(vec![
                Segment::At("links".into()),
                Segment::Name("Country".into()),
                Segment::Name("languages".into()),
                Segment::At("count".into()),
            ])
        );
    }

    #[test]
    fn modifiers_keep_their_order() {
        let parsed = parse("TRUEPREDICATE SORT(age DESC, name ASC) DISTINCT(name) LIMIT(2)").unwrap();
        assert_eq!(parsed.modifiers.len(), 3);
        assert!(matches!(&parsed.modifiers[0], ParsedModifier::Sort(keys) if keys.len() == 2 && !keys[0].1));
        assert_eq!(parsed.modifiers[2], ParsedModifier::Limit(2));
    }

    #[test]
    fn geo_literals() {
        let c = cmp("location geoWithin geoBox([-1.0, -1.0], [1.0, 1.0])");
        assert_eq!(c.op, Operator::GeoWithin);
        assert!(matches!(c.right, Operand::Geo(GeoLiteral::Box { .. })));
        let c = cmp("location geoWithin geoPolygon({[0, 0], [1.5, 0], [0, 2.5], [0, 0]}, {[$0, $1], [1.0, 1.0]})");
        let Operand::Geo(GeoLiteral::Polygon { rings }) = c.right else {
            panic!("expected polygon");
        };
        assert_eq!(rings.len(), 2);
        assert_eq!(rings[1][0], (GeoNumber::Arg(0), GeoNumber::Arg(1)));
    }

    #[test]
    fn negative_integer_in_geo_literal_is_rejected() {
        let q = "location geoWithin geoBox([-45, -10.2], [-35.24, 5.02])";
        assert_eq!(
            parse(q).unwrap_err().to_string(),
            "Invalid predicate: 'location geoWithin geoBox([-45, -10.2], [-35.24, 5.02])': syntax error, unexpected number, expecting natural0 or float or argument"
        );
    }

    #[test]
    fn syntax_errors() {
        assert_eq!(
            parse("invalidQuery").unwrap_err().to_string(),
            "Invalid predicate: 'invalidQuery': syntax error, unexpected end of file, expecting operator"
        );
        assert!(parse("a == ").unwrap_err().to_string().contains("unexpected end of file"));
        assert!(parse("a == 1 )").is_err());
        assert!(parse("(a == 1").is_err());
    }
}
