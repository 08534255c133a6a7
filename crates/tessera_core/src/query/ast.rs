//! Parsed predicate tree.
//!
//! The parser produces this tree without looking at the schema; key paths
//! are kept as raw segments and resolved by the compiler.

use tessera_codec::Value;

/// A whole query: the predicate plus trailing `SORT`/`DISTINCT`/`LIMIT`
/// clauses in the order they were written.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedQuery {
    pub predicate: Predicate,
    pub modifiers: Vec<ParsedModifier>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Predicate {
    True,
    False,
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
    Compare(Comparison),
}

/// `[quantifier] left op[c] right`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Comparison {
    pub quantifier: Option<Quantifier>,
    pub left: Operand,
    pub op: Operator,
    pub case_insensitive: bool,
    pub right: Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Quantifier {
    Any,
    All,
    None,
}

impl Quantifier {
    pub fn keyword(self) -> &'static str {
        match self {
            Quantifier::Any => "ANY",
            Quantifier::All => "ALL",
            Quantifier::None => "NONE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    BeginsWith,
    EndsWith,
    Contains,
    Like,
    In,
    Between,
    Text,
    GeoWithin,
}

impl Operator {
    /// Lowercase name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Operator::Equal => "==",
            Operator::NotEqual => "!=",
            Operator::Less => "<",
            Operator::LessEqual => "<=",
            Operator::Greater => ">",
            Operator::GreaterEqual => ">=",
            Operator::BeginsWith => "beginswith",
            Operator::EndsWith => "endswith",
            Operator::Contains => "contains",
            Operator::Like => "like",
            Operator::In => "in",
            Operator::Between => "between",
            Operator::Text => "text",
            Operator::GeoWithin => "geowithin",
        }
    }

    pub fn is_string_op(self) -> bool {
        matches!(
            self,
            Operator::BeginsWith | Operator::EndsWith | Operator::Contains | Operator::Like
        )
    }

    /// The operator seen from the other side (`a < b` is `b > a`).
    pub fn flipped(self) -> Self {
        match self {
            Operator::Less => Operator::Greater,
            Operator::LessEqual => Operator::GreaterEqual,
            Operator::Greater => Operator::Less,
            Operator::GreaterEqual => Operator::LessEqual,
            other => other,
        }
    }
}

/// One side of a comparison.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Path(Vec<Segment>),
    Literal(Value),
    Arg(usize),
    /// `{a, b, ...}`.
    List(Vec<Operand>),
    Geo(GeoLiteral),
}

/// A key path segment as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Name(String),
    /// `@count`, `@links`, ... without the `@`, lowercased.
    At(String),
}

/// A coordinate inside a geo literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GeoNumber {
    Literal(f64),
    Arg(usize),
}

/// `[lng, lat]` inside a geo literal.
pub(crate) type GeoPair = (GeoNumber, GeoNumber);

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GeoLiteral {
    Circle {
        center: Vec<GeoNumber>,
        radius: GeoNumber,
    },
    Box {
        bottom_left: GeoPair,
        top_right: GeoPair,
    },
    Polygon {
        rings: Vec<Vec<GeoPair>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedModifier {
    Sort(Vec<(Vec<Segment>, bool)>),
    Distinct(Vec<Vec<Segment>>),
    Limit(usize),
}

/// Renders a raw key path back to text.
pub(crate) fn path_text(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Name(n) => n.clone(),
            Segment::At(a) => format!("@{a}"),
        })
        .collect::<Vec<_>>()
        .join(".")
}
