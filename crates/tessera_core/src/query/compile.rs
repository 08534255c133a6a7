//! Predicate compilation.
//!
//! Resolves the raw key paths of a parsed query against the schema,
//! substitutes positional arguments and type-checks every comparison, so
//! that evaluation never fails halfway through a collection.

use std::sync::Arc;

use tessera_codec::Value;

use super::ast::{
    path_text, Comparison, GeoLiteral, GeoNumber, GeoPair, Operand, Operator, ParsedModifier,
    ParsedQuery, Predicate, Quantifier, Segment,
};
use super::geo::{GeoPoint, GeoRegion};
use super::QueryArg;
use crate::error::{CoreError, CoreResult};
use crate::schema::{IndexKind, ObjectSchema, Property, PropertyType, Schema};

/// What the elements of a filtered collection are.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ElementKind {
    /// Links to objects of the class.
    Object(String),
    /// Values of a primitive list or set property.
    Primitive(Property),
}

impl ElementKind {
    pub fn class(&self) -> Option<&str> {
        match self {
            ElementKind::Object(c) => Some(c),
            ElementKind::Primitive(_) => None,
        }
    }
}

/// A compiled predicate.
#[derive(Debug, Clone)]
pub(crate) enum Node {
    True,
    False,
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),
    Compare(Box<Cmp>),
}

#[derive(Debug, Clone)]
pub(crate) struct Cmp {
    pub quantifier: Option<Quantifier>,
    pub left: Expr,
    pub op: Operator,
    pub case_insensitive: bool,
    pub right: Expr,
    /// Indexed root column usable for an equality lookup.
    pub indexed: Option<usize>,
    /// `(class, column)` of the full-text index a `TEXT` comparison uses.
    pub fulltext: Option<(String, usize)>,
    /// `coordinates` column of the point class for `geoWithin`.
    pub geo_column: Option<usize>,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Path(KeyPath),
    Const(Value),
    List(Vec<Value>),
    Geo(GeoRegion),
}

/// A resolved key path.
#[derive(Debug, Clone)]
pub(crate) struct KeyPath {
    pub steps: Vec<Step>,
    pub tail: Tail,
    /// Whether the path can yield more than one value per element.
    pub multi: bool,
    pub ty: Ty,
}

/// One hop of a key path, applied to every value reached so far.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Read a stored column; collections are flattened.
    Column(usize),
    /// Objects of `origin_class` whose `column` links to the value.
    Backlinks { origin_class: String, column: usize },
}

#[derive(Debug, Clone)]
pub(crate) enum Tail {
    Values,
    /// Element count of a collection step.
    Count(Step),
    /// Length of a string or binary value.
    Size,
    /// Number of links of any kind pointing at the object.
    IncomingCount,
    Aggregate {
        kind: AggregateKind,
        collection: Step,
        column: Option<usize>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AggregateKind {
    Min,
    Max,
    Sum,
    Avg,
}

impl AggregateKind {
    /// Operation name used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::Sum => "sum",
            AggregateKind::Avg => "average",
        }
    }
}

/// Static type of an operand.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Ty {
    Prim(PropertyType),
    Object(String),
    Null,
    List,
}

impl Ty {
    fn of(value: &Value) -> Ty {
        match value {
            Value::Null => Ty::Null,
            Value::Bool(_) => Ty::Prim(PropertyType::Bool),
            Value::Int(_) => Ty::Prim(PropertyType::Int),
            Value::Float(_) => Ty::Prim(PropertyType::Float),
            Value::Double(_) => Ty::Prim(PropertyType::Double),
            Value::String(_) => Ty::Prim(PropertyType::String),
            Value::Data(_) => Ty::Prim(PropertyType::Data),
            Value::Date(_) => Ty::Prim(PropertyType::Date),
            Value::Decimal(_) => Ty::Prim(PropertyType::Decimal128),
            Value::ObjectId(_) => Ty::Prim(PropertyType::ObjectId),
            Value::Uuid(_) => Ty::Prim(PropertyType::Uuid),
            Value::Link(link) => Ty::Object(link.class.clone()),
            Value::List(_) | Value::Object(_) => Ty::List,
        }
    }

    fn name(&self) -> String {
        match self {
            Ty::Prim(t) => t.name().to_string(),
            Ty::Object(class) => class.clone(),
            Ty::Null => "null".into(),
            Ty::List => "list".into(),
        }
    }

    fn compatible(&self, other: &Ty) -> bool {
        match (self, other) {
            (Ty::Null, _) | (_, Ty::Null) => true,
            (Ty::Prim(PropertyType::Mixed), _) | (_, Ty::Prim(PropertyType::Mixed)) => true,
            (Ty::Prim(a), Ty::Prim(b)) => a == b || (a.is_numeric() && b.is_numeric()),
            (Ty::Object(a), Ty::Object(b)) => a == b,
            _ => false,
        }
    }

    fn is_stringlike(&self) -> bool {
        matches!(
            self,
            Ty::Prim(PropertyType::String | PropertyType::Data | PropertyType::Mixed) | Ty::Null
        )
    }
}

/// A value path used by sort and distinct: single-link hops then a column
/// (`None` means the element itself).
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ValuePath {
    pub hops: Vec<usize>,
    pub column: Option<usize>,
}

/// A compiled pipeline stage.
#[derive(Debug, Clone)]
pub(crate) enum Stage {
    Filter(Arc<Node>),
    Sort(Vec<(ValuePath, bool)>),
    Distinct(Vec<ValuePath>),
    Limit(usize),
}

/// Compiles a parsed query into pipeline stages.
pub(crate) fn compile(
    parsed: ParsedQuery,
    schema: &Schema,
    kind: &ElementKind,
    args: &[QueryArg],
) -> CoreResult<Vec<Stage>> {
    let compiler = Compiler { schema, kind, args };
    let mut stages = vec![Stage::Filter(Arc::new(compiler.node(parsed.predicate)?))];
    for modifier in parsed.modifiers {
        stages.push(match modifier {
            ParsedModifier::Sort(keys) => Stage::Sort(
                keys.iter()
                    .map(|(path, ascending)| {
                        let names = segment_names(path);
                        value_path(schema, kind, &names, "sort").map(|p| (p, *ascending))
                    })
                    .collect::<CoreResult<_>>()?,
            ),
            ParsedModifier::Distinct(paths) => Stage::Distinct(
                paths
                    .iter()
                    .map(|path| value_path(schema, kind, &segment_names(path), "distinct"))
                    .collect::<CoreResult<_>>()?,
            ),
            ParsedModifier::Limit(n) => Stage::Limit(n),
        });
    }
    Ok(stages)
}

fn segment_names(path: &[Segment]) -> Vec<String> {
    path.iter()
        .map(|s| match s {
            Segment::Name(n) => n.clone(),
            Segment::At(a) => format!("@{a}"),
        })
        .collect()
}

/// Resolves a sort or distinct key path.
///
/// # Errors
///
/// `Cannot sort on key path '<path>': ...` naming the offending property.
pub(crate) fn value_path(
    schema: &Schema,
    kind: &ElementKind,
    names: &[String],
    verb: &str,
) -> CoreResult<ValuePath> {
    let text = names.join(".");
    let fail = |detail: String| {
        CoreError::query(format!("Cannot {verb} on key path '{text}': {detail}"))
    };
    let mut class = match kind {
        ElementKind::Primitive(prop) => {
            if names.len() == 1 && names[0] == "self" {
                return Ok(ValuePath {
                    hops: Vec::new(),
                    column: None,
                });
            }
            return Err(fail(format!(
                "arrays of '{}' can only be sorted on 'self'",
                prop.ty.name()
            )));
        }
        ElementKind::Object(class) => schema.require(class)?,
    };
    let mut hops = Vec::new();
    for (i, name) in names.iter().enumerate() {
        let prop = class
            .property(name)
            .ok_or_else(|| fail(format!("property '{}.{name}' does not exist.", class.name)))?;
        let last = i + 1 == names.len();
        if prop.is_collection() || prop.is_computed() {
            return Err(fail(format!(
                "property '{}.{name}' is of unsupported type '{}'.",
                class.name,
                if prop.is_set() { "set" } else { "array" }
            )));
        }
        let column = prop
            .column
            .ok_or_else(|| fail(format!("property '{}.{name}' does not exist.", class.name)))?;
        if prop.is_link() {
            if last {
                return Err(fail(format!(
                    "property '{}.{name}' of type 'object' cannot be the final property in the key path.",
                    class.name
                )));
            }
            hops.push(column);
            class = schema.require(prop.object_type.as_deref().unwrap_or_default())?;
        } else {
            if !last {
                return Err(fail(format!(
                    "property '{}.{name}' of type '{}' may only be the final property in the key path.",
                    class.name,
                    prop.ty.name()
                )));
            }
            return Ok(ValuePath {
                hops,
                column: Some(column),
            });
        }
    }
    Err(fail(format!("property '{}.self' does not exist.", class.name)))
}

struct Compiler<'a> {
    schema: &'a Schema,
    kind: &'a ElementKind,
    args: &'a [QueryArg],
}

impl Compiler<'_> {
    fn node(&self, predicate: Predicate) -> CoreResult<Node> {
        Ok(match predicate {
            Predicate::True => Node::True,
            Predicate::False => Node::False,
            Predicate::And(a, b) => Node::And(Box::new(self.node(*a)?), Box::new(self.node(*b)?)),
            Predicate::Or(a, b) => Node::Or(Box::new(self.node(*a)?), Box::new(self.node(*b)?)),
            Predicate::Not(a) => Node::Not(Box::new(self.node(*a)?)),
            Predicate::Compare(c) => Node::Compare(Box::new(self.comparison(c)?)),
        })
    }

    fn arg(&self, index: usize) -> CoreResult<&QueryArg> {
        self.args.get(index).ok_or_else(|| {
            CoreError::query(if self.args.is_empty() {
                format!("Request for argument at index {index} but no arguments are provided")
            } else {
                format!(
                    "Request for argument at index {index} but only {} arguments are provided",
                    self.args.len()
                )
            })
        })
    }

    fn operand(&self, operand: Operand) -> CoreResult<Expr> {
        Ok(match operand {
            Operand::Path(segments) => Expr::Path(self.key_path(&segments)?),
            Operand::Literal(v) => Expr::Const(v),
            Operand::Arg(n) => match self.arg(n)? {
                QueryArg::Value(Value::List(items)) => Expr::List(items.clone()),
                QueryArg::Value(v) => Expr::Const(v.clone()),
                QueryArg::Geo(region) => Expr::Geo(self.checked_region(region.clone())?),
            },
            Operand::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    match self.operand(item)? {
                        Expr::Const(v) => values.push(v),
                        Expr::List(vs) => values.extend(vs),
                        _ => {
                            return Err(CoreError::query(
                                "A list literal may only contain constant values",
                            ))
                        }
                    }
                }
                Expr::List(values)
            }
            Operand::Geo(literal) => Expr::Geo(self.geo_literal(literal)?),
        })
    }

    fn geo_number(&self, n: GeoNumber) -> CoreResult<f64> {
        match n {
            GeoNumber::Literal(x) => Ok(x),
            GeoNumber::Arg(i) => match self.arg(i)? {
                QueryArg::Value(v) => v.as_f64().ok_or_else(|| {
                    CoreError::query(format!(
                        "Geospatial coordinate argument at index {i} must be a number, got '{}'",
                        v.type_name()
                    ))
                }),
                QueryArg::Geo(_) => Err(CoreError::query(format!(
                    "Geospatial coordinate argument at index {i} must be a number, got 'geo'"
                ))),
            },
        }
    }

    fn geo_pair(&self, (lng, lat): GeoPair) -> CoreResult<GeoPoint> {
        Ok(GeoPoint::new(self.geo_number(lng)?, self.geo_number(lat)?))
    }

    fn geo_literal(&self, literal: GeoLiteral) -> CoreResult<GeoRegion> {
        let region = match literal {
            GeoLiteral::Circle { center, radius } => {
                if center.len() != 2 {
                    return Err(self.circle_arity(center.len()));
                }
                GeoRegion::Circle {
                    center: GeoPoint::new(self.geo_number(center[0])?, self.geo_number(center[1])?),
                    distance: self.geo_number(radius)?,
                }
            }
            GeoLiteral::Box {
                bottom_left,
                top_right,
            } => GeoRegion::Box {
                bottom_left: self.geo_pair(bottom_left)?,
                top_right: self.geo_pair(top_right)?,
            },
            GeoLiteral::Polygon { rings } => {
                let mut rings = rings
                    .into_iter()
                    .map(|ring| ring.into_iter().map(|p| self.geo_pair(p)).collect())
                    .collect::<CoreResult<Vec<Vec<GeoPoint>>>>()?
                    .into_iter();
                GeoRegion::Polygon {
                    outer_ring: rings.next().unwrap_or_default(),
                    holes: rings.collect(),
                }
            }
        };
        self.checked_region(region)
    }

    fn circle_arity(&self, found: usize) -> CoreError {
        CoreError::query(format!(
            "Invalid query: invalid RQL for table \"{}\": center of a geo circle must be specified with exactly 2 coordinates, found {found}",
            self.kind.class().unwrap_or_default()
        ))
    }

    fn checked_region(&self, region: GeoRegion) -> CoreResult<GeoRegion> {
        if let GeoRegion::Circle { center, .. } = &region {
            if center.altitude.is_some() {
                return Err(self.circle_arity(3));
            }
        }
        region.validate().map_err(|reason| {
            CoreError::query(format!(
                "The Geospatial query argument region is invalid: '{reason}'"
            ))
        })?;
        Ok(region)
    }

    fn comparison(&self, c: Comparison) -> CoreResult<Cmp> {
        let Comparison {
            quantifier,
            left,
            op,
            case_insensitive,
            right,
        } = c;
        let mut left = self.operand(left)?;
        let mut right = self.operand(right)?;
        let mut op = op;
        // Keep the key path on the left: `5 < age` is `age > 5`.
        if !matches!(left, Expr::Path(_))
            && matches!(right, Expr::Path(_))
            && op != Operator::In
            && !op.is_string_op()
        {
            std::mem::swap(&mut left, &mut right);
            op = op.flipped();
        }

        if let Some(q) = quantifier {
            if !matches!(&left, Expr::Path(p) if p.multi) {
                return Err(CoreError::query(format!(
                    "The keypath following '{}' must contain a list",
                    q.keyword()
                )));
            }
        }

        let mut cmp = Cmp {
            quantifier,
            left,
            op,
            case_insensitive,
            right,
            indexed: None,
            fulltext: None,
            geo_column: None,
        };
        self.check(&mut cmp)?;
        Ok(cmp)
    }

    fn check(&self, cmp: &mut Cmp) -> CoreResult<()> {
        let left_ty = expr_ty(&cmp.left);
        let right_ty = expr_ty(&cmp.right);
        let mismatch = |a: &Ty, b: &Ty| {
            CoreError::query(format!(
                "Unsupported comparison between type '{}' and type '{}'",
                a.name(),
                b.name()
            ))
        };
        match cmp.op {
            Operator::Text => {
                let Expr::Path(path) = &cmp.left else {
                    return Err(CoreError::query("Column has no fulltext index"));
                };
                cmp.fulltext = Some(self.fulltext_column(path)?);
                if !matches!(cmp.right, Expr::Const(Value::String(_))) {
                    return Err(mismatch(&left_ty, &right_ty));
                }
            }
            Operator::GeoWithin => {
                let (Expr::Path(path), Expr::Geo(_)) = (&cmp.left, &cmp.right) else {
                    return Err(mismatch(&left_ty, &right_ty));
                };
                let Ty::Object(class) = &path.ty else {
                    return Err(mismatch(&left_ty, &Ty::Prim(PropertyType::Object)));
                };
                let point = self.schema.require(class)?;
                let column = point
                    .property("coordinates")
                    .filter(|p| p.is_list() && p.ty.is_numeric())
                    .and_then(|p| p.column)
                    .ok_or_else(|| {
                        CoreError::query(format!(
                            "Type '{class}' is not a geospatial point: it needs a 'coordinates' property of type 'double[]'"
                        ))
                    })?;
                cmp.geo_column = Some(column);
            }
            op if op.is_string_op() => {
                if !left_ty.is_stringlike() {
                    return Err(CoreError::query(format!(
                        "Unsupported comparison operator '{}' against type '{}', right side must be a string or binary type",
                        op.name(),
                        left_ty.name()
                    )));
                }
                if !right_ty.is_stringlike() {
                    return Err(mismatch(&left_ty, &right_ty));
                }
            }
            Operator::In => match &cmp.right {
                Expr::List(values) => {
                    for v in values {
                        let ty = Ty::of(v);
                        if !left_ty.compatible(&ty) {
                            return Err(mismatch(&left_ty, &ty));
                        }
                    }
                }
                Expr::Path(path) => {
                    if !left_ty.compatible(&path.ty) {
                        return Err(mismatch(&left_ty, &right_ty));
                    }
                }
                Expr::Const(v) => {
                    // A single value behaves like a one-element list.
                    let ty = Ty::of(v);
                    if !left_ty.compatible(&ty) {
                        return Err(mismatch(&left_ty, &ty));
                    }
                    let single = vec![v.clone()];
                    cmp.right = Expr::List(single);
                }
                Expr::Geo(_) => return Err(mismatch(&left_ty, &right_ty)),
            },
            Operator::Between => {
                let Expr::List(values) = &cmp.right else {
                    return Err(CoreError::query(
                        "Operator 'BETWEEN' requires a list of exactly 2 values",
                    ));
                };
                if values.len() != 2 {
                    return Err(CoreError::query(
                        "Operator 'BETWEEN' requires a list of exactly 2 values",
                    ));
                }
                for v in values {
                    let ty = Ty::of(v);
                    if !left_ty.compatible(&ty) {
                        return Err(mismatch(&left_ty, &ty));
                    }
                }
            }
            _ => {
                if matches!(cmp.right, Expr::List(_) | Expr::Geo(_))
                    || matches!(cmp.left, Expr::List(_) | Expr::Geo(_))
                    || !left_ty.compatible(&right_ty)
                {
                    return Err(mismatch(&left_ty, &right_ty));
                }
                if cmp.op == Operator::Equal && !cmp.case_insensitive && cmp.quantifier.is_none() {
                    cmp.indexed = self.index_column(&cmp.left, &cmp.right);
                }
            }
        }
        Ok(())
    }

    /// A root column with an index whose type matches the constant.
    fn index_column(&self, left: &Expr, right: &Expr) -> Option<usize> {
        let (Expr::Path(path), Expr::Const(value)) = (left, right) else {
            return None;
        };
        let class = self.schema.get(self.kind.class()?)?;
        match (path.steps.as_slice(), &path.tail) {
            ([Step::Column(column)], Tail::Values) if !path.multi => {
                let prop = class.persisted().find(|p| p.column == Some(*column))?;
                let indexed = prop.is_primary || prop.index == IndexKind::Standard;
                (indexed && !prop.is_link() && Ty::of(value) == Ty::Prim(prop.ty)).then_some(*column)
            }
            _ => None,
        }
    }

    fn fulltext_column(&self, path: &KeyPath) -> CoreResult<(String, usize)> {
        let no_index = || CoreError::query("Column has no fulltext index");
        let (Tail::Values, Some(Step::Column(column))) = (&path.tail, path.steps.last()) else {
            return Err(no_index());
        };
        let class = self.owner_of_last_step(path).ok_or_else(no_index)?;
        let prop = class
            .persisted()
            .find(|p| p.column == Some(*column))
            .ok_or_else(no_index)?;
        if prop.index != IndexKind::FullText {
            return Err(no_index());
        }
        Ok((class.name.clone(), *column))
    }

    /// Class whose column the last step of `path` reads.
    fn owner_of_last_step(&self, path: &KeyPath) -> Option<Arc<ObjectSchema>> {
        let mut class = self.schema.get(self.kind.class()?)?.clone();
        for step in &path.steps[..path.steps.len().saturating_sub(1)] {
            class = match step {
                Step::Column(column) => {
                    let prop = class.persisted().find(|p| p.column == Some(*column))?;
                    self.schema.get(prop.object_type.as_deref()?)?.clone()
                }
                Step::Backlinks { origin_class, .. } => self.schema.get(origin_class)?.clone(),
            };
        }
        Some(class)
    }

    fn key_path(&self, segments: &[Segment]) -> CoreResult<KeyPath> {
        let text = path_text(segments);
        let mut steps: Vec<(Step, bool)> = Vec::new();
        let mut cursor = match self.kind {
            ElementKind::Object(class) => Cursor::Object(class.clone()),
            ElementKind::Primitive(prop) => {
                let is_self = matches!(segments.first(), Some(Segment::Name(n)) if n.eq_ignore_ascii_case("self"));
                if !is_self {
                    let name = path_text(&segments[..1.min(segments.len())]);
                    return Err(CoreError::query(format!(
                        "Cannot get property named '{name}' on a list of primitives"
                    )));
                }
                Cursor::Value(prop.ty)
            }
        };
        let start = usize::from(matches!(self.kind, ElementKind::Primitive(_)));
        let mut i = start;
        let mut tail = Tail::Values;
        while i < segments.len() {
            let last = i + 1 == segments.len();
            match &segments[i] {
                Segment::Name(name) => {
                    let Cursor::Object(class_name) = &cursor else {
                        return Err(CoreError::query(format!(
                            "Property '{name}' cannot be reached through a value in key path '{text}'"
                        )));
                    };
                    let class = self.schema.require(class_name)?;
                    let prop = class.property(name).ok_or_else(|| {
                        CoreError::query(format!("'{class_name}' has no property '{name}'"))
                    })?;
                    let (step, multi, next) = self.property_step(prop)?;
                    steps.push((step, multi));
                    cursor = next;
                }
                Segment::At(at) if at == "links" => {
                    let Cursor::Object(target) = &cursor else {
                        return Err(unsupported_aggregate(at, &text));
                    };
                    match (segments.get(i + 1), segments.get(i + 2)) {
                        (Some(Segment::At(count)), None) if count == "count" => {
                            tail = Tail::IncomingCount;
                            cursor = Cursor::Value(PropertyType::Int);
                            i += 2;
                            continue;
                        }
                        (Some(Segment::Name(origin)), Some(Segment::Name(origin_prop))) => {
                            let origin_class = self.schema.require(origin)?;
                            let column = origin_class
                                .property(origin_prop)
                                .filter(|p| p.is_link() && p.object_type.as_deref() == Some(target.as_str()))
                                .and_then(|p| p.column)
                                .ok_or_else(|| {
                                    CoreError::query(format!("'{origin}' has no property '{origin_prop}'"))
                                })?;
                            steps.push((
                                Step::Backlinks {
                                    origin_class: origin.clone(),
                                    column,
                                },
                                true,
                            ));
                            cursor = Cursor::Object(origin.clone());
                            i += 3;
                            continue;
                        }
                        _ => return Err(unsupported_aggregate(at, &text)),
                    }
                }
                Segment::At(at) if at == "count" || at == "size" => {
                    if !last {
                        return Err(aggregate_not_last(at, &text));
                    }
                    let stringlike =
                        matches!(cursor, Cursor::Value(PropertyType::String | PropertyType::Data));
                    match steps.last() {
                        Some((_, true)) => {
                            let (collection, _) = steps.pop().ok_or_else(|| aggregate_not_last(at, &text))?;
                            tail = Tail::Count(collection);
                        }
                        _ if at == "size" && stringlike => tail = Tail::Size,
                        _ => {
                            return Err(CoreError::query(format!(
                                "Operation '@{at}' is not supported on key path '{text}'"
                            )))
                        }
                    }
                    cursor = Cursor::Value(PropertyType::Int);
                }
                Segment::At(at) if matches!(at.as_str(), "min" | "max" | "sum" | "avg") => {
                    let kind = match at.as_str() {
                        "min" => AggregateKind::Min,
                        "max" => AggregateKind::Max,
                        "sum" => AggregateKind::Sum,
                        _ => AggregateKind::Avg,
                    };
                    let Some((collection, true)) = steps.pop() else {
                        return Err(CoreError::query(format!(
                            "Operation '@{at}' is not supported on key path '{text}'"
                        )));
                    };
                    let (column, ty) = match &cursor {
                        Cursor::Object(class_name) => {
                            let Some(Segment::Name(name)) = segments.get(i + 1) else {
                                return Err(CoreError::query(format!(
                                    "Operation '@{at}' on a list of objects requires a property name in key path '{text}'"
                                )));
                            };
                            if i + 2 != segments.len() {
                                return Err(aggregate_not_last(at, &text));
                            }
                            let class = self.schema.require(class_name)?;
                            let prop = class.property(name).ok_or_else(|| {
                                CoreError::query(format!("'{class_name}' has no property '{name}'"))
                            })?;
                            if prop.is_link() || prop.is_collection() || prop.is_computed() {
                                return Err(unsupported_aggregate_type(at, &prop.label()));
                            }
                            i += 1;
                            (prop.column, prop.ty)
                        }
                        Cursor::Value(ty) => {
                            if !last {
                                return Err(aggregate_not_last(at, &text));
                            }
                            (None, *ty)
                        }
                    };
                    let supported = match kind {
                        AggregateKind::Min | AggregateKind::Max => ty.supports_min_max(),
                        AggregateKind::Sum | AggregateKind::Avg => ty.supports_sum(),
                    };
                    if !supported {
                        return Err(unsupported_aggregate_type(at, ty.name()));
                    }
                    cursor = Cursor::Value(match (kind, ty) {
                        (AggregateKind::Avg, PropertyType::Decimal128) => PropertyType::Decimal128,
                        (AggregateKind::Avg, PropertyType::Mixed) => PropertyType::Mixed,
                        (AggregateKind::Avg, _) => PropertyType::Double,
                        (_, ty) => ty,
                    });
                    tail = Tail::Aggregate {
                        kind,
                        collection,
                        column,
                    };
                }
                Segment::At(at) => return Err(unsupported_aggregate(at, &text)),
            }
            i += 1;
        }
        let multi = steps.iter().any(|(_, m)| *m);
        let ty = match (&tail, &cursor) {
            (Tail::Values, Cursor::Object(class)) => Ty::Object(class.clone()),
            (_, Cursor::Value(ty)) => Ty::Prim(*ty),
            (_, Cursor::Object(class)) => Ty::Object(class.clone()),
        };
        Ok(KeyPath {
            steps: steps.into_iter().map(|(s, _)| s).collect(),
            tail,
            multi,
            ty,
        })
    }

    /// The step that reads `prop`, whether it yields many values, and what
    /// it reaches.
    fn property_step(&self, prop: &Property) -> CoreResult<(Step, bool, Cursor)> {
        if prop.is_computed() {
            let origin = prop.object_type.clone().unwrap_or_default();
            let origin_prop = prop.origin_property.as_deref().unwrap_or_default();
            let column = self
                .schema
                .require(&origin)?
                .property(origin_prop)
                .and_then(|p| p.column)
                .ok_or_else(|| CoreError::query(format!("'{origin}' has no property '{origin_prop}'")))?;
            return Ok((
                Step::Backlinks {
                    origin_class: origin.clone(),
                    column,
                },
                true,
                Cursor::Object(origin),
            ));
        }
        let column = prop.column.unwrap_or_default();
        let next = if prop.is_link() {
            Cursor::Object(prop.object_type.clone().unwrap_or_default())
        } else {
            Cursor::Value(prop.ty)
        };
        Ok((Step::Column(column), prop.is_collection(), next))
    }
}

enum Cursor {
    Object(String),
    Value(PropertyType),
}

fn expr_ty(expr: &Expr) -> Ty {
    match expr {
        Expr::Path(p) => p.ty.clone(),
        Expr::Const(v) => Ty::of(v),
        Expr::List(_) => Ty::List,
        Expr::Geo(_) => Ty::Prim(PropertyType::Object),
    }
}

fn unsupported_aggregate(at: &str, text: &str) -> CoreError {
    CoreError::query(format!("Unsupported operation '@{at}' in key path '{text}'"))
}

fn aggregate_not_last(at: &str, text: &str) -> CoreError {
    CoreError::query(format!(
        "Operation '@{at}' must be the last element of key path '{text}'"
    ))
}

fn unsupported_aggregate_type(at: &str, ty: &str) -> CoreError {
    CoreError::query(format!("Operation '@{at}' not supported for type '{ty}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse;
    use crate::schema::{ObjectSchemaDef, PropertyDef};

    fn schema() -> Schema {
        Schema::new(vec![
            ObjectSchemaDef::new("Person")
                .property("name", "string")
                .property("age", "int")
                .property("alive", "bool")
                .property("bio", PropertyDef::new("string").full_text())
                .property("friends", "Person[]")
                .property("best", "Person?")
                .property("scores", "int[]")
                .property("parents", PropertyDef::linking_objects("Person", "friends"))
                .primary_key("name"),
        ])
        .unwrap()
    }

    fn compile_err(q: &str, args: &[QueryArg]) -> String {
        let schema = schema();
        let kind = ElementKind::Object("Person".into());
        compile(parse(q).unwrap(), &schema, &kind, args)
            .unwrap_err()
            .to_string()
    }

    fn filter(q: &str) -> Node {
        let schema = schema();
        let kind = ElementKind::Object("Person".into());
        match compile(parse(q).unwrap(), &schema, &kind, &[]).unwrap().remove(0) {
            Stage::Filter(node) => node.as_ref().clone(),
            other => panic!("expected a filter, got {other:?}"),
        }
    }

    #[test]
    fn unknown_property() {
        assert_eq!(compile_err("height > 3", &[]), "'Person' has no property 'height'");
    }

    #[test]
    fn type_mismatch() {
        assert_eq!(
            compile_err("alive == 1", &[]),
            "Unsupported comparison between type 'bool' and type 'int'"
        );
        assert_eq!(
            compile_err("age BEGINSWITH 'a'", &[]),
            "Unsupported comparison operator 'beginswith' against type 'int', right side must be a string or binary type"
        );
    }

    #[test]
    fn missing_arguments() {
        assert_eq!(
            compile_err("age == $0", &[]),
            "Request for argument at index 0 but no arguments are provided"
        );
        assert_eq!(
            compile_err("age == $2", &[QueryArg::from(1), QueryArg::from(2)]),
            "Request for argument at index 2 but only 2 arguments are provided"
        );
    }

    #[test]
    fn fulltext_requires_index() {
        assert_eq!(compile_err("name TEXT 'a'", &[]), "Column has no fulltext index");
        assert!(matches!(filter("bio TEXT 'a'"), Node::Compare(c) if c.fulltext.is_some()));
    }

    #[test]
    fn quantifier_requires_list() {
        assert_eq!(
            compile_err("ANY age == 3", &[]),
            "The keypath following 'ANY' must contain a list"
        );
        assert!(matches!(filter("ALL friends.age > 3"), Node::Compare(_)));
    }

    #[test]
    fn paths_resolve_aggregates() {
        let Node::Compare(c) = filter("friends.@count == 2") else { panic!() };
        let Expr::Path(path) = &c.left else { panic!() };
        assert!(matches!(path.tail, Tail::Count(Step::Column(4))));
        assert!(!path.multi);

        let Node::Compare(c) = filter("parents.name.@size == 2") else { panic!() };
        let Expr::Path(path) = &c.left else { panic!() };
        assert!(matches!(path.tail, Tail::Size));
        assert!(path.multi);

        let Node::Compare(c) = filter("friends.@avg.age > 2") else { panic!() };
        let Expr::Path(path) = &c.left else { panic!() };
        assert_eq!(path.ty, Ty::Prim(PropertyType::Double));
    }

    #[test]
    fn literal_on_left_is_flipped() {
        let Node::Compare(c) = filter("3 < age") else { panic!() };
        assert_eq!(c.op, Operator::Greater);
        assert!(matches!(c.left, Expr::Path(_)));
    }

    #[test]
    fn primary_key_equality_uses_index() {
        let Node::Compare(c) = filter("name == 'Bob'") else { panic!() };
        assert_eq!(c.indexed, Some(0));
        let Node::Compare(c) = filter("name ==[c] 'Bob'") else { panic!() };
        assert_eq!(c.indexed, None);
    }

    #[test]
    fn sort_paths() {
        let schema = schema();
        let kind = ElementKind::Object("Person".into());
        let names = |s: &str| s.split('.').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(
            value_path(&schema, &kind, &names("best.age"), "sort").unwrap(),
            ValuePath {
                hops: vec![5],
                column: Some(1)
            }
        );
        assert_eq!(
            value_path(&schema, &kind, &names("fish"), "sort").unwrap_err().to_string(),
            "Cannot sort on key path 'fish': property 'Person.fish' does not exist."
        );
        assert_eq!(
            value_path(&schema, &kind, &names("best"), "sort").unwrap_err().to_string(),
            "Cannot sort on key path 'best': property 'Person.best' of type 'object' cannot be the final property in the key path."
        );
        assert_eq!(
            value_path(&schema, &kind, &names("friends.age"), "sort").unwrap_err().to_string(),
            "Cannot sort on key path 'friends.age': property 'Person.friends' is of unsupported type 'array'."
        );
        let scores = schema.get("Person").unwrap().property("scores").unwrap().clone();
        assert_eq!(
            value_path(&schema, &ElementKind::Primitive(scores), &names("value"), "sort")
                .unwrap_err()
                .to_string(),
            "Cannot sort on key path 'value': arrays of 'int' can only be sorted on 'self'"
        );
    }

    #[test]
    fn geo_argument_errors() {
        let schema = Schema::new(vec![
            ObjectSchemaDef::new("Point")
                .property("coordinates", "double[]")
                .embedded(),
            ObjectSchemaDef::new("PointOfInterest")
                .property("id", "int")
                .property("location", "Point?"),
        ])
        .unwrap();
        let kind = ElementKind::Object("PointOfInterest".into());
        let run = |region: GeoRegion| {
            compile(parse("location geoWithin $0").unwrap(), &schema, &kind, &[QueryArg::Geo(region)])
                .map(|_| ())
                .map_err(|e| e.to_string())
        };
        assert!(run(GeoRegion::circle([0.0, 0.0], 0.1)).is_ok());
        assert_eq!(
            run(GeoRegion::circle([-32.34, -25.0], -1.5)).unwrap_err(),
            "The Geospatial query argument region is invalid: 'The radius of a circle must be a non-negative number'"
        );
        let mut center = GeoPoint::new(-20.0, 20.0);
        center.altitude = Some(12.0);
        assert_eq!(
            run(GeoRegion::Circle { center, distance: 1.5 }).unwrap_err(),
            "Invalid query: invalid RQL for table \"PointOfInterest\": center of a geo circle must be specified with exactly 2 coordinates, found 3"
        );
    }
}
