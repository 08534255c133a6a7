//! Evaluation of compiled pipelines against a [`State`].

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use tessera_codec::{Decimal128, ObjKey, ObjLink, Value};

use super::ast::{Operator, Quantifier};
use super::compile::{AggregateKind, Cmp, Expr, KeyPath, Node, Stage, Step, Tail, ValuePath};
use super::geo::GeoPoint;
use crate::storage::{references, State};

/// Runs `stages` over `elements` in order.
pub(crate) fn apply(stages: &[Stage], state: &State, mut elements: Vec<Value>) -> Vec<Value> {
    for stage in stages {
        elements = match stage {
            Stage::Filter(node) => {
                let eval = Evaluator::new(state);
                elements.into_iter().filter(|e| eval.node(node, e)).collect()
            }
            Stage::Sort(keys) => sort(state, elements, keys),
            Stage::Distinct(paths) => distinct(state, elements, paths),
            Stage::Limit(n) => {
                elements.truncate(*n);
                elements
            }
        };
    }
    elements
}

struct Evaluator<'a> {
    state: &'a State,
    /// Full-text matches per `(class, column, query)`.
    text_hits: RefCell<HashMap<(String, usize, String), BTreeSet<ObjKey>>>,
    /// Index candidates per comparison.
    index_hits: RefCell<HashMap<usize, Option<BTreeSet<ObjKey>>>>,
}

impl<'a> Evaluator<'a> {
    fn new(state: &'a State) -> Self {
        Self {
            state,
            text_hits: RefCell::new(HashMap::new()),
            index_hits: RefCell::new(HashMap::new()),
        }
    }

    fn node(&self, node: &Node, element: &Value) -> bool {
        match node {
            Node::True => true,
            Node::False => false,
            Node::And(a, b) => self.node(a, element) && self.node(b, element),
            Node::Or(a, b) => self.node(a, element) || self.node(b, element),
            Node::Not(a) => !self.node(a, element),
            Node::Compare(cmp) => self.compare(cmp, element),
        }
    }

    fn compare(&self, cmp: &Cmp, element: &Value) -> bool {
        if let (Some(column), Value::Link(link)) = (cmp.indexed, element) {
            if let Some(hit) = self.index_hit(cmp, column, link) {
                return hit;
            }
        }
        match cmp.op {
            Operator::Text => return self.text(cmp, element),
            Operator::GeoWithin => return self.geo_within(cmp, element),
            _ => {}
        }

        let left = self.expr(&cmp.left, element);
        let right = match &cmp.right {
            Expr::List(values) => values.clone(),
            other => self.expr(other, element),
        };
        let test = |l: &Value| match cmp.op {
            Operator::In => right.iter().any(|r| equal(l, r, cmp.case_insensitive)),
            Operator::Between => {
                matches!(l.compare(&right[0]), Some(Ordering::Greater | Ordering::Equal))
                    && matches!(l.compare(&right[1]), Some(Ordering::Less | Ordering::Equal))
            }
            op => right.iter().any(|r| binary(op, l, r, cmp.case_insensitive)),
        };
        match cmp.quantifier {
            None | Some(Quantifier::Any) => left.iter().any(test),
            Some(Quantifier::All) => left.iter().all(test),
            Some(Quantifier::None) => !left.iter().any(test),
        }
    }

    /// Membership of `link` in the index lookup of `cmp`, when the column
    /// is indexed.
    fn index_hit(&self, cmp: &Cmp, column: usize, link: &ObjLink) -> Option<bool> {
        let Expr::Const(value) = &cmp.right else {
            return None;
        };
        let id = cmp as *const Cmp as usize;
        let mut cache = self.index_hits.borrow_mut();
        let hits = cache.entry(id).or_insert_with(|| {
            let table = self.state.table(&link.class).ok()?;
            Some(table.lookup_indexed(column, value)?.into_iter().collect())
        });
        hits.as_ref().map(|keys| keys.contains(&link.key))
    }

    fn text(&self, cmp: &Cmp, element: &Value) -> bool {
        let (Some((class, column)), Expr::Path(path), Expr::Const(Value::String(query))) =
            (&cmp.fulltext, &cmp.left, &cmp.right)
        else {
            return false;
        };
        let mut owners = vec![element.clone()];
        for step in &path.steps[..path.steps.len().saturating_sub(1)] {
            owners = self.step(step, owners);
        }
        let key = (class.clone(), *column, query.clone());
        let mut cache = self.text_hits.borrow_mut();
        let hits = cache.entry(key).or_insert_with(|| {
            self.state
                .table(class)
                .ok()
                .and_then(|t| t.fulltext(*column))
                .map(|index| index.search(query))
                .unwrap_or_default()
        });
        owners
            .iter()
            .filter_map(Value::as_link)
            .any(|link| hits.contains(&link.key))
    }

    fn geo_within(&self, cmp: &Cmp, element: &Value) -> bool {
        let (Some(column), Expr::Geo(region)) = (cmp.geo_column, &cmp.right) else {
            return false;
        };
        let points = self.expr(&cmp.left, element);
        let inside = |v: &Value| {
            let Some(row) = v.as_link().and_then(|l| self.state.row(l)) else {
                return false;
            };
            let coords: Vec<f64> = row
                .get(column)
                .as_list()
                .unwrap_or_default()
                .iter()
                .filter_map(Value::as_f64)
                .collect();
            if coords.len() < 2 {
                return false;
            }
            let mut point = GeoPoint::new(coords[0], coords[1]);
            point.altitude = coords.get(2).copied();
            region.contains(&point)
        };
        match cmp.quantifier {
            None | Some(Quantifier::Any) => points.iter().any(inside),
            Some(Quantifier::All) => points.iter().all(inside),
            Some(Quantifier::None) => !points.iter().any(inside),
        }
    }

    fn expr(&self, expr: &Expr, element: &Value) -> Vec<Value> {
        match expr {
            Expr::Path(path) => self.path(path, element),
            Expr::Const(v) => vec![v.clone()],
            Expr::List(values) => values.clone(),
            Expr::Geo(_) => Vec::new(),
        }
    }

    fn path(&self, path: &KeyPath, element: &Value) -> Vec<Value> {
        let mut current = vec![element.clone()];
        for step in &path.steps {
            current = self.step(step, current);
        }
        match &path.tail {
            Tail::Values => current,
            Tail::Count(step) => current
                .into_iter()
                .map(|v| match v {
                    Value::Null => count(0),
                    v => count(self.step(step, vec![v]).len()),
                })
                .collect(),
            Tail::Size => current
                .into_iter()
                .map(|v| match &v {
                    Value::String(s) => count(s.chars().count()),
                    Value::Data(d) => count(d.len()),
                    _ => Value::Null,
                })
                .collect(),
            Tail::IncomingCount => current
                .iter()
                .map(|v| count(v.as_link().map_or(0, |l| self.state.count_incoming(l))))
                .collect(),
            Tail::Aggregate {
                kind,
                collection,
                column,
            } => current
                .into_iter()
                .map(|v| {
                    let items = self.step(collection, vec![v]);
                    match column {
                        Some(column) => {
                            let values: Vec<Value> = items
                                .iter()
                                .filter_map(|item| {
                                    let row = self.state.row(item.as_link()?)?;
                                    Some(row.get(*column).clone())
                                })
                                .collect();
                            aggregate(*kind, values.iter())
                        }
                        None => aggregate(*kind, items.iter()),
                    }
                })
                .collect(),
        }
    }

    /// Applies one step to every value, flattening collections. A null
    /// single link propagates as null.
    fn step(&self, step: &Step, values: Vec<Value>) -> Vec<Value> {
        let mut out = Vec::with_capacity(values.len());
        for value in values {
            let Value::Link(link) = &value else {
                if value.is_null() && matches!(step, Step::Column(_)) {
                    out.push(Value::Null);
                }
                continue;
            };
            match step {
                Step::Column(column) => match self.state.row(link).map(|r| r.get(*column)) {
                    Some(Value::List(items)) => out.extend(items.iter().cloned()),
                    Some(v) => out.push(v.clone()),
                    None => {}
                },
                Step::Backlinks {
                    origin_class,
                    column,
                } => {
                    if let Ok(table) = self.state.table(origin_class) {
                        out.extend(
                            table
                                .iter()
                                .filter(|(_, row)| references(row.get(*column), link))
                                .map(|(key, _)| Value::Link(ObjLink::new(origin_class.clone(), key))),
                        );
                    }
                }
            }
        }
        out
    }
}

fn count(n: usize) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn equal(l: &Value, r: &Value, case_insensitive: bool) -> bool {
    match (l, r) {
        (Value::String(a), Value::String(b)) if case_insensitive => {
            a.to_lowercase() == b.to_lowercase()
        }
        _ => l.loose_eq(r),
    }
}

fn binary(op: Operator, l: &Value, r: &Value, case_insensitive: bool) -> bool {
    match op {
        Operator::Equal => equal(l, r, case_insensitive),
        Operator::NotEqual => !equal(l, r, case_insensitive),
        Operator::Less => l.compare(r) == Some(Ordering::Less),
        Operator::LessEqual => matches!(l.compare(r), Some(Ordering::Less | Ordering::Equal)),
        Operator::Greater => l.compare(r) == Some(Ordering::Greater),
        Operator::GreaterEqual => {
            matches!(l.compare(r), Some(Ordering::Greater | Ordering::Equal))
        }
        Operator::BeginsWith | Operator::EndsWith | Operator::Contains | Operator::Like => {
            string_op(op, l, r, case_insensitive)
        }
        Operator::In | Operator::Between | Operator::Text | Operator::GeoWithin => false,
    }
}

fn string_op(op: Operator, l: &Value, r: &Value, case_insensitive: bool) -> bool {
    match (l, r) {
        (Value::String(a), Value::String(b)) => {
            let (a, b) = if case_insensitive {
                (a.to_lowercase(), b.to_lowercase())
            } else {
                (a.clone(), b.clone())
            };
            match op {
                Operator::BeginsWith => a.starts_with(&b),
                Operator::EndsWith => a.ends_with(&b),
                Operator::Contains => a.contains(&b),
                _ => like(&a.chars().collect::<Vec<_>>(), &b.chars().collect::<Vec<_>>()),
            }
        }
        (Value::Data(a), Value::Data(b)) => match op {
            Operator::BeginsWith => a.starts_with(b),
            Operator::EndsWith => a.ends_with(b),
            Operator::Contains => b.is_empty() || a.windows(b.len()).any(|w| w == b.as_slice()),
            _ => false,
        },
        _ => false,
    }
}

/// `*` matches any run of characters, `?` exactly one.
fn like(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some(&c) if c == '?' || c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Aggregates the non-null values. `min`/`max`/`avg` of nothing is null,
/// `sum` of nothing is zero.
pub(crate) fn aggregate<'v>(kind: AggregateKind, values: impl Iterator<Item = &'v Value>) -> Value {
    let values: Vec<&Value> = values.filter(|v| !v.is_null()).collect();
    match kind {
        AggregateKind::Min | AggregateKind::Max => {
            let wanted = if kind == AggregateKind::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut best: Option<&Value> = None;
            for v in values {
                best = match best {
                    None => Some(v),
                    Some(b) if v.compare(b) == Some(wanted) => Some(v),
                    keep => keep,
                };
            }
            best.cloned().unwrap_or(Value::Null)
        }
        AggregateKind::Sum => sum(&values).unwrap_or(Value::Int(0)),
        AggregateKind::Avg => {
            let numeric: Vec<&Value> = values.into_iter().filter(|v| v.is_numeric()).collect();
            if numeric.is_empty() {
                return Value::Null;
            }
            let n = i64::try_from(numeric.len()).unwrap_or(i64::MAX);
            match sum(&numeric) {
                Some(Value::Decimal(d)) => d
                    .checked_div_int(n)
                    .map_or(Value::Null, Value::Decimal),
                Some(total) => Value::Double(total.as_f64().unwrap_or(0.0) / numeric.len() as f64),
                None => Value::Null,
            }
        }
    }
}

fn sum(values: &[&Value]) -> Option<Value> {
    let numeric: Vec<&Value> = values.iter().copied().filter(|v| v.is_numeric()).collect();
    if numeric.is_empty() {
        return None;
    }
    if numeric.iter().any(|v| matches!(v, Value::Decimal(_))) {
        let mut total = Decimal128::ZERO;
        for v in &numeric {
            let d = match v {
                Value::Decimal(d) => *d,
                Value::Int(i) => Decimal128::from(*i),
                other => other.as_f64().map_or(Decimal128::ZERO, |f| {
                    Decimal128::new((f * 1e9).round() as i128, -9)
                }),
            };
            total = total.checked_add(d)?;
        }
        return Some(Value::Decimal(total));
    }
    if numeric.iter().all(|v| matches!(v, Value::Int(_))) {
        return Some(Value::Int(
            numeric
                .iter()
                .filter_map(|v| v.as_int())
                .fold(0i64, i64::wrapping_add),
        ));
    }
    Some(Value::Double(numeric.iter().filter_map(|v| v.as_f64()).sum()))
}

/// Reads a sort/distinct path from an element; broken links read as null.
pub(crate) fn path_value(state: &State, element: &Value, path: &ValuePath) -> Value {
    let mut current = element.clone();
    for hop in &path.hops {
        current = match current.as_link().and_then(|l| state.row(l)) {
            Some(row) => row.get(*hop).clone(),
            None => return Value::Null,
        };
    }
    match path.column {
        None => current,
        Some(column) => current
            .as_link()
            .and_then(|l| state.row(l))
            .map_or(Value::Null, |row| row.get(column).clone()),
    }
}

fn sort(state: &State, elements: Vec<Value>, keys: &[(ValuePath, bool)]) -> Vec<Value> {
    let mut keyed: Vec<(Vec<Value>, Value)> = elements
        .into_iter()
        .map(|e| {
            let k = keys.iter().map(|(p, _)| path_value(state, &e, p)).collect();
            (k, e)
        })
        .collect();
    keyed.sort_by(|(a, _), (b, _)| {
        for (i, (_, ascending)) in keys.iter().enumerate() {
            let ord = a[i].sort_cmp(&b[i]);
            let ord = if *ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
    keyed.into_iter().map(|(_, e)| e).collect()
}

struct DistinctKey(Vec<Value>);

impl PartialEq for DistinctKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DistinctKey {}

impl PartialOrd for DistinctKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DistinctKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| a.sort_cmp(b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

fn distinct(state: &State, elements: Vec<Value>, paths: &[ValuePath]) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    elements
        .into_iter()
        .filter(|e| seen.insert(DistinctKey(paths.iter().map(|p| path_value(state, e, p)).collect())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards() {
        let m = |t: &str, p: &str| like(&t.chars().collect::<Vec<_>>(), &p.chars().collect::<Vec<_>>());
        assert!(m("hello", "h*o"));
        assert!(m("hello", "h?llo"));
        assert!(m("hello", "*"));
        assert!(!m("hello", "h?lo"));
        assert!(m("", "*"));
        assert!(!m("abc", "*d"));
    }

    #[test]
    fn empty_aggregates() {
        let none: Vec<Value> = vec![Value::Null];
        assert_eq!(aggregate(AggregateKind::Min, none.iter()), Value::Null);
        assert_eq!(aggregate(AggregateKind::Avg, none.iter()), Value::Null);
        assert_eq!(aggregate(AggregateKind::Sum, none.iter()), Value::Int(0));
    }

    #[test]
    fn numeric_aggregates() {
        let values = vec![Value::Int(3), Value::Int(1), Value::Null, Value::Int(2)];
        assert_eq!(aggregate(AggregateKind::Min, values.iter()), Value::Int(1));
        assert_eq!(aggregate(AggregateKind::Max, values.iter()), Value::Int(3));
        assert_eq!(aggregate(AggregateKind::Sum, values.iter()), Value::Int(6));
        assert_eq!(aggregate(AggregateKind::Avg, values.iter()), Value::Double(2.0));

        let mixed = vec![Value::Int(1), Value::Double(0.5)];
        assert_eq!(aggregate(AggregateKind::Sum, mixed.iter()), Value::Double(1.5));
    }

    #[test]
    fn case_insensitive_string_ops() {
        let a = Value::from("Hello");
        let b = Value::from("he");
        assert!(!binary(Operator::BeginsWith, &a, &b, false));
        assert!(binary(Operator::BeginsWith, &a, &b, true));
        assert!(binary(Operator::Equal, &a, &Value::from("HELLO"), true));
        assert!(binary(Operator::Contains, &Value::Data(vec![1, 2, 3]), &Value::Data(vec![2, 3]), false));
    }
}
