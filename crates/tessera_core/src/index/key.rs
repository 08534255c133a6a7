//! Ordered index keys.

use std::cmp::Ordering;

use tessera_codec::Value;

/// A [`Value`] ordered by [`Value::sort_cmp`] so it can key a `BTreeMap`.
///
/// Numeric variants with the same numeric value are the same key, so an
/// index over an `int` column finds `5` when probed with `5.0`.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.sort_cmp(&other.0)
    }
}

impl From<Value> for IndexKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn numeric_keys_unify() {
        let mut map = BTreeMap::new();
        map.insert(IndexKey(Value::Int(5)), "five");
        assert_eq!(map.get(&IndexKey(Value::Double(5.0))), Some(&"five"));
        assert!(IndexKey(Value::Null) < IndexKey(Value::Int(i64::MIN)));
    }
}
