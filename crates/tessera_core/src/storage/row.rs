//! Object rows.

use tessera_codec::Value;

use crate::types::Version;

/// The stored values of one object, one slot per persisted column.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Column values.
    pub values: Vec<Value>,
    /// Version of the commit that last changed any value.
    pub modified: Version,
}

impl Row {
    /// Creates a row stamped with `version`.
    #[must_use]
    pub fn new(values: Vec<Value>, version: Version) -> Self {
        Self {
            values,
            modified: version,
        }
    }

    /// Value at `column`, or null for a column the row predates.
    #[must_use]
    pub fn get(&self, column: usize) -> &Value {
        const NULL: &Value = &Value::Null;
        self.values.get(column).unwrap_or(NULL)
    }

    /// Whether the row changed after `version`.
    #[must_use]
    pub fn modified_since(&self, version: Version) -> bool {
        self.modified > version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_column_reads_null() {
        let row = Row::new(vec![Value::Int(1)], Version::new(2));
        assert_eq!(row.get(0), &Value::Int(1));
        assert_eq!(row.get(5), &Value::Null);
        assert!(row.modified_since(Version::new(1)));
        assert!(!row.modified_since(Version::new(2)));
    }
}
