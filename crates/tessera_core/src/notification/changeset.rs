//! Change descriptions delivered to listeners.

/// Positional changes of a collection between two deliveries.
///
/// `deletions` and `old_modifications` index the previous ordering;
/// `insertions` and `modifications` index the new one. All vectors are
/// sorted ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Positions in the new ordering that were inserted.
    pub insertions: Vec<usize>,
    /// Positions in the old ordering that were removed.
    pub deletions: Vec<usize>,
    /// Positions in the new ordering whose object changed.
    pub modifications: Vec<usize>,
    /// The same modified elements, as positions in the old ordering.
    pub old_modifications: Vec<usize>,
}

impl ChangeSet {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.insertions.is_empty()
            && self.deletions.is_empty()
            && self.modifications.is_empty()
            && self.old_modifications.is_empty()
    }
}

/// Changes of a single object between two deliveries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectChangeSet {
    /// The object was deleted.
    pub deleted: bool,
    /// Names of the stored properties whose value changed.
    pub changed_properties: Vec<String>,
}

impl ObjectChangeSet {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.deleted && self.changed_properties.is_empty()
    }
}
