use std::collections::BTreeMap;

use crate::types::Cell;

/// A row shaped for the destination table, keyed by destination field name.
///
/// A destination field with no entry is absent, which the load step treats as null.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationRecord {
    fields: BTreeMap<String, Cell>,
}

impl DestinationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Cell) {
        self.fields.insert(field.into(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Cell> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Iterates over fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K> FromIterator<(K, Cell)> for DestinationRecord
where
    K: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, Cell)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        }
    }
}
