use std::collections::BTreeMap;

use cf_registry::DimensionId;
use serde::{Deserialize, Serialize};

/// Per-session map from dimension to the values currently chosen for it.
/// Mutated only through the resolver's entry points so consistency
/// maintenance can never be bypassed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    values: BTreeMap<DimensionId, Vec<String>>,
}

impl Selection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, dimension: DimensionId) -> &[String] {
        self.values
            .get(&dimension)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    #[must_use]
    pub fn is_empty(&self, dimension: DimensionId) -> bool {
        self.get(dimension).is_empty()
    }

    /// Replace the selection for a dimension, de-duplicating while keeping
    /// first-seen order.
    pub fn set(&mut self, dimension: DimensionId, values: Vec<String>) {
        let mut seen = std::collections::BTreeSet::new();
        let deduped: Vec<String> = values
            .into_iter()
            .filter(|value| seen.insert(value.clone()))
            .collect();
        if deduped.is_empty() {
            self.values.remove(&dimension);
        } else {
            self.values.insert(dimension, deduped);
        }
    }

    /// Append-union for repeated picks on the same dimension: existing
    /// values are kept, new ones appended, duplicates dropped.
    pub fn merge(&mut self, dimension: DimensionId, values: Vec<String>) {
        let mut merged = self.get(dimension).to_vec();
        merged.extend(values);
        self.set(dimension, merged);
    }

    pub fn clear(&mut self, dimension: DimensionId) {
        self.values.remove(&dimension);
    }

    pub fn dimensions(&self) -> impl Iterator<Item = DimensionId> + '_ {
        self.values.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::Selection;
    use cf_registry::DimensionId;

    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| (*v).to_owned()).collect()
    }

    #[test]
    fn set_dedups_but_keeps_first_seen_order() {
        let mut selection = Selection::new();
        selection.set(DimensionId::Pic, owned(&["picB", "picA", "picB"]));
        assert_eq!(selection.get(DimensionId::Pic), owned(&["picB", "picA"]));
    }

    #[test]
    fn merge_appends_without_replacing() {
        let mut selection = Selection::new();
        selection.set(DimensionId::Team, owned(&["WEB_GV"]));
        selection.merge(DimensionId::Team, owned(&["APP_GV", "WEB_GV"]));
        assert_eq!(
            selection.get(DimensionId::Team),
            owned(&["WEB_GV", "APP_GV"])
        );
    }

    #[test]
    fn setting_empty_clears_the_dimension() {
        let mut selection = Selection::new();
        selection.set(DimensionId::Zid, owned(&["z1"]));
        selection.set(DimensionId::Zid, Vec::new());
        assert!(selection.is_empty(DimensionId::Zid));
        assert_eq!(selection.dimensions().count(), 0);
    }
}
