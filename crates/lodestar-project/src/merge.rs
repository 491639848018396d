//! Per-field merge strategies for inherited task configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a task field combines with the value inherited so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Inherited values first, then new ones (duplicates dropped)
    #[default]
    Append,
    /// New values first, then inherited ones (duplicates dropped)
    Prepend,
    /// Discard the inherited value entirely
    Replace,
    /// Keep the first value defined in the chain
    Preserve,
}

impl MergeStrategy {
    /// Merge two lists, preserving order and dropping repeated values.
    ///
    /// `base` is `None` while no earlier link in the chain has defined the
    /// field, so [`MergeStrategy::Preserve`] keeps the first defined value.
    pub fn merge_vec<T: PartialEq>(self, base: Option<Vec<T>>, next: Vec<T>) -> Vec<T> {
        let base = match (self, base) {
            (Self::Preserve, Some(base)) => return base,
            (Self::Preserve, None) | (Self::Replace, _) => return next,
            (_, base) => base.unwrap_or_default(),
        };
        if next.is_empty() {
            return base;
        }

        let mut list: Vec<T> = Vec::with_capacity(base.len() + next.len());
        if self == Self::Prepend {
            push_unique(&mut list, next);
            push_unique(&mut list, base);
        } else {
            push_unique(&mut list, base);
            push_unique(&mut list, next);
        }
        list
    }

    /// Merge two maps. For `Append` the new entries win on key conflicts,
    /// for `Prepend` the inherited ones do.
    pub fn merge_map<K: Ord, V>(
        self,
        base: Option<BTreeMap<K, V>>,
        next: BTreeMap<K, V>,
    ) -> BTreeMap<K, V> {
        match (self, base) {
            (Self::Preserve, Some(base)) => base,
            (Self::Preserve, None) | (Self::Replace, _) => next,
            (Self::Append, base) => {
                let mut map = base.unwrap_or_default();
                map.extend(next);
                map
            }
            (Self::Prepend, base) => {
                let mut map = next;
                map.extend(base.unwrap_or_default());
                map
            }
        }
    }
}

fn push_unique<T: PartialEq>(list: &mut Vec<T>, items: Vec<T>) {
    for item in items {
        if !list.contains(&item) {
            list.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_append() {
        let merged = MergeStrategy::Append.merge_vec(Some(strings(&["x", "y"])), strings(&["z"]));
        assert_eq!(merged, strings(&["x", "y", "z"]));
    }

    #[test]
    fn test_append_drops_duplicates() {
        let merged = MergeStrategy::Append.merge_vec(Some(strings(&["x", "y"])), strings(&["y", "z"]));
        assert_eq!(merged, strings(&["x", "y", "z"]));
    }

    #[test]
    fn test_prepend() {
        let merged = MergeStrategy::Prepend.merge_vec(Some(strings(&["x", "y"])), strings(&["z", "x"]));
        assert_eq!(merged, strings(&["z", "x", "y"]));
    }

    #[test]
    fn test_replace() {
        let merged = MergeStrategy::Replace.merge_vec(Some(strings(&["x", "y"])), strings(&["z"]));
        assert_eq!(merged, strings(&["z"]));

        let emptied = MergeStrategy::Replace.merge_vec(Some(strings(&["x"])), Vec::new());
        assert!(emptied.is_empty());
    }

    #[test]
    fn test_preserve_keeps_first() {
        let first = MergeStrategy::Preserve.merge_vec(None, strings(&["a"]));
        let merged = MergeStrategy::Preserve.merge_vec(Some(first), strings(&["b"]));
        assert_eq!(merged, strings(&["a"]));

        // an explicitly empty list still counts as defined
        let empty = MergeStrategy::Preserve.merge_vec(Some(Vec::<String>::new()), strings(&["b"]));
        assert!(empty.is_empty());
    }

    #[test]
    fn test_merge_map_precedence() {
        let base = BTreeMap::from([("A", "1"), ("B", "1")]);
        let next = BTreeMap::from([("B", "2"), ("C", "2")]);

        let appended = MergeStrategy::Append.merge_map(Some(base.clone()), next.clone());
        assert_eq!(appended, BTreeMap::from([("A", "1"), ("B", "2"), ("C", "2")]));

        let prepended = MergeStrategy::Prepend.merge_map(Some(base.clone()), next.clone());
        assert_eq!(prepended, BTreeMap::from([("A", "1"), ("B", "1"), ("C", "2")]));

        let replaced = MergeStrategy::Replace.merge_map(Some(base), next.clone());
        assert_eq!(replaced, next);

        let preserved = MergeStrategy::Preserve.merge_map(None, next.clone());
        assert_eq!(preserved, next);
    }
}
