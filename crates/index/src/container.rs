//! Value containers: the unit of index query results.

use std::{
  collections::{BTreeSet, HashMap},
  hash::Hash,
  sync::Arc,
};

use strata_core::FileId;

/// A mapping from indexed value to the set of files that produced it.
///
/// Containers are rebuilt from the backing store on every read, so merging
/// must be cheap: when either side is empty the other side's `Arc` is
/// returned unchanged.
#[derive(Debug, Clone, Default)]
pub struct ValueContainer<V> {
  values: HashMap<V, BTreeSet<FileId>>,
}

impl<V> ValueContainer<V>
where
  V: Clone + Eq + Hash,
{
  pub fn new() -> Self {
    Self { values: HashMap::new() }
  }

  pub fn empty() -> Arc<Self> {
    Arc::new(Self::new())
  }

  /// Record that `file` produced `value`.
  pub fn add(&mut self, value: V, file: FileId) {
    self.values.entry(value).or_default().insert(file);
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Number of distinct values.
  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn files_for(&self, value: &V) -> Option<&BTreeSet<FileId>> {
    self.values.get(value)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&V, &BTreeSet<FileId>)> {
    self.values.iter()
  }

  /// Merge two containers with the identity short-circuit: an empty side
  /// yields the other side's `Arc` without copying.
  pub fn merge(left: &Arc<Self>, right: &Arc<Self>) -> Arc<Self> {
    if left.is_empty() {
      return right.clone();
    }
    if right.is_empty() {
      return left.clone();
    }
    let mut merged = (**left).clone();
    for (value, files) in right.iter() {
      let slot = merged.values.entry(value.clone()).or_default();
      for file in files {
        slot.insert(*file);
      }
    }
    Arc::new(merged)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn container(entries: &[(&str, u32)]) -> Arc<ValueContainer<String>> {
    let mut c = ValueContainer::new();
    for (value, file) in entries {
      c.add(value.to_string(), FileId(*file));
    }
    Arc::new(c)
  }

  #[test]
  fn test_merge_identity_short_circuit() {
    let empty = ValueContainer::<String>::empty();
    let full = container(&[("v", 1)]);

    let left = ValueContainer::merge(&empty, &full);
    let right = ValueContainer::merge(&full, &empty);

    assert!(Arc::ptr_eq(&left, &full), "merge(empty, x) must return x itself");
    assert!(Arc::ptr_eq(&right, &full), "merge(x, empty) must return x itself");
  }

  #[test]
  fn test_merge_unions_file_sets() {
    let a = container(&[("v", 1), ("w", 1)]);
    let b = container(&[("v", 2)]);

    let merged = ValueContainer::merge(&a, &b);
    let files: Vec<_> = merged.files_for(&"v".to_string()).unwrap().iter().copied().collect();
    assert_eq!(files, vec![FileId(1), FileId(2)]);
    assert_eq!(merged.len(), 2);
  }
}
