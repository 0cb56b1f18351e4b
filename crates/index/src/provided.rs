//! Precomputed entry sets shipped out-of-band.

use std::{collections::HashMap, hash::Hash};

use strata_core::ContentHash;

/// A prebuilt data set supplying entries for known content hashes.
///
/// Keyed by content hash rather than [`HashId`](crate::HashId): hash ids are
/// assigned by the local enumerator, while provided data is produced on
/// another machine. The hash-backed index materializes covered entries under
/// the local id on first lookup.
pub trait ProvidedEntries<K, V>: Send + Sync {
  /// Entries for `hash`, or `None` if this data set does not cover it.
  fn entries_for(&self, hash: ContentHash) -> Option<Vec<(K, V)>>;
}

/// In-memory provided data set, for tests and small prebuilt bundles.
#[derive(Debug, Default)]
pub struct StaticProvidedEntries<K, V> {
  entries: HashMap<ContentHash, Vec<(K, V)>>,
}

impl<K, V> StaticProvidedEntries<K, V>
where
  K: Clone + Send + Sync,
  V: Clone + Send + Sync,
{
  pub fn new() -> Self {
    Self { entries: HashMap::new() }
  }

  pub fn insert(mut self, hash: ContentHash, entries: Vec<(K, V)>) -> Self {
    self.entries.insert(hash, entries);
    self
  }
}

impl<K, V> ProvidedEntries<K, V> for StaticProvidedEntries<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Send + Sync,
{
  fn entries_for(&self, hash: ContentHash) -> Option<Vec<(K, V)>> {
    self.entries.get(&hash).cloned()
  }
}
