//! The merged index: one query surface over the base and hash-backed stores.

use std::{hash::Hash, sync::Arc};

use strata_core::{FileContent, FileId};
use tracing::trace;

use crate::{BaseIndex, HashBackedIndex, IndexAccess, StoreError, UpdateOutcome, ValueContainer};

/// Presents `{base index, hash-backed index}` as a single index.
///
/// Invariant: a file is represented in exactly one of the two physical
/// stores at any time, so no query ever counts a file twice. Callers cannot
/// observe which store answered.
pub struct MergedIndex<K, V> {
  base: Arc<BaseIndex<K, V>>,
  hash: Option<Arc<HashBackedIndex<K, V>>>,
}

impl<K, V> MergedIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  /// `hash` is `None` when hash-dedup is disabled; every update then goes to
  /// the base index.
  pub fn new(base: Arc<BaseIndex<K, V>>, hash: Option<Arc<HashBackedIndex<K, V>>>) -> Self {
    Self { base, hash }
  }

  /// Apply an externally computed entry map for `file`.
  ///
  /// Skipped entirely when the file is already represented through the hash
  /// path, so the base index never acquires a duplicate entry set for it.
  pub fn update_with_entries(&self, file: FileId, entries: Vec<(K, V)>) -> UpdateOutcome {
    if let Some(hash) = &self.hash
      && hash.hash_id(file).is_some()
    {
      trace!(%file, "Entry map skipped: file is represented by the hash index");
      return UpdateOutcome::Skipped;
    }
    self.base.apply(file, entries);
    UpdateOutcome::Indexed
  }
}

impl<K, V> IndexAccess<K, V> for MergedIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  fn update(&self, file: FileId, content: Option<&FileContent>) -> Result<UpdateOutcome, StoreError> {
    let Some(hash) = &self.hash else {
      return self.base.update(file, content);
    };

    let Some(content) = content else {
      // Deletion: the hash association (if any) and the base entries both go
      hash.forget_file(file);
      return self.base.update(file, None);
    };

    match hash.update(file, Some(content))? {
      UpdateOutcome::Deduplicated => {
        // The hash path answers for this file now; stale base entries from a
        // previous content revision would be a double count
        self.base.update(file, None)?;
        trace!(%file, "Content deduplicated against hash index");
        Ok(UpdateOutcome::Deduplicated)
      }
      _ => {
        let outcome = self.base.update(file, Some(content))?;
        let entries = self.base.file_data(file);
        if !entries.is_empty() {
          // Share this entry set so the next identical file skips indexing
          hash.register(content.hash(), entries)?;
        }
        Ok(outcome)
      }
    }
  }

  fn data_for_key(&self, key: &K) -> Arc<ValueContainer<V>> {
    let base = self.base.data_for_key(key);
    match &self.hash {
      Some(hash) => ValueContainer::merge(&base, &hash.data_for_key(key)),
      None => base,
    }
  }

  fn file_data(&self, file: FileId) -> Vec<(K, V)> {
    let base = self.base.file_data(file);
    if !base.is_empty() {
      return base;
    }
    match &self.hash {
      Some(hash) if hash.hash_id(file).is_some() => hash.file_data(file),
      _ => Vec::new(),
    }
  }

  fn process_all_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> bool {
    if !self.base.process_all_keys(processor) {
      return false;
    }
    match &self.hash {
      Some(hash) => hash.process_all_keys(processor),
      None => true,
    }
  }

  /// Structural operations touch the base index only; the hash-backed store
  /// is read-mostly within a session and lifecycle-managed independently.
  fn clear(&self) {
    self.base.clear();
  }

  fn flush(&self) -> Result<(), StoreError> {
    self.base.flush()
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use strata_core::ContentHash;

  use crate::{ContentHashStore, Mapper, StaticProvidedEntries};

  use super::*;

  type Entry = (String, String);

  fn word_mapper() -> Arc<dyn Mapper<String, String>> {
    Arc::new(|content: &FileContent| {
      String::from_utf8_lossy(content.bytes())
        .split_whitespace()
        .map(|w| ("word".to_string(), w.to_string()))
        .collect::<Vec<Entry>>()
    })
  }

  fn content(file: u32, bytes: &[u8]) -> FileContent {
    FileContent::new(FileId(file), format!("{file}.txt"), bytes.to_vec())
  }

  struct Fixture {
    _dir: tempfile::TempDir,
    hash: Arc<HashBackedIndex<String, String>>,
    merged: MergedIndex<String, String>,
  }

  fn fixture(provided: Option<StaticProvidedEntries<String, String>>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ContentHashStore::open(dir.path().join("hashes.dat")).unwrap());
    let provided = provided.map(|p| Arc::new(p) as Arc<dyn crate::ProvidedEntries<String, String>>);
    let hash = Arc::new(HashBackedIndex::new(store, provided));
    let base = Arc::new(BaseIndex::new(word_mapper()));
    let merged = MergedIndex::new(base, Some(hash.clone()));
    Fixture { _dir: dir, hash, merged }
  }

  #[test]
  fn test_identical_content_is_indexed_once() {
    let f = fixture(None);

    let first = f.merged.update(FileId(1), Some(&content(1, b"hello"))).unwrap();
    let second = f.merged.update(FileId(2), Some(&content(2, b"hello"))).unwrap();

    assert_eq!(first, UpdateOutcome::Indexed);
    assert_eq!(second, UpdateOutcome::Deduplicated);

    // Both files resolve to the same entry set, through different stores
    assert_eq!(f.merged.file_data(FileId(1)), f.merged.file_data(FileId(2)));
    assert_eq!(f.hash.hash_id(FileId(1)), crate::HashId::NONE, "first file stays in the base store");
    assert!(f.hash.hash_id(FileId(2)).is_some());

    // And a key query sees each file exactly once
    let data = f.merged.data_for_key(&"word".to_string());
    let files: Vec<_> = data.files_for(&"hello".to_string()).unwrap().iter().copied().collect();
    assert_eq!(files, vec![FileId(1), FileId(2)]);
  }

  #[test]
  fn test_deleted_file_stops_answering() {
    let f = fixture(None);
    f.merged.update(FileId(1), Some(&content(1, b"shared"))).unwrap();
    f.merged.update(FileId(2), Some(&content(2, b"shared"))).unwrap();

    f.merged.update(FileId(2), None).unwrap();

    assert!(f.merged.file_data(FileId(2)).is_empty());
    let data = f.merged.data_for_key(&"word".to_string());
    let files: Vec<_> = data.files_for(&"shared".to_string()).unwrap().iter().copied().collect();
    assert_eq!(files, vec![FileId(1)], "only the surviving file answers");
  }

  #[test]
  fn test_reindex_to_shared_content_drops_base_entries() {
    let f = fixture(None);
    f.merged.update(FileId(1), Some(&content(1, b"shared"))).unwrap();
    f.merged.update(FileId(2), Some(&content(2, b"unique"))).unwrap();

    // File 2's content becomes identical to file 1's
    let outcome = f.merged.update(FileId(2), Some(&content(2, b"shared"))).unwrap();
    assert_eq!(outcome, UpdateOutcome::Deduplicated);

    let data = f.merged.data_for_key(&"word".to_string());
    assert!(data.files_for(&"unique".to_string()).is_none(), "stale base entries must be gone");
    let files: Vec<_> = data.files_for(&"shared".to_string()).unwrap().iter().copied().collect();
    assert_eq!(files, vec![FileId(1), FileId(2)]);
  }

  #[test]
  fn test_entry_map_skipped_for_hash_represented_file() {
    let f = fixture(None);
    f.merged.update(FileId(1), Some(&content(1, b"shared"))).unwrap();
    f.merged.update(FileId(2), Some(&content(2, b"shared"))).unwrap();

    let outcome = f
      .merged
      .update_with_entries(FileId(2), vec![("word".to_string(), "sneaky".to_string())]);

    assert_eq!(outcome, UpdateOutcome::Skipped);
    let data = f.merged.data_for_key(&"word".to_string());
    assert!(data.files_for(&"sneaky".to_string()).is_none());
  }

  #[test]
  fn test_provided_data_answers_without_local_indexing() {
    let blob = content(1, b"prebuilt");
    let provided = StaticProvidedEntries::new().insert(
      ContentHash::of(b"prebuilt"),
      vec![("word".to_string(), "from-dump".to_string())],
    );
    let f = fixture(Some(provided));

    let outcome = f.merged.update(FileId(1), Some(&blob)).unwrap();
    assert_eq!(outcome, UpdateOutcome::Deduplicated);
    assert_eq!(
      f.merged.file_data(FileId(1)),
      vec![("word".to_string(), "from-dump".to_string())]
    );
  }

  #[test]
  fn test_process_all_keys_visits_both_stores_and_short_circuits() {
    let f = fixture(None);
    f.merged.update(FileId(1), Some(&content(1, b"alpha"))).unwrap();

    let mut seen = Vec::new();
    let completed = f.merged.process_all_keys(&mut |key| {
      seen.push(key.clone());
      true
    });
    assert!(completed);
    // "word" exists in the base store and (registered) in the hash store
    assert_eq!(seen, vec!["word".to_string(), "word".to_string()]);

    let aborted = f.merged.process_all_keys(&mut |_| false);
    assert!(!aborted, "processor abort must propagate");
  }

  #[test]
  fn test_disabled_hash_layer_behaves_like_plain_base() {
    let base = Arc::new(BaseIndex::new(word_mapper()));
    let merged = MergedIndex::new(base, None);

    merged.update(FileId(1), Some(&content(1, b"hello"))).unwrap();
    let outcome = merged.update(FileId(2), Some(&content(2, b"hello"))).unwrap();
    assert_eq!(outcome, UpdateOutcome::Indexed, "no dedup without the hash layer");
  }
}
