//! The hash-backed index: entries keyed by content hash id.

use std::{
  collections::{BTreeSet, HashMap},
  hash::Hash,
  sync::{Arc, RwLock},
};

use strata_core::{ContentHash, FileContent, FileId};
use tracing::trace;

use crate::{ContentHashStore, HashId, IndexAccess, ProvidedEntries, StoreError, UpdateOutcome, ValueContainer};

struct HashState<K, V> {
  entries: HashMap<HashId, Vec<(K, V)>>,
  inverted: HashMap<K, HashMap<V, BTreeSet<HashId>>>,
  /// Files represented through the hash path. A file appears here iff it was
  /// deduplicated against an existing entry set.
  file_to_hash: HashMap<FileId, HashId>,
  hash_to_files: HashMap<HashId, BTreeSet<FileId>>,
}

/// An index physically keyed by [`HashId`] instead of file id.
///
/// Entry sets come from two sources: a prebuilt [`ProvidedEntries`] data set
/// (materialized under the local id on first lookup), and registration of
/// locally computed sets by the merged index. Queries translate hash buckets
/// back to file ids through the association map.
pub struct HashBackedIndex<K, V> {
  store: Arc<ContentHashStore>,
  provided: Option<Arc<dyn ProvidedEntries<K, V>>>,
  state: RwLock<HashState<K, V>>,
}

impl<K, V> HashBackedIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  pub fn new(store: Arc<ContentHashStore>, provided: Option<Arc<dyn ProvidedEntries<K, V>>>) -> Self {
    Self {
      store,
      provided,
      state: RwLock::new(HashState {
        entries: HashMap::new(),
        inverted: HashMap::new(),
        file_to_hash: HashMap::new(),
        hash_to_files: HashMap::new(),
      }),
    }
  }

  /// The id `file` is represented under, or [`HashId::NONE`] if the file is
  /// not represented through the hash path.
  pub fn hash_id(&self, file: FileId) -> HashId {
    self.read().file_to_hash.get(&file).copied().unwrap_or(HashId::NONE)
  }

  /// Whether a non-empty entry set is stored under `id`.
  pub fn has_entries(&self, id: HashId) -> bool {
    self.read().entries.get(&id).is_some_and(|e| !e.is_empty())
  }

  /// Store a locally computed entry set under `hash`'s id, without
  /// associating any file. The next file with identical bytes deduplicates
  /// against it.
  pub fn register(&self, hash: ContentHash, entries: Vec<(K, V)>) -> Result<HashId, StoreError> {
    let id = self.resolve(hash)?;
    if entries.is_empty() {
      return Ok(id);
    }
    let mut state = self.write();
    if !state.entries.contains_key(&id) {
      Self::store_entries_locked(&mut state, id, entries);
    }
    Ok(id)
  }

  /// Enumerate `hash`, materializing provided entries on first sight.
  fn resolve(&self, hash: ContentHash) -> Result<HashId, StoreError> {
    let id = self.store.try_enumerate(hash)?;
    let known = self.read().entries.contains_key(&id);
    if !known
      && let Some(provided) = &self.provided
      && let Some(entries) = provided.entries_for(hash)
      && !entries.is_empty()
    {
      let mut state = self.write();
      if !state.entries.contains_key(&id) {
        trace!(id = id.as_u32(), "Materialized provided entries for hash");
        Self::store_entries_locked(&mut state, id, entries);
      }
    }
    Ok(id)
  }

  /// Drop `file`'s association, if any. Entry sets stay: another file may
  /// still share them.
  pub fn forget_file(&self, file: FileId) {
    let mut state = self.write();
    Self::drop_association_locked(&mut state, file);
  }

  fn store_entries_locked(state: &mut HashState<K, V>, id: HashId, entries: Vec<(K, V)>) {
    for (key, value) in &entries {
      state
        .inverted
        .entry(key.clone())
        .or_default()
        .entry(value.clone())
        .or_default()
        .insert(id);
    }
    state.entries.insert(id, entries);
  }

  fn associate_locked(state: &mut HashState<K, V>, file: FileId, id: HashId) {
    if let Some(previous) = state.file_to_hash.insert(file, id) {
      if previous == id {
        return;
      }
      Self::unlink_locked(state, file, previous);
    }
    state.hash_to_files.entry(id).or_default().insert(file);
  }

  fn drop_association_locked(state: &mut HashState<K, V>, file: FileId) {
    if let Some(previous) = state.file_to_hash.remove(&file) {
      Self::unlink_locked(state, file, previous);
    }
  }

  fn unlink_locked(state: &mut HashState<K, V>, file: FileId, id: HashId) {
    if let Some(files) = state.hash_to_files.get_mut(&id) {
      files.remove(&file);
      if files.is_empty() {
        state.hash_to_files.remove(&id);
      }
    }
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, HashState<K, V>> {
    self.state.read().expect("hash index lock poisoned")
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashState<K, V>> {
    self.state.write().expect("hash index lock poisoned")
  }
}

impl<K, V> IndexAccess<K, V> for HashBackedIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  /// Deletions are the base layer's concern; content whose hash already has
  /// an entry set needs only the cheap file association.
  fn update(&self, file: FileId, content: Option<&FileContent>) -> Result<UpdateOutcome, StoreError> {
    let Some(content) = content else {
      return Ok(UpdateOutcome::Skipped);
    };

    let id = self.resolve(content.hash())?;
    let mut state = self.write();
    if state.entries.get(&id).is_some_and(|e| !e.is_empty()) {
      Self::associate_locked(&mut state, file, id);
      Ok(UpdateOutcome::Deduplicated)
    } else {
      // The file will be represented by the base index; a stale association
      // from a previous content revision must not keep answering for it
      Self::drop_association_locked(&mut state, file);
      Ok(UpdateOutcome::Skipped)
    }
  }

  fn data_for_key(&self, key: &K) -> Arc<ValueContainer<V>> {
    let state = self.read();
    let Some(values) = state.inverted.get(key) else {
      return ValueContainer::empty();
    };
    let mut container = ValueContainer::new();
    for (value, ids) in values {
      for id in ids {
        let Some(files) = state.hash_to_files.get(id) else {
          continue;
        };
        for file in files {
          container.add(value.clone(), *file);
        }
      }
    }
    Arc::new(container)
  }

  fn file_data(&self, file: FileId) -> Vec<(K, V)> {
    let state = self.read();
    let Some(id) = state.file_to_hash.get(&file) else {
      return Vec::new();
    };
    state.entries.get(id).cloned().unwrap_or_default()
  }

  fn process_all_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> bool {
    let state = self.read();
    for key in state.inverted.keys() {
      if !processor(key) {
        return false;
      }
    }
    true
  }

  fn clear(&self) {
    let mut state = self.write();
    state.entries.clear();
    state.inverted.clear();
    state.file_to_hash.clear();
    state.hash_to_files.clear();
  }

  fn flush(&self) -> Result<(), StoreError> {
    // The enumerator appends synchronously; nothing else is buffered
    Ok(())
  }
}
