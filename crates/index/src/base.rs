//! The per-file base index.

use std::{
  collections::{BTreeSet, HashMap},
  hash::Hash,
  sync::{Arc, RwLock},
};

use strata_core::{FileContent, FileId};

use crate::{IndexAccess, Mapper, StoreError, UpdateOutcome, ValueContainer};

struct BaseState<K, V> {
  forward: HashMap<FileId, Vec<(K, V)>>,
  inverted: HashMap<K, HashMap<V, BTreeSet<FileId>>>,
}

/// An index keyed by file id: every file owns its entry set.
///
/// Storage is in-memory; the on-disk format of the underlying maps is the
/// host's concern, not this layer's.
pub struct BaseIndex<K, V> {
  mapper: Arc<dyn Mapper<K, V>>,
  state: RwLock<BaseState<K, V>>,
}

impl<K, V> BaseIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  pub fn new(mapper: Arc<dyn Mapper<K, V>>) -> Self {
    Self {
      mapper,
      state: RwLock::new(BaseState {
        forward: HashMap::new(),
        inverted: HashMap::new(),
      }),
    }
  }

  /// Replace `file`'s entries with an externally computed set.
  ///
  /// An empty set removes the file from the index.
  pub fn apply(&self, file: FileId, entries: Vec<(K, V)>) {
    let mut state = self.write();
    Self::remove_locked(&mut state, file);
    if entries.is_empty() {
      return;
    }
    for (key, value) in &entries {
      state
        .inverted
        .entry(key.clone())
        .or_default()
        .entry(value.clone())
        .or_default()
        .insert(file);
    }
    state.forward.insert(file, entries);
  }

  fn remove_locked(state: &mut BaseState<K, V>, file: FileId) {
    let Some(old) = state.forward.remove(&file) else {
      return;
    };
    for (key, value) in old {
      let Some(values) = state.inverted.get_mut(&key) else {
        continue;
      };
      if let Some(files) = values.get_mut(&value) {
        files.remove(&file);
        if files.is_empty() {
          values.remove(&value);
        }
      }
      if values.is_empty() {
        state.inverted.remove(&key);
      }
    }
  }

  fn read(&self) -> std::sync::RwLockReadGuard<'_, BaseState<K, V>> {
    self.state.read().expect("base index lock poisoned")
  }

  fn write(&self) -> std::sync::RwLockWriteGuard<'_, BaseState<K, V>> {
    self.state.write().expect("base index lock poisoned")
  }
}

impl<K, V> IndexAccess<K, V> for BaseIndex<K, V>
where
  K: Clone + Eq + Hash + Send + Sync,
  V: Clone + Eq + Hash + Send + Sync,
{
  fn update(&self, file: FileId, content: Option<&FileContent>) -> Result<UpdateOutcome, StoreError> {
    match content {
      Some(content) => self.apply(file, self.mapper.map(content)),
      None => Self::remove_locked(&mut self.write(), file),
    }
    Ok(UpdateOutcome::Indexed)
  }

  fn data_for_key(&self, key: &K) -> Arc<ValueContainer<V>> {
    let state = self.read();
    let Some(values) = state.inverted.get(key) else {
      return ValueContainer::empty();
    };
    let mut container = ValueContainer::new();
    for (value, files) in values {
      for file in files {
        container.add(value.clone(), *file);
      }
    }
    Arc::new(container)
  }

  fn file_data(&self, file: FileId) -> Vec<(K, V)> {
    self.read().forward.get(&file).cloned().unwrap_or_default()
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
    state.forward.clear();
    state.inverted.clear();
  }

  fn flush(&self) -> Result<(), StoreError> {
    // In-memory maps have nothing buffered
    Ok(())
  }
}
