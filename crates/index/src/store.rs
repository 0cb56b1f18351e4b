//! Persistent content-hash enumerator.
//!
//! The only durable artifact this layer owns: an append-only file of
//! `digest ‖ u32 LE id` records mapping each first-seen content hash to a
//! dense positive integer. Id `0` is reserved for "unseen". An id, once
//! assigned, is never reused for a different hash, across restarts included.

use std::{
  collections::HashMap,
  fs::{File, OpenOptions},
  io::{Read, Write},
  path::{Path, PathBuf},
  sync::{Arc, Mutex},
};

use strata_core::{ContentHash, ShutdownHooks};
use tracing::{debug, warn};

const RECORD_LEN: usize = ContentHash::LEN + 4;

/// Small dense integer standing in for a content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashId(u32);

impl HashId {
  /// The "unseen hash" sentinel.
  pub const NONE: HashId = HashId(0);

  pub fn from_u32(id: u32) -> Self {
    Self(id)
  }

  pub fn as_u32(self) -> u32 {
    self.0
  }

  pub fn is_none(self) -> bool {
    self.0 == 0
  }

  pub fn is_some(self) -> bool {
    self.0 != 0
  }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("IO error: {0}")]
  Io(#[from] std::io::Error),
  #[error("content hash store is closed")]
  Closed,
}

struct StoreInner {
  ids: HashMap<ContentHash, HashId>,
  next: u32,
  file: Option<File>,
}

/// Persistent bijection from content hash to [`HashId`].
///
/// `try_enumerate` is the single critical section: look-up-or-allocate is
/// atomic under one mutex, so concurrent callers agree on every id.
pub struct ContentHashStore {
  path: PathBuf,
  inner: Mutex<StoreInner>,
}

impl ContentHashStore {
  /// Open (or create) the enumerator at `path` and replay its records.
  pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
    let path = path.as_ref().to_path_buf();
    let mut file = OpenOptions::new().read(true).append(true).create(true).open(&path)?;

    let mut raw = Vec::new();
    file.read_to_end(&mut raw)?;

    let valid_len = raw.len() - raw.len() % RECORD_LEN;
    if valid_len != raw.len() {
      // A crash mid-append leaves a partial record; drop it before appending more
      warn!(path = %path.display(), bytes = raw.len() - valid_len, "Truncating partial enumerator record");
      file.set_len(valid_len as u64)?;
    }

    let mut ids = HashMap::new();
    let mut next = 1u32;
    for record in raw[..valid_len].chunks_exact(RECORD_LEN) {
      let mut digest = [0u8; ContentHash::LEN];
      digest.copy_from_slice(&record[..ContentHash::LEN]);
      let mut id_bytes = [0u8; 4];
      id_bytes.copy_from_slice(&record[ContentHash::LEN..]);
      let id = u32::from_le_bytes(id_bytes);
      ids.insert(ContentHash::from_bytes(digest), HashId(id));
      next = next.max(id + 1);
    }

    debug!(path = %path.display(), entries = ids.len(), "Opened content hash store");
    Ok(Self {
      path,
      inner: Mutex::new(StoreInner {
        ids,
        next,
        file: Some(file),
      }),
    })
  }

  /// Return the id for `hash`, allocating and persisting a fresh positive id
  /// if this is the first time the hash is seen.
  ///
  /// An I/O failure here fails this call only; already-resolved ids are still
  /// served afterwards.
  pub fn try_enumerate(&self, hash: ContentHash) -> Result<HashId, StoreError> {
    let mut guard = self.lock();
    let inner = &mut *guard;

    if let Some(id) = inner.ids.get(&hash) {
      return Ok(*id);
    }

    let file = inner.file.as_mut().ok_or(StoreError::Closed)?;
    let id = HashId(inner.next);

    let mut record = [0u8; RECORD_LEN];
    record[..ContentHash::LEN].copy_from_slice(hash.as_bytes());
    record[ContentHash::LEN..].copy_from_slice(&id.0.to_le_bytes());
    file.write_all(&record)?;

    inner.next += 1;
    inner.ids.insert(hash, id);
    Ok(id)
  }

  /// Number of enumerated hashes.
  pub fn len(&self) -> usize {
    self.lock().ids.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Flush and release the backing file. Idempotent; lookups of
  /// already-resolved ids keep working after close.
  pub fn close(&self) {
    let mut inner = self.lock();
    if let Some(file) = inner.file.take() {
      if let Err(e) = file.sync_all() {
        warn!(path = %self.path.display(), error = %e, "Failed to sync content hash store on close");
      }
      debug!(path = %self.path.display(), entries = inner.ids.len(), "Closed content hash store");
    }
  }

  /// Arrange for [`close`](Self::close) to run at host shutdown.
  pub fn register_shutdown(self: &Arc<Self>, hooks: &dyn ShutdownHooks) {
    let store = self.clone();
    hooks.register("content-hash-store", Box::new(move || store.close()));
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
    self.inner.lock().expect("content hash store mutex poisoned")
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;
  use strata_core::ShutdownRegistry;

  use super::*;

  fn store_path(dir: &tempfile::TempDir) -> PathBuf {
    dir.path().join("hashes.dat")
  }

  #[test]
  fn test_enumeration_is_idempotent_and_discriminating() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentHashStore::open(store_path(&dir)).unwrap();

    let a = ContentHash::of(b"hello");
    let b = ContentHash::of(b"world");

    let first = store.try_enumerate(a).unwrap();
    let second = store.try_enumerate(a).unwrap();
    let other = store.try_enumerate(b).unwrap();

    assert_eq!(first, second, "same bytes must enumerate to the same id");
    assert_ne!(first, other, "different bytes must never share a nonzero id");
    assert!(first.is_some() && other.is_some());
  }

  #[test]
  fn test_ids_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);
    let a = ContentHash::of(b"persisted");

    let store = ContentHashStore::open(&path).unwrap();
    let id = store.try_enumerate(a).unwrap();
    store.try_enumerate(ContentHash::of(b"other")).unwrap();
    store.close();

    let reopened = ContentHashStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 2);
    assert_eq!(reopened.try_enumerate(a).unwrap(), id, "ids are permanent across restarts");
    // New allocations continue after the persisted maximum
    let fresh = reopened.try_enumerate(ContentHash::of(b"fresh")).unwrap();
    assert_eq!(fresh.as_u32(), 3);
  }

  #[test]
  fn test_partial_tail_record_is_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = store_path(&dir);

    let store = ContentHashStore::open(&path).unwrap();
    let id = store.try_enumerate(ContentHash::of(b"keep")).unwrap();
    store.close();

    // Simulate a crash mid-append
    let mut raw = std::fs::read(&path).unwrap();
    raw.extend_from_slice(&[0xAB; 10]);
    std::fs::write(&path, &raw).unwrap();

    let reopened = ContentHashStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
    assert_eq!(reopened.try_enumerate(ContentHash::of(b"keep")).unwrap(), id);
  }

  #[test]
  fn test_close_is_idempotent_and_registers_with_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ContentHashStore::open(store_path(&dir)).unwrap());
    store.try_enumerate(ContentHash::of(b"x")).unwrap();

    let registry = ShutdownRegistry::new();
    store.register_shutdown(&registry);
    registry.run();
    store.close();

    // Already-resolved ids are still served; fresh allocation is refused
    assert_eq!(store.len(), 1);
    assert!(store.try_enumerate(ContentHash::of(b"x")).is_ok());
    assert!(matches!(store.try_enumerate(ContentHash::of(b"y")), Err(StoreError::Closed)));
  }
}
