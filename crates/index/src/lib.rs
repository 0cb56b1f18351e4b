//! Hash-deduplicating index layer.
//!
//! Three stores satisfy one update/query contract:
//!
//! ```text
//! MergedIndex
//!   ├── BaseIndex        per-file entries (file-id keyed)
//!   └── HashBackedIndex  shared entries (hash-id keyed)
//!         └── ContentHashStore  persistent hash → id enumerator
//! ```
//!
//! The merged store guarantees that a file is represented in exactly one of
//! the two physical stores, so two files with byte-identical content share
//! one entry set instead of being indexed twice.

mod base;
mod container;
mod hash;
mod merged;
mod provided;
mod store;

use std::sync::Arc;

pub use base::BaseIndex;
pub use container::ValueContainer;
pub use hash::HashBackedIndex;
pub use merged::MergedIndex;
pub use provided::{ProvidedEntries, StaticProvidedEntries};
use strata_core::{FileContent, FileId};
pub use store::{ContentHashStore, HashId, StoreError};

/// What an index did with one file's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
  /// Entries were computed (or removed) and stored for this file.
  Indexed,
  /// The content hash was already covered; only a file mapping was recorded.
  Deduplicated,
  /// The input did not concern this index.
  Skipped,
}

/// A pluggable indexer: turns file content into index entries.
pub trait Mapper<K, V>: Send + Sync {
  fn map(&self, content: &FileContent) -> Vec<(K, V)>;
}

impl<K, V, F> Mapper<K, V> for F
where
  F: Fn(&FileContent) -> Vec<(K, V)> + Send + Sync,
{
  fn map(&self, content: &FileContent) -> Vec<(K, V)> {
    self(content)
  }
}

/// The update/query contract every index role implements.
///
/// `update` with `None` content means the file was deleted. Containers are
/// rebuilt on each read; they are never cached across queries.
pub trait IndexAccess<K, V>: Send + Sync {
  /// Feed one file's content (or its deletion) to the index.
  fn update(&self, file: FileId, content: Option<&FileContent>) -> Result<UpdateOutcome, StoreError>;

  /// All (value, file-id set) pairs recorded under `key`.
  fn data_for_key(&self, key: &K) -> Arc<ValueContainer<V>>;

  /// The entries recorded for `file`, however they are physically stored.
  fn file_data(&self, file: FileId) -> Vec<(K, V)>;

  /// Visit every key; stops and returns `false` if the processor does.
  fn process_all_keys(&self, processor: &mut dyn FnMut(&K) -> bool) -> bool;

  /// Drop all indexed data.
  fn clear(&self);

  /// Flush buffered state to durable storage.
  fn flush(&self) -> Result<(), StoreError>;
}
