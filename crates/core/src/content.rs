//! File identities and immutable content handles.

use std::{fmt, path::PathBuf, sync::Arc};

use sha2::{Digest, Sha256};

/// Dense identity for a file within one indexing session.
///
/// Assigned by the driver; the engine only compares and stores these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct FileId(pub u32);

impl fmt::Display for FileId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// SHA-256 digest of a file's bytes.
///
/// Computed once per [`FileContent`] and used only as a lookup key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
  pub const LEN: usize = 32;

  /// Digest `bytes`.
  pub fn of(bytes: &[u8]) -> Self {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Self(hasher.finalize().into())
  }

  pub fn from_bytes(bytes: [u8; 32]) -> Self {
    Self(bytes)
  }

  pub fn as_bytes(&self) -> &[u8; 32] {
    &self.0
  }

  pub fn to_hex(&self) -> String {
    hex::encode(self.0)
  }
}

impl fmt::Debug for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    // First 8 hex chars are plenty for logs
    write!(f, "ContentHash({}..)", &self.to_hex()[..8])
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.to_hex())
  }
}

/// A file the driver wants (re)indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRequest {
  pub file: FileId,
  pub path: PathBuf,
}

impl IndexRequest {
  pub fn new(file: FileId, path: impl Into<PathBuf>) -> Self {
    Self { file, path: path.into() }
  }
}

/// Loaded file content: identity, bytes, and the hash of those bytes.
///
/// Immutable after creation. The content queue owns an item until a worker
/// takes it; dropping the handle (via `release`) reclaims the bytes.
#[derive(Debug, Clone)]
pub struct FileContent {
  file: FileId,
  path: PathBuf,
  bytes: Arc<[u8]>,
  hash: ContentHash,
}

impl FileContent {
  /// Wrap loaded bytes, computing the content hash once.
  pub fn new(file: FileId, path: impl Into<PathBuf>, bytes: Vec<u8>) -> Self {
    let hash = ContentHash::of(&bytes);
    Self {
      file,
      path: path.into(),
      bytes: bytes.into(),
      hash,
    }
  }

  pub fn file(&self) -> FileId {
    self.file
  }

  pub fn path(&self) -> &std::path::Path {
    &self.path
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn hash(&self) -> ContentHash {
    self.hash
  }

  /// The request this content was loaded for, for re-enqueueing.
  pub fn request(&self) -> IndexRequest {
    IndexRequest::new(self.file, self.path.clone())
  }
}
