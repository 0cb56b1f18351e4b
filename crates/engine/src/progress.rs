//! Advisory progress reporting for an indexing pass.

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashSet;
use strata_core::FileId;
use tokio::sync::mpsc;

/// Snapshot of indexing progress, streamed to the driver if it asked.
#[derive(Debug, Clone)]
pub struct IndexProgress {
  /// Files permanently done (indexed, deduplicated, or failed).
  pub processed: usize,
  /// Files in the pass.
  pub total: usize,
  /// The file that just finished, if any.
  pub current_file: Option<FileId>,
}

impl IndexProgress {
  pub fn percent(&self) -> u8 {
    if self.total == 0 {
      100
    } else {
      ((self.processed as f64 / self.total as f64) * 100.0).min(100.0) as u8
    }
  }

  pub fn is_complete(&self) -> bool {
    self.processed >= self.total
  }
}

/// Thread-safe progress state shared by all workers.
///
/// Advisory only: the in-progress set and counter are correct under
/// concurrent updates, but nothing synchronizes on them.
pub struct ProgressTracker {
  total: usize,
  completed: AtomicUsize,
  in_progress: DashSet<FileId>,
  tx: Option<mpsc::Sender<IndexProgress>>,
}

impl ProgressTracker {
  pub fn new(total: usize, tx: Option<mpsc::Sender<IndexProgress>>) -> Self {
    Self {
      total,
      completed: AtomicUsize::new(0),
      in_progress: DashSet::new(),
      tx,
    }
  }

  /// A worker took `file` from the queue.
  pub fn begin(&self, file: FileId) {
    self.in_progress.insert(file);
  }

  /// `file` was pushed back; it will be retried later.
  pub fn abandon(&self, file: FileId) {
    self.in_progress.remove(&file);
  }

  /// `file` is permanently done for this pass.
  pub fn complete(&self, file: FileId) {
    self.in_progress.remove(&file);
    let processed = self.completed.fetch_add(1, Ordering::Relaxed) + 1;
    if let Some(tx) = &self.tx {
      // Dropped on a full channel: progress is advisory
      let _ = tx.try_send(IndexProgress {
        processed,
        total: self.total,
        current_file: Some(file),
      });
    }
  }

  pub fn completed(&self) -> usize {
    self.completed.load(Ordering::Relaxed)
  }

  pub fn fraction(&self) -> f64 {
    if self.total == 0 {
      1.0
    } else {
      self.completed() as f64 / self.total as f64
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[tokio::test]
  async fn test_progress_counts_only_completions() {
    let (tx, mut rx) = mpsc::channel(8);
    let tracker = ProgressTracker::new(2, Some(tx));

    tracker.begin(FileId(1));
    tracker.abandon(FileId(1));
    assert_eq!(tracker.completed(), 0);

    tracker.begin(FileId(1));
    tracker.complete(FileId(1));
    tracker.begin(FileId(2));
    tracker.complete(FileId(2));

    assert_eq!(tracker.completed(), 2);
    assert_eq!(tracker.fraction(), 1.0);

    let first = rx.recv().await.unwrap();
    assert_eq!(first.processed, 1);
    assert_eq!(first.percent(), 50);
    assert!(!first.is_complete());

    let second = rx.recv().await.unwrap();
    assert!(second.is_complete());
  }
}
