//! Bounded content queue: decouples file I/O from CPU-bound indexing.

use std::{
  collections::{HashSet, VecDeque},
  sync::{Arc, Mutex, MutexGuard},
};

use strata_core::{Cancelled, FileContent, FileId, IndexRequest, checked};
use tokio::{sync::Notify, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

struct QueueState {
  requests: Vec<IndexRequest>,
  ready: VecDeque<FileContent>,
  loading_done: bool,
  /// Items delivered via `take` and neither released nor pushed back.
  outstanding: usize,
  /// Files permanently done for this pass (released, or failed to load).
  completed: HashSet<FileId>,
  load_failures: Vec<FileId>,
}

/// Loads file contents ahead of the workers into a bounded buffer.
///
/// The loader blocks when `capacity` items are buffered, so memory stays
/// bounded however slow the workers are. `push_back` returns a taken item to
/// the front of the buffer for retry after preemption; `release` consumes the
/// item, which is the resource-reclamation mechanism.
///
/// Conservation: `released + remaining == total` at every quiescent point —
/// no item is silently dropped.
pub struct ContentQueue {
  state: Mutex<QueueState>,
  ready: Notify,
  space: Notify,
  capacity: usize,
  total: usize,
}

impl ContentQueue {
  pub fn new(requests: Vec<IndexRequest>, capacity: usize) -> Arc<Self> {
    let total = requests.len();
    Arc::new(Self {
      state: Mutex::new(QueueState {
        requests,
        ready: VecDeque::new(),
        loading_done: false,
        outstanding: 0,
        completed: HashSet::new(),
        load_failures: Vec::new(),
      }),
      ready: Notify::new(),
      space: Notify::new(),
      capacity: capacity.max(1),
      total,
    })
  }

  /// Start materializing `FileContent` asynchronously. Does not block the
  /// caller; read failures are logged, recorded, and skipped.
  pub fn start_loading(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
    let queue = self.clone();
    tokio::spawn(async move {
      let requests = queue.lock().requests.clone();
      debug!(total = requests.len(), "Content loader starting");
      let mut loaded = 0usize;

      for request in requests {
        if cancel.is_cancelled() {
          break;
        }

        let bytes = match tokio::fs::read(&request.path).await {
          Ok(bytes) => bytes,
          Err(e) => {
            warn!(file = %request.file, path = %request.path.display(), error = %e, "Failed to load file content");
            let mut state = queue.lock();
            state.completed.insert(request.file);
            state.load_failures.push(request.file);
            continue;
          }
        };

        let content = FileContent::new(request.file, request.path, bytes);
        if queue.offer(content, &cancel).await.is_err() {
          break;
        }
        loaded += 1;
      }

      queue.lock().loading_done = true;
      queue.ready.notify_waiters();
      debug!(loaded, "Content loader finished");
    })
  }

  /// Buffer one loaded item, waiting for space if the queue is full.
  async fn offer(&self, content: FileContent, cancel: &CancellationToken) -> Result<(), Cancelled> {
    loop {
      let space = self.space.notified();
      tokio::pin!(space);
      space.as_mut().enable();

      {
        let mut state = self.lock();
        if state.ready.len() < self.capacity {
          state.ready.push_back(content);
          drop(state);
          self.ready.notify_waiters();
          return Ok(());
        }
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Cancelled),
        _ = &mut space => {}
      }
    }
  }

  /// Wait for the next item. Returns `None` when the queue is exhausted and
  /// raises [`Cancelled`] when the token trips. Safe to call from any number
  /// of workers; each item is delivered to exactly one caller.
  pub async fn take(&self, cancel: &CancellationToken) -> Result<Option<FileContent>, Cancelled> {
    loop {
      checked(cancel)?;

      let ready = self.ready.notified();
      tokio::pin!(ready);
      ready.as_mut().enable();

      {
        let mut state = self.lock();
        if let Some(item) = state.ready.pop_front() {
          state.outstanding += 1;
          drop(state);
          self.space.notify_one();
          return Ok(Some(item));
        }
        if state.loading_done {
          return Ok(None);
        }
      }

      tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(Cancelled),
        _ = &mut ready => {}
      }
    }
  }

  /// Return a taken-but-not-completed item to the front of the queue so it
  /// is retried, after an attempt was aborted by preemption.
  pub fn push_back(&self, item: FileContent) {
    let mut state = self.lock();
    trace!(file = %item.file(), "Item pushed back for retry");
    state.ready.push_front(item);
    state.outstanding -= 1;
    drop(state);
    self.ready.notify_one();
  }

  /// Consume a taken item once a worker is done with it, on success or
  /// permanent failure.
  pub fn release(&self, item: FileContent) {
    let mut state = self.lock();
    state.completed.insert(item.file());
    state.outstanding -= 1;
    drop(state);
    self.space.notify_one();
  }

  /// Files not yet permanently completed, for the outer retry loop.
  pub fn remaining_requests(&self) -> Vec<IndexRequest> {
    let state = self.lock();
    state
      .requests
      .iter()
      .filter(|r| !state.completed.contains(&r.file))
      .cloned()
      .collect()
  }

  /// Drain the files whose contents could not be loaded this pass.
  pub fn take_load_failures(&self) -> Vec<FileId> {
    std::mem::take(&mut self.lock().load_failures)
  }

  pub fn released_count(&self) -> usize {
    self.lock().completed.len()
  }

  pub fn total(&self) -> usize {
    self.total
  }

  fn lock(&self) -> MutexGuard<'_, QueueState> {
    self.state.lock().expect("content queue mutex poisoned")
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn write_files(dir: &tempfile::TempDir, files: &[(u32, &str, &[u8])]) -> Vec<IndexRequest> {
    files
      .iter()
      .map(|(id, name, bytes)| {
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        IndexRequest::new(FileId(*id), path)
      })
      .collect()
  }

  #[tokio::test]
  async fn test_items_are_delivered_exactly_once_and_conserved() {
    let dir = tempfile::tempdir().unwrap();
    let requests = write_files(&dir, &[(1, "a.txt", b"aa"), (2, "b.txt", b"bb"), (3, "c.txt", b"cc")]);
    let queue = ContentQueue::new(requests, 2);
    let cancel = CancellationToken::new();
    let loader = queue.start_loading(cancel.child_token());

    let mut seen = Vec::new();
    while let Some(item) = queue.take(&cancel).await.unwrap() {
      seen.push(item.file());
      queue.release(item);
    }
    loader.await.unwrap();

    seen.sort();
    assert_eq!(seen, vec![FileId(1), FileId(2), FileId(3)]);
    assert_eq!(queue.released_count(), queue.total());
    assert!(queue.remaining_requests().is_empty());
  }

  #[tokio::test]
  async fn test_push_back_retries_at_the_front() {
    let dir = tempfile::tempdir().unwrap();
    let requests = write_files(&dir, &[(1, "a.txt", b"aa"), (2, "b.txt", b"bb")]);
    let queue = ContentQueue::new(requests, 4);
    let cancel = CancellationToken::new();
    let loader = queue.start_loading(cancel.child_token());
    loader.await.unwrap();

    let first = queue.take(&cancel).await.unwrap().unwrap();
    let first_id = first.file();
    queue.push_back(first);

    let retried = queue.take(&cancel).await.unwrap().unwrap();
    assert_eq!(retried.file(), first_id, "pushed-back item must come out first");

    // Conservation holds across the retry
    queue.release(retried);
    let second = queue.take(&cancel).await.unwrap().unwrap();
    queue.release(second);
    assert_eq!(queue.released_count(), 2);
    assert!(queue.remaining_requests().is_empty());
  }

  #[tokio::test]
  async fn test_take_raises_cancellation_not_exhaustion() {
    let queue = ContentQueue::new(Vec::new(), 4);
    // Loader never started: take would block forever without the token
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert_eq!(queue.take(&cancel).await.unwrap_err(), Cancelled);
  }

  #[tokio::test]
  async fn test_unreadable_file_is_recorded_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut requests = write_files(&dir, &[(1, "ok.txt", b"fine")]);
    requests.push(IndexRequest::new(FileId(2), dir.path().join("missing.txt")));
    let queue = ContentQueue::new(requests, 4);
    let cancel = CancellationToken::new();
    queue.start_loading(cancel.child_token()).await.unwrap();

    let item = queue.take(&cancel).await.unwrap().unwrap();
    assert_eq!(item.file(), FileId(1));
    queue.release(item);
    assert!(queue.take(&cancel).await.unwrap().is_none());

    assert_eq!(queue.take_load_failures(), vec![FileId(2)]);
    assert!(queue.remaining_requests().is_empty(), "failed loads count as completed");
  }

  #[tokio::test]
  async fn test_loader_respects_capacity() {
    let dir = tempfile::tempdir().unwrap();
    let files: Vec<(u32, String)> = (1..=6).map(|i| (i, format!("f{i}.txt"))).collect();
    let requests: Vec<IndexRequest> = files
      .iter()
      .map(|(id, name)| {
        let path = dir.path().join(name);
        std::fs::write(&path, b"x").unwrap();
        IndexRequest::new(FileId(*id), path)
      })
      .collect();

    let queue = ContentQueue::new(requests, 2);
    let cancel = CancellationToken::new();
    let loader = queue.start_loading(cancel.child_token());

    // Drain slowly; the loader must make progress without overfilling
    let mut count = 0;
    while let Some(item) = queue.take(&cancel).await.unwrap() {
      assert!(queue.lock().ready.len() <= 2, "buffer must stay within capacity");
      queue.release(item);
      count += 1;
    }
    loader.await.unwrap();
    assert_eq!(count, 6);
  }
}
