//! Worker-pool dispatch with cancellation-aware batch retry.
//!
//! `process_files` is the driver's entry point. Each batch attempt drains a
//! fresh [`ContentQueue`] with N workers; a write-imminent announcement makes
//! affected workers push their item back and exit, and the outer loop retries
//! the remaining files until an attempt finishes with no preemption. This
//! trades redundant re-scanning for correctness under the load pattern "many
//! short write actions interrupting a long background index build".

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashSet;
use strata_core::{Cancelled, EngineConfig, FileContent, FileId, IndexRequest, checked};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
  ContentQueue,
  gate::{Preempted, WriteGate},
  progress::{IndexProgress, ProgressTracker},
};

/// Error surfaced by an indexer callback.
#[derive(Debug, thiserror::Error)]
pub enum IndexerError {
  /// A cancellation observed inside the callback; never marks the file
  /// failed.
  #[error("indexing cancelled")]
  Cancelled(#[from] Cancelled),
  /// A real per-file failure; the file is marked un-indexable for the
  /// session.
  #[error("indexer failed: {0}")]
  Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl IndexerError {
  pub fn failed(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    Self::Failed(error.into())
  }
}

/// The externally supplied indexing callback, invoked under the preemptible
/// read-lock. `cancel` is the inner preemption token; callbacks doing long
/// CPU-bound stretches should poll it between steps.
#[async_trait]
pub trait Indexer: Send + Sync {
  async fn index(&self, content: &FileContent, cancel: &CancellationToken) -> Result<(), IndexerError>;
}

/// Sticky per-file failure flags, scoped to one scheduler session.
///
/// A file that failed to index is not retried until a new session starts;
/// external tooling reads the snapshot to report files needing a restart.
#[derive(Default)]
pub struct FailedFiles {
  files: DashSet<FileId>,
}

impl FailedFiles {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn mark(&self, file: FileId) {
    self.files.insert(file);
  }

  pub fn contains(&self, file: FileId) -> bool {
    self.files.contains(&file)
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn snapshot(&self) -> Vec<FileId> {
    let mut files: Vec<_> = self.files.iter().map(|f| *f).collect();
    files.sort();
    files
  }

  pub fn clear(&self) {
    self.files.clear();
  }
}

/// Result of a completed indexing pass.
#[derive(Debug, Default, Clone)]
pub struct PassStats {
  pub total: usize,
  /// Files permanently completed, failures included.
  pub completed: usize,
  /// Files newly marked failed during this pass.
  pub failed: usize,
  /// Batch attempts it took to finish (1 = no preemption).
  pub attempts: usize,
  /// Largest worker count used by an attempt.
  pub workers: usize,
}

enum WorkerExit {
  Finished,
  Preempted,
  Cancelled,
}

struct BatchOutcome {
  finished: bool,
  remaining: Vec<IndexRequest>,
  workers: usize,
}

/// Everything a worker loop needs, cloneable per worker.
#[derive(Clone)]
struct WorkerContext {
  queue: Arc<ContentQueue>,
  gate: Arc<WriteGate>,
  indexer: Arc<dyn Indexer>,
  failed: Arc<FailedFiles>,
  tracker: Arc<ProgressTracker>,
  /// Outer, driver-level cancellation.
  cancel: CancellationToken,
  /// Inner token: trips on write-imminent or driver cancellation.
  preempt: CancellationToken,
  /// The calling task holds the exclusive write side; skip read acquisition.
  write_held: bool,
}

/// Runs indexing passes: worker-count policy, queue setup, preemption-aware
/// workers, and the outer retry loop.
pub struct IndexingScheduler {
  config: EngineConfig,
  gate: Arc<WriteGate>,
  failed: Arc<FailedFiles>,
}

impl IndexingScheduler {
  /// A scheduler is one session: the sticky failure table starts empty.
  pub fn new(config: EngineConfig, gate: Arc<WriteGate>) -> Self {
    Self {
      config,
      gate,
      failed: Arc::new(FailedFiles::new()),
    }
  }

  pub fn gate(&self) -> &Arc<WriteGate> {
    &self.gate
  }

  pub fn failed_files(&self) -> &Arc<FailedFiles> {
    &self.failed
  }

  /// Index `requests`, retrying preempted batches until a pass completes.
  ///
  /// Returns when every file is permanently completed (indexed,
  /// deduplicated, or failed), or raises [`Cancelled`] when the driver token
  /// trips. Per-file failures never abort the pass.
  pub async fn process_files(
    &self,
    requests: Vec<IndexRequest>,
    indexer: Arc<dyn Indexer>,
    cancel: &CancellationToken,
    progress: Option<mpsc::Sender<IndexProgress>>,
  ) -> Result<PassStats, Cancelled> {
    let total = requests.len();
    let tracker = Arc::new(ProgressTracker::new(total, progress));
    let failed_before = self.failed.len();
    let mut stats = PassStats {
      total,
      ..Default::default()
    };

    info!(total, "Indexing pass starting");

    let mut remaining = requests;
    loop {
      checked(cancel)?;
      stats.attempts += 1;

      let outcome = self.process_batch(remaining, indexer.clone(), cancel, &tracker).await?;
      stats.workers = stats.workers.max(outcome.workers);
      if outcome.finished {
        break;
      }
      remaining = outcome.remaining;
      debug!(
        attempt = stats.attempts,
        remaining = remaining.len(),
        "Batch interrupted by a write action, retrying"
      );
    }

    stats.completed = tracker.completed();
    stats.failed = self.failed.len() - failed_before;
    info!(
      total = stats.total,
      completed = stats.completed,
      failed = stats.failed,
      attempts = stats.attempts,
      "Indexing pass complete"
    );
    if stats.failed > 0 {
      warn!(failed = stats.failed, "Some files failed to index; they need a new session to be retried");
    }
    Ok(stats)
  }

  /// One batch attempt: drain the queue with N workers, or report what
  /// remains after a preemption.
  async fn process_batch(
    &self,
    requests: Vec<IndexRequest>,
    indexer: Arc<dyn Indexer>,
    cancel: &CancellationToken,
    tracker: &Arc<ProgressTracker>,
  ) -> Result<BatchOutcome, Cancelled> {
    // Files already marked failed are not retried within this session
    let requests: Vec<IndexRequest> = requests
      .into_iter()
      .filter(|r| {
        if self.failed.contains(r.file) {
          trace!(file = %r.file, "Skipping file marked failed");
          tracker.complete(r.file);
          false
        } else {
          true
        }
      })
      .collect();

    if requests.is_empty() {
      return Ok(BatchOutcome {
        finished: true,
        remaining: Vec::new(),
        workers: 0,
      });
    }

    let workers = self.config.workers.worker_count();
    let queue = ContentQueue::new(requests, self.config.queue_capacity);
    let loader_cancel = cancel.child_token();
    let loader = queue.start_loading(loader_cancel.clone());

    // Subscribed for exactly this attempt; dropping unsubscribes whatever
    // the exit path
    let subscription = self.gate.subscribe(cancel);
    let write_held = self.gate.current_task_holds_write();

    let ctx = WorkerContext {
      queue: queue.clone(),
      gate: self.gate.clone(),
      indexer,
      failed: self.failed.clone(),
      tracker: tracker.clone(),
      cancel: cancel.clone(),
      preempt: subscription.token().clone(),
      write_held,
    };

    let direct = workers == 1 || write_held;
    let dispatched = if direct { 1 } else { workers };
    let exits: Vec<WorkerExit> = if direct {
      // Dispatching to a pool while this task holds the exclusive write side
      // would deadlock on read acquisition; run the single loop right here
      debug!(write_held, "Running the indexing loop on the calling task");
      vec![worker_loop(0, ctx).await]
    } else {
      debug!(workers, "Dispatching indexing workers");
      let handles: Vec<_> = (0..workers)
        .map(|id| {
          let ctx = ctx.clone();
          tokio::spawn(async move { worker_loop(id, ctx).await })
        })
        .collect();
      futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| {
          joined.unwrap_or_else(|e| {
            // A panicking worker must not sink the pass; its item is retried
            error!(error = %e, "Indexing worker aborted unexpectedly");
            WorkerExit::Preempted
          })
        })
        .collect()
    };

    drop(subscription);
    loader_cancel.cancel();
    let _ = loader.await;

    // Contents that could not be read fail those files permanently
    for file in queue.take_load_failures() {
      warn!(%file, "Marking unreadable file as failed to index");
      self.failed.mark(file);
      tracker.complete(file);
    }

    if cancel.is_cancelled() || exits.iter().any(|e| matches!(e, WorkerExit::Cancelled)) {
      return Err(Cancelled);
    }

    let remaining = queue.remaining_requests();
    let finished = exits.iter().all(|e| matches!(e, WorkerExit::Finished)) && remaining.is_empty();
    Ok(BatchOutcome {
      finished,
      remaining,
      workers: dispatched,
    })
  }
}

/// Exit state when a worker stops because its tokens tripped.
fn exit_for(outer: &CancellationToken) -> WorkerExit {
  if outer.is_cancelled() {
    WorkerExit::Cancelled
  } else {
    WorkerExit::Preempted
  }
}

async fn worker_loop(worker_id: usize, ctx: WorkerContext) -> WorkerExit {
  trace!(worker_id, "Indexing worker starting");
  let mut processed = 0usize;

  loop {
    let item = match ctx.queue.take(&ctx.cancel).await {
      Err(Cancelled) => {
        trace!(worker_id, processed, "Indexing worker cancelled");
        return WorkerExit::Cancelled;
      }
      Ok(None) => {
        trace!(worker_id, processed, "Indexing worker: queue exhausted");
        return WorkerExit::Finished;
      }
      Ok(Some(item)) => item,
    };

    let file = item.file();
    ctx.tracker.begin(file);

    // Acquire the preemptible read side, unless the calling task already
    // holds the write side (read would deadlock; exclusivity covers us)
    let guard = if ctx.write_held {
      None
    } else {
      match ctx.gate.read(&ctx.preempt).await {
        Ok(guard) => Some(guard),
        Err(Preempted) => {
          ctx.tracker.abandon(file);
          ctx.queue.push_back(item);
          trace!(worker_id, %file, "Preempted before indexing, item requeued");
          return exit_for(&ctx.cancel);
        }
      }
    };

    // The callback races the preemption token, so a write announcement
    // aborts it at its next await point even without cooperative polling
    let result = tokio::select! {
      biased;
      _ = ctx.preempt.cancelled() => Err(IndexerError::Cancelled(Cancelled)),
      result = ctx.indexer.index(&item, &ctx.preempt) => result,
    };
    drop(guard);

    match result {
      Ok(()) => {
        ctx.queue.release(item);
        ctx.tracker.complete(file);
        processed += 1;
      }
      Err(IndexerError::Cancelled(_)) => {
        ctx.tracker.abandon(file);
        ctx.queue.push_back(item);
        debug!(worker_id, %file, "Indexing preempted mid-item, item requeued");
        return exit_for(&ctx.cancel);
      }
      Err(IndexerError::Failed(error)) => {
        warn!(worker_id, %file, error = %error, "Indexer failed; file will not be retried this session");
        // The sticky flag lands strictly before the item is released
        ctx.failed.mark(file);
        ctx.queue.release(item);
        ctx.tracker.complete(file);
      }
    }
  }
}
