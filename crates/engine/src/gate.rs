//! The host write gate: a preemptible read-lock with write-imminent
//! notifications.
//!
//! Indexer callbacks run under the shared side of this lock. Before the host
//! takes the exclusive side it announces the write, which cancels every
//! subscribed worker's token — in-flight read-locked work aborts promptly and
//! is requeued instead of blocking the write.

use std::sync::{
  Arc, Mutex,
  atomic::{AtomicU64, Ordering},
};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Raised when read acquisition loses the race against an imminent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("preempted by an imminent write action")]
pub struct Preempted;

/// Shared/exclusive lock with observer hooks, standing in for the host
/// environment's write action machinery.
pub struct WriteGate {
  lock: RwLock<()>,
  writer: Mutex<Option<tokio::task::Id>>,
  subscribers: Mutex<Vec<(u64, CancellationToken)>>,
  next_subscriber: AtomicU64,
}

impl WriteGate {
  pub fn new() -> Arc<Self> {
    Arc::new(Self {
      lock: RwLock::new(()),
      writer: Mutex::new(None),
      subscribers: Mutex::new(Vec::new()),
      next_subscriber: AtomicU64::new(0),
    })
  }

  /// Acquire shared access, giving up as soon as `preempt` trips.
  pub async fn read(&self, preempt: &CancellationToken) -> Result<ReadGuard<'_>, Preempted> {
    tokio::select! {
      biased;
      _ = preempt.cancelled() => Err(Preempted),
      guard = self.lock.read() => Ok(ReadGuard { _guard: guard }),
    }
  }

  /// Announce the write to all subscribers, then acquire exclusive access.
  pub async fn write(&self) -> WriteGuard<'_> {
    self.announce_write_imminent();
    let guard = self.lock.write().await;
    *self.writer_slot() = tokio::task::try_id();
    WriteGuard { gate: self, _guard: guard }
  }

  /// Cancel every currently subscribed token. Called by [`write`](Self::write);
  /// exposed for hosts that announce earlier than they lock.
  pub fn announce_write_imminent(&self) {
    let subscribers = self.subscribers.lock().expect("write gate subscribers poisoned");
    trace!(subscribers = subscribers.len(), "Write imminent");
    for (_, token) in subscribers.iter() {
      token.cancel();
    }
  }

  /// Register for write-imminent notifications. The returned subscription's
  /// token is a child of `parent` (so driver cancellation also trips it) and
  /// is cancelled the instant a write is announced. Dropping the subscription
  /// unsubscribes.
  pub fn subscribe(self: &Arc<Self>, parent: &CancellationToken) -> WriteSubscription {
    let token = parent.child_token();
    let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
    self
      .subscribers
      .lock()
      .expect("write gate subscribers poisoned")
      .push((id, token.clone()));
    WriteSubscription {
      gate: self.clone(),
      id,
      token,
    }
  }

  /// Whether the current tokio task holds the exclusive side.
  ///
  /// The scheduler must not dispatch workers in that case: a worker awaiting
  /// the shared side while its spawner holds the exclusive side would
  /// deadlock. The single indexing loop runs inline instead.
  pub fn current_task_holds_write(&self) -> bool {
    match (tokio::task::try_id(), self.writer_slot().as_ref()) {
      (Some(current), Some(writer)) => current == *writer,
      _ => false,
    }
  }

  fn writer_slot(&self) -> std::sync::MutexGuard<'_, Option<tokio::task::Id>> {
    self.writer.lock().expect("write gate writer slot poisoned")
  }

  fn unsubscribe(&self, id: u64) {
    let mut subscribers = self.subscribers.lock().expect("write gate subscribers poisoned");
    subscribers.retain(|(sub_id, _)| *sub_id != id);
  }
}

/// Shared access for the duration of one indexer call.
pub struct ReadGuard<'a> {
  _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive access held by the host while it mutates.
pub struct WriteGuard<'a> {
  gate: &'a WriteGate,
  _guard: RwLockWriteGuard<'a, ()>,
}

impl Drop for WriteGuard<'_> {
  fn drop(&mut self) {
    *self.gate.writer_slot() = None;
  }
}

/// Active registration for write-imminent notifications.
pub struct WriteSubscription {
  gate: Arc<WriteGate>,
  id: u64,
  token: CancellationToken,
}

impl WriteSubscription {
  /// Tripped when a write is announced or the parent token cancels.
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}

impl Drop for WriteSubscription {
  fn drop(&mut self) {
    self.gate.unsubscribe(self.id);
  }
}
