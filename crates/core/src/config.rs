//! Engine configuration.
//!
//! All knobs are explicit values passed into constructors. `0` means "derive
//! from the machine" for worker counts.

use serde::{Deserialize, Serialize};

/// Upper bound on auto-derived worker counts.
///
/// Indexing is I/O-assisted CPU work; past a handful of workers the content
/// loader becomes the bottleneck.
pub const MAX_AUTO_WORKERS: usize = 4;

/// Worker-pool sizing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// Explicit worker count. `0` = auto: `min(cores - reserved, max_workers)`.
  pub workers: usize,
  /// Headless/batch mode reserves no core for a UI thread.
  pub headless: bool,
  /// Cap for the auto policy.
  pub max_workers: usize,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      workers: 0,
      headless: false,
      max_workers: MAX_AUTO_WORKERS,
    }
  }
}

impl WorkerConfig {
  /// Resolve the worker count for this machine.
  pub fn worker_count(&self) -> usize {
    self.worker_count_for(num_cpus::get())
  }

  /// Resolve the worker count for `available` cores.
  ///
  /// An explicit positive override wins. Otherwise one core is reserved for
  /// the interactive thread unless running headless, and the result is
  /// clamped to `[1, max_workers]`.
  pub fn worker_count_for(&self, available: usize) -> usize {
    if self.workers > 0 {
      return self.workers;
    }
    let reserved = if self.headless { 0 } else { 1 };
    available.saturating_sub(reserved).clamp(1, self.max_workers.max(1))
  }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
  pub workers: WorkerConfig,
  /// How many loaded file contents the queue buffers ahead of the workers.
  pub queue_capacity: usize,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      workers: WorkerConfig::default(),
      queue_capacity: 16,
    }
  }
}
