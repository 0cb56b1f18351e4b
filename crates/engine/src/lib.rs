//! Concurrent indexing engine.
//!
//! A bounded content queue hides I/O latency behind CPU-bound indexing:
//!
//! ```text
//! Loader → ContentQueue → worker × N → indexer callback
//!            (bounded,      (preemptible read-lock,
//!             push-front     two cancellation channels)
//!             retry)
//! ```
//!
//! Two independent cancellation sources are honored everywhere: the driver's
//! token (project shutdown) and the host's "write action is imminent" signal,
//! which preempts in-flight read-locked work without losing it — preempted
//! items are pushed back and the whole batch is retried until a pass
//! completes with no preemption.

mod gate;
mod progress;
mod queue;
mod scheduler;

pub use gate::{Preempted, ReadGuard, WriteGate, WriteGuard, WriteSubscription};
pub use progress::{IndexProgress, ProgressTracker};
pub use queue::ContentQueue;
pub use scheduler::{FailedFiles, Indexer, IndexerError, IndexingScheduler, PassStats};
