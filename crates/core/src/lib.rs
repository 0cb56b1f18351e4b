//! Shared leaf types for the strata indexing engine.
//!
//! Everything here is runtime-agnostic data: file identities and content
//! handles, the cancellation error, worker/queue configuration, and the
//! injected shutdown-hook registry. The index layer and the scheduling
//! engine both build on this crate and never on each other.

mod cancel;
mod config;
mod content;
mod shutdown;

pub use cancel::{Cancelled, checked};
pub use config::{EngineConfig, WorkerConfig};
pub use content::{ContentHash, FileContent, FileId, IndexRequest};
pub use shutdown::{ShutdownHooks, ShutdownRegistry};
