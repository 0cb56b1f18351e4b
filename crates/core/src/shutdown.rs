//! Injected shutdown hooks.
//!
//! Long-lived resources (the content-hash enumerator in particular) register
//! a close hook here instead of against ambient process state, so tests and
//! embedding hosts control when teardown runs.

use std::sync::Mutex;

use tracing::debug;

type Hook = Box<dyn FnOnce() + Send>;

/// Registration point for process-shutdown work.
pub trait ShutdownHooks: Send + Sync {
  /// Register `hook` to run once at shutdown. `name` is for logs only.
  fn register(&self, name: &str, hook: Hook);
}

/// Default registry: hooks run once, in registration order, when the host
/// calls [`ShutdownRegistry::run`]. Running twice is a no-op.
#[derive(Default)]
pub struct ShutdownRegistry {
  hooks: Mutex<Vec<(String, Hook)>>,
}

impl ShutdownRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drain and run every registered hook. Idempotent.
  pub fn run(&self) {
    let hooks = std::mem::take(&mut *self.hooks.lock().expect("shutdown registry poisoned"));
    for (name, hook) in hooks {
      debug!(hook = %name, "Running shutdown hook");
      hook();
    }
  }
}

impl ShutdownHooks for ShutdownRegistry {
  fn register(&self, name: &str, hook: Hook) {
    self.hooks.lock().expect("shutdown registry poisoned").push((name.to_string(), hook));
  }
}
