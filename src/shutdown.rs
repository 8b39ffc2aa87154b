//! Registry of persistent handles that must be released before the process exits.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A handle owning an external resource. `close` must be idempotent and report whether this
/// call performed the release.
pub trait Closeable: Send + Sync {
    fn close(&self) -> bool;
}

/// Weakly held handles, closed together by [`Registry::run`].
pub struct Registry {
    handles: Mutex<Vec<Weak<dyn Closeable>>>,
}

static GLOBAL: Registry = Registry::new();

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub const fn new() -> Self {
        Self {
            handles: parking_lot::const_mutex(Vec::new()),
        }
    }

    /// Registers a handle. Registration never extends the handle's lifetime.
    pub fn register<T: Closeable + 'static>(&self, handle: &Arc<T>) {
        let handle: Arc<dyn Closeable> = handle.clone();
        let mut handles = self.handles.lock();
        handles.retain(|h| h.strong_count() > 0);
        handles.push(Arc::downgrade(&handle));
    }

    /// Closes every live handle and empties the registry. Returns how many handles this call
    /// actually closed; handles already closed elsewhere are skipped.
    pub fn run(&self) -> usize {
        let handles = std::mem::take(&mut *self.handles.lock());
        handles
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|h| h.close())
            .count()
    }

    /// Runs the registry when the returned guard is dropped, including while unwinding.
    pub fn guard(&self) -> ShutdownGuard<'_> {
        ShutdownGuard { registry: self }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registers a handle with the process-wide registry.
pub fn register<T: Closeable + 'static>(handle: &Arc<T>) {
    GLOBAL.register(handle);
}

/// Guard over the process-wide registry, held by the binary for its whole run.
pub fn guard() -> ShutdownGuard<'static> {
    GLOBAL.guard()
}

pub struct ShutdownGuard<'r> {
    registry: &'r Registry,
}

impl Drop for ShutdownGuard<'_> {
    fn drop(&mut self) {
        let closed = self.registry.run();
        if closed > 0 {
            log::debug!("shutdown closed {} handle(s)", closed);
        }
    }
}
