//! Write serialization around load-modify-save.
//!
//! [`Unlocked`] runs the cycle bare: two concurrent upserts against one
//! file race and the last save wins. [`LocationLocks`] serializes writers
//! per path within a process; multi-process writers need their own
//! coordination.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Scope held for the whole load, mutate, save sequence of one location.
pub trait WriteLock {
    fn scoped<R>(&self, location: &Path, f: impl FnOnce() -> R) -> R;
}

impl<T: WriteLock> WriteLock for &T {
    fn scoped<R>(&self, location: &Path, f: impl FnOnce() -> R) -> R {
        (**self).scoped(location, f)
    }
}

/// No serialization.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlocked;

impl WriteLock for Unlocked {
    fn scoped<R>(&self, _location: &Path, f: impl FnOnce() -> R) -> R {
        f()
    }
}

/// One mutex per store path.
///
/// Paths are compared as given, so `faces.json` and `./faces.json` are
/// different locations. Entries are never evicted; the map grows by one
/// mutex per distinct path for the life of the registry.
#[derive(Debug, Default)]
pub struct LocationLocks {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LocationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> &'static LocationLocks {
        static GLOBAL: OnceLock<LocationLocks> = OnceLock::new();
        GLOBAL.get_or_init(LocationLocks::new)
    }

    fn lock_for(&self, location: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(location.to_path_buf()).or_default())
    }
}

impl WriteLock for LocationLocks {
    fn scoped<R>(&self, location: &Path, f: impl FnOnce() -> R) -> R {
        let lock = self.lock_for(location);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        f()
    }
}
