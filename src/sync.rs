//! Thread-safe sharing of a [`Filesystem`]
//!
//! Every operation takes `&mut self`, so sharing one store between threads means
//! serializing whole operations. [`SharedFilesystem`] does that with a single lock;
//! an allocate, copy, and free sequence inside one write is never interleaved with
//! another caller.

use crate::fs::Filesystem;
use crate::io::BackingStore;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cloneable, lock-protected handle to a filesystem
pub struct SharedFilesystem<B: BackingStore> {
    inner: Arc<Mutex<Filesystem<B>>>,
}

impl<B: BackingStore> Clone for SharedFilesystem<B> {
    fn clone(&self) -> Self {
        SharedFilesystem {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BackingStore> SharedFilesystem<B> {
    pub fn new(fs: Filesystem<B>) -> Self {
        SharedFilesystem {
            inner: Arc::new(Mutex::new(fs)),
        }
    }

    /// Run `f` with exclusive access
    pub fn with<R>(&self, f: impl FnOnce(&mut Filesystem<B>) -> R) -> R {
        let mut fs = self.inner.lock();
        f(&mut fs)
    }

    /// Hold the lock across several operations
    pub fn lock(&self) -> MutexGuard<'_, Filesystem<B>> {
        self.inner.lock()
    }

    /// Take the filesystem back once every other clone is gone
    pub fn try_unwrap(self) -> Result<Filesystem<B>, Self> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|inner| SharedFilesystem { inner })
    }
}
