//! Directory Handle
//!
//! Shares the current [`InstrumentDirectory`] between readers and the
//! catalog refresher. Readers take a snapshot; a refresh swaps in a new
//! directory without blocking them.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::domain::instrument::InstrumentDirectory;

/// Cloneable handle to the current directory snapshot.
#[derive(Debug, Clone)]
pub struct DirectoryHandle {
    inner: Arc<ArcSwap<InstrumentDirectory>>,
}

impl DirectoryHandle {
    /// Create a handle around an initial directory.
    #[must_use]
    pub fn new(directory: InstrumentDirectory) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(directory)),
        }
    }

    /// Create a handle around an empty directory.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(InstrumentDirectory::default())
    }

    /// Current snapshot. Stays valid after a later replace.
    #[must_use]
    pub fn load(&self) -> Arc<InstrumentDirectory> {
        self.inner.load_full()
    }

    /// Swap in a new directory.
    pub fn replace(&self, directory: InstrumentDirectory) {
        let instruments = directory.len();
        self.inner.store(Arc::new(directory));
        tracing::info!(instruments, "Instrument directory replaced");
    }

    /// Number of instruments in the current snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    /// Whether the current snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.load().is_empty()
    }
}

impl Default for DirectoryHandle {
    fn default() -> Self {
        Self::empty()
    }
}
