//! Shared handle for embeddings that report events from several threads.
//!
//! Every operation holds the lock for its whole duration, so all accesses to a
//! backing object's tags, pointer values and stacks are serialized in the
//! order the calls acquire the lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::MonitorConfig;
use crate::error::Result;
use crate::id::BorrowId;
use crate::memory::{AllocId, Pointer};
use crate::monitor::{Generation, Monitor, Place};
use crate::stack::{BorrowKind, Item};
use crate::trace::Event;

#[derive(Debug, Clone)]
pub struct SharedMonitor {
    inner: Arc<Mutex<Monitor>>,
}

impl SharedMonitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        Ok(Self::from(Monitor::new(config)?))
    }

    /// Runs `f` with exclusive access, for sequences that must not interleave
    /// with other threads.
    pub fn with<R>(&self, f: impl FnOnce(&mut Monitor) -> R) -> R {
        f(&mut *self.inner.lock())
    }

    pub fn allocate(&self, alloc: AllocId, size: u64) -> Result<()> {
        self.inner.lock().allocate(alloc, size)
    }

    pub fn deallocate(&self, alloc: AllocId) -> Result<()> {
        self.inner.lock().deallocate(alloc)
    }

    pub fn new_local(&self, local: Pointer) -> Result<BorrowId> {
        self.inner.lock().new_local(local)
    }

    pub fn new_dynamic(&self, cell: Pointer, target: Pointer) -> Result<BorrowId> {
        self.inner.lock().new_dynamic(cell, target)
    }

    pub fn derive(&self, new_cell: Pointer, source: Place, kind: BorrowKind) -> Result<BorrowId> {
        self.inner.lock().derive(new_cell, source, kind)
    }

    pub fn transmute(&self, new_cell: Pointer, source_cell: Pointer) -> Result<BorrowId> {
        self.inner.lock().transmute(new_cell, source_cell)
    }

    pub fn validate_use(&self, place: Place, generation: Generation) -> Result<()> {
        self.inner.lock().validate_use(place, generation)
    }

    pub fn validate_read(&self, place: Place) -> Result<()> {
        self.inner.lock().validate_read(place)
    }

    pub fn apply(&self, event: &Event) -> Result<Option<BorrowId>> {
        self.inner.lock().apply(event)
    }

    /// Copy of the live items on the stack of `ptr`.
    pub fn items(&self, ptr: Pointer) -> Vec<Item> {
        self.inner.lock().items(ptr).to_vec()
    }

    /// Clone of the current state, e.g. to explore an alternative ordering.
    pub fn snapshot(&self) -> Monitor {
        self.inner.lock().clone()
    }
}

impl From<Monitor> for SharedMonitor {
    fn from(monitor: Monitor) -> Self {
        Self {
            inner: Arc::new(Mutex::new(monitor)),
        }
    }
}
