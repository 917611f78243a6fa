//! Per-cell state: which borrow id, and which pointee, the pointer value stored
//! in a cell currently carries.
//!
//! Both tables are keyed by the address of the cell holding the pointer, never
//! by the address it points to. Storing a new value overwrites the previous
//! entry; nothing is inherited from the previous occupant.

use crate::error::Exhausted;
use crate::id::BorrowId;
use crate::memory::{AllocId, Pointer};
use crate::shadow::ShadowStore;

#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    store: ShadowStore<Option<BorrowId>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        cell: Pointer,
        object_size: u64,
        id: BorrowId,
    ) -> Result<(), Exhausted> {
        *self.store.get_mut(cell, object_size)? = Some(id);
        tracing::trace!(%cell, tag = %id, "tags.set");
        Ok(())
    }

    /// Tag of `cell`, or [`BorrowId::RAW`] if none was ever recorded.
    pub fn get(&self, cell: Pointer) -> BorrowId {
        self.lookup(cell).unwrap_or(BorrowId::RAW)
    }

    pub fn lookup(&self, cell: Pointer) -> Option<BorrowId> {
        self.store.get(cell).copied().flatten()
    }

    pub fn release(&mut self, alloc: AllocId) {
        self.store.release(alloc);
    }
}

#[derive(Debug, Clone, Default)]
pub struct PointerValues {
    store: ShadowStore<Option<Pointer>>,
}

impl PointerValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        cell: Pointer,
        object_size: u64,
        target: Pointer,
    ) -> Result<(), Exhausted> {
        *self.store.get_mut(cell, object_size)? = Some(target);
        tracing::trace!(%cell, %target, "pointers.set");
        Ok(())
    }

    pub fn get(&self, cell: Pointer) -> Option<Pointer> {
        self.store.get(cell).copied().flatten()
    }

    pub fn release(&mut self, alloc: AllocId) {
        self.store.release(alloc);
    }
}
