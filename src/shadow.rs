//! Byte-addressed side table.
//!
//! Every byte of a backing object maps to one shadow unit `T`. The block for an
//! object is allocated on first touch, sized to the whole object and filled with
//! `T::default()`; later lookups for any byte of that object index into the same
//! block. Blocks live until the object is released or the store is dropped.

use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

use crate::error::Exhausted;
use crate::memory::{AllocId, Pointer};

#[derive(Debug, Clone)]
pub struct ShadowStore<T> {
    blocks: FxHashMap<AllocId, Box<[T]>>,
}

impl<T> Default for ShadowStore<T> {
    fn default() -> Self {
        Self {
            blocks: FxHashMap::default(),
        }
    }
}

impl<T: Default + Clone> ShadowStore<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shadow unit of `ptr`, allocating the object's block if absent.
    ///
    /// `object_size` is only consulted on first touch. The caller guarantees
    /// `ptr.offset < object_size`. A block that cannot be allocated, or an
    /// offset past the block, is reported as [`Exhausted::ShadowMemory`] and
    /// leaves the store unchanged.
    pub fn get_mut(&mut self, ptr: Pointer, object_size: u64) -> Result<&mut T, Exhausted> {
        let too_large = Exhausted::ShadowMemory {
            alloc: ptr.alloc,
            size: object_size,
        };
        let block = match self.blocks.entry(ptr.alloc) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(new_block(ptr.alloc, object_size).ok_or(too_large)?)
            }
        };
        usize::try_from(ptr.offset)
            .ok()
            .and_then(|idx| block.get_mut(idx))
            .ok_or(too_large)
    }

    /// Shadow unit of `ptr` if its block exists. Never allocates.
    pub fn get(&self, ptr: Pointer) -> Option<&T> {
        let idx = usize::try_from(ptr.offset).ok()?;
        self.blocks.get(&ptr.alloc).and_then(|block| block.get(idx))
    }

    /// Like [`get`](Self::get), for in-place updates of existing state.
    pub fn get_existing_mut(&mut self, ptr: Pointer) -> Option<&mut T> {
        let idx = usize::try_from(ptr.offset).ok()?;
        self.blocks.get_mut(&ptr.alloc).and_then(|block| block.get_mut(idx))
    }

    /// Drops the block of `alloc`. Returns whether one existed.
    pub fn release(&mut self, alloc: AllocId) -> bool {
        self.blocks.remove(&alloc).is_some()
    }
}

fn new_block<T: Default + Clone>(alloc: AllocId, size: u64) -> Option<Box<[T]>> {
    let len = usize::try_from(size).ok()?;
    let mut block = Vec::new();
    if let Err(err) = block.try_reserve_exact(len) {
        tracing::warn!(%alloc, size, %err, "shadow.block.alloc failed");
        return None;
    }
    tracing::trace!(%alloc, size, "shadow.block.alloc");
    block.resize(len, T::default());
    Some(block.into_boxed_slice())
}
