use std::fmt;
use std::num::NonZeroU64;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::InvalidEvent;

/// Identifier of one backing object (a local, a struct field, a heap block).
///
/// Chosen by the event source. Ids must not be reused while the object is
/// registered; after `deallocate` a fresh id gives the new object clean state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllocId(NonZeroU64);

impl AllocId {
    /// Returns `None` for zero, which is never a valid object id.
    pub fn new(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(AllocId)
    }

    pub fn get(self) -> u64 {
        self.0.get()
    }

    /// Address of byte `offset` inside this object.
    pub fn at(self, offset: u64) -> Pointer {
        Pointer::new(self, offset)
    }
}

impl fmt::Display for AllocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alloc{}", self.0)
    }
}

/// One user-visible byte: object id plus byte offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pointer {
    pub alloc: AllocId,
    pub offset: u64,
}

impl Pointer {
    pub fn new(alloc: AllocId, offset: u64) -> Self {
        Self { alloc, offset }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.alloc, self.offset)
    }
}

/// Live objects and their sizes in bytes.
#[derive(Debug, Clone, Default)]
pub struct Allocations {
    sizes: FxHashMap<AllocId, u64>,
}

impl Allocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alloc: AllocId, size: u64) -> Result<(), InvalidEvent> {
        if size == 0 {
            return Err(InvalidEvent::ZeroSized { alloc });
        }
        if self.sizes.contains_key(&alloc) {
            return Err(InvalidEvent::AlreadyAllocated { alloc });
        }
        self.sizes.insert(alloc, size);
        Ok(())
    }

    pub fn remove(&mut self, alloc: AllocId) -> Result<u64, InvalidEvent> {
        self.sizes
            .remove(&alloc)
            .ok_or(InvalidEvent::UnknownAllocation { alloc })
    }

    pub fn size_of(&self, alloc: AllocId) -> Result<u64, InvalidEvent> {
        self.sizes
            .get(&alloc)
            .copied()
            .ok_or(InvalidEvent::UnknownAllocation { alloc })
    }

    /// Checks that `ptr` names a byte of a live object and returns the object size.
    pub fn check(&self, ptr: Pointer) -> Result<u64, InvalidEvent> {
        let size = self.size_of(ptr.alloc)?;
        if ptr.offset >= size {
            return Err(InvalidEvent::OutOfBounds { ptr, size });
        }
        Ok(size)
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}
