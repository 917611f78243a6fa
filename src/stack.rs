//! Borrow stacks: one ordered, bounded sequence of `(kind, id)` items per byte.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Exhausted;
use crate::id::BorrowId;
use crate::memory::{AllocId, Pointer};
use crate::shadow::ShadowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BorrowKind {
    /// `&mut x`
    Unique,
    /// `&x`
    SharedReadOnly,
    /// `*mut x`, always carries [`BorrowId::RAW`].
    SharedReadWrite,
    /// Revoked. Only reachable by being truncated off a stack, never pushed.
    Disabled,
}

impl fmt::Display for BorrowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BorrowKind::Unique => "Unique",
            BorrowKind::SharedReadOnly => "SharedReadOnly",
            BorrowKind::SharedReadWrite => "SharedReadWrite",
            BorrowKind::Disabled => "Disabled",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub kind: BorrowKind,
    pub id: BorrowId,
}

impl Item {
    pub fn new(kind: BorrowKind, id: BorrowId) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// Permission stack of one byte. Freshest item on top.
///
/// Items above `top` are retired: they were discarded by a validation and stay
/// in the backing storage only until the next push overwrites them, so that a
/// later lookup can tell "disabled" apart from "never existed".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stack {
    items: Vec<Item>,
    top: usize,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live items, bottom first.
    pub fn items(&self) -> &[Item] {
        &self.items[..self.top]
    }

    /// Items truncated off by the most recent validations and not yet overwritten.
    pub fn retired(&self) -> &[Item] {
        &self.items[self.top..]
    }

    pub fn len(&self) -> usize {
        self.top
    }

    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    fn push(&mut self, item: Item) {
        debug_assert_ne!(item.kind, BorrowKind::Disabled);
        self.items.truncate(self.top);
        self.items.push(item);
        self.top += 1;
    }

    /// New top for a write through `id`: one past the lowest live item that
    /// matches both `id` and `kind`.
    pub fn find_use(&self, id: BorrowId, kind: BorrowKind) -> Option<usize> {
        self.items()
            .iter()
            .position(|item| item.id == id && item.kind == kind)
            .map(|idx| idx + 1)
    }

    /// New top for a read through `id`.
    ///
    /// Finds the lowest live item carrying `id` (any kind), then keeps every
    /// contiguous `SharedReadOnly` item directly above it.
    pub fn find_read(&self, id: BorrowId) -> Option<usize> {
        let items = self.items();
        let found = items.iter().position(|item| item.id == id)?;
        let shared_above = items[found + 1..]
            .iter()
            .take_while(|item| item.kind == BorrowKind::SharedReadOnly)
            .count();
        Some(found + 1 + shared_above)
    }

    /// Retires everything at or above index `new_top`. The top never moves up.
    pub fn truncate(&mut self, new_top: usize) {
        debug_assert!(new_top <= self.top);
        self.top = new_top.min(self.top);
    }

    /// Current permission held by `id` on this byte.
    ///
    /// The kind of the lowest live item with that id, `Disabled` if the id only
    /// appears among retired items, `None` if it was never seen here.
    pub fn permission(&self, id: BorrowId) -> Option<BorrowKind> {
        if let Some(item) = self.items().iter().find(|item| item.id == id) {
            return Some(item.kind);
        }
        self.retired()
            .iter()
            .any(|item| item.id == id)
            .then_some(BorrowKind::Disabled)
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (idx, item) in self.items().iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{item}")?;
        }
        f.write_str("]")
    }
}

/// Lazily created borrow stack for every tracked byte.
#[derive(Debug, Clone)]
pub struct BorrowStacks {
    store: ShadowStore<Stack>,
    max_depth: usize,
}

impl BorrowStacks {
    pub fn new(max_depth: usize) -> Self {
        Self {
            store: ShadowStore::new(),
            max_depth,
        }
    }

    pub fn get_or_create(
        &mut self,
        ptr: Pointer,
        object_size: u64,
    ) -> Result<&mut Stack, Exhausted> {
        self.store.get_mut(ptr, object_size)
    }

    pub fn get(&self, ptr: Pointer) -> Option<&Stack> {
        self.store.get(ptr)
    }

    /// Existing stack of `ptr`. Never allocates.
    pub fn get_mut(&mut self, ptr: Pointer) -> Option<&mut Stack> {
        self.store.get_existing_mut(ptr)
    }

    pub fn push(
        &mut self,
        ptr: Pointer,
        object_size: u64,
        item: Item,
    ) -> Result<(), Exhausted> {
        let max = self.max_depth;
        let stack = self.get_or_create(ptr, object_size)?;
        if stack.len() >= max {
            tracing::warn!(at = %ptr, max, "borrow stack capacity reached");
            return Err(Exhausted::StackDepth { at: ptr, max });
        }
        stack.push(item);
        tracing::trace!(at = %ptr, %item, depth = stack.len(), "stack.push");
        Ok(())
    }

    pub fn release(&mut self, alloc: AllocId) {
        self.store.release(alloc);
    }
}
