use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Exhausted;

/// Borrow identifier. Issued in strictly increasing order, never reused.
///
/// [`BorrowId::RAW`] is the shared id carried by every raw pointer; the
/// allocator never hands it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorrowId(u64);

impl BorrowId {
    pub const RAW: BorrowId = BorrowId(u64::MAX);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_raw(self) -> bool {
        self == Self::RAW
    }
}

impl fmt::Display for BorrowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_raw() {
            f.write_str("<raw>")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdAllocator {
    next: u64,
    // exclusive
    limit: u64,
    bits: u32,
}

impl IdAllocator {
    /// Allocator over `bits`-wide ids. `bits` must be in `1..=64`.
    pub fn new(bits: u32) -> Self {
        debug_assert!((1..=64).contains(&bits));
        let limit = if bits >= 64 { u64::MAX } else { 1u64 << bits };
        Self { next: 0, limit, bits }
    }

    pub fn fresh(&mut self) -> Result<BorrowId, Exhausted> {
        if self.next >= self.limit {
            tracing::warn!(bits = self.bits, "borrow id space exhausted");
            return Err(Exhausted::IdSpace { bits: self.bits });
        }
        let id = BorrowId(self.next);
        self.next += 1;
        Ok(id)
    }

    /// Number of ids issued so far.
    pub fn issued(&self) -> u64 {
        self.next
    }
}
