//! Error types.
//!
//! A [`Violation`] is the monitor's product: the event trace broke an aliasing
//! rule. [`Exhausted`] means a configured bound was hit and the analysis run
//! cannot continue. [`InvalidEvent`] means the event source sent something the
//! monitor cannot interpret. The three never overlap.

use std::fmt;

use thiserror::Error;

use crate::id::BorrowId;
use crate::memory::{AllocId, Pointer};
use crate::monitor::Place;
use crate::stack::BorrowKind;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Violation(Box<Violation>),

    #[error(transparent)]
    Exhausted(#[from] Exhausted),

    #[error(transparent)]
    InvalidEvent(#[from] InvalidEvent),

    /// Rejected by `Monitor::new`.
    #[error("invalid monitor configuration: {0}")]
    Config(String),
}

impl Error {
    pub fn is_violation(&self) -> bool {
        matches!(self, Error::Violation(_))
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Error::Violation(violation) => Some(violation),
            _ => None,
        }
    }

    /// Whether the enclosing analysis run must stop rather than report an
    /// aliasing bug.
    pub fn is_fatal(&self) -> bool {
        !self.is_violation()
    }
}

impl From<Violation> for Error {
    fn from(violation: Violation) -> Self {
        Error::Violation(Box::new(violation))
    }
}

/// Which access rule rejected the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rule {
    Use1,
    Use2,
    Read1,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Rule::Use1 => "USE1",
            Rule::Use2 => "USE2",
            Rule::Read1 => "READ1",
        })
    }
}

/// Why the expected item was not on the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    /// The tag was retired by an earlier access.
    Disabled,
    /// The tag is live, but with a kind that does not grant this access.
    WrongKind(BorrowKind),
    /// The tag never appeared on this byte's stack.
    NotFound,
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Disabled => f.write_str("tag was disabled by an earlier access"),
            Cause::WrongKind(kind) => write!(f, "tag only grants {kind}"),
            Cause::NotFound => f.write_str("tag is not on the borrow stack"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{rule} violation on {place}: expected {} for tag {tag} at {target}, {cause}",
    .expected.map_or_else(|| "any item".to_string(), |kind| kind.to_string())
)]
pub struct Violation {
    pub rule: Rule,
    /// The accessed local or pointer cell.
    pub place: Place,
    /// The byte whose stack was checked.
    pub target: Pointer,
    pub tag: BorrowId,
    /// Required kind; `None` for reads, which accept any kind.
    pub expected: Option<BorrowKind>,
    pub cause: Cause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Exhausted {
    #[error("borrow id space of {bits} bits exhausted")]
    IdSpace { bits: u32 },

    #[error("borrow stack at {at} reached its capacity of {max} items")]
    StackDepth { at: Pointer, max: usize },

    #[error("shadow memory for {alloc} ({size} bytes) could not be allocated")]
    ShadowMemory { alloc: AllocId, size: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InvalidEvent {
    #[error("{alloc} is not a live allocation")]
    UnknownAllocation { alloc: AllocId },

    #[error("{alloc} is already allocated")]
    AlreadyAllocated { alloc: AllocId },

    #[error("{alloc} has size zero")]
    ZeroSized { alloc: AllocId },

    #[error("{ptr} is out of bounds of an object of {size} bytes")]
    OutOfBounds { ptr: Pointer, size: u64 },

    #[error("pointer cell {cell} holds no pointer value")]
    DanglingCell { cell: Pointer },

    #[error("borrows of kind {kind} cannot be created explicitly")]
    NotDerivable { kind: BorrowKind },
}
