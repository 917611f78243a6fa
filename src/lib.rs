//! Dynamic Stacked Borrows monitor.
//!
//! An event source (instrumentation pass, interpreter, test harness) reports
//! allocations, pointer derivations and accesses in program order. The
//! [`Monitor`] keeps a borrow stack for every tracked byte and a tag for every
//! cell holding a pointer, and rejects each access that the aliasing rules
//! forbid.
//!
//! ```
//! use sb_monitor::{AllocId, BorrowKind, Generation, Monitor, Place};
//!
//! let local = AllocId::new(1).unwrap();
//! let (x, y) = (AllocId::new(2).unwrap(), AllocId::new(3).unwrap());
//!
//! let mut monitor = Monitor::default();
//! monitor.allocate(local, 4)?;
//! monitor.allocate(x, 8)?;
//! monitor.allocate(y, 8)?;
//!
//! // let mut local = 42; let x = &mut local; let y = &mut *x;
//! monitor.new_local(local.at(0))?;
//! monitor.derive(x.at(0), Place::Local(local.at(0)), BorrowKind::Unique)?;
//! monitor.derive(y.at(0), Place::Deref(x.at(0)), BorrowKind::Unique)?;
//!
//! // *x += 1; retires y
//! monitor.validate_use(Place::Deref(x.at(0)), Generation::V1)?;
//! // *y = 2;
//! let err = monitor.validate_use(Place::Deref(y.at(0)), Generation::V1).unwrap_err();
//! assert!(err.is_violation());
//! # Ok::<(), sb_monitor::Error>(())
//! ```

pub mod config;
pub mod error;
pub mod id;
pub mod memory;
pub mod monitor;
pub mod shadow;
pub mod stack;
pub mod sync;
pub mod tags;
pub mod trace;

pub use config::MonitorConfig;
pub use error::{Cause, Error, Exhausted, InvalidEvent, Result, Rule, Violation};
pub use id::BorrowId;
pub use memory::{AllocId, Pointer};
pub use monitor::{Generation, Monitor, Place};
pub use stack::{BorrowKind, Item, Stack};
pub use sync::SharedMonitor;
pub use trace::{Event, Outcome, Trace};
