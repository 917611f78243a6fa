use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::error::{Cause, Exhausted, InvalidEvent, Result, Rule, Violation};
use crate::id::{BorrowId, IdAllocator};
use crate::memory::{AllocId, Allocations, Pointer};
use crate::stack::{BorrowKind, BorrowStacks, Item, Stack};
use crate::tags::{PointerValues, TagRegistry};

/// Location an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Place {
    /// A scalar local. It carries its own tag and is its own pointee.
    Local(Pointer),
    /// A pointer cell. Its tag is keyed by the cell, the checked stack is the
    /// one of the pointee currently stored in the cell.
    Deref(Pointer),
}

impl Place {
    /// Address the tag of this place is recorded under.
    pub fn ptr(self) -> Pointer {
        match self {
            Place::Local(ptr) | Place::Deref(ptr) => ptr,
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Place::Local(ptr) => write!(f, "local {ptr}"),
            Place::Deref(cell) => write!(f, "*{cell}"),
        }
    }
}

/// Rule set for write accesses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Generation {
    /// Only `Unique` items grant writes.
    V1,
    /// Raw-tagged accesses are granted by `SharedReadWrite`, all others by `Unique`.
    #[default]
    V2,
}

/// The Stacked Borrows state machine.
///
/// Events are applied in program order. Every derivation pushes onto the
/// pointee's stack and cannot be rejected by the rules; every validation
/// either retires the items above the matching one or reports a [`Violation`]
/// and leaves all state untouched.
#[derive(Debug, Clone)]
pub struct Monitor {
    config: MonitorConfig,
    ids: IdAllocator,
    allocations: Allocations,
    tags: TagRegistry,
    pointers: PointerValues,
    stacks: BorrowStacks,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::with_valid_config(MonitorConfig::default())
    }
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_valid_config(config))
    }

    fn with_valid_config(config: MonitorConfig) -> Self {
        Self {
            ids: IdAllocator::new(config.id_bits),
            allocations: Allocations::new(),
            tags: TagRegistry::new(),
            pointers: PointerValues::new(),
            stacks: BorrowStacks::new(config.max_stack_depth),
            config,
        }
    }

    // --- Object lifetime ---

    /// Registers a backing object of `size` bytes.
    pub fn allocate(&mut self, alloc: AllocId, size: u64) -> Result<()> {
        self.allocations.insert(alloc, size)?;
        tracing::trace!(%alloc, size, "monitor.allocate");
        Ok(())
    }

    /// Forgets `alloc` and every tag, pointer value and stack stored for its bytes.
    pub fn deallocate(&mut self, alloc: AllocId) -> Result<()> {
        self.allocations.remove(alloc)?;
        self.tags.release(alloc);
        self.pointers.release(alloc);
        self.stacks.release(alloc);
        tracing::trace!(%alloc, "monitor.deallocate");
        Ok(())
    }

    // --- Initialization ---

    /// A local owns itself: it gets a fresh tag and a `Unique` item on its own
    /// stack, so direct accesses go through the same rules as `&mut` accesses.
    pub fn new_local(&mut self, local: Pointer) -> Result<BorrowId> {
        let size = self.allocations.check(local)?;
        let id = self.ids.fresh()?;
        self.push(local, size, Item::new(BorrowKind::Unique, id))?;
        self.tags.set(local, size, id)?;
        tracing::trace!(%local, tag = %id, "monitor.new_local");
        Ok(id)
    }

    /// The pointer cell that first receives `target` owns the object through a
    /// fresh `Unique` tag.
    pub fn new_dynamic(&mut self, cell: Pointer, target: Pointer) -> Result<BorrowId> {
        let cell_size = self.allocations.check(cell)?;
        let target_size = self.allocations.check(target)?;
        let id = self.ids.fresh()?;
        self.push(target, target_size, Item::new(BorrowKind::Unique, id))?;
        self.tags.set(cell, cell_size, id)?;
        self.pointers.set(cell, cell_size, target)?;
        tracing::trace!(%cell, %target, tag = %id, "monitor.new_dynamic");
        Ok(id)
    }

    // --- Derivation ---

    /// Stores a new pointer derived from `source` into `new_cell` (a retag).
    ///
    /// `Unique` and `SharedReadOnly` borrows get a fresh id; `SharedReadWrite`
    /// borrows share [`BorrowId::RAW`]. The new item goes on the stack of the
    /// pointee of `source` without any validation.
    pub fn derive(
        &mut self,
        new_cell: Pointer,
        source: Place,
        kind: BorrowKind,
    ) -> Result<BorrowId> {
        let id = match kind {
            BorrowKind::Unique | BorrowKind::SharedReadOnly => None,
            BorrowKind::SharedReadWrite => Some(BorrowId::RAW),
            BorrowKind::Disabled => return Err(InvalidEvent::NotDerivable { kind }.into()),
        };
        let cell_size = self.allocations.check(new_cell)?;
        let (target, target_size) = self.resolve(source)?;
        let parent = self.tags.get(source.ptr());
        let id = match id {
            Some(id) => id,
            None => self.ids.fresh()?,
        };
        self.push(target, target_size, Item::new(kind, id))?;
        self.tags.set(new_cell, cell_size, id)?;
        self.pointers.set(new_cell, cell_size, target)?;
        tracing::trace!(%new_cell, %source, %kind, %parent, tag = %id, "monitor.derive");
        Ok(id)
    }

    /// Reinterprets the pointer in `source_cell` and stores it in `new_cell`.
    /// The tag and the pointer value travel unchanged; no stack is touched.
    ///
    /// `source_cell` must hold a pointer value, otherwise `new_cell` would keep
    /// the pointee of its previous occupant.
    pub fn transmute(&mut self, new_cell: Pointer, source_cell: Pointer) -> Result<BorrowId> {
        let cell_size = self.allocations.check(new_cell)?;
        self.allocations.check(source_cell)?;
        let target = self
            .pointers
            .get(source_cell)
            .ok_or(InvalidEvent::DanglingCell { cell: source_cell })?;
        let id = self.tags.get(source_cell);
        self.tags.set(new_cell, cell_size, id)?;
        self.pointers.set(new_cell, cell_size, target)?;
        tracing::trace!(%new_cell, %source_cell, tag = %id, "monitor.transmute");
        Ok(id)
    }

    /// Plain pointer assignment: `cell` now points at `target`. Its tag is left
    /// as is until a derivation associates a new one.
    pub fn store_pointer(&mut self, cell: Pointer, target: Pointer) -> Result<()> {
        let cell_size = self.allocations.check(cell)?;
        self.allocations.check(target)?;
        self.pointers.set(cell, cell_size, target)?;
        Ok(())
    }

    // --- Validation ---

    /// Write access through `place`.
    ///
    /// Looks for the lowest item carrying the place's tag with the kind the
    /// rule generation requires and retires everything above it.
    pub fn validate_use(&mut self, place: Place, generation: Generation) -> Result<()> {
        let tag = self.tags.get(place.ptr());
        let (rule, required) = match generation {
            Generation::V1 => (Rule::Use1, BorrowKind::Unique),
            Generation::V2 if tag.is_raw() => (Rule::Use2, BorrowKind::SharedReadWrite),
            Generation::V2 => (Rule::Use2, BorrowKind::Unique),
        };
        self.validate(place, tag, rule, Some(required), |stack| {
            stack.find_use(tag, required)
        })
    }

    /// Read access through `place`.
    ///
    /// Any item carrying the tag grants the read. Read-only items directly
    /// above it survive, so sibling shared borrows stay usable.
    pub fn validate_read(&mut self, place: Place) -> Result<()> {
        let tag = self.tags.get(place.ptr());
        self.validate(place, tag, Rule::Read1, None, |stack| stack.find_read(tag))
    }

    fn validate(
        &mut self,
        place: Place,
        tag: BorrowId,
        rule: Rule,
        expected: Option<BorrowKind>,
        scan: impl FnOnce(&Stack) -> Option<usize>,
    ) -> Result<()> {
        let (target, _) = self.resolve(place)?;
        if !self.config.tracks(target) {
            return Ok(());
        }
        // An untouched byte has an empty stack; a failed check must not create it.
        let empty = Stack::new();
        let stack = self.stacks.get(target).unwrap_or(&empty);
        match scan(stack) {
            Some(new_top) => {
                let retired = stack.len() - new_top;
                if retired > 0 {
                    if let Some(stack) = self.stacks.get_mut(target) {
                        stack.truncate(new_top);
                    }
                    tracing::debug!(%rule, %place, %target, %tag, retired, "monitor.retire");
                }
                Ok(())
            }
            None => {
                let cause = match stack.permission(tag) {
                    Some(BorrowKind::Disabled) => Cause::Disabled,
                    Some(kind) => Cause::WrongKind(kind),
                    None => Cause::NotFound,
                };
                tracing::debug!(
                    %rule,
                    %tag,
                    alloc = %target.alloc,
                    offset = target.offset,
                    ?cause,
                    stack = %stack,
                    "monitor.violation"
                );
                Err(Violation {
                    rule,
                    place,
                    target,
                    tag,
                    expected,
                    cause,
                }
                .into())
            }
        }
    }

    // --- Inspection ---

    /// Tag recorded for `cell`, if any.
    pub fn tag(&self, cell: Pointer) -> Option<BorrowId> {
        self.tags.lookup(cell)
    }

    /// Pointer value recorded for `cell`, if any.
    pub fn pointee(&self, cell: Pointer) -> Option<Pointer> {
        self.pointers.get(cell)
    }

    /// Borrow stack of `ptr`, if its object has been touched.
    pub fn stack(&self, ptr: Pointer) -> Option<&Stack> {
        self.stacks.get(ptr)
    }

    /// Live items of the stack of `ptr`; empty if untouched.
    pub fn items(&self, ptr: Pointer) -> &[Item] {
        self.stacks.get(ptr).map(Stack::items).unwrap_or_default()
    }

    pub fn permission(&self, ptr: Pointer, id: BorrowId) -> Option<BorrowKind> {
        self.stacks.get(ptr).and_then(|stack| stack.permission(id))
    }

    /// Number of borrow ids issued so far.
    pub fn issued_ids(&self) -> u64 {
        self.ids.issued()
    }

    // --- Internals ---

    /// Byte whose stack `place` checks, with the size of its object.
    fn resolve(&self, place: Place) -> Result<(Pointer, u64)> {
        let target = match place {
            Place::Local(local) => local,
            Place::Deref(cell) => {
                self.allocations.check(cell)?;
                self.pointers
                    .get(cell)
                    .ok_or(InvalidEvent::DanglingCell { cell })?
            }
        };
        let size = self.allocations.check(target)?;
        Ok((target, size))
    }

    fn push(&mut self, target: Pointer, size: u64, item: Item) -> Result<(), Exhausted> {
        if !self.config.tracks(target) {
            return Ok(());
        }
        self.stacks.push(target, size, item)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::Error;

    fn alloc(n: u64) -> AllocId {
        AllocId::new(n).unwrap()
    }

    fn monitor() -> Monitor {
        let mut monitor = Monitor::new(MonitorConfig::default().with_max_stack_depth(16)).unwrap();
        // 1: local, 2..=5: pointer cells
        monitor.allocate(alloc(1), 4).unwrap();
        for n in 2..=5 {
            monitor.allocate(alloc(n), 8).unwrap();
        }
        monitor
    }

    #[test]
    fn new_local_is_usable_and_leaves_one_item() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let id = m.new_local(local).unwrap();

        m.validate_use(Place::Local(local), Generation::V1).unwrap();
        assert_eq!(m.items(local), &[Item::new(BorrowKind::Unique, id)]);
        assert_eq!(m.tag(local), Some(id));
    }

    #[test]
    fn dynamic_object_is_owned_by_the_cell() {
        let mut m = monitor();
        m.allocate(alloc(9), 40).unwrap();
        let cell = alloc(2).at(0);
        let id = m.new_dynamic(cell, alloc(9).at(0)).unwrap();

        assert_eq!(m.tag(cell), Some(id));
        assert_eq!(m.tag(alloc(9).at(0)), None);
        assert_eq!(m.pointee(cell), Some(alloc(9).at(0)));
        m.validate_use(Place::Deref(cell), Generation::V2).unwrap();
        // Other bytes of the block get empty stacks lazily.
        assert!(m.items(alloc(9).at(4)).is_empty());
    }

    #[test]
    fn violation_leaves_state_untouched() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let (x, y) = (alloc(2).at(0), alloc(3).at(0));
        m.new_local(local).unwrap();
        m.derive(x, Place::Local(local), BorrowKind::Unique).unwrap();
        m.derive(y, Place::Deref(x), BorrowKind::Unique).unwrap();
        m.validate_use(Place::Deref(x), Generation::V1).unwrap();

        let before = m.items(local).to_vec();
        let err = m.validate_use(Place::Deref(y), Generation::V1).unwrap_err();
        assert!(err.is_violation());
        assert_eq!(m.items(local), before.as_slice());

        let violation = err.violation().unwrap();
        assert_eq!(violation.rule, Rule::Use1);
        assert_eq!(violation.target, local);
        assert_eq!(violation.cause, Cause::Disabled);
        assert_eq!(violation.expected, Some(BorrowKind::Unique));
    }

    #[test]
    fn read_of_unknown_tag_is_not_found() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let cell = alloc(2).at(0);
        m.new_local(local).unwrap();
        m.store_pointer(cell, local).unwrap();

        // The cell never got a tag, so it reads as raw; no raw item exists.
        let err = m.validate_read(Place::Deref(cell)).unwrap_err();
        let violation = err.violation().unwrap();
        assert_eq!(violation.tag, BorrowId::RAW);
        assert_eq!(violation.cause, Cause::NotFound);
        assert_eq!(violation.expected, None);
    }

    #[test]
    fn wrong_kind_is_reported() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let r = alloc(2).at(0);
        m.new_local(local).unwrap();
        let id = m.derive(r, Place::Local(local), BorrowKind::SharedReadOnly).unwrap();

        let err = m.validate_use(Place::Deref(r), Generation::V2).unwrap_err();
        assert_eq!(
            err.violation().map(|v| v.cause),
            Some(Cause::WrongKind(BorrowKind::SharedReadOnly))
        );
        assert_eq!(m.permission(local, id), Some(BorrowKind::SharedReadOnly));
    }

    #[test]
    fn derive_records_pointee_of_source() {
        let mut m = monitor();
        let local = alloc(1).at(2);
        let (x, y) = (alloc(2).at(0), alloc(3).at(0));
        m.new_local(local).unwrap();
        m.derive(x, Place::Local(local), BorrowKind::Unique).unwrap();
        let raw = m.derive(y, Place::Deref(x), BorrowKind::SharedReadWrite).unwrap();

        assert_eq!(raw, BorrowId::RAW);
        assert_eq!(m.pointee(y), Some(local));
        assert_eq!(m.items(local).len(), 3);
        // Untouched neighbour byte.
        assert!(m.items(alloc(1).at(0)).is_empty());
    }

    #[test]
    fn disabled_cannot_be_derived() {
        let mut m = monitor();
        m.new_local(alloc(1).at(0)).unwrap();
        let err = m
            .derive(alloc(2).at(0), Place::Local(alloc(1).at(0)), BorrowKind::Disabled)
            .unwrap_err();
        assert_eq!(
            err,
            Error::InvalidEvent(InvalidEvent::NotDerivable { kind: BorrowKind::Disabled })
        );
    }

    #[test]
    fn deref_of_cell_without_value_is_invalid() {
        let mut m = monitor();
        let cell = alloc(2).at(0);
        let err = m.validate_read(Place::Deref(cell)).unwrap_err();
        assert_eq!(err, Error::InvalidEvent(InvalidEvent::DanglingCell { cell }));
        assert!(err.is_fatal());
    }

    #[test]
    fn stack_capacity_is_a_resource_error() {
        let mut m = Monitor::new(MonitorConfig::default().with_max_stack_depth(2)).unwrap();
        m.allocate(alloc(1), 1).unwrap();
        m.allocate(alloc(2), 8).unwrap();
        let local = alloc(1).at(0);
        m.new_local(local).unwrap();
        m.derive(alloc(2).at(0), Place::Local(local), BorrowKind::Unique).unwrap();

        let err = m
            .derive(alloc(2).at(1), Place::Local(local), BorrowKind::Unique)
            .unwrap_err();
        assert_eq!(err, Error::Exhausted(Exhausted::StackDepth { at: local, max: 2 }));
        assert!(!err.is_violation());
    }

    #[test]
    fn id_exhaustion_is_a_resource_error() {
        let mut m = Monitor::new(MonitorConfig::default().with_id_bits(1)).unwrap();
        m.allocate(alloc(1), 3).unwrap();
        m.new_local(alloc(1).at(0)).unwrap();
        m.new_local(alloc(1).at(1)).unwrap();
        let err = m.new_local(alloc(1).at(2)).unwrap_err();
        assert_eq!(err, Error::Exhausted(Exhausted::IdSpace { bits: 1 }));
        assert_eq!(m.issued_ids(), 2);
    }

    #[test]
    fn deallocate_forgets_everything() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        m.new_local(local).unwrap();
        m.deallocate(alloc(1)).unwrap();

        assert!(m.stack(local).is_none());
        assert_eq!(m.tag(local), None);
        assert!(matches!(
            m.validate_use(Place::Local(local), Generation::V2),
            Err(Error::InvalidEvent(InvalidEvent::UnknownAllocation { .. }))
        ));

        // A fresh registration starts from an empty stack.
        m.allocate(alloc(1), 4).unwrap();
        assert!(m.items(local).is_empty());
    }

    #[test]
    fn transmute_requires_a_pointer_value() {
        let mut m = monitor();
        let (a, b) = (alloc(1).at(0), alloc(1).at(1));
        let cell = alloc(2).at(0);
        m.new_local(a).unwrap();
        m.new_local(b).unwrap();
        let id = m.derive(cell, Place::Local(a), BorrowKind::Unique).unwrap();

        // `b` has a tag but is not a pointer.
        let err = m.transmute(cell, b).unwrap_err();
        assert_eq!(err, Error::InvalidEvent(InvalidEvent::DanglingCell { cell: b }));
        assert_eq!(m.tag(cell), Some(id));
        assert_eq!(m.pointee(cell), Some(a));
    }

    #[test]
    fn failed_check_does_not_create_a_stack() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let cell = alloc(2).at(0);
        m.store_pointer(cell, local).unwrap();

        let err = m.validate_use(Place::Deref(cell), Generation::V2).unwrap_err();
        assert_eq!(err.violation().map(|v| v.cause), Some(Cause::NotFound));
        assert!(m.stack(local).is_none());
    }

    #[test]
    fn oversized_object_is_a_resource_error() {
        let mut m = Monitor::default();
        m.allocate(alloc(1), u64::MAX).unwrap();
        let err = m.new_local(alloc(1).at(0)).unwrap_err();
        assert_eq!(
            err,
            Error::Exhausted(Exhausted::ShadowMemory { alloc: alloc(1), size: u64::MAX })
        );
        assert!(err.is_fatal());
        assert!(m.stack(alloc(1).at(0)).is_none());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let err = Monitor::new(MonitorConfig::default().with_max_stack_depth(0)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn violation_message_names_rule_and_tag() {
        let mut m = monitor();
        let local = alloc(1).at(0);
        let x = alloc(2).at(0);
        m.new_local(local).unwrap();
        m.derive(x, Place::Local(local), BorrowKind::SharedReadOnly).unwrap();
        let err = m.validate_use(Place::Deref(x), Generation::V1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "USE1 violation on *alloc2+0x0: expected Unique for tag #1 at alloc1+0x0, \
             tag only grants SharedReadOnly"
        );
    }
}
