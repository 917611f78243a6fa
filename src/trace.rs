//! Replay of one linear event sequence.
//!
//! The monitor never explores alternative orderings. A consumer that wants to
//! check several interleavings builds one trace per ordering (or clones a
//! [`Monitor`] at the branch point) and replays each.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, Violation};
use crate::id::BorrowId;
use crate::memory::{AllocId, Pointer};
use crate::monitor::{Generation, Monitor, Place};
use crate::stack::BorrowKind;

/// One monitor call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Event {
    Allocate { alloc: AllocId, size: u64 },
    Deallocate { alloc: AllocId },
    NewLocal { local: Pointer },
    NewDynamic { cell: Pointer, target: Pointer },
    Derive { new_cell: Pointer, source: Place, kind: BorrowKind },
    Transmute { new_cell: Pointer, source: Pointer },
    StorePointer { cell: Pointer, target: Pointer },
    Use { place: Place, #[serde(default)] generation: Generation },
    Read { place: Place },
}

/// An ordered event sequence, serialized as a plain JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trace(Vec<Event>);

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<Event>> for Trace {
    fn from(events: Vec<Event>) -> Self {
        Self(events)
    }
}

impl FromIterator<Event> for Trace {
    fn from_iter<I: IntoIterator<Item = Event>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Event> for Trace {
    fn extend<I: IntoIterator<Item = Event>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> IntoIterator for &'a Trace {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Result of replaying a trace that did not abort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every event was accepted.
    Passed { events: usize },
    /// Event `index` violated the model; later events were not applied.
    Violation { index: usize, violation: Box<Violation> },
}

impl Outcome {
    pub fn passed(&self) -> bool {
        matches!(self, Outcome::Passed { .. })
    }

    pub fn violation(&self) -> Option<(usize, &Violation)> {
        match self {
            Outcome::Violation { index, violation } => Some((*index, violation.as_ref())),
            Outcome::Passed { .. } => None,
        }
    }
}

impl Monitor {
    /// Applies one event. Returns the tag recorded by initializations,
    /// derivations and transmutes.
    pub fn apply(&mut self, event: &Event) -> Result<Option<BorrowId>> {
        match *event {
            Event::Allocate { alloc, size } => self.allocate(alloc, size).map(|()| None),
            Event::Deallocate { alloc } => self.deallocate(alloc).map(|()| None),
            Event::NewLocal { local } => self.new_local(local).map(Some),
            Event::NewDynamic { cell, target } => self.new_dynamic(cell, target).map(Some),
            Event::Derive {
                new_cell,
                source,
                kind,
            } => self.derive(new_cell, source, kind).map(Some),
            Event::Transmute { new_cell, source } => self.transmute(new_cell, source).map(Some),
            Event::StorePointer { cell, target } => self.store_pointer(cell, target).map(|()| None),
            Event::Use { place, generation } => self.validate_use(place, generation).map(|()| None),
            Event::Read { place } => self.validate_read(place).map(|()| None),
        }
    }

    /// Feeds `events` in order, stopping at the first violation.
    ///
    /// Resource exhaustion and malformed events abort the replay with `Err`.
    pub fn replay<'a>(&mut self, events: impl IntoIterator<Item = &'a Event>) -> Result<Outcome> {
        let mut count = 0;
        for (index, event) in events.into_iter().enumerate() {
            match self.apply(event) {
                Ok(_) => count += 1,
                Err(Error::Violation(violation)) => {
                    tracing::debug!(index, %violation, "replay stopped");
                    return Ok(Outcome::Violation { index, violation });
                }
                Err(err) => {
                    tracing::warn!(index, ?event, error = %err, "replay aborted");
                    return Err(err);
                }
            }
        }
        Ok(Outcome::Passed { events: count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Exhausted, Rule};
    use crate::MonitorConfig;

    fn alloc(n: u64) -> AllocId {
        AllocId::new(n).unwrap()
    }

    #[test]
    fn apply_returns_recorded_tags() {
        let mut m = Monitor::default();
        let local = alloc(1).at(0);
        assert_eq!(m.apply(&Event::Allocate { alloc: alloc(1), size: 4 }).unwrap(), None);
        let tag = m.apply(&Event::NewLocal { local }).unwrap();
        assert_eq!(tag, m.tag(local));
    }

    #[test]
    fn replay_stops_at_first_violation() {
        let local = alloc(1).at(0);
        let r = alloc(2).at(0);
        let events = vec![
            Event::Allocate { alloc: alloc(1), size: 4 },
            Event::Allocate { alloc: alloc(2), size: 8 },
            Event::NewLocal { local },
            Event::Derive {
                new_cell: r,
                source: Place::Local(local),
                kind: BorrowKind::SharedReadOnly,
            },
            Event::Use { place: Place::Deref(r), generation: Generation::V2 },
            Event::Read { place: Place::Deref(r) },
        ];

        let mut m = Monitor::default();
        let outcome = m.replay(&events).unwrap();
        let (index, violation) = outcome.violation().unwrap();
        assert_eq!(index, 4);
        assert_eq!(violation.rule, Rule::Use2);
        assert!(!outcome.passed());
    }

    #[test]
    fn replay_aborts_on_exhaustion() {
        let local = alloc(1).at(0);
        let events = vec![
            Event::Allocate { alloc: alloc(1), size: 1 },
            Event::NewLocal { local },
            Event::Allocate { alloc: alloc(2), size: 1 },
            Event::Derive {
                new_cell: alloc(2).at(0),
                source: Place::Local(local),
                kind: BorrowKind::SharedReadWrite,
            },
        ];

        let mut m = Monitor::new(MonitorConfig::default().with_max_stack_depth(1)).unwrap();
        let err = m.replay(&events).unwrap_err();
        assert_eq!(err, Error::Exhausted(Exhausted::StackDepth { at: local, max: 1 }));
    }

    #[test]
    fn trace_round_trips_through_json() {
        let local = alloc(1).at(0);
        let trace: Trace = [
            Event::Allocate { alloc: alloc(1), size: 4 },
            Event::Allocate { alloc: alloc(2), size: 8 },
            Event::NewLocal { local },
            Event::Derive {
                new_cell: alloc(2).at(0),
                source: Place::Local(local),
                kind: BorrowKind::SharedReadWrite,
            },
            Event::Use { place: Place::Deref(alloc(2).at(0)), generation: Generation::V1 },
        ]
        .into_iter()
        .collect();

        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.starts_with('['));
        let parsed: Trace = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, trace);

        let outcome = Monitor::default().replay(&parsed).unwrap();
        assert_eq!(outcome.violation().map(|(index, v)| (index, v.rule)), Some((4, Rule::Use1)));
    }

    #[test]
    fn events_deserialize_from_json() {
        let json = r#"[
            { "op": "allocate", "alloc": 1, "size": 4 },
            { "op": "new_local", "local": { "alloc": 1, "offset": 0 } },
            { "op": "use", "place": { "local": { "alloc": 1, "offset": 0 } } },
            { "op": "read", "place": { "local": { "alloc": 1, "offset": 0 } } }
        ]"#;
        let events: Vec<Event> = serde_json::from_str(json).unwrap();
        assert_eq!(
            events[2],
            Event::Use { place: Place::Local(alloc(1).at(0)), generation: Generation::V2 }
        );

        let mut m = Monitor::default();
        assert_eq!(m.replay(&events).unwrap(), Outcome::Passed { events: 4 });
    }
}
