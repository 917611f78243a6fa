use sb_monitor::{AllocId, BorrowKind, Event, Generation, Monitor, Outcome, Place, Pointer, Trace};
use tracing_subscriber::EnvFilter;

fn alloc(n: u64) -> AllocId {
    AllocId::new(n).expect("object ids start at 1")
}

fn cell(n: u64) -> Pointer {
    alloc(n).at(0)
}

/// Registers a 4-byte local (id 1) and pointer cells 2..=cells.
fn prologue(cells: u64) -> Trace {
    let mut events = Trace::new();
    events.push(Event::Allocate { alloc: alloc(1), size: 4 });
    events.extend((2..=cells).map(|n| Event::Allocate { alloc: alloc(n), size: 8 }));
    events.push(Event::NewLocal { local: cell(1) });
    events
}

fn derive(new_cell: u64, source: Place, kind: BorrowKind) -> Event {
    Event::Derive { new_cell: cell(new_cell), source, kind }
}

fn write(place: Place) -> Event {
    Event::Use { place, generation: Generation::V2 }
}

fn main() -> Result<(), sb_monitor::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== sb_monitor: Stacked Borrows Demo ===\n");

    let local = Place::Local(cell(1));
    let (x, y) = (Place::Deref(cell(2)), Place::Deref(cell(3)));

    // let x = &mut local; let y = &mut *x; *x += 1; *y = 2;
    let mut two_mutable = prologue(3);
    two_mutable.extend([
        write(local),
        derive(2, local, BorrowKind::Unique),
        write(x),
        derive(3, x, BorrowKind::Unique),
        write(x),
        write(y),
    ]);

    // Same program, but y is used before x comes back.
    let mut innermost_first = prologue(3);
    innermost_first.extend([
        write(local),
        derive(2, local, BorrowKind::Unique),
        write(x),
        derive(3, x, BorrowKind::Unique),
        write(y),
        write(x),
    ]);

    // let s1 = &*x; let s2 = &*x; reads through all three, then *x += 17.
    let mut shared = prologue(4);
    shared.extend([
        write(local),
        derive(2, local, BorrowKind::Unique),
        Event::Read { place: x },
        derive(3, x, BorrowKind::SharedReadOnly),
        Event::Read { place: x },
        derive(4, x, BorrowKind::SharedReadOnly),
        Event::Read { place: x },
        Event::Read { place: y },
        Event::Read { place: Place::Deref(cell(4)) },
        Event::Read { place: y },
        write(x),
    ]);

    // let x = &local; let raw: *mut i32 = transmute(x); *raw = 15;
    let mut transmute = prologue(3);
    transmute.extend([
        write(local),
        derive(2, local, BorrowKind::SharedReadOnly),
        Event::Transmute { new_cell: cell(3), source: cell(2) },
        write(y),
    ]);

    let programs = [
        ("two mutable references", two_mutable),
        ("innermost borrow used first", innermost_first),
        ("sibling shared references", shared),
        ("write through transmuted shared reference", transmute),
    ];

    for (step, (name, events)) in programs.iter().enumerate() {
        println!("[{}] {name} ({} events)", step + 1, events.len());
        let mut monitor = Monitor::default();
        match monitor.replay(events)? {
            Outcome::Passed { events } => println!("    -> accepted all {events} events"),
            Outcome::Violation { index, violation } => {
                println!("    -> rejected event {index}: {violation}")
            }
        }
    }

    Ok(())
}
