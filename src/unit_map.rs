//! Process-wide table of external file units.
//!
//! Units are created on demand so that I/O works without any runtime start-up
//! call. The first reference builds the table, predefines units 6/5/0 on
//! stdout/stdin/stderr, and registers a process-exit hook that closes every
//! unit (for programs that end without driving an orderly shutdown).
//!
//! Two locks: the table lock covers look-up, creation, destruction, and the
//! whole-table operations; the create-open lock serializes the compound
//! "create if absent, then open" of anonymous look-ups so that no thread can
//! observe a unit that exists but is not yet connected. Functions here drop
//! the table lock before taking any per-unit lock.

use crate::connection::{Action, CloseStatus, Convert, Direction, OpenStatus, Position};
use crate::errors::IoErrorHandler;
use crate::file::{RawFile, StdStream};
use crate::unit::FileUnit;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Once};

pub const ERROR_OUTPUT_UNIT: i32 = 0;
pub const DEFAULT_INPUT_UNIT: i32 = 5;
pub const DEFAULT_OUTPUT_UNIT: i32 = 6;

/// NEWUNIT= numbers grow downward from here, disjoint from any unit number a
/// program can name itself.
const FIRST_NEW_UNIT: i32 = -65_536;

pub type UnitRef = Arc<Mutex<FileUnit>>;

struct UnitMap {
    units: HashMap<i32, UnitRef>,
    /// Secondary index: connected path -> owning unit number.
    paths: HashMap<Vec<u8>, i32>,
    next_new_unit: i32,
}

impl UnitMap {
    fn bootstrap() -> Self {
        debug!("creating the unit table and the predefined units");
        let mut map = Self {
            units: HashMap::new(),
            paths: HashMap::new(),
            next_new_unit: FIRST_NEW_UNIT,
        };
        map.predefine(
            DEFAULT_OUTPUT_UNIT,
            Box::new(StdStream::stdout()),
            Direction::Output,
        );
        map.predefine(
            DEFAULT_INPUT_UNIT,
            Box::new(StdStream::stdin()),
            Direction::Input,
        );
        map.predefine(
            ERROR_OUTPUT_UNIT,
            Box::new(StdStream::stderr()),
            Direction::Output,
        );
        map
    }

    fn predefine(&mut self, number: i32, stream: Box<dyn RawFile + Send>, direction: Direction) {
        let mut unit = FileUnit::new(number);
        unit.frame_mut().predefine(stream);
        unit.set_direction(direction)
            .expect("a predefined unit refused its direction");
        unit.is_unformatted = Some(false);
        self.units.insert(number, Arc::new(Mutex::new(unit)));
    }

    fn get_or_create(&mut self, number: i32) -> (UnitRef, bool) {
        match self.units.get(&number) {
            Some(unit) => (Arc::clone(unit), true),
            None => {
                let unit = Arc::new(Mutex::new(FileUnit::new(number)));
                self.units.insert(number, Arc::clone(&unit));
                (unit, false)
            }
        }
    }
}

static UNIT_MAP: Mutex<Option<UnitMap>> = Mutex::new(None);
static CREATE_OPEN_LOCK: Mutex<()> = Mutex::new(());
static REGISTER_SHUTDOWN: Once = Once::new();

fn with_unit_map<R>(f: impl FnOnce(&mut UnitMap) -> R) -> R {
    let result = {
        let mut guard = UNIT_MAP.lock();
        f(guard.get_or_insert_with(UnitMap::bootstrap))
    };
    register_shutdown_hook();
    result
}

fn register_shutdown_hook() {
    REGISTER_SHUTDOWN.call_once(|| {
        #[cfg(unix)]
        unsafe {
            libc::atexit(close_all_at_exit);
        }
    });
}

/// A back-up handler for programs that never drive an orderly runtime
/// shutdown of their own; errors at this point have nowhere to go.
#[cfg(unix)]
extern "C" fn close_all_at_exit() {
    let mut handler = IoErrorHandler::new();
    close_all(&mut handler);
}

pub fn look_up(unit: i32) -> Option<UnitRef> {
    with_unit_map(|map| map.units.get(&unit).cloned())
}

pub fn look_up_by_path(path: &[u8]) -> Option<UnitRef> {
    with_unit_map(|map| {
        map.paths
            .get(path)
            .and_then(|number| map.units.get(number))
            .cloned()
    })
}

/// The unit number currently connected to `path`, if any.
pub fn path_owner(path: &[u8]) -> Option<i32> {
    with_unit_map(|map| map.paths.get(path).copied())
}

pub fn look_up_or_create(unit: i32) -> (UnitRef, bool) {
    with_unit_map(|map| map.get_or_create(unit))
}

/// Creates a unit that must not already exist.
pub fn create_new(unit: i32) -> UnitRef {
    let (unit_ref, was_extant) = look_up_or_create(unit);
    assert!(!was_extant, "unit {unit} already exists");
    unit_ref
}

/// Looks up a unit for an I/O statement that may address an unconnected unit
/// number, opening the local file `fort.<unit>` on first use. The create-open
/// lock guarantees the returned unit has been opened, not merely created.
pub fn look_up_or_create_anonymous(
    unit: i32,
    direction: Direction,
    is_unformatted: Option<bool>,
    handler: &mut IoErrorHandler,
) -> UnitRef {
    let _create_open = CREATE_OPEN_LOCK.lock();
    let (unit_ref, was_extant) = look_up_or_create(unit);
    if !was_extant {
        let mut unit = unit_ref.lock();
        let status = if direction == Direction::Input {
            OpenStatus::Unknown
        } else {
            OpenStatus::Replace
        };
        unit.open_anonymous_unit(
            Some(status),
            Some(Action::ReadWrite),
            Position::Rewind,
            Convert::Unknown,
            handler,
        );
        unit.is_unformatted = is_unformatted;
    }
    unit_ref
}

pub fn look_up_for_close(unit: i32) -> Option<UnitRef> {
    with_unit_map(|map| map.units.get(&unit).cloned())
}

/// Allocates a unit with a fresh number for NEWUNIT= or internal child I/O.
pub fn new_unit(for_child_io: bool) -> UnitRef {
    with_unit_map(|map| {
        let number = map.next_new_unit;
        map.next_new_unit -= 1;
        let mut unit = FileUnit::new(number);
        unit.created_for_internal_child_io = for_child_io;
        let unit_ref = Arc::new(Mutex::new(unit));
        map.units.insert(number, Arc::clone(&unit_ref));
        unit_ref
    })
}

/// Removes a closed unit from the table.
pub fn destroy_closed(unit: i32) {
    let mut guard = UNIT_MAP.lock();
    if let Some(map) = guard.as_mut() {
        map.units.remove(&unit);
        map.paths.retain(|_, owner| *owner != unit);
    }
}

/// Closes every unit and discards the table; a later reference bootstraps a
/// fresh one. Driven at process termination.
pub fn close_all(handler: &mut IoErrorHandler) {
    let units: Vec<UnitRef> = {
        let mut guard = UNIT_MAP.lock();
        match guard.take() {
            None => return,
            Some(map) => map.units.into_values().collect(),
        }
    };
    for unit in units {
        unit.lock().close_unit(CloseStatus::Keep, handler);
    }
}

/// Flushes every unit's pending output.
pub fn flush_all(handler: &mut IoErrorHandler) {
    let units: Vec<UnitRef> = {
        let guard = UNIT_MAP.lock();
        match guard.as_ref() {
            None => return,
            Some(map) => map.units.values().cloned().collect(),
        }
    };
    for unit in units {
        unit.lock().flush_output(handler);
    }
}

/// Flushes the default and error outputs so that, for example, a prompt is
/// visible before the default input blocks on a read. Errors are recorded
/// locally and dropped; this path must never fail.
pub(crate) fn flush_default_outputs() {
    let (out, err) = {
        let guard = UNIT_MAP.lock();
        match guard.as_ref() {
            None => return,
            Some(map) => (
                map.units.get(&DEFAULT_OUTPUT_UNIT).cloned(),
                map.units.get(&ERROR_OUTPUT_UNIT).cloned(),
            ),
        }
    };
    let mut handler = IoErrorHandler::new();
    if let Some(unit) = out {
        unit.lock().flush_output(&mut handler);
    }
    if let Some(unit) = err {
        unit.lock().flush_output(&mut handler);
    }
}

/// Best-effort flush of the default and error outputs while the process is
/// going down abnormally.
pub fn flush_output_on_crash() {
    flush_default_outputs();
}

pub(crate) fn register_path(path: Vec<u8>, unit: i32) {
    with_unit_map(|map| {
        map.paths.insert(path, unit);
    });
}

// Deliberately does not bootstrap: units being closed by `close_all` have
// already been removed along with the table itself.
pub(crate) fn unregister_path(path: &[u8]) {
    let mut guard = UNIT_MAP.lock();
    if let Some(map) = guard.as_mut() {
        map.paths.remove(path);
    }
}
