//! §4.L's three capability traits and the candidate descriptors the
//! selection algorithm in `time::select_and_init` picks among. A candidate
//! is a stateless, `'static` description of something the architecture
//! layer *could* initialise; the trait object it produces is what actually
//! holds any hardware state, once selected.

use alloc::boxed::Box;

use smallvec::SmallVec;

/// Something `select_and_init` can busy-wait against. Grounded in the
/// teacher's `processor::udelay`, generalised so the periodic-timer
/// candidate's calibration step doesn't need to know which reference won.
pub trait ReferenceCounter: Send + Sync {
	fn busy_wait_micros(&self, micros: u64);
}

/// Something that can report the current time since the Unix epoch.
pub trait WallClock: Send + Sync {
	fn now_unix_nanos(&self) -> u64;
}

/// Something that can be armed to deliver the periodic tick on the calling
/// executor, and masked again.
pub trait PeriodicTimer: Send + Sync {
	fn enable_interrupt(&self, period_us: u64);
	fn disable_interrupt(&self);
}

/// A reference-counter candidate the architecture layer offers. `priority`
/// breaks ties among several usable sources (higher wins); `requires_calibration`
/// is §4.L's explicit rejection rule: a reference counter that itself needs
/// calibrating against something else can never be selected, on pain of
/// circularity.
pub struct ReferenceCounterCandidate {
	pub name: &'static str,
	pub priority: u8,
	pub requires_calibration: bool,
	pub init: fn() -> Box<dyn ReferenceCounter>,
}

/// A wallclock candidate. `init` receives the already-selected reference
/// counter (if any candidate without `requires_calibration` was found) in
/// case the wallclock source itself needs to calibrate anything; returns
/// `None` if this candidate turns out to be unusable on this hardware once
/// actually probed (e.g. the device it depends on isn't present).
pub struct WallClockCandidate {
	pub name: &'static str,
	pub priority: u8,
	pub init: fn(Option<&dyn ReferenceCounter>) -> Option<Box<dyn WallClock>>,
}

/// A periodic-timer candidate, calibrated the same way a wallclock
/// candidate is.
pub struct PeriodicCandidate {
	pub name: &'static str,
	pub priority: u8,
	pub init: fn(Option<&dyn ReferenceCounter>) -> Option<Box<dyn PeriodicTimer>>,
}

/// Everything one architecture backend contributes to the selection. Each
/// backend only ever offers a handful of candidates per capability, so these
/// stay inline (no heap allocation) the same way the teacher's own small,
/// bounded-count device lists do.
#[derive(Default)]
pub struct Candidates {
	pub reference_counters: SmallVec<[ReferenceCounterCandidate; 4]>,
	pub wallclocks: SmallVec<[WallClockCandidate; 4]>,
	pub periodics: SmallVec<[PeriodicCandidate; 4]>,
}
