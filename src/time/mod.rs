//! §4.L Time-source selection: during early boot each architecture backend
//! contributes candidate reference-counter, wallclock, and periodic-timer
//! sources; this module picks, independently per capability, the
//! highest-priority usable one and wires the periodic tick through to
//! `scheduler::interrupt::handle_periodic_tick`.
//!
//! Two phases, matching §4.K Stage 1: [`capture_initial_tick`] takes a
//! provisional wallclock reading the moment *anything* can be read, before
//! the full candidate list is even assembled (no `alloc` dependency beyond
//! what the architecture's raw read already needs); [`select_and_init`]
//! runs the real selection once the kernel is far enough along to build the
//! candidate `Vec`s, and re-takes the initial tick if the wallclock it
//! settles on differs from the one used for the provisional read.

pub mod source;

#[cfg(all(target_arch = "x86_64", not(test)))]
mod x86_64_platform;
#[cfg(test)]
mod test_platform;

use core::sync::atomic::{AtomicU64, Ordering};

use hermit_sync::OnceCell;

pub use source::{PeriodicTimer, ReferenceCounter, WallClock};

use crate::config::PERIODIC_TICK_PERIOD_US;
use crate::error::{BootError, KernelError};

#[cfg(all(target_arch = "x86_64", not(test)))]
use x86_64_platform as platform;
#[cfg(test)]
use test_platform as platform;

static SELECTED_REFERENCE: OnceCell<alloc::boxed::Box<dyn ReferenceCounter>> = OnceCell::new();
static SELECTED_WALLCLOCK: OnceCell<alloc::boxed::Box<dyn WallClock>> = OnceCell::new();
static SELECTED_PERIODIC: OnceCell<alloc::boxed::Box<dyn PeriodicTimer>> = OnceCell::new();

static INITIAL_TICK_NANOS: AtomicU64 = AtomicU64::new(0);
static INITIAL_TICK_SOURCE: OnceCell<&'static str> = OnceCell::new();

/// §4.K Stage 1 "capture wallclock zero": a provisional reading, taken
/// before candidate selection runs, using whatever wallclock source the
/// architecture can read with no prior setup.
pub fn capture_initial_tick() {
	let (nanos, source) = platform::early_wallclock();
	INITIAL_TICK_NANOS.store(nanos, Ordering::Relaxed);
	let _ = INITIAL_TICK_SOURCE.set(source);
}

/// The kernel's best estimate of wallclock zero: the provisional reading
/// from [`capture_initial_tick`], re-taken by [`select_and_init`] if a
/// different wallclock source ends up winning selection.
pub fn initial_tick_unix_nanos() -> u64 {
	INITIAL_TICK_NANOS.load(Ordering::Relaxed)
}

/// §4.L's selection algorithm, run once during Stage 1 after the
/// architecture has assembled its candidate lists: pick the
/// highest-priority reference-counter candidate that doesn't itself require
/// calibration (rejecting any that do, even a higher-priority one — the
/// anti-circularity rule), then hand it to whichever wallclock and
/// periodic-timer candidates need it to calibrate themselves.
pub fn select_and_init() -> Result<(), KernelError> {
	let candidates = platform::candidates();

	let reference_candidate = candidates
		.reference_counters
		.iter()
		.filter(|c| !c.requires_calibration)
		.max_by_key(|c| c.priority)
		.ok_or(KernelError::Boot(BootError::NoReferenceCounter))?;
	let reference_counter = (reference_candidate.init)();

	if let Some(wallclock_candidate) = candidates.wallclocks.iter().max_by_key(|c| c.priority) {
		if let Some(wallclock) = (wallclock_candidate.init)(Some(reference_counter.as_ref())) {
			if INITIAL_TICK_SOURCE.get().copied() != Some(wallclock_candidate.name) {
				INITIAL_TICK_NANOS.store(wallclock.now_unix_nanos(), Ordering::Relaxed);
			}
			let _ = SELECTED_WALLCLOCK.set(wallclock);
		}
	}

	if let Some(periodic_candidate) = candidates.periodics.iter().max_by_key(|c| c.priority) {
		if let Some(periodic) = (periodic_candidate.init)(Some(reference_counter.as_ref())) {
			let _ = SELECTED_PERIODIC.set(periodic);
		}
	}

	let _ = SELECTED_REFERENCE.set(reference_counter);
	Ok(())
}

/// Current wallclock reading, falling back to the initial tick if no
/// wallclock source was ever selected (e.g. `select_and_init` hasn't run
/// yet, or none of the architecture's wallclock candidates were usable).
pub fn now_unix_nanos() -> u64 {
	SELECTED_WALLCLOCK
		.get()
		.map(|w| w.now_unix_nanos())
		.unwrap_or_else(initial_tick_unix_nanos)
}

/// Busy-waits `micros` against the selected reference counter. A no-op if
/// none was ever selected (boot would already have failed in that case).
pub fn busy_wait_micros(micros: u64) {
	if let Some(reference) = SELECTED_REFERENCE.get() {
		reference.busy_wait_micros(micros);
	}
}

/// §4.K Stage 2 "enable the periodic tick": arms the selected periodic
/// source for the calling executor at the kernel-configured period. A no-op
/// if no periodic-timer candidate was usable.
pub fn arm_periodic_tick_current_core() {
	if let Some(periodic) = SELECTED_PERIODIC.get() {
		periodic.enable_interrupt(PERIODIC_TICK_PERIOD_US);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn select_and_init_picks_reference_and_wallclock() {
		capture_initial_tick();
		select_and_init().expect("test backend always has a usable reference counter");
		assert!(now_unix_nanos() > 0);
	}

	#[test]
	fn busy_wait_returns_after_selection() {
		select_and_init().expect("test backend always has a usable reference counter");
		busy_wait_micros(1);
	}

	#[test]
	fn arm_periodic_tick_is_harmless_without_a_real_timer() {
		select_and_init().expect("test backend always has a usable reference counter");
		arm_periodic_tick_current_core();
	}
}
