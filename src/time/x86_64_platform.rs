//! x86_64 time-source candidates: PIT channel 2 and the TSC as competing
//! reference-counter candidates (demonstrating §4.L's calibration-rejection
//! rule — the TSC is disqualified and never selected), CMOS as the
//! wallclock candidate, and the local APIC timer as the periodic-tick
//! candidate, calibrated against whichever reference counter won.

use alloc::boxed::Box;

use crate::arch::x86_64::{apic, idt, pit, systemtime};
use crate::time::source::{Candidates, PeriodicCandidate, ReferenceCounterCandidate, WallClockCandidate};
use crate::time::{PeriodicTimer, ReferenceCounter, WallClock};

const CALIBRATION_WINDOW_MICROS: u64 = 10_000;

pub(super) fn early_wallclock() -> (u64, &'static str) {
	(systemtime::read_wallclock_unix_seconds() * 1_000_000_000, "cmos-rtc")
}

pub(super) fn candidates() -> Candidates {
	Candidates {
		reference_counters: smallvec::smallvec![
			ReferenceCounterCandidate {
				name: "pit-channel2",
				priority: 10,
				requires_calibration: false,
				init: || Box::new(PitReferenceCounter) as Box<dyn ReferenceCounter>,
			},
			ReferenceCounterCandidate {
				name: "tsc",
				// Higher priority than the PIT: if calibration weren't
				// rejected for circularity this would win, which is the
				// point of exercising the rejection rule here rather than
				// with a single always-usable candidate.
				priority: 20,
				requires_calibration: true,
				init: || Box::new(TscReferenceCounter) as Box<dyn ReferenceCounter>,
			},
		],
		wallclocks: smallvec::smallvec![WallClockCandidate {
			name: "cmos-rtc",
			priority: 10,
			init: |_reference| Some(Box::new(CmosWallClock) as Box<dyn WallClock>),
		}],
		periodics: smallvec::smallvec![PeriodicCandidate {
			name: "apic-timer",
			priority: 10,
			init: |reference| reference.map(|r| Box::new(calibrate_apic_timer(r)) as Box<dyn PeriodicTimer>),
		}],
	}
}

struct PitReferenceCounter;

impl ReferenceCounter for PitReferenceCounter {
	fn busy_wait_micros(&self, micros: u64) {
		pit::busy_wait_micros(micros);
	}
}

/// Exists only to demonstrate §4.L's rejection rule: the TSC's own
/// frequency is unknown until something else calibrates it, so it can never
/// actually be selected as a reference counter and this body never runs.
struct TscReferenceCounter;

impl ReferenceCounter for TscReferenceCounter {
	fn busy_wait_micros(&self, _micros: u64) {
		unreachable!("the TSC reference-counter candidate requires calibration and is never selected");
	}
}

struct CmosWallClock;

impl WallClock for CmosWallClock {
	fn now_unix_nanos(&self) -> u64 {
		systemtime::read_wallclock_unix_seconds() * 1_000_000_000
	}
}

struct ApicPeriodicTimer {
	ticks_per_us: u32,
}

impl PeriodicTimer for ApicPeriodicTimer {
	fn enable_interrupt(&self, period_us: u64) {
		let count = (u64::from(self.ticks_per_us) * period_us).clamp(1, u32::MAX as u64) as u32;
		apic::arm_periodic_tick(idt::PERIODIC_TICK_VECTOR, count);
	}

	fn disable_interrupt(&self) {
		apic::mask_periodic_tick();
	}
}

/// §4.L periodic-timer calibration: bracket a known busy-wait window with
/// one-shot APIC countdown reads, then derive ticks/µs for later arming.
fn calibrate_apic_timer(reference: &dyn ReferenceCounter) -> ApicPeriodicTimer {
	let elapsed_ticks = apic::calibrate_against(reference, CALIBRATION_WINDOW_MICROS);
	let ticks_per_us = (u64::from(elapsed_ticks) / CALIBRATION_WINDOW_MICROS).max(1) as u32;
	ApicPeriodicTimer { ticks_per_us }
}
