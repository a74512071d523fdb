//! Host test backend time-source candidates: `std::thread::sleep` stands in
//! for a busy-wait reference counter, `std::time::SystemTime` stands in for
//! a wallclock, and the periodic-timer candidate is an inert stub — tests
//! drive preemption explicitly through `scheduler::interrupt::handle_periodic_tick`
//! rather than a real timer interrupt (see `arch::test`).

use alloc::boxed::Box;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::time::source::{Candidates, PeriodicCandidate, ReferenceCounterCandidate, WallClockCandidate};
use crate::time::{PeriodicTimer, ReferenceCounter, WallClock};

pub(super) fn early_wallclock() -> (u64, &'static str) {
	(now_unix_nanos(), "std-systemtime")
}

fn now_unix_nanos() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

pub(super) fn candidates() -> Candidates {
	Candidates {
		reference_counters: smallvec::smallvec![ReferenceCounterCandidate {
			name: "std-thread-sleep",
			priority: 10,
			requires_calibration: false,
			init: || Box::new(StdReferenceCounter) as Box<dyn ReferenceCounter>,
		}],
		wallclocks: smallvec::smallvec![WallClockCandidate {
			name: "std-systemtime",
			priority: 10,
			init: |_reference| Some(Box::new(StdWallClock) as Box<dyn WallClock>),
		}],
		periodics: smallvec::smallvec![PeriodicCandidate {
			name: "test-fake-periodic",
			priority: 10,
			init: |_reference| Some(Box::new(FakePeriodicTimer) as Box<dyn PeriodicTimer>),
		}],
	}
}

struct StdReferenceCounter;

impl ReferenceCounter for StdReferenceCounter {
	fn busy_wait_micros(&self, micros: u64) {
		std::thread::sleep(std::time::Duration::from_micros(micros));
	}
}

struct StdWallClock;

impl WallClock for StdWallClock {
	fn now_unix_nanos(&self) -> u64 {
		now_unix_nanos()
	}
}

struct FakePeriodicTimer;

impl PeriodicTimer for FakePeriodicTimer {
	fn enable_interrupt(&self, _period_us: u64) {}
	fn disable_interrupt(&self) {}
}
