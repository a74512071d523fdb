//! §4.K Stage 3's barrier: "two atomics — a counter of ready secondaries and
//! a boolean completion flag. Secondaries publish readiness with a
//! release-ordered fetch-add; the bootstrap observes that count with an
//! acquire-ordered load; the completion flag is set with a release store
//! and observed with an acquire load." Grounded in the teacher's
//! `synch_all_cores` (a single `AtomicU32` every core both increments and
//! spins on), split here into the two-sided bootstrap/secondary API the
//! asymmetric roles in Stage 3 actually have.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::arch;

pub struct Stage3Barrier {
	ready: AtomicU32,
	complete: AtomicBool,
}

impl Stage3Barrier {
	pub const fn new() -> Self {
		Self {
			ready: AtomicU32::new(0),
			complete: AtomicBool::new(false),
		}
	}

	/// Called by a secondary once its own Stage 2 is done: publishes
	/// readiness, then spins until the bootstrap signals completion.
	pub fn secondary_ready_and_wait(&self) {
		self.ready.fetch_add(1, Ordering::Release);
		while !self.complete.load(Ordering::Acquire) {
			arch::spin_loop_hint();
		}
	}

	/// Called by the bootstrap: spins until `expected` secondaries have
	/// published readiness.
	pub fn wait_for_secondaries(&self, expected: u32) {
		while self.ready.load(Ordering::Acquire) < expected {
			arch::spin_loop_hint();
		}
	}

	/// Called by the bootstrap once every secondary has been observed ready
	/// and whatever bootstrap-only Stage 3 work (spawning Stage 4) is done.
	pub fn signal_complete(&self) {
		self.complete.store(true, Ordering::Release);
	}

	#[cfg(test)]
	pub fn ready_count(&self) -> u32 {
		self.ready.load(Ordering::Acquire)
	}
}

impl Default for Stage3Barrier {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn secondaries_block_until_bootstrap_signals_completion() {
		let barrier = Arc::new(Stage3Barrier::new());
		let expected = 3u32;

		let handles: Vec<_> = (0..expected)
			.map(|_| {
				let barrier = Arc::clone(&barrier);
				thread::spawn(move || barrier.secondary_ready_and_wait())
			})
			.collect();

		barrier.wait_for_secondaries(expected);
		assert_eq!(barrier.ready_count(), expected);

		barrier.signal_complete();
		for handle in handles {
			handle.join().expect("secondary thread must not panic");
		}
	}
}
