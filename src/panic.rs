//! The fatal sequence for invariant violations: (a) stores the panicking
//! executor id, (b) sends an IPI to all other executors to halt, (c) prints
//! a report. No recovery is attempted. On the real target this is wired in
//! as a `#[panic_handler]`; under `cargo test` the host test harness's own
//! panic path already does the equivalent (unwinding the failing test,
//! leaving others to run), so nothing here is installed.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::arch;

const NO_EXECUTOR: u32 = u32::MAX;

/// What step (a) records. A plain atomic rather than a richer structure:
/// by the time a panic handler runs, allocation may itself be unsafe, so
/// this has to be usable without touching the heap.
static PANICKING_EXECUTOR: AtomicU32 = AtomicU32::new(NO_EXECUTOR);

/// Step (a): records the panicking executor id, first-panic-wins (a second
/// executor panicking while the first is still unwinding toward halt
/// doesn't overwrite the original report).
fn record_panicking_executor() -> u32 {
	let this_core = arch::core_id();
	let _ = PANICKING_EXECUTOR.compare_exchange(NO_EXECUTOR, this_core, Ordering::AcqRel, Ordering::Acquire);
	PANICKING_EXECUTOR.load(Ordering::Acquire)
}

#[cfg(all(target_arch = "x86_64", not(test)))]
#[panic_handler]
fn panic_handler(info: &core::panic::PanicInfo) -> ! {
	let reporting_core = record_panicking_executor();

	// Step (b): idempotent — harmless if another executor's panic already
	// broadcast it.
	arch::broadcast_halt();

	// Step (c).
	log::error!("kernel panic on executor {reporting_core} (reported by {}): {info}", arch::core_id());

	loop {
		arch::disable_interrupts();
		arch::halt();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_panicking_executor_wins_the_report() {
		PANICKING_EXECUTOR.store(NO_EXECUTOR, Ordering::Relaxed);
		let first = record_panicking_executor();
		let second = record_panicking_executor();
		assert_eq!(first, second, "a later panic must not overwrite the first report");
	}
}
