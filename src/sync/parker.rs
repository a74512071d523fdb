//! §4.C Parker: a single-slot, one-shot blocker that coalesces concurrent
//! wakeups. Grounded in the same deferred-action machinery `WaitQueue` uses
//! (§4.B), generalised to a single caller-supplied slot instead of a FIFO —
//! exactly the relationship spec.md draws between the two ("Single-slot
//! one-shot blocker" vs. "Ordered set of blocked tasks").

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::scheduler;
use crate::sync::spinlock::TicketSpinLock;
use crate::task::{Task, TaskState};

/// `{ spinlock, optional parked_task, atomic counter of unpark attempts }`
/// (§3 "Parker"). The slot lives inside the spinlock's own data, the same
/// self-referential pattern `Mutex`'s wait queue uses: the spinlock both
/// protects the slot and is the "external" lock `wait`-style deferred
/// actions unsafely release.
pub struct Parker {
	slot: TicketSpinLock<Option<Arc<Task>>>,
	unpark_attempts: AtomicUsize,
}

impl Parker {
	pub const fn new() -> Self {
		Self {
			slot: TicketSpinLock::new(None),
			unpark_attempts: AtomicUsize::new(0),
		}
	}

	/// Builds a parker already holding `task` as parked, for callers that
	/// need a pre-parked slot without going through [`Parker::park`] (§3:
	/// "created empty or pre-parked with a caller-supplied task").
	pub fn pre_parked(task: Arc<Task>) -> Self {
		Self {
			slot: TicketSpinLock::new(Some(task)),
			unpark_attempts: AtomicUsize::new(0),
		}
	}

	/// §4.C `park`. Blocks `current` until some other task calls
	/// [`Parker::unpark`]. Spurious wakeups are possible (§5 "Cancellation"):
	/// step 1 below may observe a stale counter, so callers must re-check
	/// their own predicate after this returns.
	pub fn park(&self, current: &Arc<Task>) {
		// Step 1: a wakeup already happened - consume it and return at once.
		if self.unpark_attempts.swap(0, Ordering::AcqRel) != 0 {
			return;
		}

		let sched = scheduler::current();
		sched.lock();
		// Step 2: re-check under the scheduler lock.
		if self.unpark_attempts.swap(0, Ordering::AcqRel) != 0 {
			sched.unlock();
			return;
		}

		let guard = self.slot.lock();
		debug_assert!(guard.is_none(), "parker already has a parked task");
		// Step 3: re-check again now that the slot itself is held.
		if self.unpark_attempts.swap(0, Ordering::AcqRel) != 0 {
			drop(guard);
			sched.unlock();
			return;
		}

		let outgoing = Arc::clone(current);
		let slot_ptr: *const TicketSpinLock<Option<Arc<Task>>> = &self.slot;
		// `guard`'s normal unlock must not run: the deferred action below
		// performs the unlock itself, on the scheduler task, after the
		// counters have been adjusted to reflect the release. Letting the
		// guard's `Drop` also run would double-release the ticket.
		core::mem::forget(guard);

		// Step 4: hand off to the scheduler task, which stores `outgoing`
		// into the slot, marks it blocked, and releases the slot lock only
		// once `outgoing` is no longer running anywhere.
		sched.drop_with_deferred_action(move |_outgoing_from_sched| {
			unsafe {
				outgoing.set_state(TaskState::Blocked);
				outgoing.exit_spinlock();
				*(*slot_ptr).data_ptr() = Some(Arc::clone(&outgoing));
				(*slot_ptr).unsafe_unlock();
			}
		});

		scheduler::current().unlock();
	}

	/// §4.C `unpark`. Fetch-adds the attempt counter; only the attempter
	/// that observes the counter transition 0->1 does the actual wakeup
	/// work, so concurrent unparks coalesce into exactly one wakeup.
	pub fn unpark(&self) {
		if self.unpark_attempts.fetch_add(1, Ordering::AcqRel) != 0 {
			// Some other task is already responsible for this wakeup.
			return;
		}

		let task = {
			let mut guard = self.slot.lock();
			guard.take()
		};
		let Some(task) = task else {
			// The unpark predates the park; the counter (left at 1) will
			// suppress the next `park` attempt instead.
			return;
		};

		let sched = scheduler::current();
		let already_locked = sched.is_locked();
		if !already_locked {
			sched.lock();
		}
		unsafe { task.set_state(TaskState::Ready) };
		sched.queue(task);
		if !already_locked {
			sched.unlock();
		}

		self.unpark_attempts.store(0, Ordering::Release);
	}
}

impl Default for Parker {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn unpark_before_park_returns_immediately() {
		testing::with_test_scheduler(|| {
			let parker = Parker::new();
			parker.unpark();
			assert_eq!(parker.unpark_attempts.load(Ordering::Relaxed), 1);

			// A `park` that observes the pre-existing attempt must not
			// switch away: step 1 alone consumes it.
			let current = Task::current();
			parker.park(&current);
			assert_eq!(parker.unpark_attempts.load(Ordering::Relaxed), 0);
		});
	}

	#[test]
	fn unpark_on_empty_slot_is_a_noop_that_arms_the_counter() {
		testing::with_test_scheduler(|| {
			let parker = Parker::new();
			parker.unpark();
			assert!(parker.slot.lock().is_none());
			assert_eq!(parker.unpark_attempts.load(Ordering::Relaxed), 1);
		});
	}
}
