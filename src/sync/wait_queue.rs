//! §4.B WaitQueue: an ordered set of blocked tasks, always paired at the
//! use-site with an external `TicketSpinLock` protecting the predicate being
//! waited on. Grounded in the teacher's `futex`/`recmutex` sleep-then-
//! reschedule pattern, generalised into the first-class reusable primitive
//! spec.md describes instead of one bespoke parking-lot hash map per caller.

use alloc::sync::Arc;

use crate::collections::IntrusiveList;
use crate::scheduler;
use crate::sync::spinlock::TicketSpinLock;
use crate::task::{Task, TaskState};

/// Not thread-safe by itself (§4.B): every operation here assumes the caller
/// already holds the external spinlock paired with this queue.
#[derive(Default)]
pub struct WaitQueue {
	list: IntrusiveList<Task>,
}

impl WaitQueue {
	pub const fn new() -> Self {
		Self {
			list: IntrusiveList::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.list.is_empty()
	}

	pub fn len(&self) -> usize {
		self.list.len()
	}

	/// `first()` (§4.B): peek the head without removing it.
	pub fn first(&self) -> Option<Arc<Task>> {
		let ptr = self.list.first()?;
		// SAFETY: every node on this list was pushed by `push_back` below,
		// which leaked exactly one `Arc` reference count per task.
		let borrowed = unsafe { Arc::from_raw(ptr) };
		let clone = Arc::clone(&borrowed);
		core::mem::forget(borrowed);
		Some(clone)
	}

	/// `popFirst()` (§4.B): remove and return the head.
	pub fn pop_first(&mut self) -> Option<Arc<Task>> {
		let ptr = self.list.pop_front()?;
		// SAFETY: reclaims the reference count `push_back` leaked.
		Some(unsafe { Arc::from_raw(ptr) })
	}

	fn push_back(&mut self, task: &Arc<Task>) {
		// SAFETY: `task` is kept alive by the leaked reference count below for
		// as long as it remains linked; `ListLink::mark_linked` enforces the
		// "at most one list" invariant (§3) at runtime.
		unsafe { self.list.push_back(Arc::as_ptr(task)) };
		core::mem::forget(Arc::clone(task));
	}

	/// §4.B `wait`. Preconditions: `external` is held by `task`, interrupts
	/// disabled. Enqueues `task`, locks the scheduler, then hands a deferred
	/// action to [`scheduler::PerCoreScheduler::drop_with_deferred_action`]
	/// that transitions `task` to `Blocked` and releases `external` without
	/// touching the holder's counters a second time (they're adjusted right
	/// here instead, matching a normal spinlock release).
	pub fn wait<T>(&mut self, task: &Arc<Task>, external: &TicketSpinLock<T>) {
		self.push_back(task);

		let sched = scheduler::current();
		sched.lock();

		let outgoing = Arc::clone(task);
		// SAFETY: the external lock is guaranteed live until the deferred
		// action runs — that happens synchronously inside `call_on_stack`,
		// before this `wait` call returns, and the caller holds the lock for
		// at least that long by construction (they're still inside the
		// critical section the lock protects).
		let external_ptr: *const TicketSpinLock<T> = external;
		sched.drop_with_deferred_action(move |_outgoing_from_sched| {
			unsafe { outgoing.set_state(TaskState::Blocked) };
			outgoing.exit_spinlock();
			// SAFETY: counters above already reflect the release; no other
			// holder of this lock exists to race the unlock.
			unsafe { (*external_ptr).unsafe_unlock() };
		});

		scheduler::current().unlock();
	}

	/// §4.B `wakeOne`. Precondition: `external` is held by the caller.
	/// Removes the head, sets it `Ready`, takes the scheduler lock if not
	/// already held, and enqueues — never switches.
	pub fn wake_one<T>(&mut self, _external: &TicketSpinLock<T>) -> bool {
		let Some(task) = self.pop_first() else {
			return false;
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
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn wake_one_transfers_to_ready_exactly_once() {
		testing::with_test_scheduler(|| {
			let lock: TicketSpinLock<()> = TicketSpinLock::new(());
			let mut wq = WaitQueue::new();
			let task = testing::spawn_kernel_task("waiter");
			wq.push_back(&task);
			assert_eq!(wq.len(), 1);
			assert!(wq.wake_one(&lock));
			assert!(wq.is_empty());
			assert_eq!(task.state(), TaskState::Ready);
		});
	}
}
