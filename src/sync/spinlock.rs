//! §4.A TicketSpinLock: bakery-style FIFO mutual exclusion that disables
//! preemption (and, on the 0->1 edge, hardware interrupts) for as long as
//! it is held. Grounded in the teacher's `Spinlock`/`SpinlockIrqSave`
//! ticket-counter pair, generalised so every acquire/release also updates
//! the holder task's `spinlocks_held`/`interrupt_disable_count` the way
//! §4.A specifies rather than just gating interrupts.

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::Backoff;
use crossbeam_utils::CachePadded;

use crate::task::{Task, TaskId};

pub struct TicketSpinLock<T> {
	next_ticket: CachePadded<AtomicUsize>,
	serving_ticket: CachePadded<AtomicUsize>,
	holder: core::cell::Cell<Option<TaskId>>,
	data: UnsafeCell<T>,
}

// SAFETY: access to `data` is only ever granted to the ticket's current
// holder via `SpinLockGuard`, which is how `Sync` is earned despite the
// `UnsafeCell`.
unsafe impl<T: Send> Sync for TicketSpinLock<T> {}
unsafe impl<T: Send> Send for TicketSpinLock<T> {}

impl<T> TicketSpinLock<T> {
	pub const fn new(data: T) -> Self {
		Self {
			next_ticket: CachePadded::new(AtomicUsize::new(0)),
			serving_ticket: CachePadded::new(AtomicUsize::new(0)),
			holder: core::cell::Cell::new(None),
			data: UnsafeCell::new(data),
		}
	}

	pub fn lock(&self) -> SpinLockGuard<'_, T> {
		let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
		let backoff = Backoff::new();
		while self.serving_ticket.load(Ordering::Acquire) != ticket {
			backoff.snooze();
		}
		let task = Task::current();
		task.enter_spinlock();
		self.holder.set(Some(task.id));
		SpinLockGuard { lock: self, task }
	}

	/// `isLockedByCurrent(task)` (§4.A), for debug assertions at lock/unlock
	/// boundaries.
	pub fn is_locked_by_current(&self) -> bool {
		self.holder.get() == Some(Task::current().id)
	}

	/// Releases without touching the holder's `spinlocks_held`/
	/// `interrupt_disable_count`, because the deferred-action path (§4.B,
	/// §4.C) has already adjusted those counters itself as part of
	/// transitioning the outgoing task to `blocked`.
	///
	/// # Safety
	/// Only the deferred-action closures in `scheduler::switch` may call
	/// this; every other release must go through `SpinLockGuard::drop`.
	pub unsafe fn unsafe_unlock(&self) {
		let ticket = self.serving_ticket.load(Ordering::Relaxed);
		assert_ne!(
			self.next_ticket.load(Ordering::Relaxed),
			ticket,
			"unlock on a TicketSpinLock that is not held"
		);
		self.holder.set(None);
		self.serving_ticket.fetch_add(1, Ordering::Release);
	}

	/// # Safety
	/// Caller must already hold the lock (only used by the deferred-action
	/// path alongside `unsafe_unlock`, to read the protected value while
	/// building the action closure).
	pub unsafe fn data_ptr(&self) -> *mut T {
		self.data.get()
	}
}

pub struct SpinLockGuard<'a, T> {
	lock: &'a TicketSpinLock<T>,
	task: alloc::sync::Arc<Task>,
}

impl<'a, T> Deref for SpinLockGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { &*self.lock.data.get() }
	}
}

impl<'a, T> DerefMut for SpinLockGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { &mut *self.lock.data.get() }
	}
}

impl<'a, T> Drop for SpinLockGuard<'a, T> {
	fn drop(&mut self) {
		assert_eq!(
			self.lock.holder.get(),
			Some(self.task.id),
			"TicketSpinLock unlocked by a task other than its holder"
		);
		self.lock.holder.set(None);
		self.task.exit_spinlock();
		self.lock.serving_ticket.fetch_add(1, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lock_unlock_preserves_counters() {
		crate::arch::register_executor();
		let task = Task::current();
		let held_before = task.spinlocks_held();
		let idc_before = task.interrupt_disable_count();

		let lock = TicketSpinLock::new(0u32);
		{
			let mut guard = lock.lock();
			*guard += 1;
		}

		assert_eq!(task.spinlocks_held(), held_before);
		assert_eq!(task.interrupt_disable_count(), idc_before);
		assert_eq!(*lock.lock(), 1);
	}

	#[test]
	#[should_panic(expected = "not held")]
	fn double_unsafe_unlock_panics() {
		crate::arch::register_executor();
		let lock = TicketSpinLock::new(());
		let guard = lock.lock();
		unsafe {
			lock.unsafe_unlock();
		}
		core::mem::forget(guard);
		unsafe {
			lock.unsafe_unlock();
		}
	}
}
