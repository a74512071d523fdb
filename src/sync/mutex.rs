//! §4.D Mutex: a sleeping mutex with direct hand-off. Grounded in the same
//! internal-spinlock-plus-wait-queue shape `RwLock` (§4.E) and `Parker`
//! (§4.C) share, specialised here to the hand-off protocol §4.D and §8's
//! "Under contention, a Mutex's wait queue order equals the acquisition
//! order" describe.

use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use crate::sync::spinlock::TicketSpinLock;
use crate::sync::wait_queue::WaitQueue;
use crate::task::{Task, TaskId};

const NO_HOLDER: u64 = 0;
const UNLOCKED: u8 = 0;
const PASSED_TO_WAITER: u8 = 1;

fn encode(id: TaskId) -> u64 {
	id.0 + 1
}

pub struct Mutex<T> {
	/// 0 means unlocked; otherwise the current holder's `TaskId.0 + 1`.
	locked_by: AtomicU64,
	/// §4.D "unlock_type ∈ {unlocked, passed_to_waiter}".
	unlock_type: AtomicU8,
	/// The internal spinlock (§4.D) and the wait queue it protects, stored
	/// together exactly like `Parker`'s slot: `spin`'s own data *is* the
	/// queue, so there is no separate external lock to keep in sync with it.
	spin: TicketSpinLock<WaitQueue>,
	data: UnsafeCell<T>,
}

// SAFETY: `data` is only ever reachable through a `MutexGuard`, which exists
// only while `locked_by` names the guard's task as holder.
unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

impl<T> Mutex<T> {
	pub const fn new(data: T) -> Self {
		Self {
			locked_by: AtomicU64::new(NO_HOLDER),
			unlock_type: AtomicU8::new(UNLOCKED),
			spin: TicketSpinLock::new(WaitQueue::new()),
			data: UnsafeCell::new(data),
		}
	}

	fn try_claim(&self, current: TaskId) -> Result<(), u64> {
		self.locked_by
			.compare_exchange(NO_HOLDER, encode(current), Ordering::Acquire, Ordering::Acquire)
			.map(|_| ())
	}

	/// §4.D lock path. Steps 1-3 exactly as specified: a fast CAS, a
	/// hand-off/recursion check against the CAS's observed holder, then a
	/// spinlock-serialised retry that falls back to sleeping on the wait
	/// queue.
	pub fn lock(&self) -> MutexGuard<'_, T> {
		let current = Task::current();
		loop {
			match self.try_claim(current.id) {
				Ok(()) => return MutexGuard { lock: self, task: current },
				Err(observed) if observed == encode(current.id) => match self.unlock_type.load(Ordering::Acquire) {
					PASSED_TO_WAITER => {
						// Reset so a genuinely recursive `lock()` by this same
						// task panics again instead of being mistaken for a
						// second hand-off until the next `unlock`.
						self.unlock_type.store(UNLOCKED, Ordering::Release);
						return MutexGuard { lock: self, task: current };
					}
					_ => panic!("recursive Mutex::lock by the same task that already holds it"),
				},
				Err(_) => {}
			}

			let mut guard = self.spin.lock();
			match self.try_claim(current.id) {
				Ok(()) => return MutexGuard { lock: self, task: current },
				Err(_) => {
					guard.wait(&current, &self.spin);
					// `wait`'s deferred action already released `self.spin`
					// unsafely; the guard's own `Drop` must not run again.
					core::mem::forget(guard);
					// Loop back: either we were handed the lock directly
					// (caught by the recursion/hand-off check above) or we
					// lost a race and must retry.
				}
			}
		}
	}

	/// §4.D `tryLock`: attempts only step 1, never blocks.
	pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
		let current = Task::current();
		self.try_claim(current.id).ok().map(|()| MutexGuard { lock: self, task: current })
	}

	/// §4.D unlock path, run under the internal spinlock.
	fn unlock(&self, current: TaskId) {
		let mut guard = self.spin.lock();
		if guard.is_empty() {
			let ok = self
				.locked_by
				.compare_exchange(encode(current), NO_HOLDER, Ordering::Release, Ordering::Relaxed)
				.is_ok();
			assert!(ok, "Mutex unlocked by a task that does not hold it");
			self.unlock_type.store(UNLOCKED, Ordering::Release);
		} else {
			let waiter = guard.first().expect("checked non-empty above");
			self.unlock_type.store(PASSED_TO_WAITER, Ordering::Release);
			let ok = self
				.locked_by
				.compare_exchange(encode(current), encode(waiter.id), Ordering::Release, Ordering::Relaxed)
				.is_ok();
			assert!(ok, "Mutex unlocked by a task that does not hold it");
			guard.wake_one(&self.spin);
		}
	}

	/// # Safety
	/// Caller must hold the lock.
	unsafe fn data_ref(&self) -> &T {
		unsafe { &*self.data.get() }
	}

	/// # Safety
	/// Caller must hold the lock.
	#[allow(clippy::mut_from_ref)]
	unsafe fn data_mut(&self) -> &mut T {
		unsafe { &mut *self.data.get() }
	}
}

pub struct MutexGuard<'a, T> {
	lock: &'a Mutex<T>,
	task: Arc<Task>,
}

impl<'a, T> Deref for MutexGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { self.lock.data_ref() }
	}
}

impl<'a, T> DerefMut for MutexGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { self.lock.data_mut() }
	}
}

impl<'a, T> Drop for MutexGuard<'a, T> {
	fn drop(&mut self) {
		self.lock.unlock(self.task.id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn lock_unlock_round_trips() {
		testing::with_test_scheduler(|| {
			let mutex = Mutex::new(0u32);
			{
				let mut guard = mutex.lock();
				*guard += 1;
			}
			assert_eq!(*mutex.lock(), 1);
		});
	}

	#[test]
	#[should_panic(expected = "recursive")]
	fn recursive_lock_panics() {
		testing::with_test_scheduler(|| {
			let mutex = Mutex::new(());
			let _first = mutex.lock();
			let _second = mutex.lock();
		});
	}

	#[test]
	fn try_lock_fails_under_contention() {
		testing::with_test_scheduler(|| {
			let mutex = Mutex::new(());
			let _held = mutex.lock();
			assert!(mutex.try_lock().is_none());
		});
	}
}
