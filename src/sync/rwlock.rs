//! §4.E RwLock: readers/writers encoded in a single `usize`, layered on
//! [`Mutex`] (serialising writers against each other) and a [`WaitQueue`]
//! (parking a writer until the last in-flight reader leaves). Grounded in
//! the same composition spec.md names: "Composed with a Mutex and a
//! WaitQueue."

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::mutex::{Mutex, MutexGuard};
use crate::sync::spinlock::TicketSpinLock;
use crate::sync::wait_queue::WaitQueue;
use crate::task::Task;

/// §4.E bit layout: "bit 0 = writer active; bits `[1, 1+bitwidth)` = writer
/// count; upper half = reader count".
const READER_SHIFT: u32 = usize::BITS / 2;
const WRITER_ACTIVE_BIT: usize = 1;
const WRITER_COUNT_UNIT: usize = 1 << 1;
const WRITER_MASK: usize = (1usize << READER_SHIFT) - 1;
const READER_UNIT: usize = 1usize << READER_SHIFT;
const READER_MASK: usize = !WRITER_MASK;

pub struct RwLock<T> {
	state: AtomicUsize,
	/// Serialises writers against each other; held for the writer's entire
	/// critical section (§4.E "Writers always take the Mutex").
	write_serialize: Mutex<()>,
	/// Parks a writer waiting for `reader_count == 0`. Self-referential in
	/// the same way `Mutex`'s internal spinlock is: `writer_wait`'s own data
	/// *is* the queue it is paired with.
	writer_wait: TicketSpinLock<WaitQueue>,
	data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for RwLock<T> {}
unsafe impl<T: Send> Send for RwLock<T> {}

impl<T> RwLock<T> {
	pub const fn new(data: T) -> Self {
		Self {
			state: AtomicUsize::new(0),
			write_serialize: Mutex::new(()),
			writer_wait: TicketSpinLock::new(WaitQueue::new()),
			data: UnsafeCell::new(data),
		}
	}

	/// §4.E "Readers take a fast path (cas +reader while writer bits are
	/// zero)". Readers yield to a writer that is merely *pending*, not only
	/// one that is active, so writers are never starved by a steady stream
	/// of new readers.
	pub fn read(&self) -> RwLockReadGuard<'_, T> {
		loop {
			let cur = self.state.load(Ordering::Acquire);
			if cur & WRITER_MASK == 0 {
				if self
					.state
					.compare_exchange_weak(cur, cur + READER_UNIT, Ordering::Acquire, Ordering::Relaxed)
					.is_ok()
				{
					return RwLockReadGuard { lock: self };
				}
				continue;
			}
			break;
		}

		// Contended: "acquire the Mutex, increment, release the Mutex" -
		// parks behind whichever writer currently holds (or is about to
		// hold) `write_serialize`, then increments while still holding it so
		// no writer can slip in between the acquire and the increment.
		let guard = self.write_serialize.lock();
		self.state.fetch_add(READER_UNIT, Ordering::AcqRel);
		drop(guard);
		RwLockReadGuard { lock: self }
	}

	fn read_unlock(&self) {
		let prev = self.state.fetch_sub(READER_UNIT, Ordering::AcqRel);
		if (prev - READER_UNIT) & READER_MASK == 0 {
			let mut guard = self.writer_wait.lock();
			if !guard.is_empty() {
				guard.wake_one(&self.writer_wait);
			}
		}
	}

	/// §4.E "Writers always take the Mutex, then observe the reader count
	/// and either flip `writer_active` or wait on the queue until the last
	/// reader releases."
	pub fn write(&self) -> RwLockWriteGuard<'_, T> {
		self.state.fetch_add(WRITER_COUNT_UNIT, Ordering::AcqRel);
		let mutex_guard = self.write_serialize.lock();

		loop {
			let cur = self.state.load(Ordering::Acquire);
			if cur & READER_MASK == 0 {
				self.state.fetch_or(WRITER_ACTIVE_BIT, Ordering::AcqRel);
				break;
			}

			let mut wguard = self.writer_wait.lock();
			let cur = self.state.load(Ordering::Acquire);
			if cur & READER_MASK == 0 {
				drop(wguard);
				self.state.fetch_or(WRITER_ACTIVE_BIT, Ordering::AcqRel);
				break;
			}
			let current = Task::current();
			wguard.wait(&current, &self.writer_wait);
			core::mem::forget(wguard);
		}

		self.state.fetch_sub(WRITER_COUNT_UNIT, Ordering::AcqRel);
		RwLockWriteGuard {
			lock: self,
			_mutex_guard: mutex_guard,
		}
	}

	fn write_unlock(&self) {
		self.state.fetch_and(!WRITER_ACTIVE_BIT, Ordering::AcqRel);
	}

	/// # Safety
	/// Caller must hold either a read or write guard.
	unsafe fn data_ref(&self) -> &T {
		unsafe { &*self.data.get() }
	}

	/// # Safety
	/// Caller must hold a write guard.
	#[allow(clippy::mut_from_ref)]
	unsafe fn data_mut(&self) -> &mut T {
		unsafe { &mut *self.data.get() }
	}
}

pub struct RwLockReadGuard<'a, T> {
	lock: &'a RwLock<T>,
}

impl<'a, T> Deref for RwLockReadGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { self.lock.data_ref() }
	}
}

impl<'a, T> Drop for RwLockReadGuard<'a, T> {
	fn drop(&mut self) {
		self.lock.read_unlock();
	}
}

pub struct RwLockWriteGuard<'a, T> {
	lock: &'a RwLock<T>,
	_mutex_guard: MutexGuard<'a, ()>,
}

impl<'a, T> Deref for RwLockWriteGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		unsafe { self.lock.data_ref() }
	}
}

impl<'a, T> DerefMut for RwLockWriteGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		unsafe { self.lock.data_mut() }
	}
}

impl<'a, T> Drop for RwLockWriteGuard<'a, T> {
	fn drop(&mut self) {
		self.lock.write_unlock();
		// `_mutex_guard` is dropped after this, in declaration order,
		// releasing `write_serialize` only once `writer_active` is clear.
	}
}

/// §4.E `tryUpgrade`: attempts to turn a read guard into a write guard
/// in place. Fails (returning the read guard unchanged) unless `guard` is
/// the sole reader and no writer is active or pending.
pub fn try_upgrade<T>(guard: RwLockReadGuard<'_, T>) -> Result<RwLockWriteGuard<'_, T>, RwLockReadGuard<'_, T>> {
	let lock = guard.lock;
	let cur = lock.state.load(Ordering::Acquire);
	if (cur >> READER_SHIFT) != 1 || (cur & WRITER_MASK) != 0 {
		return Err(guard);
	}

	let new = (cur - READER_UNIT) | WRITER_ACTIVE_BIT;
	if lock
		.state
		.compare_exchange(cur, new, Ordering::AcqRel, Ordering::Acquire)
		.is_err()
	{
		return Err(guard);
	}

	match lock.write_serialize.try_lock() {
		Some(mutex_guard) => {
			core::mem::forget(guard);
			Ok(RwLockWriteGuard {
				lock,
				_mutex_guard: mutex_guard,
			})
		}
		None => {
			// Unwind cleanly: undo the state flip and hand the reader back.
			lock.state.fetch_and(!WRITER_ACTIVE_BIT, Ordering::AcqRel);
			lock.state.fetch_add(READER_UNIT, Ordering::AcqRel);
			Err(guard)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn multiple_readers_share_access() {
		testing::with_test_scheduler(|| {
			let lock = RwLock::new(5u32);
			let a = lock.read();
			let b = lock.read();
			assert_eq!(*a, 5);
			assert_eq!(*b, 5);
		});
	}

	#[test]
	fn writer_sees_exclusive_access() {
		testing::with_test_scheduler(|| {
			let lock = RwLock::new(0u32);
			{
				let mut w = lock.write();
				*w = 7;
			}
			assert_eq!(*lock.read(), 7);
		});
	}

	#[test]
	fn upgrade_succeeds_for_sole_reader() {
		testing::with_test_scheduler(|| {
			let lock = RwLock::new(1u32);
			let read = lock.read();
			let mut write = try_upgrade(read).unwrap_or_else(|_| panic!("sole reader must upgrade"));
			*write += 1;
			drop(write);
			assert_eq!(*lock.read(), 2);
		});
	}

	#[test]
	fn upgrade_fails_with_second_reader_present() {
		testing::with_test_scheduler(|| {
			let lock = RwLock::new(1u32);
			let read_a = lock.read();
			let _read_b = lock.read();
			assert!(try_upgrade(read_a).is_err());
		});
	}
}
