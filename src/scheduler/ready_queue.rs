//! §3 "Ready queue": a FIFO of ready, non-scheduler tasks. Mutated only
//! under the scheduler spinlock (§5), so this type itself does no locking —
//! the lock lives in [`super::PerCoreScheduler`].

use alloc::sync::Arc;

use crate::collections::IntrusiveList;
use crate::task::Task;

#[derive(Default)]
pub struct ReadyQueue {
	list: IntrusiveList<Task>,
}

impl ReadyQueue {
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

	/// # Safety
	/// `task` must not already be linked into the ready, wait, or cleanup
	/// queue — enforced at runtime by `ListLink::mark_linked`'s panic.
	pub fn push_back(&mut self, task: &Arc<Task>) {
		assert!(!task.is_scheduler_task(), "the scheduler task never joins the ready queue");
		unsafe {
			self.list.push_back(Arc::as_ptr(task));
		}
		// The queue now holds a strong reference's worth of ownership; leak
		// one `Arc` count so the task outlives its time on the list even if
		// every other handle is dropped. `pop_front` below reclaims it.
		core::mem::forget(Arc::clone(task));
	}

	pub fn pop_front(&mut self) -> Option<Arc<Task>> {
		let ptr = self.list.pop_front()?;
		// SAFETY: `push_back` leaked exactly one reference count per
		// pushed task; reclaim it here.
		Some(unsafe { Arc::from_raw(ptr) })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::task::Task;

	extern "C" fn noop_entry(_arg: usize) {}

	#[test]
	fn fifo_ordering() {
		crate::arch::register_executor();
		let mut q = ReadyQueue::new();
		let a = Task::create_kernel("a", noop_entry, 0).unwrap();
		let b = Task::create_kernel("b", noop_entry, 0).unwrap();
		q.push_back(&a);
		q.push_back(&b);
		assert_eq!(q.pop_front().unwrap().id, a.id);
		assert_eq!(q.pop_front().unwrap().id, b.id);
		assert!(q.is_empty());
	}
}
