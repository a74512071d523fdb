//! An intrusive singly-linked node, usable by exactly one of the ready
//! queue, a wait queue, or the cleanup queue at a time — a task is never in
//! more than one such list at once. One shared field rather than three
//! per-queue fields: simpler, and the invariant is just as easy to assert in
//! debug builds either way.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Embedded in `Task`. `next` is owned by whichever queue currently holds
/// the task; `linked` lets debug builds assert the "at most one list"
/// invariant without needing to know which list last touched the node.
pub struct ListLink<T> {
	next: Cell<Option<*const T>>,
	linked: AtomicBool,
}

impl<T> ListLink<T> {
	pub const fn new() -> Self {
		Self {
			next: Cell::new(None),
			linked: AtomicBool::new(false),
		}
	}

	/// Marks this node as belonging to some list. Panics if it is already
	/// linked elsewhere — catching the two-lists-at-once bug at the point
	/// it happens rather than corrupting whichever list loses the race.
	fn mark_linked(&self) {
		let was_linked = self.linked.swap(true, Ordering::AcqRel);
		assert!(!was_linked, "task is already linked into another queue");
	}

	fn mark_unlinked(&self) {
		self.next.set(None);
		self.linked.store(false, Ordering::Release);
	}

	pub fn is_linked(&self) -> bool {
		self.linked.load(Ordering::Acquire)
	}
}

/// Implemented by every type enqueued on an `IntrusiveList` (`Task`, for the
/// ready/wait/cleanup queues).
///
/// # Safety
/// `link()` must always return a reference to the same `ListLink` for the
/// lifetime of the value; the list dereferences stored pointers through it.
pub unsafe trait HasLink<T> {
	fn link(&self) -> &ListLink<T>;
}

/// An intrusive FIFO over `T` values reached through raw pointers, used
/// identically by the ready queue, every `WaitQueue`, and the cleanup
/// service's incoming list. Not thread-safe by itself: every caller in this
/// crate pairs it with either the scheduler spinlock or an external spinlock.
pub struct IntrusiveList<T> {
	head: Option<*const T>,
	tail: Option<*const T>,
	len: usize,
}

impl<T: HasLink<T>> IntrusiveList<T> {
	pub const fn new() -> Self {
		Self {
			head: None,
			tail: None,
			len: 0,
		}
	}

	pub fn len(&self) -> usize {
		self.len
	}

	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// # Safety
	/// `item` must outlive its membership in this list.
	pub unsafe fn push_back(&mut self, item: *const T) {
		let link = unsafe { (*item).link() };
		link.mark_linked();
		link.next.set(None);
		match self.tail {
			// SAFETY: `tail` was pushed through this same list and is still
			// live (callers never free a linked node).
			Some(tail) => unsafe { (*tail).link().next.set(Some(item)) },
			None => self.head = Some(item),
		}
		self.tail = Some(item);
		self.len += 1;
	}

	pub fn pop_front(&mut self) -> Option<*const T> {
		let head = self.head?;
		// SAFETY: `head` is a live node belonging to this list.
		let head_link = unsafe { (*head).link() };
		self.head = head_link.next.get();
		if self.head.is_none() {
			self.tail = None;
		}
		head_link.mark_unlinked();
		self.len -= 1;
		Some(head)
	}

	pub fn first(&self) -> Option<*const T> {
		self.head
	}
}

impl<T: HasLink<T>> Default for IntrusiveList<T> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Node {
		id: u32,
		link: ListLink<Node>,
	}

	unsafe impl HasLink<Node> for Node {
		fn link(&self) -> &ListLink<Node> {
			&self.link
		}
	}

	#[test]
	fn fifo_order() {
		let a = Node { id: 1, link: ListLink::new() };
		let b = Node { id: 2, link: ListLink::new() };
		let mut list = IntrusiveList::<Node>::new();
		unsafe {
			list.push_back(&a as *const _);
			list.push_back(&b as *const _);
		}
		assert_eq!(list.len(), 2);
		let first = list.pop_front().unwrap();
		assert_eq!(unsafe { (*first).id }, 1);
		let second = list.pop_front().unwrap();
		assert_eq!(unsafe { (*second).id }, 2);
		assert!(list.is_empty());
	}

	#[test]
	#[should_panic(expected = "already linked")]
	fn double_link_panics() {
		let a = Node { id: 1, link: ListLink::new() };
		let mut list_one = IntrusiveList::<Node>::new();
		let mut list_two = IntrusiveList::<Node>::new();
		unsafe {
			list_one.push_back(&a as *const _);
			list_two.push_back(&a as *const _);
		}
	}
}
