//! A process: owns an address space and a set of member tasks, reference
//! counted by the number of live tasks plus explicit references.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::rwlock::RwLock;
use crate::task::TaskId;

/// Opaque address-space handle. Stands in for the out-of-scope memory
/// layer's page-table handle for each process: `load()` performs the actual
/// page-table switch (a `Cr3` write on `x86_64`, a no-op on `test`), and
/// `is_same` backs the switching engine's "iff process differs" page-table
/// reload gate.
pub struct AddressSpace {
	#[cfg(target_arch = "x86_64")]
	page_table_root: u64,
	#[cfg(not(target_arch = "x86_64"))]
	id: u64,
}

static NEXT_ADDRESS_SPACE_ID: AtomicUsize = AtomicUsize::new(1);

impl AddressSpace {
	pub fn new() -> Self {
		#[cfg(target_arch = "x86_64")]
		{
			Self {
				page_table_root: NEXT_ADDRESS_SPACE_ID.fetch_add(1, Ordering::Relaxed) as u64,
			}
		}
		#[cfg(not(target_arch = "x86_64"))]
		{
			Self {
				id: NEXT_ADDRESS_SPACE_ID.fetch_add(1, Ordering::Relaxed) as u64,
			}
		}
	}

	#[cfg(target_arch = "x86_64")]
	pub fn load(&self) {
		// A real implementation writes `self.page_table_root` into `Cr3`;
		// the actual frame layout belongs to the out-of-scope memory
		// subsystem, so this only demonstrates the call site.
		let _ = self.page_table_root;
	}

	#[cfg(not(target_arch = "x86_64"))]
	pub fn load(&self) {}

	pub fn is_same(&self, other: &Self) -> bool {
		#[cfg(target_arch = "x86_64")]
		{
			self.page_table_root == other.page_table_root
		}
		#[cfg(not(target_arch = "x86_64"))]
		{
			self.id == other.id
		}
	}
}

impl Default for AddressSpace {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Process {
	address_space: AddressSpace,
	tasks: RwLock<BTreeSet<TaskId>>,
	ref_count: AtomicUsize,
}

impl Process {
	/// §6 `Process.create(name, initial_task_options)`. The initial task is
	/// created by the caller (via `Task::create_user`, which bumps this
	/// process's reference count); this just allocates the process itself
	/// with a reference count of one for the caller's own handle.
	pub fn create() -> Arc<Process> {
		Arc::new(Process {
			address_space: AddressSpace::new(),
			tasks: RwLock::new(BTreeSet::new()),
			ref_count: AtomicUsize::new(1),
		})
	}

	pub fn address_space(&self) -> &AddressSpace {
		&self.address_space
	}

	pub fn register_task(&self, id: TaskId) {
		self.tasks.write().insert(id);
	}

	pub fn unregister_task(&self, id: TaskId) {
		self.tasks.write().remove(&id);
	}

	/// §4.I: removes `task` from this process's member set iff its
	/// reference count is still zero, under the same write lock that
	/// guards against a concurrent `register_task`/requeue. Returns
	/// whether the task was actually removed.
	pub(crate) fn remove_task_if_unreferenced(&self, task: &crate::task::Task) -> bool {
		let mut tasks = self.tasks.write();
		if task.reference_count() == 0 {
			tasks.remove(&task.id);
			true
		} else {
			false
		}
	}

	pub fn task_count(&self) -> usize {
		self.tasks.read().len()
	}

	pub fn increment_reference_count(self: &Arc<Self>) {
		self.ref_count.fetch_add(1, Ordering::Relaxed);
	}

	/// Decrementing to zero queues the process for cleanup, which tears
	/// down its address space (§4.F: "when the Process count reaches zero
	/// it too is queued for cleanup").
	pub fn decrement_reference_count(self: &Arc<Self>) {
		if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
			crate::scheduler::cleanup::queue_process_for_cleanup(Arc::clone(self));
		}
	}

	pub(crate) fn reference_count(&self) -> usize {
		self.ref_count.load(Ordering::Acquire)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn address_space_identity() {
		let a = AddressSpace::new();
		let b = AddressSpace::new();
		assert!(a.is_same(&a));
		assert!(!a.is_same(&b));
	}
}
