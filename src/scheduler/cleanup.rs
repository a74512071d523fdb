//! §4.I Task cleanup service: a dedicated kernel task that reaps tasks (and
//! processes) once their last reference is gone, off the critical path of
//! whichever `decrement_reference_count` observed the zero. Grounded in the
//! teacher's `scheduler::PerCoreScheduler::cleanup_tasks` deferred-reaping
//! idea, generalised into spec.md's single cross-executor service plus its
//! own Parker and lock-free incoming list instead of a per-core poll.

use alloc::collections::BTreeSet;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use crate::process::Process;
use crate::sync::parker::Parker;
use crate::sync::rwlock::RwLock;
use crate::sync::spinlock::TicketSpinLock;
use crate::task::{Kind, Task, TaskId};

/// §4.I "kernel tasks registry": the parent set non-scheduler kernel tasks
/// are drained against, mirroring `Process::tasks` for user tasks.
static KERNEL_TASKS: RwLock<BTreeSet<TaskId>> = RwLock::new(BTreeSet::new());

/// Treiber-stack head for tasks awaiting cleanup. Each node's own
/// `cleanup_next` field is the link; pushers only ever touch the node they
/// are pushing, so no atomic is needed on the link itself, only on `head`.
static INCOMING_TASKS: AtomicPtr<Task> = AtomicPtr::new(ptr::null_mut());

/// Processes are reaped far less often than tasks and have no intrusive
/// link field of their own, so their incoming queue is a plain spinlock-
/// guarded `Vec` rather than a lock-free stack.
static INCOMING_PROCESSES: TicketSpinLock<Vec<Arc<Process>>> = TicketSpinLock::new(Vec::new());

static SERVICE_PARKER: Parker = Parker::new();

pub(crate) fn register_kernel_task(id: TaskId) {
	KERNEL_TASKS.write().insert(id);
}

/// §4.I `queueTaskForCleanup`: CAS-sets `task`'s queued flag (panicking if
/// it was already set), prepends it to the incoming stack, and unparks the
/// service.
pub fn queue_task_for_cleanup(task: Arc<Task>) {
	task.mark_queued_for_cleanup();

	let raw = Arc::into_raw(task) as *mut Task;
	let mut head = INCOMING_TASKS.load(Ordering::Acquire);
	loop {
		// SAFETY: `raw` is not yet reachable from any other thread - it was
		// just produced by `Arc::into_raw` above - so writing its own link
		// field is uncontended.
		unsafe { (*raw).set_cleanup_next(if head.is_null() { None } else { Some(head as *const Task) }) };
		match INCOMING_TASKS.compare_exchange_weak(head, raw, Ordering::AcqRel, Ordering::Acquire) {
			Ok(_) => break,
			Err(observed) => head = observed,
		}
	}

	SERVICE_PARKER.unpark();
}

pub fn queue_process_for_cleanup(process: Arc<Process>) {
	INCOMING_PROCESSES.lock().push(process);
	SERVICE_PARKER.unpark();
}

/// Spawns the cleanup service as a regular kernel task. Called once during
/// SMP bring-up Stage 4 (§4.K).
pub fn spawn() -> Result<Arc<Task>, crate::error::KernelError> {
	Task::create_kernel("cleanup", service_entry, 0)
}

extern "C" fn service_entry(_arg: usize) {
	loop {
		let current = Task::current();
		SERVICE_PARKER.park(&current);
		drain_tasks();
		drain_processes();
	}
}

fn drain_tasks() {
	let mut cursor = INCOMING_TASKS.swap(ptr::null_mut(), Ordering::AcqRel);
	while !cursor.is_null() {
		// SAFETY: `cursor` was produced by `Arc::into_raw` in
		// `queue_task_for_cleanup` and has not been reclaimed since.
		let task = unsafe { Arc::from_raw(cursor as *const Task) };
		cursor = task.cleanup_next().map_or(ptr::null_mut(), |p| p as *mut Task);
		finalize_task(task);
	}
}

fn drain_processes() {
	let pending = core::mem::take(&mut *INCOMING_PROCESSES.lock());
	for process in pending {
		finalize_process(process);
	}
}

/// §4.I: "if no new references were taken or requeues happened during the
/// drain, removes the task and releases its stack and slab entry; for user
/// tasks this also decrements the owning Process's reference count."
fn finalize_task(task: Arc<Task>) {
	let removed = match &task.kind {
		Kind::Kernel => {
			let mut tasks = KERNEL_TASKS.write();
			if task.reference_count() == 0 {
				tasks.remove(&task.id);
				true
			} else {
				false
			}
		}
		Kind::User(process) => process.remove_task_if_unreferenced(&task),
	};

	if !removed {
		// A new reference appeared between the zero observation and the
		// drain; leave the task registered and let it be requeued later.
		task.clear_queued_for_cleanup();
		return;
	}

	if let Kind::User(process) = &task.kind {
		process.decrement_reference_count();
	}

	// `task` drops here: its stack is freed by `Stack`'s own `Drop`, and
	// this was the last strong reference now that the registry no longer
	// holds its `TaskId` and no other list was allowed to hold an `Arc`.
}

fn finalize_process(process: Arc<Process>) {
	if process.reference_count() != 0 {
		// Same race as a task: something re-acquired a reference after the
		// count reached zero. The process stays alive under that new
		// reference; dropping our handle here just releases this queue's
		// own share of the count.
		return;
	}
	// `process` drops here, tearing down its address space.
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn kernel_task_is_registered_on_creation() {
		testing::with_test_scheduler(|| {
			let task = Task::create_kernel("scratch", noop_entry, 0).unwrap();
			assert!(KERNEL_TASKS.read().contains(&task.id));
		});
	}

	#[test]
	fn queue_and_drain_removes_unreferenced_kernel_task() {
		testing::with_test_scheduler(|| {
			let task = Task::create_kernel("scratch2", noop_entry, 0).unwrap();
			let id = task.id;
			assert!(KERNEL_TASKS.read().contains(&id));

			queue_task_for_cleanup(task);
			drain_tasks();

			assert!(!KERNEL_TASKS.read().contains(&id));
		});
	}

	extern "C" fn noop_entry(_arg: usize) {}
}
