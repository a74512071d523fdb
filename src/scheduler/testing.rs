//! Test-only scheduler bootstrap. Every `#[test]` that needs `Task::current()`
//! or the scheduler lock/ready-queue API gets one transparently through
//! `arch::register_executor`, which calls [`install_for_current_thread`]
//! before handing back the executor id.

use alloc::sync::Arc;

use crate::executor::CoreId;
use crate::task::Task;

use super::PerCoreScheduler;

/// Builds a minimal scheduler for the calling OS thread: a task standing in
/// for the thread's own execution as `current`, plus an ordinary (unentered)
/// scheduler task for whatever block/drop a test triggers. Does not enter
/// the idle loop — callers drive switches explicitly or not at all.
pub fn install_for_current_thread(core_id: u32) {
	let current = Task::create_bootstrap("test-current").expect("task allocation must not fail in tests");
	let scheduler_task = Task::create_scheduler_task("test-scheduler").expect("task allocation must not fail in tests");
	let sched = Arc::new(PerCoreScheduler::new(CoreId(core_id), current, scheduler_task));
	crate::executor::install_scheduler(sched);
}

/// Registers the calling thread as an executor (if not already done) and
/// runs `f` with a scheduler installed.
pub fn with_test_scheduler(f: impl FnOnce()) {
	crate::arch::register_executor();
	f();
}

/// A plain, never-scheduled kernel task — useful as ready/wait-queue filler
/// in tests that only care about queue mechanics.
pub fn spawn_kernel_task(name: &str) -> Arc<Task> {
	extern "C" fn noop(_arg: usize) {}
	Task::create_kernel(name, noop, 0).expect("task allocation must not fail in tests")
}
