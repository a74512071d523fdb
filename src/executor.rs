//! One hardware thread capable of running exactly one task at a time.
//! Created once during SMP bring-up and never destroyed; owns a pointer to
//! its currently running task and its embedded scheduler task.

use alloc::sync::Arc;

use crate::scheduler::PerCoreScheduler;
use crate::task::Task;

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash, Default)]
pub struct CoreId(pub u32);

impl core::fmt::Display for CoreId {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Returns the executor that owns the current hardware context: the id of
/// the current core plus access to its installed [`PerCoreScheduler`].
pub fn current_core_id() -> CoreId {
	CoreId(crate::arch::core_id())
}

pub fn current_scheduler() -> &'static mut PerCoreScheduler {
	crate::arch::core_scheduler()
}

pub fn current_task() -> Arc<Task> {
	current_scheduler().current_task()
}

/// Installs a [`PerCoreScheduler`] for the calling executor and, on the
/// test backend, assigns it the next executor id. Called once per executor
/// during bring-up (`x86_64`) or once per test thread standing in for an
/// executor (`test`).
pub fn install_scheduler(scheduler: Arc<PerCoreScheduler>) {
	crate::arch::install_core_local_scheduler(scheduler);
}
