//! §3/§4.G-H: one [`PerCoreScheduler`] per executor, holding that executor's
//! ready queue and the two tasks it alternates between at the top level —
//! whichever ordinary task is `current`, and the dedicated scheduler task
//! switched to for every block/drop (§4.H.3) and idle cycle (§4.G).
//!
//! Resolves the spec's Open Question of global vs. per-executor ready
//! queues in favour of per-executor: every field below is a plain value,
//! no atomics or interior mutability needed, because `arch::core_scheduler`
//! only ever hands out this executor's own `&'static mut` instance (see
//! DESIGN.md).

pub mod cleanup;
pub mod interrupt;
mod ready_queue;
mod switch;

#[cfg(test)]
pub mod testing;

pub use ready_queue::ReadyQueue;

use alloc::sync::Arc;

use crate::executor::CoreId;
use crate::task::{Task, TaskState};

pub struct PerCoreScheduler {
	core_id: CoreId,
	current_task: Arc<Task>,
	scheduler_task: Arc<Task>,
	ready_queue: ReadyQueue,
}

/// `scheduler::current()`: the installed scheduler for the calling
/// executor (§6).
pub fn current() -> &'static mut PerCoreScheduler {
	crate::executor::current_scheduler()
}

impl PerCoreScheduler {
	pub(crate) fn new(core_id: CoreId, current_task: Arc<Task>, scheduler_task: Arc<Task>) -> Self {
		unsafe { current_task.set_state(TaskState::Running(core_id)) };
		current_task.set_known_executor(Some(core_id));
		Self {
			core_id,
			current_task,
			scheduler_task,
			ready_queue: ReadyQueue::new(),
		}
	}

	/// Builds and installs a scheduler for the calling executor, then enters
	/// its idle loop — never returns. The entry point every executor (BSP
	/// and each AP) reaches at the end of SMP bring-up (§4.K Stage 4).
	pub fn install_and_run(core_id: CoreId) -> ! {
		let scheduler_task =
			Task::create_scheduler_task("scheduler").expect("scheduler task allocation must not fail during bring-up");
		let sched = Arc::new(Self::new(core_id, Arc::clone(&scheduler_task), scheduler_task));
		crate::executor::install_scheduler(sched);
		switch::scheduler_task_loop(current())
	}

	pub fn core_id(&self) -> CoreId {
		self.core_id
	}

	pub fn current_task(&self) -> Arc<Task> {
		Arc::clone(&self.current_task)
	}

	pub fn is_empty(&self) -> bool {
		self.ready_queue.is_empty()
	}

	pub fn is_locked(&self) -> bool {
		self.current_task.scheduler_locked()
	}

	/// §3 "scheduler lock": acquired by the current task, not a free-standing
	/// object — see `Task::enter_scheduler_lock`.
	pub fn lock(&self) {
		self.current_task.enter_scheduler_lock();
	}

	pub fn unlock(&self) {
		self.current_task.exit_scheduler_lock();
	}

	/// Enqueues an already-`Ready` task. Caller must hold the scheduler lock
	/// (§5).
	pub fn queue(&mut self, task: Arc<Task>) {
		debug_assert!(matches!(task.state(), TaskState::Ready), "queue() expects an already-Ready task");
		self.ready_queue.push_back(&task);
	}

	/// §4.H.1.
	pub fn yield_now(&mut self) {
		switch::yield_from_running(self);
	}

	/// §4.H.4. Caller must already hold the scheduler lock.
	pub fn yield_locked(&mut self) {
		switch::yield_locked(self);
	}

	/// §4.H.3.
	pub fn drop_with_deferred_action(&mut self, action: impl FnOnce(&Arc<Task>) + 'static) {
		switch::drop_with_deferred_action(self, action);
	}

	/// §4.F `drop`: the current task's exit path. Locks the scheduler, defers
	/// the state flip and self-reference release to the scheduler task, and
	/// never returns — a dropped task is never rescheduled.
	pub fn drop_current(&mut self, task: Arc<Task>) -> ! {
		self.lock();
		self.drop_with_deferred_action(move |_outgoing| {
			unsafe { task.set_state(TaskState::Dropped) };
			task.release_self_reference();
		});
		unreachable!("a dropped task is never rescheduled")
	}
}
