//! §4.J Interrupt-entry/exit: the save/restore bookkeeping every interrupt
//! vector runs around its handler, plus the periodic-tick handler's
//! preemption decision. Grounded in the teacher's `arch::x86_64::kernel::irq`
//! entry/exit counters, generalised into the explicit `on_interrupt_entry`/
//! `on_interrupt_exit` pair §6 names instead of inlining the bookkeeping into
//! every handler.

use alloc::sync::Arc;

use crate::arch;
use crate::executor;
use crate::scheduler;
use crate::task::Task;

/// What `on_interrupt_entry` captured, so `on_interrupt_exit` can restore it.
/// Consumed by value: an interrupt vector calls `on_interrupt_exit` exactly
/// once, on the same state `on_interrupt_entry` handed it.
pub struct PreInterruptState {
	prior_interrupt_disable_count: u32,
	prior_user_memory_access_count: u32,
}

/// §4.J steps 1-4. Asserts interrupts were disabled at entry (every vector
/// is reached through a hardware gate that does this automatically), then
/// saves and mutates the current task's counters: `interrupt_disable_count`
/// goes up by one, `user_memory_access_count` is zeroed (disabling user
/// memory access at the hardware level if it had been enabled), and
/// `known_executor` is set to the executor the interrupt landed on.
pub fn on_interrupt_entry() -> (Arc<Task>, PreInterruptState) {
	debug_assert!(!arch::interrupts_enabled(), "interrupt vector entered with interrupts enabled");

	let task = Task::current();
	let prior_interrupt_disable_count = task.interrupt_disable_count();
	let prior_user_memory_access_count = task.user_memory_access_count();

	task.set_interrupt_disable_count(prior_interrupt_disable_count + 1);
	task.set_user_memory_access_count(0);
	if prior_user_memory_access_count > 0 {
		arch::set_user_memory_access(false);
	}
	task.set_known_executor(Some(executor::current_core_id()));

	(
		task,
		PreInterruptState {
			prior_interrupt_disable_count,
			prior_user_memory_access_count,
		},
	)
}

impl PreInterruptState {
	/// §4.J step 6: restores both counts, reconciles the hardware
	/// user-memory-access bit to the restored count, and recomputes
	/// `known_executor` (cleared iff the restored `interrupt_disable_count`
	/// is zero).
	pub fn on_interrupt_exit(self, task: &Arc<Task>) {
		task.set_interrupt_disable_count(self.prior_interrupt_disable_count);
		task.set_user_memory_access_count(self.prior_user_memory_access_count);
		arch::set_user_memory_access(self.prior_user_memory_access_count > 0);
		task.set_known_executor(if self.prior_interrupt_disable_count == 0 {
			None
		} else {
			Some(executor::current_core_id())
		});
	}
}

/// §6 `on_syscall_entry()`: the same entry bookkeeping as a hardware
/// interrupt, except a syscall's contract (unlike the periodic tick or a
/// fault) is to run with interrupts re-enabled rather than held off for its
/// whole body. No user-mode ABI is defined here (a Non-goal), so this stops
/// at the entry hook the surrounding, out-of-scope syscall dispatcher needs.
pub fn on_syscall_entry() -> Arc<Task> {
	let (task, _pre) = on_interrupt_entry();
	arch::enable_interrupts();
	task
}

/// §4.J: "acknowledges the local interrupt controller first, then calls
/// `maybePreempt`". The vector calling this has already run
/// `on_interrupt_entry`/`on_interrupt_exit` around it.
pub fn handle_periodic_tick() {
	arch::acknowledge_periodic_tick();
	maybe_preempt();
}

/// §4.J: "if any spinlocks are held, returns immediately. Otherwise it
/// yields if the ready queue is non-empty."
pub fn maybe_preempt() {
	if Task::current().spinlocks_held() > 0 {
		return;
	}
	let sched = scheduler::current();
	if !sched.is_empty() {
		sched.yield_now();
	}
}

/// Reached from a double fault or another executor's halt IPI: broadcasts
/// the halt to every other executor (idempotent) and parks this one forever.
pub fn fatal_halt() -> ! {
	arch::broadcast_halt();
	loop {
		arch::disable_interrupts();
		arch::halt();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::scheduler::testing;

	#[test]
	fn entry_exit_round_trips_counters() {
		testing::with_test_scheduler(|| {
			let task = Task::current();
			let idc_before = task.interrupt_disable_count();
			let uma_before = task.user_memory_access_count();

			arch::disable_interrupts();
			let (entered_task, pre) = on_interrupt_entry();
			assert_eq!(entered_task.interrupt_disable_count(), idc_before + 1);
			assert_eq!(entered_task.user_memory_access_count(), 0);

			pre.on_interrupt_exit(&entered_task);
			assert_eq!(task.interrupt_disable_count(), idc_before);
			assert_eq!(task.user_memory_access_count(), uma_before);
		});
	}

	#[test]
	fn maybe_preempt_noop_while_spinlocks_held() {
		testing::with_test_scheduler(|| {
			let task = Task::current();
			task.enter_spinlock();
			// Queue another task so a non-held preempt would have switched.
			let other = testing::spawn_kernel_task("other");
			let sched = scheduler::current();
			sched.lock();
			unsafe { other.set_state(crate::task::TaskState::Ready) };
			sched.queue(other);
			sched.unlock();

			maybe_preempt();
			assert_eq!(Task::current().id, task.id, "held spinlock must suppress preemption");
			task.exit_spinlock();
		});
	}
}
