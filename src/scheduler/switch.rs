//! §4.H: the four ways control moves from one task to another. Every
//! variant funnels through [`transition_for`] and `arch::before_switch_task`
//! so the kernel/user page-table and user-memory-access bookkeeping never
//! has to be duplicated at the call sites in `sync` and `scheduler::cleanup`.

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::arch::{self, TaskKind, Transition};
use crate::task::{Kind, Task, TaskState};

use super::PerCoreScheduler;

type DeferredAction = Box<dyn FnOnce(&Arc<Task>)>;

struct DeferredCall {
	outgoing: Arc<Task>,
	action: DeferredAction,
}

fn transition_for(old: &Task, new: &Task) -> Transition {
	let old_kind = match old.kind {
		Kind::Kernel => TaskKind::Kernel,
		Kind::User(_) => TaskKind::User,
	};
	let new_kind = match new.kind {
		Kind::Kernel => TaskKind::Kernel,
		Kind::User(_) => TaskKind::User,
	};
	let process_changed = match (&old.kind, &new.kind) {
		(Kind::User(a), Kind::User(b)) => !Arc::ptr_eq(a, b),
		_ => true,
	};
	Transition {
		old_kind,
		new_kind,
		process_changed,
		old_user_access_count: old.user_memory_access_count(),
		new_user_access_count: new.user_memory_access_count(),
	}
}

/// §4.H's page-table reload gate: "iff process differs". Invoked by the
/// caller ahead of `arch::before_switch_task`, matching that hook's doc
/// comment.
fn maybe_load_address_space(transition: &Transition, new: &Task) {
	if !transition.process_changed {
		return;
	}
	if let Kind::User(process) = &new.kind {
		process.address_space().load();
	}
}

fn mark_running(task: &Arc<Task>, core: crate::executor::CoreId) {
	unsafe { task.set_state(TaskState::Running(core)) };
	task.set_known_executor(Some(core));
}

/// §4.H.1 "yield from running": a voluntary switch between two ordinary
/// tasks, manages the scheduler lock itself across the whole operation.
/// A no-op if the ready queue is empty (§8 law: "yielding with an empty
/// ready queue is a no-op").
pub fn yield_from_running(sched: &mut PerCoreScheduler) {
	sched.lock();
	if sched.ready_queue.is_empty() {
		sched.unlock();
		return;
	}
	yield_locked(sched);
	sched.unlock();
}

/// §4.H.4 "yield under scheduler lock": identical switch machinery to (1)
/// but assumes the caller already holds the scheduler lock and leaves it
/// held across (and after) the switch — the caller releases it whenever it
/// sees fit, possibly long after the switch completes.
pub fn yield_locked(sched: &mut PerCoreScheduler) {
	debug_assert!(sched.current_task.scheduler_locked(), "yield_locked called without holding the scheduler lock");
	let Some(next) = sched.ready_queue.pop_front() else {
		return;
	};
	let core = sched.core_id;
	let current = Arc::clone(&sched.current_task);

	let transition = transition_for(&current, &next);
	unsafe { current.set_state(TaskState::Ready) };
	sched.ready_queue.push_back(&current);

	mark_running(&next, core);
	sched.current_task = Arc::clone(&next);

	maybe_load_address_space(&transition, &next);
	arch::before_switch_task(transition);
	arch::switch_task(current.context(), next.context());
	// Resumes here once some other switch lands back on `current`'s context.
}

/// §4.H.2 "yield from idle": the scheduler task's own switch into a newly
/// selected task. Never returns — the scheduler task's stack is disposable
/// between idle invocations, so this always uses the non-saving switch.
fn yield_from_idle(sched: &mut PerCoreScheduler, next: Arc<Task>) -> ! {
	// Idle invariant (§4.G): the scheduler task always holds the scheduler
	// lock with exactly one level of nesting while idle.
	sched.scheduler_task.set_interrupt_disable_count(1);
	sched.scheduler_task.set_spinlocks_held(1);

	let core = sched.core_id;
	let transition = transition_for(&sched.scheduler_task, &next);
	mark_running(&next, core);
	sched.current_task = Arc::clone(&next);

	maybe_load_address_space(&transition, &next);
	arch::before_switch_task(transition);
	arch::switch_task_no_save(next.context());
	unreachable!("switch_task_no_save never returns to its caller")
}

/// The scheduler task's body: pick a ready task and switch into it, or halt
/// and check again (§4.G idle loop). Entered fresh every time — either from
/// [`drop_with_deferred_action`]'s trampoline or recursively from here after
/// a halt — never resumed via its own saved context (`run_trampoline` is
/// unreachable for this task, see `task::scheduler_task_idle_entry`).
pub(super) fn scheduler_task_loop(sched: &mut PerCoreScheduler) -> ! {
	let backoff = crossbeam_utils::Backoff::new();
	loop {
		if let Some(next) = sched.ready_queue.pop_front() {
			yield_from_idle(sched, next);
		}
		if backoff.is_completed() {
			arch::halt();
		} else {
			backoff.snooze();
		}
	}
}

extern "C" fn run_deferred_call(raw: usize) {
	// SAFETY: `raw` was produced by `Box::into_raw` below and handed to
	// `arch::call_on_stack`, which calls this function exactly once with it.
	let call = unsafe { Box::from_raw(raw as *mut DeferredCall) };
	(call.action)(&call.outgoing);

	let sched = crate::executor::current_scheduler();
	scheduler_task_loop(sched)
}

/// §4.H.3 "drop/block with deferred action": jumps to the scheduler task's
/// stack, runs `action` there with the outgoing task no longer running
/// anywhere, then falls into [`scheduler_task_loop`] to pick whatever runs
/// next. `action` typically finishes tearing down the outgoing task's
/// externally-visible state (marking it blocked/dropped, releasing a lock it
/// held) — work that isn't safe to do while the task itself might still be
/// observed as `Running`.
pub fn drop_with_deferred_action(sched: &mut PerCoreScheduler, action: impl FnOnce(&Arc<Task>) + 'static) {
	let outgoing = Arc::clone(&sched.current_task);
	let call = Box::new(DeferredCall {
		outgoing: Arc::clone(&outgoing),
		action: Box::new(action),
	});
	let raw = Box::into_raw(call) as usize;
	let stack_top = sched.scheduler_task.stack().top();
	arch::call_on_stack(outgoing.context(), stack_top, run_deferred_call, raw);
	// Resumes here once `outgoing` is switched back into by a later
	// `switch_task`/`switch_task_no_save`.
}
