//! The schedulable entity (§3 "Task") and its lifecycle (§4.F).
//!
//! Every mutable field below is synchronised exactly as §5 describes: by
//! the task itself while running, by another agent holding the external
//! spinlock the task is queued on, or by the scheduler lock during
//! switching — never by Rust's `Sync` bound. `Task` is `unsafe impl Sync`
//! on that basis, the same discipline the teacher's `Cell<*mut
//! PerCoreScheduler>`/`RefCell<Task>` pair relies on.

pub mod stack;

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::cell::Cell;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::arch::{self, CpuContext};
use crate::collections::{HasLink, ListLink};
use crate::config::{DEFAULT_TASK_NAME_CAPACITY, KERNEL_STACK_SIZE};
use crate::error::KernelError;
use crate::executor::CoreId;
use crate::process::Process;
use crate::task::stack::Stack;

/// §3: "State ∈ {ready, running(Executor), blocked, dropped}".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
	Ready,
	Running(CoreId),
	Blocked,
	Dropped,
}

/// §3: "Kind ∈ {kernel, user}. User tasks additionally link to a Process".
pub enum Kind {
	Kernel,
	User(Arc<Process>),
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(0);

impl TaskId {
	fn fresh() -> Self {
		Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
	}
}

/// Bounded, truncating diagnostic name (§3 "Name (bounded string)"). Naming
/// is diagnostic only, so truncation is silent, never an error.
pub struct BoundedName {
	bytes: [u8; DEFAULT_TASK_NAME_CAPACITY],
	len: u8,
}

impl BoundedName {
	pub fn new(name: &str) -> Self {
		let mut bytes = [0u8; DEFAULT_TASK_NAME_CAPACITY];
		let n = name.len().min(DEFAULT_TASK_NAME_CAPACITY);
		bytes[..n].copy_from_slice(&name.as_bytes()[..n]);
		Self { bytes, len: n as u8 }
	}

	pub fn as_str(&self) -> &str {
		core::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("<invalid>")
	}
}

impl fmt::Display for BoundedName {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// The scheduling unit described by §3/§4.F.
pub struct Task {
	pub id: TaskId,
	pub name: BoundedName,
	pub kind: Kind,
	state: Cell<TaskState>,
	stack: Stack,
	ctx: CpuContext,
	ref_count: AtomicUsize,
	link: ListLink<Task>,
	known_executor: Cell<Option<CoreId>>,
	interrupt_disable_count: Cell<u32>,
	spinlocks_held: Cell<u32>,
	scheduler_locked: Cell<bool>,
	is_scheduler_task: bool,
	user_memory_access_count: Cell<u32>,
	queued_for_cleanup: AtomicBool,
	/// Link for the cleanup service's lock-free incoming stack (§4.I).
	/// Distinct from `link` above: a task reaches zero references (and so
	/// gets pushed here) only once it is off every other intrusive list,
	/// but the push itself races other cores doing the same to other
	/// tasks, so this link is only ever touched by the pushing core before
	/// publishing it, and by the single-consumer cleanup service after.
	cleanup_next: Cell<Option<*const Task>>,
}

// SAFETY: see the module-level discipline note.
unsafe impl Sync for Task {}
unsafe impl Send for Task {}

unsafe impl HasLink<Task> for Task {
	fn link(&self) -> &ListLink<Task> {
		&self.link
	}
}

/// Function pointer a fresh kernel task starts executing, after the
/// architecture trampoline has released the implicit scheduler lock
/// (§4.F).
pub type EntryFn = extern "C" fn(arg: usize);

impl Task {
	/// Allocates a new kernel task with a fresh stack, not yet scheduled.
	/// Matches §4.F: `spinlocks_held = 1`, `scheduler_locked = true`,
	/// `interrupt_disable_count = 1` so the task-entry trampoline has
	/// something to release.
	pub fn create_kernel(name: &str, entry: EntryFn, arg: usize) -> Result<Arc<Task>, KernelError> {
		Self::create(name, Kind::Kernel, entry, arg, false)
	}

	pub fn create_user(
		name: &str,
		process: Arc<Process>,
		entry: EntryFn,
		arg: usize,
	) -> Result<Arc<Task>, KernelError> {
		process.increment_reference_count();
		let task = Self::create(name, Kind::User(process.clone()), entry, arg, false)?;
		process.register_task(task.id);
		Ok(task)
	}

	pub(crate) fn create_scheduler_task(name: &str) -> Result<Arc<Task>, KernelError> {
		Self::create(name, Kind::Kernel, scheduler_task_idle_entry, 0, true)
	}

	/// §4.K Stage 1/2 "init task": a task standing in for whatever code is
	/// already running on the calling executor — the bootloader stack for
	/// the bootstrap executor, an AP trampoline stack for a secondary, or
	/// (in tests) the OS thread standing in for one — instead of one primed
	/// to start at `run_trampoline`. Its context is left uninitialised:
	/// the first `switch_task` away from it fills in `ctx.rsp` as an
	/// ordinary save, the same way any other task's context is captured.
	/// Used by `smp::install_scheduler_for_current_executor` in production
	/// and by `scheduler::testing` to bootstrap a `current_task()` for
	/// tests that don't spin up a dedicated scheduler-loop thread.
	pub(crate) fn create_bootstrap(name: &str) -> Result<Arc<Task>, KernelError> {
		let stack = Stack::new(KERNEL_STACK_SIZE)?;
		let ctx = CpuContext::uninit();

		let task = Arc::new(Task {
			id: TaskId::fresh(),
			name: BoundedName::new(name),
			kind: Kind::Kernel,
			state: Cell::new(TaskState::Ready),
			stack,
			ctx,
			ref_count: AtomicUsize::new(1),
			link: ListLink::new(),
			known_executor: Cell::new(None),
			interrupt_disable_count: Cell::new(1),
			spinlocks_held: Cell::new(1),
			scheduler_locked: Cell::new(true),
			is_scheduler_task: false,
			user_memory_access_count: Cell::new(0),
			queued_for_cleanup: AtomicBool::new(false),
			cleanup_next: Cell::new(None),
		});
		arch::bind_context_to_current_thread(&task.ctx);
		Ok(task)
	}

	fn create(
		name: &str,
		kind: Kind,
		entry: EntryFn,
		arg: usize,
		is_scheduler_task: bool,
	) -> Result<Arc<Task>, KernelError> {
		let stack = Stack::new(KERNEL_STACK_SIZE)?;
		let ctx = CpuContext::uninit();

		let task = Arc::new(Task {
			id: TaskId::fresh(),
			name: BoundedName::new(name),
			kind,
			state: Cell::new(TaskState::Ready),
			stack,
			ctx,
			ref_count: AtomicUsize::new(1),
			link: ListLink::new(),
			known_executor: Cell::new(None),
			interrupt_disable_count: Cell::new(1),
			spinlocks_held: Cell::new(1),
			scheduler_locked: Cell::new(true),
			is_scheduler_task,
			user_memory_access_count: Cell::new(0),
			queued_for_cleanup: AtomicBool::new(false),
			cleanup_next: Cell::new(None),
		});

		if !is_scheduler_task && matches!(task.kind, Kind::Kernel) {
			crate::scheduler::cleanup::register_kernel_task(task.id);
		}

		let trampoline = trampoline_for(entry, arg, &task);
		let stack_top = task.stack.top();
		arch::prepare_task_for_scheduling(&task.ctx, stack_top, trampoline);
		Ok(task)
	}

	pub fn current() -> Arc<Task> {
		crate::executor::current_task()
	}

	pub fn state(&self) -> TaskState {
		self.state.get()
	}

	/// # Safety
	/// Caller must hold the scheduler lock or the external spinlock this
	/// task is queued on, per §5's locking discipline.
	pub unsafe fn set_state(&self, state: TaskState) {
		self.state.set(state);
	}

	pub fn is_scheduler_task(&self) -> bool {
		self.is_scheduler_task
	}

	pub fn known_executor(&self) -> Option<CoreId> {
		self.known_executor.get()
	}

	pub fn set_known_executor(&self, executor: Option<CoreId>) {
		self.known_executor.set(executor);
	}

	pub fn interrupt_disable_count(&self) -> u32 {
		self.interrupt_disable_count.get()
	}

	pub fn spinlocks_held(&self) -> u32 {
		self.spinlocks_held.get()
	}

	pub fn scheduler_locked(&self) -> bool {
		self.scheduler_locked.get()
	}

	/// §3: "`scheduler_locked` flag (the scheduler is one such lock, tracked
	/// specially to permit nesting queries)". §4.F's literal initial state
	/// (`spinlocks_held = 1, interrupt_disable_count = 1` for a freshly
	/// created task, "so a newly scheduled task starts with the scheduler
	/// lock implicitly held") and §4.G's idle-loop state (same pair while
	/// idle) both require this to move `spinlocks_held` exactly like
	/// [`Task::enter_spinlock`] — the scheduler lock disables preemption the
	/// same way a real `TicketSpinLock` does. `scheduler_locked` is the
	/// *additional* fast nesting-query flag invariant 4's "TicketSpinLocks"
	/// doesn't otherwise give us a cheap way to ask for.
	pub(crate) fn enter_scheduler_lock(&self) {
		debug_assert!(!self.scheduler_locked.get(), "scheduler lock acquired twice by its holder");
		self.scheduler_locked.set(true);
		self.enter_spinlock();
	}

	pub(crate) fn exit_scheduler_lock(&self) {
		debug_assert!(self.scheduler_locked.get(), "scheduler lock released without being held");
		self.scheduler_locked.set(false);
		self.exit_spinlock();
	}

	pub fn user_memory_access_count(&self) -> u32 {
		self.user_memory_access_count.get()
	}

	pub(crate) fn context(&self) -> &CpuContext {
		&self.ctx
	}

	pub(crate) fn stack(&self) -> &Stack {
		&self.stack
	}

	/// Invariant 4: "each acquire increments `interrupt_disable_count`",
	/// transitioning interrupts off on the 0->1 edge.
	pub(crate) fn enter_spinlock(&self) {
		self.spinlocks_held.set(self.spinlocks_held.get() + 1);
		let prev = self.interrupt_disable_count.get();
		if prev == 0 {
			arch::disable_interrupts();
			self.set_known_executor(Some(crate::executor::current_core_id()));
		}
		self.interrupt_disable_count.set(prev + 1);
	}

	/// The paired decrement on release.
	pub(crate) fn exit_spinlock(&self) {
		debug_assert!(self.spinlocks_held.get() > 0, "spinlocks_held underflow");
		self.spinlocks_held.set(self.spinlocks_held.get() - 1);
		let prev = self.interrupt_disable_count.get();
		debug_assert!(prev > 0, "interrupt_disable_count underflow");
		self.interrupt_disable_count.set(prev - 1);
		if prev == 1 {
			arch::enable_interrupts();
			self.set_known_executor(None);
		}
	}

	/// Raw, counter-adjusting decrement used by interrupt entry/exit
	/// bookkeeping (§4.J), which saves/restores the whole counter rather
	/// than nesting one level at a time.
	pub(crate) fn set_interrupt_disable_count(&self, value: u32) {
		self.interrupt_disable_count.set(value);
	}

	pub(crate) fn set_spinlocks_held(&self, value: u32) {
		self.spinlocks_held.set(value);
	}

	pub(crate) fn set_user_memory_access_count(&self, value: u32) {
		self.user_memory_access_count.set(value);
	}

	pub fn increment_reference_count(self: &Arc<Self>) {
		self.ref_count.fetch_add(1, Ordering::Relaxed);
	}

	/// §4.F: "must never be called on the current task (use `drop` instead)".
	/// Decrementing to zero hands the task to the cleanup service.
	pub fn decrement_reference_count(self: &Arc<Self>, current: &Arc<Task>) {
		assert!(
			!Arc::ptr_eq(self, current),
			"decrement_reference_count called on the current task; use drop_current instead"
		);
		if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
			crate::scheduler::cleanup::queue_task_for_cleanup(Arc::clone(self));
		}
	}

	pub(crate) fn reference_count(&self) -> usize {
		self.ref_count.load(Ordering::Acquire)
	}

	/// §4.F `drop`'s self-reference release. Unlike `decrement_reference_count`
	/// this is the one caller allowed to call it on what was, a moment ago,
	/// the current task: by the time the scheduler task runs this (inside a
	/// deferred action), the task is no longer running anywhere, so nothing
	/// else can be racing this decrement.
	pub(crate) fn release_self_reference(self: &Arc<Self>) {
		if self.ref_count.fetch_sub(1, Ordering::AcqRel) == 1 {
			crate::scheduler::cleanup::queue_task_for_cleanup(Arc::clone(self));
		}
	}

	pub(crate) fn mark_queued_for_cleanup(&self) {
		let was_queued = self.queued_for_cleanup.swap(true, Ordering::AcqRel);
		assert!(!was_queued, "task queued for cleanup twice");
	}

	/// Called by the cleanup service when a drained task turns out to have
	/// picked up a new reference before it could be reaped, so a later
	/// `decrement_reference_count` reaching zero again is allowed to queue
	/// it once more.
	pub(crate) fn clear_queued_for_cleanup(&self) {
		self.queued_for_cleanup.store(false, Ordering::Release);
	}

	/// # Safety
	/// Caller must be the sole owner of this node (just popped it off, or
	/// is about to push it and owns the only live pointer to it).
	pub(crate) unsafe fn set_cleanup_next(&self, next: Option<*const Task>) {
		self.cleanup_next.set(next);
	}

	pub(crate) fn cleanup_next(&self) -> Option<*const Task> {
		self.cleanup_next.get()
	}
}

impl fmt::Debug for Task {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task")
			.field("id", &self.id)
			.field("name", &self.name.as_str())
			.field("state", &self.state.get())
			.finish_non_exhaustive()
	}
}

/// Heap-boxed `(entry, arg, task)` triple threaded through the raw
/// `extern "C"` trampoline the architecture layer jumps to on first switch.
struct TrampolineArgs {
	entry: EntryFn,
	arg: usize,
	task: Arc<Task>,
}

fn trampoline_for(entry: EntryFn, arg: usize, task: &Arc<Task>) -> usize {
	let boxed = Box::new(TrampolineArgs {
		entry,
		arg,
		task: Arc::clone(task),
	});
	Box::into_raw(boxed) as usize
}

/// §4.F: "releases the scheduler lock then calls the user-supplied entry;
/// on entry-return the trampoline fetches the scheduler and calls `drop`."
///
/// In this crate the trampoline address handed to the architecture layer
/// is itself the boxed [`TrampolineArgs`] pointer (architectures that need
/// a bare function pointer instead should wrap this association in their
/// own lookup; the `test` and `x86_64` backends here both call back into
/// `task::run_trampoline` directly).
pub(crate) extern "C" fn run_trampoline(args_ptr: usize) {
	let args = unsafe { Box::from_raw(args_ptr as *mut TrampolineArgs) };
	let TrampolineArgs { entry, arg, task } = *args;

	crate::scheduler::current().unlock();
	entry(arg);

	crate::scheduler::current().drop_current(task);
}

extern "C" fn scheduler_task_idle_entry(_arg: usize) {
	unreachable!("the scheduler task is entered via switch_task_no_save, never run_trampoline");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bounded_name_truncates() {
		let long = "a".repeat(DEFAULT_TASK_NAME_CAPACITY * 2);
		let name = BoundedName::new(&long);
		assert_eq!(name.as_str().len(), DEFAULT_TASK_NAME_CAPACITY);
	}

	#[test]
	fn spinlock_counters_round_trip() {
		crate::arch::register_executor();
		let task = Task::create_kernel("t", noop_entry, 0).unwrap();
		let held_before = task.spinlocks_held();
		let idc_before = task.interrupt_disable_count();
		task.enter_spinlock();
		task.exit_spinlock();
		assert_eq!(task.spinlocks_held(), held_before);
		assert_eq!(task.interrupt_disable_count(), idc_before);
	}

	extern "C" fn noop_entry(_arg: usize) {}
}
