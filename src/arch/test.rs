//! Host test backend. One OS thread models one hardware executor; "halting"
//! and the blocking half of `call_on_stack` are realised with
//! `std::thread::park`/`unpark` rather than assembly, so the synchronisation
//! and scheduling logic (components A-J) runs under ordinary `#[test]`s
//! without a bootable image. Privileged instructions (GDT/IDT/APIC,
//! `cli`/`sti`) have no meaning here and are modelled as plain counters.

extern crate std;

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::thread::Thread;

use super::Transition;

std::thread_local! {
	static INTERRUPTS_ENABLED: Cell<bool> = const { Cell::new(true) };
	static CORE_ID: Cell<u32> = const { Cell::new(0) };
	static PARK_HANDLE: Cell<Option<Thread>> = const { Cell::new(None) };
	static SCHEDULER: Cell<*mut crate::scheduler::PerCoreScheduler> = const { Cell::new(core::ptr::null_mut()) };
}

static NEXT_CORE_ID: AtomicU32 = AtomicU32::new(0);
static HALT_BROADCAST: AtomicBool = AtomicBool::new(false);
static MESSAGE_LOG: hermit_sync::SpinMutex<Vec<u8>> = hermit_sync::SpinMutex::new(Vec::new());

/// Assigns the calling OS thread the next executor id and installs a
/// minimal scheduler for it, so any test that calls this can immediately use
/// `Task::current()` and the scheduler lock/ready-queue API without running
/// a dedicated idle loop in the background. Call once per thread that
/// stands in for an executor in a test.
pub fn register_executor() -> u32 {
	let id = NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed);
	CORE_ID.with(|c| c.set(id));
	PARK_HANDLE.with(|p| p.set(Some(std::thread::current())));
	crate::scheduler::testing::install_for_current_thread(id);
	id
}

pub fn core_id() -> u32 {
	CORE_ID.with(|c| c.get())
}

pub fn processor_count() -> u32 {
	NEXT_CORE_ID.load(Ordering::Relaxed).max(1)
}

pub fn disable_interrupts() -> bool {
	INTERRUPTS_ENABLED.with(|e| e.replace(false))
}

pub fn enable_interrupts() {
	INTERRUPTS_ENABLED.with(|e| e.set(true));
}

pub fn interrupts_enabled() -> bool {
	INTERRUPTS_ENABLED.with(|e| e.get())
}

/// Parks the calling OS thread, modelling `halt`: the executor goes idle
/// until an interrupt-equivalent (an `unpark`) arrives.
pub fn halt() {
	std::thread::park_timeout(std::time::Duration::from_millis(50));
}

pub fn spin_loop_hint() {
	core::hint::spin_loop();
}

pub fn output_message_buf(bytes: &[u8]) {
	MESSAGE_LOG.lock().extend_from_slice(bytes);
	std::eprint!("{}", core::str::from_utf8(bytes).unwrap_or("<non-utf8>"));
}

/// Test-only accessor so log-output assertions can inspect what was written.
#[cfg(test)]
pub fn drain_message_log() -> Vec<u8> {
	core::mem::take(&mut MESSAGE_LOG.lock())
}

/// No interrupt controller exists on the test backend; the periodic-tick
/// test fake (see `crate::time`) calls this only to keep call sites uniform
/// with the `x86_64` backend.
pub fn acknowledge_periodic_tick() {}

/// SMAP has no meaning on the test backend; tracked as a plain flag so
/// `scheduler::interrupt`'s reconciliation logic has something to assert
/// against in tests.
static USER_MEMORY_ACCESS_ENABLED: AtomicBool = AtomicBool::new(false);

pub fn set_user_memory_access(enabled: bool) {
	USER_MEMORY_ACCESS_ENABLED.store(enabled, Ordering::Relaxed);
}

#[cfg(test)]
pub fn user_memory_access_enabled() -> bool {
	USER_MEMORY_ACCESS_ENABLED.load(Ordering::Relaxed)
}

pub fn broadcast_halt() {
	HALT_BROADCAST.store(true, Ordering::Release);
}

pub fn halt_was_broadcast() -> bool {
	HALT_BROADCAST.load(Ordering::Acquire)
}

/// Opaque per-task context: in the test backend this is just the `Thread`
/// handle used to unpark the OS thread standing in for the task, wrapped so
/// `switch_task`/`switch_task_no_save` have something to act on.
pub struct CpuContext {
	thread: hermit_sync::SpinMutex<Option<Thread>>,
}

impl CpuContext {
	pub const fn uninit() -> Self {
		Self {
			thread: hermit_sync::SpinMutex::new(None),
		}
	}
}

/// No-op on the test backend: a freshly created task's "first switch into
/// it" is realised by spawning an OS thread that runs
/// `task::run_trampoline` directly (see `crate::scheduler::tests`), not by
/// priming a saved register context.
pub fn prepare_task_for_scheduling(_ctx: &CpuContext, _stack_top: *mut u8, _entry_trampoline: usize) {}

/// Blocks the calling OS thread (the outgoing task) until some other
/// executor thread unparks it again.
pub fn switch_task(_old: &CpuContext, new: &CpuContext) {
	if let Some(t) = new.thread.lock().clone() {
		t.unpark();
	}
	std::thread::park();
}

pub fn switch_task_no_save(new: &CpuContext) {
	if let Some(t) = new.thread.lock().clone() {
		t.unpark();
	}
}

/// Runs `f(arg)` "on an alternate stack": in the test backend there is no
/// alternate stack, so `f` simply runs on the calling OS thread (standing in
/// for the scheduler task) before the caller parks, mirroring the `x86_64`
/// backend's "save `old`, never return to this call site" contract closely
/// enough that `scheduler::switch` doesn't need to know which backend it's
/// linked against.
pub fn call_on_stack(_old: &CpuContext, _stack_top: *mut u8, f: extern "C" fn(usize), arg: usize) {
	f(arg);
	std::thread::park();
}

pub fn before_switch_task(_transition: Transition) {}

/// Binds the calling OS thread to `ctx`, so a later `switch_task`/
/// `switch_task_no_save` that targets it unparks this thread instead of one
/// that was only ever primed via `prepare_task_for_scheduling`. Used by
/// `scheduler::testing` to make the thread that calls `register_executor`
/// itself resumable, the same way a freshly primed task is.
pub fn bind_context_to_current_thread(ctx: &CpuContext) {
	*ctx.thread.lock() = Some(std::thread::current());
}

/// No register-resident executor state exists on the test backend — each OS
/// thread already carries its own `thread_local!`s — so every SMP-bring-up
/// hook below is a no-op kept only so `smp` can call `crate::arch::*`
/// uniformly across backends.
pub fn init_core_local() {}

pub fn install_gdt_and_tss(_boot_stack_top: *mut u8) {}

pub fn install_interrupt_table() {}

pub fn load_interrupt_table() {}

pub fn init_local_interrupt_controller() {}

pub fn stage4_hardware_init() {}

pub fn install_core_local_scheduler(scheduler: Arc<crate::scheduler::PerCoreScheduler>) {
	let ptr = Arc::into_raw(scheduler) as *mut crate::scheduler::PerCoreScheduler;
	SCHEDULER.with(|s| s.set(ptr));
}

pub fn core_scheduler() -> &'static mut crate::scheduler::PerCoreScheduler {
	let ptr = SCHEDULER.with(Cell::get);
	unsafe { ptr.as_mut().expect("no scheduler installed for this thread") }
}
