//! Naked-function context switches, built on `core::arch::naked_asm!` and
//! Intel syntax. Three primitives back the architecture surface's
//! `switch_task`, `switch_task_no_save`, and `call_on_stack`: every one of
//! them is a callee-saved-register save/restore around a bare stack-pointer
//! swap, never touching caller-saved registers (the calling convention
//! already guarantees the caller didn't need those preserved across a call).

use core::arch::naked_asm;
use core::cell::UnsafeCell;

/// Per-task saved stack pointer. The only architectural state this crate
/// needs per task: callee-saved registers and flags live *on* the saved
/// stack, not in this struct.
pub struct CpuContext {
	rsp: UnsafeCell<*mut u8>,
}

unsafe impl Send for CpuContext {}
unsafe impl Sync for CpuContext {}

impl CpuContext {
	pub const fn uninit() -> Self {
		Self {
			rsp: UnsafeCell::new(core::ptr::null_mut()),
		}
	}
}

/// Primes a brand-new task's context so the first [`switch_task`]/
/// [`switch_task_no_save`] into it lands in `entry_trampoline` with the
/// stack it will keep using from then on.
pub fn prepare(ctx: &CpuContext, entry_trampoline: usize) {
	// The prepared stack looks exactly like one `switch_task` produced:
	// `pop`-order registers followed by a return address, so the restore
	// half of `switch_task`/`switch_task_no_save` can't tell a freshly
	// primed stack from a previously suspended one.
	unsafe {
		let top = *ctx.rsp.get();
		let mut sp = top as *mut usize;
		sp = sp.sub(1);
		sp.write(entry_trampoline); // return address: taskEntry
		sp = sp.sub(1);
		sp.write(0); // flags placeholder: popfq
		for _ in 0..6 {
			sp = sp.sub(1);
			sp.write(0); // rbx, rbp, r12-r15 placeholders
		}
		*ctx.rsp.get() = sp as *mut u8;
	}
}

/// Records the top of a freshly allocated stack before the first
/// [`prepare`] call.
pub fn set_initial_stack(ctx: &CpuContext, stack_top: *mut u8) {
	unsafe { *ctx.rsp.get() = stack_top };
}

/// Saves the outgoing task's callee-saved context onto its own stack, swaps
/// `rsp` to the incoming task's saved stack, restores its context, and
/// returns into whatever called `switch_task` the last time that task was
/// switched away from — which may be a different call site entirely.
#[unsafe(naked)]
pub extern "C" fn switch_task(old: &CpuContext, new: &CpuContext) {
	naked_asm!(
		"pushfq",
		"push rbx",
		"push rbp",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"mov [rdi], rsp",  // old.rsp = rsp   (rdi = &old, first field)
		"mov rsp, [rsi]",  // rsp = new.rsp
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop rbp",
		"pop rbx",
		"popfq",
		"ret",
	);
}

/// Like [`switch_task`] but does not save the caller's context: used from
/// the scheduler task, whose stack is disposable between idle invocations.
#[unsafe(naked)]
pub extern "C" fn switch_task_no_save(new: &CpuContext) {
	naked_asm!(
		"mov rsp, [rdi]",
		"pop r15",
		"pop r14",
		"pop r13",
		"pop r12",
		"pop rbp",
		"pop rbx",
		"popfq",
		"ret",
	);
}

/// Saves the caller's context into `old` exactly like [`switch_task`], then
/// switches to `stack_top` and calls `f(arg)` there instead of restoring a
/// previously saved context. Lets the scheduler task run a deferred action
/// on its own stack; whichever task eventually `switch_task`s back into
/// `old` resumes right after this call as an ordinary function return.
#[unsafe(naked)]
pub extern "C" fn call_on_stack(
	old: &CpuContext,
	stack_top: *mut u8,
	f: extern "C" fn(usize),
	arg: usize,
) {
	naked_asm!(
		"pushfq",
		"push rbx",
		"push rbp",
		"push r12",
		"push r13",
		"push r14",
		"push r15",
		"mov [rdi], rsp", // old.rsp = rsp
		"mov rsp, rsi",   // rsp = stack_top
		"mov rdi, rcx",   // arg -> first param of f
		"call rdx",       // call f(arg); never returns here
		"ud2",
	);
}
