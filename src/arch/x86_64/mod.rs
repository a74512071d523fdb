//! x86_64 architecture backend: the concrete implementation of the surface
//! described in `arch::mod`, built on the `x86_64` crate's typed register
//! and descriptor APIs.

pub mod apic;
pub mod core_local;
pub mod gdt;
pub mod idt;
pub mod pit;
pub mod processor;
pub mod serial;
pub mod switch;
pub mod systemtime;

use core::sync::atomic::{AtomicBool, Ordering};

use alloc::sync::Arc;

pub use self::core_local::core_id;
pub use self::switch::{CpuContext, call_on_stack, switch_task, switch_task_no_save};

use crate::arch::Transition;
use crate::scheduler::PerCoreScheduler;

static HALT_BROADCAST: AtomicBool = AtomicBool::new(false);

pub fn disable_interrupts() -> bool {
	let was_enabled = x86_64::instructions::interrupts::are_enabled();
	x86_64::instructions::interrupts::disable();
	was_enabled
}

pub fn enable_interrupts() {
	x86_64::instructions::interrupts::enable();
}

pub fn interrupts_enabled() -> bool {
	x86_64::instructions::interrupts::are_enabled()
}

pub fn halt() {
	x86_64::instructions::interrupts::enable_and_hlt();
}

pub fn spin_loop_hint() {
	core::hint::spin_loop();
}

pub fn processor_count() -> u32 {
	processor::possible_cpu_count()
}

pub fn output_message_buf(bytes: &[u8]) {
	serial::write_bytes(bytes);
}

pub fn prepare_task_for_scheduling(ctx: &CpuContext, stack_top: *mut u8, entry_trampoline: usize) {
	switch::set_initial_stack(ctx, stack_top);
	switch::prepare(ctx, entry_trampoline);
}

/// Acknowledges the local interrupt controller; called by
/// `scheduler::interrupt::handle_periodic_tick` before `maybe_preempt`.
pub fn acknowledge_periodic_tick() {
	apic::eoi();
}

/// Reconciles hardware user-memory-access to a restored count, as a direct
/// toggle so `scheduler::interrupt` doesn't need architecture-specific
/// knowledge of SMAP.
pub fn set_user_memory_access(enabled: bool) {
	if enabled {
		processor::enable_user_memory_access();
	} else {
		processor::disable_user_memory_access();
	}
}

pub fn before_switch_task(transition: Transition) {
	use crate::arch::TaskKind;

	if transition.process_changed {
		// Memory layer is out of scope here; the real page-table load
		// happens through the (also out-of-scope) address-space handle's
		// own `load()`, invoked by the caller before this hook runs. This
		// hook only reconciles the hardware user-memory-access bit.
	}

	let enable = match (transition.old_kind, transition.new_kind) {
		(TaskKind::Kernel, TaskKind::User) => transition.new_user_access_count > 0,
		(TaskKind::User, TaskKind::Kernel) => false,
		(TaskKind::User, TaskKind::User) => transition.new_user_access_count > 0,
		(TaskKind::Kernel, TaskKind::Kernel) => false,
	};
	if enable {
		processor::enable_user_memory_access();
	} else {
		processor::disable_user_memory_access();
	}
}

pub fn install_core_local_scheduler(scheduler: Arc<PerCoreScheduler>) {
	let ptr = Arc::into_raw(scheduler) as *mut PerCoreScheduler;
	core_local::set_core_scheduler(ptr);
}

pub fn core_scheduler() -> &'static mut PerCoreScheduler {
	core_local::core_scheduler()
}

pub fn broadcast_halt() {
	HALT_BROADCAST.store(true, Ordering::Release);
	apic::send_halt_ipi_to_others();
}

pub fn halt_was_broadcast() -> bool {
	HALT_BROADCAST.load(Ordering::Acquire)
}

/// Installs this executor's per-executor `CoreLocal` block, pointed at by
/// `gs`, that backs `core_id()`/`core_scheduler()` from the moment it's
/// installed.
pub fn init_core_local() {
	core_local::CoreLocal::install();
}

/// This executor's GDT/TSS half, parked under its own hook since it needs
/// the init task's own stack top, which only the caller (`smp`) knows.
pub fn install_gdt_and_tss(boot_stack_top: *mut u8) {
	gdt::add_current_core(x86_64::VirtAddr::from_ptr(boot_stack_top));
}

/// Populates the shared interrupt descriptor table. Run once by the
/// bootstrap executor; every executor then calls [`load_interrupt_table`] to
/// point its own `idtr` at the shared table.
pub fn install_interrupt_table() {
	idt::install();
}

pub fn load_interrupt_table() {
	idt::load_current_core();
}

/// Brings up this executor's local interrupt controller.
pub fn init_local_interrupt_controller() {
	apic::init_current_core();
}

/// Binds the calling executor's currently running code to `ctx` as a task
/// context. On real hardware the first `switch_task` away from an
/// uninitialised [`CpuContext`] captures `rsp` the same way any other switch
/// does, so there is nothing to do here beyond giving the `test` backend's
/// matching hook a counterpart to call uniformly.
pub fn bind_context_to_current_thread(_ctx: &CpuContext) {}

/// Late bring-up hardware-discovery step (PCI ECAM initialisation, ACPI
/// finalisation). Both belong to the out-of-scope device/ACPI layer; this
/// crate only owns the call site they'd be wired in from.
pub fn stage4_hardware_init() {
	log::debug!("stage 4 hardware discovery left to the out-of-scope PCI/ACPI layer");
}
