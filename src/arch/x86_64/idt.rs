//! Interrupt Descriptor Table installation. Vector numbers are otherwise
//! unconstrained; 32 is picked for the first IRQ to match the legacy PIC
//! remap convention.

use hermit_sync::InterruptTicketMutex;
use x86_64::structures::idt::InterruptDescriptorTable;

pub const FIRST_IRQ_VECTOR: u8 = 32;
pub const PERIODIC_TICK_VECTOR: u8 = FIRST_IRQ_VECTOR;
pub const HALT_IPI_VECTOR: u8 = FIRST_IRQ_VECTOR + 1;

static IDT: InterruptTicketMutex<InterruptDescriptorTable> =
	InterruptTicketMutex::new(InterruptDescriptorTable::new());

/// Fills in exception handlers and the vectors the core owns (periodic
/// tick, halt IPI). Called once by the bootstrap executor early in bring-up;
/// every executor then calls [`load_current_core`] for itself.
pub fn install() {
	let mut idt = IDT.lock();
	idt.page_fault.set_handler_fn(page_fault_handler);
	idt.general_protection_fault.set_handler_fn(gp_handler);
	idt.double_fault.set_handler_fn(double_fault_handler);
	idt[PERIODIC_TICK_VECTOR].set_handler_fn(periodic_tick_handler);
	idt[HALT_IPI_VECTOR].set_handler_fn(halt_ipi_handler);
}

/// Points the calling executor's `idtr` at the shared table.
///
/// # Safety
/// The table must already be fully populated by [`install`]; loading a
/// half-built IDT would leave unhandled vectors pointing at garbage.
pub fn load_current_core() {
	unsafe {
		IDT.lock().load_unsafe();
	}
}

extern "x86-interrupt" fn page_fault_handler(
	frame: x86_64::structures::idt::InterruptStackFrame,
	code: x86_64::structures::idt::PageFaultErrorCode,
) {
	log::error!("page fault: {code:?} at {frame:#?}");
	panic!("page fault");
}

extern "x86-interrupt" fn gp_handler(
	frame: x86_64::structures::idt::InterruptStackFrame,
	code: u64,
) {
	log::error!("general protection fault (code={code:#x}) at {frame:#?}");
	panic!("general protection fault");
}

extern "x86-interrupt" fn double_fault_handler(
	frame: x86_64::structures::idt::InterruptStackFrame,
	code: u64,
) -> ! {
	log::error!("double fault (code={code:#x}) at {frame:#?}");
	crate::scheduler::interrupt::fatal_halt();
}

extern "x86-interrupt" fn periodic_tick_handler(
	_frame: x86_64::structures::idt::InterruptStackFrame,
) {
	crate::scheduler::interrupt::handle_periodic_tick();
}

extern "x86-interrupt" fn halt_ipi_handler(_frame: x86_64::structures::idt::InterruptStackFrame) {
	crate::scheduler::interrupt::fatal_halt();
}
