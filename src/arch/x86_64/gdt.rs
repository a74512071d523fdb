//! Per-executor GDT + TSS, built against the `x86_64` crate's typed
//! descriptor builder.

use alloc::boxed::Box;

use x86_64::VirtAddr;
use x86_64::instructions::segmentation::{CS, DS, SS, Segment};
use x86_64::instructions::tables::load_tss;
use x86_64::structures::gdt::{Descriptor, GlobalDescriptorTable};
use x86_64::structures::tss::TaskStateSegment;

use crate::config::KERNEL_STACK_SIZE;

/// Dedicated IST slot for every interrupt/exception entry, so a fault on a
/// task's own (possibly corrupted) kernel stack still has somewhere safe to
/// land. Critical exceptions (NMI/#DF/#MC) additionally use IST2-4.
pub const IST_INTERRUPT: u16 = 0;

/// Installs a fresh GDT + TSS for the calling executor and loads it.
/// Returns the leaked `'static` TSS so callers can later patch `rsp[0]`
/// when a task's kernel stack changes (`set_current_kernel_stack`).
pub fn add_current_core(boot_stack_top: VirtAddr) -> &'static mut TaskStateSegment {
	let tss: &'static mut TaskStateSegment = Box::leak(Box::new(TaskStateSegment::new()));
	tss.privilege_stack_table[0] = boot_stack_top;
	for ist in tss.interrupt_stack_table.iter_mut() {
		let stack = crate::task::stack::Stack::new(KERNEL_STACK_SIZE)
			.expect("failed to allocate an IST stack");
		*ist = VirtAddr::from_ptr(stack.top() as *const u8);
		core::mem::forget(stack);
	}

	let gdt: &'static mut GlobalDescriptorTable = Box::leak(Box::new(GlobalDescriptorTable::new()));
	let code_sel = gdt.append(Descriptor::kernel_code_segment());
	let data_sel = gdt.append(Descriptor::kernel_data_segment());
	let tss_sel = gdt.append(Descriptor::tss_segment(tss));
	gdt.load();

	unsafe {
		CS::set_reg(code_sel);
		DS::set_reg(data_sel);
		SS::set_reg(data_sel);
		load_tss(tss_sel);
	}

	tss
}

pub fn set_current_kernel_stack(tss: &mut TaskStateSegment, stack_top: VirtAddr) {
	tss.privilege_stack_table[0] = stack_top;
}
