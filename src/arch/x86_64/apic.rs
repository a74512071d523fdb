//! Minimal local-APIC driver: end-of-interrupt, a one-shot/periodic timer,
//! and the halt broadcast IPI. Trimmed to what the scheduling core needs (no
//! I/O-APIC redirection table, no ACPI-derived topology — those belong to
//! the out-of-scope driver layer).

use x86_64::registers::model_specific::Msr;

const IA32_APIC_BASE: u32 = 0x1B;
const APIC_EOI_OFFSET: usize = 0xB0;
const APIC_SPURIOUS_OFFSET: usize = 0xF0;
const APIC_LVT_TIMER_OFFSET: usize = 0x320;
const APIC_TIMER_INITIAL_COUNT_OFFSET: usize = 0x380;
const APIC_TIMER_CURRENT_COUNT_OFFSET: usize = 0x390;
const APIC_TIMER_DIVIDE_OFFSET: usize = 0x3E0;
const APIC_ICR_LOW_OFFSET: usize = 0x300;

const APIC_SOFTWARE_ENABLE: u32 = 1 << 8;
const APIC_TIMER_PERIODIC: u32 = 1 << 17;
const APIC_TIMER_MASKED: u32 = 1 << 16;
const ICR_DELIVER_ALL_EXCLUDING_SELF: u32 = 0b11 << 18;

fn apic_base() -> *mut u32 {
	let base = unsafe { Msr::new(IA32_APIC_BASE).read() } & !0xFFF;
	base as *mut u32
}

unsafe fn read_reg(offset: usize) -> u32 {
	unsafe { core::ptr::read_volatile(apic_base().byte_add(offset)) }
}

unsafe fn write_reg(offset: usize, value: u32) {
	unsafe { core::ptr::write_volatile(apic_base().byte_add(offset), value) };
}

/// Enables the local APIC in software and unmasks the spurious-interrupt
/// vector, so the timer LVT entry configured in [`arm_periodic_tick`] can
/// actually fire.
pub fn init_current_core() {
	unsafe {
		let spurious = read_reg(APIC_SPURIOUS_OFFSET);
		write_reg(
			APIC_SPURIOUS_OFFSET,
			spurious | APIC_SOFTWARE_ENABLE | 0xFF,
		);
	}
}

/// Arms the per-executor periodic tick at the given vector, called once per
/// executor during bring-up once local-interrupt-controller state is in place.
pub fn arm_periodic_tick(vector: u8, initial_count: u32) {
	unsafe {
		write_reg(APIC_TIMER_DIVIDE_OFFSET, 0b1011); // divide by 1
		write_reg(
			APIC_LVT_TIMER_OFFSET,
			u32::from(vector) | APIC_TIMER_PERIODIC,
		);
		write_reg(APIC_TIMER_INITIAL_COUNT_OFFSET, initial_count);
	}
}

pub fn mask_periodic_tick() {
	unsafe {
		write_reg(APIC_LVT_TIMER_OFFSET, APIC_TIMER_MASKED);
	}
}

/// Periodic-timer calibration: counts down from `u32::MAX` while `reference`
/// busy-waits `window_micros`, then returns the number of ticks actually
/// consumed (a one-shot countdown bracketed by a known-good delay, with a
/// current-count register read afterward).
pub fn calibrate_against(reference: &dyn crate::time::ReferenceCounter, window_micros: u64) -> u32 {
	unsafe {
		write_reg(APIC_TIMER_DIVIDE_OFFSET, 0b1011);
		write_reg(APIC_LVT_TIMER_OFFSET, APIC_TIMER_MASKED);
		write_reg(APIC_TIMER_INITIAL_COUNT_OFFSET, u32::MAX);
	}
	reference.busy_wait_micros(window_micros);
	let remaining = unsafe { read_reg(APIC_TIMER_CURRENT_COUNT_OFFSET) };
	u32::MAX - remaining
}

/// Acknowledges the current interrupt to the local APIC.
pub fn eoi() {
	unsafe {
		write_reg(APIC_EOI_OFFSET, 0);
	}
}

/// Broadcasts the halt IPI to every other executor; the fatal-panic path's
/// way of bringing every executor down once one of them has panicked.
pub fn send_halt_ipi_to_others() {
	unsafe {
		write_reg(
			APIC_ICR_LOW_OFFSET,
			u32::from(super::idt::HALT_IPI_VECTOR) | ICR_DELIVER_ALL_EXCLUDING_SELF,
		);
	}
}
