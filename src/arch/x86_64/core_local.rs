//! Per-executor state reached through a register-resident pointer, using the
//! `GsBase` model-specific register. This is the concrete "current
//! executor()" primitive: a reference whose lifetime is logically tied to
//! `interrupt_disable_count > 0`, backed by the `gs`-relative pointer rather
//! than a lookup table.

use core::cell::Cell;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use x86_64::VirtAddr;
use x86_64::registers::model_specific::GsBase;

use crate::executor::CoreId;
use crate::scheduler::PerCoreScheduler;

static NEXT_CORE_ID: AtomicU32 = AtomicU32::new(0);

pub(crate) struct CoreLocal {
	this: Cell<*const Self>,
	core_id: CoreId,
	scheduler: Cell<*mut PerCoreScheduler>,
}

impl CoreLocal {
	/// Installs this executor's `CoreLocal` block and points `gs` at it.
	/// Called once per executor during bring-up.
	pub fn install() {
		debug_assert_eq!(VirtAddr::zero(), GsBase::read(), "CoreLocal installed twice");

		let core_id = CoreId(NEXT_CORE_ID.fetch_add(1, Ordering::Relaxed));
		let this = alloc::boxed::Box::leak(alloc::boxed::Box::new(Self {
			this: Cell::new(ptr::null()),
			core_id,
			scheduler: Cell::new(ptr::null_mut()),
		}));
		this.this.set(ptr::from_ref(this));
		GsBase::write(VirtAddr::from_ptr(this));
	}

	#[inline]
	pub fn get() -> &'static Self {
		debug_assert_ne!(VirtAddr::zero(), GsBase::read(), "CoreLocal not installed");
		unsafe {
			let raw: *const Self;
			core::arch::asm!(
				"mov {}, gs:{}", out(reg) raw,
				const core::mem::offset_of!(Self, this),
				options(nomem, nostack, preserves_flags)
			);
			&*raw
		}
	}
}

pub fn core_id() -> u32 {
	if GsBase::read() == VirtAddr::zero() {
		0
	} else {
		CoreLocal::get().core_id.0
	}
}

pub(crate) fn core_scheduler() -> &'static mut PerCoreScheduler {
	unsafe { CoreLocal::get().scheduler.get().as_mut().expect("no scheduler installed for this core") }
}

pub(crate) fn set_core_scheduler(scheduler: *mut PerCoreScheduler) {
	CoreLocal::get().scheduler.set(scheduler);
}
