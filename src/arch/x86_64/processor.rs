//! CPU feature/topology queries and the two hardware hooks `before_switch_task`
//! needs (enabling/disabling user-memory access via the SMAP `AC` flag).
//! Trimmed to what the core uses: reference-counter calibration (`rdtsc`),
//! possible-CPU-count discovery (`raw-cpuid`, standing in for the
//! out-of-scope ACPI MADT parser), and SMAP toggling.

use core::arch::x86_64::_rdtsc;

use raw_cpuid::CpuId;

/// A monotonic counter usable as a reference-counter time source during
/// early boot, before any calibrated clock exists.
pub fn read_tsc() -> u64 {
	unsafe { _rdtsc() }
}

/// Number of executors to bring up, discovered through CPUID topology
/// leaves. Stands in for the out-of-scope ACPI MADT parser: executor
/// enumeration is otherwise something the boot/SMP layer supplies, and this
/// is the smallest concrete source of that count on bare x86_64.
pub fn possible_cpu_count() -> u32 {
	CpuId::new()
		.get_extended_topology_info()
		.and_then(|mut levels| levels.next())
		.map(|lvl| u32::from(lvl.processors()))
		.filter(|&n| n > 0)
		.unwrap_or(1)
}

/// Sets `CR4.SMAP`-gated access: the `stac`/`clac` instructions flip `RFLAGS.AC`,
/// permitting or forbidding kernel access to user-mapped pages. A no-op on
/// CPUs without SMAP (checked once at boot and cached).
pub fn enable_user_memory_access() {
	if smap_supported() {
		unsafe { core::arch::asm!("stac", options(nomem, nostack, preserves_flags)) };
	}
}

pub fn disable_user_memory_access() {
	if smap_supported() {
		unsafe { core::arch::asm!("clac", options(nomem, nostack, preserves_flags)) };
	}
}

fn smap_supported() -> bool {
	static SMAP: hermit_sync::OnceCell<bool> = hermit_sync::OnceCell::new();
	*SMAP.get_or_init(|| {
		CpuId::new()
			.get_extended_feature_info()
			.is_some_and(|f| f.has_smap())
	})
}
