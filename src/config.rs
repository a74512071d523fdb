//! Compile-time knobs. Kept as `pub const`s rather than a runtime config file:
//! there is no filesystem at this layer to load one from.

/// Size of a freshly allocated kernel stack, in bytes.
pub const KERNEL_STACK_SIZE: usize = 0x8000;

/// Bounded capacity of a task's diagnostic name, in bytes. Longer names are
/// truncated at construction; naming is diagnostic only and never fails.
pub const DEFAULT_TASK_NAME_CAPACITY: usize = 32;

/// Period between periodic-tick interrupts, once the timer source is armed.
pub const PERIODIC_TICK_PERIOD_US: u64 = 10_000;
