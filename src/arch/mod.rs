//! The architecture surface the scheduling core consumes. The core never
//! matches on `target_arch` directly — it only calls the free functions
//! re-exported here: disable/enable/query interrupts, halt, fetch the
//! executor that owns the current hardware context, install a task context,
//! switch with or without saving, call a function on an alternate stack, and
//! the `before_switch_task` page-table/user-memory hook.
//!
//! Two backends exist, picked by `cfg`, with `cfg(test)` standing in for one
//! more architecture alongside the real ones:
//! - `x86_64`: real GDT/IDT/APIC bring-up and naked-function switches.
//! - `test`: a single-executor simulation (real OS threads standing in for
//!   hardware executors) so the synchronisation and scheduling logic runs as
//!   ordinary `#[test]`s.

#[cfg(all(target_arch = "x86_64", not(test)))]
pub mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test)))]
pub use self::x86_64::*;

#[cfg(test)]
pub mod test;
#[cfg(test)]
pub use self::test::*;

/// Outcome of `before_switch_task`'s page-table/user-memory bookkeeping,
/// kept as a unit struct rather than `()` so future transition kinds can
/// grow it without changing every call site's return type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
	Kernel,
	User,
}

/// The `(kernel|user) -> (kernel|user)` transition kind the switching engine
/// dispatches on.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
	pub old_kind: TaskKind,
	pub new_kind: TaskKind,
	/// `true` when old and new user tasks belong to different processes
	/// (or either side is a kernel task) — gates the page-table reload for
	/// a user-to-user switch.
	pub process_changed: bool,
	pub old_user_access_count: u32,
	pub new_user_access_count: u32,
}
