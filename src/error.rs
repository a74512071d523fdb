//! Typed errors for the construction APIs (task/stack/process allocation,
//! boot-time source selection). Internal-contract violations are not
//! represented here: they panic immediately, per the crate's error model.

use thiserror::Error;

/// Failures a construction API can return. Blocking primitives (locks, wait
/// queues, the parker) never fail and have no `Result` in their API.
#[derive(Debug, Error)]
pub enum KernelError {
	#[error("allocation failure: {0}")]
	Allocation(#[from] AllocationError),
	#[error("boot-time failure: {0}")]
	Boot(#[from] BootError),
}

/// Task/stack/process slab allocation, or ready-queue growth, failed.
#[derive(Debug, Error)]
pub enum AllocationError {
	#[error("kernel stack allocation failed ({size} bytes)")]
	Stack { size: usize },
	#[error("task slab exhausted")]
	Task,
	#[error("process slab exhausted")]
	Process,
}

/// Raised before the scheduler is running; always fatal.
#[derive(Debug, Error)]
pub enum BootError {
	#[error("no memory map supplied by the boot loader")]
	NoMemoryMap,
	#[error("no SMP topology information available")]
	NoSmpInfo,
	#[error("no usable reference time source was found")]
	NoReferenceCounter,
}

pub type Result<T> = core::result::Result<T, KernelError>;
