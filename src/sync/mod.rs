//! The blocking primitives every other kernel subsystem composes upon
//! (§1, §4.A-E): [`spinlock::TicketSpinLock`], [`wait_queue::WaitQueue`],
//! [`parker::Parker`], [`mutex::Mutex`], [`rwlock::RwLock`].

pub mod mutex;
pub mod parker;
pub mod rwlock;
pub mod spinlock;
pub mod wait_queue;

pub use mutex::Mutex;
pub use parker::Parker;
pub use rwlock::RwLock;
pub use spinlock::TicketSpinLock;
pub use wait_queue::WaitQueue;
