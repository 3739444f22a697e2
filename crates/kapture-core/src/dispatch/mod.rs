//! The event-correlation and decision-dispatch engine.
//!
//! # Sub-modules
//!
//! - **`queue`** – bounded-wait FIFO hand-off between the raw pump thread
//!   (producer) and the hook pump thread (consumer).
//! - **`registry`** – the live set of attached keyboards and mice.
//! - **`chain`** – the ordered list of handlers bound to one device.
//! - **`dispatcher`** – ties registry, chains and pattern registrations
//!   together and runs a chain for a correlated event.
//!
//! # Lock order
//!
//! Three synchronisation domains exist: the pattern table, the device table
//! (inside [`DeviceRegistry`](registry::DeviceRegistry)) and the chain table.
//! When more than one is held they are always taken in that order:
//! patterns → devices → chains.  Dispatch only ever takes devices and chains,
//! one after the other, never nested.

pub mod chain;
pub mod dispatcher;
pub mod queue;
pub mod registry;
