//! Domain entities for Kapture.
//!
//! Pure data and behaviour with no infrastructure dependencies: input
//! devices, captured events, the verdict handlers reach, the handler
//! capability traits implemented by applications, and the device-name
//! patterns used to bind handlers to devices.
//!
//! Nothing in here locks, blocks, or talks to the operating system.  That
//! makes every type in this module trivially unit-testable.

pub mod device;
pub mod event;
pub mod handler;
pub mod pattern;
