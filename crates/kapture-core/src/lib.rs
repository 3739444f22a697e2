//! # kapture-core
//!
//! Platform-free heart of Kapture: the pieces that turn two independent
//! input streams into one device-attributed event and decide its fate.
//!
//! This crate has zero dependencies on OS APIs.  The capture service
//! (`kapture-service`) owns the platform channels and pump threads and
//! drives everything defined here.
//!
//! # Architecture overview (for beginners)
//!
//! Kapture intercepts keyboard and mouse input system-wide.  The operating
//! system offers two mechanisms, and neither is enough on its own:
//!
//! - The **hook channel** can block an event, but only says *that* a key was
//!   pressed, not *which keyboard* pressed it.
//! - The **raw channel** says exactly which physical device produced an
//!   event, but cannot block anything.
//!
//! Kapture joins the two.  Raw events are parked in an [`EventQueue`]; when
//! the hook fires, the matching raw event is pulled out, its device is looked
//! up in the [`DeviceRegistry`], and the [`Dispatcher`] runs the device's
//! [`HandlerChain`] to reach a [`Decision`].
//!
//! - **`domain`** – devices, events, decisions, handler traits and device
//!   name patterns.
//! - **`dispatch`** – the queue, registry, chains and dispatcher.

pub mod dispatch;
pub mod domain;

pub use dispatch::chain::HandlerChain;
pub use dispatch::dispatcher::{Dispatcher, RegistrationError};
pub use dispatch::queue::{EventQueue, HandoffQueue, QueueSettings};
pub use dispatch::registry::{DeviceDelta, DeviceRegistry, DeviceSource, EnumerationError};
pub use domain::device::{DeviceClass, DeviceHandle, DeviceIdentity, RawDeviceDescriptor};
pub use domain::event::{
    CapturedEvent, Decision, KeyboardEvent, MouseButtonEvent, MouseEvent, MouseEventKind,
    MouseMoveEvent, MouseWheelEvent,
};
pub use domain::handler::{HandlerKind, KeyboardHandler, MouseHandler};
pub use domain::pattern::{DevicePattern, PatternError};
