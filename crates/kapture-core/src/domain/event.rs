//! Captured input events and the decision attached to each one.
//!
//! An event is created on the raw-input side, where the producing device's
//! handle is known but not yet resolved to a [`DeviceIdentity`].  Resolution
//! happens lazily during dispatch, and handlers then record their verdict on
//! the very same event object.
//!
//! # Decision lifecycle
//!
//! ```text
//! Undecided ──► handler 1 sets Permit ──► handler 2 sets Consume ──► (chain stops)
//! ```
//!
//! The last write wins.  A chain stops as soon as any handler writes
//! [`Decision::Consume`].  If nobody decided, the caller maps the leftover
//! `Undecided` to `Pass` via [`Decision::resolve`].
//!
//! # Mouse payloads
//!
//! Mouse events carry only their device and decision.  Button, wheel and
//! motion payload fields are deliberately absent until their layout is
//! agreed; correlation matches mouse events by [`MouseEventKind`] alone.

use std::sync::Arc;

use super::device::{DeviceHandle, DeviceIdentity};

/// What should happen to an intercepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Decision {
    /// No handler has expressed an opinion yet.  Never returned to the platform.
    #[default]
    Undecided,
    /// A handler explicitly allowed the event.
    Permit,
    /// A handler swallowed the event; no other application will see it.
    Consume,
    /// The event is let through because nobody claimed it.
    Pass,
}

impl Decision {
    /// Maps `Undecided` to `Pass`; every other decision is returned as-is.
    pub fn resolve(self) -> Decision {
        match self {
            Decision::Undecided => Decision::Pass,
            other => other,
        }
    }

    /// `true` only for [`Decision::Consume`].
    pub fn blocks(self) -> bool {
        self == Decision::Consume
    }
}

/// Behaviour shared by every event type that flows through a handler chain.
///
/// Lets [`HandlerChain`](crate::HandlerChain) and the queue stay generic over
/// the payload.
pub trait CapturedEvent {
    /// Handle of the device that produced the event.
    fn device_handle(&self) -> DeviceHandle;
    /// Resolved device, if dispatch has looked it up.
    fn device(&self) -> Option<&Arc<DeviceIdentity>>;
    /// Records the resolved device on the event.
    fn attach_device(&mut self, device: Arc<DeviceIdentity>);
    fn decision(&self) -> Decision;
    fn set_decision(&mut self, decision: Decision);
}

// ── Keyboard ──────────────────────────────────────────────────────────────────

/// A key transition from one specific keyboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyboardEvent {
    handle: DeviceHandle,
    device: Option<Arc<DeviceIdentity>>,
    vkey: u32,
    scan_code: u32,
    message: u32,
    key_up: bool,
    decision: Decision,
}

impl KeyboardEvent {
    /// Creates an undecided, not yet device-resolved keyboard event.
    pub fn new(handle: DeviceHandle, vkey: u32, scan_code: u32, message: u32, key_up: bool) -> Self {
        Self {
            handle,
            device: None,
            vkey,
            scan_code,
            message,
            key_up,
            decision: Decision::Undecided,
        }
    }

    /// Virtual key code (e.g. `0x20` for space).
    pub fn vkey(&self) -> u32 {
        self.vkey
    }

    pub fn scan_code(&self) -> u32 {
        self.scan_code
    }

    /// Raw platform message code (e.g. `WM_KEYDOWN`).
    pub fn message(&self) -> u32 {
        self.message
    }

    pub fn is_key_up(&self) -> bool {
        self.key_up
    }
}

impl CapturedEvent for KeyboardEvent {
    fn device_handle(&self) -> DeviceHandle {
        self.handle
    }

    fn device(&self) -> Option<&Arc<DeviceIdentity>> {
        self.device.as_ref()
    }

    fn attach_device(&mut self, device: Arc<DeviceIdentity>) {
        self.device = Some(device);
    }

    fn decision(&self) -> Decision {
        self.decision
    }

    fn set_decision(&mut self, decision: Decision) {
        self.decision = decision;
    }
}

// ── Mouse ─────────────────────────────────────────────────────────────────────

/// The three mouse event categories the hook and raw channels both report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseEventKind {
    Button,
    Wheel,
    Move,
}

macro_rules! mouse_event {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            handle: DeviceHandle,
            device: Option<Arc<DeviceIdentity>>,
            decision: Decision,
        }

        impl $name {
            pub fn new(handle: DeviceHandle) -> Self {
                Self {
                    handle,
                    device: None,
                    decision: Decision::Undecided,
                }
            }
        }

        impl CapturedEvent for $name {
            fn device_handle(&self) -> DeviceHandle {
                self.handle
            }

            fn device(&self) -> Option<&Arc<DeviceIdentity>> {
                self.device.as_ref()
            }

            fn attach_device(&mut self, device: Arc<DeviceIdentity>) {
                self.device = Some(device);
            }

            fn decision(&self) -> Decision {
                self.decision
            }

            fn set_decision(&mut self, decision: Decision) {
                self.decision = decision;
            }
        }
    };
}

mouse_event!(
    /// A mouse button transition.
    MouseButtonEvent
);
mouse_event!(
    /// A mouse wheel rotation.
    MouseWheelEvent
);
mouse_event!(
    /// Mouse motion.
    MouseMoveEvent
);

/// Any mouse event, as it travels through the mouse hand-off queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MouseEvent {
    Button(MouseButtonEvent),
    Wheel(MouseWheelEvent),
    Move(MouseMoveEvent),
}

impl MouseEvent {
    /// Creates an undecided mouse event of the given kind.
    pub fn new(kind: MouseEventKind, handle: DeviceHandle) -> Self {
        match kind {
            MouseEventKind::Button => MouseEvent::Button(MouseButtonEvent::new(handle)),
            MouseEventKind::Wheel => MouseEvent::Wheel(MouseWheelEvent::new(handle)),
            MouseEventKind::Move => MouseEvent::Move(MouseMoveEvent::new(handle)),
        }
    }

    pub fn kind(&self) -> MouseEventKind {
        match self {
            MouseEvent::Button(_) => MouseEventKind::Button,
            MouseEvent::Wheel(_) => MouseEventKind::Wheel,
            MouseEvent::Move(_) => MouseEventKind::Move,
        }
    }

    fn inner(&self) -> &dyn CapturedEvent {
        match self {
            MouseEvent::Button(e) => e,
            MouseEvent::Wheel(e) => e,
            MouseEvent::Move(e) => e,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn CapturedEvent {
        match self {
            MouseEvent::Button(e) => e,
            MouseEvent::Wheel(e) => e,
            MouseEvent::Move(e) => e,
        }
    }
}

impl CapturedEvent for MouseEvent {
    fn device_handle(&self) -> DeviceHandle {
        self.inner().device_handle()
    }

    fn device(&self) -> Option<&Arc<DeviceIdentity>> {
        self.inner().device()
    }

    fn attach_device(&mut self, device: Arc<DeviceIdentity>) {
        self.inner_mut().attach_device(device);
    }

    fn decision(&self) -> Decision {
        self.inner().decision()
    }

    fn set_decision(&mut self, decision: Decision) {
        self.inner_mut().set_decision(decision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::DeviceClass;

    #[test]
    fn test_undecided_resolves_to_pass() {
        assert_eq!(Decision::Undecided.resolve(), Decision::Pass);
    }

    #[test]
    fn test_explicit_decisions_resolve_to_themselves() {
        assert_eq!(Decision::Permit.resolve(), Decision::Permit);
        assert_eq!(Decision::Consume.resolve(), Decision::Consume);
        assert_eq!(Decision::Pass.resolve(), Decision::Pass);
    }

    #[test]
    fn test_only_consume_blocks() {
        assert!(Decision::Consume.blocks());
        assert!(!Decision::Permit.blocks());
        assert!(!Decision::Pass.blocks());
        assert!(!Decision::Undecided.blocks());
    }

    #[test]
    fn test_new_keyboard_event_is_undecided_and_unresolved() {
        // Arrange / Act
        let event = KeyboardEvent::new(DeviceHandle(1), 0x41, 0x1e, 0x100, false);

        // Assert
        assert_eq!(event.decision(), Decision::Undecided);
        assert!(event.device().is_none());
        assert_eq!(event.vkey(), 0x41);
        assert_eq!(event.scan_code(), 0x1e);
        assert_eq!(event.message(), 0x100);
        assert!(!event.is_key_up());
    }

    #[test]
    fn test_set_decision_is_last_write_wins() {
        let mut event = KeyboardEvent::new(DeviceHandle(1), 0x41, 0, 0, false);
        event.set_decision(Decision::Consume);
        event.set_decision(Decision::Permit);
        assert_eq!(event.decision(), Decision::Permit);
    }

    #[test]
    fn test_mouse_event_delegates_to_inner_event() {
        // Arrange
        let mut event = MouseEvent::new(MouseEventKind::Wheel, DeviceHandle(7));
        let device = Arc::new(DeviceIdentity::new(DeviceHandle(7), DeviceClass::Mouse, "m"));

        // Act
        event.attach_device(Arc::clone(&device));
        event.set_decision(Decision::Consume);

        // Assert
        assert_eq!(event.kind(), MouseEventKind::Wheel);
        assert_eq!(event.device_handle(), DeviceHandle(7));
        assert_eq!(event.device(), Some(&device));
        match event {
            MouseEvent::Wheel(inner) => assert_eq!(inner.decision(), Decision::Consume),
            other => panic!("expected wheel event, got {other:?}"),
        }
    }
}
