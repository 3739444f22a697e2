//! Handler capability traits implemented by applications.
//!
//! A handler inspects an event and may record a [`Decision`] on it.  The
//! application keeps ownership of its handlers and shares them with Kapture
//! through an `Arc`; the same `Arc` (compared by pointer) is what identifies
//! the handler again when it is unregistered.
//!
//! Handlers run on the hook pump thread while the handler table is locked.
//! Calls that change the table (registering, unregistering, refreshing the
//! device list) are refused when made from inside a handler callback; see
//! the dispatcher's reentrancy notes.
//!
//! [`Decision`]: crate::Decision

use crate::domain::event::{KeyboardEvent, MouseButtonEvent, MouseMoveEvent, MouseWheelEvent};

/// Which handler table a registration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    Keyboard,
    Mouse,
}

/// Receives keyboard events from matching keyboards.
#[cfg_attr(test, mockall::automock)]
pub trait KeyboardHandler: Send + Sync {
    /// Called once per event; set the decision with
    /// [`CapturedEvent::set_decision`](crate::CapturedEvent::set_decision).
    fn handle_key_event(&self, event: &mut KeyboardEvent);
}

/// Receives mouse events from matching mice.
///
/// Every method defaults to doing nothing, so a handler only interested in
/// buttons need not implement the other two.
#[cfg_attr(test, mockall::automock)]
pub trait MouseHandler: Send + Sync {
    fn handle_button_event(&self, _event: &mut MouseButtonEvent) {}
    fn handle_wheel_event(&self, _event: &mut MouseWheelEvent) {}
    fn handle_move_event(&self, _event: &mut MouseMoveEvent) {}
}

/// Pointer identity of a shared handler, ignoring vtable metadata.
pub(crate) fn same_handler<H: ?Sized>(a: &std::sync::Arc<H>, b: &std::sync::Arc<H>) -> bool {
    std::ptr::eq(
        std::sync::Arc::as_ptr(a) as *const (),
        std::sync::Arc::as_ptr(b) as *const (),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct Noop;
    impl KeyboardHandler for Noop {
        fn handle_key_event(&self, _event: &mut KeyboardEvent) {}
    }

    #[test]
    fn test_same_handler_compares_by_pointer() {
        // Arrange
        let a: Arc<dyn KeyboardHandler> = Arc::new(Noop);
        let a_clone = Arc::clone(&a);
        let b: Arc<dyn KeyboardHandler> = Arc::new(Noop);

        // Assert
        assert!(same_handler(&a, &a_clone));
        assert!(!same_handler(&a, &b));
    }
}
