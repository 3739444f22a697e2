//! HandlerChain: the ordered handlers bound to one device.
//!
//! # Ordering contract
//!
//! The most recently registered handler runs first.  Registration inserts at
//! the front, so for handlers registered A, then B, then C the chain reads
//! `[C, B, A]`.  Any handler can stop the chain by consuming the event, and
//! the handlers behind it never see that event.
//!
//! A handler appears at most once per chain; adding it again leaves its
//! current position alone.

use std::sync::Arc;

use crate::domain::event::{CapturedEvent, Decision};
use crate::domain::handler::same_handler;

/// Ordered, mutable list of shared handlers.
pub struct HandlerChain<H: ?Sized> {
    handlers: Vec<Arc<H>>,
}

impl<H: ?Sized> HandlerChain<H> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Inserts `handler` at the front unless it is already in the chain.
    pub fn add_front(&mut self, handler: Arc<H>) -> bool {
        if self.contains(&handler) {
            return false;
        }
        self.handlers.insert(0, handler);
        true
    }

    /// Appends `handler` at the back unless it is already in the chain.
    pub fn push_back(&mut self, handler: Arc<H>) -> bool {
        if self.contains(&handler) {
            return false;
        }
        self.handlers.push(handler);
        true
    }

    /// Removes every occurrence of `handler`; returns whether anything changed.
    pub fn remove(&mut self, handler: &Arc<H>) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|h| !same_handler(h, handler));
        self.handlers.len() != before
    }

    pub fn contains(&self, handler: &Arc<H>) -> bool {
        self.handlers.iter().any(|h| same_handler(h, handler))
    }

    pub fn clear(&mut self) {
        self.handlers.clear();
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs `invoke` for each handler in order against the same event,
    /// stopping right after the first handler that consumes it.
    ///
    /// Returns the number of handlers invoked.
    pub fn run<E, F>(&self, event: &mut E, mut invoke: F) -> usize
    where
        E: CapturedEvent + ?Sized,
        F: FnMut(&H, &mut E),
    {
        let mut invoked = 0;
        for handler in &self.handlers {
            invoke(&**handler, &mut *event);
            invoked += 1;
            if event.decision() == Decision::Consume {
                break;
            }
        }
        invoked
    }
}

impl<H: ?Sized> Default for HandlerChain<H> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::device::DeviceHandle;
    use crate::domain::event::KeyboardEvent;
    use crate::domain::handler::KeyboardHandler;
    use parking_lot::Mutex;

    struct Recorder {
        id: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        decision: Decision,
    }

    impl KeyboardHandler for Recorder {
        fn handle_key_event(&self, event: &mut KeyboardEvent) {
            self.log.lock().push(self.id);
            if self.decision != Decision::Undecided {
                event.set_decision(self.decision);
            }
        }
    }

    fn recorder(
        id: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        decision: Decision,
    ) -> Arc<dyn KeyboardHandler> {
        Arc::new(Recorder {
            id,
            log: Arc::clone(log),
            decision,
        })
    }

    fn event() -> KeyboardEvent {
        KeyboardEvent::new(DeviceHandle(1), 0x41, 0, 0, false)
    }

    #[test]
    fn test_add_front_runs_newest_first() {
        // Arrange
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain: HandlerChain<dyn KeyboardHandler> = HandlerChain::new();
        chain.add_front(recorder("a", &log, Decision::Undecided));
        chain.add_front(recorder("b", &log, Decision::Undecided));
        chain.add_front(recorder("c", &log, Decision::Undecided));

        // Act
        let invoked = chain.run(&mut event(), |h, e| h.handle_key_event(e));

        // Assert
        assert_eq!(invoked, 3);
        assert_eq!(*log.lock(), vec!["c", "b", "a"]);
    }

    #[test]
    fn test_consume_short_circuits_remaining_handlers() {
        // Arrange
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain: HandlerChain<dyn KeyboardHandler> = HandlerChain::new();
        chain.add_front(recorder("a", &log, Decision::Permit));
        chain.add_front(recorder("b", &log, Decision::Consume));
        chain.add_front(recorder("c", &log, Decision::Permit));
        let mut ev = event();

        // Act
        chain.run(&mut ev, |h, e| h.handle_key_event(e));

        // Assert
        assert_eq!(*log.lock(), vec!["c", "b"]);
        assert_eq!(ev.decision(), Decision::Consume);
    }

    #[test]
    fn test_duplicate_add_is_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = recorder("a", &log, Decision::Undecided);
        let mut chain: HandlerChain<dyn KeyboardHandler> = HandlerChain::new();

        assert!(chain.add_front(Arc::clone(&handler)));
        assert!(!chain.add_front(Arc::clone(&handler)));
        assert!(!chain.push_back(handler));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_remove_drops_handler_from_chain() {
        // Arrange
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log, Decision::Undecided);
        let b = recorder("b", &log, Decision::Undecided);
        let mut chain: HandlerChain<dyn KeyboardHandler> = HandlerChain::new();
        chain.add_front(Arc::clone(&a));
        chain.add_front(Arc::clone(&b));

        // Act
        let removed = chain.remove(&a);

        // Assert
        assert!(removed);
        assert!(!chain.contains(&a));
        assert!(chain.contains(&b));
        assert!(!chain.remove(&a));
    }

    #[test]
    fn test_empty_chain_leaves_event_undecided() {
        let chain: HandlerChain<dyn KeyboardHandler> = HandlerChain::new();
        let mut ev = event();
        assert_eq!(chain.run(&mut ev, |h, e| h.handle_key_event(e)), 0);
        assert_eq!(ev.decision(), Decision::Undecided);
    }
}
