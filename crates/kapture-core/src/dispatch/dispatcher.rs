//! Dispatcher: binds handlers to devices and runs the chains.
//!
//! The dispatcher owns three tables:
//!
//! | Table     | Key                         | Value                          |
//! |-----------|-----------------------------|--------------------------------|
//! | patterns  | registration order          | (compiled pattern, handler)    |
//! | devices   | [`DeviceHandle`]            | [`DeviceIdentity`]             |
//! | chains    | [`DeviceHandle`] per kind   | [`HandlerChain`]               |
//!
//! A pattern registration binds its handler to every device whose name
//! matches, both the devices present at registration time and devices that
//! show up in a later [`Dispatcher::refresh`].
//!
//! # Unregistering
//!
//! Unregistering a handler removes it from every chain *and* forgets its
//! pattern registrations.  A device connected afterwards does not pick the
//! handler up again; the application has to register it anew.
//!
//! # Reentrancy
//!
//! The chain table stays locked while a chain runs, so no event is ever
//! dispatched through a chain that is being changed underneath it.  The
//! lock is not reentrant, so a thread running a chain marks itself and
//! every table-changing call made from inside a handler is refused instead
//! of deadlocking:
//!
//! | Call from a handler              | Result                                  |
//! |----------------------------------|-----------------------------------------|
//! | `register_*_handler`             | [`RegistrationError::Reentrant`]        |
//! | `unregister_*_handler`           | `false`, nothing removed                |
//! | [`Dispatcher::refresh`]          | [`EnumerationError`], snapshot kept     |
//! | `on_device_added`/`_removed`     | ignored                                 |
//! | `dispatch_*`                     | event passes without running any chain  |

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::dispatch::chain::HandlerChain;
use crate::dispatch::registry::{DeviceDelta, DeviceRegistry, DeviceSource, EnumerationError};
use crate::domain::device::{DeviceClass, DeviceHandle, DeviceIdentity};
use crate::domain::event::{CapturedEvent, Decision, KeyboardEvent, MouseEvent};
use crate::domain::handler::{same_handler, HandlerKind, KeyboardHandler, MouseHandler};
use crate::domain::pattern::{DevicePattern, PatternError};

thread_local! {
    /// Set while this thread runs a handler chain.
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as running a chain until dropped.
struct DispatchScope;

impl DispatchScope {
    fn enter() -> Self {
        DISPATCHING.with(|flag| flag.set(true));
        DispatchScope
    }
}

impl Drop for DispatchScope {
    fn drop(&mut self) {
        DISPATCHING.with(|flag| flag.set(false));
    }
}

fn inside_handler() -> bool {
    DISPATCHING.with(Cell::get)
}

/// A handler registration was refused.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("handlers cannot be registered from inside a handler callback")]
    Reentrant,
}

/// One (pattern, handler) subscription.
#[derive(Clone)]
pub enum HandlerRegistration {
    Keyboard {
        pattern: DevicePattern,
        handler: Arc<dyn KeyboardHandler>,
    },
    Mouse {
        pattern: DevicePattern,
        handler: Arc<dyn MouseHandler>,
    },
}

impl HandlerRegistration {
    pub fn kind(&self) -> HandlerKind {
        match self {
            HandlerRegistration::Keyboard { .. } => HandlerKind::Keyboard,
            HandlerRegistration::Mouse { .. } => HandlerKind::Mouse,
        }
    }

    pub fn pattern(&self) -> &DevicePattern {
        match self {
            HandlerRegistration::Keyboard { pattern, .. } => pattern,
            HandlerRegistration::Mouse { pattern, .. } => pattern,
        }
    }

    /// Whether this registration should bind to `device`.
    fn binds_to(&self, device: &DeviceIdentity) -> bool {
        let class = match self {
            HandlerRegistration::Keyboard { .. } => DeviceClass::Keyboard,
            HandlerRegistration::Mouse { .. } => DeviceClass::Mouse,
        };
        device.class() == class && self.pattern().matches(device.name())
    }
}

#[derive(Default)]
struct ChainTable {
    keyboard: HashMap<DeviceHandle, HandlerChain<dyn KeyboardHandler>>,
    mouse: HashMap<DeviceHandle, HandlerChain<dyn MouseHandler>>,
}

impl ChainTable {
    /// Appends the handler of `registration` to `device`'s chain.
    fn append(&mut self, registration: &HandlerRegistration, device: DeviceHandle) {
        match registration {
            HandlerRegistration::Keyboard { handler, .. } => {
                self.keyboard
                    .entry(device)
                    .or_default()
                    .push_back(Arc::clone(handler));
            }
            HandlerRegistration::Mouse { handler, .. } => {
                self.mouse
                    .entry(device)
                    .or_default()
                    .push_back(Arc::clone(handler));
            }
        }
    }

    /// Inserts the handler of `registration` at the front of `device`'s chain.
    fn prepend(&mut self, registration: &HandlerRegistration, device: DeviceHandle) {
        match registration {
            HandlerRegistration::Keyboard { handler, .. } => {
                self.keyboard
                    .entry(device)
                    .or_default()
                    .add_front(Arc::clone(handler));
            }
            HandlerRegistration::Mouse { handler, .. } => {
                self.mouse
                    .entry(device)
                    .or_default()
                    .add_front(Arc::clone(handler));
            }
        }
    }

    fn drop_device(&mut self, device: DeviceHandle) {
        self.keyboard.remove(&device);
        self.mouse.remove(&device);
    }
}

/// Owns the device registry, the handler chains and the pattern table.
#[derive(Default)]
pub struct Dispatcher {
    patterns: Mutex<Vec<HandlerRegistration>>,
    registry: DeviceRegistry,
    chains: Mutex<ChainTable>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Subscribes `handler` to every keyboard whose name matches `pattern`.
    ///
    /// Registering the same (pattern, handler) pair twice is a no-op.
    ///
    /// # Errors
    ///
    /// [`RegistrationError::Pattern`] if `pattern` does not compile,
    /// [`RegistrationError::Reentrant`] when called from a handler.
    pub fn register_keyboard_handler(
        &self,
        pattern: &str,
        handler: Arc<dyn KeyboardHandler>,
    ) -> Result<(), RegistrationError> {
        if inside_handler() {
            return Err(RegistrationError::Reentrant);
        }
        let pattern = DevicePattern::compile(pattern)?;
        self.register(HandlerRegistration::Keyboard { pattern, handler });
        Ok(())
    }

    /// Subscribes `handler` to every mouse whose name matches `pattern`.
    ///
    /// # Errors
    ///
    /// As for [`Dispatcher::register_keyboard_handler`].
    pub fn register_mouse_handler(
        &self,
        pattern: &str,
        handler: Arc<dyn MouseHandler>,
    ) -> Result<(), RegistrationError> {
        if inside_handler() {
            return Err(RegistrationError::Reentrant);
        }
        let pattern = DevicePattern::compile(pattern)?;
        self.register(HandlerRegistration::Mouse { pattern, handler });
        Ok(())
    }

    fn register(&self, registration: HandlerRegistration) {
        let mut patterns = self.patterns.lock();
        if patterns.iter().any(|existing| same_registration(existing, &registration)) {
            debug!(
                pattern = registration.pattern().source(),
                "handler already registered for pattern"
            );
            return;
        }

        let devices = self.registry.snapshot();
        let mut chains = self.chains.lock();
        let mut bound = 0usize;
        for device in devices.iter().filter(|d| registration.binds_to(d)) {
            chains.prepend(&registration, device.handle());
            bound += 1;
        }
        drop(chains);

        info!(
            pattern = registration.pattern().source(),
            kind = ?registration.kind(),
            bound,
            "handler registered"
        );
        patterns.push(registration);
    }

    /// Removes `handler` from every keyboard chain and forgets its patterns.
    ///
    /// Returns `false` if the handler was not registered.
    pub fn unregister_keyboard_handler(&self, handler: &Arc<dyn KeyboardHandler>) -> bool {
        if inside_handler() {
            warn!("keyboard handler unregister refused inside a handler callback");
            return false;
        }
        let mut patterns = self.patterns.lock();
        let before = patterns.len();
        patterns.retain(|r| match r {
            HandlerRegistration::Keyboard { handler: h, .. } => !same_handler(h, handler),
            HandlerRegistration::Mouse { .. } => true,
        });
        let forgot = before - patterns.len();

        let mut chains = self.chains.lock();
        let mut unbound = 0usize;
        for chain in chains.keyboard.values_mut() {
            if chain.remove(handler) {
                unbound += 1;
            }
        }
        chains.keyboard.retain(|_, chain| !chain.is_empty());

        info!(forgot, unbound, "keyboard handler unregistered");
        forgot > 0 || unbound > 0
    }

    /// Removes `handler` from every mouse chain and forgets its patterns.
    ///
    /// Returns `false` if the handler was not registered.
    pub fn unregister_mouse_handler(&self, handler: &Arc<dyn MouseHandler>) -> bool {
        if inside_handler() {
            warn!("mouse handler unregister refused inside a handler callback");
            return false;
        }
        let mut patterns = self.patterns.lock();
        let before = patterns.len();
        patterns.retain(|r| match r {
            HandlerRegistration::Mouse { handler: h, .. } => !same_handler(h, handler),
            HandlerRegistration::Keyboard { .. } => true,
        });
        let forgot = before - patterns.len();

        let mut chains = self.chains.lock();
        let mut unbound = 0usize;
        for chain in chains.mouse.values_mut() {
            if chain.remove(handler) {
                unbound += 1;
            }
        }
        chains.mouse.retain(|_, chain| !chain.is_empty());

        info!(forgot, unbound, "mouse handler unregistered");
        forgot > 0 || unbound > 0
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    /// Re-enumerates devices and updates chains for arrivals and removals.
    ///
    /// # Errors
    ///
    /// Propagates [`EnumerationError`]; chains are untouched in that case.
    /// Also fails, without enumerating, when called from a handler.
    pub fn refresh(&self, source: &dyn DeviceSource) -> Result<DeviceDelta, EnumerationError> {
        if inside_handler() {
            return Err(EnumerationError {
                step: "refresh",
                reason: "called from inside a handler callback".to_string(),
            });
        }
        // Holding the pattern table keeps a concurrent registration from
        // scanning a device list that is about to change.
        let patterns = self.patterns.lock();
        let delta = self.registry.refresh(source)?;
        let mut chains = self.chains.lock();
        for device in &delta.removed {
            chains.drop_device(device.handle());
        }
        for device in &delta.added {
            bind_device(&patterns, &mut chains, device);
        }
        Ok(delta)
    }

    /// Binds every matching pattern registration to `device`.
    pub fn on_device_added(&self, device: &DeviceIdentity) {
        if inside_handler() {
            warn!(handle = %device.handle(), "device arrival ignored inside a handler callback");
            return;
        }
        let patterns = self.patterns.lock();
        let mut chains = self.chains.lock();
        bind_device(&patterns, &mut chains, device);
    }

    /// Drops `device`'s chains.
    pub fn on_device_removed(&self, device: &DeviceIdentity) {
        if inside_handler() {
            warn!(handle = %device.handle(), "device removal ignored inside a handler callback");
            return;
        }
        self.chains.lock().drop_device(device.handle());
        debug!(handle = %device.handle(), "device chains dropped");
    }

    /// Current keyboard snapshot (no re-enumeration).
    pub fn keyboards(&self) -> Vec<Arc<DeviceIdentity>> {
        self.registry.keyboards()
    }

    /// Current mouse snapshot (no re-enumeration).
    pub fn mice(&self) -> Vec<Arc<DeviceIdentity>> {
        self.registry.mice()
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Runs the keyboard chain of the event's device and returns the
    /// resolved decision (`Undecided` becomes `Pass`).
    pub fn dispatch_keyboard(&self, event: &mut KeyboardEvent) -> Decision {
        if inside_handler() {
            debug!("nested keyboard dispatch passed through");
            return event.decision().resolve();
        }
        let Some(device) = self.resolve_device(event) else {
            return event.decision().resolve();
        };
        let chains = self.chains.lock();
        let _scope = DispatchScope::enter();
        if let Some(chain) = chains.keyboard.get(&device) {
            let invoked = chain.run(event, |h, e| h.handle_key_event(e));
            trace!(handle = %device, invoked, decision = ?event.decision(), "keyboard chain ran");
        }
        event.decision().resolve()
    }

    /// Runs the mouse chain of the event's device and returns the resolved
    /// decision.
    pub fn dispatch_mouse(&self, event: &mut MouseEvent) -> Decision {
        if inside_handler() {
            debug!("nested mouse dispatch passed through");
            return event.decision().resolve();
        }
        let Some(device) = self.resolve_device(event) else {
            return event.decision().resolve();
        };
        let chains = self.chains.lock();
        let _scope = DispatchScope::enter();
        if let Some(chain) = chains.mouse.get(&device) {
            let invoked = chain.run(event, |h, e| match e {
                MouseEvent::Button(inner) => h.handle_button_event(inner),
                MouseEvent::Wheel(inner) => h.handle_wheel_event(inner),
                MouseEvent::Move(inner) => h.handle_move_event(inner),
            });
            trace!(handle = %device, invoked, decision = ?event.decision(), "mouse chain ran");
        }
        event.decision().resolve()
    }

    /// Fills in the event's device if needed and returns its handle, or
    /// `None` when the device cannot be resolved.
    fn resolve_device<E: CapturedEvent>(&self, event: &mut E) -> Option<DeviceHandle> {
        if let Some(device) = event.device() {
            return Some(device.handle());
        }
        let handle = event.device_handle();
        let device = self
            .registry
            .lookup(handle)
            .or_else(|| self.unknown_device(handle))?;
        event.attach_device(device);
        Some(handle)
    }

    /// Best-effort resolution for a handle missing from the last refresh.
    ///
    /// Currently always gives up; such events pass through undecided.
    fn unknown_device(&self, handle: DeviceHandle) -> Option<Arc<DeviceIdentity>> {
        debug!(handle = %handle, "event from unknown device");
        None
    }

    // ── Introspection ─────────────────────────────────────────────────────────

    /// Number of pattern registrations of the given kind.
    pub fn registration_count(&self, kind: HandlerKind) -> usize {
        self.patterns
            .lock()
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// Length of the chain bound to `device` for `kind`, if one exists.
    pub fn chain_len(&self, kind: HandlerKind, device: DeviceHandle) -> Option<usize> {
        let chains = self.chains.lock();
        match kind {
            HandlerKind::Keyboard => chains.keyboard.get(&device).map(HandlerChain::len),
            HandlerKind::Mouse => chains.mouse.get(&device).map(HandlerChain::len),
        }
    }
}

/// Walks registrations newest first, appending each match, so the resulting
/// chain keeps the newest-registered-runs-first order.
fn bind_device(
    patterns: &[HandlerRegistration],
    chains: &mut ChainTable,
    device: &DeviceIdentity,
) {
    let mut bound = 0usize;
    for registration in patterns.iter().rev().filter(|r| r.binds_to(device)) {
        chains.append(registration, device.handle());
        bound += 1;
    }
    debug!(handle = %device.handle(), name = device.name(), bound, "device bound to handlers");
}

fn same_registration(a: &HandlerRegistration, b: &HandlerRegistration) -> bool {
    match (a, b) {
        (
            HandlerRegistration::Keyboard { pattern: pa, handler: ha },
            HandlerRegistration::Keyboard { pattern: pb, handler: hb },
        ) => pa == pb && same_handler(ha, hb),
        (
            HandlerRegistration::Mouse { pattern: pa, handler: ha },
            HandlerRegistration::Mouse { pattern: pb, handler: hb },
        ) => pa == pb && same_handler(ha, hb),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::MockDeviceSource;
    use crate::domain::device::RawDeviceDescriptor;
    use crate::domain::event::MouseEventKind;
    use crate::domain::handler::{MockKeyboardHandler, MockMouseHandler};

    fn source_with(listing: Vec<RawDeviceDescriptor>) -> MockDeviceSource {
        let mut source = MockDeviceSource::new();
        source
            .expect_enumerate_devices()
            .returning(move || Ok(listing.clone()));
        source
    }

    fn dispatcher_with_devices() -> Dispatcher {
        let dispatcher = Dispatcher::new();
        dispatcher
            .refresh(&source_with(vec![
                RawDeviceDescriptor::new(DeviceHandle(1), DeviceClass::Keyboard, "laptop-kbd"),
                RawDeviceDescriptor::new(DeviceHandle(2), DeviceClass::Keyboard, "usb-kbd"),
                RawDeviceDescriptor::new(DeviceHandle(3), DeviceClass::Mouse, "usb-mouse"),
            ]))
            .unwrap();
        dispatcher
    }

    #[test]
    fn test_register_binds_only_matching_keyboards() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let handler: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());

        // Act
        dispatcher.register_keyboard_handler("usb-.*", handler).unwrap();

        // Assert
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(1)), None);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(2)), Some(1));
        // Mouse named usb-mouse must not get a keyboard chain.
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(3)), None);
    }

    #[test]
    fn test_register_rejects_malformed_pattern() {
        let dispatcher = dispatcher_with_devices();
        let handler: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());

        let result = dispatcher.register_keyboard_handler("(", handler);

        assert!(result.is_err());
        assert_eq!(dispatcher.registration_count(HandlerKind::Keyboard), 0);
    }

    #[test]
    fn test_dispatch_invokes_matching_handler_and_returns_its_decision() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let mut mock = MockKeyboardHandler::new();
        mock.expect_handle_key_event()
            .times(1)
            .returning(|e| e.set_decision(Decision::Consume));
        dispatcher
            .register_keyboard_handler(".*", Arc::new(mock))
            .unwrap();
        let mut event = KeyboardEvent::new(DeviceHandle(2), 0x20, 0x39, 0x100, false);

        // Act
        let decision = dispatcher.dispatch_keyboard(&mut event);

        // Assert
        assert_eq!(decision, Decision::Consume);
        assert_eq!(event.device().map(|d| d.name()), Some("usb-kbd"));
    }

    #[test]
    fn test_dispatch_from_unknown_device_passes_without_invoking_handlers() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let mut mock = MockKeyboardHandler::new();
        mock.expect_handle_key_event().never();
        dispatcher
            .register_keyboard_handler(".*", Arc::new(mock))
            .unwrap();
        let mut event = KeyboardEvent::new(DeviceHandle(99), 0x41, 0, 0, false);

        // Act
        let decision = dispatcher.dispatch_keyboard(&mut event);

        // Assert
        assert_eq!(decision, Decision::Pass);
        assert_eq!(event.decision(), Decision::Undecided);
        assert!(event.device().is_none());
    }

    #[test]
    fn test_dispatch_mouse_routes_to_the_matching_method() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let mut mock = MockMouseHandler::new();
        mock.expect_handle_wheel_event()
            .times(1)
            .returning(|e| e.set_decision(Decision::Consume));
        mock.expect_handle_button_event().never();
        mock.expect_handle_move_event().never();
        dispatcher
            .register_mouse_handler(".*mouse", Arc::new(mock))
            .unwrap();
        let mut event = MouseEvent::new(MouseEventKind::Wheel, DeviceHandle(3));

        // Act
        let decision = dispatcher.dispatch_mouse(&mut event);

        // Assert
        assert_eq!(decision, Decision::Consume);
    }

    #[test]
    fn test_refresh_binds_new_device_and_drops_removed_chain() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let handler: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());
        dispatcher.register_keyboard_handler(".*kbd", handler).unwrap();

        // Act: laptop keyboard unplugged, a second USB keyboard arrives
        let delta = dispatcher
            .refresh(&source_with(vec![
                RawDeviceDescriptor::new(DeviceHandle(2), DeviceClass::Keyboard, "usb-kbd"),
                RawDeviceDescriptor::new(DeviceHandle(4), DeviceClass::Keyboard, "usb-kbd-2"),
                RawDeviceDescriptor::new(DeviceHandle(3), DeviceClass::Mouse, "usb-mouse"),
            ]))
            .unwrap();

        // Assert
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(1)), None);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(2)), Some(1));
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(4)), Some(1));
    }

    #[test]
    fn test_unregister_mouse_handler_leaves_keyboard_handlers_alone() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let kbd: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());
        let mouse: Arc<dyn MouseHandler> = Arc::new(MockMouseHandler::new());
        dispatcher.register_keyboard_handler(".*", Arc::clone(&kbd)).unwrap();
        dispatcher.register_mouse_handler(".*", Arc::clone(&mouse)).unwrap();

        // Act
        let removed = dispatcher.unregister_mouse_handler(&mouse);

        // Assert
        assert!(removed);
        assert_eq!(dispatcher.registration_count(HandlerKind::Mouse), 0);
        assert_eq!(dispatcher.registration_count(HandlerKind::Keyboard), 1);
        assert_eq!(dispatcher.chain_len(HandlerKind::Mouse, DeviceHandle(3)), None);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(1)), Some(1));
        assert!(!dispatcher.unregister_mouse_handler(&mouse));
    }

    /// Calls back into the dispatcher from inside its own callback.
    struct Reentrant {
        dispatcher: Arc<Dispatcher>,
        source: MockDeviceSource,
        refreshed: Mutex<Option<Result<DeviceDelta, EnumerationError>>>,
        registered: Mutex<Option<bool>>,
        unregistered: Mutex<Option<bool>>,
    }

    impl KeyboardHandler for Reentrant {
        fn handle_key_event(&self, event: &mut KeyboardEvent) {
            *self.refreshed.lock() = Some(self.dispatcher.refresh(&self.source));
            let other: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());
            let registered = self.dispatcher.register_keyboard_handler(".*", Arc::clone(&other));
            *self.registered.lock() = Some(matches!(registered, Err(RegistrationError::Reentrant)));
            *self.unregistered.lock() = Some(self.dispatcher.unregister_keyboard_handler(&other));
            event.set_decision(Decision::Consume);
        }
    }

    #[test]
    fn test_table_changes_from_inside_a_handler_are_refused_without_deadlock() {
        // Arrange
        let dispatcher = Arc::new(dispatcher_with_devices());
        let handler = Arc::new(Reentrant {
            dispatcher: Arc::clone(&dispatcher),
            source: source_with(Vec::new()),
            refreshed: Mutex::new(None),
            registered: Mutex::new(None),
            unregistered: Mutex::new(None),
        });
        dispatcher
            .register_keyboard_handler("usb-kbd", Arc::clone(&handler) as Arc<dyn KeyboardHandler>)
            .unwrap();

        // Act: dispatch on another thread so a deadlock fails the test
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let worker = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            let mut event = KeyboardEvent::new(DeviceHandle(2), 0x20, 0x39, 0x100, false);
            let _ = done_tx.send(worker.dispatch_keyboard(&mut event));
        });
        let decision = done_rx.recv_timeout(std::time::Duration::from_secs(2));

        // Assert
        assert_eq!(decision, Ok(Decision::Consume));
        let refreshed = handler.refreshed.lock().take().unwrap();
        assert_eq!(refreshed.unwrap_err().step, "refresh");
        assert_eq!(*handler.registered.lock(), Some(true));
        assert_eq!(*handler.unregistered.lock(), Some(false));
        // The empty listing was never applied.
        assert_eq!(dispatcher.keyboards().len(), 2);
        assert_eq!(dispatcher.registration_count(HandlerKind::Keyboard), 1);
        // The thread is usable again once the chain has finished.
        assert!(dispatcher.refresh(&source_with(Vec::new())).is_ok());
    }

    #[test]
    fn test_device_removed_drops_chain_and_added_rebinds() {
        // Arrange
        let dispatcher = dispatcher_with_devices();
        let handler: Arc<dyn KeyboardHandler> = Arc::new(MockKeyboardHandler::new());
        dispatcher.register_keyboard_handler(".*", handler).unwrap();
        let device = dispatcher.registry().lookup(DeviceHandle(1)).unwrap();

        // Act / Assert
        dispatcher.on_device_removed(&device);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(1)), None);

        dispatcher.on_device_added(&device);
        assert_eq!(dispatcher.chain_len(HandlerKind::Keyboard, DeviceHandle(1)), Some(1));
    }
}
