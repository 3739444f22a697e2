//! Simulated hook and raw channels.
//!
//! Play the operating system's part without any OS hooks: a test (or the
//! `--simulate` demo) injects raw notifications into a
//! [`SimulatedRawChannel`] and then "fires the hook" on a
//! [`SimulatedHookChannel`], getting back the verdict a real hook would
//! act on.
//!
//! The hook side goes through the same [`VerdictGate`] as the Windows hook,
//! so pause, the message timeout and the failsafe behave identically.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kapture_core::{DeviceHandle, EnumerationError, MouseEventKind, RawDeviceDescriptor};
use parking_lot::Mutex;
use tracing::debug;

use super::{
    HookChannel, HookInstall, HookTarget, KeyNotice, MouseNotice, PlatformError, PlatformStep,
    RawChannel, RawInput, RawTarget, Verdict, VerdictGate,
};

/// Raw keyboard message codes, as the platform reports them.
const KEY_DOWN_MESSAGE: u32 = 0x0100;
const KEY_UP_MESSAGE: u32 = 0x0101;

// ── Hook ──────────────────────────────────────────────────────────────────────

/// In-process [`HookChannel`].
pub struct SimulatedHookChannel {
    gate: VerdictGate,
    install_failure: Mutex<Option<String>>,
    install_count: AtomicUsize,
}

impl SimulatedHookChannel {
    pub fn new() -> Self {
        Self {
            gate: VerdictGate::new(),
            install_failure: Mutex::new(None),
            install_count: AtomicUsize::new(0),
        }
    }

    /// Makes the next `install` fail with `reason`.
    pub fn fail_next_install(&self, reason: impl Into<String>) {
        *self.install_failure.lock() = Some(reason.into());
    }

    /// Fires the keyboard hook for `notice`.
    pub fn key(&self, notice: KeyNotice) -> Verdict {
        self.gate.keyboard_verdict(notice)
    }

    /// Fires the mouse hook for an event of `kind`.
    pub fn mouse(&self, kind: MouseEventKind) -> Verdict {
        self.gate.mouse_verdict(MouseNotice { kind })
    }

    pub fn is_installed(&self) -> bool {
        self.gate.is_installed()
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    /// Number of successful installs so far.
    pub fn install_count(&self) -> usize {
        self.install_count.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedHookChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HookChannel for SimulatedHookChannel {
    fn install(&self, target: HookTarget, options: HookInstall) -> Result<(), PlatformError> {
        if let Some(reason) = self.install_failure.lock().take() {
            return Err(PlatformError::new(PlatformStep::HookInstall, reason));
        }
        if self.gate.install(target, options) {
            self.install_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn uninstall(&self) -> Result<(), PlatformError> {
        self.gate.uninstall();
        Ok(())
    }

    fn pause(&self) -> Result<(), PlatformError> {
        self.gate.pause()
    }

    fn unpause(&self) -> Result<(), PlatformError> {
        self.gate.unpause()
    }
}

// ── Raw ───────────────────────────────────────────────────────────────────────

struct Subscription {
    want_mouse: bool,
    want_keyboard: bool,
    target: RawTarget,
}

/// In-process [`RawChannel`] with a mutable device list.
pub struct SimulatedRawChannel {
    devices: Mutex<Vec<RawDeviceDescriptor>>,
    subscription: Mutex<Option<Subscription>>,
}

impl SimulatedRawChannel {
    pub fn new() -> Self {
        Self::with_devices(Vec::new())
    }

    pub fn with_devices(devices: Vec<RawDeviceDescriptor>) -> Self {
        Self {
            devices: Mutex::new(devices),
            subscription: Mutex::new(None),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Attaches a device and, if subscribed, reports the change.
    pub fn plug(&self, device: RawDeviceDescriptor) {
        self.devices.lock().push(device);
        self.deliver(RawInput::DeviceChange);
    }

    /// Detaches a device and, if subscribed, reports the change.
    pub fn unplug(&self, handle: DeviceHandle) {
        self.devices.lock().retain(|d| d.handle != handle);
        self.deliver(RawInput::DeviceChange);
    }

    /// Reports a key transition from `device`.
    ///
    /// Returns `false` if nobody is subscribed to keyboard input.
    pub fn key(&self, device: DeviceHandle, notice: KeyNotice) -> bool {
        let wanted = self
            .subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.want_keyboard);
        wanted
            && self.deliver(RawInput::Keyboard {
                device,
                vkey: notice.vkey,
                scan_code: notice.scan_code,
                message: if notice.key_up {
                    KEY_UP_MESSAGE
                } else {
                    KEY_DOWN_MESSAGE
                },
                key_up: notice.key_up,
            })
    }

    /// Reports a mouse event from `device`.
    pub fn mouse(&self, device: DeviceHandle, kind: MouseEventKind) -> bool {
        let wanted = self
            .subscription
            .lock()
            .as_ref()
            .is_some_and(|s| s.want_mouse);
        wanted && self.deliver(RawInput::Mouse { device, kind })
    }

    fn deliver(&self, input: RawInput) -> bool {
        match self.subscription.lock().as_ref() {
            Some(subscription) => subscription.target.deliver(input),
            None => false,
        }
    }
}

impl Default for SimulatedRawChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RawChannel for SimulatedRawChannel {
    fn subscribe(
        &self,
        want_mouse: bool,
        want_keyboard: bool,
        target: RawTarget,
    ) -> Result<(), PlatformError> {
        let mut subscription = self.subscription.lock();
        if subscription.is_some() {
            return Err(PlatformError::new(
                PlatformStep::RawSubscribe,
                "already subscribed",
            ));
        }
        *subscription = Some(Subscription {
            want_mouse,
            want_keyboard,
            target,
        });
        debug!(want_mouse, want_keyboard, "simulated raw input subscribed");
        Ok(())
    }

    fn unsubscribe(&self) -> Result<(), PlatformError> {
        match self.subscription.lock().take() {
            Some(_) => Ok(()),
            None => Err(PlatformError::new(
                PlatformStep::RawUnsubscribe,
                "not subscribed",
            )),
        }
    }

    fn enumerate_raw_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError> {
        Ok(self.devices.lock().clone())
    }
}

// ── Both at once ──────────────────────────────────────────────────────────────

/// A simulated hook and raw channel pair that types like a real keyboard:
/// raw notification first, hook callback second.
#[derive(Clone)]
pub struct SimulatedInput {
    pub hook: Arc<SimulatedHookChannel>,
    pub raw: Arc<SimulatedRawChannel>,
}

impl SimulatedInput {
    pub fn new(devices: Vec<RawDeviceDescriptor>) -> Self {
        Self {
            hook: Arc::new(SimulatedHookChannel::new()),
            raw: Arc::new(SimulatedRawChannel::with_devices(devices)),
        }
    }

    /// The pair as trait objects, ready for a controller.
    pub fn channels(&self) -> (Arc<dyn HookChannel>, Arc<dyn RawChannel>) {
        (self.hook.clone(), self.raw.clone())
    }

    /// Presses (or releases) `vkey` on `device` and returns the hook's verdict.
    pub fn key(&self, device: DeviceHandle, vkey: u32, key_up: bool) -> Verdict {
        let notice = KeyNotice {
            vkey,
            scan_code: 0,
            key_up,
        };
        self.raw.key(device, notice);
        self.hook.key(notice)
    }

    /// A mouse event of `kind` on `device`.
    pub fn mouse(&self, device: DeviceHandle, kind: MouseEventKind) -> Verdict {
        self.raw.mouse(device, kind);
        self.hook.mouse(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::pump::PumpMessage;
    use crossbeam_channel::unbounded;
    use kapture_core::DeviceClass;
    use std::time::Duration;

    fn kbd(handle: usize) -> RawDeviceDescriptor {
        RawDeviceDescriptor::new(DeviceHandle(handle), DeviceClass::Keyboard, "sim-kbd")
    }

    #[test]
    fn test_raw_channel_delivers_only_wanted_categories() {
        // Arrange
        let raw = SimulatedRawChannel::with_devices(vec![kbd(1)]);
        let (tx, rx) = unbounded();
        raw.subscribe(false, true, RawTarget::new(tx)).unwrap();
        let notice = KeyNotice {
            vkey: 0x41,
            scan_code: 0x1e,
            key_up: true,
        };

        // Act
        let key_sent = raw.key(DeviceHandle(1), notice);
        let mouse_sent = raw.mouse(DeviceHandle(1), MouseEventKind::Move);

        // Assert
        assert!(key_sent);
        assert!(!mouse_sent);
        match rx.try_recv().unwrap() {
            PumpMessage::Event(RawInput::Keyboard { message, key_up, .. }) => {
                assert_eq!(message, KEY_UP_MESSAGE);
                assert!(key_up);
            }
            other => panic!("unexpected message: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_plug_reports_device_change_and_updates_listing() {
        let raw = SimulatedRawChannel::new();
        let (tx, rx) = unbounded();
        raw.subscribe(true, true, RawTarget::new(tx)).unwrap();

        raw.plug(kbd(2));

        assert!(matches!(
            rx.try_recv().unwrap(),
            PumpMessage::Event(RawInput::DeviceChange)
        ));
        assert_eq!(raw.enumerate_raw_devices().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_twice_fails() {
        let raw = SimulatedRawChannel::new();
        let (tx, _rx) = unbounded();
        raw.subscribe(true, true, RawTarget::new(tx)).unwrap();

        raw.unsubscribe().unwrap();
        let err = raw.unsubscribe().unwrap_err();

        assert_eq!(err.step, PlatformStep::RawUnsubscribe);
        assert!(!raw.key(
            DeviceHandle(1),
            KeyNotice {
                vkey: 1,
                scan_code: 0,
                key_up: false
            }
        ));
    }

    #[test]
    fn test_injected_install_failure_is_consumed_once() {
        // Arrange
        let hook = SimulatedHookChannel::new();
        hook.fail_next_install("no desktop");
        let options = HookInstall {
            keyboard: true,
            mouse: false,
            timeout: Duration::from_millis(100),
            start_suspended: false,
        };
        let (tx, _rx) = unbounded();

        // Act
        let first = hook.install(HookTarget::new(tx.clone()), options);
        let second = hook.install(HookTarget::new(tx), options);

        // Assert
        assert_eq!(first.unwrap_err().step, PlatformStep::HookInstall);
        assert!(second.is_ok());
        assert!(hook.is_installed());
        assert_eq!(hook.install_count(), 1);
    }

    #[test]
    fn test_uninstalled_hook_allows_everything() {
        let hook = SimulatedHookChannel::new();
        assert_eq!(hook.mouse(MouseEventKind::Button), Verdict::Allow);
    }
}
