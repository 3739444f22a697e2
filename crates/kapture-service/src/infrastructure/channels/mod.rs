//! Platform input channels: the hook channel and the raw channel.
//!
//! Kapture needs two things from the operating system:
//!
//! - a **hook channel** that is called for every keyboard/mouse event
//!   system-wide and can *block* it, but knows nothing about which device
//!   produced it, and
//! - a **raw channel** that reports exactly which device produced an event
//!   (and lists the attached devices), but cannot block anything.
//!
//! Both are modelled as traits so the capture controller never touches OS
//! APIs directly.  [`simulated`] provides in-process implementations for
//! tests and the `--simulate` demo; [`windows`] binds them to
//! `WH_KEYBOARD_LL`/`WH_MOUSE_LL` and the Raw Input API.
//!
//! # How a verdict travels (for beginners)
//!
//! ```text
//!  OS hook callback ──HookRequest──► hook pump ──► correlate + dispatch
//!        ▲                                                │
//!        └────────────── Verdict (bounded wait) ◄─────────┘
//!
//!  OS raw callback ──RawInput──► raw pump ──► EventQueue
//! ```
//!
//! The hook side may only wait `message_timeout` for its answer.  If the
//! pump misses that deadline the event is passed through and verdict
//! requests for that category are disabled until the hook is reinstalled
//! (see [`VerdictGate`]).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use kapture_core::{
    DeviceHandle, DeviceSource, EnumerationError, MouseEventKind, RawDeviceDescriptor,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::application::pump::PumpMessage;

pub mod simulated;

#[cfg(target_os = "windows")]
pub mod windows;

// ── Platform errors ───────────────────────────────────────────────────────────

/// The platform step that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformStep {
    HookInstall,
    HookUninstall,
    HookPause,
    HookUnpause,
    RawSubscribe,
    RawUnsubscribe,
    PumpStart,
    PumpPing,
    PumpJoin,
}

impl fmt::Display for PlatformStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlatformStep::HookInstall => "hook install",
            PlatformStep::HookUninstall => "hook uninstall",
            PlatformStep::HookPause => "hook pause",
            PlatformStep::HookUnpause => "hook unpause",
            PlatformStep::RawSubscribe => "raw input subscribe",
            PlatformStep::RawUnsubscribe => "raw input unsubscribe",
            PlatformStep::PumpStart => "pump start",
            PlatformStep::PumpPing => "pump ping",
            PlatformStep::PumpJoin => "pump join",
        };
        f.write_str(name)
    }
}

/// A platform step failed; always names the step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{step} failed: {reason}")]
pub struct PlatformError {
    pub step: PlatformStep,
    pub reason: String,
}

impl PlatformError {
    pub fn new(step: PlatformStep, reason: impl Into<String>) -> Self {
        Self {
            step,
            reason: reason.into(),
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// Whether the hook lets an event continue or swallows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block,
}

impl Verdict {
    pub fn blocks(self) -> bool {
        self == Verdict::Block
    }
}

/// What the keyboard hook knows about a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyNotice {
    pub vkey: u32,
    pub scan_code: u32,
    pub key_up: bool,
}

/// What the mouse hook knows about a mouse event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseNotice {
    pub kind: MouseEventKind,
}

/// A hook callback asking the hook pump for a verdict.
#[derive(Debug)]
pub enum HookRequest {
    Keyboard {
        notice: KeyNotice,
        reply: Sender<Verdict>,
    },
    Mouse {
        notice: MouseNotice,
        reply: Sender<Verdict>,
    },
}

/// A raw channel notification for the raw pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawInput {
    Keyboard {
        device: DeviceHandle,
        vkey: u32,
        scan_code: u32,
        message: u32,
        key_up: bool,
    },
    Mouse {
        device: DeviceHandle,
        kind: MouseEventKind,
    },
    /// A device arrived or left; the device list must be refreshed.
    DeviceChange,
}

/// `usButtonFlags` bits of a raw mouse report.
const RI_MOUSE_WHEEL: u16 = 0x0400;
const RI_MOUSE_HWHEEL: u16 = 0x0800;
/// The ten button down/up bits.
const RI_MOUSE_BUTTON_MASK: u16 = 0x03FF;

/// Splits one raw mouse report into the event kinds the mouse hook will
/// report for it.
///
/// A report can carry motion and a button or wheel transition at once; the
/// hook sees those as separate messages, so each needs its own queued event.
/// A report with neither is a (zero-length) move.
pub fn raw_mouse_kinds(button_flags: u16, moved: bool) -> Vec<MouseEventKind> {
    let mut kinds = Vec::with_capacity(2);
    if moved {
        kinds.push(MouseEventKind::Move);
    }
    if button_flags & (RI_MOUSE_WHEEL | RI_MOUSE_HWHEEL) != 0 {
        kinds.push(MouseEventKind::Wheel);
    } else if button_flags & RI_MOUSE_BUTTON_MASK != 0 {
        kinds.push(MouseEventKind::Button);
    }
    if kinds.is_empty() {
        kinds.push(MouseEventKind::Move);
    }
    kinds
}

// ── Late starts ───────────────────────────────────────────────────────────────

/// Hands a channel thread that missed its startup deadline to a reaper.
///
/// The caller has already reported failure, so whatever the thread sets up
/// must not survive: if it still reports ready, `teardown` runs with what it
/// reported.  A thread that reports an error has cleaned up after itself.
pub fn reap_late_start<T, F>(ready: Receiver<Result<T, String>>, step: PlatformStep, teardown: F)
where
    T: Send + 'static,
    F: FnOnce(T) -> Result<(), PlatformError> + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name("kapture-reaper".to_string())
        .spawn(move || match ready.recv() {
            Ok(Ok(started)) => match teardown(started) {
                Ok(()) => info!(%step, "late-starting channel thread torn down"),
                Err(err) => {
                    error!(%step, error = %err, "late-starting channel thread left running")
                }
            },
            Ok(Err(reason)) => {
                debug!(%step, reason = %reason, "late-starting channel thread failed on its own")
            }
            Err(_) => debug!(%step, "channel thread exited without reporting"),
        });
    if let Err(e) = spawned {
        error!(%step, error = %e, "could not spawn reaper; a late channel thread may stay up");
    }
}

// ── Pump targets ──────────────────────────────────────────────────────────────

/// Where a hook channel sends its verdict requests.
#[derive(Clone)]
pub struct HookTarget {
    sender: Sender<PumpMessage<HookRequest>>,
}

impl HookTarget {
    pub fn new(sender: Sender<PumpMessage<HookRequest>>) -> Self {
        Self { sender }
    }

    /// Sends the request built by `build` and waits at most `timeout` for
    /// the answer.  `None` means the deadline passed or the pump is gone.
    pub fn request_verdict<F>(&self, build: F, timeout: Duration) -> Option<Verdict>
    where
        F: FnOnce(Sender<Verdict>) -> HookRequest,
    {
        let (reply, answer) = bounded(1);
        self.sender.send(PumpMessage::Event(build(reply))).ok()?;
        answer.recv_timeout(timeout).ok()
    }
}

/// Where a raw channel delivers its notifications.
#[derive(Clone)]
pub struct RawTarget {
    sender: Sender<PumpMessage<RawInput>>,
}

impl RawTarget {
    pub fn new(sender: Sender<PumpMessage<RawInput>>) -> Self {
        Self { sender }
    }

    /// Hands `input` to the raw pump without blocking.
    ///
    /// Returns `false` if the pump has exited.
    pub fn deliver(&self, input: RawInput) -> bool {
        self.sender.send(PumpMessage::Event(input)).is_ok()
    }
}

// ── Channel traits ────────────────────────────────────────────────────────────

/// Hook installation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookInstall {
    pub keyboard: bool,
    pub mouse: bool,
    /// Longest wait for a verdict before the event is passed through.
    pub timeout: Duration,
    /// Install in the paused state.
    pub start_suspended: bool,
}

/// The system-wide interception primitive.
#[cfg_attr(test, mockall::automock)]
pub trait HookChannel: Send + Sync {
    /// Starts intercepting and routing verdict requests to `target`.
    fn install(&self, target: HookTarget, options: HookInstall) -> Result<(), PlatformError>;
    fn uninstall(&self) -> Result<(), PlatformError>;
    /// Keeps intercepting but passes every event without asking.
    fn pause(&self) -> Result<(), PlatformError>;
    fn unpause(&self) -> Result<(), PlatformError>;
}

/// The per-device raw event subscription.
#[cfg_attr(test, mockall::automock)]
pub trait RawChannel: Send + Sync {
    fn subscribe(
        &self,
        want_mouse: bool,
        want_keyboard: bool,
        target: RawTarget,
    ) -> Result<(), PlatformError>;
    fn unsubscribe(&self) -> Result<(), PlatformError>;
    /// Lists attached keyboards and mice.
    fn enumerate_raw_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError>;
}

/// Adapts a [`RawChannel`] to the core's [`DeviceSource`].
#[derive(Clone)]
pub struct ChannelDevices(pub Arc<dyn RawChannel>);

impl DeviceSource for ChannelDevices {
    fn enumerate_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError> {
        self.0.enumerate_raw_devices()
    }
}

// ── Verdict gate ──────────────────────────────────────────────────────────────

struct Installed {
    target: HookTarget,
    options: HookInstall,
}

/// The hook-side state every [`HookChannel`] implementation shares: the
/// installed target, the pause flag and the per-category failsafe.
///
/// Once the hook pump misses a verdict deadline for a category, that
/// category passes every event without asking until the next install.
pub struct VerdictGate {
    installed: Mutex<Option<Installed>>,
    paused: AtomicBool,
    keyboard_alive: AtomicBool,
    mouse_alive: AtomicBool,
}

impl VerdictGate {
    pub fn new() -> Self {
        Self {
            installed: Mutex::new(None),
            paused: AtomicBool::new(false),
            keyboard_alive: AtomicBool::new(false),
            mouse_alive: AtomicBool::new(false),
        }
    }

    /// Arms the gate.  Returns `false` (changing nothing) if already armed.
    pub fn install(&self, target: HookTarget, options: HookInstall) -> bool {
        let mut installed = self.installed.lock();
        if installed.is_some() {
            debug!("hook already installed; ignoring install");
            return false;
        }
        self.paused.store(options.start_suspended, Ordering::SeqCst);
        self.keyboard_alive.store(options.keyboard, Ordering::SeqCst);
        self.mouse_alive.store(options.mouse, Ordering::SeqCst);
        *installed = Some(Installed { target, options });
        true
    }

    /// Disarms the gate.  Returns `false` if it was not armed.
    pub fn uninstall(&self) -> bool {
        let mut installed = self.installed.lock();
        self.keyboard_alive.store(false, Ordering::SeqCst);
        self.mouse_alive.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        installed.take().is_some()
    }

    pub fn is_installed(&self) -> bool {
        self.installed.lock().is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// # Errors
    ///
    /// Fails with [`PlatformStep::HookPause`] when the hook is not installed.
    pub fn pause(&self) -> Result<(), PlatformError> {
        self.set_paused(true, PlatformStep::HookPause)
    }

    /// # Errors
    ///
    /// Fails with [`PlatformStep::HookUnpause`] when the hook is not installed.
    pub fn unpause(&self) -> Result<(), PlatformError> {
        self.set_paused(false, PlatformStep::HookUnpause)
    }

    fn set_paused(&self, paused: bool, step: PlatformStep) -> Result<(), PlatformError> {
        let installed = self.installed.lock();
        if installed.is_none() {
            return Err(PlatformError::new(step, "hook is not installed"));
        }
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }

    /// Asks the hook pump what to do with a key event.
    pub fn keyboard_verdict(&self, notice: KeyNotice) -> Verdict {
        self.ask(&self.keyboard_alive, "keyboard", |reply| HookRequest::Keyboard {
            notice,
            reply,
        })
    }

    /// Asks the hook pump what to do with a mouse event.
    pub fn mouse_verdict(&self, notice: MouseNotice) -> Verdict {
        self.ask(&self.mouse_alive, "mouse", |reply| HookRequest::Mouse {
            notice,
            reply,
        })
    }

    fn ask<F>(&self, alive: &AtomicBool, category: &'static str, build: F) -> Verdict
    where
        F: FnOnce(Sender<Verdict>) -> HookRequest,
    {
        if self.paused.load(Ordering::SeqCst) || !alive.load(Ordering::SeqCst) {
            return Verdict::Allow;
        }
        // Clone the target out so the lock is not held across the wait.
        let Some((target, timeout)) = self
            .installed
            .lock()
            .as_ref()
            .map(|i| (i.target.clone(), i.options.timeout))
        else {
            return Verdict::Allow;
        };

        match target.request_verdict(build, timeout) {
            Some(verdict) => verdict,
            None => {
                alive.store(false, Ordering::SeqCst);
                warn!(
                    category,
                    timeout_ms = timeout.as_millis() as u64,
                    "no verdict before the message timeout; passing events until reinstall"
                );
                Verdict::Allow
            }
        }
    }
}

impl Default for VerdictGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::thread;

    fn options(timeout_ms: u64) -> HookInstall {
        HookInstall {
            keyboard: true,
            mouse: true,
            timeout: Duration::from_millis(timeout_ms),
            start_suspended: false,
        }
    }

    fn notice(vkey: u32) -> KeyNotice {
        KeyNotice {
            vkey,
            scan_code: 0,
            key_up: false,
        }
    }

    /// Spawns a thread answering every keyboard request with `verdict`.
    fn answering_target(verdict: Verdict) -> HookTarget {
        let (tx, rx) = unbounded::<PumpMessage<HookRequest>>();
        thread::spawn(move || {
            for message in rx.iter() {
                if let PumpMessage::Event(HookRequest::Keyboard { reply, .. }) = message {
                    let _ = reply.send(verdict);
                }
            }
        });
        HookTarget::new(tx)
    }

    #[test]
    fn test_uninstalled_gate_allows_without_asking() {
        let gate = VerdictGate::new();
        assert_eq!(gate.keyboard_verdict(notice(0x41)), Verdict::Allow);
    }

    #[test]
    fn test_installed_gate_returns_pump_verdict() {
        // Arrange
        let gate = VerdictGate::new();
        gate.install(answering_target(Verdict::Block), options(500));

        // Act
        let verdict = gate.keyboard_verdict(notice(0x20));

        // Assert
        assert_eq!(verdict, Verdict::Block);
    }

    #[test]
    fn test_paused_gate_allows_without_asking() {
        let gate = VerdictGate::new();
        gate.install(answering_target(Verdict::Block), options(500));

        gate.pause().unwrap();

        assert!(gate.is_paused());
        assert_eq!(gate.keyboard_verdict(notice(0x20)), Verdict::Allow);
    }

    #[test]
    fn test_missed_deadline_disables_category_until_reinstall() {
        // Arrange: a pump that never answers
        let (tx, rx) = unbounded::<PumpMessage<HookRequest>>();
        let gate = VerdictGate::new();
        gate.install(HookTarget::new(tx), options(20));

        // Act
        let first = gate.keyboard_verdict(notice(0x20));
        let queued_after_first = rx.len();
        let second = gate.keyboard_verdict(notice(0x20));

        // Assert: the second event was not even sent to the pump
        assert_eq!(first, Verdict::Allow);
        assert_eq!(second, Verdict::Allow);
        assert_eq!(rx.len(), queued_after_first);

        // Reinstalling re-arms the category.
        gate.uninstall();
        gate.install(answering_target(Verdict::Block), options(500));
        assert_eq!(gate.keyboard_verdict(notice(0x20)), Verdict::Block);
    }

    #[test]
    fn test_pause_fails_when_not_installed() {
        let gate = VerdictGate::new();

        let err = gate.pause().unwrap_err();

        assert_eq!(err.step, PlatformStep::HookPause);
        assert_eq!(gate.unpause().unwrap_err().step, PlatformStep::HookUnpause);
    }

    #[test]
    fn test_second_install_is_ignored() {
        let gate = VerdictGate::new();
        assert!(gate.install(answering_target(Verdict::Allow), options(500)));
        assert!(!gate.install(answering_target(Verdict::Block), options(500)));
        assert_eq!(gate.keyboard_verdict(notice(0x20)), Verdict::Allow);
    }

    #[test]
    fn test_install_with_start_suspended_begins_paused() {
        let gate = VerdictGate::new();
        let mut opts = options(500);
        opts.start_suspended = true;

        gate.install(answering_target(Verdict::Block), opts);

        assert!(gate.is_paused());
        assert_eq!(gate.keyboard_verdict(notice(0x20)), Verdict::Allow);
    }

    #[test]
    fn test_raw_mouse_report_with_motion_and_button_yields_both_kinds() {
        assert_eq!(
            raw_mouse_kinds(0x0001, true),
            vec![MouseEventKind::Move, MouseEventKind::Button]
        );
        assert_eq!(
            raw_mouse_kinds(0x0400, true),
            vec![MouseEventKind::Move, MouseEventKind::Wheel]
        );
    }

    #[test]
    fn test_raw_mouse_report_without_motion_yields_one_kind() {
        assert_eq!(raw_mouse_kinds(0x0002, false), vec![MouseEventKind::Button]);
        assert_eq!(raw_mouse_kinds(0x0800, false), vec![MouseEventKind::Wheel]);
        assert_eq!(raw_mouse_kinds(0, false), vec![MouseEventKind::Move]);
        assert_eq!(raw_mouse_kinds(0, true), vec![MouseEventKind::Move]);
    }

    #[test]
    fn test_thread_ready_after_deadline_is_torn_down() {
        // Arrange
        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let (torn_tx, torn_rx) = bounded::<u32>(1);
        reap_late_start(ready_rx, PlatformStep::HookInstall, move |thread_id| {
            let _ = torn_tx.send(thread_id);
            Ok(())
        });

        // Act: the thread comes up after the caller gave up
        ready_tx.send(Ok(4242)).unwrap();

        // Assert
        assert_eq!(torn_rx.recv_timeout(Duration::from_secs(2)), Ok(4242));
    }

    #[test]
    fn test_thread_failing_after_deadline_is_not_torn_down() {
        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let (torn_tx, torn_rx) = bounded::<u32>(1);
        reap_late_start(ready_rx, PlatformStep::RawSubscribe, move |thread_id| {
            let _ = torn_tx.send(thread_id);
            Ok(())
        });

        ready_tx.send(Err("RegisterRawInputDevices: denied".to_string())).unwrap();

        // The teardown closure is dropped unused, closing its channel.
        assert!(torn_rx.recv_timeout(Duration::from_secs(2)).is_err());
    }

    #[test]
    fn test_platform_error_display_names_the_step() {
        let err = PlatformError::new(PlatformStep::RawSubscribe, "access denied");
        assert_eq!(err.to_string(), "raw input subscribe failed: access denied");
    }
}
