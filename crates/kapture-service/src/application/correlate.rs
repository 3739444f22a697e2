//! Correlation: what the two pumps do with each message.
//!
//! The raw pump runs a [`RawIngest`]: every raw notification becomes a typed
//! event parked in the [`EventQueue`] (or a device refresh, for hot-plug
//! notices).
//!
//! The hook pump runs a [`Correlator`]: every hook request pulls the
//! matching parked event out of the queue, has the [`Dispatcher`] run the
//! device's handler chain, and answers the hook with a [`Verdict`].
//!
//! # Matching
//!
//! A key event matches on (virtual key, transition).  The hook reports
//! left/right modifier codes while raw input reports the generic ones, so
//! both sides are folded through [`generic_vkey`] first.
//!
//! # Timeouts
//!
//! The queue wait is bounded by the correlation timeout.  When it expires
//! the event is passed through and a warning logged; an event that could not
//! be attributed to a device is never blocked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kapture_core::{Decision, Dispatcher, EventQueue, KeyboardEvent, MouseEvent};
use tracing::{debug, info, trace, warn};

use crate::infrastructure::channels::{
    ChannelDevices, HookRequest, KeyNotice, MouseNotice, RawInput, Verdict,
};

const VK_SHIFT: u32 = 0x10;
const VK_CONTROL: u32 = 0x11;
const VK_MENU: u32 = 0x12;
const VK_LSHIFT: u32 = 0xA0;
const VK_RSHIFT: u32 = 0xA1;
const VK_LCONTROL: u32 = 0xA2;
const VK_RCONTROL: u32 = 0xA3;
const VK_LMENU: u32 = 0xA4;
const VK_RMENU: u32 = 0xA5;

/// Folds left/right modifier codes into their generic code.
pub fn generic_vkey(vkey: u32) -> u32 {
    match vkey {
        VK_LSHIFT | VK_RSHIFT => VK_SHIFT,
        VK_LCONTROL | VK_RCONTROL => VK_CONTROL,
        VK_LMENU | VK_RMENU => VK_MENU,
        other => other,
    }
}

/// Whether a parked raw key event is the one the hook is reporting.
fn same_keystroke(event: &KeyboardEvent, notice: &KeyNotice) -> bool {
    generic_vkey(event.vkey()) == generic_vkey(notice.vkey) && event.is_key_up() == notice.key_up
}

/// How one hook request was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationOutcome {
    /// The event went through its device's chain.
    Dispatched(Decision),
    /// Capture is suspended; nothing was dispatched.
    Suspended,
    /// No matching raw event arrived in time.
    TimedOut,
}

impl CorrelationOutcome {
    /// Only a dispatched `Consume` blocks the event.
    pub fn verdict(self) -> Verdict {
        match self {
            CorrelationOutcome::Dispatched(decision) if decision.blocks() => Verdict::Block,
            _ => Verdict::Allow,
        }
    }
}

/// Hook pump handler.
pub struct Correlator {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<EventQueue>,
    suspended: Arc<AtomicBool>,
    timeout: Duration,
}

impl Correlator {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<EventQueue>,
        suspended: Arc<AtomicBool>,
        timeout: Duration,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            suspended,
            timeout,
        }
    }

    /// Settles `request` and sends the verdict back to the hook.
    pub fn handle(&self, request: HookRequest) {
        let (verdict, reply) = match request {
            HookRequest::Keyboard { notice, reply } => (self.correlate_key(notice).verdict(), reply),
            HookRequest::Mouse { notice, reply } => (self.correlate_mouse(notice).verdict(), reply),
        };
        // The hook may have given up waiting already.
        if reply.send(verdict).is_err() {
            debug!(?verdict, "hook stopped waiting before the verdict was ready");
        }
    }

    pub fn correlate_key(&self, notice: KeyNotice) -> CorrelationOutcome {
        if self.suspended.load(Ordering::SeqCst) {
            return CorrelationOutcome::Suspended;
        }
        let matched = self
            .queue
            .keyboard
            .dequeue_matching(|event| same_keystroke(event, &notice), self.timeout);
        let Some(mut event) = matched else {
            warn!(
                vkey = notice.vkey,
                key_up = notice.key_up,
                timeout_ms = self.timeout.as_millis() as u64,
                "no raw keyboard event to correlate; passing through"
            );
            return CorrelationOutcome::TimedOut;
        };
        let decision = self.dispatcher.dispatch_keyboard(&mut event);
        trace!(vkey = notice.vkey, key_up = notice.key_up, ?decision, "key correlated");
        CorrelationOutcome::Dispatched(decision)
    }

    pub fn correlate_mouse(&self, notice: MouseNotice) -> CorrelationOutcome {
        if self.suspended.load(Ordering::SeqCst) {
            return CorrelationOutcome::Suspended;
        }
        let matched = self
            .queue
            .mouse
            .dequeue_matching(|event| event.kind() == notice.kind, self.timeout);
        let Some(mut event) = matched else {
            warn!(
                kind = ?notice.kind,
                timeout_ms = self.timeout.as_millis() as u64,
                "no raw mouse event to correlate; passing through"
            );
            return CorrelationOutcome::TimedOut;
        };
        let decision = self.dispatcher.dispatch_mouse(&mut event);
        trace!(kind = ?notice.kind, ?decision, "mouse event correlated");
        CorrelationOutcome::Dispatched(decision)
    }
}

/// Raw pump handler.
pub struct RawIngest {
    dispatcher: Arc<Dispatcher>,
    queue: Arc<EventQueue>,
    suspended: Arc<AtomicBool>,
    devices: ChannelDevices,
}

impl RawIngest {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        queue: Arc<EventQueue>,
        suspended: Arc<AtomicBool>,
        devices: ChannelDevices,
    ) -> Self {
        Self {
            dispatcher,
            queue,
            suspended,
            devices,
        }
    }

    pub fn handle(&self, input: RawInput) {
        match input {
            RawInput::Keyboard {
                device,
                vkey,
                scan_code,
                message,
                key_up,
            } => {
                if self.suspended.load(Ordering::SeqCst) {
                    return;
                }
                let event = KeyboardEvent::new(device, vkey, scan_code, message, key_up);
                if !self.queue.keyboard.enqueue(event) {
                    trace!(vkey, "keyboard queue stopped; raw event dropped");
                }
            }
            RawInput::Mouse { device, kind } => {
                if self.suspended.load(Ordering::SeqCst) {
                    return;
                }
                if !self.queue.mouse.enqueue(MouseEvent::new(kind, device)) {
                    trace!(?kind, "mouse queue stopped; raw event dropped");
                }
            }
            RawInput::DeviceChange => self.refresh_devices(),
        }
    }

    fn refresh_devices(&self) {
        match self.dispatcher.refresh(&self.devices) {
            Ok(delta) if !delta.is_empty() => info!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                "device list changed"
            ),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "device refresh after hot-plug failed"),
        }
    }
}
