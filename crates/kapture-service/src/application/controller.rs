//! CaptureController: the capture session lifecycle.
//!
//! ```text
//!            start_capture                 suspend_capture
//!  Stopped ──────────────► Starting ──► Running ◄──────────► Suspended
//!     ▲                       │            │    resume_capture    │
//!     │      (rollback)       │            │ stop_capture         │
//!     ├───────────────────────┘            ▼                      │
//!     └──────────────────────────────── Stopping ◄────────────────┘
//! ```
//!
//! # Starting
//!
//! `start_capture` takes an initial device snapshot, starts the
//! [`EventQueue`], spawns the hook pump and the raw pump, pings both, then
//! subscribes raw input and installs the hook.  If any step fails every step
//! already taken is undone before the error is returned, so a failed start
//! always leaves the controller Stopped.  Failures hit while undoing are
//! reported in [`CaptureError::RollbackFailed`].
//!
//! # Stopping
//!
//! The queue is stopped first so a hook pump blocked in a dequeue wakes up,
//! then the hook is uninstalled (no new verdict requests), raw input is
//! unsubscribed, and both pumps are asked to quit and joined with a bounded
//! wait.
//!
//! # Suspending
//!
//! Suspending pauses the hook, which keeps intercepting but passes every
//! event without asking.  Raw input stays subscribed; the raw pump drops
//! raw events while suspended.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kapture_core::{
    DeviceIdentity, Dispatcher, EnumerationError, EventQueue, KeyboardHandler, MouseHandler,
    QueueSettings, RegistrationError,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::application::correlate::{Correlator, RawIngest};
use crate::application::pump::PumpHandle;
use crate::infrastructure::channels::{
    ChannelDevices, HookChannel, HookInstall, HookRequest, HookTarget, PlatformError, RawChannel,
    RawInput, RawTarget,
};

// ── Errors ────────────────────────────────────────────────────────────────────

/// A lifecycle call made in the wrong state.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("capture is already running")]
    AlreadyRunning,
    #[error("capture is already suspended")]
    AlreadySuspended,
    #[error("capture is not running")]
    NotRunning,
    #[error("capture is not suspended")]
    NotSuspended,
    #[error("capture is starting or stopping")]
    Busy,
}

/// Errors surfaced by [`CaptureController`].
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture configuration: {0}")]
    Configuration(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Enumeration(#[from] EnumerationError),

    #[error("{cause} (rollback also failed: {})", join_failures(.failures))]
    RollbackFailed {
        cause: Box<CaptureError>,
        failures: Vec<PlatformError>,
    },
}

fn join_failures(failures: &[PlatformError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// ── Options ───────────────────────────────────────────────────────────────────

/// Shortest message timeout `start_capture` accepts.  Anything below the
/// pump round-trip would trip the hook failsafe on the first event.
pub const MIN_MESSAGE_TIMEOUT: Duration = Duration::from_millis(50);

/// Arguments of [`CaptureController::start_capture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    pub want_mouse: bool,
    pub want_keyboard: bool,
    pub start_suspended: bool,
    /// How long the hook waits for a verdict.
    pub message_timeout: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            want_mouse: true,
            want_keyboard: true,
            start_suspended: false,
            message_timeout: Duration::from_millis(5000),
        }
    }
}

/// Tuning that is fixed for the controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    /// Upper bound on the hook pump's queue wait.  Clamped to half the
    /// message timeout at start.
    pub correlation_timeout: Duration,
    pub queue: QueueSettings,
    pub startup_timeout: Duration,
    pub join_timeout: Duration,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            correlation_timeout: Duration::from_millis(250),
            queue: QueueSettings::default(),
            startup_timeout: Duration::from_millis(5000),
            join_timeout: Duration::from_millis(2000),
        }
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Stopped,
    Starting,
    Running,
    Suspended,
    Stopping,
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Resources held by one capture session.  Every field records whether the
/// matching step has been taken, so teardown undoes exactly those.
#[derive(Default)]
struct Session {
    hook_pump: Option<PumpHandle<HookRequest>>,
    raw_pump: Option<PumpHandle<RawInput>>,
    raw_subscribed: bool,
    hook_installed: bool,
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Owns the channels, the queue and the dispatcher of a capture service.
pub struct CaptureController {
    hook: Arc<dyn HookChannel>,
    raw: Arc<dyn RawChannel>,
    devices: ChannelDevices,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<EventQueue>,
    suspended: Arc<AtomicBool>,
    settings: ControllerSettings,
    state: Mutex<CaptureState>,
    session: Mutex<Option<Session>>,
}

impl CaptureController {
    pub fn new(
        hook: Arc<dyn HookChannel>,
        raw: Arc<dyn RawChannel>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            hook,
            devices: ChannelDevices(Arc::clone(&raw)),
            raw,
            dispatcher: Arc::new(Dispatcher::new()),
            queue: Arc::new(EventQueue::new(settings.queue)),
            suspended: Arc::new(AtomicBool::new(false)),
            settings,
            state: Mutex::new(CaptureState::Stopped),
            session: Mutex::new(None),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn state(&self) -> CaptureState {
        *self.state.lock()
    }

    /// `true` while Running or Suspended.
    pub fn is_running(&self) -> bool {
        matches!(
            self.state(),
            CaptureState::Running | CaptureState::Suspended
        )
    }

    pub fn is_suspended(&self) -> bool {
        self.state() == CaptureState::Suspended
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Starts a capture session.  Synchronous: returns once both pumps are
    /// up and the platform channels are armed, or everything is rolled back.
    ///
    /// # Errors
    ///
    /// - [`CaptureError::Configuration`] if neither device class is wanted
    ///   or the message timeout is below [`MIN_MESSAGE_TIMEOUT`].
    /// - [`LifecycleError::AlreadyRunning`] / [`LifecycleError::Busy`] unless
    ///   Stopped.
    /// - [`CaptureError::Enumeration`] if the initial device snapshot fails.
    /// - [`CaptureError::Platform`] if a pump or channel step fails, or
    ///   [`CaptureError::RollbackFailed`] if undoing it failed too.
    pub fn start_capture(&self, options: CaptureOptions) -> Result<(), CaptureError> {
        if !options.want_keyboard && !options.want_mouse {
            return Err(CaptureError::Configuration(
                "neither keyboard nor mouse capture requested".to_string(),
            ));
        }
        if options.message_timeout < MIN_MESSAGE_TIMEOUT {
            return Err(CaptureError::Configuration(format!(
                "message timeout {:?} is below the {:?} minimum",
                options.message_timeout, MIN_MESSAGE_TIMEOUT
            )));
        }
        {
            let mut state = self.state.lock();
            match *state {
                CaptureState::Stopped => *state = CaptureState::Starting,
                CaptureState::Running | CaptureState::Suspended => {
                    return Err(LifecycleError::AlreadyRunning.into())
                }
                CaptureState::Starting | CaptureState::Stopping => {
                    return Err(LifecycleError::Busy.into())
                }
            }
        }

        let mut session = Session::default();
        match self.bring_up(options, &mut session) {
            Ok(()) => {
                *self.session.lock() = Some(session);
                let next = if options.start_suspended {
                    CaptureState::Suspended
                } else {
                    CaptureState::Running
                };
                *self.state.lock() = next;
                info!(
                    keyboard = options.want_keyboard,
                    mouse = options.want_mouse,
                    suspended = options.start_suspended,
                    "capture started"
                );
                Ok(())
            }
            Err(cause) => {
                warn!(error = %cause, "capture start failed; rolling back");
                self.queue.stop();
                let failures = self.tear_down(session);
                self.suspended.store(false, Ordering::SeqCst);
                *self.state.lock() = CaptureState::Stopped;
                if failures.is_empty() {
                    Err(cause)
                } else {
                    for failure in &failures {
                        error!(error = %failure, "rollback step failed");
                    }
                    Err(CaptureError::RollbackFailed {
                        cause: Box::new(cause),
                        failures,
                    })
                }
            }
        }
    }

    fn bring_up(&self, options: CaptureOptions, session: &mut Session) -> Result<(), CaptureError> {
        // No session without an initial device snapshot.
        let delta = self.dispatcher.refresh(&self.devices)?;
        info!(
            devices = self.dispatcher.registry().len(),
            added = delta.added.len(),
            "devices enumerated"
        );

        self.suspended.store(options.start_suspended, Ordering::SeqCst);
        self.queue.start();

        let correlation_timeout = self
            .settings
            .correlation_timeout
            .min(options.message_timeout / 2);
        let correlator = Correlator::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.queue),
            Arc::clone(&self.suspended),
            correlation_timeout,
        );
        let hook_pump = PumpHandle::spawn("hook", self.settings.startup_timeout, move || {
            Ok(move |request: HookRequest| correlator.handle(request))
        })
        .map_err(PlatformError::from)?;
        let hook_target = HookTarget::new(hook_pump.sender());
        session.hook_pump = Some(hook_pump);

        let ingest = RawIngest::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.queue),
            Arc::clone(&self.suspended),
            self.devices.clone(),
        );
        let raw_pump = PumpHandle::spawn("raw", self.settings.startup_timeout, move || {
            Ok(move |input: RawInput| ingest.handle(input))
        })
        .map_err(PlatformError::from)?;
        let raw_target = RawTarget::new(raw_pump.sender());
        session.raw_pump = Some(raw_pump);

        if let Some(pump) = &session.hook_pump {
            pump.ping(self.settings.startup_timeout)
                .map_err(PlatformError::from)?;
        }
        if let Some(pump) = &session.raw_pump {
            pump.ping(self.settings.startup_timeout)
                .map_err(PlatformError::from)?;
        }

        self.raw
            .subscribe(options.want_mouse, options.want_keyboard, raw_target)?;
        session.raw_subscribed = true;

        self.hook.install(
            hook_target,
            HookInstall {
                keyboard: options.want_keyboard,
                mouse: options.want_mouse,
                timeout: options.message_timeout,
                start_suspended: options.start_suspended,
            },
        )?;
        session.hook_installed = true;
        Ok(())
    }

    /// Undoes every step `session` records, in stop order, and returns the
    /// steps that failed.
    fn tear_down(&self, session: Session) -> Vec<PlatformError> {
        let mut failures = Vec::new();
        if session.hook_installed {
            if let Err(err) = self.hook.uninstall() {
                failures.push(err);
            }
        }
        if session.raw_subscribed {
            if let Err(err) = self.raw.unsubscribe() {
                failures.push(err);
            }
        }
        for result in [
            session
                .hook_pump
                .map(|pump| pump.shutdown(self.settings.join_timeout)),
            session
                .raw_pump
                .map(|pump| pump.shutdown(self.settings.join_timeout)),
        ]
        .into_iter()
        .flatten()
        {
            if let Err(err) = result {
                failures.push(err.into());
            }
        }
        failures
    }

    /// Ends the capture session.
    ///
    /// Always leaves the controller Stopped once past the state check.
    ///
    /// # Errors
    ///
    /// - [`LifecycleError::NotRunning`] unless Running or Suspended (state
    ///   unchanged).
    /// - [`CaptureError::Platform`] with the first teardown step that failed.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        {
            let mut state = self.state.lock();
            match *state {
                CaptureState::Running | CaptureState::Suspended => *state = CaptureState::Stopping,
                CaptureState::Starting | CaptureState::Stopping => {
                    return Err(LifecycleError::Busy.into())
                }
                CaptureState::Stopped => return Err(LifecycleError::NotRunning.into()),
            }
        }

        self.queue.stop();
        let failures = match self.session.lock().take() {
            Some(session) => self.tear_down(session),
            None => Vec::new(),
        };
        self.suspended.store(false, Ordering::SeqCst);
        *self.state.lock() = CaptureState::Stopped;

        for failure in &failures {
            error!(error = %failure, "capture stop step failed");
        }
        match failures.into_iter().next() {
            Some(first) => Err(first.into()),
            None => {
                info!("capture stopped");
                Ok(())
            }
        }
    }

    /// Lets every event pass without running handlers.
    ///
    /// # Errors
    ///
    /// [`LifecycleError`] unless Running; [`CaptureError::Platform`] if the
    /// hook cannot be paused (state unchanged).
    pub fn suspend_capture(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        match *state {
            CaptureState::Running => {}
            CaptureState::Suspended => return Err(LifecycleError::AlreadySuspended.into()),
            CaptureState::Starting | CaptureState::Stopping => {
                return Err(LifecycleError::Busy.into())
            }
            CaptureState::Stopped => return Err(LifecycleError::NotRunning.into()),
        }
        self.hook.pause()?;
        self.suspended.store(true, Ordering::SeqCst);
        *state = CaptureState::Suspended;
        info!("capture suspended");
        Ok(())
    }

    /// Restores dispatch after [`suspend_capture`](Self::suspend_capture).
    ///
    /// # Errors
    ///
    /// [`LifecycleError::NotSuspended`] unless Suspended;
    /// [`CaptureError::Platform`] if the hook cannot be unpaused.
    pub fn resume_capture(&self) -> Result<(), CaptureError> {
        let mut state = self.state.lock();
        if *state != CaptureState::Suspended {
            return Err(LifecycleError::NotSuspended.into());
        }
        // Entries parked before the suspension are stale.
        self.queue.start();
        self.suspended.store(false, Ordering::SeqCst);
        if let Err(err) = self.hook.unpause() {
            self.suspended.store(true, Ordering::SeqCst);
            return Err(err.into());
        }
        *state = CaptureState::Running;
        info!("capture resumed");
        Ok(())
    }

    // ── Devices ───────────────────────────────────────────────────────────────

    /// Refreshes the device list and returns the keyboards.
    ///
    /// From inside a handler callback the refresh is skipped and the last
    /// snapshot returned.
    pub fn enumerate_keyboards(&self) -> Vec<Arc<DeviceIdentity>> {
        self.refresh_for_probe();
        self.dispatcher.keyboards()
    }

    /// Refreshes the device list and returns the mice.
    pub fn enumerate_mice(&self) -> Vec<Arc<DeviceIdentity>> {
        self.refresh_for_probe();
        self.dispatcher.mice()
    }

    fn refresh_for_probe(&self) {
        if let Err(err) = self.dispatcher.refresh(&self.devices) {
            warn!(error = %err, "device refresh failed; returning the previous snapshot");
        }
    }

    // ── Handlers ──────────────────────────────────────────────────────────────

    /// # Errors
    ///
    /// [`CaptureError::Registration`] if `pattern` does not compile or the
    /// call comes from inside a handler callback.
    pub fn register_keyboard_handler(
        &self,
        pattern: &str,
        handler: Arc<dyn KeyboardHandler>,
    ) -> Result<(), CaptureError> {
        Ok(self.dispatcher.register_keyboard_handler(pattern, handler)?)
    }

    /// # Errors
    ///
    /// [`CaptureError::Registration`] if `pattern` does not compile or the
    /// call comes from inside a handler callback.
    pub fn register_mouse_handler(
        &self,
        pattern: &str,
        handler: Arc<dyn MouseHandler>,
    ) -> Result<(), CaptureError> {
        Ok(self.dispatcher.register_mouse_handler(pattern, handler)?)
    }

    pub fn unregister_keyboard_handler(&self, handler: &Arc<dyn KeyboardHandler>) -> bool {
        self.dispatcher.unregister_keyboard_handler(handler)
    }

    pub fn unregister_mouse_handler(&self, handler: &Arc<dyn MouseHandler>) -> bool {
        self.dispatcher.unregister_mouse_handler(handler)
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(err) = self.stop_capture() {
                error!(error = %err, "capture did not stop cleanly on drop");
            }
        }
    }
}
