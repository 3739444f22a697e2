//! Message pumps: the two long-lived worker threads of a capture session.
//!
//! A pump is a dedicated OS thread draining one channel of
//! [`PumpMessage`]s.  Besides the payload events it understands two private
//! control messages:
//!
//! - `Ping` answers on a one-shot channel, proving the thread is alive and
//!   draining its queue.
//! - `Quit` ends the loop; it is the only way a pump stops.
//!
//! # Startup handshake
//!
//! [`PumpHandle::spawn`] does not return until the new thread has built its
//! handler and reported back over a one-shot channel, so a caller knows the
//! pump is ready (or why it is not) before going on.
//!
//! # Shutdown
//!
//! [`PumpHandle::shutdown`] sends `Quit` and waits a bounded time for the
//! thread to leave its loop.  A pump that does not exit in time is reported
//! as [`PumpError::JoinTimeout`] and left detached rather than joined
//! forever.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::infrastructure::channels::{PlatformError, PlatformStep};

/// What a pump thread receives.
#[derive(Debug)]
pub enum PumpMessage<T> {
    Event(T),
    /// Liveness probe; the pump answers on the enclosed sender.
    Ping(Sender<()>),
    Quit,
}

/// Errors starting, probing or stopping a pump.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("could not spawn the {pump} pump thread: {source}")]
    Spawn {
        pump: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{pump} pump failed to initialise: {reason}")]
    Init { pump: &'static str, reason: String },

    #[error("{pump} pump did not report readiness within {timeout:?}")]
    StartupTimeout {
        pump: &'static str,
        timeout: Duration,
    },

    #[error("{pump} pump did not answer a ping within {timeout:?}")]
    Unresponsive {
        pump: &'static str,
        timeout: Duration,
    },

    #[error("{pump} pump did not exit within {timeout:?}")]
    JoinTimeout {
        pump: &'static str,
        timeout: Duration,
    },

    #[error("{pump} pump thread panicked")]
    Panicked { pump: &'static str },
}

impl PumpError {
    /// The platform step this error belongs to.
    pub fn step(&self) -> PlatformStep {
        match self {
            PumpError::Spawn { .. } | PumpError::Init { .. } | PumpError::StartupTimeout { .. } => {
                PlatformStep::PumpStart
            }
            PumpError::Unresponsive { .. } => PlatformStep::PumpPing,
            PumpError::JoinTimeout { .. } | PumpError::Panicked { .. } => PlatformStep::PumpJoin,
        }
    }
}

impl From<PumpError> for PlatformError {
    fn from(err: PumpError) -> Self {
        PlatformError::new(err.step(), err.to_string())
    }
}

/// Owner's handle on a running pump thread.
pub struct PumpHandle<T> {
    name: &'static str,
    sender: Sender<PumpMessage<T>>,
    exited: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> PumpHandle<T> {
    /// Spawns a pump thread named `kapture-<name>-pump`.
    ///
    /// `init` runs on the new thread and builds the event handler; its error
    /// is reported back to the caller.  Waits at most `startup_timeout` for
    /// the thread to report in.
    ///
    /// # Errors
    ///
    /// [`PumpError::Spawn`], [`PumpError::Init`] or
    /// [`PumpError::StartupTimeout`].
    pub fn spawn<I, H>(
        name: &'static str,
        startup_timeout: Duration,
        init: I,
    ) -> Result<Self, PumpError>
    where
        I: FnOnce() -> Result<H, String> + Send + 'static,
        H: FnMut(T) + 'static,
    {
        let (sender, receiver) = unbounded::<PumpMessage<T>>();
        let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
        let (exited_tx, exited_rx) = bounded::<()>(1);

        let thread = thread::Builder::new()
            .name(format!("kapture-{name}-pump"))
            .spawn(move || {
                let mut handler = match init() {
                    Ok(handler) => {
                        let _ = ready_tx.send(Ok(()));
                        handler
                    }
                    Err(reason) => {
                        let _ = ready_tx.send(Err(reason));
                        let _ = exited_tx.send(());
                        return;
                    }
                };
                run_loop(name, &receiver, &mut handler);
                let _ = exited_tx.send(());
            })
            .map_err(|source| PumpError::Spawn { pump: name, source })?;

        match ready_rx.recv_timeout(startup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                let _ = thread.join();
                return Err(PumpError::Init { pump: name, reason });
            }
            Err(RecvTimeoutError::Timeout) => {
                // The thread may still come up later; make sure it leaves.
                let _ = sender.send(PumpMessage::Quit);
                return Err(PumpError::StartupTimeout {
                    pump: name,
                    timeout: startup_timeout,
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                return Err(PumpError::Panicked { pump: name });
            }
        }

        info!(pump = name, "pump started");
        Ok(Self {
            name,
            sender,
            exited: exited_rx,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// A sender feeding this pump, for the platform channels.
    pub fn sender(&self) -> Sender<PumpMessage<T>> {
        self.sender.clone()
    }

    /// Round-trips a ping through the pump's queue.
    ///
    /// # Errors
    ///
    /// [`PumpError::Unresponsive`] if no answer arrives within `timeout`.
    pub fn ping(&self, timeout: Duration) -> Result<(), PumpError> {
        let unresponsive = PumpError::Unresponsive {
            pump: self.name,
            timeout,
        };
        let (pong_tx, pong_rx) = bounded(1);
        if self.sender.send(PumpMessage::Ping(pong_tx)).is_err() {
            return Err(unresponsive);
        }
        pong_rx.recv_timeout(timeout).map_err(|_| unresponsive)
    }

    /// Asks the pump to quit and joins it, waiting at most `join_timeout`.
    ///
    /// # Errors
    ///
    /// [`PumpError::JoinTimeout`] if the thread is still running after the
    /// wait, [`PumpError::Panicked`] if it died.
    pub fn shutdown(mut self, join_timeout: Duration) -> Result<(), PumpError> {
        let _ = self.sender.send(PumpMessage::Quit);
        match self.exited.recv_timeout(join_timeout) {
            // Disconnected: the thread is gone without signalling (it panicked).
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                warn!(pump = self.name, "pump did not exit in time; leaving it detached");
                self.thread.take();
                return Err(PumpError::JoinTimeout {
                    pump: self.name,
                    timeout: join_timeout,
                });
            }
        }
        if let Some(thread) = self.thread.take() {
            thread
                .join()
                .map_err(|_| PumpError::Panicked { pump: self.name })?;
        }
        info!(pump = self.name, "pump stopped");
        Ok(())
    }
}

impl<T> Drop for PumpHandle<T> {
    fn drop(&mut self) {
        if self.thread.is_some() {
            // Never block in drop; the thread exits on its own.
            let _ = self.sender.send(PumpMessage::Quit);
        }
    }
}

fn run_loop<T, H: FnMut(T)>(name: &'static str, receiver: &Receiver<PumpMessage<T>>, handler: &mut H) {
    for message in receiver.iter() {
        match message {
            PumpMessage::Event(event) => handler(event),
            PumpMessage::Ping(pong) => {
                let _ = pong.send(());
            }
            PumpMessage::Quit => {
                debug!(pump = name, "quit received");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const STARTUP: Duration = Duration::from_secs(2);
    const JOIN: Duration = Duration::from_secs(2);

    #[test]
    fn test_pump_delivers_events_in_order_and_answers_ping() {
        // Arrange
        let (seen_tx, seen_rx) = unbounded();
        let pump = PumpHandle::spawn("test", STARTUP, move || {
            Ok(move |value: u32| {
                let _ = seen_tx.send(value);
            })
        })
        .unwrap();

        // Act
        let sender = pump.sender();
        sender.send(PumpMessage::Event(1)).unwrap();
        sender.send(PumpMessage::Event(2)).unwrap();
        pump.ping(Duration::from_secs(1)).unwrap();

        // Assert: the ping came back after both events were handled
        assert_eq!(seen_rx.try_iter().collect::<Vec<_>>(), vec![1, 2]);
        pump.shutdown(JOIN).unwrap();
    }

    #[test]
    fn test_init_failure_is_reported_to_spawner() {
        let result = PumpHandle::<u32>::spawn("broken", STARTUP, || {
            Err::<fn(u32), _>("no message window".to_string())
        });

        match result {
            Err(PumpError::Init { pump, reason }) => {
                assert_eq!(pump, "broken");
                assert_eq!(reason, "no message window");
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("spawn should fail"),
        }
    }

    #[test]
    fn test_shutdown_times_out_on_a_stuck_handler() {
        // Arrange: the handler blocks until released
        let (release_tx, release_rx) = bounded::<()>(1);
        let pump = PumpHandle::spawn("stuck", STARTUP, move || {
            Ok(move |_: u32| {
                let _ = release_rx.recv();
            })
        })
        .unwrap();
        pump.sender().send(PumpMessage::Event(0)).unwrap();

        // Act
        let result = pump.shutdown(Duration::from_millis(50));

        // Assert
        assert!(matches!(result, Err(PumpError::JoinTimeout { .. })));
        let _ = release_tx.send(());
    }

    #[test]
    fn test_ping_fails_after_pump_quit() {
        // Arrange
        let handled = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&handled);
        let pump = PumpHandle::spawn("quitter", STARTUP, move || {
            Ok(move |_: u32| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
        .unwrap();

        // Act: quit behind the owner's back
        pump.sender().send(PumpMessage::Quit).unwrap();
        let result = pump.ping(Duration::from_millis(100));

        // Assert
        assert!(matches!(result, Err(PumpError::Unresponsive { .. })));
        assert_eq!(handled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_pump_error_maps_to_platform_step() {
        let err = PumpError::JoinTimeout {
            pump: "hook",
            timeout: JOIN,
        };
        let platform: PlatformError = err.into();
        assert_eq!(platform.step, PlatformStep::PumpJoin);
    }
}
