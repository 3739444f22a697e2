//! Thread-safe FIFO hand-off queues with bounded waits.
//!
//! # Why a queue at all? (for beginners)
//!
//! The raw channel and the hook channel report the same key press on two
//! different threads, in no guaranteed order.  The raw side knows the device;
//! the hook side holds the power to block.  The raw pump therefore *parks*
//! each detailed event here, and the hook pump *picks it up* when the matching
//! hook callback arrives, waiting a little if the raw event is late.
//!
//! # Bounded everything
//!
//! The hook side must answer the platform quickly or the hook is removed, so:
//!
//! - every wait has a deadline ([`HandoffQueue::dequeue`] returns `None` on
//!   timeout),
//! - the queue holds at most `capacity` entries (the oldest is evicted),
//! - entries older than `stale_after` are evicted before each search, so a
//!   device the hook never reports cannot clog correlation forever.
//!
//! # Stopping
//!
//! [`HandoffQueue::stop`] releases every blocked consumer with `None`, drops
//! queued entries and makes later enqueues no-ops until [`HandoffQueue::start`].

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use crate::domain::event::{KeyboardEvent, MouseEvent};

/// Default maximum number of parked events per category.
pub const DEFAULT_CAPACITY: usize = 256;

/// Default age after which an uncorrelated event is discarded.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_millis(1000);

/// Size and age limits for one hand-off queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub capacity: usize,
    pub stale_after: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

struct Entry<T> {
    item: T,
    enqueued_at: Instant,
}

struct QueueState<T> {
    entries: VecDeque<Entry<T>>,
    stopped: bool,
}

/// A single-category producer/consumer queue.
pub struct HandoffQueue<T> {
    name: &'static str,
    settings: QueueSettings,
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> HandoffQueue<T> {
    /// Creates a running, empty queue.
    pub fn new(name: &'static str, settings: QueueSettings) -> Self {
        Self {
            name,
            settings: QueueSettings {
                capacity: settings.capacity.max(1),
                ..settings
            },
            state: Mutex::new(QueueState {
                entries: VecDeque::new(),
                stopped: false,
            }),
            available: Condvar::new(),
        }
    }

    /// (Re)opens the queue, discarding anything left from a previous session.
    pub fn start(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.stopped = false;
    }

    /// Releases all blocked consumers and drops later enqueues.  Idempotent.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        state.stopped = true;
        state.entries.clear();
        drop(state);
        self.available.notify_all();
        debug!(queue = self.name, "hand-off queue stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.state.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `item` and wakes waiting consumers.  Never blocks.
    ///
    /// Returns `false` (and drops the item) if the queue is stopped.
    pub fn enqueue(&self, item: T) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        if state.entries.len() >= self.settings.capacity {
            state.entries.pop_front();
            debug!(queue = self.name, "queue full, evicted oldest entry");
        }
        state.entries.push_back(Entry {
            item,
            enqueued_at: Instant::now(),
        });
        drop(state);
        self.available.notify_all();
        true
    }

    /// Pops the head of the queue, waiting at most `timeout`.
    ///
    /// Returns `None` on timeout or if the queue is (or becomes) stopped.
    pub fn dequeue(&self, timeout: Duration) -> Option<T> {
        self.dequeue_matching(|_| true, timeout)
    }

    /// Removes and returns the oldest entry satisfying `matches`, waiting at
    /// most `timeout` for one to arrive.
    ///
    /// Non-matching entries ahead of the match stay queued for later callers
    /// (subject to the staleness and capacity limits).
    pub fn dequeue_matching<F>(&self, mut matches: F, timeout: Duration) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return None;
            }
            self.evict_stale(&mut state);
            if let Some(pos) = state.entries.iter().position(|e| matches(&e.item)) {
                return state.entries.remove(pos).map(|e| e.item);
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                if state.stopped {
                    return None;
                }
                let pos = state.entries.iter().position(|e| matches(&e.item))?;
                return state.entries.remove(pos).map(|e| e.item);
            }
        }
    }

    fn evict_stale(&self, state: &mut QueueState<T>) {
        let now = Instant::now();
        let before = state.entries.len();
        state
            .entries
            .retain(|e| now.duration_since(e.enqueued_at) < self.settings.stale_after);
        let evicted = before - state.entries.len();
        if evicted > 0 {
            trace!(queue = self.name, evicted, "evicted stale entries");
        }
    }
}

/// The keyboard and mouse hand-off queues used by one capture session.
///
/// The two categories are fully independent: FIFO order holds within a
/// category, nothing is promised across them.
pub struct EventQueue {
    pub keyboard: HandoffQueue<KeyboardEvent>,
    pub mouse: HandoffQueue<MouseEvent>,
}

impl EventQueue {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            keyboard: HandoffQueue::new("keyboard", settings),
            mouse: HandoffQueue::new("mouse", settings),
        }
    }

    pub fn start(&self) {
        self.keyboard.start();
        self.mouse.start();
    }

    pub fn stop(&self) {
        self.keyboard.stop();
        self.mouse.stop();
    }

    pub fn is_running(&self) -> bool {
        self.keyboard.is_running() && self.mouse.is_running()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(QueueSettings::default())
    }
}
