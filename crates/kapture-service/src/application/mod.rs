//! Application layer of the capture service.
//!
//! # What lives here? (for beginners)
//!
//! This layer turns the platform-free engine in `kapture_core` into a
//! running service.  It decides *when* things happen (start, stop, suspend)
//! and *which thread* does them, but never calls an OS API itself: the
//! platform is reached only through the channel traits in
//! `infrastructure::channels`.
//!
//! # Sub-modules
//!
//! - **`controller`** – [`CaptureController`](controller::CaptureController),
//!   the lifecycle state machine with full rollback on failed starts.
//! - **`pump`** – the two worker threads (hook pump, raw pump) with their
//!   ready handshake, ping and bounded join.
//! - **`correlate`** – what each pump does per message: park raw events in
//!   the queue, match hook requests against them and dispatch.

pub mod controller;
pub mod correlate;
pub mod pump;
