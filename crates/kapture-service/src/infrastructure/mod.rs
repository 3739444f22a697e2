//! Infrastructure layer of the capture service.
//!
//! Contains OS-facing adapters: the hook and raw input channels (plus the
//! simulated ones used by tests and the demo) and configuration storage.

pub mod channels;
pub mod storage;
