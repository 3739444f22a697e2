//! kapture-service library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the `kapture` binary share the same module tree.

pub mod application;
pub mod infrastructure;

pub use application::controller::{
    CaptureController, CaptureError, CaptureOptions, CaptureState, ControllerSettings,
    LifecycleError,
};
