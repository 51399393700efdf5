//! Panic containment for addon and listener code.
//!
//! Addon callbacks run inside the host's own threads, so a panic in one of
//! them must not unwind through the dispatcher. Both error results and panics
//! are folded into a single `AddonResult`.

use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::{AddonError, AddonResult};

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Run `f`, converting a panic into `AddonError::Panicked`.
pub(crate) fn guarded<T>(op: &str, f: impl FnOnce() -> AddonResult<T>) -> AddonResult<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(AddonError::Panicked(format!(
            "{op}: {}",
            panic_message(payload)
        ))),
    }
}
