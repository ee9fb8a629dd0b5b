//! Platform backends.
//!
//! Every native call the engine makes goes through [`NativeBackend`], so the
//! whole pipeline can run against the in-memory simulator on any platform.
//! The foreign window is externally owned: backends only read from it and
//! dispatch input to it, never destroy it.

use std::sync::Arc;

use crate::errors::AutomationError;
use crate::snapshot::{ControlHandle, ControlNode};

/// Read and input primitives against a foreign window tree.
pub trait NativeBackend: Send + Sync {
    /// Whether the handle refers to a live window right now.
    fn is_window_valid(&self, handle: ControlHandle) -> bool;

    /// Enumerate every descendant of `root` (root included) in native
    /// enumeration order. Children that vanish mid-pass are skipped, not
    /// propagated; fails only when the root itself is gone.
    fn enumerate_tree(&self, root: ControlHandle) -> Result<Vec<ControlNode>, AutomationError>;

    /// Read the current checked state of a checkbox-style control.
    fn read_check_state(&self, handle: ControlHandle) -> Result<bool, AutomationError>;

    /// Dispatch a single toggle input to the control. Does not wait for the
    /// foreign application to settle; the executor owns timing.
    fn toggle(&self, handle: ControlHandle) -> Result<(), AutomationError>;
}

/// Resolves the foreign application's active dialog.
///
/// Called at the start of every reconciliation cycle; the handle is never
/// cached across cycles.
pub trait RootLocator: Send + Sync {
    fn resolve(&self) -> Result<ControlHandle, AutomationError>;
}

/// A locator that always yields the same handle. Useful with the simulator
/// and for callers that resolve the root themselves.
pub struct FixedRoot(pub ControlHandle);

impl RootLocator for FixedRoot {
    fn resolve(&self) -> Result<ControlHandle, AutomationError> {
        Ok(self.0)
    }
}

pub mod sim;

#[cfg(target_os = "windows")]
pub mod windows;

/// Create the native backend for the current platform.
pub fn create_backend() -> Result<Arc<dyn NativeBackend>, AutomationError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::Win32Backend::new()))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(AutomationError::UnsupportedPlatform(
            "native dialog automation is only available on Windows; use the simulator backend elsewhere"
                .to_string(),
        ))
    }
}
