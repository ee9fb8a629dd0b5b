//! Per-cycle snapshots of a foreign window tree.
//!
//! A [`Snapshot`] is captured fresh for every reconciliation cycle and
//! discarded at the end of it. Native handles are recycled by the OS, so a
//! handle is only meaningful against the snapshot (and cycle) it was
//! captured in.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::errors::AutomationError;
use crate::platforms::NativeBackend;

/// Opaque reference to a native control.
///
/// On Windows this wraps an `HWND` value. It carries no liveness guarantee:
/// the window behind it can vanish at any moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ControlHandle(pub(crate) isize);

impl ControlHandle {
    pub fn from_raw(raw: isize) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> isize {
        self.0
    }
}

/// Screen-space bounding rectangle of a control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Bounds {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// One control as observed during a single enumeration pass.
///
/// Never mutated after capture; never persisted across cycles.
#[derive(Debug, Clone)]
pub struct ControlNode {
    pub handle: ControlHandle,
    pub class_name: String,
    pub bounds: Bounds,
    pub parent: Option<ControlHandle>,
    pub visible: bool,
    pub enabled: bool,
    pub text: String,
}

static CYCLE_COUNTER: AtomicU64 = AtomicU64::new(0);

// Foreign trees are not supposed to contain parent cycles, but a recycled
// handle can make one appear. Cap the ancestry walk rather than spin.
const MAX_ANCESTRY_DEPTH: usize = 64;

/// Arena-style, immutable view of the window tree under one root, in native
/// enumeration order.
#[derive(Debug)]
pub struct Snapshot {
    nodes: Vec<ControlNode>,
    by_handle: HashMap<ControlHandle, usize>,
    cycle: u64,
}

impl Snapshot {
    /// Capture the control tree under `root`.
    ///
    /// Fails with [`AutomationError::EnumerationFailed`] only when the root
    /// handle itself is invalid at call time. Individual children that
    /// vanish mid-pass are skipped by the backend, not propagated.
    pub fn capture(
        backend: &dyn NativeBackend,
        root: ControlHandle,
    ) -> Result<Self, AutomationError> {
        if !backend.is_window_valid(root) {
            return Err(AutomationError::EnumerationFailed(format!(
                "root handle {:#x} is not a live window",
                root.raw()
            )));
        }

        let nodes = backend.enumerate_tree(root)?;
        let mut by_handle: HashMap<ControlHandle, usize> = HashMap::with_capacity(nodes.len());
        for (idx, node) in nodes.iter().enumerate() {
            match by_handle.entry(node.handle) {
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(idx);
                }
                std::collections::hash_map::Entry::Occupied(_) => {
                    // Enumeration callbacks can surface a window twice if the
                    // tree reshuffles mid-pass. First sighting wins.
                    warn!(
                        handle = node.handle.raw(),
                        "duplicate handle during enumeration, keeping first occurrence"
                    );
                }
            }
        }

        let cycle = CYCLE_COUNTER.fetch_add(1, Ordering::Relaxed);
        debug!(
            cycle,
            control_count = nodes.len(),
            "captured window tree snapshot"
        );

        Ok(Self {
            nodes,
            by_handle,
            cycle,
        })
    }

    /// Build a snapshot directly from already-captured nodes. Used by tests
    /// and by backends that enumerate in their own fashion.
    pub fn from_nodes(nodes: Vec<ControlNode>) -> Self {
        let by_handle = nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (node.handle, idx))
            .collect();
        Self {
            nodes,
            by_handle,
            cycle: CYCLE_COUNTER.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Controls in native enumeration order.
    pub fn nodes(&self) -> &[ControlNode] {
        &self.nodes
    }

    pub fn get(&self, handle: ControlHandle) -> Option<&ControlNode> {
        self.by_handle.get(&handle).map(|&idx| &self.nodes[idx])
    }

    /// Walk the parent chain of `handle`, innermost ancestor first.
    ///
    /// Stops at the first parent not present in the snapshot (the root's own
    /// parent, typically) or at a defensive depth cap.
    pub fn ancestors(&self, handle: ControlHandle) -> Vec<&ControlNode> {
        let mut out = Vec::new();
        let mut current = self.get(handle).and_then(|n| n.parent);
        while let Some(parent_handle) = current {
            if out.len() >= MAX_ANCESTRY_DEPTH {
                warn!(
                    handle = handle.raw(),
                    "ancestry walk exceeded depth cap, truncating"
                );
                break;
            }
            match self.get(parent_handle) {
                Some(parent) => {
                    out.push(parent);
                    current = parent.parent;
                }
                None => break,
            }
        }
        out
    }
}
