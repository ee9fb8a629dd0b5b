//! In-memory dialog simulator.
//!
//! Stands in for a live foreign application on any platform: tests script a
//! dialog layout, inject faults (toggles that do not take, controls that
//! die, the whole dialog closing) and then drive the real engine through
//! the same [`NativeBackend`] seam the Win32 backend implements.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tracing::debug;

use crate::errors::AutomationError;
use crate::platforms::NativeBackend;
use crate::snapshot::{Bounds, ControlHandle, ControlNode};

struct SimState {
    nodes: Vec<ControlNode>,
    checked: HashMap<ControlHandle, bool>,
    dead: HashSet<ControlHandle>,
    /// Toggles dispatched to these handles succeed but change nothing,
    /// imitating a foreign control that swallows input.
    inert: HashSet<ControlHandle>,
    closed: bool,
    /// Armed by `close_dialog_after_dispatches`: the toggle that crosses the
    /// limit still gets its verification read, then the dialog is gone.
    close_after: Option<u32>,
    grace_reads: u32,
    dispatches: HashMap<ControlHandle, u32>,
    next_raw: isize,
}

/// Scriptable fake of a CPRS-style dialog.
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    root: ControlHandle,
}

impl SimulatedBackend {
    pub fn new(title: &str) -> Self {
        let root = ControlHandle::from_raw(0x1000);
        let root_node = ControlNode {
            handle: root,
            class_name: "TfrmRemDlg".to_string(),
            bounds: Bounds::new(0, 0, 640, 480),
            parent: None,
            visible: true,
            enabled: true,
            text: title.to_string(),
        };
        Self {
            state: Mutex::new(SimState {
                nodes: vec![root_node],
                checked: HashMap::new(),
                dead: HashSet::new(),
                inert: HashSet::new(),
                closed: false,
                close_after: None,
                grace_reads: 0,
                dispatches: HashMap::new(),
                next_raw: 0x1001,
            }),
            root,
        }
    }

    pub fn root(&self) -> ControlHandle {
        self.root
    }

    fn add_node(
        &self,
        parent: ControlHandle,
        class_name: &str,
        text: &str,
        bounds: Bounds,
    ) -> ControlHandle {
        let mut state = self.state.lock().unwrap();
        let handle = ControlHandle::from_raw(state.next_raw);
        state.next_raw += 1;
        state.nodes.push(ControlNode {
            handle,
            class_name: class_name.to_string(),
            bounds,
            parent: Some(parent),
            visible: bounds.width > 0 && bounds.height > 0,
            enabled: true,
            text: text.to_string(),
        });
        handle
    }

    pub fn add_group(&self, parent: ControlHandle, caption: &str, bounds: Bounds) -> ControlHandle {
        self.add_node(parent, "TGroupBox", caption, bounds)
    }

    pub fn add_scroll_box(&self, parent: ControlHandle, bounds: Bounds) -> ControlHandle {
        self.add_node(parent, "TScrollBox", "", bounds)
    }

    pub fn add_checkbox(
        &self,
        parent: ControlHandle,
        caption: &str,
        bounds: Bounds,
        checked: bool,
    ) -> ControlHandle {
        let handle = self.add_node(parent, "TORCheckBox", caption, bounds);
        self.state.lock().unwrap().checked.insert(handle, checked);
        handle
    }

    pub fn add_button(&self, parent: ControlHandle, caption: &str, bounds: Bounds) -> ControlHandle {
        self.add_node(parent, "TButton", caption, bounds)
    }

    pub fn add_static(&self, parent: ControlHandle, caption: &str, bounds: Bounds) -> ControlHandle {
        self.add_node(parent, "TLabel", caption, bounds)
    }

    // ---- fault and state injection -------------------------------------

    /// Flip a box behind the engine's back, as an operator would.
    pub fn set_checked(&self, handle: ControlHandle, checked: bool) {
        self.state.lock().unwrap().checked.insert(handle, checked);
    }

    pub fn is_checked(&self, handle: ControlHandle) -> bool {
        *self
            .state
            .lock()
            .unwrap()
            .checked
            .get(&handle)
            .unwrap_or(&false)
    }

    /// Make future toggles of this control succeed without effect.
    pub fn make_inert(&self, handle: ControlHandle) {
        self.state.lock().unwrap().inert.insert(handle);
    }

    /// Kill a single control mid-session.
    pub fn kill(&self, handle: ControlHandle) {
        self.state.lock().unwrap().dead.insert(handle);
    }

    /// Close the whole dialog. Every handle in it becomes invalid.
    pub fn close_dialog(&self) {
        self.state.lock().unwrap().closed = true;
    }

    /// Close the dialog once `n` toggles have been dispatched, the way the
    /// foreign application dismisses its own window mid-automation. The
    /// crossing toggle still settles and verifies; every access after that
    /// fails.
    pub fn close_dialog_after_dispatches(&self, n: u32) {
        self.state.lock().unwrap().close_after = Some(n);
    }

    /// Toggle inputs dispatched to one control so far.
    pub fn dispatch_count(&self, handle: ControlHandle) -> u32 {
        *self
            .state
            .lock()
            .unwrap()
            .dispatches
            .get(&handle)
            .unwrap_or(&0)
    }

    pub fn total_dispatches(&self) -> u32 {
        self.state.lock().unwrap().dispatches.values().sum()
    }
}

impl SimState {
    fn is_live(&self, handle: ControlHandle) -> bool {
        !self.closed
            && !self.dead.contains(&handle)
            && self.nodes.iter().any(|n| n.handle == handle)
    }

    fn total_dispatched(&self) -> u32 {
        self.dispatches.values().sum()
    }

    /// Apply a pending deferred close. Called at the top of every read and
    /// toggle; consumes the grace read granted to the crossing toggle's
    /// verification first.
    fn tick_deferred_close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(limit) = self.close_after {
            if self.total_dispatched() >= limit {
                if self.grace_reads > 0 {
                    self.grace_reads -= 1;
                } else {
                    self.closed = true;
                }
            }
        }
    }
}

impl NativeBackend for SimulatedBackend {
    fn is_window_valid(&self, handle: ControlHandle) -> bool {
        self.state.lock().unwrap().is_live(handle)
    }

    fn enumerate_tree(&self, root: ControlHandle) -> Result<Vec<ControlNode>, AutomationError> {
        let state = self.state.lock().unwrap();
        if !state.is_live(root) {
            return Err(AutomationError::EnumerationFailed(format!(
                "simulated root {:#x} is closed",
                root.raw()
            )));
        }
        // Controls killed mid-session simply drop out of the pass, the way
        // a vanished HWND drops out of EnumChildWindows.
        let nodes: Vec<ControlNode> = state
            .nodes
            .iter()
            .filter(|n| !state.dead.contains(&n.handle))
            .cloned()
            .collect();
        debug!(count = nodes.len(), "simulated enumeration pass");
        Ok(nodes)
    }

    fn read_check_state(&self, handle: ControlHandle) -> Result<bool, AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.tick_deferred_close();
        if !state.is_live(handle) {
            return Err(AutomationError::PlatformError(format!(
                "simulated window {:#x} is gone",
                handle.raw()
            )));
        }
        Ok(*state.checked.get(&handle).unwrap_or(&false))
    }

    fn toggle(&self, handle: ControlHandle) -> Result<(), AutomationError> {
        let mut state = self.state.lock().unwrap();
        state.tick_deferred_close();
        if !state.is_live(handle) {
            return Err(AutomationError::PlatformError(format!(
                "simulated window {:#x} is gone",
                handle.raw()
            )));
        }
        *state.dispatches.entry(handle).or_insert(0) += 1;
        if state.close_after == Some(state.total_dispatched()) {
            state.grace_reads = 1;
        }
        if state.inert.contains(&handle) {
            return Ok(());
        }
        let current = *state.checked.get(&handle).unwrap_or(&false);
        state.checked.insert(handle, !current);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Snapshot;

    #[test]
    fn capture_sees_scripted_controls() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        let group = sim.add_group(sim.root(), "Assessments", Bounds::new(10, 10, 500, 200));
        sim.add_checkbox(group, "Fall Risk", Bounds::new(20, 30, 120, 17), false);

        let snapshot = Snapshot::capture(&sim, sim.root()).unwrap();
        assert_eq!(snapshot.len(), 3);
    }

    #[test]
    fn killed_control_drops_out_of_enumeration() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        let cb = sim.add_checkbox(sim.root(), "Pain", Bounds::new(20, 30, 120, 17), false);
        sim.kill(cb);

        let snapshot = Snapshot::capture(&sim, sim.root()).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert!(sim.read_check_state(cb).is_err());
    }

    #[test]
    fn closed_dialog_fails_enumeration() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        sim.close_dialog();
        let err = Snapshot::capture(&sim, sim.root()).unwrap_err();
        assert!(matches!(err, AutomationError::EnumerationFailed(_)));
    }

    #[test]
    fn toggle_flips_state_and_counts_dispatches() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        let cb = sim.add_checkbox(sim.root(), "Pain", Bounds::new(20, 30, 120, 17), false);

        sim.toggle(cb).unwrap();
        assert!(sim.is_checked(cb));
        sim.toggle(cb).unwrap();
        assert!(!sim.is_checked(cb));
        assert_eq!(sim.dispatch_count(cb), 2);
    }

    #[test]
    fn deferred_close_lets_the_crossing_toggle_verify_then_kills_the_dialog() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        let a = sim.add_checkbox(sim.root(), "Pain", Bounds::new(20, 30, 120, 17), false);
        let b = sim.add_checkbox(sim.root(), "Fall Risk", Bounds::new(20, 55, 120, 17), false);
        sim.close_dialog_after_dispatches(1);

        sim.toggle(a).unwrap();
        // The settle/verify read of the toggle that crossed the limit
        // still sees the dialog.
        assert!(sim.read_check_state(a).unwrap());
        // Everything afterwards finds it gone.
        assert!(sim.read_check_state(b).is_err());
        assert!(sim.toggle(b).is_err());
        assert!(!sim.is_window_valid(sim.root()));
    }

    #[test]
    fn inert_control_accepts_input_without_changing() {
        let sim = SimulatedBackend::new("Reminder Dialog");
        let cb = sim.add_checkbox(sim.root(), "Pain", Bounds::new(20, 30, 120, 17), false);
        sim.make_inert(cb);

        sim.toggle(cb).unwrap();
        assert!(!sim.is_checked(cb));
        assert_eq!(sim.dispatch_count(cb), 1);
    }
}
