//! Win32 backend.
//!
//! The foreign application is a classic VCL program, so its controls are
//! plain HWNDs with meaningful class names (`TORCheckBox`, `TGroupBox`, …).
//! Everything here goes through window enumeration and `BM_*`/`WM_*`
//! messages; the UI Automation layer is not involved.

use std::ffi::c_void;

use tracing::debug;

use windows::core::BOOL;
use windows::Win32::Foundation::{HWND, LPARAM, RECT, WPARAM};
use windows::Win32::UI::Input::KeyboardAndMouse::IsWindowEnabled;
use windows::Win32::UI::WindowsAndMessaging::{
    EnumChildWindows, EnumWindows, GetAncestor, GetClassNameW, GetWindowRect, GetWindowTextW,
    IsWindow, IsWindowVisible, SendMessageW, BM_CLICK, BM_GETCHECK, BST_CHECKED, GA_PARENT,
    WM_GETTEXT, WM_GETTEXTLENGTH,
};

use crate::errors::AutomationError;
use crate::platforms::{NativeBackend, RootLocator};
use crate::snapshot::{Bounds, ControlHandle, ControlNode};

fn to_hwnd(handle: ControlHandle) -> HWND {
    HWND(handle.raw() as *mut c_void)
}

fn from_hwnd(hwnd: HWND) -> ControlHandle {
    ControlHandle::from_raw(hwnd.0 as isize)
}

/// Backend over raw Win32 window enumeration and messages.
///
/// Holds no window state of its own: handles are converted per call, so the
/// backend is freely shareable across threads.
#[derive(Default)]
pub struct Win32Backend;

impl Win32Backend {
    pub fn new() -> Self {
        Self
    }
}

struct EnumContext {
    handles: Vec<HWND>,
}

unsafe extern "system" fn collect_children(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let context = &mut *(lparam.0 as *mut EnumContext);
    context.handles.push(hwnd);
    BOOL::from(true)
}

fn class_name_of(hwnd: HWND) -> String {
    let mut buf = [0u16; 256];
    let len = unsafe { GetClassNameW(hwnd, &mut buf) };
    String::from_utf16_lossy(&buf[..len.max(0) as usize])
}

/// Window text via `WM_GETTEXT`. `GetWindowTextW` does not cross process
/// boundaries for child controls; sending the message does.
fn text_of(hwnd: HWND) -> String {
    let len = unsafe { SendMessageW(hwnd, WM_GETTEXTLENGTH, None, None) }.0;
    if len <= 0 {
        return String::new();
    }
    let mut buf = vec![0u16; len as usize + 1];
    let copied = unsafe {
        SendMessageW(
            hwnd,
            WM_GETTEXT,
            Some(WPARAM(buf.len())),
            Some(LPARAM(buf.as_mut_ptr() as isize)),
        )
    }
    .0;
    String::from_utf16_lossy(&buf[..copied.max(0) as usize])
}

fn node_for(hwnd: HWND, root: HWND) -> Option<ControlNode> {
    // The window can vanish between enumeration and property reads; a dead
    // handle just drops out of the pass.
    if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
        return None;
    }

    let mut rect = RECT::default();
    if unsafe { GetWindowRect(hwnd, &mut rect) }.is_err() {
        return None;
    }
    let bounds = Bounds::new(
        rect.left,
        rect.top,
        rect.right - rect.left,
        rect.bottom - rect.top,
    );

    let parent = if hwnd == root {
        None
    } else {
        let parent = unsafe { GetAncestor(hwnd, GA_PARENT) };
        if parent.0.is_null() {
            None
        } else {
            Some(from_hwnd(parent))
        }
    };

    // Zero-size controls are part of the tree but cannot be seen.
    let visible =
        unsafe { IsWindowVisible(hwnd) }.as_bool() && bounds.width > 0 && bounds.height > 0;

    Some(ControlNode {
        handle: from_hwnd(hwnd),
        class_name: class_name_of(hwnd),
        bounds,
        parent,
        visible,
        enabled: unsafe { IsWindowEnabled(hwnd) }.as_bool(),
        text: text_of(hwnd),
    })
}

impl NativeBackend for Win32Backend {
    fn is_window_valid(&self, handle: ControlHandle) -> bool {
        unsafe { IsWindow(Some(to_hwnd(handle))) }.as_bool()
    }

    fn enumerate_tree(&self, root: ControlHandle) -> Result<Vec<ControlNode>, AutomationError> {
        let root_hwnd = to_hwnd(root);
        if !unsafe { IsWindow(Some(root_hwnd)) }.as_bool() {
            return Err(AutomationError::EnumerationFailed(format!(
                "root handle {:#x} is not a live window",
                root.raw()
            )));
        }

        let mut context = EnumContext {
            handles: vec![root_hwnd],
        };
        // EnumChildWindows walks all descendants; its return value only
        // reflects the last callback invocation, so it is not checked.
        unsafe {
            let _ = EnumChildWindows(
                Some(root_hwnd),
                Some(collect_children),
                LPARAM(&mut context as *mut EnumContext as isize),
            );
        }

        let mut nodes = Vec::with_capacity(context.handles.len());
        let mut skipped = 0usize;
        for hwnd in context.handles {
            match node_for(hwnd, root_hwnd) {
                Some(node) => nodes.push(node),
                None => skipped += 1,
            }
        }
        if skipped > 0 {
            debug!(skipped, "controls vanished during enumeration pass");
        }
        Ok(nodes)
    }

    fn read_check_state(&self, handle: ControlHandle) -> Result<bool, AutomationError> {
        let hwnd = to_hwnd(handle);
        if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            return Err(AutomationError::PlatformError(format!(
                "window {:#x} is gone",
                handle.raw()
            )));
        }
        let state = unsafe { SendMessageW(hwnd, BM_GETCHECK, None, None) };
        Ok(state.0 as u32 == BST_CHECKED.0)
    }

    fn toggle(&self, handle: ControlHandle) -> Result<(), AutomationError> {
        let hwnd = to_hwnd(handle);
        if !unsafe { IsWindow(Some(hwnd)) }.as_bool() {
            return Err(AutomationError::PlatformError(format!(
                "window {:#x} is gone",
                handle.raw()
            )));
        }
        // BM_CLICK runs the control's own click handling, so the foreign
        // application sees the same event sequence a user produces.
        unsafe { SendMessageW(hwnd, BM_CLICK, None, None) };
        Ok(())
    }
}

struct TitleSearch {
    fragment: String,
    found: Option<HWND>,
}

unsafe extern "system" fn find_by_title(hwnd: HWND, lparam: LPARAM) -> BOOL {
    let search = &mut *(lparam.0 as *mut TitleSearch);
    if !IsWindowVisible(hwnd).as_bool() {
        return BOOL::from(true);
    }
    let mut buf = [0u16; 512];
    let len = GetWindowTextW(hwnd, &mut buf);
    let title = String::from_utf16_lossy(&buf[..len.max(0) as usize]).to_lowercase();
    if title.contains(&search.fragment) {
        search.found = Some(hwnd);
        return BOOL::from(false);
    }
    BOOL::from(true)
}

/// Locates the foreign dialog by a case-insensitive title fragment across
/// top-level windows. Resolution happens fresh on every call.
pub struct TitleLocator {
    fragment: String,
}

impl TitleLocator {
    pub fn new(fragment: &str) -> Self {
        Self {
            fragment: fragment.to_lowercase(),
        }
    }
}

impl RootLocator for TitleLocator {
    fn resolve(&self) -> Result<ControlHandle, AutomationError> {
        let mut search = TitleSearch {
            fragment: self.fragment.clone(),
            found: None,
        };
        // EnumWindows reports an error when the callback stops the walk
        // early, which is exactly what a successful find does.
        let _ = unsafe {
            EnumWindows(
                Some(find_by_title),
                LPARAM(&mut search as *mut TitleSearch as isize),
            )
        };
        search.found.map(from_hwnd).ok_or_else(|| {
            AutomationError::EnumerationFailed(format!(
                "no visible top-level window matching {:?}",
                self.fragment
            ))
        })
    }
}
