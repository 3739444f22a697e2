//! Windows hook and raw channels.
//!
//! - [`WindowsHookChannel`] installs `WH_KEYBOARD_LL` / `WH_MOUSE_LL` on a
//!   dedicated message-loop thread.  Each callback asks the shared
//!   [`VerdictGate`] for a verdict and returns `LRESULT(1)` to swallow the
//!   event when told to block.
//! - [`WindowsRawChannel`] registers for Raw Input on a message-only window
//!   owned by its own thread and forwards `WM_INPUT` and
//!   `WM_INPUT_DEVICE_CHANGE` to the raw pump.
//!
//! Hook callbacks run on the thread that installed the hook, so each thread
//! keeps its routing state in a `thread_local!` rather than a global.
//!
//! # Safety
//!
//! This module uses `unsafe` code exclusively for Windows API FFI calls.
//! All `unsafe` blocks are annotated with `// SAFETY:` comments.

#![cfg(target_os = "windows")]

use std::cell::RefCell;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::bounded;
use kapture_core::{DeviceClass, DeviceHandle, EnumerationError, MouseEventKind, RawDeviceDescriptor};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{GetLastError, HINSTANCE, HWND, LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::Input::{
    GetRawInputData, GetRawInputDeviceInfoW, GetRawInputDeviceList, RegisterRawInputDevices,
    HRAWINPUT, RAWINPUT, RAWINPUTDEVICE, RAWINPUTDEVICELIST, RAWINPUTHEADER, RIDEV_DEVNOTIFY,
    RIDEV_INPUTSINK, RIDEV_REMOVE, RIDI_DEVICENAME, RID_INPUT, RIM_TYPEKEYBOARD, RIM_TYPEMOUSE,
};
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
    GetMessageW, PeekMessageW, PostThreadMessageW, RegisterClassW, SetWindowsHookExW,
    UnhookWindowsHookEx, HC_ACTION, HHOOK, HWND_MESSAGE, KBDLLHOOKSTRUCT, MSG, PM_NOREMOVE,
    WH_KEYBOARD_LL, WH_MOUSE_LL, WINDOW_EX_STYLE, WINDOW_STYLE, WM_INPUT,
    WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDBLCLK, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDBLCLK,
    WM_MBUTTONDOWN, WM_MBUTTONUP, WM_MOUSEHWHEEL, WM_MOUSEMOVE, WM_MOUSEWHEEL, WM_QUIT,
    WM_RBUTTONDBLCLK, WM_RBUTTONDOWN, WM_RBUTTONUP, WM_SYSKEYDOWN, WM_SYSKEYUP, WM_USER,
    WM_XBUTTONDBLCLK, WM_XBUTTONDOWN, WM_XBUTTONUP, WINDOWS_HOOK_ID, WNDCLASSW,
};

use super::{
    raw_mouse_kinds, reap_late_start, HookChannel, HookInstall, HookTarget, KeyNotice,
    MouseNotice, PlatformError, PlatformStep, RawChannel, RawInput, RawTarget, Verdict,
    VerdictGate,
};

const HID_USAGE_PAGE_GENERIC: u16 = 0x01;
const HID_USAGE_GENERIC_MOUSE: u16 = 0x02;
const HID_USAGE_GENERIC_KEYBOARD: u16 = 0x06;

const WM_INPUT_DEVICE_CHANGE: u32 = 0x00FE;
const ERROR_CLASS_ALREADY_EXISTS: u32 = 1410;

/// `RAWKEYBOARD.Flags` bit set on key release.
const RI_KEY_BREAK: u16 = 0x0001;

/// How long `install`/`subscribe` wait for their thread to come up.
const THREAD_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

const RAW_WINDOW_CLASS: &str = "KaptureRawInputWindow";

type HookProc = unsafe extern "system" fn(i32, WPARAM, LPARAM) -> LRESULT;

thread_local! {
    /// Set on the hook thread only.
    static HOOK_GATE: RefCell<Option<Arc<VerdictGate>>> = const { RefCell::new(None) };
    /// Set on the raw input thread only.
    static RAW_SINK: RefCell<Option<RawTarget>> = const { RefCell::new(None) };
}

/// A message-loop thread and the id used to post `WM_QUIT` to it.
struct LoopThread {
    thread_id: u32,
    join: JoinHandle<()>,
}

impl LoopThread {
    /// Posts `WM_QUIT` and joins the thread.
    fn quit(self, step: PlatformStep) -> Result<(), PlatformError> {
        // SAFETY: posting to a thread id we received from that thread; the
        // message queue was created before the id was reported.
        unsafe { PostThreadMessageW(self.thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) }
            .map_err(|e| PlatformError::new(step, format!("PostThreadMessageW: {e}")))?;
        self.join
            .join()
            .map_err(|_| PlatformError::new(step, "message loop thread panicked"))
    }
}

/// Forces creation of the calling thread's message queue.
fn ensure_message_queue() {
    let mut msg = MSG::default();
    // SAFETY: PeekMessageW with PM_NOREMOVE only inspects the queue.
    unsafe {
        let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
    }
}

/// Runs `GetMessageW` until `WM_QUIT` (or an error).
fn run_message_loop() {
    let mut msg = MSG::default();
    // SAFETY: standard Win32 GetMessage/DispatchMessage loop on the owning thread.
    unsafe {
        while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
            DispatchMessageW(&msg);
        }
    }
}

// ── Hook channel ──────────────────────────────────────────────────────────────

/// Low-level keyboard/mouse hook channel.
pub struct WindowsHookChannel {
    gate: Arc<VerdictGate>,
    thread: Mutex<Option<LoopThread>>,
}

impl WindowsHookChannel {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(VerdictGate::new()),
            thread: Mutex::new(None),
        }
    }
}

impl Default for WindowsHookChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl HookChannel for WindowsHookChannel {
    fn install(&self, target: HookTarget, options: HookInstall) -> Result<(), PlatformError> {
        let mut slot = self.thread.lock();
        if !self.gate.install(target, options) {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let gate = Arc::clone(&self.gate);
        let spawned = thread::Builder::new()
            .name("kapture-hook".to_string())
            .spawn(move || hook_thread(gate, options, ready_tx));
        let join = match spawned {
            Ok(join) => join,
            Err(e) => {
                self.gate.uninstall();
                return Err(PlatformError::new(PlatformStep::HookInstall, e.to_string()));
            }
        };

        match ready_rx.recv_timeout(THREAD_STARTUP_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                info!(keyboard = options.keyboard, mouse = options.mouse, "low-level hooks installed");
                *slot = Some(LoopThread { thread_id, join });
                Ok(())
            }
            Ok(Err(reason)) => {
                self.gate.uninstall();
                let _ = join.join();
                Err(PlatformError::new(PlatformStep::HookInstall, reason))
            }
            Err(_) => {
                self.gate.uninstall();
                reap_late_start(ready_rx, PlatformStep::HookInstall, move |thread_id| {
                    LoopThread { thread_id, join }.quit(PlatformStep::HookInstall)
                });
                Err(PlatformError::new(
                    PlatformStep::HookInstall,
                    "hook thread did not start in time",
                ))
            }
        }
    }

    fn uninstall(&self) -> Result<(), PlatformError> {
        self.gate.uninstall();
        match self.thread.lock().take() {
            Some(thread) => {
                thread.quit(PlatformStep::HookUninstall)?;
                info!("low-level hooks removed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn pause(&self) -> Result<(), PlatformError> {
        self.gate.pause()
    }

    fn unpause(&self) -> Result<(), PlatformError> {
        self.gate.unpause()
    }
}

fn hook_thread(
    gate: Arc<VerdictGate>,
    options: HookInstall,
    ready: crossbeam_channel::Sender<Result<u32, String>>,
) {
    HOOK_GATE.with(|slot| *slot.borrow_mut() = Some(gate));
    ensure_message_queue();

    let mut hooks: Vec<HHOOK> = Vec::with_capacity(2);
    let wanted: [(bool, WINDOWS_HOOK_ID, HookProc, &str); 2] = [
        (options.keyboard, WH_KEYBOARD_LL, keyboard_hook_proc, "WH_KEYBOARD_LL"),
        (options.mouse, WH_MOUSE_LL, mouse_hook_proc, "WH_MOUSE_LL"),
    ];
    for (enabled, id, proc, name) in wanted {
        if !enabled {
            continue;
        }
        // SAFETY: low-level hooks need no module handle; this thread runs a
        // message loop for as long as the hook is installed.
        match unsafe { SetWindowsHookExW(id, Some(proc), None, 0) } {
            Ok(hook) => hooks.push(hook),
            Err(e) => {
                unhook_all(&hooks);
                let _ = ready.send(Err(format!("{name}: {e}")));
                return;
            }
        }
    }

    // SAFETY: trivially safe query of the current thread id.
    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready.send(Ok(thread_id));

    run_message_loop();

    unhook_all(&hooks);
    HOOK_GATE.with(|slot| slot.borrow_mut().take());
    debug!("hook thread exiting");
}

fn unhook_all(hooks: &[HHOOK]) {
    for hook in hooks {
        // SAFETY: each handle came from SetWindowsHookExW on this thread.
        if let Err(e) = unsafe { UnhookWindowsHookEx(*hook) } {
            error!(error = %e, "UnhookWindowsHookEx failed");
        }
    }
}

fn gate_verdict(ask: impl FnOnce(&VerdictGate) -> Verdict) -> Verdict {
    HOOK_GATE.with(|slot| slot.borrow().as_deref().map(ask).unwrap_or(Verdict::Allow))
}

/// Low-level keyboard hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread with `l_param` pointing at a
/// `KBDLLHOOKSTRUCT` when `n_code == HC_ACTION`.
unsafe extern "system" fn keyboard_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code != HC_ACTION as i32 {
        // SAFETY: must call CallNextHookEx when n_code < 0.
        return unsafe { CallNextHookEx(None, n_code, w_param, l_param) };
    }

    // SAFETY: l_param points to a KBDLLHOOKSTRUCT when n_code == HC_ACTION.
    let kbs = unsafe { &*(l_param.0 as *const KBDLLHOOKSTRUCT) };
    let key_up = match w_param.0 as u32 {
        WM_KEYDOWN | WM_SYSKEYDOWN => false,
        WM_KEYUP | WM_SYSKEYUP => true,
        // SAFETY: forwarding an event we do not handle.
        _ => return unsafe { CallNextHookEx(None, n_code, w_param, l_param) },
    };
    let notice = KeyNotice {
        vkey: kbs.vkCode,
        scan_code: kbs.scanCode,
        key_up,
    };

    if gate_verdict(|gate| gate.keyboard_verdict(notice)).blocks() {
        return LRESULT(1);
    }
    // SAFETY: forward the event to the next hook in the chain.
    unsafe { CallNextHookEx(None, n_code, w_param, l_param) }
}

/// Low-level mouse hook callback.
///
/// # Safety
///
/// Called by Windows on the hook thread; must return quickly.
unsafe extern "system" fn mouse_hook_proc(
    n_code: i32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    if n_code != HC_ACTION as i32 {
        // SAFETY: must call CallNextHookEx when n_code < 0.
        return unsafe { CallNextHookEx(None, n_code, w_param, l_param) };
    }

    let kind = match w_param.0 as u32 {
        WM_MOUSEMOVE => MouseEventKind::Move,
        WM_MOUSEWHEEL | WM_MOUSEHWHEEL => MouseEventKind::Wheel,
        WM_LBUTTONDOWN | WM_LBUTTONUP | WM_LBUTTONDBLCLK | WM_RBUTTONDOWN | WM_RBUTTONUP
        | WM_RBUTTONDBLCLK | WM_MBUTTONDOWN | WM_MBUTTONUP | WM_MBUTTONDBLCLK
        | WM_XBUTTONDOWN | WM_XBUTTONUP | WM_XBUTTONDBLCLK => MouseEventKind::Button,
        // SAFETY: forwarding an event we do not handle.
        _ => return unsafe { CallNextHookEx(None, n_code, w_param, l_param) },
    };
    if gate_verdict(|gate| gate.mouse_verdict(MouseNotice { kind })).blocks() {
        return LRESULT(1);
    }
    // SAFETY: forward the event to the next hook in the chain.
    unsafe { CallNextHookEx(None, n_code, w_param, l_param) }
}

// ── Raw channel ───────────────────────────────────────────────────────────────

/// Raw Input channel backed by a message-only window.
pub struct WindowsRawChannel {
    thread: Mutex<Option<LoopThread>>,
}

impl WindowsRawChannel {
    pub fn new() -> Self {
        Self {
            thread: Mutex::new(None),
        }
    }
}

impl Default for WindowsRawChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl RawChannel for WindowsRawChannel {
    fn subscribe(
        &self,
        want_mouse: bool,
        want_keyboard: bool,
        target: RawTarget,
    ) -> Result<(), PlatformError> {
        let mut slot = self.thread.lock();
        if slot.is_some() {
            return Err(PlatformError::new(
                PlatformStep::RawSubscribe,
                "already subscribed",
            ));
        }

        let usages: Vec<u16> = [
            (want_keyboard, HID_USAGE_GENERIC_KEYBOARD),
            (want_mouse, HID_USAGE_GENERIC_MOUSE),
        ]
        .into_iter()
        .filter_map(|(wanted, usage)| wanted.then_some(usage))
        .collect();

        let (ready_tx, ready_rx) = bounded::<Result<u32, String>>(1);
        let join = thread::Builder::new()
            .name("kapture-raw-input".to_string())
            .spawn(move || raw_thread(usages, target, ready_tx))
            .map_err(|e| PlatformError::new(PlatformStep::RawSubscribe, e.to_string()))?;

        match ready_rx.recv_timeout(THREAD_STARTUP_TIMEOUT) {
            Ok(Ok(thread_id)) => {
                info!(want_mouse, want_keyboard, "raw input registered");
                *slot = Some(LoopThread { thread_id, join });
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = join.join();
                Err(PlatformError::new(PlatformStep::RawSubscribe, reason))
            }
            Err(_) => {
                reap_late_start(ready_rx, PlatformStep::RawSubscribe, move |thread_id| {
                    LoopThread { thread_id, join }.quit(PlatformStep::RawUnsubscribe)
                });
                Err(PlatformError::new(
                    PlatformStep::RawSubscribe,
                    "raw input thread did not start in time",
                ))
            }
        }
    }

    fn unsubscribe(&self) -> Result<(), PlatformError> {
        match self.thread.lock().take() {
            Some(thread) => {
                thread.quit(PlatformStep::RawUnsubscribe)?;
                info!("raw input unregistered");
                Ok(())
            }
            None => Err(PlatformError::new(
                PlatformStep::RawUnsubscribe,
                "not subscribed",
            )),
        }
    }

    fn enumerate_raw_devices(&self) -> Result<Vec<RawDeviceDescriptor>, EnumerationError> {
        enumerate_devices()
    }
}

fn raw_devices(usages: &[u16], hwnd: HWND, remove: bool) -> Vec<RAWINPUTDEVICE> {
    usages
        .iter()
        .map(|&usage| RAWINPUTDEVICE {
            usUsagePage: HID_USAGE_PAGE_GENERIC,
            usUsage: usage,
            dwFlags: if remove {
                RIDEV_REMOVE
            } else {
                RIDEV_INPUTSINK | RIDEV_DEVNOTIFY
            },
            // RIDEV_REMOVE requires a null target.
            hwndTarget: if remove { HWND::default() } else { hwnd },
        })
        .collect()
}

fn raw_thread(
    usages: Vec<u16>,
    target: RawTarget,
    ready: crossbeam_channel::Sender<Result<u32, String>>,
) {
    RAW_SINK.with(|slot| *slot.borrow_mut() = Some(target));
    ensure_message_queue();

    let hwnd = match create_message_window() {
        Ok(hwnd) => hwnd,
        Err(reason) => {
            let _ = ready.send(Err(reason));
            return;
        }
    };

    let devices = raw_devices(&usages, hwnd, false);
    // SAFETY: `devices` is a valid slice of RAWINPUTDEVICE targeting a window
    // owned by this thread.
    let registered = unsafe {
        RegisterRawInputDevices(&devices, std::mem::size_of::<RAWINPUTDEVICE>() as u32)
    };
    if let Err(e) = registered {
        // SAFETY: the window was created on this thread.
        unsafe {
            let _ = DestroyWindow(hwnd);
        }
        let _ = ready.send(Err(format!("RegisterRawInputDevices: {e}")));
        return;
    }

    // SAFETY: trivially safe query of the current thread id.
    let thread_id = unsafe { GetCurrentThreadId() };
    let _ = ready.send(Ok(thread_id));

    run_message_loop();

    let removal = raw_devices(&usages, hwnd, true);
    // SAFETY: removal entries carry a null target as RIDEV_REMOVE requires.
    if let Err(e) =
        unsafe { RegisterRawInputDevices(&removal, std::mem::size_of::<RAWINPUTDEVICE>() as u32) }
    {
        error!(error = %e, "raw input removal failed");
    }
    // SAFETY: the window was created on this thread.
    unsafe {
        let _ = DestroyWindow(hwnd);
    }
    RAW_SINK.with(|slot| slot.borrow_mut().take());
    debug!("raw input thread exiting");
}

fn to_wstring(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn create_message_window() -> Result<HWND, String> {
    let class_name = to_wstring(RAW_WINDOW_CLASS);
    // SAFETY: class registration and window creation with a NUL-terminated
    // class name that outlives both calls.
    unsafe {
        let h_instance = GetModuleHandleW(None).map_err(|e| format!("GetModuleHandleW: {e}"))?;
        let wc = WNDCLASSW {
            lpfnWndProc: Some(raw_window_proc),
            hInstance: HINSTANCE(h_instance.0),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            ..Default::default()
        };
        if RegisterClassW(&wc) == 0 {
            let last_error = GetLastError();
            if last_error.0 != ERROR_CLASS_ALREADY_EXISTS {
                return Err(format!("RegisterClassW: {last_error:?}"));
            }
        }
        CreateWindowExW(
            WINDOW_EX_STYLE(0),
            PCWSTR(class_name.as_ptr()),
            PCWSTR(class_name.as_ptr()),
            WINDOW_STYLE(0),
            0,
            0,
            0,
            0,
            Some(HWND_MESSAGE),
            None,
            Some(HINSTANCE(h_instance.0)),
            None,
        )
        .map_err(|e| format!("CreateWindowExW: {e}"))
    }
}

fn deliver(input: RawInput) {
    RAW_SINK.with(|slot| {
        if let Some(target) = slot.borrow().as_ref() {
            if !target.deliver(input) {
                debug!("raw pump gone; notification dropped");
            }
        }
    });
}

unsafe extern "system" fn raw_window_proc(
    hwnd: HWND,
    msg: u32,
    w_param: WPARAM,
    l_param: LPARAM,
) -> LRESULT {
    match msg {
        WM_INPUT => {
            for input in read_raw_input(l_param) {
                deliver(input);
            }
        }
        WM_INPUT_DEVICE_CHANGE => deliver(RawInput::DeviceChange),
        _ => {}
    }
    // SAFETY: default processing; required after WM_INPUT for cleanup.
    unsafe { DefWindowProcW(hwnd, msg, w_param, l_param) }
}

fn read_raw_input(l_param: LPARAM) -> Vec<RawInput> {
    let header_size = std::mem::size_of::<RAWINPUTHEADER>() as u32;
    let mut size = 0u32;
    // SAFETY: size query for the HRAWINPUT handed to WM_INPUT.
    let result = unsafe {
        GetRawInputData(HRAWINPUT(l_param.0 as _), RID_INPUT, None, &mut size, header_size)
    };
    if result != 0 || size == 0 {
        return Vec::new();
    }

    // u64 storage keeps the RAWINPUT cast aligned.
    let mut buffer = vec![0u64; (size as usize).div_ceil(8)];
    // SAFETY: the buffer holds at least `size` bytes.
    let copied = unsafe {
        GetRawInputData(
            HRAWINPUT(l_param.0 as _),
            RID_INPUT,
            Some(buffer.as_mut_ptr() as _),
            &mut size,
            header_size,
        )
    };
    if copied != size {
        warn!("GetRawInputData returned a short read");
        return Vec::new();
    }

    // SAFETY: GetRawInputData filled the buffer with a RAWINPUT.
    let raw = unsafe { &*(buffer.as_ptr() as *const RAWINPUT) };
    let device = DeviceHandle(raw.header.hDevice.0 as usize);
    if raw.header.dwType == RIM_TYPEKEYBOARD.0 {
        // SAFETY: dwType says the union holds keyboard data.
        let keyboard = unsafe { raw.data.keyboard };
        vec![RawInput::Keyboard {
            device,
            vkey: u32::from(keyboard.VKey),
            scan_code: u32::from(keyboard.MakeCode),
            message: keyboard.Message,
            key_up: keyboard.Flags & RI_KEY_BREAK != 0,
        }]
    } else if raw.header.dwType == RIM_TYPEMOUSE.0 {
        // SAFETY: dwType says the union holds mouse data.
        let mouse = unsafe { raw.data.mouse };
        // SAFETY: the button-flags view of the union is always initialised.
        let flags = unsafe { mouse.Anonymous.Anonymous.usButtonFlags };
        let moved = mouse.lLastX != 0 || mouse.lLastY != 0;
        raw_mouse_kinds(flags, moved)
            .into_iter()
            .map(|kind| RawInput::Mouse { device, kind })
            .collect()
    } else {
        Vec::new()
    }
}

fn enumeration_error(step: &'static str) -> EnumerationError {
    // SAFETY: trivially safe read of the calling thread's last error.
    let last_error = unsafe { GetLastError() };
    EnumerationError {
        step,
        reason: format!("{last_error:?}"),
    }
}

/// Lists attached keyboards and mice; devices whose name cannot be read are
/// skipped.
fn enumerate_devices() -> Result<Vec<RawDeviceDescriptor>, EnumerationError> {
    let entry_size = std::mem::size_of::<RAWINPUTDEVICELIST>() as u32;
    let mut count = 0u32;
    // SAFETY: count query with no output buffer.
    if unsafe { GetRawInputDeviceList(None, &mut count, entry_size) } == u32::MAX {
        return Err(enumeration_error("GetRawInputDeviceList"));
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let mut list = vec![RAWINPUTDEVICELIST::default(); count as usize];
    // SAFETY: `list` holds `count` entries.
    let filled = unsafe { GetRawInputDeviceList(Some(list.as_mut_ptr()), &mut count, entry_size) };
    if filled == u32::MAX {
        return Err(enumeration_error("GetRawInputDeviceList"));
    }

    let mut devices = Vec::with_capacity(filled as usize);
    for entry in list.iter().take(filled as usize) {
        let class = if entry.dwType == RIM_TYPEKEYBOARD {
            DeviceClass::Keyboard
        } else if entry.dwType == RIM_TYPEMOUSE {
            DeviceClass::Mouse
        } else {
            continue;
        };

        let mut chars = 0u32;
        // SAFETY: size query (in characters) for a handle from the list.
        if unsafe { GetRawInputDeviceInfoW(Some(entry.hDevice), RIDI_DEVICENAME, None, &mut chars) }
            != 0
        {
            continue;
        }
        let mut name = vec![0u16; chars as usize];
        // SAFETY: `name` holds `chars` UTF-16 units.
        let written = unsafe {
            GetRawInputDeviceInfoW(
                Some(entry.hDevice),
                RIDI_DEVICENAME,
                Some(name.as_mut_ptr() as *mut _),
                &mut chars,
            )
        };
        if written == u32::MAX {
            debug!(handle = ?entry.hDevice, "device name unreadable; skipped");
            continue;
        }
        let end = name.iter().position(|&c| c == 0).unwrap_or(name.len());
        devices.push(RawDeviceDescriptor::new(
            DeviceHandle(entry.hDevice.0 as usize),
            class,
            String::from_utf16_lossy(&name[..end]),
        ));
    }
    Ok(devices)
}
