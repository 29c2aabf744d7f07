//! Top-level window enumeration used to decide whether a process still shows
//! anything to the user.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopLevelWindow {
    pub hwnd: isize,
    pub pid: u32,
    pub title: String,
    pub visible: bool,
    pub owned: bool,
    pub tool_window: bool,
    pub app_window: bool,
}

impl TopLevelWindow {
    /// Whether the shell would show a taskbar button for this window.
    pub fn is_taskbar_window(&self) -> bool {
        self.visible && (self.app_window || (!self.owned && !self.tool_window))
    }
}

#[cfg(target_os = "windows")]
pub fn top_level_windows() -> anyhow::Result<Vec<TopLevelWindow>> {
    use anyhow::Context;
    use windows::Win32::Foundation::{BOOL, HWND, LPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{
        EnumWindows, GetWindow, GetWindowLongPtrW, GetWindowTextLengthW, GetWindowTextW,
        GetWindowThreadProcessId, IsWindowVisible, GWL_EXSTYLE, GW_OWNER, WS_EX_APPWINDOW,
        WS_EX_TOOLWINDOW,
    };

    struct Ctx {
        out: Vec<TopLevelWindow>,
    }

    unsafe extern "system" fn enum_cb(hwnd: HWND, lparam: LPARAM) -> BOOL {
        let ctx = &mut *(lparam.0 as *mut Ctx);
        let mut pid = 0u32;
        let _ = GetWindowThreadProcessId(hwnd, Some(&mut pid));
        let len = GetWindowTextLengthW(hwnd);
        let title = if len > 0 {
            let mut buf = vec![0u16; len as usize + 1];
            let read = GetWindowTextW(hwnd, &mut buf);
            String::from_utf16_lossy(&buf[..read as usize])
        } else {
            String::new()
        };
        let ex_style = GetWindowLongPtrW(hwnd, GWL_EXSTYLE) as u32;
        ctx.out.push(TopLevelWindow {
            hwnd: hwnd.0 as isize,
            pid,
            title,
            visible: IsWindowVisible(hwnd).as_bool(),
            owned: !GetWindow(hwnd, GW_OWNER).unwrap_or_default().0.is_null(),
            tool_window: ex_style & WS_EX_TOOLWINDOW.0 != 0,
            app_window: ex_style & WS_EX_APPWINDOW.0 != 0,
        });
        BOOL(1)
    }

    let mut ctx = Ctx { out: Vec::new() };
    unsafe {
        let ctx_ptr = &mut ctx as *mut Ctx;
        EnumWindows(Some(enum_cb), LPARAM(ctx_ptr as isize)).context("enumerate top-level windows")?;
    }
    Ok(ctx.out)
}

#[cfg(not(target_os = "windows"))]
pub fn top_level_windows() -> anyhow::Result<Vec<TopLevelWindow>> {
    anyhow::bail!("window enumeration is only available on Windows")
}

#[cfg(target_os = "windows")]
pub fn foreground_window_pid() -> anyhow::Result<Option<u32>> {
    use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};
    unsafe {
        let hwnd = GetForegroundWindow();
        if hwnd.0.is_null() {
            return Ok(None);
        }
        let mut pid = 0u32;
        GetWindowThreadProcessId(hwnd, Some(&mut pid));
        Ok((pid != 0).then_some(pid))
    }
}

#[cfg(not(target_os = "windows"))]
pub fn foreground_window_pid() -> anyhow::Result<Option<u32>> {
    anyhow::bail!("foreground window lookup is only available on Windows")
}

#[cfg(target_os = "windows")]
pub fn post_close(hwnd: isize) -> anyhow::Result<()> {
    use anyhow::Context;
    use windows::Win32::Foundation::{HWND, LPARAM, WPARAM};
    use windows::Win32::UI::WindowsAndMessaging::{PostMessageW, WM_CLOSE};
    unsafe {
        PostMessageW(HWND(hwnd as _), WM_CLOSE, WPARAM(0), LPARAM(0))
            .with_context(|| format!("post WM_CLOSE to window {hwnd:#x}"))
    }
}

#[cfg(not(target_os = "windows"))]
pub fn post_close(_hwnd: isize) -> anyhow::Result<()> {
    anyhow::bail!("closing windows is only available on Windows")
}

/// Post a close request to every visible unowned window of `pid`. Returns how
/// many were asked.
pub fn close_windows_of_process(pid: u32) -> anyhow::Result<usize> {
    let mut asked = 0;
    for window in top_level_windows()? {
        if window.pid != pid || !window.visible || window.owned {
            continue;
        }
        match post_close(window.hwnd) {
            Ok(()) => asked += 1,
            Err(err) => tracing::debug!(pid, hwnd = window.hwnd, error = %err, "close request failed"),
        }
    }
    Ok(asked)
}
