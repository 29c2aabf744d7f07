use super::guard::ProcessProbe;
use crate::win_util::{self, TopLevelWindow};
use anyhow::Result;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Process and window checks against the running system. The application
/// family is identified by executable stem (`wpp`, `wps`, ...).
pub struct SystemProcessProbe {
    family_names: Vec<String>,
    system: Mutex<System>,
}

impl SystemProcessProbe {
    pub fn new(family_names: &[String]) -> Self {
        Self {
            family_names: family_names.iter().map(|n| n.to_lowercase()).collect(),
            system: Mutex::new(System::new()),
        }
    }

    fn is_family_name(&self, process_name: &str) -> bool {
        let stem = Path::new(process_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        self.family_names.iter().any(|name| *name == stem)
    }

    fn family_pids(&self) -> HashSet<u32> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .filter(|(_, process)| self.is_family_name(&process.name().to_string_lossy()))
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }

    fn family_windows(&self) -> Result<Vec<TopLevelWindow>> {
        let pids = self.family_pids();
        Ok(win_util::top_level_windows()?
            .into_iter()
            .filter(|w| pids.contains(&w.pid))
            .collect())
    }
}

impl ProcessProbe for SystemProcessProbe {
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).is_some()
    }

    fn family_window_is_foreground(&self) -> Result<bool> {
        let Some(pid) = win_util::foreground_window_pid()? else {
            return Ok(false);
        };
        Ok(self.family_pids().contains(&pid))
    }

    fn family_has_visible_window(&self) -> Result<bool> {
        Ok(self.family_windows()?.iter().any(|w| w.visible))
    }

    fn family_has_taskbar_window(&self) -> Result<bool> {
        Ok(self
            .family_windows()?
            .iter()
            .any(TopLevelWindow::is_taskbar_window))
    }

    fn request_close(&self, pid: u32) -> Result<bool> {
        Ok(win_util::close_windows_of_process(pid)? > 0)
    }

    fn kill(&self, pid: u32) -> Result<bool> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(system.process(pid).is_some_and(|process| process.kill()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_matches_executable_stem_case_insensitively() {
        let probe = SystemProcessProbe::new(&["wpp".to_string(), "WPS".to_string()]);
        assert!(probe.is_family_name("WPP.EXE"));
        assert!(probe.is_family_name("wps"));
        assert!(!probe.is_family_name("wppx.exe"));
        assert!(!probe.is_family_name("powerpnt.exe"));
    }

    #[test]
    fn current_process_is_alive() {
        let probe = SystemProcessProbe::new(&[]);
        assert!(probe.is_alive(std::process::id()));
    }
}
