use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SETTINGS_FILE_NAME: &str = "slide_ink_settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// When enabled the application initialises the logger at debug level.
    /// Defaults to `false` when the field is missing in the settings file.
    #[serde(default)]
    pub debug_logging: bool,
    /// Optional log file. When absent, logs go to stderr only.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Flush ink to disk when a slideshow ends or the connection drops, and
    /// restore it when the same presentation is opened again.
    #[serde(default = "default_auto_save")]
    pub auto_save_enabled: bool,
    /// Track and reap the auxiliary process left behind by clone
    /// presentation applications.
    #[serde(default = "default_companion_support")]
    pub companion_process_support: bool,
    /// Root folder for per-presentation ink artifacts. If `None`, a folder
    /// under the platform data directory is used.
    #[serde(default)]
    pub ink_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub supervisor: SupervisorSettings,
    #[serde(default)]
    pub ink: InkSettings,
    #[serde(default)]
    pub companion: CompanionSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    #[serde(default = "default_fast_check_ms")]
    pub fast_check_ms: u64,
    #[serde(default = "default_slow_check_ms")]
    pub slow_check_ms: u64,
    #[serde(default = "default_quarantine_ms")]
    pub quarantine_ms: u64,
    #[serde(default = "default_release_pause_ms")]
    pub release_pause_ms: u64,
    #[serde(default = "default_ui_dispatch_timeout_ms")]
    pub ui_dispatch_timeout_ms: u64,
    #[serde(default = "default_event_poll_ms")]
    pub event_poll_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InkSettings {
    #[serde(default = "default_lock_window_ms")]
    pub lock_window_ms: u64,
    #[serde(default = "default_grace_window_ms")]
    pub grace_window_ms: u64,
    #[serde(default = "default_duplicate_switch_ms")]
    pub duplicate_switch_ms: u64,
    #[serde(default = "default_memory_ceiling_bytes")]
    pub memory_ceiling_bytes: usize,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    /// Buffers smaller than this are treated as empty when flushing.
    #[serde(default = "default_min_artifact_bytes")]
    pub min_artifact_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanionSettings {
    #[serde(default = "default_companion_poll_ms")]
    pub poll_ms: u64,
    #[serde(default = "default_release_wait_ms")]
    pub release_wait_ms: u64,
    #[serde(default = "default_close_wait_ms")]
    pub close_wait_ms: u64,
    /// Executable stems (no extension, case-insensitive) that belong to the
    /// clone application family.
    #[serde(default = "default_family_process_names")]
    pub family_process_names: Vec<String>,
}

fn default_auto_save() -> bool {
    true
}

fn default_companion_support() -> bool {
    true
}

fn default_fast_check_ms() -> u64 {
    500
}

fn default_slow_check_ms() -> u64 {
    2000
}

fn default_quarantine_ms() -> u64 {
    2500
}

fn default_release_pause_ms() -> u64 {
    300
}

fn default_ui_dispatch_timeout_ms() -> u64 {
    2000
}

fn default_event_poll_ms() -> u64 {
    150
}

fn default_lock_window_ms() -> u64 {
    500
}

fn default_grace_window_ms() -> u64 {
    50
}

fn default_duplicate_switch_ms() -> u64 {
    30
}

fn default_memory_ceiling_bytes() -> usize {
    100 * 1024 * 1024
}

fn default_cleanup_interval_secs() -> u64 {
    300
}

fn default_min_artifact_bytes() -> usize {
    24
}

fn default_companion_poll_ms() -> u64 {
    5000
}

fn default_release_wait_ms() -> u64 {
    1500
}

fn default_close_wait_ms() -> u64 {
    3000
}

fn default_family_process_names() -> Vec<String> {
    ["wpp", "wps", "et", "wpscloudsvr"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            fast_check_ms: default_fast_check_ms(),
            slow_check_ms: default_slow_check_ms(),
            quarantine_ms: default_quarantine_ms(),
            release_pause_ms: default_release_pause_ms(),
            ui_dispatch_timeout_ms: default_ui_dispatch_timeout_ms(),
            event_poll_ms: default_event_poll_ms(),
        }
    }
}

impl Default for InkSettings {
    fn default() -> Self {
        Self {
            lock_window_ms: default_lock_window_ms(),
            grace_window_ms: default_grace_window_ms(),
            duplicate_switch_ms: default_duplicate_switch_ms(),
            memory_ceiling_bytes: default_memory_ceiling_bytes(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            min_artifact_bytes: default_min_artifact_bytes(),
        }
    }
}

impl Default for CompanionSettings {
    fn default() -> Self {
        Self {
            poll_ms: default_companion_poll_ms(),
            release_wait_ms: default_release_wait_ms(),
            close_wait_ms: default_close_wait_ms(),
            family_process_names: default_family_process_names(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug_logging: false,
            log_file: None,
            auto_save_enabled: default_auto_save(),
            companion_process_support: default_companion_support(),
            ink_data_dir: None,
            supervisor: SupervisorSettings::default(),
            ink: InkSettings::default(),
            companion: CompanionSettings::default(),
        }
    }
}

/// Timing knobs of the connection supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorTimings {
    pub fast_check: Duration,
    pub slow_check: Duration,
    pub quarantine: Duration,
    pub release_pause: Duration,
    pub ui_dispatch_timeout: Duration,
    pub event_poll: Duration,
}

impl Default for SupervisorTimings {
    fn default() -> Self {
        SupervisorSettings::default().timings()
    }
}

/// Timing and memory knobs of the ink buffer store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InkTimings {
    pub lock_window: Duration,
    pub grace_window: Duration,
    pub duplicate_switch: Duration,
    pub memory_ceiling_bytes: usize,
    pub cleanup_interval: Duration,
    pub min_artifact_bytes: usize,
}

impl Default for InkTimings {
    fn default() -> Self {
        InkSettings::default().timings()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionTimings {
    pub poll: Duration,
    pub release_wait: Duration,
    pub close_wait: Duration,
}

impl Default for CompanionTimings {
    fn default() -> Self {
        CompanionSettings::default().timings()
    }
}

impl SupervisorSettings {
    pub fn timings(&self) -> SupervisorTimings {
        SupervisorTimings {
            fast_check: Duration::from_millis(self.fast_check_ms.max(1)),
            slow_check: Duration::from_millis(self.slow_check_ms.max(1)),
            quarantine: Duration::from_millis(self.quarantine_ms),
            release_pause: Duration::from_millis(self.release_pause_ms),
            ui_dispatch_timeout: Duration::from_millis(self.ui_dispatch_timeout_ms.max(1)),
            event_poll: Duration::from_millis(self.event_poll_ms.max(1)),
        }
    }
}

impl InkSettings {
    pub fn timings(&self) -> InkTimings {
        // The grace window is a sub-window of the lock window.
        let grace = self.grace_window_ms.min(self.lock_window_ms);
        InkTimings {
            lock_window: Duration::from_millis(self.lock_window_ms),
            grace_window: Duration::from_millis(grace),
            duplicate_switch: Duration::from_millis(self.duplicate_switch_ms),
            memory_ceiling_bytes: self.memory_ceiling_bytes,
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs.max(1)),
            min_artifact_bytes: self.min_artifact_bytes,
        }
    }
}

impl CompanionSettings {
    pub fn timings(&self) -> CompanionTimings {
        CompanionTimings {
            poll: Duration::from_millis(self.poll_ms.max(1)),
            release_wait: Duration::from_millis(self.release_wait_ms),
            close_wait: Duration::from_millis(self.close_wait_ms),
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).unwrap_or_default();
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content)
            .with_context(|| format!("deserialize settings file {}", path.display()))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create settings folder {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("serialize settings")?;
        std::fs::write(path, json)
            .with_context(|| format!("write settings file {}", path.display()))
    }

    /// Folder holding per-presentation ink artifacts.
    pub fn resolve_ink_data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.ink_data_dir {
            return dir.clone();
        }
        dirs_next::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("slide_ink")
            .join("ink")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{ "debug_logging": true }"#)
            .expect("deserialize partial settings");
        assert!(settings.debug_logging);
        assert!(settings.auto_save_enabled);
        assert_eq!(settings.ink, InkSettings::default());
        assert_eq!(settings.supervisor.fast_check_ms, 500);
    }

    #[test]
    fn default_ink_timings_match_tuning_values() {
        let timings = InkTimings::default();
        assert_eq!(timings.lock_window, Duration::from_millis(500));
        assert_eq!(timings.grace_window, Duration::from_millis(50));
        assert_eq!(timings.memory_ceiling_bytes, 100 * 1024 * 1024);
        assert_eq!(timings.cleanup_interval, Duration::from_secs(300));
    }

    #[test]
    fn grace_window_is_clamped_to_lock_window() {
        let ink = InkSettings {
            lock_window_ms: 40,
            grace_window_ms: 90,
            ..InkSettings::default()
        };
        assert_eq!(ink.timings().grace_window, Duration::from_millis(40));
    }

    #[test]
    fn partial_nested_section_keeps_other_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{ "supervisor": { "quarantine_ms": 4000 } }"#)
                .expect("deserialize nested settings");
        assert_eq!(settings.supervisor.quarantine_ms, 4000);
        assert_eq!(settings.supervisor.slow_check_ms, 2000);
    }
}
