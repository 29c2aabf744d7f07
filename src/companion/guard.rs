use crate::clock::Clock;
use crate::schedule::PeriodicTask;
use crate::settings::CompanionTimings;
use anyhow::Result;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

const EXIT_POLL_STEP: Duration = Duration::from_millis(100);

/// OS-level view of the companion process and its application family.
pub trait ProcessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
    fn family_window_is_foreground(&self) -> Result<bool>;
    fn family_has_visible_window(&self) -> Result<bool>;
    fn family_has_taskbar_window(&self) -> Result<bool>;
    /// Ask the process to close its main window. `Ok(false)` if it has none.
    fn request_close(&self, pid: u32) -> Result<bool>;
    fn kill(&self, pid: u32) -> Result<bool>;
}

/// Drops foreign references held on a process's objects.
pub trait ForeignReleaser: Send + Sync {
    fn release_references(&self, pid: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardPhase {
    Tracking,
    Checking,
    VerifiedGone,
    Terminated,
    /// Escalation ran out of steps; waits for the next detection cycle.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanionProcessRecord {
    pub pid: u32,
    pub first_seen: Instant,
    /// Window checks in a row that found nothing during the current poll.
    pub consecutive_absences: u32,
    pub phase: GuardPhase,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationStep {
    ReleasedReferences,
    ClosedMainWindow,
    Killed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Idle,
    ExitedNaturally,
    StillActive,
    Terminated(TerminationStep),
    Failed,
}

const REQUIRED_ABSENCES: u32 = 3;

#[derive(Default)]
struct GuardState {
    record: Option<CompanionProcessRecord>,
    last_outcome: Option<PollOutcome>,
}

pub struct CompanionProcessGuard {
    probe: Arc<dyn ProcessProbe>,
    releaser: Mutex<Option<Arc<dyn ForeignReleaser>>>,
    timings: CompanionTimings,
    clock: Arc<dyn Clock>,
    state: Mutex<GuardState>,
    task: Mutex<Option<PeriodicTask>>,
}

impl CompanionProcessGuard {
    pub fn new(probe: Arc<dyn ProcessProbe>, timings: CompanionTimings, clock: Arc<dyn Clock>) -> Self {
        Self {
            probe,
            releaser: Mutex::new(None),
            timings,
            clock,
            state: Mutex::new(GuardState::default()),
            task: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, GuardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_releaser(&self, releaser: Arc<dyn ForeignReleaser>) {
        *self.releaser.lock().unwrap_or_else(PoisonError::into_inner) = Some(releaser);
    }

    /// Start a fresh detection cycle for `pid`.
    pub fn track(&self, pid: u32) {
        let mut state = self.lock_state();
        if let Some(record) = state.record.as_ref() {
            if record.pid == pid && record.phase != GuardPhase::Exhausted {
                return;
            }
        }
        tracing::info!(pid, "tracking companion process");
        state.record = Some(CompanionProcessRecord {
            pid,
            first_seen: self.clock.now(),
            consecutive_absences: 0,
            phase: GuardPhase::Tracking,
        });
    }

    pub fn record(&self) -> Option<CompanionProcessRecord> {
        self.lock_state().record.clone()
    }

    pub fn last_outcome(&self) -> Option<PollOutcome> {
        self.lock_state().last_outcome
    }

    pub fn poll(&self) -> PollOutcome {
        let mut state = self.lock_state();
        let outcome = self.poll_locked(&mut state);
        if outcome != PollOutcome::Idle {
            state.last_outcome = Some(outcome);
        }
        outcome
    }

    fn poll_locked(&self, state: &mut GuardState) -> PollOutcome {
        let Some(record) = state.record.as_mut() else {
            return PollOutcome::Idle;
        };
        if record.phase == GuardPhase::Exhausted {
            return PollOutcome::Idle;
        }
        let pid = record.pid;

        if !self.probe.is_alive(pid) {
            tracing::info!(pid, "companion process exited on its own");
            state.record = None;
            return PollOutcome::ExitedNaturally;
        }

        record.phase = GuardPhase::Checking;
        if !self.confirm_absent(record) {
            record.phase = GuardPhase::Tracking;
            return PollOutcome::StillActive;
        }

        record.phase = GuardPhase::VerifiedGone;
        tracing::info!(pid, "companion process has no windows left, escalating");
        match self.escalate(pid) {
            Some(step) => {
                state.record = None;
                PollOutcome::Terminated(step)
            }
            None => {
                record.phase = GuardPhase::Exhausted;
                tracing::error!(pid, "companion process still alive after escalation");
                PollOutcome::Failed
            }
        }
    }

    /// Foreground, then all family windows, then taskbar windows. A check
    /// that fails counts as a window being present.
    fn confirm_absent(&self, record: &mut CompanionProcessRecord) -> bool {
        record.consecutive_absences = 0;
        let checks: [(&str, fn(&dyn ProcessProbe) -> Result<bool>); 3] = [
            ("foreground", |p| p.family_window_is_foreground()),
            ("family windows", |p| p.family_has_visible_window()),
            ("taskbar windows", |p| p.family_has_taskbar_window()),
        ];
        for (name, check) in checks {
            match check(self.probe.as_ref()) {
                Ok(false) => record.consecutive_absences += 1,
                Ok(true) => {
                    tracing::trace!(pid = record.pid, check = name, "companion window present");
                    record.consecutive_absences = 0;
                    return false;
                }
                Err(err) => {
                    tracing::debug!(pid = record.pid, check = name, error = %err, "window check failed");
                    record.consecutive_absences = 0;
                    return false;
                }
            }
        }
        record.consecutive_absences >= REQUIRED_ABSENCES
    }

    fn escalate(&self, pid: u32) -> Option<TerminationStep> {
        let releaser = self
            .releaser
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(releaser) = releaser {
            let released = releaser.release_references(pid);
            tracing::info!(pid, released, "released foreign references on companion process");
        }
        if self.wait_for_exit(pid, self.timings.release_wait) {
            return Some(TerminationStep::ReleasedReferences);
        }

        match self.probe.request_close(pid) {
            Ok(posted) => tracing::warn!(pid, posted, "asked companion process to close"),
            Err(err) => tracing::warn!(pid, error = %err, "close request to companion process failed"),
        }
        if self.wait_for_exit(pid, self.timings.close_wait) {
            return Some(TerminationStep::ClosedMainWindow);
        }

        match self.probe.kill(pid) {
            Ok(true) => {
                tracing::warn!(pid, "killed companion process");
                Some(TerminationStep::Killed)
            }
            Ok(false) => None,
            Err(err) => {
                tracing::error!(pid, error = %err, "failed to kill companion process");
                None
            }
        }
    }

    fn wait_for_exit(&self, pid: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.probe.is_alive(pid) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL_STEP.min(deadline - now));
        }
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return Ok(());
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *task = Some(PeriodicTask::spawn(
            "slide-ink-companion",
            self.timings.poll,
            move || {
                if let Some(guard) = weak.upgrade() {
                    guard.poll();
                }
            },
        )?);
        Ok(())
    }

    pub fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(task);
    }
}
