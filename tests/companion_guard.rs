use anyhow::{anyhow, Result};
use slide_ink::clock::ManualClock;
use slide_ink::companion::{
    CompanionProcessGuard, ForeignReleaser, GuardPhase, PollOutcome, ProcessProbe, TerminationStep,
};
use slide_ink::settings::CompanionTimings;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PID: u32 = 4242;

#[derive(Default)]
struct ScriptedProcess {
    alive: AtomicBool,
    visible_window: AtomicBool,
    taskbar_fails: AtomicBool,
    dies_on_close: AtomicBool,
    kill_works: AtomicBool,
    close_requests: AtomicUsize,
    kills: AtomicUsize,
}

impl ScriptedProcess {
    fn running() -> Arc<Self> {
        let process = Self::default();
        process.alive.store(true, Ordering::SeqCst);
        Arc::new(process)
    }
}

impl ProcessProbe for ScriptedProcess {
    fn is_alive(&self, _pid: u32) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
    fn family_window_is_foreground(&self) -> Result<bool> {
        Ok(false)
    }
    fn family_has_visible_window(&self) -> Result<bool> {
        Ok(self.visible_window.load(Ordering::SeqCst))
    }
    fn family_has_taskbar_window(&self) -> Result<bool> {
        if self.taskbar_fails.load(Ordering::SeqCst) {
            return Err(anyhow!("window enumeration failed"));
        }
        Ok(false)
    }
    fn request_close(&self, _pid: u32) -> Result<bool> {
        self.close_requests.fetch_add(1, Ordering::SeqCst);
        if self.dies_on_close.load(Ordering::SeqCst) {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(true)
    }
    fn kill(&self, _pid: u32) -> Result<bool> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        let works = self.kill_works.load(Ordering::SeqCst);
        if works {
            self.alive.store(false, Ordering::SeqCst);
        }
        Ok(works)
    }
}

struct DyingOnRelease(Arc<ScriptedProcess>);

impl ForeignReleaser for DyingOnRelease {
    fn release_references(&self, _pid: u32) -> bool {
        self.0.alive.store(false, Ordering::SeqCst);
        true
    }
}

fn guard(process: &Arc<ScriptedProcess>) -> CompanionProcessGuard {
    let guard = CompanionProcessGuard::new(
        Arc::clone(process) as Arc<dyn ProcessProbe>,
        CompanionTimings {
            poll: Duration::from_secs(1),
            release_wait: Duration::ZERO,
            close_wait: Duration::ZERO,
        },
        Arc::new(ManualClock::default()),
    );
    guard.track(PID);
    guard
}

#[test]
fn nothing_tracked_is_idle() {
    let process = ScriptedProcess::running();
    let guard = CompanionProcessGuard::new(
        process,
        CompanionTimings::default(),
        Arc::new(ManualClock::default()),
    );
    assert_eq!(guard.poll(), PollOutcome::Idle);
    assert_eq!(guard.last_outcome(), None);
}

#[test]
fn natural_exit_ends_tracking() {
    let process = ScriptedProcess::running();
    let guard = guard(&process);
    process.alive.store(false, Ordering::SeqCst);

    assert_eq!(guard.poll(), PollOutcome::ExitedNaturally);
    assert!(guard.record().is_none());
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn visible_window_keeps_the_process() {
    let process = ScriptedProcess::running();
    process.visible_window.store(true, Ordering::SeqCst);
    process.kill_works.store(true, Ordering::SeqCst);
    let guard = guard(&process);

    assert_eq!(guard.poll(), PollOutcome::StillActive);
    let record = guard.record().unwrap();
    assert_eq!(record.phase, GuardPhase::Tracking);
    assert_eq!(record.consecutive_absences, 0);
    assert_eq!(process.close_requests.load(Ordering::SeqCst), 0);
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_window_check_counts_as_present() {
    let process = ScriptedProcess::running();
    process.taskbar_fails.store(true, Ordering::SeqCst);
    process.kill_works.store(true, Ordering::SeqCst);
    let guard = guard(&process);

    assert_eq!(guard.poll(), PollOutcome::StillActive);
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn releasing_references_is_tried_first() {
    let process = ScriptedProcess::running();
    let guard = guard(&process);
    guard.set_releaser(Arc::new(DyingOnRelease(Arc::clone(&process))));

    assert_eq!(
        guard.poll(),
        PollOutcome::Terminated(TerminationStep::ReleasedReferences)
    );
    assert_eq!(process.close_requests.load(Ordering::SeqCst), 0);
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn close_request_before_kill() {
    let process = ScriptedProcess::running();
    process.dies_on_close.store(true, Ordering::SeqCst);
    let guard = guard(&process);

    assert_eq!(
        guard.poll(),
        PollOutcome::Terminated(TerminationStep::ClosedMainWindow)
    );
    assert_eq!(process.close_requests.load(Ordering::SeqCst), 1);
    assert_eq!(process.kills.load(Ordering::SeqCst), 0);
}

#[test]
fn kill_is_the_last_resort() {
    let process = ScriptedProcess::running();
    process.kill_works.store(true, Ordering::SeqCst);
    let guard = guard(&process);

    assert_eq!(guard.poll(), PollOutcome::Terminated(TerminationStep::Killed));
    assert_eq!(process.close_requests.load(Ordering::SeqCst), 1);
    assert_eq!(process.kills.load(Ordering::SeqCst), 1);
    assert!(guard.record().is_none());
}

#[test]
fn exhausted_escalation_waits_for_a_new_cycle() {
    let process = ScriptedProcess::running();
    let guard = guard(&process);

    assert_eq!(guard.poll(), PollOutcome::Failed);
    assert_eq!(guard.record().unwrap().phase, GuardPhase::Exhausted);
    assert_eq!(guard.poll(), PollOutcome::Idle);
    assert_eq!(process.kills.load(Ordering::SeqCst), 1);
    assert_eq!(guard.last_outcome(), Some(PollOutcome::Failed));

    process.kill_works.store(true, Ordering::SeqCst);
    guard.track(PID);
    assert_eq!(guard.record().unwrap().phase, GuardPhase::Tracking);
    assert_eq!(guard.poll(), PollOutcome::Terminated(TerminationStep::Killed));
}

#[test]
fn tracking_the_same_pid_keeps_the_cycle() {
    let process = ScriptedProcess::running();
    process.visible_window.store(true, Ordering::SeqCst);
    let guard = guard(&process);
    let first = guard.record().unwrap().first_seen;
    guard.track(PID);
    assert_eq!(guard.record().unwrap().first_seen, first);
    guard.track(PID + 1);
    assert_eq!(guard.record().unwrap().pid, PID + 1);
}
