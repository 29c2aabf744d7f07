use crate::bridge::{diff, refresh_snapshot, BridgeOutcome, PresentationEventBridge};
use crate::clock::Clock;
use crate::companion::{CompanionProcessGuard, ForeignReleaser};
use crate::events::{EventBus, PresentationEvent};
use crate::foreign::{
    EventSubscription, ForeignError, ForeignEvent, ForeignResult, HandleProbe, PresentationApp,
};
use crate::schedule::PeriodicTask;
use crate::session::PresentationSession;
use crate::settings::SupervisorTimings;
use anyhow::Result;
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub fn can_transition(from: ConnectionState, to: ConnectionState) -> bool {
    matches!(
        (from, to),
        (ConnectionState::Disconnected, ConnectionState::Connecting)
            | (ConnectionState::Connecting, ConnectionState::Connected)
            | (ConnectionState::Connecting, ConnectionState::Disconnected)
            | (ConnectionState::Connected, ConnectionState::Disconnected)
    ) || from == to
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The probe no longer finds the application while a session is live.
    ProbeLost,
    InvalidReference,
    PresentationClosed,
    CompanionCleanup,
    Stopped,
}

impl DisconnectReason {
    fn quarantines(self) -> bool {
        !matches!(self, DisconnectReason::Stopped)
    }
}

struct LiveConnection {
    // Declared first so it is dropped (unregistered) before the app handle.
    subscription: Option<Box<dyn EventSubscription>>,
    app: Box<dyn PresentationApp>,
    events: Receiver<ForeignEvent>,
}

struct SupervisorState {
    connection: ConnectionState,
    live: Option<LiveConnection>,
    session: Option<PresentationSession>,
    quarantine_until: Option<Instant>,
    /// Events in the order their transitions happened, awaiting publication.
    pending: Vec<PresentationEvent>,
}

#[derive(Default)]
struct MonitorTasks {
    fast: Option<PeriodicTask>,
    slow: Option<PeriodicTask>,
    events: Option<PeriodicTask>,
}

impl MonitorTasks {
    fn is_running(&self) -> bool {
        self.fast.is_some() || self.slow.is_some() || self.events.is_some()
    }
}

/// Owns the link to the foreign application. Every check and transition runs
/// behind the single `state` lock. Events are queued under that lock and
/// published after it is released, by one thread at a time.
pub struct ConnectionSupervisor {
    probe: Arc<dyn HandleProbe>,
    bridge: PresentationEventBridge,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    timings: SupervisorTimings,
    state: Mutex<SupervisorState>,
    publishing: Mutex<()>,
    tasks: Mutex<MonitorTasks>,
    companion: Mutex<Option<Arc<CompanionProcessGuard>>>,
}

impl ConnectionSupervisor {
    pub fn new(
        probe: Arc<dyn HandleProbe>,
        bridge: PresentationEventBridge,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        timings: SupervisorTimings,
    ) -> Self {
        Self {
            probe,
            bridge,
            bus,
            clock,
            timings,
            state: Mutex::new(SupervisorState {
                connection: ConnectionState::Disconnected,
                live: None,
                session: None,
                quarantine_until: None,
                pending: Vec::new(),
            }),
            publishing: Mutex::new(()),
            tasks: Mutex::new(MonitorTasks::default()),
            companion: Mutex::new(None),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tasks(&self) -> MutexGuard<'_, MonitorTasks> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn bridge(&self) -> &PresentationEventBridge {
        &self.bridge
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    pub fn session(&self) -> Option<PresentationSession> {
        self.lock_state().session.clone()
    }

    pub fn quarantine_remaining(&self) -> Option<Duration> {
        let until = self.lock_state().quarantine_until?;
        let remaining = until.saturating_duration_since(self.clock.now());
        (!remaining.is_zero()).then_some(remaining)
    }

    pub fn is_monitoring(&self) -> bool {
        self.lock_tasks().is_running()
    }

    pub fn attach_companion_guard(&self, guard: Arc<CompanionProcessGuard>) {
        *self.companion.lock().unwrap_or_else(PoisonError::into_inner) = Some(guard);
    }

    /// Releaser the companion guard uses to drop our references to a process.
    pub fn releaser(self: &Arc<Self>) -> Arc<dyn ForeignReleaser> {
        Arc::new(SupervisorReleaser(Arc::downgrade(self)))
    }

    pub fn start_monitoring(self: &Arc<Self>) -> Result<()> {
        let mut tasks = self.lock_tasks();
        if tasks.is_running() {
            return Ok(());
        }
        tasks.fast = Some(self.spawn_task(
            "slide-ink-fast-check",
            self.timings.fast_check,
            Self::fast_check,
        )?);
        tasks.slow = Some(self.spawn_task(
            "slide-ink-slow-check",
            self.timings.slow_check,
            Self::slow_check,
        )?);
        tasks.events = Some(self.spawn_task(
            "slide-ink-events",
            self.timings.event_poll,
            Self::event_tick,
        )?);
        tracing::info!(
            fast = ?self.timings.fast_check,
            slow = ?self.timings.slow_check,
            "presentation monitoring started"
        );
        Ok(())
    }

    fn spawn_task(
        self: &Arc<Self>,
        name: &str,
        interval: Duration,
        tick: fn(&ConnectionSupervisor),
    ) -> Result<PeriodicTask> {
        let weak = Arc::downgrade(self);
        PeriodicTask::spawn(name, interval, move || {
            if let Some(supervisor) = weak.upgrade() {
                tick(&supervisor);
            }
        })
    }

    /// Stop both checks and disconnect. Safe to call repeatedly or without a
    /// prior start.
    pub fn stop_monitoring(&self) {
        let tasks = std::mem::take(&mut *self.lock_tasks());
        let was_running = tasks.is_running();
        drop(tasks);

        {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            self.disconnect_locked(&mut state, DisconnectReason::Stopped, &mut outbox);
            state.quarantine_until = None;
            state.pending.append(&mut outbox);
        }
        self.flush_events();
        if was_running {
            tracing::info!("presentation monitoring stopped");
        }
    }

    /// Connectivity check: connect when disconnected, verify when connected.
    pub fn fast_check(&self) {
        let companion_pid = {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            let pid = match state.connection {
                ConnectionState::Connected => {
                    self.verify_locked(&mut state, &mut outbox);
                    None
                }
                ConnectionState::Disconnected => self.try_connect_locked(&mut state, &mut outbox),
                ConnectionState::Connecting => None,
            };
            state.pending.append(&mut outbox);
            pid
        };
        self.flush_events();
        if let Some(pid) = companion_pid {
            self.track_companion(pid);
        }
    }

    /// Slideshow-state check: reconcile the session with a fresh snapshot.
    pub fn slow_check(&self) {
        {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            if state.connection == ConnectionState::Connected {
                self.reconcile_locked(&mut state, &mut outbox);
            }
            state.pending.append(&mut outbox);
        }
        self.flush_events();
    }

    /// Deliver queued push notifications.
    pub fn pump_events(&self) {
        {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            self.pump_locked(&mut state, &mut outbox);
            state.pending.append(&mut outbox);
        }
        self.flush_events();
    }

    /// Event task tick: push notifications, or a snapshot diff when the
    /// backend cannot push.
    pub fn event_tick(&self) {
        {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            self.pump_locked(&mut state, &mut outbox);
            let polled = state
                .live
                .as_ref()
                .is_some_and(|live| live.subscription.is_none());
            if polled {
                self.reconcile_locked(&mut state, &mut outbox);
            }
            state.pending.append(&mut outbox);
        }
        self.flush_events();
    }

    /// Run `f` against the live application. An invalid reference
    /// disconnects before the error is returned.
    pub fn with_app<R>(
        &self,
        f: impl FnOnce(&dyn PresentationApp) -> ForeignResult<R>,
    ) -> ForeignResult<R> {
        let result = {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            let result = match state.live.as_ref() {
                Some(live) => f(live.app.as_ref()),
                None => Err(ForeignError::NotConnected),
            };
            if matches!(result, Err(ForeignError::InvalidReference)) {
                self.disconnect_locked(&mut state, DisconnectReason::InvalidReference, &mut outbox);
            }
            state.pending.append(&mut outbox);
            result
        };
        self.flush_events();
        result
    }

    /// Drop every reference held on process `pid`. Returns whether anything
    /// was released.
    pub fn release_process(&self, pid: u32) -> bool {
        let released = {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            let owns = state
                .live
                .as_ref()
                .is_some_and(|live| live.app.process_id() == Some(pid));
            if owns {
                self.disconnect_locked(&mut state, DisconnectReason::CompanionCleanup, &mut outbox);
            }
            state.pending.append(&mut outbox);
            owns
        };
        self.flush_events();
        released
    }

    pub fn disconnect(&self, reason: DisconnectReason) {
        {
            let mut state = self.lock_state();
            let mut outbox = Vec::new();
            self.disconnect_locked(&mut state, reason, &mut outbox);
            state.pending.append(&mut outbox);
        }
        self.flush_events();
    }

    /// Publish queued events in order. Whoever holds `publishing` drains the
    /// queue, including events queued by listeners or other threads meanwhile.
    fn flush_events(&self) {
        loop {
            let guard = match self.publishing.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            loop {
                let batch = std::mem::take(&mut self.lock_state().pending);
                if batch.is_empty() {
                    break;
                }
                self.bus.publish_all(batch);
            }
            drop(guard);
            if self.lock_state().pending.is_empty() {
                return;
            }
        }
    }

    fn transition_locked(&self, state: &mut SupervisorState, next: ConnectionState) -> bool {
        if !can_transition(state.connection, next) {
            tracing::error!(from = ?state.connection, to = ?next, "invalid connection transition");
            return false;
        }
        state.connection = next;
        true
    }

    fn try_connect_locked(
        &self,
        state: &mut SupervisorState,
        outbox: &mut Vec<PresentationEvent>,
    ) -> Option<u32> {
        if let Some(until) = state.quarantine_until {
            if self.clock.now() < until {
                tracing::trace!("connection quarantine active");
                return None;
            }
            state.quarantine_until = None;
        }

        self.transition_locked(state, ConnectionState::Connecting);
        let app = match self.probe.probe() {
            Ok(Some(app)) => app,
            Ok(None) => {
                self.transition_locked(state, ConnectionState::Disconnected);
                return None;
            }
            Err(err) => {
                tracing::debug!(%err, "presentation application probe failed");
                self.transition_locked(state, ConnectionState::Disconnected);
                return None;
            }
        };

        let (tx, rx) = mpsc::channel();
        let subscription = match app.subscribe(tx) {
            Ok(subscription) => subscription,
            Err(ForeignError::InvalidReference) => {
                drop(app);
                self.transition_locked(state, ConnectionState::Disconnected);
                self.enter_quarantine(state);
                return None;
            }
            Err(err) => {
                tracing::warn!(%err, "event registration failed, falling back to polling");
                None
            }
        };

        let family = app.family();
        let pid = app.process_id();
        tracing::info!(?family, ?pid, push = subscription.is_some(), "connected to presentation application");
        state.live = Some(LiveConnection {
            subscription,
            app,
            events: rx,
        });
        self.transition_locked(state, ConnectionState::Connected);
        outbox.push(PresentationEvent::ConnectionChanged(true));

        let adopted = match state.live.as_ref() {
            Some(live) => self
                .bridge
                .on_connected(live.app.as_ref(), &mut state.session, outbox),
            None => Ok(()),
        };
        if let Err(err) = adopted {
            if err.is_invalid_reference() {
                self.disconnect_locked(state, DisconnectReason::InvalidReference, outbox);
                return None;
            }
            tracing::debug!(%err, "initial session refresh failed");
        }

        pid.filter(|_| family.has_companion_process())
    }

    fn verify_locked(&self, state: &mut SupervisorState, outbox: &mut Vec<PresentationEvent>) {
        let ping = match state.live.as_ref() {
            Some(live) => live.app.ping(),
            None => {
                self.transition_locked(state, ConnectionState::Disconnected);
                return;
            }
        };
        match ping {
            Ok(()) => {}
            Err(ForeignError::InvalidReference) => {
                self.disconnect_locked(state, DisconnectReason::InvalidReference, outbox);
                return;
            }
            Err(err) => {
                tracing::debug!(%err, "presentation application ping failed");
                return;
            }
        }

        match self.probe.probe() {
            Ok(None) if state.session.is_some() => {
                self.disconnect_locked(state, DisconnectReason::ProbeLost, outbox);
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(%err, "presentation application probe failed"),
        }
    }

    fn pump_locked(&self, state: &mut SupervisorState, outbox: &mut Vec<PresentationEvent>) {
        let events: Vec<ForeignEvent> = match state.live.as_ref() {
            Some(live) => live.events.try_iter().collect(),
            None => return,
        };
        self.apply_locked(state, events, outbox);
    }

    fn reconcile_locked(&self, state: &mut SupervisorState, outbox: &mut Vec<PresentationEvent>) {
        let snapshot = match state.live.as_ref() {
            Some(live) => refresh_snapshot(live.app.as_ref()),
            None => return,
        };
        match snapshot {
            Ok(snapshot) => {
                let events = diff(state.session.as_ref(), &snapshot);
                self.apply_locked(state, events, outbox);
            }
            Err(ForeignError::InvalidReference) => {
                self.disconnect_locked(state, DisconnectReason::InvalidReference, outbox);
            }
            Err(err) => tracing::debug!(%err, "slideshow state refresh failed"),
        }
    }

    fn apply_locked(
        &self,
        state: &mut SupervisorState,
        events: Vec<ForeignEvent>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        for event in events {
            let SupervisorState { live, session, .. } = &mut *state;
            let Some(live) = live.as_ref() else {
                return;
            };
            let outcome = self.bridge.handle(event, live.app.as_ref(), session, outbox);
            match outcome {
                Ok(BridgeOutcome::Continue) => {}
                Ok(BridgeOutcome::Disconnect) => {
                    self.disconnect_locked(state, DisconnectReason::PresentationClosed, outbox);
                    return;
                }
                Err(ForeignError::InvalidReference) => {
                    self.disconnect_locked(state, DisconnectReason::InvalidReference, outbox);
                    return;
                }
                Err(err) => tracing::debug!(?event, %err, "foreign event handling failed"),
            }
        }
    }

    fn disconnect_locked(
        &self,
        state: &mut SupervisorState,
        reason: DisconnectReason,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        if state.connection == ConnectionState::Disconnected && state.live.is_none() {
            return;
        }
        self.bridge.teardown(&mut state.session, outbox);
        if let Some(mut live) = state.live.take() {
            drop(live.subscription.take());
            drop(live);
        }
        self.transition_locked(state, ConnectionState::Disconnected);
        if !self.timings.release_pause.is_zero() {
            std::thread::sleep(self.timings.release_pause);
        }
        if reason.quarantines() {
            self.enter_quarantine(state);
        }
        match reason {
            DisconnectReason::InvalidReference | DisconnectReason::ProbeLost => {
                tracing::warn!(?reason, "disconnected from presentation application")
            }
            _ => tracing::info!(?reason, "disconnected from presentation application"),
        }
        outbox.push(PresentationEvent::ConnectionChanged(false));
    }

    fn enter_quarantine(&self, state: &mut SupervisorState) {
        let quarantine = self.timings.quarantine;
        state.quarantine_until = Some(self.clock.now() + quarantine);
        if let Some(fast) = self.lock_tasks().fast.as_ref() {
            fast.pause_until(Instant::now() + quarantine);
        }
        tracing::debug!(?quarantine, "connection quarantined");
    }

    fn track_companion(&self, pid: u32) {
        let guard = self
            .companion
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(guard) = guard {
            guard.track(pid);
        }
    }
}

impl Drop for ConnectionSupervisor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

struct SupervisorReleaser(Weak<ConnectionSupervisor>);

impl ForeignReleaser for SupervisorReleaser {
    fn release_references(&self, pid: u32) -> bool {
        self.0
            .upgrade()
            .is_some_and(|supervisor| supervisor.release_process(pid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_follow_the_connection_cycle() {
        use ConnectionState::*;
        assert!(can_transition(Disconnected, Connecting));
        assert!(can_transition(Connecting, Connected));
        assert!(can_transition(Connecting, Disconnected));
        assert!(can_transition(Connected, Disconnected));
        assert!(!can_transition(Disconnected, Connected));
        assert!(!can_transition(Connected, Connecting));
    }
}
