use slide_ink::bridge::PresentationEventBridge;
use slide_ink::clock::ManualClock;
use slide_ink::companion::{CompanionProcessGuard, GuardPhase, PollOutcome, ProcessProbe, TerminationStep};
use slide_ink::dispatch::InlineDispatcher;
use slide_ink::events::{EventBus, PresentationEvent};
use slide_ink::foreign::fake::{fake_probe, FakePresentationApp};
use slide_ink::foreign::{AppFamily, ForeignError};
use slide_ink::ink::{FsInkPersistence, InkBufferStore, InkColor, InkPersistence, InkStroke, StrokeSet};
use slide_ink::settings::{CompanionTimings, InkTimings, SupervisorTimings};
use slide_ink::supervisor::{ConnectionState, ConnectionSupervisor, DisconnectReason};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tempfile::tempdir;

const QUARANTINE: Duration = Duration::from_secs(2);

struct Harness {
    app: FakePresentationApp,
    clock: Arc<ManualClock>,
    supervisor: Arc<ConnectionSupervisor>,
    seen: Arc<Mutex<Vec<PresentationEvent>>>,
}

impl Harness {
    fn new(app: FakePresentationApp) -> Self {
        Self::with_persistence(app, None)
    }

    fn with_persistence(
        app: FakePresentationApp,
        persistence: Option<Arc<dyn InkPersistence>>,
    ) -> Self {
        let clock = Arc::new(ManualClock::default());
        let bus = Arc::new(EventBus::new(
            Arc::new(InlineDispatcher),
            Duration::from_secs(1),
        ));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
        let ink = Arc::new(InkBufferStore::new(InkTimings::default(), clock.clone()));
        let auto_save = persistence.is_some();
        let bridge = PresentationEventBridge::new(ink, persistence, auto_save, clock.clone());
        let timings = SupervisorTimings {
            quarantine: QUARANTINE,
            release_pause: Duration::ZERO,
            ..SupervisorTimings::default()
        };
        let supervisor = Arc::new(ConnectionSupervisor::new(
            Arc::new(fake_probe(&app)),
            bridge,
            bus,
            clock.clone(),
            timings,
        ));
        Self {
            app,
            clock,
            supervisor,
            seen,
        }
    }

    fn take_kinds(&self) -> Vec<&'static str> {
        self.seen
            .lock()
            .unwrap()
            .drain(..)
            .map(|event| event.kind())
            .collect()
    }

    fn take(&self) -> Vec<PresentationEvent> {
        self.seen.lock().unwrap().drain(..).collect()
    }
}

fn strokes() -> StrokeSet {
    StrokeSet::new(vec![InkStroke::pen(
        InkColor::rgba(200, 0, 0, 255),
        3,
        vec![(10, 10), (40, 22), (80, 31), (120, 60)],
    )])
}

#[test]
fn connect_adopts_running_slideshow() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", r"C:\decks\lesson.pptx", 5);
    app.begin_show(2);
    let h = Harness::new(app);

    h.supervisor.fast_check();

    assert_eq!(h.supervisor.connection_state(), ConnectionState::Connected);
    assert!(h.app.is_subscribed());
    assert_eq!(
        h.take_kinds(),
        vec![
            "connection_changed",
            "presentation_opened",
            "slide_show_state_changed",
            "slide_show_began"
        ]
    );
    let session = h.supervisor.session().expect("session");
    assert_eq!(session.info.slide_count, 5);
    assert!(session.slide_show_active);
    assert_eq!(session.current_slide, Some(2));
}

#[test]
fn pushed_notifications_drive_the_session() {
    let h = Harness::new(FakePresentationApp::new());
    h.supervisor.fast_check();
    assert!(h.supervisor.is_connected());
    assert!(h.supervisor.session().is_none());
    h.take();

    h.app.open_presentation("lesson.pptx", "lesson.pptx", 6);
    h.supervisor.pump_events();
    h.app.begin_show(1);
    h.supervisor.pump_events();
    h.app.advance_to(3);
    h.supervisor.pump_events();

    let events = h.take();
    assert!(matches!(
        &events[0],
        PresentationEvent::PresentationOpened { info, resume_slide: None } if info.slide_count == 6
    ));
    assert_eq!(events[1], PresentationEvent::SlideShowStateChanged(true));
    assert!(matches!(events[2], PresentationEvent::SlideShowBegan { slide: 1, .. }));
    assert!(matches!(events[3], PresentationEvent::SlideChanged { slide: 3, .. }));
    assert_eq!(events.len(), 4);
    assert_eq!(h.supervisor.bridge().ink().stats().locked_slide, Some(3));
}

#[test]
fn repeated_slide_notification_is_not_a_slide_change() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 6);
    app.begin_show(4);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.take();

    h.app.repeat_slide_notification();
    h.app.repeat_slide_notification();
    h.supervisor.pump_events();

    assert!(h.take().is_empty());
    assert_eq!(h.supervisor.session().unwrap().current_slide, Some(4));
}

#[test]
fn crash_quarantines_before_reconnecting() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 3);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    assert!(h.supervisor.is_connected());
    h.take();

    h.app.crash();
    h.supervisor.fast_check();
    assert_eq!(h.supervisor.connection_state(), ConnectionState::Disconnected);
    assert_eq!(h.app.live_references(), 0);
    assert_eq!(
        h.take_kinds(),
        vec!["presentation_closed", "connection_changed"]
    );
    assert!(h.supervisor.quarantine_remaining().is_some());

    h.app.revive();
    h.clock.advance(QUARANTINE / 2);
    h.supervisor.fast_check();
    assert_eq!(h.supervisor.connection_state(), ConnectionState::Disconnected);

    h.clock.advance(QUARANTINE);
    assert!(h.supervisor.quarantine_remaining().is_none());
    h.supervisor.fast_check();
    assert!(h.supervisor.is_connected());
    assert!(h.supervisor.session().is_some());
}

#[test]
fn closing_the_presentation_disconnects() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 3);
    app.begin_show(1);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.take();

    h.app.close_presentation();
    h.supervisor.pump_events();

    assert_eq!(
        h.take(),
        vec![
            PresentationEvent::SlideShowEnded,
            PresentationEvent::SlideShowStateChanged(false),
            PresentationEvent::PresentationClosed,
            PresentationEvent::ConnectionChanged(false),
        ]
    );
    assert!(!h.supervisor.is_connected());
    assert!(!h.app.is_subscribed());
    assert_eq!(h.app.live_references(), 0);
    assert_eq!(h.supervisor.bridge().ink().total_bytes(), 0);
}

#[test]
fn polling_backend_is_observed_by_snapshot_diff() {
    let app = FakePresentationApp::new();
    app.set_push_events(false);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    assert!(h.supervisor.is_connected());
    assert!(!h.app.is_subscribed());
    h.take();

    h.app.open_presentation("lesson.pptx", "lesson.pptx", 8);
    h.supervisor.event_tick();
    h.app.begin_show(2);
    h.supervisor.event_tick();
    h.app.advance_to(5);
    h.supervisor.event_tick();
    h.supervisor.event_tick();
    h.app.end_show();
    h.supervisor.event_tick();

    assert_eq!(
        h.take_kinds(),
        vec![
            "presentation_opened",
            "slide_show_state_changed",
            "slide_show_began",
            "slide_changed",
            "slide_show_ended",
            "slide_show_state_changed"
        ]
    );
}

#[test]
fn polled_presentation_swap_reopens_without_disconnecting() {
    let app = FakePresentationApp::new();
    app.set_push_events(false);
    app.open_presentation("lesson.pptx", "lesson.pptx", 5);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.take();

    h.app.open_presentation("lesson.pptx", "lesson.pptx", 6);
    h.supervisor.event_tick();
    h.supervisor.slow_check();

    assert_eq!(h.take_kinds(), vec!["presentation_closed", "presentation_opened"]);
    assert!(h.supervisor.is_connected());
    assert!(h.supervisor.quarantine_remaining().is_none());
    assert_eq!(h.supervisor.session().unwrap().info.slide_count, 6);
}

#[test]
fn pushed_presentation_swap_matches_polled_result() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 5);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.take();

    h.app.open_presentation("lesson.pptx", "lesson.pptx", 6);
    h.supervisor.pump_events();

    assert_eq!(h.take_kinds(), vec!["presentation_closed", "presentation_opened"]);
    assert!(h.supervisor.is_connected());
    assert_eq!(h.supervisor.session().unwrap().info.slide_count, 6);
}

#[test]
fn slow_check_catches_missed_slideshow_end() {
    let app = FakePresentationApp::new();
    app.set_push_events(false);
    app.open_presentation("lesson.pptx", "lesson.pptx", 4);
    app.begin_show(3);
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.take();

    h.app.end_show();
    h.supervisor.slow_check();

    assert_eq!(h.take_kinds(), vec!["slide_show_ended", "slide_show_state_changed"]);
    assert!(!h.supervisor.session().unwrap().slide_show_active);
}

#[test]
fn invalid_reference_through_with_app_disconnects() {
    let app = FakePresentationApp::new();
    let h = Harness::new(app);
    h.supervisor.fast_check();
    h.app.crash();

    let result = h.supervisor.with_app(|app| app.ping());

    assert_eq!(result, Err(ForeignError::InvalidReference));
    assert!(!h.supervisor.is_connected());
    assert_eq!(
        h.supervisor.with_app(|app| app.ping()),
        Err(ForeignError::NotConnected)
    );
}

#[test]
fn stop_is_idempotent_and_does_not_quarantine() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 3);
    let h = Harness::new(app);
    h.supervisor.start_monitoring().unwrap();
    assert!(h.supervisor.is_monitoring());
    h.supervisor.fast_check();

    h.supervisor.stop_monitoring();
    h.supervisor.stop_monitoring();

    assert!(!h.supervisor.is_monitoring());
    assert!(!h.supervisor.is_connected());
    assert!(h.supervisor.quarantine_remaining().is_none());
    assert_eq!(h.app.live_references(), 0);
}

#[test]
fn explicit_disconnect_quarantines() {
    let h = Harness::new(FakePresentationApp::new());
    h.supervisor.fast_check();
    h.supervisor.disconnect(DisconnectReason::ProbeLost);
    assert!(!h.supervisor.is_connected());
    assert!(h.supervisor.quarantine_remaining().is_some());
    h.supervisor.fast_check();
    assert!(!h.supervisor.is_connected());
}

#[test]
fn ink_survives_close_and_reopen() {
    let dir = tempdir().unwrap();
    let persistence: Arc<dyn InkPersistence> = Arc::new(FsInkPersistence::new(dir.path()));
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", r"C:\decks\lesson.pptx", 5);
    app.begin_show(1);
    let h = Harness::with_persistence(app, Some(persistence));
    h.supervisor.fast_check();

    h.app.advance_to(2);
    h.supervisor.pump_events();
    let ink = Arc::clone(h.supervisor.bridge().ink());
    assert!(ink.save_current_slide(2, &strokes()).is_saved());

    h.app.close_presentation();
    h.supervisor.pump_events();
    assert!(!h.supervisor.is_connected());
    assert_eq!(ink.load_slide(2), StrokeSet::default());
    h.take();

    h.app.open_presentation("lesson.pptx", r"C:\decks\lesson.pptx", 5);
    h.clock.advance(QUARANTINE);
    h.supervisor.fast_check();

    let events = h.take();
    assert!(events.iter().any(|event| matches!(
        event,
        PresentationEvent::PresentationOpened { resume_slide: Some(2), .. }
    )));
    assert_eq!(ink.load_slide(2), strokes());
}

#[test]
fn listener_disconnect_is_published_after_the_connect_batch() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 4);
    app.begin_show(2);
    let clock = Arc::new(ManualClock::default());
    let bus = Arc::new(EventBus::new(
        Arc::new(InlineDispatcher),
        Duration::from_secs(1),
    ));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let handle: Arc<OnceLock<Weak<ConnectionSupervisor>>> = Arc::new(OnceLock::new());

    let sink = Arc::clone(&seen);
    bus.subscribe(move |event| sink.lock().unwrap().push(event.clone()));
    let target = Arc::clone(&handle);
    bus.subscribe(move |event| {
        if *event == PresentationEvent::ConnectionChanged(true) {
            if let Some(supervisor) = target.get().and_then(Weak::upgrade) {
                supervisor.disconnect(DisconnectReason::ProbeLost);
            }
        }
    });

    let ink = Arc::new(InkBufferStore::new(InkTimings::default(), clock.clone()));
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(fake_probe(&app)),
        PresentationEventBridge::new(ink, None, false, clock.clone()),
        bus,
        clock,
        SupervisorTimings {
            release_pause: Duration::ZERO,
            ..SupervisorTimings::default()
        },
    ));
    handle.set(Arc::downgrade(&supervisor)).unwrap();

    supervisor.fast_check();

    let kinds: Vec<&str> = seen.lock().unwrap().iter().map(|event| event.kind()).collect();
    assert_eq!(
        kinds,
        vec![
            "connection_changed",
            "presentation_opened",
            "slide_show_state_changed",
            "slide_show_began",
            "slide_show_ended",
            "slide_show_state_changed",
            "presentation_closed",
            "connection_changed"
        ]
    );
    assert_eq!(
        seen.lock().unwrap().last(),
        Some(&PresentationEvent::ConnectionChanged(false))
    );
    assert!(!supervisor.is_connected());
    assert_eq!(app.live_references(), 0);
}

struct RefHeldProcess {
    app: FakePresentationApp,
}

impl ProcessProbe for RefHeldProcess {
    fn is_alive(&self, _pid: u32) -> bool {
        self.app.live_references() > 0
    }
    fn family_window_is_foreground(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
    fn family_has_visible_window(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
    fn family_has_taskbar_window(&self) -> anyhow::Result<bool> {
        Ok(false)
    }
    fn request_close(&self, _pid: u32) -> anyhow::Result<bool> {
        Ok(false)
    }
    fn kill(&self, _pid: u32) -> anyhow::Result<bool> {
        Ok(false)
    }
}

#[test]
fn companion_process_exits_once_references_are_released() {
    let app = FakePresentationApp::with_family(AppFamily::Compatible);
    let h = Harness::new(app);
    let guard = Arc::new(CompanionProcessGuard::new(
        Arc::new(RefHeldProcess { app: h.app.clone() }),
        CompanionTimings {
            poll: Duration::from_secs(1),
            release_wait: Duration::from_millis(300),
            close_wait: Duration::from_millis(300),
        },
        h.clock.clone(),
    ));
    guard.set_releaser(h.supervisor.releaser());
    h.supervisor.attach_companion_guard(Arc::clone(&guard));

    h.supervisor.fast_check();
    let record = guard.record().expect("companion tracked");
    assert_eq!(record.pid, h.app.pid());
    assert_eq!(record.phase, GuardPhase::Tracking);

    assert_eq!(
        guard.poll(),
        PollOutcome::Terminated(TerminationStep::ReleasedReferences)
    );
    assert!(!h.supervisor.is_connected());
    assert!(guard.record().is_none());
}

#[test]
fn primary_family_is_not_tracked() {
    let h = Harness::new(FakePresentationApp::new());
    let guard = Arc::new(CompanionProcessGuard::new(
        Arc::new(RefHeldProcess { app: h.app.clone() }),
        CompanionTimings::default(),
        h.clock.clone(),
    ));
    h.supervisor.attach_companion_guard(Arc::clone(&guard));
    h.supervisor.fast_check();
    assert!(guard.record().is_none());
    assert_eq!(guard.poll(), PollOutcome::Idle);
}
