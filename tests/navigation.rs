use slide_ink::bridge::PresentationEventBridge;
use slide_ink::clock::ManualClock;
use slide_ink::dispatch::InlineDispatcher;
use slide_ink::events::EventBus;
use slide_ink::foreign::fake::{fake_probe, FakePresentationApp};
use slide_ink::ink::InkBufferStore;
use slide_ink::navigation::NavigationFacade;
use slide_ink::settings::{InkTimings, SupervisorTimings};
use slide_ink::supervisor::ConnectionSupervisor;
use std::sync::Arc;
use std::time::Duration;

fn connected(app: &FakePresentationApp) -> (Arc<ConnectionSupervisor>, NavigationFacade) {
    let clock = Arc::new(ManualClock::default());
    let bus = Arc::new(EventBus::new(Arc::new(InlineDispatcher), Duration::from_secs(1)));
    let ink = Arc::new(InkBufferStore::new(InkTimings::default(), clock.clone()));
    let bridge = PresentationEventBridge::new(ink, None, false, clock.clone());
    let supervisor = Arc::new(ConnectionSupervisor::new(
        Arc::new(fake_probe(app)),
        bridge,
        bus,
        clock,
        SupervisorTimings {
            release_pause: Duration::ZERO,
            ..SupervisorTimings::default()
        },
    ));
    supervisor.fast_check();
    let navigation = NavigationFacade::new(Arc::clone(&supervisor));
    (supervisor, navigation)
}

fn deck_in_show(slide: u32) -> FakePresentationApp {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 5);
    app.begin_show(slide);
    app
}

#[test]
fn everything_fails_when_not_connected() {
    let app = deck_in_show(1);
    let (supervisor, navigation) = connected(&app);
    supervisor.stop_monitoring();

    assert!(!navigation.next());
    assert!(!navigation.previous());
    assert!(!navigation.goto_slide(2));
    assert!(!navigation.start_show());
    assert!(!navigation.end_show());
    assert_eq!(app.current_slide(), Some(1));
}

#[test]
fn goto_next_previous_move_the_show() {
    let app = deck_in_show(1);
    let (_supervisor, navigation) = connected(&app);

    assert!(navigation.goto_slide(4));
    assert_eq!(app.current_slide(), Some(4));
    assert!(navigation.next());
    assert_eq!(app.current_slide(), Some(5));
    assert!(navigation.previous());
    assert!(navigation.previous());
    assert_eq!(app.current_slide(), Some(3));
}

#[test]
fn goto_rejects_slides_outside_the_deck() {
    let app = deck_in_show(2);
    let (_supervisor, navigation) = connected(&app);

    assert!(!navigation.goto_slide(0));
    assert!(!navigation.goto_slide(6));
    assert_eq!(app.current_slide(), Some(2));
}

#[test]
fn intermediate_handles_are_released_after_every_call() {
    let app = deck_in_show(1);
    let (supervisor, navigation) = connected(&app);
    assert_eq!(app.live_references(), 1);

    navigation.next();
    navigation.goto_slide(9);
    navigation.previous();
    navigation.end_show();
    navigation.end_show();
    navigation.start_show();

    assert_eq!(app.live_references(), 1);
    supervisor.stop_monitoring();
    assert_eq!(app.live_references(), 0);
}

#[test]
fn end_show_is_idempotent() {
    let app = FakePresentationApp::new();
    app.open_presentation("lesson.pptx", "lesson.pptx", 5);
    let (_supervisor, navigation) = connected(&app);

    assert!(!navigation.end_show());
    assert!(navigation.start_show());
    assert_eq!(app.current_slide(), Some(1));
    assert!(!navigation.start_show());
    assert!(navigation.end_show());
    assert!(!navigation.end_show());
    assert_eq!(app.current_slide(), None);
}

#[test]
fn start_show_needs_a_presentation() {
    let app = FakePresentationApp::new();
    let (supervisor, navigation) = connected(&app);
    assert!(supervisor.is_connected());
    assert!(!navigation.start_show());
}

#[test]
fn dead_application_disconnects_during_navigation() {
    let app = deck_in_show(3);
    let (supervisor, navigation) = connected(&app);
    app.crash();

    assert!(!navigation.next());
    assert!(!supervisor.is_connected());
    assert_eq!(app.live_references(), 0);
}

#[test]
fn busy_application_fails_without_disconnecting() {
    let app = deck_in_show(3);
    let (supervisor, navigation) = connected(&app);
    app.set_busy(true);

    assert!(!navigation.goto_slide(2));
    assert!(supervisor.is_connected());
    app.set_busy(false);
    assert!(navigation.goto_slide(2));
}
