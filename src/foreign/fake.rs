//! Scripted in-memory presentation application.
//!
//! Behaves like the real automation object model closely enough to drive the
//! supervisor end to end: slide navigation raises the same notifications the
//! real application raises, a crashed instance fails every call with
//! `InvalidReference`, and every handed-out object handle is counted so tests
//! can assert that all foreign references were released.

use super::probe::{ObjectDirectory, RunningObjectProbe};
use super::{
    AppFamily, EventSubscription, ForeignError, ForeignEvent, ForeignResult, Presentation,
    PresentationApp, SlideShowView, SlideShowWindow, SlideShowWindows,
};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

static NEXT_FAKE_PID: AtomicU32 = AtomicU32::new(40_000);

#[derive(Debug, Clone)]
struct FakeDeck {
    name: String,
    path: String,
    slide_count: u32,
}

#[derive(Debug)]
struct FakeState {
    alive: bool,
    busy: bool,
    family: AppFamily,
    pid: u32,
    foreground: bool,
    push_events: bool,
    deck: Option<FakeDeck>,
    show: Option<u32>,
    sink: Option<Sender<ForeignEvent>>,
}

impl FakeState {
    fn emit(&self, event: ForeignEvent) {
        if !self.alive {
            return;
        }
        if let Some(sink) = &self.sink {
            let _ = sink.send(event);
        }
    }

    fn slide_count(&self) -> u32 {
        self.deck.as_ref().map(|d| d.slide_count).unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct FakePresentationApp {
    state: Arc<Mutex<FakeState>>,
    live_refs: Arc<AtomicUsize>,
}

impl Default for FakePresentationApp {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePresentationApp {
    pub fn new() -> Self {
        Self::with_family(AppFamily::PowerPoint)
    }

    pub fn with_family(family: AppFamily) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                alive: true,
                busy: false,
                family,
                pid: NEXT_FAKE_PID.fetch_add(1, Ordering::SeqCst),
                foreground: true,
                push_events: true,
                deck: None,
                show: None,
                sink: None,
            })),
            live_refs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A new counted handle to the application root object.
    pub fn handle(&self) -> Box<dyn PresentationApp> {
        Box::new(FakeAppHandle {
            app: self.clone(),
            _token: RefToken::new(&self.live_refs),
        })
    }

    /// Number of object handles currently held by callers.
    pub fn live_references(&self) -> usize {
        self.live_refs.load(Ordering::SeqCst)
    }

    pub fn pid(&self) -> u32 {
        self.lock().pid
    }

    pub fn is_subscribed(&self) -> bool {
        self.lock().sink.is_some()
    }

    pub fn current_slide(&self) -> Option<u32> {
        self.lock().show
    }

    pub fn open_presentation(&self, name: &str, path: &str, slide_count: u32) {
        let mut state = self.lock();
        state.deck = Some(FakeDeck {
            name: name.to_string(),
            path: path.to_string(),
            slide_count,
        });
        state.emit(ForeignEvent::PresentationOpen);
    }

    pub fn close_presentation(&self) {
        let mut state = self.lock();
        if state.show.take().is_some() {
            state.emit(ForeignEvent::SlideShowEnd);
        }
        if state.deck.take().is_some() {
            state.emit(ForeignEvent::PresentationClose);
        }
    }

    pub fn begin_show(&self, slide: u32) {
        let mut state = self.lock();
        if state.deck.is_none() {
            return;
        }
        state.show = Some(slide.max(1));
        state.emit(ForeignEvent::SlideShowBegin);
    }

    /// Simulates the presenter turning the page from the application's own UI.
    pub fn advance_to(&self, slide: u32) {
        let mut state = self.lock();
        if state.show.is_none() {
            return;
        }
        let last = state.slide_count() + 1;
        state.show = Some(slide.clamp(1, last));
        state.emit(ForeignEvent::SlideShowNextSlide);
    }

    /// Raise a slide notification without moving, as the real application
    /// sometimes does twice for one page turn.
    pub fn repeat_slide_notification(&self) {
        self.lock().emit(ForeignEvent::SlideShowNextSlide);
    }

    pub fn end_show(&self) {
        let mut state = self.lock();
        if state.show.take().is_some() {
            state.emit(ForeignEvent::SlideShowEnd);
        }
    }

    /// Every subsequent call through any handle fails with `InvalidReference`.
    pub fn crash(&self) {
        let mut state = self.lock();
        state.alive = false;
        state.sink = None;
    }

    pub fn revive(&self) {
        self.lock().alive = true;
    }

    pub fn set_busy(&self, busy: bool) {
        self.lock().busy = busy;
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.lock().foreground = foreground;
    }

    /// Disable push notifications so the application must be observed by
    /// polling, like the automation binding.
    pub fn set_push_events(&self, enabled: bool) {
        self.lock().push_events = enabled;
    }
}

struct RefToken(Arc<AtomicUsize>);

impl RefToken {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for RefToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn checked(app: &FakePresentationApp) -> ForeignResult<MutexGuard<'_, FakeState>> {
    let state = app.lock();
    if !state.alive {
        return Err(ForeignError::InvalidReference);
    }
    if state.busy {
        return Err(ForeignError::transient("application is busy"));
    }
    Ok(state)
}

fn child<T>(app: &FakePresentationApp, make: impl FnOnce(FakePresentationApp, RefToken) -> T) -> T {
    make(app.clone(), RefToken::new(&app.live_refs))
}

struct FakeAppHandle {
    app: FakePresentationApp,
    _token: RefToken,
}

impl PresentationApp for FakeAppHandle {
    fn family(&self) -> AppFamily {
        self.app.lock().family
    }

    fn process_id(&self) -> Option<u32> {
        Some(self.app.lock().pid)
    }

    fn ping(&self) -> ForeignResult<()> {
        checked(&self.app).map(|_| ())
    }

    fn active_presentation(&self) -> ForeignResult<Option<Box<dyn Presentation>>> {
        let state = checked(&self.app)?;
        if state.deck.is_none() {
            return Ok(None);
        }
        drop(state);
        Ok(Some(child(&self.app, |app, token| {
            Box::new(FakePresentationHandle { app, _token: token }) as Box<dyn Presentation>
        })))
    }

    fn slide_show_windows(&self) -> ForeignResult<Box<dyn SlideShowWindows>> {
        drop(checked(&self.app)?);
        Ok(child(&self.app, |app, token| {
            Box::new(FakeWindowsHandle { app, _token: token }) as Box<dyn SlideShowWindows>
        }))
    }

    fn is_slide_show_foreground(&self) -> ForeignResult<bool> {
        let state = checked(&self.app)?;
        Ok(state.show.is_some() && state.foreground)
    }

    fn subscribe(
        &self,
        sink: Sender<ForeignEvent>,
    ) -> ForeignResult<Option<Box<dyn EventSubscription>>> {
        let mut state = checked(&self.app)?;
        if !state.push_events {
            return Ok(None);
        }
        state.sink = Some(sink);
        drop(state);
        Ok(Some(Box::new(FakeSubscription {
            app: self.app.clone(),
        })))
    }
}

struct FakeSubscription {
    app: FakePresentationApp,
}

impl EventSubscription for FakeSubscription {}

impl Drop for FakeSubscription {
    fn drop(&mut self) {
        self.app.lock().sink = None;
    }
}

struct FakePresentationHandle {
    app: FakePresentationApp,
    _token: RefToken,
}

impl FakePresentationHandle {
    fn deck(&self) -> ForeignResult<FakeDeck> {
        checked(&self.app)?
            .deck
            .clone()
            .ok_or_else(|| ForeignError::transient("presentation was closed"))
    }
}

impl Presentation for FakePresentationHandle {
    fn name(&self) -> ForeignResult<String> {
        self.deck().map(|d| d.name)
    }

    fn full_path(&self) -> ForeignResult<String> {
        self.deck().map(|d| d.path)
    }

    fn slide_count(&self) -> ForeignResult<u32> {
        self.deck().map(|d| d.slide_count)
    }

    fn start_slide_show(&self) -> ForeignResult<()> {
        let mut state = checked(&self.app)?;
        if state.deck.is_none() {
            return Err(ForeignError::transient("presentation was closed"));
        }
        state.show = Some(1);
        state.emit(ForeignEvent::SlideShowBegin);
        Ok(())
    }
}

struct FakeWindowsHandle {
    app: FakePresentationApp,
    _token: RefToken,
}

impl SlideShowWindows for FakeWindowsHandle {
    fn count(&self) -> ForeignResult<usize> {
        Ok(usize::from(checked(&self.app)?.show.is_some()))
    }

    fn item(&self, index: usize) -> ForeignResult<Box<dyn SlideShowWindow>> {
        let state = checked(&self.app)?;
        if index != 1 || state.show.is_none() {
            return Err(ForeignError::transient(format!(
                "no slideshow window at index {index}"
            )));
        }
        drop(state);
        Ok(child(&self.app, |app, token| {
            Box::new(FakeWindowHandle { app, _token: token }) as Box<dyn SlideShowWindow>
        }))
    }
}

struct FakeWindowHandle {
    app: FakePresentationApp,
    _token: RefToken,
}

impl SlideShowWindow for FakeWindowHandle {
    fn view(&self) -> ForeignResult<Box<dyn SlideShowView>> {
        drop(checked(&self.app)?);
        Ok(child(&self.app, |app, token| {
            Box::new(FakeViewHandle { app, _token: token }) as Box<dyn SlideShowView>
        }))
    }
}

struct FakeViewHandle {
    app: FakePresentationApp,
    _token: RefToken,
}

impl FakeViewHandle {
    fn running(&self) -> ForeignResult<(MutexGuard<'_, FakeState>, u32)> {
        let state = checked(&self.app)?;
        match state.show {
            Some(slide) => Ok((state, slide)),
            None => Err(ForeignError::transient("slideshow view is no longer active")),
        }
    }
}

impl SlideShowView for FakeViewHandle {
    fn current_slide(&self) -> ForeignResult<u32> {
        self.running().map(|(_, slide)| slide)
    }

    fn goto_slide(&self, slide: u32) -> ForeignResult<()> {
        let (mut state, _) = self.running()?;
        if slide == 0 || slide > state.slide_count() {
            return Err(ForeignError::transient(format!(
                "slide {slide} is out of range"
            )));
        }
        state.show = Some(slide);
        state.emit(ForeignEvent::SlideShowNextSlide);
        Ok(())
    }

    fn next(&self) -> ForeignResult<()> {
        let (mut state, slide) = self.running()?;
        if slide > state.slide_count() {
            state.show = None;
            state.emit(ForeignEvent::SlideShowEnd);
        } else {
            state.show = Some(slide + 1);
            state.emit(ForeignEvent::SlideShowNextSlide);
        }
        Ok(())
    }

    fn previous(&self) -> ForeignResult<()> {
        let (mut state, slide) = self.running()?;
        if slide > 1 {
            state.show = Some(slide - 1);
            state.emit(ForeignEvent::SlideShowNextSlide);
        }
        Ok(())
    }

    fn exit(&self) -> ForeignResult<()> {
        let (mut state, _) = self.running()?;
        state.show = None;
        state.emit(ForeignEvent::SlideShowEnd);
        Ok(())
    }
}

/// Object directory over a set of fake application instances.
#[derive(Default)]
pub struct FakeDirectory {
    direct: Mutex<Option<FakePresentationApp>>,
    running: Mutex<Vec<FakePresentationApp>>,
    scans: AtomicUsize,
}

impl FakeDirectory {
    pub fn single(app: &FakePresentationApp) -> Self {
        let directory = Self::default();
        directory.set_direct(Some(app.clone()));
        directory.add_running(app.clone());
        directory
    }

    pub fn set_direct(&self, app: Option<FakePresentationApp>) {
        *self.direct.lock().unwrap_or_else(PoisonError::into_inner) = app;
    }

    pub fn add_running(&self, app: FakePresentationApp) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(app);
    }

    /// Forget every registered instance, as if the application exited.
    pub fn clear(&self) {
        self.set_direct(None);
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl ObjectDirectory for FakeDirectory {
    fn direct_lookup(&self) -> ForeignResult<Option<Box<dyn PresentationApp>>> {
        Ok(self
            .direct
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(FakePresentationApp::handle))
    }

    fn scan_running(&self) -> ForeignResult<Vec<Box<dyn PresentationApp>>> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(FakePresentationApp::handle)
            .collect())
    }
}

pub type FakeProbe = RunningObjectProbe<FakeDirectory>;

/// Probe that finds exactly `app`.
pub fn fake_probe(app: &FakePresentationApp) -> FakeProbe {
    RunningObjectProbe::new(FakeDirectory::single(app))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foreign::current_show_slide;

    #[test]
    fn handles_are_counted_and_released() {
        let app = FakePresentationApp::new();
        app.open_presentation("deck.pptx", "deck.pptx", 4);
        app.begin_show(2);
        let root = app.handle();
        {
            let windows = root.slide_show_windows().expect("windows");
            let window = windows.item(1).expect("window");
            let _view = window.view().expect("view");
            assert_eq!(app.live_references(), 4);
        }
        assert_eq!(app.live_references(), 1);
        drop(root);
        assert_eq!(app.live_references(), 0);
    }

    #[test]
    fn crashed_app_fails_with_invalid_reference() {
        let app = FakePresentationApp::new();
        let root = app.handle();
        app.crash();
        assert_eq!(root.ping(), Err(ForeignError::InvalidReference));
    }

    #[test]
    fn next_past_end_screen_exits_show() {
        let app = FakePresentationApp::new();
        app.open_presentation("deck.pptx", "deck.pptx", 2);
        app.begin_show(2);
        let root = app.handle();
        let windows = root.slide_show_windows().expect("windows");
        let window = windows.item(1).expect("window");
        let view = window.view().expect("view");
        view.next().expect("to end screen");
        assert_eq!(app.current_slide(), Some(3));
        view.next().expect("exit");
        assert_eq!(app.current_slide(), None);
        drop((view, window, windows));
        assert_eq!(current_show_slide(root.as_ref()), Ok(None));
    }
}
