use crate::clock::Clock;
use crate::events::PresentationEvent;
use crate::foreign::{current_show_slide, ForeignError, ForeignEvent, ForeignResult, PresentationApp};
use crate::ink::{InkBufferStore, InkPersistence};
use crate::session::{PresentationInfo, PresentationSession};
use std::sync::Arc;

/// What the foreign application looks like right now.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub presentation: Option<PresentationInfo>,
    pub slide_show_active: bool,
    pub current_slide: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    Continue,
    /// The connection must be torn down.
    Disconnect,
}

fn tolerate<T>(result: ForeignResult<T>, what: &str) -> ForeignResult<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(ForeignError::InvalidReference) => Err(ForeignError::InvalidReference),
        Err(err) => {
            tracing::debug!(lookup = what, %err, "snapshot lookup failed");
            Ok(None)
        }
    }
}

/// Best-effort refresh. Individual lookups may fail without aborting the
/// whole refresh; only an invalid reference is reported.
pub fn refresh_snapshot(app: &dyn PresentationApp) -> ForeignResult<SessionSnapshot> {
    let mut snapshot = SessionSnapshot::default();
    if let Some(Some(presentation)) = tolerate(app.active_presentation(), "active presentation")? {
        snapshot.presentation = tolerate(
            PresentationInfo::read(presentation.as_ref()),
            "presentation info",
        )?;
    }
    if let Some(slide) = tolerate(current_show_slide(app), "slideshow view")? {
        snapshot.slide_show_active = slide.is_some();
        snapshot.current_slide = slide;
    }
    Ok(snapshot)
}

/// Notifications that would turn `session` into `snapshot`, for backends
/// that cannot push them.
pub fn diff(session: Option<&PresentationSession>, snapshot: &SessionSnapshot) -> Vec<ForeignEvent> {
    let mut events = Vec::new();
    // A different presentation reopens in place; only a missing one closes.
    let fresh = match (session, &snapshot.presentation) {
        (None, None) => return events,
        (Some(current), None) => {
            if current.slide_show_active {
                events.push(ForeignEvent::SlideShowEnd);
            }
            events.push(ForeignEvent::PresentationClose);
            return events;
        }
        (None, Some(_)) => true,
        (Some(current), Some(info)) => current.info.fingerprint != info.fingerprint,
    };
    if fresh {
        events.push(ForeignEvent::PresentationOpen);
    }

    let was_active = !fresh && session.is_some_and(|s| s.slide_show_active);
    match (was_active, snapshot.slide_show_active) {
        (false, true) => events.push(ForeignEvent::SlideShowBegin),
        (true, false) => events.push(ForeignEvent::SlideShowEnd),
        (true, true) if session.and_then(|s| s.current_slide) != snapshot.current_slide => {
            events.push(ForeignEvent::SlideShowNextSlide)
        }
        _ => {}
    }
    events
}

/// Turns foreign lifecycle notifications into session changes, ink lock
/// transitions and normalized events.
pub struct PresentationEventBridge {
    ink: Arc<InkBufferStore>,
    persistence: Option<Arc<dyn InkPersistence>>,
    auto_save: bool,
    clock: Arc<dyn Clock>,
}

impl PresentationEventBridge {
    pub fn new(
        ink: Arc<InkBufferStore>,
        persistence: Option<Arc<dyn InkPersistence>>,
        auto_save: bool,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ink,
            persistence,
            auto_save,
            clock,
        }
    }

    pub fn ink(&self) -> &Arc<InkBufferStore> {
        &self.ink
    }

    /// Adopt whatever the application already shows at connect time.
    pub fn on_connected(
        &self,
        app: &dyn PresentationApp,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) -> ForeignResult<()> {
        let snapshot = refresh_snapshot(app)?;
        if let Some(info) = snapshot.presentation.clone() {
            self.open_session(info, session, outbox);
            if snapshot.slide_show_active {
                self.begin_show(&snapshot, session, outbox);
            }
        }
        Ok(())
    }

    pub fn handle(
        &self,
        event: ForeignEvent,
        app: &dyn PresentationApp,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) -> ForeignResult<BridgeOutcome> {
        tracing::debug!(?event, "foreign lifecycle event");
        if event == ForeignEvent::PresentationClose {
            self.teardown(session, outbox);
            return Ok(BridgeOutcome::Disconnect);
        }

        let snapshot = refresh_snapshot(app)?;
        match event {
            ForeignEvent::PresentationOpen => {
                if let Some(info) = snapshot.presentation.clone() {
                    self.open_session(info, session, outbox);
                }
            }
            ForeignEvent::SlideShowBegin => {
                self.ensure_session(&snapshot, session, outbox);
                if snapshot.slide_show_active {
                    self.begin_show(&snapshot, session, outbox);
                }
            }
            ForeignEvent::SlideShowNextSlide => {
                self.ensure_session(&snapshot, session, outbox);
                self.slide_changed(&snapshot, session, outbox);
            }
            ForeignEvent::SlideShowEnd => self.end_show(session, outbox),
            ForeignEvent::PresentationClose => {}
        }
        Ok(BridgeOutcome::Continue)
    }

    /// Flush and drop the session. Used on close and on every disconnect.
    pub fn teardown(
        &self,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        let Some(closed) = session.take() else {
            return;
        };
        if closed.slide_show_active {
            outbox.push(PresentationEvent::SlideShowEnded);
            outbox.push(PresentationEvent::SlideShowStateChanged(false));
        }
        self.persist(&closed);
        self.ink.reset_for(0);
        tracing::info!(presentation = %closed.info.name, "presentation session closed");
        outbox.push(PresentationEvent::PresentationClosed);
    }

    fn ensure_session(
        &self,
        snapshot: &SessionSnapshot,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        if session.is_none() {
            if let Some(info) = snapshot.presentation.clone() {
                self.open_session(info, session, outbox);
            }
        }
    }

    fn open_session(
        &self,
        info: PresentationInfo,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        if session
            .as_ref()
            .is_some_and(|current| current.info.fingerprint == info.fingerprint)
        {
            return;
        }
        self.teardown(session, outbox);

        self.ink.reset_for(info.slide_count);
        let resume_slide = match (&self.persistence, self.auto_save) {
            (Some(persistence), true) => self.ink.restore(&info.fingerprint, persistence.as_ref()),
            _ => None,
        };
        tracing::info!(
            presentation = %info.name,
            slides = info.slide_count,
            fingerprint = %info.fingerprint,
            ?resume_slide,
            "presentation session opened"
        );
        *session = Some(PresentationSession::new(info.clone(), self.clock.now()));
        outbox.push(PresentationEvent::PresentationOpened { info, resume_slide });
    }

    fn begin_show(
        &self,
        snapshot: &SessionSnapshot,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        let Some(current) = session.as_mut() else {
            return;
        };
        let slide = snapshot.current_slide.unwrap_or(1);
        let already_running = current.slide_show_active;
        current.slide_show_active = true;
        current.current_slide = Some(slide);
        let ink = self.ink.switch_to(slide);
        if !already_running {
            outbox.push(PresentationEvent::SlideShowStateChanged(true));
        }
        outbox.push(PresentationEvent::SlideShowBegan { slide, ink });
    }

    fn slide_changed(
        &self,
        snapshot: &SessionSnapshot,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        let Some(slide) = snapshot.current_slide else {
            return;
        };
        let Some(current) = session.as_mut() else {
            return;
        };
        if !current.slide_show_active {
            self.begin_show(snapshot, session, outbox);
            return;
        }
        let changed = current.current_slide != Some(slide);
        current.current_slide = Some(slide);
        let ink = self.ink.switch_to(slide);
        if changed {
            outbox.push(PresentationEvent::SlideChanged { slide, ink });
        }
    }

    fn end_show(
        &self,
        session: &mut Option<PresentationSession>,
        outbox: &mut Vec<PresentationEvent>,
    ) {
        let Some(current) = session.as_mut() else {
            return;
        };
        if !current.slide_show_active {
            return;
        }
        current.slide_show_active = false;
        current.current_slide = None;
        self.persist(current);
        outbox.push(PresentationEvent::SlideShowEnded);
        outbox.push(PresentationEvent::SlideShowStateChanged(false));
    }

    fn persist(&self, session: &PresentationSession) {
        if !self.auto_save {
            return;
        }
        if let Some(persistence) = &self.persistence {
            self.ink.flush(session.fingerprint(), persistence.as_ref());
        }
    }
}
