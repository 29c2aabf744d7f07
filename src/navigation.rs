use crate::foreign::{current_show_slide, ForeignError, ForeignResult, PresentationApp, SlideShowView};
use crate::supervisor::ConnectionSupervisor;
use std::sync::Arc;

/// Slide navigation on the connected application. Every call re-checks the
/// connection, releases each intermediate handle before returning and
/// reports plain success or failure.
pub struct NavigationFacade {
    supervisor: Arc<ConnectionSupervisor>,
}

impl NavigationFacade {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        Self { supervisor }
    }

    pub fn goto_slide(&self, slide: u32) -> bool {
        if slide == 0 {
            return false;
        }
        self.with_view("goto_slide", |view| view.goto_slide(slide))
    }

    pub fn next(&self) -> bool {
        self.with_view("next", |view| view.next())
    }

    pub fn previous(&self) -> bool {
        self.with_view("previous", |view| view.previous())
    }

    /// Start the slideshow of the active presentation. Fails if one is
    /// already running.
    pub fn start_show(&self) -> bool {
        self.run("start_show", |app| {
            if current_show_slide(app)?.is_some() {
                return Ok(false);
            }
            let Some(presentation) = app.active_presentation()? else {
                return Ok(false);
            };
            presentation.start_slide_show()?;
            Ok(true)
        })
    }

    pub fn end_show(&self) -> bool {
        self.with_view("end_show", |view| view.exit())
    }

    fn with_view(
        &self,
        op: &'static str,
        action: impl FnOnce(&dyn SlideShowView) -> ForeignResult<()>,
    ) -> bool {
        self.run(op, |app| {
            let windows = app.slide_show_windows()?;
            if windows.count()? == 0 {
                return Ok(false);
            }
            let window = windows.item(1)?;
            let view = window.view()?;
            action(view.as_ref())?;
            Ok(true)
        })
    }

    fn run(
        &self,
        op: &'static str,
        f: impl FnOnce(&dyn PresentationApp) -> ForeignResult<bool>,
    ) -> bool {
        if !self.supervisor.is_connected() {
            tracing::debug!(op, "navigation skipped, not connected");
            return false;
        }
        match self.supervisor.with_app(f) {
            Ok(done) => {
                tracing::debug!(op, done, "navigation");
                done
            }
            Err(ForeignError::InvalidReference) => {
                tracing::warn!(op, "navigation hit a dead application handle");
                false
            }
            Err(err) => {
                tracing::debug!(op, %err, "navigation failed");
                false
            }
        }
    }
}
