//! Narrow capability interfaces over the external presentation application.
//!
//! Every foreign object is owned by exactly one Rust value; dropping the value
//! releases the underlying reference. Chains such as window collection →
//! window → view are therefore released in reverse acquisition order on every
//! exit path, including early returns through `?`.

#[cfg(target_os = "windows")]
pub mod com;
pub mod fake;
pub mod probe;

pub use probe::{
    inspect_candidate, select_best_candidate, CandidateTraits, HandleProbe, ObjectDirectory,
    RunningObjectProbe,
};

use std::sync::mpsc::Sender;
use thiserror::Error;

// HRESULTs meaning the object's owning process is gone or unreachable.
const RPC_E_DISCONNECTED: i32 = 0x8001_0108_u32 as i32;
const RPC_E_SERVER_DIED: i32 = 0x8001_0007_u32 as i32;
const RPC_E_SERVER_DIED_DNE: i32 = 0x8001_0012_u32 as i32;
const RPC_S_SERVER_UNAVAILABLE: i32 = 0x8007_06BA_u32 as i32;
const RPC_S_CALL_FAILED: i32 = 0x8007_06BE_u32 as i32;
const CO_E_OBJNOTCONNECTED: i32 = 0x8004_01FD_u32 as i32;
const E_INVALID_HANDLE: i32 = 0x8007_0006_u32 as i32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForeignError {
    /// The referenced object's owner no longer exists.
    #[error("foreign object reference is no longer valid")]
    InvalidReference,
    #[error("foreign call failed: {0}")]
    Transient(String),
    #[error("foreign capability not supported: {0}")]
    Unsupported(&'static str),
    #[error("not connected to a presentation application")]
    NotConnected,
}

pub type ForeignResult<T> = Result<T, ForeignError>;

impl ForeignError {
    pub fn is_invalid_reference(&self) -> bool {
        matches!(self, ForeignError::InvalidReference)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        ForeignError::Transient(message.into())
    }

    /// Classify a COM failure code.
    pub fn from_hresult(code: i32, message: impl Into<String>) -> Self {
        match code {
            RPC_E_DISCONNECTED
            | RPC_E_SERVER_DIED
            | RPC_E_SERVER_DIED_DNE
            | RPC_S_SERVER_UNAVAILABLE
            | RPC_S_CALL_FAILED
            | CO_E_OBJNOTCONNECTED
            | E_INVALID_HANDLE => ForeignError::InvalidReference,
            _ => ForeignError::Transient(format!("{} (0x{:08X})", message.into(), code as u32)),
        }
    }
}

/// Which implementation of the presentation application is on the other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppFamily {
    PowerPoint,
    /// A compatible clone that may leave an auxiliary process behind.
    Compatible,
}

impl AppFamily {
    pub fn has_companion_process(self) -> bool {
        matches!(self, AppFamily::Compatible)
    }
}

/// Lifecycle notifications raised by the external application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignEvent {
    PresentationOpen,
    PresentationClose,
    SlideShowBegin,
    SlideShowNextSlide,
    SlideShowEnd,
}

/// Root object of a running presentation application.
pub trait PresentationApp: Send {
    fn family(&self) -> AppFamily;

    fn process_id(&self) -> Option<u32>;

    /// Cheapest possible round trip; fails with `InvalidReference` once the
    /// application is gone.
    fn ping(&self) -> ForeignResult<()>;

    fn active_presentation(&self) -> ForeignResult<Option<Box<dyn Presentation>>>;

    fn slide_show_windows(&self) -> ForeignResult<Box<dyn SlideShowWindows>>;

    fn is_slide_show_foreground(&self) -> ForeignResult<bool>;

    /// Register for lifecycle notifications. `Ok(None)` means the backend
    /// cannot push notifications and must be observed by polling.
    fn subscribe(
        &self,
        sink: Sender<ForeignEvent>,
    ) -> ForeignResult<Option<Box<dyn EventSubscription>>>;
}

pub trait Presentation: Send {
    fn name(&self) -> ForeignResult<String>;
    fn full_path(&self) -> ForeignResult<String>;
    fn slide_count(&self) -> ForeignResult<u32>;
    fn start_slide_show(&self) -> ForeignResult<()>;
}

pub trait SlideShowWindows: Send {
    fn count(&self) -> ForeignResult<usize>;
    /// 1-based, as in the foreign object model.
    fn item(&self, index: usize) -> ForeignResult<Box<dyn SlideShowWindow>>;
}

pub trait SlideShowWindow: Send {
    fn view(&self) -> ForeignResult<Box<dyn SlideShowView>>;
}

pub trait SlideShowView: Send {
    fn current_slide(&self) -> ForeignResult<u32>;
    fn goto_slide(&self, slide: u32) -> ForeignResult<()>;
    fn next(&self) -> ForeignResult<()>;
    fn previous(&self) -> ForeignResult<()>;
    fn exit(&self) -> ForeignResult<()>;
}

/// Live registration for lifecycle notifications; dropping it unregisters.
pub trait EventSubscription: Send {}

/// Current slide of the first slideshow window, if a slideshow is running.
pub fn current_show_slide(app: &dyn PresentationApp) -> ForeignResult<Option<u32>> {
    let windows = app.slide_show_windows()?;
    if windows.count()? == 0 {
        return Ok(None);
    }
    let window = windows.item(1)?;
    let view = window.view()?;
    view.current_slide().map(Some)
}
