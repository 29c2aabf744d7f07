//! Live link between a classroom ink canvas and a running presentation
//! application: connection supervision, per-slide ink buffers with a
//! page-turn write lock, slide navigation and companion process cleanup.

pub mod bridge;
pub mod clock;
pub mod companion;
pub mod dispatch;
pub mod events;
pub mod foreign;
pub mod ink;
pub mod logging;
pub mod navigation;
pub mod runtime;
pub mod schedule;
pub mod session;
pub mod settings;
pub mod supervisor;
pub mod win_util;

pub use runtime::{RuntimeParts, SlideInkRuntime};
