pub mod lock;
pub mod model;
pub mod persist;
pub mod store;

pub use lock::{InkLock, WriteDecision};
pub use model::{InkColor, InkStroke, InkTool, StrokeSet};
pub use persist::{FsInkPersistence, InkPersistence};
pub use store::{CleanupReport, FlushReport, InkBufferStore, InkStoreStats, SaveOutcome};
