//! Detection and cleanup of the auxiliary process a clone presentation
//! application can leave behind once its windows are gone.

pub mod guard;
pub mod system;

pub use guard::{
    CompanionProcessGuard, CompanionProcessRecord, ForeignReleaser, GuardPhase, PollOutcome,
    ProcessProbe, TerminationStep,
};
pub use system::SystemProcessProbe;
