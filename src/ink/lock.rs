use std::time::{Duration, Instant};

/// Why a write was allowed or refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDecision {
    /// No lock held, or it has run out.
    Expired,
    /// The write targets the locked slide.
    CurrentSlide,
    /// Late write to another slide right after the switch.
    Grace,
    Rejected,
}

impl WriteDecision {
    pub fn is_allowed(self) -> bool {
        !matches!(self, WriteDecision::Rejected)
    }
}

/// Single write lock shared by all slides of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InkLock {
    locked_slide: Option<u32>,
    started_at: Option<Instant>,
    expiry: Option<Instant>,
}

impl InkLock {
    /// Lock `slide` for `window` starting at `now`. The expiry never moves
    /// backwards.
    pub fn lock_for(&mut self, slide: u32, now: Instant, window: Duration) {
        let candidate = now + window;
        self.locked_slide = Some(slide);
        self.started_at = Some(now);
        self.expiry = Some(match self.expiry {
            Some(current) if current > candidate => current,
            _ => candidate,
        });
    }

    pub fn decide(&self, slide: u32, now: Instant, grace: Duration) -> WriteDecision {
        let Some(expiry) = self.expiry else {
            return WriteDecision::Expired;
        };
        if now >= expiry {
            return WriteDecision::Expired;
        }
        if self.locked_slide == Some(slide) {
            return WriteDecision::CurrentSlide;
        }
        let in_grace = self
            .started_at
            .is_some_and(|started| now.saturating_duration_since(started) < grace);
        if in_grace {
            WriteDecision::Grace
        } else {
            WriteDecision::Rejected
        }
    }

    pub fn locked_slide(&self) -> Option<u32> {
        self.locked_slide
    }

    pub fn expiry(&self) -> Option<Instant> {
        self.expiry
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
