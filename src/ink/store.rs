use super::lock::InkLock;
use super::model::StrokeSet;
use super::persist::InkPersistence;
use crate::clock::Clock;
use crate::session::Fingerprint;
use crate::settings::InkTimings;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { bytes: usize },
    /// Refused by the slide lock. Expected during page turns.
    Rejected,
    InvalidSlide,
    EncodeFailed,
}

impl SaveOutcome {
    pub fn is_saved(self) -> bool {
        matches!(self, SaveOutcome::Saved { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub evicted: usize,
    pub freed_bytes: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub written: usize,
    pub deleted: usize,
    pub failed: usize,
    pub position: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InkStoreStats {
    pub buffers: usize,
    pub total_bytes: usize,
    pub locked_slide: Option<u32>,
    pub last_switched: Option<u32>,
}

#[derive(Debug)]
struct InkBuffer {
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct StoreState {
    /// Sparse by slide number; slides are 1-based.
    buffers: BTreeMap<u32, InkBuffer>,
    /// 0 while no presentation is attached, which leaves only slide 1 writable.
    slide_count: u32,
    lock: InkLock,
    last_switch: Option<(u32, Instant)>,
}

impl StoreState {
    fn accepts(&self, slide: u32) -> bool {
        slide >= 1 && slide <= self.slide_count.saturating_add(1)
    }

    fn buffer(&self, slide: u32) -> Option<&InkBuffer> {
        self.buffers.get(&slide)
    }

    fn replace(&mut self, slide: u32, bytes: Vec<u8>) -> usize {
        let len = bytes.len();
        if let Some(previous) = self.buffers.insert(slide, InkBuffer { bytes }) {
            drop(previous);
        }
        len
    }

    fn total_bytes(&self) -> usize {
        self.buffers.values().map(|b| b.bytes.len()).sum()
    }

    fn last_switched(&self) -> Option<u32> {
        self.last_switch.map(|(slide, _)| slide)
    }

    fn stats(&self) -> InkStoreStats {
        InkStoreStats {
            buffers: self.buffers.len(),
            total_bytes: self.total_bytes(),
            locked_slide: self.lock.locked_slide(),
            last_switched: self.last_switched(),
        }
    }
}

/// Per-slide serialized ink, gated by a single write lock.
pub struct InkBufferStore {
    state: Mutex<StoreState>,
    timings: InkTimings,
    clock: Arc<dyn Clock>,
}

impl InkBufferStore {
    pub fn new(timings: InkTimings, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            timings,
            clock,
        }
    }

    pub fn timings(&self) -> &InkTimings {
        &self.timings
    }

    fn lock_state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop every buffer and the lock, and bound indices to `slide_count + 1`.
    pub fn reset_for(&self, slide_count: u32) {
        let mut state = self.lock_state();
        *state = StoreState {
            slide_count,
            ..StoreState::default()
        };
    }

    pub fn can_write(&self, slide: u32) -> bool {
        let state = self.lock_state();
        state.accepts(slide)
            && state
                .lock
                .decide(slide, self.clock.now(), self.timings.grace_window)
                .is_allowed()
    }

    pub fn save_current_slide(&self, slide: u32, strokes: &StrokeSet) -> SaveOutcome {
        self.save(slide, strokes, true)
    }

    /// Save regardless of the lock. Only for the final flush before teardown.
    pub fn force_save(&self, slide: u32, strokes: &StrokeSet) -> SaveOutcome {
        self.save(slide, strokes, false)
    }

    fn save(&self, slide: u32, strokes: &StrokeSet, respect_lock: bool) -> SaveOutcome {
        let bytes = match strokes.to_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::warn!(slide, error = %err, "failed to encode ink");
                return SaveOutcome::EncodeFailed;
            }
        };
        let mut state = self.lock_state();
        if !state.accepts(slide) {
            tracing::debug!(slide, slide_count = state.slide_count, "ink save for invalid slide");
            return SaveOutcome::InvalidSlide;
        }
        if respect_lock {
            let decision = state
                .lock
                .decide(slide, self.clock.now(), self.timings.grace_window);
            if !decision.is_allowed() {
                tracing::trace!(
                    slide,
                    locked = ?state.lock.locked_slide(),
                    "ink save rejected by slide lock"
                );
                return SaveOutcome::Rejected;
            }
        }
        let bytes = state.replace(slide, bytes);
        SaveOutcome::Saved { bytes }
    }

    pub fn load_slide(&self, slide: u32) -> StrokeSet {
        let bytes = self.lock_state().buffer(slide).map(|b| b.bytes.clone());
        decode(slide, bytes)
    }

    /// Lock `slide` and return its ink. A repeat of the previous switch within
    /// the duplicate window only reloads.
    pub fn switch_to(&self, slide: u32) -> StrokeSet {
        let bytes = {
            let mut state = self.lock_state();
            if !state.accepts(slide) {
                tracing::debug!(slide, "switch to invalid slide ignored");
                return StrokeSet::default();
            }
            let now = self.clock.now();
            let repeat = matches!(
                state.last_switch,
                Some((last, at)) if last == slide
                    && now.saturating_duration_since(at) < self.timings.duplicate_switch
            );
            if repeat {
                tracing::trace!(slide, "duplicate slide switch absorbed");
            } else {
                state.lock.lock_for(slide, now, self.timings.lock_window);
                state.last_switch = Some((slide, now));
            }
            state.buffer(slide).map(|b| b.bytes.clone())
        };
        decode(slide, bytes)
    }

    pub fn clear_all(&self) {
        let mut state = self.lock_state();
        let freed = state.total_bytes();
        state.buffers.clear();
        tracing::debug!(freed_bytes = freed, "cleared all ink buffers");
    }

    pub fn total_bytes(&self) -> usize {
        self.lock_state().total_bytes()
    }

    pub fn stats(&self) -> InkStoreStats {
        self.lock_state().stats()
    }

    /// Evict everything but the locked and last switched slides when over the
    /// memory ceiling.
    pub fn cleanup_memory(&self) -> CleanupReport {
        let mut state = self.lock_state();
        let total = state.total_bytes();
        if total <= self.timings.memory_ceiling_bytes {
            return CleanupReport::default();
        }
        let keep = [state.lock.locked_slide(), state.last_switched()];
        let mut report = CleanupReport::default();
        state.buffers.retain(|slide, buffer| {
            if keep.contains(&Some(*slide)) {
                return true;
            }
            report.evicted += 1;
            report.freed_bytes += buffer.bytes.len();
            false
        });
        tracing::info!(
            evicted = report.evicted,
            freed_bytes = report.freed_bytes,
            remaining_bytes = state.total_bytes(),
            ceiling = self.timings.memory_ceiling_bytes,
            "ink memory ceiling exceeded"
        );
        report
    }

    /// Write every buffer to `persistence` under `fingerprint`. Buffers below
    /// the artifact threshold count as empty and have their artifact removed.
    pub fn flush(&self, fingerprint: &Fingerprint, persistence: &dyn InkPersistence) -> FlushReport {
        let (buffers, position) = {
            let state = self.lock_state();
            let buffers: Vec<(u32, Vec<u8>)> = state
                .buffers
                .iter()
                .map(|(slide, b)| (*slide, b.bytes.clone()))
                .collect();
            let position = state.last_switched().or(state.lock.locked_slide());
            (buffers, position)
        };

        let mut report = FlushReport::default();
        for (slide, bytes) in buffers {
            if bytes.len() < self.timings.min_artifact_bytes {
                match persistence.delete_slide_artifact(fingerprint, slide) {
                    Ok(()) => report.deleted += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(slide, %fingerprint, error = %err, "failed to delete ink artifact");
                    }
                }
            } else {
                match persistence.write_slide_artifact(fingerprint, slide, &bytes) {
                    Ok(()) => report.written += 1,
                    Err(err) => {
                        report.failed += 1;
                        tracing::warn!(slide, %fingerprint, error = %err, "failed to write ink artifact");
                    }
                }
            }
        }
        if let Some(slide) = position {
            match persistence.write_position_marker(fingerprint, slide) {
                Ok(()) => report.position = Some(slide),
                Err(err) => {
                    report.failed += 1;
                    tracing::warn!(slide, %fingerprint, error = %err, "failed to write position marker");
                }
            }
        }
        tracing::info!(
            %fingerprint,
            written = report.written,
            deleted = report.deleted,
            failed = report.failed,
            "flushed ink"
        );
        report
    }

    /// Load persisted artifacts for `fingerprint` and return the saved resume
    /// position, if any.
    pub fn restore(&self, fingerprint: &Fingerprint, persistence: &dyn InkPersistence) -> Option<u32> {
        let artifacts = persistence.read_all_artifacts(fingerprint).unwrap_or_else(|err| {
            tracing::warn!(%fingerprint, error = %err, "failed to read persisted ink");
            BTreeMap::new()
        });
        let position = persistence.read_position_marker(fingerprint).unwrap_or_else(|err| {
            tracing::warn!(%fingerprint, error = %err, "failed to read position marker");
            None
        });

        let mut state = self.lock_state();
        let mut restored = 0usize;
        for (slide, bytes) in artifacts {
            if !state.accepts(slide) || bytes.len() < self.timings.min_artifact_bytes {
                continue;
            }
            state.replace(slide, bytes);
            restored += 1;
        }
        let position = position.filter(|slide| state.accepts(*slide));
        tracing::info!(%fingerprint, restored, ?position, "restored persisted ink");
        position
    }
}

fn decode(slide: u32, bytes: Option<Vec<u8>>) -> StrokeSet {
    let Some(bytes) = bytes else {
        return StrokeSet::default();
    };
    StrokeSet::from_bytes(&bytes).unwrap_or_else(|err| {
        tracing::warn!(slide, error = %err, "discarding unreadable ink buffer");
        StrokeSet::default()
    })
}
