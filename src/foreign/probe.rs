use super::{current_show_slide, ForeignError, ForeignResult, PresentationApp};

/// Finds a live handle to the external application.
pub trait HandleProbe: Send + Sync {
    fn probe(&self) -> ForeignResult<Option<Box<dyn PresentationApp>>>;
}

/// Where application objects can be looked up: a direct registration lookup
/// and a scan of every running object.
pub trait ObjectDirectory: Send + Sync {
    fn direct_lookup(&self) -> ForeignResult<Option<Box<dyn PresentationApp>>>;
    fn scan_running(&self) -> ForeignResult<Vec<Box<dyn PresentationApp>>>;
}

/// What a probe candidate currently looks like.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateTraits {
    pub has_active_presentation: bool,
    pub has_slide_show_window: bool,
    pub slide_show_foreground: bool,
}

impl CandidateTraits {
    /// Lexicographic priority: document > slideshow window > foreground.
    pub fn rank(&self) -> u8 {
        (u8::from(self.has_active_presentation) << 2)
            | (u8::from(self.has_slide_show_window) << 1)
            | u8::from(self.slide_show_foreground)
    }
}

/// Best-effort inspection; only an invalid reference is an error.
pub fn inspect_candidate(app: &dyn PresentationApp) -> ForeignResult<CandidateTraits> {
    let mut traits = CandidateTraits::default();
    match app.active_presentation() {
        Ok(presentation) => traits.has_active_presentation = presentation.is_some(),
        Err(ForeignError::InvalidReference) => return Err(ForeignError::InvalidReference),
        Err(_) => {}
    }
    match current_show_slide(app) {
        Ok(slide) => traits.has_slide_show_window = slide.is_some(),
        Err(ForeignError::InvalidReference) => return Err(ForeignError::InvalidReference),
        Err(_) => {}
    }
    if traits.has_slide_show_window {
        traits.slide_show_foreground = app.is_slide_show_foreground().unwrap_or(false);
    }
    Ok(traits)
}

/// Pick the highest ranked live candidate; ties keep scan order. Every other
/// candidate is released before returning.
pub fn select_best_candidate(
    candidates: Vec<Box<dyn PresentationApp>>,
) -> Option<Box<dyn PresentationApp>> {
    let mut best: Option<(u8, Box<dyn PresentationApp>)> = None;
    for candidate in candidates {
        let rank = match inspect_candidate(candidate.as_ref()) {
            Ok(traits) => traits.rank(),
            Err(err) => {
                tracing::debug!(%err, "skipping dead probe candidate");
                continue;
            }
        };
        let replace = best
            .as_ref()
            .map_or(true, |(best_rank, _)| rank > *best_rank);
        if replace {
            best = Some((rank, candidate));
        }
    }
    best.map(|(_, app)| app)
}

/// Direct lookup first; the running-object scan is only consulted when the
/// direct hit is missing or has no open document.
pub struct RunningObjectProbe<D> {
    directory: D,
}

impl<D: ObjectDirectory> RunningObjectProbe<D> {
    pub fn new(directory: D) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &D {
        &self.directory
    }
}

impl<D: ObjectDirectory> HandleProbe for RunningObjectProbe<D> {
    fn probe(&self) -> ForeignResult<Option<Box<dyn PresentationApp>>> {
        let direct = match self.directory.direct_lookup() {
            Ok(found) => found,
            Err(ForeignError::InvalidReference) => None,
            Err(err) => {
                tracing::debug!(%err, "direct application lookup failed");
                None
            }
        };

        if let Some(app) = direct {
            match inspect_candidate(app.as_ref()) {
                Ok(traits) if traits.has_active_presentation => return Ok(Some(app)),
                Ok(_) => {
                    let mut candidates = vec![app];
                    candidates.extend(self.scan_or_empty());
                    return Ok(select_best_candidate(candidates));
                }
                Err(_) => {}
            }
        }

        Ok(select_best_candidate(self.scan_or_empty()))
    }
}

impl<D: ObjectDirectory> RunningObjectProbe<D> {
    fn scan_or_empty(&self) -> Vec<Box<dyn PresentationApp>> {
        match self.directory.scan_running() {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(%err, "running object scan failed");
                Vec::new()
            }
        }
    }
}
