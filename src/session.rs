use crate::foreign::{ForeignResult, Presentation};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Instant;

const FINGERPRINT_LEN: usize = 16;

/// Stable identifier of a presentation, used only to namespace persisted ink.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn derive(name: &str, slide_count: u32, full_path: &str) -> Self {
        let mut path_hasher = Sha256::new();
        path_hasher.update(full_path.to_lowercase().as_bytes());
        let path_hash = hex::encode(path_hasher.finalize());

        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(slide_count.to_le_bytes());
        hasher.update([0u8]);
        hasher.update(path_hash.as_bytes());
        let mut digest = hex::encode(hasher.finalize());
        digest.truncate(FINGERPRINT_LEN);
        Self(digest)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationInfo {
    pub name: String,
    pub full_path: String,
    pub slide_count: u32,
    pub fingerprint: Fingerprint,
}

impl PresentationInfo {
    pub fn new(name: impl Into<String>, full_path: impl Into<String>, slide_count: u32) -> Self {
        let name = name.into();
        let full_path = full_path.into();
        let fingerprint = Fingerprint::derive(&name, slide_count, &full_path);
        Self {
            name,
            full_path,
            slide_count,
            fingerprint,
        }
    }

    /// Read identity properties from a live presentation. Unsaved documents
    /// have no path, so a failing path lookup falls back to the name.
    pub fn read(presentation: &dyn Presentation) -> ForeignResult<Self> {
        let name = presentation.name()?;
        let slide_count = presentation.slide_count()?;
        let full_path = match presentation.full_path() {
            Ok(path) => path,
            Err(err) if err.is_invalid_reference() => return Err(err),
            Err(_) => name.clone(),
        };
        Ok(Self::new(name, full_path, slide_count))
    }
}

/// The presentation the supervisor is currently attached to. The foreign
/// handles backing it are owned by the supervisor's live connection.
#[derive(Debug, Clone)]
pub struct PresentationSession {
    pub info: PresentationInfo,
    pub current_slide: Option<u32>,
    pub slide_show_active: bool,
    pub opened_at: Instant,
}

impl PresentationSession {
    pub fn new(info: PresentationInfo, opened_at: Instant) -> Self {
        Self {
            info,
            current_slide: None,
            slide_show_active: false,
            opened_at,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.info.fingerprint
    }

    pub fn slide_count(&self) -> u32 {
        self.info.slide_count
    }
}
