use crate::session::Fingerprint;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ARTIFACT_EXT: &str = "ink";
const POSITION_MARKER_FILE: &str = "position.txt";

/// I/O side of ink persistence. The store decides when and what; an adapter
/// only moves opaque bytes keyed by fingerprint and slide index.
pub trait InkPersistence: Send + Sync {
    fn write_slide_artifact(&self, fingerprint: &Fingerprint, slide: u32, bytes: &[u8])
        -> Result<()>;
    fn delete_slide_artifact(&self, fingerprint: &Fingerprint, slide: u32) -> Result<()>;
    fn write_position_marker(&self, fingerprint: &Fingerprint, slide: u32) -> Result<()>;
    fn read_position_marker(&self, fingerprint: &Fingerprint) -> Result<Option<u32>>;
    fn read_all_artifacts(&self, fingerprint: &Fingerprint) -> Result<BTreeMap<u32, Vec<u8>>>;
}

/// One directory per fingerprint under `root`, one file per slide.
#[derive(Debug, Clone)]
pub struct FsInkPersistence {
    root: PathBuf,
}

impl FsInkPersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(fingerprint.as_str())
    }

    pub fn artifact_path(&self, fingerprint: &Fingerprint, slide: u32) -> PathBuf {
        self.session_dir(fingerprint)
            .join(format!("slide_{slide:04}.{ARTIFACT_EXT}"))
    }

    fn ensure_session_dir(&self, fingerprint: &Fingerprint) -> Result<PathBuf> {
        let dir = self.session_dir(fingerprint);
        fs::create_dir_all(&dir)
            .with_context(|| format!("create ink session folder {}", dir.display()))?;
        Ok(dir)
    }
}

fn parse_artifact_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(ARTIFACT_EXT)?.strip_suffix('.')?;
    stem.strip_prefix("slide_")?.parse().ok()
}

impl InkPersistence for FsInkPersistence {
    fn write_slide_artifact(
        &self,
        fingerprint: &Fingerprint,
        slide: u32,
        bytes: &[u8],
    ) -> Result<()> {
        self.ensure_session_dir(fingerprint)?;
        let path = self.artifact_path(fingerprint, slide);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)
            .with_context(|| format!("write ink artifact {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("replace ink artifact {}", path.display()))
    }

    fn delete_slide_artifact(&self, fingerprint: &Fingerprint, slide: u32) -> Result<()> {
        let path = self.artifact_path(fingerprint, slide);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("delete ink artifact {}", path.display()))
            }
        }
    }

    fn write_position_marker(&self, fingerprint: &Fingerprint, slide: u32) -> Result<()> {
        let dir = self.ensure_session_dir(fingerprint)?;
        let path = dir.join(POSITION_MARKER_FILE);
        fs::write(&path, slide.to_string())
            .with_context(|| format!("write position marker {}", path.display()))
    }

    fn read_position_marker(&self, fingerprint: &Fingerprint) -> Result<Option<u32>> {
        let path = self.session_dir(fingerprint).join(POSITION_MARKER_FILE);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("read position marker {}", path.display()))
            }
        };
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse()
            .map(Some)
            .with_context(|| format!("parse position marker {}", path.display()))
    }

    fn read_all_artifacts(&self, fingerprint: &Fingerprint) -> Result<BTreeMap<u32, Vec<u8>>> {
        let dir = self.session_dir(fingerprint);
        let mut artifacts = BTreeMap::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(artifacts),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("list ink session folder {}", dir.display()))
            }
        };
        for entry in entries {
            let entry = entry.with_context(|| format!("list ink session folder {}", dir.display()))?;
            let name = entry.file_name();
            let Some(slide) = name.to_str().and_then(parse_artifact_name) else {
                continue;
            };
            let path = entry.path();
            let bytes =
                fs::read(&path).with_context(|| format!("read ink artifact {}", path.display()))?;
            artifacts.insert(slide, bytes);
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_names_round_trip() {
        assert_eq!(parse_artifact_name("slide_0007.ink"), Some(7));
        assert_eq!(parse_artifact_name("slide_0007.tmp"), None);
        assert_eq!(parse_artifact_name(POSITION_MARKER_FILE), None);
    }

    #[test]
    fn missing_session_reads_as_empty() {
        let dir = tempfile::tempdir().expect("temp dir");
        let persistence = FsInkPersistence::new(dir.path());
        let fp = Fingerprint::derive("a", 1, "a");
        assert!(persistence.read_all_artifacts(&fp).expect("read").is_empty());
        assert_eq!(persistence.read_position_marker(&fp).expect("marker"), None);
        persistence.delete_slide_artifact(&fp, 3).expect("delete missing");
    }
}
