use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InkTool {
    Pen,
    Highlighter,
    Line,
    Rect,
    Ellipse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InkColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl InkColor {
    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InkStroke {
    pub tool: InkTool,
    pub color: InkColor,
    pub width: u32,
    pub points: Vec<(i32, i32)>,
}

impl InkStroke {
    pub fn pen(color: InkColor, width: u32, points: Vec<(i32, i32)>) -> Self {
        Self {
            tool: InkTool::Pen,
            color,
            width,
            points,
        }
    }
}

/// Everything drawn on one slide. The store only ever sees the encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StrokeSet {
    pub strokes: Vec<InkStroke>,
}

impl StrokeSet {
    pub fn new(strokes: Vec<InkStroke>) -> Self {
        Self { strokes }
    }

    pub fn is_empty(&self) -> bool {
        self.strokes.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("encode stroke set")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).context("decode stroke set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_set_encodes_below_artifact_threshold() {
        let bytes = StrokeSet::default().to_bytes().expect("encode");
        assert!(bytes.len() < 24, "{} bytes", bytes.len());
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(StrokeSet::from_bytes(b"not ink").is_err());
    }
}
