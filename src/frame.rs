//! Cyclic frame source.
//!
//! Frames are identified by path. The set of frames is fixed when the source
//! is built; only the cursor moves, wrapping after the last frame.

use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::path::{Path, PathBuf};

/// Opaque frame identifier (a path to an image on disk).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameRef(PathBuf);

impl FrameRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Fixed ring of frames with a modulo-advancing cursor.
#[derive(Clone, Debug)]
pub struct FrameSource {
    frames: Vec<FrameRef>,
    cursor: usize,
}

impl FrameSource {
    /// Build a source over an explicit frame list. The cursor starts at the first frame.
    pub fn new(frames: Vec<FrameRef>) -> Result<Self> {
        if frames.is_empty() {
            return Err(anyhow!("frame source requires at least one frame"));
        }
        Ok(Self { frames, cursor: 0 })
    }

    /// Build a source from a directory of numbered frames.
    ///
    /// The directory is only listed to count its entries; frame `i` is
    /// `<dir>/<i>.jpg` for `i` in `0..count`.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let count = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
            .count();
        if count == 0 {
            return Err(anyhow!("image directory {} is empty", dir.display()));
        }
        let frames = (0..count)
            .map(|i| FrameRef::new(dir.join(format!("{}.jpg", i))))
            .collect();
        log::info!("frame source: {} frames from {}", count, dir.display());
        Self::new(frames)
    }

    /// Frame at the cursor.
    pub fn current(&self) -> &FrameRef {
        &self.frames[self.cursor]
    }

    /// Move the cursor forward one frame, wrapping to the first after the last.
    pub fn advance(&mut self) -> &FrameRef {
        self.cursor = (self.cursor + 1) % self.frames.len();
        self.current()
    }

    pub fn position(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
