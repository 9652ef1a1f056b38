use std::fmt;
use std::path::PathBuf;

use crate::types::{ClipOptions, Rect};

/// Every failure the pipeline can report. Page numbers are 1-based.
#[derive(Debug)]
pub enum StitchError {
    Open(String),
    InvalidOptions(String),
    InvalidRange {
        start: usize,
        end: usize,
        page_count: usize,
    },
    Geometry {
        page: usize,
        crop: Rect,
        options: ClipOptions,
    },
    Render {
        page: usize,
        message: String,
    },
    Consistency {
        page: usize,
        measured: (u32, u32),
        rendered: (u32, u32),
    },
    Save {
        path: PathBuf,
        message: String,
        source: Option<std::io::Error>,
    },
    Cancelled {
        page: usize,
    },
    InvalidConfiguration(String),
    Io(std::io::Error),
}

impl StitchError {
    pub(crate) fn render(page: usize, message: impl Into<String>) -> Self {
        StitchError::Render {
            page,
            message: message.into(),
        }
    }

    pub(crate) fn save(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        StitchError::Save {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn save_io(path: impl Into<PathBuf>, context: &str, err: std::io::Error) -> Self {
        StitchError::Save {
            path: path.into(),
            message: format!("{context}: {err}"),
            source: Some(err),
        }
    }

    /// Page the failure is attributed to, when there is one.
    pub fn page(&self) -> Option<usize> {
        match self {
            StitchError::Geometry { page, .. }
            | StitchError::Render { page, .. }
            | StitchError::Consistency { page, .. }
            | StitchError::Cancelled { page } => Some(*page),
            _ => None,
        }
    }
}

impl fmt::Display for StitchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StitchError::Open(message) => write!(f, "cannot open document: {}", message),
            StitchError::InvalidOptions(message) => write!(f, "invalid clip options: {}", message),
            StitchError::InvalidRange {
                start,
                end,
                page_count,
            } => write!(
                f,
                "page range {}..={} is outside document with {} page(s)",
                start, end, page_count
            ),
            StitchError::Geometry {
                page,
                crop,
                options,
            } => write!(
                f,
                "degenerate crop on page {}: ({}, {}) -> ({}, {}) with scale={} clip top={} bottom={} left={} right={}",
                page,
                crop.x0,
                crop.y0,
                crop.x1,
                crop.y1,
                options.scale,
                options.clip_top,
                options.clip_bottom,
                options.clip_left,
                options.clip_right
            ),
            StitchError::Render { page, message } => {
                write!(f, "render failed on page {}: {}", page, message)
            }
            StitchError::Consistency {
                page,
                measured,
                rendered,
            } => write!(
                f,
                "page {} rendered as {}x{} but measured {}x{}",
                page, rendered.0, rendered.1, measured.0, measured.1
            ),
            StitchError::Save { path, message, .. } => {
                write!(f, "cannot save {}: {}", path.display(), message)
            }
            StitchError::Cancelled { page } => write!(f, "cancelled before page {}", page),
            StitchError::InvalidConfiguration(message) => {
                write!(f, "invalid configuration: {}", message)
            }
            StitchError::Io(err) => write!(f, "io error: {}", err),
        }
    }
}

impl std::error::Error for StitchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StitchError::Io(err) => Some(err),
            StitchError::Save {
                source: Some(err), ..
            } => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StitchError {
    fn from(value: std::io::Error) -> Self {
        StitchError::Io(value)
    }
}
