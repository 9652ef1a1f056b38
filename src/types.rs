use crate::error::StitchError;

/// Axis-aligned rectangle in page space, top-left origin, y growing downward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn from_size(width: f32, height: f32) -> Self {
        Self::new(0.0, 0.0, width, height)
    }

    /// US Letter, used when a page declares no usable box.
    pub fn letter() -> Self {
        Self::from_size(612.0, 792.0)
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x1 > self.x0 && self.y1 > self.y0)
    }
}

/// Scale and per-edge crop distances. Crop distances are in unscaled page units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipOptions {
    pub scale: f32,
    pub clip_top: f32,
    pub clip_bottom: f32,
    pub clip_left: f32,
    pub clip_right: f32,
}

impl Default for ClipOptions {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl ClipOptions {
    pub fn new(scale: f32) -> Self {
        Self {
            scale,
            clip_top: 0.0,
            clip_bottom: 0.0,
            clip_left: 0.0,
            clip_right: 0.0,
        }
    }

    pub fn with_clip(mut self, top: f32, bottom: f32, left: f32, right: f32) -> Self {
        self.clip_top = top;
        self.clip_bottom = bottom;
        self.clip_left = left;
        self.clip_right = right;
        self
    }

    pub fn validate(&self) -> Result<(), StitchError> {
        if !self.scale.is_finite() || self.scale <= 0.0 {
            return Err(StitchError::InvalidOptions(format!(
                "scale must be a positive finite number, got {}",
                self.scale
            )));
        }
        let edges = [
            ("clip_top", self.clip_top),
            ("clip_bottom", self.clip_bottom),
            ("clip_left", self.clip_left),
            ("clip_right", self.clip_right),
        ];
        for (name, value) in edges {
            if !value.is_finite() || value < 0.0 {
                return Err(StitchError::InvalidOptions(format!(
                    "{name} must be a non-negative finite number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// 1-based inclusive page range. `start > end` denotes an empty range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    pub start: usize,
    pub end: usize,
}

impl PageRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn all(page_count: usize) -> Self {
        Self::new(1, page_count)
    }

    pub fn is_empty(&self) -> bool {
        self.start > self.end || self.end == 0
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.end - self.start.max(1) + 1
        }
    }

    /// 0-based page indices covered by the range.
    pub fn indices(&self) -> std::ops::Range<usize> {
        if self.is_empty() {
            0..0
        } else {
            (self.start.max(1) - 1)..self.end
        }
    }

    pub fn validate(&self, page_count: usize) -> Result<(), StitchError> {
        if self.is_empty() {
            return Ok(());
        }
        if self.start < 1 || self.end > page_count {
            return Err(StitchError::InvalidRange {
                start: self.start,
                end: self.end,
                page_count,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_reports_degenerate_when_inverted_or_flat() {
        assert!(!Rect::from_size(600.0, 800.0).is_degenerate());
        assert!(Rect::new(300.0, 0.0, 300.0, 800.0).is_degenerate());
        assert!(Rect::new(0.0, 500.0, 600.0, 100.0).is_degenerate());
    }

    #[test]
    fn clip_options_reject_bad_scale_and_negative_edges() {
        assert!(ClipOptions::new(0.5).validate().is_ok());
        assert!(matches!(
            ClipOptions::new(0.0).validate(),
            Err(StitchError::InvalidOptions(_))
        ));
        assert!(matches!(
            ClipOptions::new(f32::NAN).validate(),
            Err(StitchError::InvalidOptions(_))
        ));
        let err = ClipOptions::new(1.0)
            .with_clip(0.0, 0.0, -1.0, 0.0)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("clip_left"));
    }

    #[test]
    fn page_range_indices_are_zero_based() {
        let range = PageRange::new(2, 4);
        assert_eq!(range.len(), 3);
        assert_eq!(range.indices().collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(range.validate(4).is_ok());
    }

    #[test]
    fn empty_document_range_is_empty_and_valid() {
        let range = PageRange::all(0);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(range.indices().count(), 0);
        assert!(range.validate(0).is_ok());
        assert!(PageRange::new(0, 0).is_empty());
        assert!(PageRange::new(3, 2).is_empty());
    }

    #[test]
    fn page_range_outside_document_is_rejected() {
        assert!(matches!(
            PageRange::new(1, 5).validate(4),
            Err(StitchError::InvalidRange { page_count: 4, .. })
        ));
        assert!(matches!(
            PageRange::new(0, 2).validate(4),
            Err(StitchError::InvalidRange { .. })
        ));
    }
}
