use crate::error::StitchError;
use crate::types::Rect;

/// A decoded multi-page document able to rasterize a region of any page.
///
/// Implementations own the document for as long as the value lives; dropping
/// it releases the document. `index` is always 0-based.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Native, unscaled bounding box of page `index`.
    fn page_rect(&self, index: usize) -> Result<Rect, StitchError>;

    /// Rasterize `crop` (page space) of page `index` scaled by `scale_x`/`scale_y`
    /// and return the result as encoded image bytes.
    fn render_region(
        &self,
        index: usize,
        scale_x: f32,
        scale_y: f32,
        crop: &Rect,
    ) -> Result<Vec<u8>, StitchError>;
}

impl<S: PageSource + ?Sized> PageSource for &S {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_rect(&self, index: usize) -> Result<Rect, StitchError> {
        (**self).page_rect(index)
    }

    fn render_region(
        &self,
        index: usize,
        scale_x: f32,
        scale_y: f32,
        crop: &Rect,
    ) -> Result<Vec<u8>, StitchError> {
        (**self).render_region(index, scale_x, scale_y, crop)
    }
}
