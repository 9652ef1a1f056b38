use image::RgbImage;

use crate::error::StitchError;
use crate::source::PageSource;
use crate::types::{ClipOptions, Rect};

/// One page rasterized under a given scale and crop.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPage {
    pub image: RgbImage,
}

impl RenderedPage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Shrink `page_rect` by the four crop distances. `index` is 0-based and only
/// used to label the error.
pub fn crop_rect(index: usize, page_rect: &Rect, options: &ClipOptions) -> Result<Rect, StitchError> {
    let crop = Rect::new(
        page_rect.x0 + options.clip_left,
        page_rect.y0 + options.clip_top,
        page_rect.x1 - options.clip_right,
        page_rect.y1 - options.clip_bottom,
    );
    if crop.is_degenerate() {
        return Err(StitchError::Geometry {
            page: index + 1,
            crop,
            options: *options,
        });
    }
    Ok(crop)
}

/// Render page `index` (0-based) of `source` cropped and scaled per `options`.
pub fn render_page<S: PageSource + ?Sized>(
    source: &S,
    index: usize,
    options: &ClipOptions,
) -> Result<RenderedPage, StitchError> {
    options.validate()?;
    let page_rect = source.page_rect(index)?;
    let crop = crop_rect(index, &page_rect, options)?;
    let encoded = source.render_region(index, options.scale, options.scale, &crop)?;
    decode_page(index, &encoded)
}

/// Pixels page `index` will cover under `options`, from its geometry alone.
/// Lets callers refuse an oversized page before asking the source to render it.
pub(crate) fn pixel_bound<S: PageSource + ?Sized>(
    source: &S,
    index: usize,
    options: &ClipOptions,
) -> Result<u64, StitchError> {
    let crop = crop_rect(index, &source.page_rect(index)?, options)?;
    let scale = f64::from(options.scale);
    let width = (f64::from(crop.width()) * scale).ceil();
    let height = (f64::from(crop.height()) * scale).ceil();
    // non-finite products count as unbounded
    let pixels = width * height;
    Ok(if pixels.is_finite() { pixels as u64 } else { u64::MAX })
}

fn decode_page(index: usize, encoded: &[u8]) -> Result<RenderedPage, StitchError> {
    let decoded = image::load_from_memory(encoded)
        .map_err(|e| StitchError::render(index + 1, format!("cannot decode page image: {e}")))?;
    let image = decoded.to_rgb8();
    if image.width() == 0 || image.height() == 0 {
        return Err(StitchError::render(
            index + 1,
            format!(
                "renderer produced an empty {}x{} image",
                image.width(),
                image.height()
            ),
        ));
    }
    Ok(RenderedPage { image })
}
