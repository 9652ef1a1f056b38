use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use image::{Rgb, RgbImage, imageops};
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::debug::DebugLogger;
use crate::error::StitchError;
use crate::geometry::{RenderedPage, pixel_bound, render_page};
use crate::metrics::{ConversionMetrics, PageMetrics, elapsed_ms};
use crate::perf::PerfLogger;
use crate::progress::{Stage, StepCounter};
use crate::source::PageSource;
use crate::types::{ClipOptions, PageRange};

/// Where one page landed on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePlacement {
    pub page: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The stacked output of one conversion.
#[derive(Debug, Clone)]
pub struct Canvas {
    pub image: RgbImage,
    pub placements: Vec<PagePlacement>,
    pub metrics: ConversionMetrics,
}

impl Canvas {
    pub(crate) fn empty() -> Self {
        Self {
            image: RgbImage::new(0, 0),
            placements: Vec::new(),
            metrics: ConversionMetrics::default(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn page_count(&self) -> usize {
        self.placements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// SHA-256 over the dimensions and raw RGB pixels, lowercase hex.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.image.as_raw());
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for b in digest {
            use std::fmt::Write;
            let _ = write!(&mut out, "{:02x}", b);
        }
        out
    }
}

pub(crate) struct CompositeContext<'a> {
    pub background: Rgb<u8>,
    pub max_canvas_pixels: u64,
    pub cancel: Option<&'a AtomicBool>,
    pub debug: Option<&'a DebugLogger>,
    pub perf: Option<&'a PerfLogger>,
}

impl CompositeContext<'_> {
    /// A page that alone exceeds the canvas limit can never be composited.
    pub(crate) fn check_page_size<S: PageSource + ?Sized>(
        &self,
        source: &S,
        index: usize,
        options: &ClipOptions,
    ) -> Result<(), StitchError> {
        let pixels = pixel_bound(source, index, options)?;
        if pixels > self.max_canvas_pixels {
            return Err(StitchError::InvalidConfiguration(format!(
                "page {} at scale {} needs {} pixels, over the limit of {}",
                index + 1,
                options.scale,
                pixels,
                self.max_canvas_pixels
            )));
        }
        Ok(())
    }

    fn check_cancel(&self, page: usize) -> Result<(), StitchError> {
        match self.cancel {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(StitchError::Cancelled { page }),
            _ => Ok(()),
        }
    }

    fn render_timed<S: PageSource + ?Sized>(
        &self,
        source: &S,
        index: usize,
        options: &ClipOptions,
        pass: &str,
    ) -> Result<(RenderedPage, f64), StitchError> {
        let start = Instant::now();
        let page = render_page(source, index, options)?;
        let ms = elapsed_ms(start);
        if let Some(perf) = self.perf {
            perf.log_span_ms(pass, Some(index + 1), ms);
        }
        if let Some(debug) = self.debug {
            debug.event(
                "page.render",
                json!({
                    "pass": pass,
                    "page": index + 1,
                    "width": page.width(),
                    "height": page.height(),
                    "ms": ms,
                }),
            );
            debug.increment("renders", 1);
        }
        Ok((page, ms))
    }
}

/// Measure every page in `range`, allocate a canvas that fits all of them,
/// then render each page again and paste it centered below the previous one.
pub(crate) fn composite<S: PageSource + ?Sized>(
    ctx: &CompositeContext<'_>,
    source: &S,
    range: PageRange,
    options: &ClipOptions,
    steps: &mut StepCounter<'_>,
) -> Result<Canvas, StitchError> {
    options.validate()?;
    range.validate(source.page_count())?;

    if range.is_empty() {
        steps.step(Stage::Allocate);
        return Ok(Canvas::empty());
    }

    let mut metrics = ConversionMetrics::default();
    let mut measured: Vec<(u32, u32)> = Vec::with_capacity(range.len());
    let mut max_width = 0u32;
    let mut total_height = 0u32;

    let pass_start = Instant::now();
    for index in range.indices() {
        ctx.check_cancel(index + 1)?;
        ctx.check_page_size(source, index, options)?;
        let (page, ms) = ctx.render_timed(source, index, options, "measure")?;
        let (width, height) = page.dimensions();
        max_width = max_width.max(width);
        total_height = total_height.checked_add(height).ok_or_else(|| {
            StitchError::InvalidConfiguration(format!(
                "canvas height overflows at page {}",
                index + 1
            ))
        })?;
        measured.push((width, height));
        metrics.pages.push(PageMetrics {
            page_number: index + 1,
            measure_ms: ms,
            width,
            height,
            ..PageMetrics::default()
        });
        metrics.renders += 1;
        steps.step(Stage::Measure { page: index + 1 });
    }
    metrics.measure_ms = elapsed_ms(pass_start);

    let pixels = u64::from(max_width) * u64::from(total_height);
    if pixels > ctx.max_canvas_pixels {
        return Err(StitchError::InvalidConfiguration(format!(
            "canvas {}x{} exceeds the limit of {} pixels",
            max_width, total_height, ctx.max_canvas_pixels
        )));
    }
    let mut image = RgbImage::from_pixel(max_width, total_height, ctx.background);
    if let Some(debug) = ctx.debug {
        debug.event(
            "canvas.alloc",
            json!({ "width": max_width, "height": total_height, "pages": measured.len() }),
        );
    }
    steps.step(Stage::Allocate);

    let mut placements = Vec::with_capacity(measured.len());
    let mut pos_y = 0u32;
    let pass_start = Instant::now();
    for (slot, index) in range.indices().enumerate() {
        ctx.check_cancel(index + 1)?;
        let (page, ms) = ctx.render_timed(source, index, options, "paste")?;
        let rendered = page.dimensions();
        if rendered != measured[slot] {
            return Err(StitchError::Consistency {
                page: index + 1,
                measured: measured[slot],
                rendered,
            });
        }
        let (width, height) = rendered;
        let pos_x = (max_width - width) / 2;
        imageops::replace(&mut image, &page.image, i64::from(pos_x), i64::from(pos_y));
        placements.push(PagePlacement {
            page: index + 1,
            x: pos_x,
            y: pos_y,
            width,
            height,
        });
        if let Some(debug) = ctx.debug {
            debug.event(
                "page.paste",
                json!({ "page": index + 1, "x": pos_x, "y": pos_y }),
            );
            debug.increment("pastes", 1);
        }
        metrics.pages[slot].paste_ms = ms;
        metrics.renders += 1;
        pos_y += height;
        steps.step(Stage::Paste { page: index + 1 });
    }
    metrics.paste_ms = elapsed_ms(pass_start);

    if pos_y != total_height {
        let last = placements.last().map(|p| p.page).unwrap_or(range.start);
        return Err(StitchError::Consistency {
            page: last,
            measured: (max_width, total_height),
            rendered: (max_width, pos_y),
        });
    }

    if let Some(perf) = ctx.perf {
        perf.log_span_ms("composite.measure", None, metrics.measure_ms);
        perf.log_span_ms("composite.paste", None, metrics.paste_ms);
        perf.log_counts(
            "composite",
            &[
                ("pages", placements.len() as u64),
                ("renders", metrics.renders as u64),
                ("pixels", pixels),
            ],
        );
    }

    Ok(Canvas {
        image,
        placements,
        metrics,
    })
}
