mod compositor;
mod debug;
mod error;
mod geometry;
mod metrics;
mod output;
mod pdf_raster;
mod pdf_text;
mod perf;
mod progress;
mod source;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use image::Rgb;
use serde_json::json;

pub use compositor::{Canvas, PagePlacement};
use compositor::CompositeContext;
use debug::DebugLogger;
pub use error::StitchError;
pub use geometry::{RenderedPage, crop_rect, render_page};
pub use metrics::{ConversionMetrics, PageMetrics};
pub use output::OutputFormat;
pub use pdf_raster::PdfDocument;
use perf::PerfLogger;
pub use progress::{Progress, ProgressSink, Stage, ignore_progress};
use progress::StepCounter;
pub use source::PageSource;
pub use types::{ClipOptions, PageRange, Rect};

const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_MAX_CANVAS_PIXELS: u64 = 400_000_000;

/// Page-size facts used to bound clip inputs before converting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DocumentSummary {
    pub page_count: usize,
    /// Narrowest page width in page units.
    pub min_width: f32,
    /// Tallest page height in page units.
    pub max_height: f32,
    pub max_clip_horizontal: f32,
    pub max_clip_vertical: f32,
}

pub struct Stitcher {
    background: Rgb<u8>,
    jpeg_quality: u8,
    max_canvas_pixels: u64,
    cancel: Option<Arc<AtomicBool>>,
    debug: Option<Arc<DebugLogger>>,
    perf: Option<Arc<PerfLogger>>,
}

#[derive(Clone)]
pub struct StitcherBuilder {
    background: [u8; 3],
    jpeg_quality: u8,
    max_canvas_pixels: u64,
    cancel: Option<Arc<AtomicBool>>,
    debug_path: Option<PathBuf>,
    perf_enabled: bool,
    perf_path: Option<PathBuf>,
}

impl Stitcher {
    pub fn builder() -> StitcherBuilder {
        StitcherBuilder::new()
    }

    pub fn summarize<S: PageSource + ?Sized>(
        &self,
        source: &S,
    ) -> Result<DocumentSummary, StitchError> {
        let page_count = source.page_count();
        let mut min_width = 0.0f32;
        let mut max_height = 0.0f32;
        for index in 0..page_count {
            let rect = source.page_rect(index)?;
            if index == 0 || rect.width() < min_width {
                min_width = rect.width();
            }
            max_height = max_height.max(rect.height());
        }
        Ok(DocumentSummary {
            page_count,
            min_width,
            max_height,
            max_clip_horizontal: (min_width / 2.0).floor(),
            max_clip_vertical: (max_height / 2.0).floor(),
        })
    }

    /// Render a single 1-based page for on-screen preview.
    pub fn preview<S: PageSource + ?Sized>(
        &self,
        source: &S,
        page_number: usize,
        options: &ClipOptions,
    ) -> Result<RenderedPage, StitchError> {
        let page_count = source.page_count();
        if page_number == 0 || page_number > page_count {
            return Err(StitchError::InvalidRange {
                start: page_number,
                end: page_number,
                page_count,
            });
        }
        options.validate()?;
        self.context()
            .check_page_size(source, page_number - 1, options)?;
        let start = Instant::now();
        let page = render_page(source, page_number - 1, options)?;
        if let Some(perf) = self.perf.as_deref() {
            perf.log_span_ms("preview", Some(page_number), metrics::elapsed_ms(start));
        }
        self.emit_debug_summary("preview");
        Ok(page)
    }

    /// Measure and paste every page of `range`. Reports steps `1..=2N+1` out
    /// of `2N+2`; the last step belongs to [`Stitcher::save_with_progress`]
    /// or [`Stitcher::convert`].
    pub fn composite<S: PageSource + ?Sized>(
        &self,
        source: &S,
        range: PageRange,
        options: &ClipOptions,
        mut progress: impl ProgressSink,
    ) -> Result<Canvas, StitchError> {
        let mut steps = StepCounter::new(&mut progress, range.len());
        let result = self.composite_steps(source, range, options, &mut steps);
        self.emit_debug_summary("composite");
        result
    }

    /// Encode `canvas` by the extension of `path` and replace the file atomically.
    pub fn save(&self, canvas: &Canvas, path: impl AsRef<Path>) -> Result<(), StitchError> {
        self.save_with_progress(canvas, path, ignore_progress)
    }

    /// Like [`Stitcher::save`], then reports the final `Save` step
    /// (`2N+2` of `2N+2`) that [`Stitcher::composite`] leaves open.
    pub fn save_with_progress(
        &self,
        canvas: &Canvas,
        path: impl AsRef<Path>,
        mut progress: impl ProgressSink,
    ) -> Result<(), StitchError> {
        let pages = canvas.page_count();
        let result = self.save_inner(canvas, path.as_ref()).map(|()| {
            StepCounter::resume(&mut progress, pages, pages * 2 + 1).step(Stage::Save);
        });
        self.emit_debug_summary("save");
        result
    }

    /// Composite then save, reporting all `2N+2` steps.
    pub fn convert<S: PageSource + ?Sized>(
        &self,
        source: &S,
        range: PageRange,
        options: &ClipOptions,
        path: impl AsRef<Path>,
        mut progress: impl ProgressSink,
    ) -> Result<Canvas, StitchError> {
        let mut steps = StepCounter::new(&mut progress, range.len());
        let result = self
            .composite_steps(source, range, options, &mut steps)
            .and_then(|canvas| {
                self.save_inner(&canvas, path.as_ref())?;
                steps.step(Stage::Save);
                Ok(canvas)
            });
        self.emit_debug_summary("convert");
        result
    }

    fn composite_steps<S: PageSource + ?Sized>(
        &self,
        source: &S,
        range: PageRange,
        options: &ClipOptions,
        steps: &mut StepCounter<'_>,
    ) -> Result<Canvas, StitchError> {
        compositor::composite(&self.context(), source, range, options, steps)
    }

    fn context(&self) -> CompositeContext<'_> {
        CompositeContext {
            background: self.background,
            max_canvas_pixels: self.max_canvas_pixels,
            cancel: self.cancel.as_deref(),
            debug: self.debug.as_deref(),
            perf: self.perf.as_deref(),
        }
    }

    fn save_inner(&self, canvas: &Canvas, path: &Path) -> Result<(), StitchError> {
        if canvas.is_empty() {
            return Err(StitchError::save(path, "canvas has no pages"));
        }
        let format = OutputFormat::from_path(path)?;
        let start = Instant::now();
        let bytes = output::encode(&canvas.image, format, self.jpeg_quality)
            .map_err(|e| StitchError::save(path, format!("encode failed: {e}")))?;
        output::write_atomic(path, &bytes)?;
        if let Some(perf) = self.perf.as_deref() {
            perf.log_span_ms("save", None, metrics::elapsed_ms(start));
            perf.log_counts("save", &[("bytes", bytes.len() as u64)]);
        }
        if let Some(debug) = self.debug.as_deref() {
            debug.event(
                "canvas.save",
                json!({
                    "path": path.display().to_string(),
                    "format": format.extension(),
                    "width": canvas.width(),
                    "height": canvas.height(),
                    "bytes": bytes.len(),
                    "sha256": canvas.fingerprint(),
                }),
            );
            debug.increment("saves", 1);
        }
        Ok(())
    }

    fn emit_debug_summary(&self, context: &str) {
        if let Some(logger) = self.debug.as_deref() {
            logger.emit_summary(context);
            logger.flush();
        }
        if let Some(perf) = self.perf.as_deref() {
            perf.flush();
        }
    }
}

impl StitcherBuilder {
    pub fn new() -> Self {
        Self {
            background: [0, 0, 0],
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_canvas_pixels: DEFAULT_MAX_CANVAS_PIXELS,
            cancel: None,
            debug_path: None,
            perf_enabled: false,
            perf_path: None,
        }
    }

    // Fill for the side margins left by pages narrower than the widest one.
    pub fn background(mut self, r: u8, g: u8, b: u8) -> Self {
        self.background = [r, g, b];
        self
    }

    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.jpeg_quality = quality;
        self
    }

    pub fn max_canvas_pixels(mut self, pixels: u64) -> Self {
        self.max_canvas_pixels = pixels;
        self
    }

    // Checked before each page render; a set flag aborts with `Cancelled`.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn debug_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.debug_path = Some(path.into());
        self
    }

    // Enable performance logging to a JSONL file for timing/counter inspection.
    pub fn perf_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.perf_enabled = true;
        self.perf_path = Some(path.into());
        self
    }

    // Toggle performance logging (uses default file when enabled and no path is set).
    pub fn perf_enabled(mut self, enabled: bool) -> Self {
        self.perf_enabled = enabled;
        self
    }

    pub fn build(self) -> Result<Stitcher, StitchError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(StitchError::InvalidConfiguration(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        if self.max_canvas_pixels == 0 {
            return Err(StitchError::InvalidConfiguration(
                "max_canvas_pixels must be > 0".to_string(),
            ));
        }
        let debug = if let Some(path) = self.debug_path {
            Some(Arc::new(DebugLogger::new(path)?))
        } else {
            None
        };
        let perf = if self.perf_enabled || self.perf_path.is_some() {
            let path = self
                .perf_path
                .unwrap_or_else(|| PathBuf::from("pdfstitch_perf.log"));
            Some(Arc::new(PerfLogger::new(path)?))
        } else {
            None
        };
        Ok(Stitcher {
            background: Rgb(self.background),
            jpeg_quality: self.jpeg_quality,
            max_canvas_pixels: self.max_canvas_pixels,
            cancel: self.cancel,
            debug,
            perf,
        })
    }
}

impl Default for StitcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
