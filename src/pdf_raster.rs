use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::rc::Rc;

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId};
use tiny_skia::{
    FillRule, FilterQuality, LineCap, LineJoin, Mask, Paint, Path as SkPath, PathBuilder, Pixmap,
    PixmapPaint, Stroke, StrokeDash, Transform,
};
use ttf_parser::Face;

use crate::error::StitchError;
use crate::pdf_text::PdfFont;
use crate::source::PageSource;
use crate::types::Rect;

const MAX_FORM_DEPTH: usize = 32;
const MAX_REFERENCE_HOPS: usize = 32;
const DEFAULT_MAX_PAGE_PIXELS: u64 = 400_000_000;

/// A PDF opened with `lopdf`, rasterized with `tiny-skia`.
///
/// Pages are shown through their crop box and `/Rotate`. Vector paths,
/// clipping, text, form XObjects and 8-bit image XObjects are drawn.
pub struct PdfDocument {
    doc: LoDocument,
    pages: Vec<PdfPage>,
    max_page_pixels: u64,
}

struct PdfPage {
    id: ObjectId,
    // CropBox clipped to MediaBox, in PDF user space (y up), x0 < x1 and y0 < y1.
    view_box: Rect,
    // Clockwise quarter turns applied for display: 0, 90, 180 or 270.
    rotate: u16,
}

impl PdfPage {
    fn display_size(&self) -> (f32, f32) {
        let (w, h) = (self.view_box.width(), self.view_box.height());
        if self.rotate % 180 == 90 { (h, w) } else { (w, h) }
    }

    /// Maps user space onto the displayed page: top-left origin, y down,
    /// rotated clockwise by `/Rotate`.
    fn display_transform(&self) -> Transform {
        let vb = self.view_box;
        let (w, h) = (vb.width(), vb.height());
        let unrotated = Transform::from_row(1.0, 0.0, 0.0, -1.0, -vb.x0, vb.y1);
        let rotation = match self.rotate {
            90 => Transform::from_row(0.0, 1.0, -1.0, 0.0, h, 0.0),
            180 => Transform::from_row(-1.0, 0.0, 0.0, -1.0, w, h),
            270 => Transform::from_row(0.0, -1.0, 1.0, 0.0, 0.0, w),
            _ => Transform::identity(),
        };
        rotation.pre_concat(unrotated)
    }
}

impl PdfDocument {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StitchError> {
        let path = path.as_ref();
        let doc = LoDocument::load(path)
            .map_err(|e| StitchError::Open(format!("{}: {e}", path.display())))?;
        Self::from_document(doc)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StitchError> {
        let doc = LoDocument::load_mem(bytes).map_err(|e| StitchError::Open(e.to_string()))?;
        Self::from_document(doc)
    }

    /// Largest raster, in pixels, a single `render_region` call may allocate.
    /// Larger requests fail with a render error instead of allocating.
    pub fn with_max_page_pixels(mut self, limit: u64) -> Self {
        self.max_page_pixels = limit;
        self
    }

    fn from_document(doc: LoDocument) -> Result<Self, StitchError> {
        let mut pages = Vec::new();
        for (_page_no, id) in doc.get_pages() {
            let media_box = inherited_attribute(&doc, id, b"MediaBox")
                .and_then(|obj| parse_box(&doc, obj))
                .unwrap_or_else(Rect::letter);
            let view_box = inherited_attribute(&doc, id, b"CropBox")
                .and_then(|obj| parse_box(&doc, obj))
                .map(|crop| {
                    Rect::new(
                        crop.x0.max(media_box.x0),
                        crop.y0.max(media_box.y0),
                        crop.x1.min(media_box.x1),
                        crop.y1.min(media_box.y1),
                    )
                })
                .filter(|rect| !rect.is_degenerate())
                .unwrap_or(media_box);
            let rotate = inherited_attribute(&doc, id, b"Rotate")
                .and_then(|obj| resolve(&doc, obj))
                .and_then(|obj| obj.as_i64().ok())
                .map(normalize_rotation)
                .unwrap_or(0);
            pages.push(PdfPage {
                id,
                view_box,
                rotate,
            });
        }
        Ok(Self {
            doc,
            pages,
            max_page_pixels: DEFAULT_MAX_PAGE_PIXELS,
        })
    }

    fn page(&self, index: usize) -> Result<&PdfPage, StitchError> {
        self.pages.get(index).ok_or_else(|| {
            StitchError::render(
                index + 1,
                format!("document has only {} page(s)", self.pages.len()),
            )
        })
    }
}

impl PageSource for PdfDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn page_rect(&self, index: usize) -> Result<Rect, StitchError> {
        let (width, height) = self.page(index)?.display_size();
        Ok(Rect::from_size(width, height))
    }

    fn render_region(
        &self,
        index: usize,
        scale_x: f32,
        scale_y: f32,
        crop: &Rect,
    ) -> Result<Vec<u8>, StitchError> {
        let page_no = index + 1;
        let page = self.page(index)?;
        let width_px = pixel_extent(crop.width(), scale_x)
            .map_err(|message| StitchError::render(page_no, message))?;
        let height_px = pixel_extent(crop.height(), scale_y)
            .map_err(|message| StitchError::render(page_no, message))?;
        let pixels = u64::from(width_px) * u64::from(height_px);
        if pixels > self.max_page_pixels {
            return Err(StitchError::render(
                page_no,
                format!(
                    "{width_px}x{height_px} raster exceeds the limit of {} pixels",
                    self.max_page_pixels
                ),
            ));
        }
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            StitchError::render(
                page_no,
                format!("cannot allocate {width_px}x{height_px} raster"),
            )
        })?;
        pixmap.fill(tiny_skia::Color::WHITE);

        let to_crop = Transform::from_row(
            scale_x,
            0.0,
            0.0,
            scale_y,
            -crop.x0 * scale_x,
            -crop.y0 * scale_y,
        );
        let base = to_crop.pre_concat(page.display_transform());

        let content_bytes = self
            .doc
            .get_page_content(page.id)
            .map_err(|e| StitchError::render(page_no, format!("page content: {e}")))?;
        let content = Content::decode(&content_bytes)
            .map_err(|e| StitchError::render(page_no, format!("content stream: {e}")))?;
        let resources = inherited_attribute(&self.doc, page.id, b"Resources")
            .and_then(|obj| resolve_dict(&self.doc, obj))
            .cloned()
            .unwrap_or_else(LoDictionary::new);

        let mut painter = Painter::new(&self.doc, &mut pixmap, base);
        painter.run(&content.operations, &resources, 0);

        pixmap
            .encode_png()
            .map_err(|e| StitchError::render(page_no, format!("png encode failed: {e}")))
    }
}

/// `/Rotate` values that are not multiples of 90 are treated as 0.
fn normalize_rotation(value: i64) -> u16 {
    match value.rem_euclid(360) {
        90 => 90,
        180 => 180,
        270 => 270,
        _ => 0,
    }
}

/// Device pixels covered by `len` page units at `scale`. A small tolerance
/// keeps float noise such as 60.000004 from adding a column.
fn pixel_extent(len: f32, scale: f32) -> Result<u32, String> {
    let exact = f64::from(len) * f64::from(scale);
    let px = (exact - 0.001).ceil();
    if !px.is_finite() || px < 1.0 {
        return Err(format!(
            "region of {len} units at scale {scale} has no pixels"
        ));
    }
    if px > f64::from(u32::MAX) {
        return Err(format!("region of {len} units at scale {scale} is too large"));
    }
    Ok(px as u32)
}

#[derive(Clone)]
struct GraphicsState {
    ctm: Transform,
    fill: [f32; 3],
    stroke: [f32; 3],
    fill_alpha: f32,
    stroke_alpha: f32,
    line_width: f32,
    line_cap: LineCap,
    line_join: LineJoin,
    miter_limit: f32,
    dash: Option<(Vec<f32>, f32)>,
    clip_mask: Option<Mask>,
    text: TextState,
}

#[derive(Clone)]
struct TextState {
    font: Option<Rc<PdfFont>>,
    size: f32,
    char_spacing: f32,
    word_spacing: f32,
    // Tz / 100
    h_scale: f32,
    leading: f32,
    rise: f32,
    render_mode: i64,
}

impl Default for TextState {
    fn default() -> Self {
        Self {
            font: None,
            size: 0.0,
            char_spacing: 0.0,
            word_spacing: 0.0,
            h_scale: 1.0,
            leading: 0.0,
            rise: 0.0,
            render_mode: 0,
        }
    }
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            ctm: Transform::identity(),
            fill: [0.0; 3],
            stroke: [0.0; 3],
            fill_alpha: 1.0,
            stroke_alpha: 1.0,
            line_width: 1.0,
            line_cap: LineCap::Butt,
            line_join: LineJoin::Miter,
            miter_limit: 10.0,
            dash: None,
            clip_mask: None,
            text: TextState::default(),
        }
    }
}

#[derive(Clone, Copy)]
enum PaintOp {
    Fill(FillRule),
    Stroke,
    FillStroke(FillRule),
    None,
}

struct Painter<'a> {
    doc: &'a LoDocument,
    pixmap: &'a mut Pixmap,
    base: Transform,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    path: PathBuilder,
    current: (f32, f32),
    pending_clip: Option<FillRule>,
    forms_in_progress: HashSet<ObjectId>,
    images: HashMap<ObjectId, Option<Pixmap>>,
    fonts: HashMap<ObjectId, Rc<PdfFont>>,
    text_matrix: Transform,
    line_matrix: Transform,
}

impl<'a> Painter<'a> {
    fn new(doc: &'a LoDocument, pixmap: &'a mut Pixmap, base: Transform) -> Self {
        Self {
            doc,
            pixmap,
            base,
            state: GraphicsState::default(),
            stack: Vec::new(),
            path: PathBuilder::new(),
            current: (0.0, 0.0),
            pending_clip: None,
            forms_in_progress: HashSet::new(),
            images: HashMap::new(),
            fonts: HashMap::new(),
            text_matrix: Transform::identity(),
            line_matrix: Transform::identity(),
        }
    }

    fn run(&mut self, operations: &[Operation], resources: &LoDictionary, depth: usize) {
        for op in operations {
            self.apply(op, resources, depth);
        }
    }

    fn apply(&mut self, op: &Operation, resources: &LoDictionary, depth: usize) {
        match op.operator.as_str() {
            "q" => self.stack.push(self.state.clone()),
            "Q" => {
                if let Some(prev) = self.stack.pop() {
                    self.state = prev;
                }
            }
            "cm" => {
                if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                    self.state.ctm = self
                        .state
                        .ctm
                        .pre_concat(Transform::from_row(a, b, c, d, e, f));
                }
            }
            "w" => {
                if let Some(width) = op_f32(op, 0) {
                    self.state.line_width = width.max(0.0);
                }
            }
            "J" => {
                if let Some(cap) = op_i64(op, 0) {
                    self.state.line_cap = match cap {
                        1 => LineCap::Round,
                        2 => LineCap::Square,
                        _ => LineCap::Butt,
                    };
                }
            }
            "j" => {
                if let Some(join) = op_i64(op, 0) {
                    self.state.line_join = match join {
                        1 => LineJoin::Round,
                        2 => LineJoin::Bevel,
                        _ => LineJoin::Miter,
                    };
                }
            }
            "M" => {
                if let Some(limit) = op_f32(op, 0) {
                    self.state.miter_limit = limit.max(1.0);
                }
            }
            "d" => {
                let pattern: Vec<f32> = op
                    .operands
                    .first()
                    .and_then(|o| o.as_array().ok())
                    .map(|arr| arr.iter().filter_map(obj_to_f32).map(f32::abs).collect())
                    .unwrap_or_default();
                let phase = op.operands.get(1).and_then(obj_to_f32).unwrap_or(0.0);
                self.state.dash = if pattern.iter().any(|v| *v > 0.0) {
                    Some((pattern, phase))
                } else {
                    None
                };
            }
            "gs" => {
                if let Some((fill, stroke)) = op_name(op, 0)
                    .and_then(|name| self.ext_gstate_alpha(resources, &name))
                {
                    self.state.fill_alpha = fill;
                    self.state.stroke_alpha = stroke;
                }
            }
            "g" | "rg" | "k" | "sc" | "scn" => {
                if let Some(rgb) = color_operands(op) {
                    self.state.fill = rgb;
                }
            }
            "G" | "RG" | "K" | "SC" | "SCN" => {
                if let Some(rgb) = color_operands(op) {
                    self.state.stroke = rgb;
                }
            }
            "m" => {
                if let Some([x, y]) = op_f32_2(op) {
                    self.path.move_to(x, y);
                    self.current = (x, y);
                }
            }
            "l" => {
                if let Some([x, y]) = op_f32_2(op) {
                    self.path.line_to(x, y);
                    self.current = (x, y);
                }
            }
            "c" => {
                if let Some([x1, y1, x2, y2, x, y]) = op_f32_6(op) {
                    self.path.cubic_to(x1, y1, x2, y2, x, y);
                    self.current = (x, y);
                }
            }
            "v" => {
                if let Some([x2, y2, x, y]) = op_f32_4(op) {
                    let (x1, y1) = self.current;
                    self.path.cubic_to(x1, y1, x2, y2, x, y);
                    self.current = (x, y);
                }
            }
            "y" => {
                if let Some([x1, y1, x, y]) = op_f32_4(op) {
                    self.path.cubic_to(x1, y1, x, y, x, y);
                    self.current = (x, y);
                }
            }
            "h" => self.path.close(),
            "re" => {
                if let Some([x, y, w, h]) = op_f32_4(op) {
                    self.path.move_to(x, y);
                    self.path.line_to(x + w, y);
                    self.path.line_to(x + w, y + h);
                    self.path.line_to(x, y + h);
                    self.path.close();
                    self.current = (x, y);
                }
            }
            "f" | "F" => self.paint(PaintOp::Fill(FillRule::Winding), false),
            "f*" => self.paint(PaintOp::Fill(FillRule::EvenOdd), false),
            "S" => self.paint(PaintOp::Stroke, false),
            "s" => self.paint(PaintOp::Stroke, true),
            "B" => self.paint(PaintOp::FillStroke(FillRule::Winding), false),
            "B*" => self.paint(PaintOp::FillStroke(FillRule::EvenOdd), false),
            "b" => self.paint(PaintOp::FillStroke(FillRule::Winding), true),
            "b*" => self.paint(PaintOp::FillStroke(FillRule::EvenOdd), true),
            "n" => self.paint(PaintOp::None, false),
            "W" => self.pending_clip = Some(FillRule::Winding),
            "W*" => self.pending_clip = Some(FillRule::EvenOdd),
            "Do" => {
                if let Some(name) = op_name(op, 0) {
                    self.draw_xobject(resources, &name, depth);
                }
            }
            "BT" => {
                self.text_matrix = Transform::identity();
                self.line_matrix = Transform::identity();
            }
            "ET" => {}
            "Tf" => {
                if let (Some(name), Some(size)) = (op_name(op, 0), op_f32(op, 1)) {
                    self.state.text.font = self.load_font(resources, &name);
                    self.state.text.size = size;
                }
            }
            "Tc" => {
                if let Some(v) = op_f32(op, 0) {
                    self.state.text.char_spacing = v;
                }
            }
            "Tw" => {
                if let Some(v) = op_f32(op, 0) {
                    self.state.text.word_spacing = v;
                }
            }
            "Tz" => {
                if let Some(v) = op_f32(op, 0) {
                    self.state.text.h_scale = v / 100.0;
                }
            }
            "TL" => {
                if let Some(v) = op_f32(op, 0) {
                    self.state.text.leading = v;
                }
            }
            "Ts" => {
                if let Some(v) = op_f32(op, 0) {
                    self.state.text.rise = v;
                }
            }
            "Tr" => {
                if let Some(mode) = op_i64(op, 0) {
                    self.state.text.render_mode = mode;
                }
            }
            "Td" => {
                if let Some([tx, ty]) = op_f32_2(op) {
                    self.move_line(tx, ty);
                }
            }
            "TD" => {
                if let Some([tx, ty]) = op_f32_2(op) {
                    self.state.text.leading = -ty;
                    self.move_line(tx, ty);
                }
            }
            "Tm" => {
                if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                    self.line_matrix = Transform::from_row(a, b, c, d, e, f);
                    self.text_matrix = self.line_matrix;
                }
            }
            "T*" => self.next_line(),
            "Tj" => {
                if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                    self.show_text(bytes);
                }
            }
            "'" => {
                self.next_line();
                if let Some(bytes) = op.operands.first().and_then(string_bytes) {
                    self.show_text(bytes);
                }
            }
            "\"" => {
                if let (Some(aw), Some(ac)) = (op_f32(op, 0), op_f32(op, 1)) {
                    self.state.text.word_spacing = aw;
                    self.state.text.char_spacing = ac;
                }
                self.next_line();
                if let Some(bytes) = op.operands.get(2).and_then(string_bytes) {
                    self.show_text(bytes);
                }
            }
            "TJ" => {
                let Some(items) = op.operands.first().and_then(|o| o.as_array().ok()) else {
                    return;
                };
                for item in items {
                    if let Some(bytes) = string_bytes(item) {
                        self.show_text(bytes);
                    } else if let Some(adjust) = obj_to_f32(item) {
                        let text = &self.state.text;
                        let tx = -adjust / 1000.0 * text.size * text.h_scale;
                        self.text_matrix = self.text_matrix.pre_translate(tx, 0.0);
                    }
                }
            }
            _ => {}
        }
    }

    fn move_line(&mut self, tx: f32, ty: f32) {
        self.line_matrix = self.line_matrix.pre_translate(tx, ty);
        self.text_matrix = self.line_matrix;
    }

    fn next_line(&mut self) {
        let leading = self.state.text.leading;
        self.move_line(0.0, -leading);
    }

    fn load_font(&mut self, resources: &LoDictionary, name: &str) -> Option<Rc<PdfFont>> {
        let doc = self.doc;
        let entry = resources
            .get(b"Font")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))?
            .get(name.as_bytes())
            .ok()?;
        let Ok(id) = entry.as_reference() else {
            return Some(Rc::new(PdfFont::load(doc, entry.as_dict().ok()?)));
        };
        if let Some(font) = self.fonts.get(&id) {
            return Some(Rc::clone(font));
        }
        let font = Rc::new(PdfFont::load(doc, resolve_dict(doc, entry)?));
        self.fonts.insert(id, Rc::clone(&font));
        Some(font)
    }

    /// Draw one string operand and advance the text matrix past it.
    /// Clipping render modes (4 to 7) paint like 0 to 3 but add no clip.
    fn show_text(&mut self, bytes: &[u8]) {
        let Some(font) = self.state.text.font.clone() else {
            return;
        };
        let face = font.program().and_then(|data| Face::parse(data, 0).ok());
        let text = self.state.text.clone();
        let (fill, stroke) = match text.render_mode.rem_euclid(4) {
            0 => (true, false),
            1 => (false, true),
            2 => (true, true),
            _ => (false, false),
        };
        for code in font.codes(bytes) {
            if fill || stroke {
                if let Some(path) =
                    font.glyph_path(face.as_ref(), code, text.size * text.h_scale, text.size)
                {
                    let transform = self
                        .device_transform()
                        .pre_concat(self.text_matrix)
                        .pre_translate(0.0, text.rise);
                    if fill {
                        self.fill_path(&path, FillRule::Winding, transform);
                    }
                    if stroke {
                        self.stroke_path(&path, transform);
                    }
                }
            }
            let mut tx = font.advance(face.as_ref(), code) / 1000.0 * text.size + text.char_spacing;
            if font.is_word_space(code) {
                tx += text.word_spacing;
            }
            self.text_matrix = self.text_matrix.pre_translate(tx * text.h_scale, 0.0);
        }
    }

    fn device_transform(&self) -> Transform {
        self.base.pre_concat(self.state.ctm)
    }

    fn paint(&mut self, op: PaintOp, close: bool) {
        if close {
            self.path.close();
        }
        let builder = std::mem::replace(&mut self.path, PathBuilder::new());
        let clip = self.pending_clip.take();
        let Some(path) = builder.finish() else {
            return;
        };
        let transform = self.device_transform();
        match op {
            PaintOp::Fill(rule) => self.fill_path(&path, rule, transform),
            PaintOp::Stroke => self.stroke_path(&path, transform),
            PaintOp::FillStroke(rule) => {
                self.fill_path(&path, rule, transform);
                self.stroke_path(&path, transform);
            }
            PaintOp::None => {}
        }
        if let Some(rule) = clip {
            self.intersect_clip(&path, rule, transform);
        }
    }

    fn fill_path(&mut self, path: &SkPath, rule: FillRule, transform: Transform) {
        let paint = solid_paint(self.state.fill, self.state.fill_alpha);
        self.pixmap
            .fill_path(path, &paint, rule, transform, self.state.clip_mask.as_ref());
    }

    fn stroke_path(&mut self, path: &SkPath, transform: Transform) {
        let paint = solid_paint(self.state.stroke, self.state.stroke_alpha);
        let mut stroke = Stroke {
            width: self.state.line_width,
            miter_limit: self.state.miter_limit,
            line_cap: self.state.line_cap,
            line_join: self.state.line_join,
            ..Stroke::default()
        };
        if let Some((pattern, phase)) = &self.state.dash {
            let mut pattern = pattern.clone();
            if pattern.len() % 2 == 1 {
                pattern.extend_from_within(..);
            }
            stroke.dash = StrokeDash::new(pattern, *phase);
        }
        self.pixmap.stroke_path(
            path,
            &paint,
            &stroke,
            transform,
            self.state.clip_mask.as_ref(),
        );
    }

    fn intersect_clip(&mut self, path: &SkPath, rule: FillRule, transform: Transform) {
        if let Some(mask) = self.state.clip_mask.as_mut() {
            mask.intersect_path(path, rule, true, transform);
            return;
        }
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(path, rule, true, transform);
        self.state.clip_mask = Some(mask);
    }

    fn ext_gstate_alpha(&self, resources: &LoDictionary, name: &str) -> Option<(f32, f32)> {
        let states = resources
            .get(b"ExtGState")
            .ok()
            .and_then(|obj| resolve_dict(self.doc, obj))?;
        let gs = states
            .get(name.as_bytes())
            .ok()
            .and_then(|obj| resolve_dict(self.doc, obj))?;
        let fill = gs.get(b"ca").ok().and_then(obj_to_f32).unwrap_or(1.0);
        let stroke = gs.get(b"CA").ok().and_then(obj_to_f32).unwrap_or(1.0);
        Some((fill.clamp(0.0, 1.0), stroke.clamp(0.0, 1.0)))
    }

    fn draw_xobject(&mut self, resources: &LoDictionary, name: &str, depth: usize) {
        let doc = self.doc;
        let Some(id) = resources
            .get(b"XObject")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))
            .and_then(|xobjects| xobjects.get(name.as_bytes()).ok())
            .and_then(|obj| obj.as_reference().ok())
        else {
            return;
        };
        let Ok(stream) = doc.get_object(id).and_then(LoObject::as_stream) else {
            return;
        };
        match stream.dict.get(b"Subtype").and_then(LoObject::as_name) {
            Ok(b"Form") => self.draw_form(id, stream, resources, depth),
            Ok(b"Image") => self.draw_image(id, stream),
            _ => {}
        }
    }

    fn draw_form(
        &mut self,
        id: ObjectId,
        stream: &lopdf::Stream,
        parent_resources: &LoDictionary,
        depth: usize,
    ) {
        if depth >= MAX_FORM_DEPTH || !self.forms_in_progress.insert(id) {
            return;
        }
        let doc = self.doc;
        let operations = stream
            .get_plain_content()
            .ok()
            .and_then(|bytes| Content::decode(&bytes).ok())
            .map(|content| content.operations);
        if let Some(operations) = operations {
            let form_resources = stream
                .dict
                .get(b"Resources")
                .ok()
                .and_then(|obj| resolve_dict(doc, obj))
                .unwrap_or(parent_resources)
                .clone();
            let matrix = stream
                .dict
                .get(b"Matrix")
                .ok()
                .and_then(parse_matrix)
                .unwrap_or_else(Transform::identity);

            let saved_state = self.state.clone();
            let saved_stack = std::mem::take(&mut self.stack);
            self.state.ctm = self.state.ctm.pre_concat(matrix);
            if let Some(bbox) = stream
                .dict
                .get(b"BBox")
                .ok()
                .and_then(|obj| parse_box(doc, obj))
            {
                let mut clip = PathBuilder::new();
                if let Some(rect) =
                    tiny_skia::Rect::from_ltrb(bbox.x0, bbox.y0, bbox.x1, bbox.y1)
                {
                    clip.push_rect(rect);
                }
                if let Some(path) = clip.finish() {
                    let transform = self.device_transform();
                    self.intersect_clip(&path, FillRule::Winding, transform);
                }
            }
            self.run(&operations, &form_resources, depth + 1);
            self.state = saved_state;
            self.stack = saved_stack;
            self.path = PathBuilder::new();
            self.pending_clip = None;
        }
        self.forms_in_progress.remove(&id);
    }

    fn draw_image(&mut self, id: ObjectId, stream: &lopdf::Stream) {
        let doc = self.doc;
        let device = self.device_transform();
        let image = self
            .images
            .entry(id)
            .or_insert_with(|| decode_image_xobject(doc, stream));
        let Some(image) = image.as_ref() else {
            return;
        };
        let (w, h) = (image.width() as f32, image.height() as f32);
        // Image space maps row 0 to the top of the unit square.
        let unit = Transform::from_row(1.0 / w, 0.0, 0.0, -1.0 / h, 0.0, 1.0);
        let transform = device.pre_concat(unit);
        let paint = PixmapPaint {
            opacity: self.state.fill_alpha,
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            image.as_ref(),
            &paint,
            transform,
            self.state.clip_mask.as_ref(),
        );
    }
}

fn decode_image_xobject(doc: &LoDocument, stream: &lopdf::Stream) -> Option<Pixmap> {
    let filters = stream.filters().unwrap_or_default();
    if filters.len() == 1 && filters[0] == b"DCTDecode" {
        let decoded =
            image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg).ok()?;
        return rgba_to_pixmap(decoded.to_rgba8());
    }

    let width = dict_u32(&stream.dict, b"Width")?;
    let height = dict_u32(&stream.dict, b"Height")?;
    let bpc = stream
        .dict
        .get(b"BitsPerComponent")
        .ok()
        .and_then(|o| o.as_i64().ok())
        .unwrap_or(8);
    if bpc != 8 {
        return None;
    }
    let channels = match stream.dict.get(b"ColorSpace") {
        Ok(obj) => color_space_channels(doc, obj)?,
        Err(_) => 1,
    };
    let plain = if filters.is_empty() {
        stream.content.clone()
    } else {
        stream.get_plain_content().ok()?
    };
    let pixels = (width as usize).checked_mul(height as usize)?;
    if plain.len() < pixels.checked_mul(channels)? {
        return None;
    }

    let mut rgba = image::RgbaImage::new(width, height);
    for (px, sample) in rgba.pixels_mut().zip(plain.chunks_exact(channels)) {
        let [r, g, b] = match sample {
            [v] => [*v; 3],
            [r, g, b] => [*r, *g, *b],
            [c, m, y, k] => {
                let unit = |v: u8| f32::from(v) / 255.0;
                cmyk_to_rgb(unit(*c), unit(*m), unit(*y), unit(*k))
                    .map(|v| (v * 255.0).round() as u8)
            }
            _ => return None,
        };
        px.0 = [r, g, b, 255];
    }
    rgba_to_pixmap(rgba)
}

fn color_space_channels(doc: &LoDocument, obj: &LoObject) -> Option<usize> {
    match resolve(doc, obj)? {
        LoObject::Name(name) => match name.as_slice() {
            b"DeviceGray" | b"CalGray" | b"G" => Some(1),
            b"DeviceRGB" | b"CalRGB" | b"RGB" => Some(3),
            b"DeviceCMYK" | b"CMYK" => Some(4),
            _ => None,
        },
        LoObject::Array(arr) => {
            let family = arr.first()?.as_name().ok()?;
            if family != b"ICCBased" {
                return None;
            }
            let profile = resolve(doc, arr.get(1)?)?.as_stream().ok()?;
            let n = profile.dict.get(b"N").ok()?.as_i64().ok()?;
            match n {
                1 | 3 | 4 => Some(n as usize),
                _ => None,
            }
        }
        _ => None,
    }
}

fn rgba_to_pixmap(rgba: image::RgbaImage) -> Option<Pixmap> {
    let (width, height) = rgba.dimensions();
    let mut pixmap = Pixmap::new(width, height)?;
    for (src, dst) in rgba
        .as_raw()
        .chunks_exact(4)
        .zip(pixmap.data_mut().chunks_exact_mut(4))
    {
        let a = src[3];
        dst[0] = premul_u8(src[0], a);
        dst[1] = premul_u8(src[1], a);
        dst[2] = premul_u8(src[2], a);
        dst[3] = a;
    }
    Some(pixmap)
}

fn premul_u8(channel: u8, alpha: u8) -> u8 {
    let prod = (channel as u16) * (alpha as u16) + 127;
    ((prod + (prod >> 8)) >> 8) as u8
}

fn solid_paint(rgb: [f32; 3], alpha: f32) -> Paint<'static> {
    let mut paint = Paint::default();
    let [r, g, b] = rgb.map(|v| v.clamp(0.0, 1.0));
    paint.set_color(
        tiny_skia::Color::from_rgba(r, g, b, alpha.clamp(0.0, 1.0))
            .unwrap_or(tiny_skia::Color::BLACK),
    );
    paint.anti_alias = true;
    paint
}

fn color_operands(op: &Operation) -> Option<[f32; 3]> {
    let values: Vec<f32> = op.operands.iter().map_while(obj_to_f32).collect();
    match values.as_slice() {
        [gray] => Some([*gray; 3]),
        [r, g, b] => Some([*r, *g, *b]),
        [c, m, y, k] => Some(cmyk_to_rgb(*c, *m, *y, *k)),
        _ => None,
    }
}

fn cmyk_to_rgb(c: f32, m: f32, y: f32, k: f32) -> [f32; 3] {
    let k = k.clamp(0.0, 1.0);
    [c, m, y].map(|v| (1.0 - v.clamp(0.0, 1.0)) * (1.0 - k))
}

/// Walk the page tree upward until `key` is found.
fn inherited_attribute<'a>(doc: &'a LoDocument, mut id: ObjectId, key: &[u8]) -> Option<&'a LoObject> {
    for _ in 0..MAX_REFERENCE_HOPS {
        let dict = doc.get_object(id).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        id = dict.get(b"Parent").ok()?.as_reference().ok()?;
    }
    None
}

pub(crate) fn resolve<'a>(doc: &'a LoDocument, mut obj: &'a LoObject) -> Option<&'a LoObject> {
    for _ in 0..MAX_REFERENCE_HOPS {
        match obj {
            LoObject::Reference(id) => obj = doc.get_object(*id).ok()?,
            _ => return Some(obj),
        }
    }
    None
}

pub(crate) fn resolve_dict<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoDictionary> {
    resolve(doc, obj)?.as_dict().ok()
}

/// Parse a `[x0 y0 x1 y1]` box, normalizing corner order.
fn parse_box(doc: &LoDocument, obj: &LoObject) -> Option<Rect> {
    let arr = resolve(doc, obj)?.as_array().ok()?;
    if arr.len() < 4 {
        return None;
    }
    let mut v = [0.0f32; 4];
    for (slot, item) in v.iter_mut().zip(arr) {
        *slot = obj_to_f32(resolve(doc, item)?)?;
    }
    let rect = Rect::new(v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3]));
    if rect.is_degenerate() { None } else { Some(rect) }
}

fn parse_matrix(obj: &LoObject) -> Option<Transform> {
    let arr = obj.as_array().ok()?;
    if arr.len() < 6 {
        return None;
    }
    Some(Transform::from_row(
        obj_to_f32(&arr[0])?,
        obj_to_f32(&arr[1])?,
        obj_to_f32(&arr[2])?,
        obj_to_f32(&arr[3])?,
        obj_to_f32(&arr[4])?,
        obj_to_f32(&arr[5])?,
    ))
}

fn dict_u32(dict: &LoDictionary, key: &[u8]) -> Option<u32> {
    dict.get(key)
        .ok()?
        .as_i64()
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
}

fn string_bytes(obj: &LoObject) -> Option<&[u8]> {
    match obj {
        LoObject::String(bytes, _) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn op_name(op: &Operation, idx: usize) -> Option<String> {
    let name = op.operands.get(idx)?.as_name().ok()?;
    Some(String::from_utf8_lossy(name).into_owned())
}

fn op_f32(op: &Operation, idx: usize) -> Option<f32> {
    obj_to_f32(op.operands.get(idx)?)
}

fn op_i64(op: &Operation, idx: usize) -> Option<i64> {
    op.operands.get(idx)?.as_i64().ok()
}

fn op_f32_2(op: &Operation) -> Option<[f32; 2]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?])
}

fn op_f32_4(op: &Operation) -> Option<[f32; 4]> {
    Some([op_f32(op, 0)?, op_f32(op, 1)?, op_f32(op, 2)?, op_f32(op, 3)?])
}

fn op_f32_6(op: &Operation) -> Option<[f32; 6]> {
    Some([
        op_f32(op, 0)?,
        op_f32(op, 1)?,
        op_f32(op, 2)?,
        op_f32(op, 3)?,
        op_f32(op, 4)?,
        op_f32(op, 5)?,
    ])
}

pub(crate) fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}
