use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use lopdf::{Dictionary as LoDictionary, Document as LoDocument, Object as LoObject};
use tiny_skia::{Path as SkPath, PathBuilder};
use ttf_parser::{Face, GlyphId, OutlineBuilder};

use crate::pdf_raster::{obj_to_f32, resolve, resolve_dict};

const SIMPLE_DEFAULT_WIDTH: f32 = 500.0;
const CID_DEFAULT_WIDTH: f32 = 1000.0;
const FONT_DIR_DEPTH: usize = 6;

static SYSTEM_FONT_INDEX: OnceLock<HashMap<String, PathBuf>> = OnceLock::new();
static SYSTEM_FONT_CACHE: OnceLock<Mutex<HashMap<String, Option<Arc<Vec<u8>>>>>> = OnceLock::new();

/// A font resource from a page's `/Font` dictionary, resolved to glyph
/// outlines and advance widths.
///
/// Glyphs come from the embedded TrueType/OpenType program when there is one,
/// otherwise from an installed font matching `/BaseFont`. When neither is
/// available each visible glyph is drawn as a solid block of its advance width,
/// so text still occupies the space it would on the page.
pub(crate) struct PdfFont {
    cid_to_gid: Option<CidToGid>,
    widths: HashMap<u16, f32>,
    default_width: f32,
    base_encoding: BaseEncoding,
    differences: HashMap<u8, String>,
    program: Option<Arc<Vec<u8>>>,
}

enum CidToGid {
    Identity,
    Table(Vec<u16>),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum BaseEncoding {
    Standard,
    WinAnsi,
}

impl PdfFont {
    pub(crate) fn load(doc: &LoDocument, dict: &LoDictionary) -> Self {
        let base_name = dict
            .get(b"BaseFont")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_name().ok())
            .map(|name| String::from_utf8_lossy(name).into_owned())
            .unwrap_or_else(|| "Helvetica".to_string());
        match dict.get(b"Subtype").and_then(LoObject::as_name) {
            Ok(b"Type0") => Self::load_composite(doc, dict),
            _ => Self::load_simple(doc, dict, &base_name),
        }
    }

    fn load_simple(doc: &LoDocument, dict: &LoDictionary, base_name: &str) -> Self {
        let descriptor = dict
            .get(b"FontDescriptor")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj));
        let default_width = descriptor
            .and_then(|d| d.get(b"MissingWidth").ok())
            .and_then(|obj| resolve(doc, obj))
            .and_then(obj_to_f32)
            .unwrap_or(SIMPLE_DEFAULT_WIDTH);

        let first_char = dict
            .get(b"FirstChar")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_i64().ok())
            .and_then(|v| u16::try_from(v).ok())
            .unwrap_or(0);
        let mut widths = HashMap::new();
        if let Some(arr) = dict
            .get(b"Widths")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_array().ok())
        {
            for (offset, item) in arr.iter().enumerate() {
                let Some(code) = u16::try_from(offset)
                    .ok()
                    .and_then(|o| first_char.checked_add(o))
                else {
                    break;
                };
                if let Some(width) = resolve(doc, item).and_then(obj_to_f32) {
                    widths.insert(code, width.max(0.0));
                }
            }
        }

        let (base_encoding, differences) = parse_encoding(doc, dict.get(b"Encoding").ok());
        let program = descriptor
            .and_then(|d| embedded_program(doc, d))
            .or_else(|| system_font(base_name));
        Self {
            cid_to_gid: None,
            widths,
            default_width,
            base_encoding,
            differences,
            program,
        }
    }

    fn load_composite(doc: &LoDocument, dict: &LoDictionary) -> Self {
        let descendant = dict
            .get(b"DescendantFonts")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_array().ok())
            .and_then(|arr| arr.first())
            .and_then(|obj| resolve_dict(doc, obj));
        let Some(descendant) = descendant else {
            return Self {
                cid_to_gid: Some(CidToGid::Identity),
                widths: HashMap::new(),
                default_width: CID_DEFAULT_WIDTH,
                base_encoding: BaseEncoding::Standard,
                differences: HashMap::new(),
                program: None,
            };
        };
        let default_width = descendant
            .get(b"DW")
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(obj_to_f32)
            .unwrap_or(CID_DEFAULT_WIDTH);
        let widths = descendant
            .get(b"W")
            .ok()
            .map(|obj| parse_cid_widths(doc, obj))
            .unwrap_or_default();
        let cid_to_gid = match descendant.get(b"CIDToGIDMap").ok().and_then(|o| resolve(doc, o)) {
            Some(LoObject::Stream(stream)) => stream
                .get_plain_content()
                .ok()
                .map(|bytes| {
                    CidToGid::Table(
                        bytes
                            .chunks_exact(2)
                            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                            .collect(),
                    )
                })
                .unwrap_or(CidToGid::Identity),
            _ => CidToGid::Identity,
        };
        // CIDs are not character codes, so an installed substitute cannot be indexed by them.
        let program = descendant
            .get(b"FontDescriptor")
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))
            .and_then(|d| embedded_program(doc, d));
        Self {
            cid_to_gid: Some(cid_to_gid),
            widths,
            default_width,
            base_encoding: BaseEncoding::Standard,
            differences: HashMap::new(),
            program,
        }
    }

    pub(crate) fn program(&self) -> Option<&[u8]> {
        self.program.as_deref().map(Vec::as_slice)
    }

    /// Split a string operand into character codes.
    pub(crate) fn codes(&self, bytes: &[u8]) -> Vec<u16> {
        if self.cid_to_gid.is_some() {
            bytes
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                .collect()
        } else {
            bytes.iter().map(|b| u16::from(*b)).collect()
        }
    }

    /// Word spacing applies only to the single-byte code 32.
    pub(crate) fn is_word_space(&self, code: u16) -> bool {
        self.cid_to_gid.is_none() && code == 32
    }

    /// Horizontal advance in thousandths of text space.
    pub(crate) fn advance(&self, face: Option<&Face<'_>>, code: u16) -> f32 {
        if let Some(width) = self.widths.get(&code) {
            return *width;
        }
        if let Some(face) = face {
            if let Some(adv) = self
                .glyph_id(face, code)
                .and_then(|gid| face.glyph_hor_advance(gid))
            {
                return f32::from(adv) * 1000.0 / f32::from(face.units_per_em().max(1));
            }
        }
        self.default_width
    }

    /// Outline for `code` in text space with the font size folded into
    /// `scale_x`/`scale_y`; the origin is the glyph's baseline start.
    pub(crate) fn glyph_path(
        &self,
        face: Option<&Face<'_>>,
        code: u16,
        scale_x: f32,
        scale_y: f32,
    ) -> Option<SkPath> {
        let Some(face) = face else {
            return self.block_glyph(code, scale_x, scale_y);
        };
        let gid = self.glyph_id(face, code)?;
        let upem = f32::from(face.units_per_em().max(1));
        let mut outline = GlyphOutline {
            builder: PathBuilder::new(),
            scale_x: scale_x / upem,
            scale_y: scale_y / upem,
        };
        face.outline_glyph(gid, &mut outline)?;
        outline.builder.finish()
    }

    fn block_glyph(&self, code: u16, scale_x: f32, scale_y: f32) -> Option<SkPath> {
        if self.cid_to_gid.is_none() && self.char_for(code as u8).is_none_or(char::is_whitespace) {
            return None;
        }
        let advance = self.advance(None, code) / 1000.0 * scale_x;
        let height = 0.7 * scale_y;
        let rect = tiny_skia::Rect::from_ltrb(
            (0.1 * advance).min(0.9 * advance),
            height.min(0.0),
            (0.1 * advance).max(0.9 * advance),
            height.max(0.0),
        )?;
        Some(PathBuilder::from_rect(rect))
    }

    fn glyph_id(&self, face: &Face<'_>, code: u16) -> Option<GlyphId> {
        match &self.cid_to_gid {
            Some(CidToGid::Identity) => Some(GlyphId(code)),
            Some(CidToGid::Table(table)) => table
                .get(usize::from(code))
                .copied()
                .filter(|gid| *gid != 0)
                .map(GlyphId),
            None => self.simple_glyph_id(face, code as u8),
        }
    }

    fn simple_glyph_id(&self, face: &Face<'_>, code: u8) -> Option<GlyphId> {
        if let Some(name) = self.differences.get(&code) {
            if let Some(gid) = face
                .glyph_index_by_name(name)
                .or_else(|| glyph_name_char(name).and_then(|ch| face.glyph_index(ch)))
            {
                return Some(gid);
            }
        }
        if let Some(gid) = self.char_for(code).and_then(|ch| face.glyph_index(ch)) {
            return Some(gid);
        }
        let subtable = symbol_subtable(face)?;
        let code = u32::from(code);
        subtable
            .glyph_index(code)
            .or_else(|| subtable.glyph_index(0xF000 + code))
    }

    fn char_for(&self, code: u8) -> Option<char> {
        if let Some(name) = self.differences.get(&code) {
            return glyph_name_char(name);
        }
        match self.base_encoding {
            BaseEncoding::WinAnsi => winansi_char(code),
            BaseEncoding::Standard => match code {
                0x20..=0x7E | 0xA0..=0xFF => Some(char::from(code)),
                _ => None,
            },
        }
    }
}

struct GlyphOutline {
    builder: PathBuilder,
    scale_x: f32,
    scale_y: f32,
}

impl OutlineBuilder for GlyphOutline {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x * self.scale_x, y * self.scale_y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x * self.scale_x, y * self.scale_y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(
            x1 * self.scale_x,
            y1 * self.scale_y,
            x * self.scale_x,
            y * self.scale_y,
        );
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(
            x1 * self.scale_x,
            y1 * self.scale_y,
            x2 * self.scale_x,
            y2 * self.scale_y,
            x * self.scale_x,
            y * self.scale_y,
        );
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn embedded_program(doc: &LoDocument, descriptor: &LoDictionary) -> Option<Arc<Vec<u8>>> {
    // Bare Type 1 and CFF programs are not sfnt containers and fail to parse here.
    for key in [b"FontFile2".as_slice(), b"FontFile3".as_slice()] {
        let Some(data) = descriptor
            .get(key)
            .ok()
            .and_then(|obj| resolve(doc, obj))
            .and_then(|obj| obj.as_stream().ok())
            .and_then(|stream| stream.get_plain_content().ok())
        else {
            continue;
        };
        if Face::parse(&data, 0).is_ok() {
            return Some(Arc::new(data));
        }
    }
    None
}

fn parse_encoding(
    doc: &LoDocument,
    obj: Option<&LoObject>,
) -> (BaseEncoding, HashMap<u8, String>) {
    let mut differences = HashMap::new();
    let Some(obj) = obj.and_then(|o| resolve(doc, o)) else {
        return (BaseEncoding::Standard, differences);
    };
    let base_name = match obj {
        LoObject::Name(name) => Some(name.as_slice()),
        LoObject::Dictionary(dict) => dict
            .get(b"BaseEncoding")
            .ok()
            .and_then(|o| o.as_name().ok()),
        _ => None,
    };
    let base = match base_name {
        Some(b"WinAnsiEncoding") => BaseEncoding::WinAnsi,
        _ => BaseEncoding::Standard,
    };
    if let Some(items) = obj
        .as_dict()
        .ok()
        .and_then(|dict| dict.get(b"Differences").ok())
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
    {
        let mut cursor: Option<u8> = None;
        for item in items {
            match item {
                LoObject::Integer(code) => cursor = u8::try_from(*code).ok(),
                LoObject::Name(name) => {
                    if let Some(code) = cursor {
                        differences.insert(code, String::from_utf8_lossy(name).into_owned());
                        cursor = code.checked_add(1);
                    }
                }
                _ => {}
            }
        }
    }
    (base, differences)
}

fn parse_cid_widths(doc: &LoDocument, obj: &LoObject) -> HashMap<u16, f32> {
    let mut out = HashMap::new();
    let Some(items) = resolve(doc, obj).and_then(|o| o.as_array().ok()) else {
        return out;
    };
    let as_cid = |obj: &LoObject| {
        resolve(doc, obj)
            .and_then(|o| o.as_i64().ok())
            .and_then(|v| u16::try_from(v).ok())
    };
    let mut idx = 0;
    while idx + 1 < items.len() {
        let Some(first) = as_cid(&items[idx]) else {
            idx += 1;
            continue;
        };
        match resolve(doc, &items[idx + 1]) {
            Some(LoObject::Array(list)) => {
                for (offset, width) in list.iter().enumerate() {
                    let Some(cid) = u16::try_from(offset)
                        .ok()
                        .and_then(|o| first.checked_add(o))
                    else {
                        break;
                    };
                    if let Some(width) = resolve(doc, width).and_then(obj_to_f32) {
                        out.insert(cid, width.max(0.0));
                    }
                }
                idx += 2;
            }
            _ => {
                let last = as_cid(&items[idx + 1]);
                let width = items
                    .get(idx + 2)
                    .and_then(|o| resolve(doc, o))
                    .and_then(obj_to_f32);
                if let (Some(last), Some(width)) = (last, width) {
                    for cid in first..=last {
                        out.insert(cid, width.max(0.0));
                    }
                }
                idx += 3;
            }
        }
    }
    out
}

/// Windows symbol cmap, used when a font has no Unicode subtable.
fn symbol_subtable<'a>(face: &Face<'a>) -> Option<ttf_parser::cmap::Subtable<'a>> {
    let cmap = face.tables().cmap?;
    let mut first = None;
    for subtable in cmap.subtables {
        if subtable.is_unicode() {
            return None;
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            return Some(subtable);
        }
        first.get_or_insert(subtable);
    }
    first
}

fn winansi_char(code: u8) -> Option<char> {
    const HIGH: [u16; 32] = [
        0x20AC, 0, 0x201A, 0x0192, 0x201E, 0x2026, 0x2020, 0x2021, 0x02C6, 0x2030, 0x0160,
        0x2039, 0x0152, 0, 0x017D, 0, 0, 0x2018, 0x2019, 0x201C, 0x201D, 0x2022, 0x2013, 0x2014,
        0x02DC, 0x2122, 0x0161, 0x203A, 0x0153, 0, 0x017E, 0x0178,
    ];
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(char::from(code)),
        0x80..=0x9F => match HIGH[usize::from(code - 0x80)] {
            0 => None,
            cp => char::from_u32(u32::from(cp)),
        },
        _ => None,
    }
}

fn glyph_name_char(name: &str) -> Option<char> {
    const NAMED: &[(&str, char)] = &[
        ("space", ' '),
        ("exclam", '!'),
        ("quotedbl", '"'),
        ("numbersign", '#'),
        ("dollar", '$'),
        ("percent", '%'),
        ("ampersand", '&'),
        ("quotesingle", '\''),
        ("quoteright", '\u{2019}'),
        ("quoteleft", '\u{2018}'),
        ("parenleft", '('),
        ("parenright", ')'),
        ("asterisk", '*'),
        ("plus", '+'),
        ("comma", ','),
        ("hyphen", '-'),
        ("minus", '\u{2212}'),
        ("period", '.'),
        ("slash", '/'),
        ("zero", '0'),
        ("one", '1'),
        ("two", '2'),
        ("three", '3'),
        ("four", '4'),
        ("five", '5'),
        ("six", '6'),
        ("seven", '7'),
        ("eight", '8'),
        ("nine", '9'),
        ("colon", ':'),
        ("semicolon", ';'),
        ("less", '<'),
        ("equal", '='),
        ("greater", '>'),
        ("question", '?'),
        ("at", '@'),
        ("bracketleft", '['),
        ("backslash", '\\'),
        ("bracketright", ']'),
        ("asciicircum", '^'),
        ("underscore", '_'),
        ("grave", '`'),
        ("braceleft", '{'),
        ("bar", '|'),
        ("braceright", '}'),
        ("asciitilde", '~'),
        ("bullet", '\u{2022}'),
        ("endash", '\u{2013}'),
        ("emdash", '\u{2014}'),
    ];
    let mut chars = name.chars();
    if let (Some(ch), None) = (chars.next(), chars.next()) {
        return ch.is_ascii_alphabetic().then_some(ch);
    }
    if let Some(hex) = name.strip_prefix("uni").filter(|h| h.len() == 4) {
        return u32::from_str_radix(hex, 16).ok().and_then(char::from_u32);
    }
    if let Some(hex) = name.strip_prefix('u').filter(|h| (4..=6).contains(&h.len())) {
        if let Some(ch) = u32::from_str_radix(hex, 16).ok().and_then(char::from_u32) {
            return Some(ch);
        }
    }
    NAMED.iter().find(|(n, _)| *n == name).map(|(_, ch)| *ch)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Family {
    Sans,
    Serif,
    Mono,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct FontRequest {
    family: Family,
    bold: bool,
    italic: bool,
}

impl FontRequest {
    fn from_base_name(base_name: &str) -> Self {
        let name = strip_subset_prefix(base_name).to_ascii_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));
        let family = if has(&["courier", "mono", "consolas"]) {
            Family::Mono
        } else if has(&["sans", "helvetica", "arial", "verdana", "calibri"]) {
            Family::Sans
        } else if has(&[
            "times", "serif", "roman", "georgia", "garamond", "palatino", "bookman",
            "schoolbook", "cambria", "minion",
        ]) {
            Family::Serif
        } else {
            Family::Sans
        };
        Self {
            family,
            bold: has(&["bold", "black", "heavy", "semibold", "demi"]),
            italic: has(&["italic", "oblique"]),
        }
    }

    fn cache_key(&self) -> String {
        format!("{:?}-{}-{}", self.family, self.bold, self.italic)
    }

    /// Installed file names to try, requested style first.
    fn candidates(&self) -> Vec<&'static str> {
        // Regular, bold, italic, bold italic.
        const SANS: [&[&str]; 4] = [
            &["LiberationSans-Regular.ttf", "Arial.ttf", "arial.ttf", "DejaVuSans.ttf", "NimbusSans-Regular.otf", "FreeSans.ttf"],
            &["LiberationSans-Bold.ttf", "Arial Bold.ttf", "arialbd.ttf", "DejaVuSans-Bold.ttf", "NimbusSans-Bold.otf", "FreeSansBold.ttf"],
            &["LiberationSans-Italic.ttf", "Arial Italic.ttf", "ariali.ttf", "DejaVuSans-Oblique.ttf", "NimbusSans-Italic.otf", "FreeSansOblique.ttf"],
            &["LiberationSans-BoldItalic.ttf", "Arial Bold Italic.ttf", "arialbi.ttf", "DejaVuSans-BoldOblique.ttf", "NimbusSans-BoldItalic.otf", "FreeSansBoldOblique.ttf"],
        ];
        const SERIF: [&[&str]; 4] = [
            &["LiberationSerif-Regular.ttf", "Times New Roman.ttf", "times.ttf", "DejaVuSerif.ttf", "NimbusRoman-Regular.otf", "FreeSerif.ttf"],
            &["LiberationSerif-Bold.ttf", "Times New Roman Bold.ttf", "timesbd.ttf", "DejaVuSerif-Bold.ttf", "NimbusRoman-Bold.otf", "FreeSerifBold.ttf"],
            &["LiberationSerif-Italic.ttf", "Times New Roman Italic.ttf", "timesi.ttf", "DejaVuSerif-Italic.ttf", "NimbusRoman-Italic.otf", "FreeSerifItalic.ttf"],
            &["LiberationSerif-BoldItalic.ttf", "Times New Roman Bold Italic.ttf", "timesbi.ttf", "DejaVuSerif-BoldItalic.ttf", "NimbusRoman-BoldItalic.otf", "FreeSerifBoldItalic.ttf"],
        ];
        const MONO: [&[&str]; 4] = [
            &["LiberationMono-Regular.ttf", "Courier New.ttf", "cour.ttf", "DejaVuSansMono.ttf", "NimbusMonoPS-Regular.otf", "FreeMono.ttf"],
            &["LiberationMono-Bold.ttf", "Courier New Bold.ttf", "courbd.ttf", "DejaVuSansMono-Bold.ttf", "NimbusMonoPS-Bold.otf", "FreeMonoBold.ttf"],
            &["LiberationMono-Italic.ttf", "Courier New Italic.ttf", "couri.ttf", "DejaVuSansMono-Oblique.ttf", "NimbusMonoPS-Italic.otf", "FreeMonoOblique.ttf"],
            &["LiberationMono-BoldItalic.ttf", "Courier New Bold Italic.ttf", "courbi.ttf", "DejaVuSansMono-BoldOblique.ttf", "NimbusMonoPS-BoldItalic.otf", "FreeMonoBoldOblique.ttf"],
        ];
        let table = match self.family {
            Family::Sans => SANS,
            Family::Serif => SERIF,
            Family::Mono => MONO,
        };
        let style = usize::from(self.bold) + 2 * usize::from(self.italic);
        let mut out: Vec<&'static str> = Vec::new();
        for group in [table[style], table[0], SANS[style], SANS[0]] {
            for name in group {
                if !out.contains(name) {
                    out.push(*name);
                }
            }
        }
        out
    }
}

fn strip_subset_prefix(name: &str) -> &str {
    if let Some((prefix, rest)) = name.split_once('+') {
        if prefix.len() == 6 && prefix.chars().all(|c| c.is_ascii_uppercase()) {
            return rest;
        }
    }
    name
}

fn system_font(base_name: &str) -> Option<Arc<Vec<u8>>> {
    let request = FontRequest::from_base_name(base_name);
    let key = request.cache_key();
    let cache = SYSTEM_FONT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock() {
        if let Some(hit) = guard.get(&key) {
            return hit.clone();
        }
    }
    let index = SYSTEM_FONT_INDEX.get_or_init(build_font_index);
    let loaded = request.candidates().into_iter().find_map(|file| {
        let path = index.get(&file.to_ascii_lowercase())?;
        let bytes = std::fs::read(path).ok()?;
        Face::parse(&bytes, 0).is_ok().then(|| Arc::new(bytes))
    });
    if let Ok(mut guard) = cache.lock() {
        guard.insert(key, loaded.clone());
    }
    loaded
}

/// Lowercased file name to path for every font file under the font dirs.
fn build_font_index() -> HashMap<String, PathBuf> {
    let mut index = HashMap::new();
    let mut pending: Vec<(PathBuf, usize)> = font_dirs().into_iter().map(|d| (d, 0)).collect();
    while let Some((dir, depth)) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.filter_map(Result::ok) {
            let path = entry.path();
            if path.is_dir() {
                if depth < FONT_DIR_DEPTH {
                    pending.push((path, depth + 1));
                }
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let lower = name.to_ascii_lowercase();
            if lower.ends_with(".ttf") || lower.ends_with(".otf") {
                index.entry(lower).or_insert(path);
            }
        }
    }
    index
}

fn font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(extra) = std::env::var_os("PDFSTITCH_FONT_DIR") {
        dirs.extend(std::env::split_paths(&extra).filter(|p| !p.as_os_str().is_empty()));
    }

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(&home).join(".fonts"));
            dirs.push(PathBuf::from(home).join(".local/share/fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::dictionary;

    fn simple_font(dict: LoDictionary) -> PdfFont {
        let doc = LoDocument::with_version("1.7");
        PdfFont::load(&doc, &dict)
    }

    #[test]
    fn base_names_map_to_family_and_style() {
        let req = FontRequest::from_base_name("ABCDEF+Helvetica-BoldOblique");
        assert_eq!(req.family, Family::Sans);
        assert!(req.bold && req.italic);
        assert_eq!(
            FontRequest::from_base_name("Times-Roman").family,
            Family::Serif
        );
        assert_eq!(
            FontRequest::from_base_name("CourierNewPS-BoldMT").family,
            Family::Mono
        );
        assert_eq!(
            FontRequest::from_base_name("DejaVuSans").family,
            Family::Sans
        );
    }

    #[test]
    fn candidates_put_requested_style_first_and_end_with_sans() {
        let bold_serif = FontRequest {
            family: Family::Serif,
            bold: true,
            italic: false,
        };
        let candidates = bold_serif.candidates();
        assert_eq!(candidates[0], "LiberationSerif-Bold.ttf");
        assert!(candidates.contains(&"LiberationSerif-Regular.ttf"));
        assert!(candidates.contains(&"LiberationSans-Regular.ttf"));
        let unique: std::collections::HashSet<_> = candidates.iter().collect();
        assert_eq!(unique.len(), candidates.len());
    }

    #[test]
    fn subset_prefix_is_stripped_only_when_well_formed() {
        assert_eq!(strip_subset_prefix("QWERTY+Arial"), "Arial");
        assert_eq!(strip_subset_prefix("Foo+Bar"), "Foo+Bar");
    }

    #[test]
    fn simple_font_widths_and_word_space() {
        let font = simple_font(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "NoSuchFamilyAnywhere",
            "FirstChar" => 65,
            "Widths" => vec![LoObject::Integer(700), LoObject::Integer(650)],
        });
        assert_eq!(font.codes(b"AB "), vec![65, 66, 32]);
        assert_eq!(font.advance(None, 65), 700.0);
        assert_eq!(font.advance(None, 66), 650.0);
        assert_eq!(font.advance(None, 67), SIMPLE_DEFAULT_WIDTH);
        assert!(font.is_word_space(32));
        assert!(!font.is_word_space(65));
    }

    #[test]
    fn block_glyphs_cover_visible_codes_only() {
        let font = simple_font(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "FirstChar" => 32,
            "Widths" => vec![LoObject::Integer(250), LoObject::Integer(500)],
        });
        assert!(font.block_glyph(32, 10.0, 10.0).is_none());
        let path = font.block_glyph(33, 10.0, 10.0).expect("block");
        let bounds = path.bounds();
        assert!((bounds.left() - 0.5).abs() < 1e-4);
        assert!((bounds.right() - 4.5).abs() < 1e-4);
        assert!((bounds.bottom() - 7.0).abs() < 1e-4);
    }

    #[test]
    fn composite_fonts_read_two_byte_codes_and_w_arrays() {
        let mut doc = LoDocument::with_version("1.7");
        let descendant = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "CIDFontType2",
            "DW" => 800,
            "W" => vec![
                LoObject::Integer(1),
                LoObject::Array(vec![LoObject::Integer(100), LoObject::Integer(200)]),
                LoObject::Integer(10),
                LoObject::Integer(12),
                LoObject::Integer(333),
            ],
        });
        let font = PdfFont::load(
            &doc,
            &dictionary! {
                "Type" => "Font",
                "Subtype" => "Type0",
                "BaseFont" => "Whatever",
                "Encoding" => "Identity-H",
                "DescendantFonts" => vec![LoObject::Reference(descendant)],
            },
        );
        assert_eq!(font.codes(&[0, 1, 0, 11, 7]), vec![1, 11]);
        assert_eq!(font.advance(None, 1), 100.0);
        assert_eq!(font.advance(None, 2), 200.0);
        assert_eq!(font.advance(None, 12), 333.0);
        assert_eq!(font.advance(None, 5), 800.0);
        assert!(!font.is_word_space(32));
        assert!(font.program().is_none());
    }

    #[test]
    fn differences_override_the_base_encoding() {
        let font = simple_font(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
            "Encoding" => dictionary! {
                "Type" => "Encoding",
                "BaseEncoding" => "WinAnsiEncoding",
                "Differences" => vec![
                    LoObject::Integer(65),
                    LoObject::Name(b"bullet".to_vec()),
                    LoObject::Name(b"uni263A".to_vec()),
                ],
            },
        });
        assert_eq!(font.base_encoding, BaseEncoding::WinAnsi);
        assert_eq!(font.char_for(65), Some('\u{2022}'));
        assert_eq!(font.char_for(66), Some('\u{263A}'));
        assert_eq!(font.char_for(0x93), Some('\u{201C}'));
        assert_eq!(font.char_for(0x81), None);
    }

    #[test]
    fn glyph_names_resolve_to_characters() {
        assert_eq!(glyph_name_char("A"), Some('A'));
        assert_eq!(glyph_name_char("seven"), Some('7'));
        assert_eq!(glyph_name_char("uni00E9"), Some('\u{e9}'));
        assert_eq!(glyph_name_char("u1F600"), Some('\u{1F600}'));
        assert_eq!(glyph_name_char("g123"), None);
    }
}
