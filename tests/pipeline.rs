use std::cell::Cell;
use std::fs;
use std::path::PathBuf;

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, Stream, dictionary};
use pdfstitch::{
    ClipOptions, PageRange, PageSource, PdfDocument, Progress, Rect, Stage, StitchError, Stitcher,
    ignore_progress,
};

fn temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "pdfstitch_pipeline_{tag}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    fs::create_dir_all(&dir).expect("mkdir");
    dir
}

/// Write a PDF with one page per (width, height, content stream) entry.
fn write_pdf(path: &PathBuf, pages: &[(i64, i64, &str)]) {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();
    for (width, height, content) in pages {
        let content_id = doc.add_object(Stream::new(
            Dictionary::new(),
            content.as_bytes().to_vec(),
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), (*width).into(), (*height).into()],
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).expect("save pdf");
}

const RED_PAGE: &str = "1 0 0 rg 0 0 600 800 re f";
const BLUE_PAGE: &str = "0 0 1 rg 0 0 600 800 re f";

fn two_page_pdf(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("input.pdf");
    write_pdf(&path, &[(600, 800, RED_PAGE), (600, 800, BLUE_PAGE)]);
    path
}

#[test]
fn two_pages_at_native_scale_stack_into_png() {
    let dir = temp_dir("native");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    let out = dir.join("long.png");
    let stitcher = Stitcher::builder().build().expect("stitcher");

    let canvas = stitcher
        .convert(
            &document,
            PageRange::all(document.page_count()),
            &ClipOptions::new(1.0),
            &out,
            ignore_progress,
        )
        .expect("convert");

    assert_eq!((canvas.width(), canvas.height()), (600, 1600));
    assert_eq!(
        canvas
            .placements
            .iter()
            .map(|p| (p.x, p.y))
            .collect::<Vec<_>>(),
        vec![(0, 0), (0, 800)]
    );

    let bytes = fs::read(&out).expect("read output");
    assert_eq!(image::guess_format(&bytes).expect("format"), ImageFormat::Png);
    let saved = image::load_from_memory(&bytes).expect("decode").to_rgb8();
    assert_eq!(saved.dimensions(), (600, 1600));
    assert_eq!(saved.get_pixel(300, 400).0, [255, 0, 0]);
    assert_eq!(saved.get_pixel(300, 1200).0, [0, 0, 255]);
    assert_eq!(saved, canvas.image);
}

#[test]
fn half_scale_halves_every_dimension() {
    let dir = temp_dir("half");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    let stitcher = Stitcher::builder().build().expect("stitcher");

    let canvas = stitcher
        .composite(
            &document,
            PageRange::all(2),
            &ClipOptions::new(0.5),
            ignore_progress,
        )
        .expect("composite");

    assert_eq!((canvas.width(), canvas.height()), (300, 800));
    assert_eq!(canvas.placements[1].y, 400);
    assert_eq!(canvas.placements[1].height, 400);
}

#[test]
fn narrower_page_is_centered_on_background() {
    let dir = temp_dir("center");
    let path = dir.join("mixed.pdf");
    write_pdf(
        &path,
        &[(600, 800, RED_PAGE), (300, 400, "0 1 0 rg 0 0 300 400 re f")],
    );
    let document = PdfDocument::open(&path).expect("open");
    let stitcher = Stitcher::builder().background(10, 20, 30).build().expect("stitcher");

    let canvas = stitcher
        .composite(&document, PageRange::all(2), &ClipOptions::new(1.0), ignore_progress)
        .expect("composite");

    assert_eq!((canvas.width(), canvas.height()), (600, 1200));
    assert_eq!(canvas.placements[1].x, 150);
    assert_eq!(canvas.image.get_pixel(10, 1000).0, [10, 20, 30]);
    assert_eq!(canvas.image.get_pixel(300, 1000).0, [0, 255, 0]);
    assert_eq!(canvas.image.get_pixel(590, 1000).0, [10, 20, 30]);
}

#[test]
fn clipping_trims_page_space_before_scaling() {
    let dir = temp_dir("clip");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    let stitcher = Stitcher::builder().build().expect("stitcher");
    let options = ClipOptions::new(0.5).with_clip(100.0, 100.0, 50.0, 50.0);

    let canvas = stitcher
        .composite(&document, PageRange::new(2, 2), &options, ignore_progress)
        .expect("composite");

    assert_eq!((canvas.width(), canvas.height()), (250, 300));
    assert_eq!(canvas.placements[0].page, 2);
}

#[test]
fn clip_consuming_whole_width_is_a_geometry_error() {
    let dir = temp_dir("geometry");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    let stitcher = Stitcher::builder().build().expect("stitcher");
    let options = ClipOptions::new(1.0).with_clip(0.0, 0.0, 300.0, 300.0);
    let out = dir.join("long.png");
    fs::write(&out, b"previous").expect("seed output");

    let err = stitcher
        .convert(&document, PageRange::all(2), &options, &out, ignore_progress)
        .expect_err("geometry error");

    assert!(matches!(err, StitchError::Geometry { page: 1, .. }));
    assert_eq!(fs::read(&out).expect("read"), b"previous");

    let err = stitcher
        .preview(&document, 1, &options)
        .expect_err("preview geometry error");
    assert!(matches!(err, StitchError::Geometry { .. }));
}

#[test]
fn jpeg_output_honours_extension() {
    let dir = temp_dir("jpeg");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    let out = dir.join("long.JPEG");
    let stitcher = Stitcher::builder().jpeg_quality(75).build().expect("stitcher");

    stitcher
        .convert(
            &document,
            PageRange::all(2),
            &ClipOptions::new(0.25),
            &out,
            ignore_progress,
        )
        .expect("convert");

    let bytes = fs::read(&out).expect("read output");
    assert_eq!(image::guess_format(&bytes).expect("format"), ImageFormat::Jpeg);
    let saved = image::load_from_memory(&bytes).expect("decode");
    assert_eq!((saved.width(), saved.height()), (150, 400));
}

#[test]
fn failed_rename_keeps_existing_target_and_cleans_temp_file() {
    let dir = temp_dir("rename");
    let document = PdfDocument::open(two_page_pdf(&dir)).expect("open");
    // A non-empty directory where the output file should go cannot be replaced.
    let out = dir.join("blocked.png");
    fs::create_dir_all(&out).expect("mkdir target");
    fs::write(out.join("keep.txt"), b"keep").expect("seed");
    let stitcher = Stitcher::builder().build().expect("stitcher");

    let err = stitcher
        .convert(
            &document,
            PageRange::all(1),
            &ClipOptions::new(0.1),
            &out,
            ignore_progress,
        )
        .expect_err("save error");

    assert!(matches!(err, StitchError::Save { .. }));
    assert_eq!(fs::read(out.join("keep.txt")).expect("read"), b"keep");
    let leftovers = fs::read_dir(&dir)
        .expect("list")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn summary_bounds_clip_inputs() {
    let dir = temp_dir("summary");
    let path = dir.join("mixed.pdf");
    write_pdf(&path, &[(600, 800, RED_PAGE), (401, 301, "")]);
    let document = PdfDocument::open(&path).expect("open");
    let summary = Stitcher::builder()
        .build()
        .expect("stitcher")
        .summarize(&document)
        .expect("summary");

    assert_eq!(summary.page_count, 2);
    assert_eq!(summary.max_clip_horizontal, 200.0);
    assert_eq!(summary.max_clip_vertical, 400.0);
}

#[test]
fn missing_file_is_an_open_error() {
    let dir = temp_dir("missing");
    let err = PdfDocument::open(dir.join("nope.pdf"))
        .err()
        .expect("open error");
    assert!(matches!(err, StitchError::Open(_)));
}

/// Renders solid pages whose height grows by one pixel after `stable_renders`.
struct DriftingSource {
    renders: Cell<usize>,
    stable_renders: usize,
}

impl PageSource for DriftingSource {
    fn page_count(&self) -> usize {
        3
    }

    fn page_rect(&self, _index: usize) -> Result<Rect, StitchError> {
        Ok(Rect::from_size(20.0, 10.0))
    }

    fn render_region(
        &self,
        _index: usize,
        scale_x: f32,
        scale_y: f32,
        crop: &Rect,
    ) -> Result<Vec<u8>, StitchError> {
        let n = self.renders.get();
        self.renders.set(n + 1);
        let extra = u32::from(n >= self.stable_renders);
        let w = (crop.width() * scale_x) as u32;
        let h = (crop.height() * scale_y) as u32 + extra;
        let img = RgbImage::from_pixel(w, h, image::Rgb([200, 200, 200]));
        let mut png = Vec::new();
        PngEncoder::new(&mut png)
            .write_image(img.as_raw(), w, h, ExtendedColorType::Rgb8)
            .expect("png");
        Ok(png)
    }
}

#[test]
fn drifting_renderer_is_reported_not_stretched() {
    let dir = temp_dir("drift");
    let out = dir.join("long.png");
    let source = DriftingSource {
        renders: Cell::new(0),
        stable_renders: 4,
    };
    let stitcher = Stitcher::builder().build().expect("stitcher");
    let mut stages = Vec::new();

    let err = stitcher
        .convert(
            &source,
            PageRange::all(3),
            &ClipOptions::new(1.0),
            &out,
            |p: Progress| stages.push(p.stage),
        )
        .expect_err("consistency error");

    match err {
        StitchError::Consistency {
            page,
            measured,
            rendered,
        } => {
            assert_eq!(page, 2);
            assert_eq!(measured, (20, 10));
            assert_eq!(rendered, (20, 11));
        }
        other => panic!("expected consistency error, got {other:?}"),
    }
    assert_eq!(
        stages,
        vec![
            Stage::Measure { page: 1 },
            Stage::Measure { page: 2 },
            Stage::Measure { page: 3 },
            Stage::Allocate,
            Stage::Paste { page: 1 },
        ]
    );
    assert!(!out.exists());
}
