use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdfstitch::{ClipOptions, PageRange, PageSource, PdfDocument, Progress, Stage, Stitcher};

#[derive(Parser)]
#[command(name = "pdfstitch")]
#[command(about = "Stack the pages of a PDF into one long PNG or JPEG image")]
#[command(version)]
struct Cli {
    /// Input PDF file
    input: PathBuf,

    /// Output image (.png, .jpg or .jpeg)
    #[arg(required_unless_present = "info")]
    output: Option<PathBuf>,

    /// First page to include (1-based)
    #[arg(long, default_value = "1")]
    start: usize,

    /// Last page to include (defaults to the last page)
    #[arg(long)]
    end: Option<usize>,

    /// Pixels per page unit
    #[arg(long, default_value = "1.0")]
    scale: f32,

    #[arg(long, default_value = "0")]
    clip_top: f32,

    #[arg(long, default_value = "0")]
    clip_bottom: f32,

    #[arg(long, default_value = "0")]
    clip_left: f32,

    #[arg(long, default_value = "0")]
    clip_right: f32,

    #[arg(long, default_value = "90")]
    jpeg_quality: u8,

    /// Write per-page render timings as JSON lines
    #[arg(long, value_name = "PATH")]
    perf_log: Option<PathBuf>,

    /// Write render/paste/save events as JSON lines
    #[arg(long, value_name = "PATH")]
    debug_log: Option<PathBuf>,

    /// Print page count and clip limits, then exit
    #[arg(long)]
    info: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let document = PdfDocument::open(&cli.input)
        .with_context(|| format!("failed to open {}", cli.input.display()))?;

    let mut builder = Stitcher::builder().jpeg_quality(cli.jpeg_quality);
    if let Some(path) = &cli.perf_log {
        builder = builder.perf_log(path);
    }
    if let Some(path) = &cli.debug_log {
        builder = builder.debug_log(path);
    }
    let stitcher = builder.build().context("invalid configuration")?;

    if cli.info {
        let summary = stitcher.summarize(&document)?;
        println!("pages: {}", summary.page_count);
        println!("narrowest page width: {}", summary.min_width);
        println!("tallest page height: {}", summary.max_height);
        println!("max left/right clip: {}", summary.max_clip_horizontal);
        println!("max top/bottom clip: {}", summary.max_clip_vertical);
        return Ok(());
    }

    let Some(output) = cli.output.as_ref() else {
        bail!("an output path is required");
    };
    let range = PageRange::new(cli.start, cli.end.unwrap_or(document.page_count()));
    let options = ClipOptions::new(cli.scale).with_clip(
        cli.clip_top,
        cli.clip_bottom,
        cli.clip_left,
        cli.clip_right,
    );

    let bar = ProgressBar::new((range.len() * 2 + 2) as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let canvas = stitcher
        .convert(&document, range, &options, output, |p: Progress| {
            bar.set_position(p.current as u64);
            bar.set_message(match p.stage {
                Stage::Measure { page } => format!("measuring page {page}"),
                Stage::Allocate => "allocating canvas".to_string(),
                Stage::Paste { page } => format!("pasting page {page}"),
                Stage::Save => "saved".to_string(),
            });
        })
        .with_context(|| format!("failed to convert {}", cli.input.display()))?;
    bar.finish();

    eprintln!(
        "wrote {} ({}x{}, {} pages, {:.1} ms)",
        output.display(),
        canvas.width(),
        canvas.height(),
        canvas.page_count(),
        canvas.metrics.total_ms()
    );
    Ok(())
}
