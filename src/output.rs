use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage};

use crate::error::StitchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Png,
    Jpeg,
}

impl OutputFormat {
    /// Pick the format from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self, StitchError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => Ok(OutputFormat::Png),
            "jpg" | "jpeg" => Ok(OutputFormat::Jpeg),
            "" => Err(StitchError::save(
                path,
                "missing file extension (expected .png, .jpg or .jpeg)",
            )),
            other => Err(StitchError::save(
                path,
                format!("unsupported output extension .{other} (expected .png, .jpg or .jpeg)"),
            )),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Jpeg => "jpg",
        }
    }
}

pub(crate) fn encode(
    image: &RgbImage,
    format: OutputFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, image::ImageError> {
    let mut out = Vec::new();
    let (width, height) = image.dimensions();
    match format {
        OutputFormat::Png => {
            PngEncoder::new(&mut out).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
        OutputFormat::Jpeg => {
            JpegEncoder::new_with_quality(&mut out, jpeg_quality).write_image(
                image.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )?;
        }
    }
    Ok(out)
}

/// Replace `path` with `bytes` through a synced sibling temp file, so a failed
/// write leaves any previous file intact.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StitchError> {
    let temp_path = temp_path_for(path)?;
    let result = write_then_rename(&temp_path, path, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    result
}

fn write_then_rename(temp_path: &Path, path: &Path, bytes: &[u8]) -> Result<(), StitchError> {
    let mut file =
        File::create(temp_path).map_err(|e| StitchError::save_io(path, "create temp file", e))?;
    file.write_all(bytes)
        .map_err(|e| StitchError::save_io(path, "write temp file", e))?;
    file.sync_all()
        .map_err(|e| StitchError::save_io(path, "sync temp file", e))?;
    drop(file);
    fs::rename(temp_path, path).map_err(|e| StitchError::save_io(path, "replace output", e))
}

fn temp_path_for(path: &Path) -> Result<PathBuf, StitchError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| StitchError::save(path, "output path has no file name"))?;
    let temp_name = format!(".{file_name}.tmp-{}", std::process::id());
    Ok(path.with_file_name(temp_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pdfstitch_output_{tag}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }

    #[test]
    fn format_follows_extension_case_insensitively() {
        assert_eq!(
            OutputFormat::from_path(Path::new("out/long.PNG")).unwrap(),
            OutputFormat::Png
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.jpeg")).unwrap(),
            OutputFormat::Jpeg
        );
        assert_eq!(
            OutputFormat::from_path(Path::new("a.Jpg")).unwrap(),
            OutputFormat::Jpeg
        );
    }

    #[test]
    fn unknown_or_missing_extension_is_a_save_error() {
        assert!(matches!(
            OutputFormat::from_path(Path::new("a.gif")),
            Err(StitchError::Save { .. })
        ));
        let err = OutputFormat::from_path(Path::new("noext")).unwrap_err();
        assert!(err.to_string().contains("missing file extension"));
    }

    #[test]
    fn encoded_png_round_trips_pixels() {
        let mut img = RgbImage::from_pixel(3, 2, Rgb([0, 0, 0]));
        img.put_pixel(2, 1, Rgb([200, 100, 50]));
        let png = encode(&img, OutputFormat::Png, 90).unwrap();
        let back = image::load_from_memory(&png).unwrap().to_rgb8();
        assert_eq!(back, img);
    }

    #[test]
    fn encoded_jpeg_is_jpeg() {
        let img = RgbImage::from_pixel(16, 16, Rgb([120, 120, 120]));
        let jpg = encode(&img, OutputFormat::Jpeg, 80).unwrap();
        assert_eq!(
            image::guess_format(&jpg).unwrap(),
            image::ImageFormat::Jpeg
        );
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_file() {
        let dir = temp_dir("replace");
        let path = dir.join("out.png");
        fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
        let leftovers: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = temp_dir("fail");
        let path = dir.join("missing_dir").join("out.png");
        let err = write_atomic(&path, b"new").unwrap_err();
        match err {
            StitchError::Save { source, .. } => assert!(source.is_some()),
            other => panic!("expected save error, got {other:?}"),
        }
        assert!(!path.exists());
    }
}
