use std::path::{Path, PathBuf};

use image::{DynamicImage, RgbaImage, codecs::jpeg::JpegEncoder};

use crate::{error::Result, processing::render::RenderContext};

/// Name given to every exported frame.
pub const EXPORT_FILE_NAME: &str = "deep-fried-image.jpg";

/// Maps an export quality fraction (see
/// [`EffectParameters::export_quality`](crate::params::EffectParameters::export_quality))
/// to a quality the JPEG encoder accepts.
pub fn jpeg_quality(quality: f32) -> u8 {
    if !quality.is_finite() {
        return 100;
    }
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Encodes `frame` as JPEG at `quality` in `0.0..=1.0`; alpha is discarded.
pub fn encode_jpeg(frame: &RgbaImage, quality: f32) -> Result<Vec<u8>> {
    let quality = jpeg_quality(quality);
    let rgb = DynamicImage::ImageRgba8(frame.clone()).into_rgb8();
    let mut bytes = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut bytes, quality);
    rgb.write_with_encoder(encoder)?;
    tracing::debug!(
        width = frame.width(),
        height = frame.height(),
        quality,
        bytes = bytes.len(),
        "frame encoded"
    );
    Ok(bytes)
}

/// Reads back the last rendered frame and encodes it.
pub fn export(context: &RenderContext, quality: f32) -> Result<Vec<u8>> {
    let frame = context.read_frame()?;
    encode_jpeg(&frame, quality)
}

/// Writes `bytes` into `dir` under [`EXPORT_FILE_NAME`], never overwriting.
pub fn write_export(dir: &Path, bytes: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = build_output_path(dir);
    std::fs::write(&path, bytes)?;
    tracing::info!(path = %path.display(), bytes = bytes.len(), "export written");
    Ok(path)
}

fn build_output_path(output_dir: &Path) -> PathBuf {
    let base = output_dir.join(EXPORT_FILE_NAME);
    if !base.exists() {
        return base;
    }
    let (stem, ext) = EXPORT_FILE_NAME
        .rsplit_once('.')
        .unwrap_or((EXPORT_FILE_NAME, "jpg"));
    for n in 2..10000 {
        let candidate = output_dir.join(format!("{stem}-{n}.{ext}"));
        if !candidate.exists() {
            return candidate;
        }
    }
    output_dir.join(format!("{stem}-final.{ext}"))
}
