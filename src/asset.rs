use std::{
    io::{BufRead, Cursor, Seek},
    path::Path,
    sync::Arc,
};

use image::{DynamicImage, RgbaImage, metadata::Orientation};

use crate::error::{DeepFryError, Result};

/// Longest edge of the display surface.
pub const MAX_DISPLAY_DIMENSION: u32 = 1024;

static RAW_EXTS: &[&str] = &["raf", "dng", "nef", "cr2", "arw"];
static SUPPORTED_IMAGE_EXTS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "tiff", "tif", "webp", "bmp", "raf", "dng", "nef", "cr2", "arw",
];

fn has_extension(path: &Path, exts: &[&str]) -> bool {
    let Some(ext) = path.extension().map(|e| e.to_string_lossy()) else {
        return false;
    };
    exts.iter().any(|known| ext.eq_ignore_ascii_case(known))
}

pub fn is_raw_image(path: &Path) -> bool {
    has_extension(path, RAW_EXTS)
}

/// Returns `true` if the path has a supported image extension.
pub fn is_supported_image(path: &Path) -> bool {
    has_extension(path, SUPPORTED_IMAGE_EXTS)
}

/// Decoded source bitmap plus the size it is shown at.
///
/// Immutable once built; a new upload replaces the whole asset.
#[derive(Debug, Clone)]
pub struct ImageAsset {
    source_name: String,
    bitmap: Arc<RgbaImage>,
    display_width: u32,
    display_height: u32,
}

impl ImageAsset {
    pub fn from_image(source_name: impl Into<String>, img: DynamicImage) -> Result<Self> {
        let source_name = source_name.into();
        let bitmap = img.into_rgba8();
        if bitmap.width() == 0 || bitmap.height() == 0 {
            return Err(DeepFryError::asset_decode(source_name, "image has no pixels"));
        }
        let (display_width, display_height) = display_size(bitmap.width(), bitmap.height());
        Ok(Self {
            source_name,
            bitmap: Arc::new(bitmap),
            display_width,
            display_height,
        })
    }

    /// Decodes an in-memory file, honoring its EXIF orientation.
    pub fn from_bytes(source_name: impl Into<String>, bytes: &[u8]) -> Result<Self> {
        let source_name = source_name.into();
        let mut img = image::load_from_memory(bytes)
            .map_err(|err| DeepFryError::asset_decode(source_name.clone(), err))?;
        if let Some(orientation) = read_orientation(&mut Cursor::new(bytes)) {
            img.apply_orientation(orientation);
        }
        Self::from_image(source_name, img)
    }

    /// Decodes a file on disk, falling back to RAW development for RAW extensions.
    pub fn open(path: &Path) -> Result<Self> {
        let source_name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let img = open_image(path).map_err(|err| DeepFryError::asset_decode(&source_name, err))?;
        Self::from_image(source_name, img)
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn bitmap(&self) -> &RgbaImage {
        &self.bitmap
    }

    pub fn width(&self) -> u32 {
        self.bitmap.width()
    }

    pub fn height(&self) -> u32 {
        self.bitmap.height()
    }

    pub fn display_size(&self) -> (u32, u32) {
        (self.display_width, self.display_height)
    }
}

/// Bounds `width`×`height` so the long edge is at most [`MAX_DISPLAY_DIMENSION`].
///
/// The short edge is truncated, the way a fractional size lands on an
/// integer-sized canvas.
pub fn display_size(width: u32, height: u32) -> (u32, u32) {
    let max = MAX_DISPLAY_DIMENSION;
    if width <= max && height <= max {
        return (width, height);
    }
    let (w, h) = (width as f64, height as f64);
    if width > height {
        (max, ((h / w * max as f64) as u32).max(1))
    } else {
        (((w / h * max as f64) as u32).max(1), max)
    }
}

fn open_image(path: &Path) -> anyhow::Result<DynamicImage> {
    match image::open(path) {
        Ok(mut img) => {
            if let Some(orientation) = std::fs::File::open(path)
                .ok()
                .and_then(|file| read_orientation(&mut std::io::BufReader::new(file)))
            {
                img.apply_orientation(orientation);
            }
            return Ok(img);
        }
        Err(err) if !is_raw_image(path) => return Err(err.into()),
        Err(_) => {}
    }

    let raw = rawler::decode_file(path)?;
    let develop = rawler::imgop::develop::RawDevelop::default();
    let intermediate = develop.develop_intermediate(&raw)?;
    intermediate
        .to_dynamic_image()
        .ok_or_else(|| anyhow::anyhow!("raw develop produced invalid image"))
}

fn read_orientation<R: BufRead + Seek>(reader: &mut R) -> Option<Orientation> {
    let exif = exif::Reader::new().read_from_container(reader).ok()?;
    let value = exif
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
        .value
        .get_uint(0)?;
    Orientation::from_exif(u8::try_from(value).ok()?)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};

    use super::*;

    fn encoded(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(
            width,
            height,
            Rgba([200, 100, 50, 255]),
        ));
        let mut bytes = Cursor::new(Vec::new());
        img.write_to(&mut bytes, ImageFormat::Png).unwrap();
        bytes.into_inner()
    }

    #[test]
    fn small_images_keep_natural_size() {
        assert_eq!(display_size(800, 600), (800, 600));
        assert_eq!(display_size(1024, 1024), (1024, 1024));
    }

    #[test]
    fn wide_images_bound_long_edge_to_1024() {
        let (w, h) = display_size(4000, 3000);
        assert_eq!((w, h), (1024, 768));

        let (w, h) = display_size(1500, 1000);
        assert_eq!(w, 1024);
        let aspect = 1500.0 / 1000.0;
        assert!((w as f64 / h as f64 - aspect).abs() < 0.01);
    }

    #[test]
    fn tall_and_square_images_bound_long_edge_to_1024() {
        assert_eq!(display_size(3000, 6000), (512, 1024));
        assert_eq!(display_size(2048, 2048), (1024, 1024));
        assert_eq!(display_size(100_000, 10), (1024, 1));
    }

    #[test]
    fn decodes_png_bytes_and_computes_display_size() {
        let asset = ImageAsset::from_bytes("wide.png", &encoded(2048, 512)).unwrap();
        assert_eq!((asset.width(), asset.height()), (2048, 512));
        assert_eq!(asset.display_size(), (1024, 256));
        assert_eq!(asset.bitmap().get_pixel(0, 0).0, [200, 100, 50, 255]);
        assert_eq!(asset.source_name(), "wide.png");
    }

    #[test]
    fn garbage_bytes_are_a_decode_error() {
        let err = ImageAsset::from_bytes("notes.txt", b"definitely not an image").unwrap_err();
        assert!(matches!(err, DeepFryError::AssetDecode { ref source_name, .. } if source_name == "notes.txt"));
    }

    #[test]
    fn missing_file_is_a_decode_error() {
        let err = ImageAsset::open(Path::new("/nonexistent/dir/photo.jpg")).unwrap_err();
        assert!(matches!(err, DeepFryError::AssetDecode { .. }));
    }

    #[test]
    fn corrupt_file_reports_the_decoder_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        let mut bytes = encoded(16, 8);
        bytes.truncate(bytes.len() / 2);
        std::fs::write(&path, &bytes).unwrap();

        let expected = image::open(&path).unwrap_err().to_string();
        let err = ImageAsset::open(&path).unwrap_err();
        match err {
            DeepFryError::AssetDecode { source_name, reason } => {
                assert_eq!(source_name, "broken.png");
                assert_eq!(reason, expected);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn open_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.png");
        std::fs::write(&path, encoded(16, 8)).unwrap();
        let asset = ImageAsset::open(&path).unwrap();
        assert_eq!(asset.display_size(), (16, 8));
        assert_eq!(asset.source_name(), "small.png");
    }

    #[test]
    fn extension_detection_is_case_insensitive() {
        assert!(is_raw_image(Path::new("/tmp/a.RAF")));
        assert!(!is_raw_image(Path::new("/tmp/a.jpg")));
        assert!(is_supported_image(Path::new("/tmp/a.JPEG")));
        assert!(!is_supported_image(Path::new("/tmp/a.txt")));
    }
}
