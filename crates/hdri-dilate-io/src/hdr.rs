//! OpenEXR / Radiance decoding and encoding.
//!
//! The file extension picks the codec: `.exr` is OpenEXR, anything else
//! is read as Radiance RGBE. Pixels are always handed to the engine as
//! 32-bit float RGB, with red and blue swapped when the caller works in
//! BGR order.

use std::path::{Path, PathBuf};

use hdri_dilate_engine::{
    ChannelOrder, GrayImage, ImageLoader, InputError, LoadedImage, Rgb32FImage, SourceFormat,
};
use image::{DynamicImage, ImageFormat, ImageReader};
use log::debug;

use crate::ExportError;

/// Format token for `path`, decided by extension alone.
#[must_use]
pub fn format_for_path(path: &Path) -> SourceFormat {
    let is_exr = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("exr"));
    if is_exr {
        SourceFormat::OpenExr
    } else {
        SourceFormat::Radiance
    }
}

/// Conventional file extension for `format`.
#[must_use]
pub const fn extension(format: SourceFormat) -> &'static str {
    match format {
        SourceFormat::OpenExr => "exr",
        SourceFormat::Radiance => "hdr",
    }
}

const fn image_format(format: SourceFormat) -> ImageFormat {
    match format {
        SourceFormat::OpenExr => ImageFormat::OpenExr,
        SourceFormat::Radiance => ImageFormat::Hdr,
    }
}

/// Default output location for a processed `source`: next to the source,
/// named `{stem}_dilated.{ext}`.
#[must_use]
pub fn default_output_path(source: &Path, format: SourceFormat) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    source.with_file_name(format!("{stem}_dilated.{}", extension(format)))
}

/// Swap channels of every pixel into `order` (RGB is the identity).
fn arranged(image: Rgb32FImage, order: ChannelOrder) -> Rgb32FImage {
    match order {
        ChannelOrder::Rgb => image,
        ChannelOrder::Bgr => {
            let mut image = image;
            for pixel in image.pixels_mut() {
                pixel.0 = order.arrange(pixel.0);
            }
            image
        }
    }
}

/// [`ImageLoader`] reading OpenEXR and Radiance files from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLoader;

impl ImageLoader for FileLoader {
    fn load(&self, path: &Path, order: ChannelOrder) -> Result<LoadedImage, InputError> {
        if !path.exists() {
            return Err(InputError::NotFound(path.to_owned()));
        }
        let format = format_for_path(path);
        let unreadable = |reason: String| InputError::Unreadable {
            path: path.to_owned(),
            reason,
        };

        let mut reader = ImageReader::open(path).map_err(|e| unreadable(e.to_string()))?;
        reader.set_format(image_format(format));
        let decoded = reader.decode().map_err(|e| match e {
            image::ImageError::Unsupported(_) => InputError::UnsupportedFormat(path.to_owned()),
            other => unreadable(other.to_string()),
        })?;

        let (width, height) = (decoded.width(), decoded.height());
        if width == 0 || height == 0 {
            return Err(InputError::UnsupportedShape { width, height });
        }
        debug!(
            "decoded {} as {format:?}: {width}x{height} {:?}",
            path.display(),
            decoded.color()
        );

        Ok(LoadedImage {
            image: arranged(decoded.into_rgb32f(), order),
            format,
        })
    }
}

/// Write `image` (channels in `order`) to `path`.
///
/// The codec follows the extension of `path`, as for loading.
///
/// # Errors
///
/// Returns [`ExportError`] if encoding or writing fails.
pub fn save_hdr(path: &Path, image: &Rgb32FImage, order: ChannelOrder) -> Result<(), ExportError> {
    let format = format_for_path(path);
    let rgb = arranged(image.clone(), order);
    DynamicImage::ImageRgb32F(rgb).save_with_format(path, image_format(format))?;
    debug!("wrote {} as {format:?}", path.display());
    Ok(())
}

/// Write a grayscale mask to `path` as PNG.
///
/// # Errors
///
/// Returns [`ExportError`] if encoding or writing fails.
pub fn save_mask(path: &Path, mask: &GrayImage) -> Result<(), ExportError> {
    mask.save_with_format(path, ImageFormat::Png)?;
    debug!("wrote mask {}", path.display());
    Ok(())
}
