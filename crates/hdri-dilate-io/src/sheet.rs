//! PNG contact sheets for debug frames and run previews.
//!
//! Both sheets are 2x2 grids separated by a gray gutter. A debug frame
//! sheet holds the four masks of a [`DebugFrame`] in panel order; a
//! preview sheet holds the threshold mask, dilated mask, original and
//! processed images of an [`OutputBundle`], with HDR values clamped to
//! `[0, 1]` and sRGB-encoded for display.

use std::path::{Path, PathBuf};

use hdri_dilate_engine::{ChannelOrder, DebugFrame, GrayImage, OutputBundle, Rgb32FImage, RgbImage};
use image::{GenericImage, ImageFormat};
use log::debug;

use crate::ExportError;

/// Gutter width between panels, in pixels.
pub const GUTTER: u32 = 4;

/// Gutter intensity.
const GUTTER_VALUE: u8 = 128;

/// Sheet dimensions for panels of `width` x `height`.
const fn sheet_size(width: u32, height: u32) -> (u32, u32) {
    (width * 2 + GUTTER, height * 2 + GUTTER)
}

/// Top-left corner of panel `index` (row-major).
const fn panel_origin(index: u32, width: u32, height: u32) -> (u32, u32) {
    ((index % 2) * (width + GUTTER), (index / 2) * (height + GUTTER))
}

/// File name for `frame`: `{stem}_cc_{nnnn}_itr_{nnnn}.png`.
#[must_use]
pub fn frame_filename(frame: &DebugFrame) -> String {
    format!(
        "{}_cc_{:04}_itr_{:04}.png",
        frame.source_stem, frame.component, frame.iteration
    )
}

/// Tile the four masks of `frame` into one grayscale sheet.
///
/// # Errors
///
/// Returns [`ExportError::Image`] if the masks differ in size.
pub fn render_frame(frame: &DebugFrame) -> Result<GrayImage, ExportError> {
    let (width, height) = frame.images[0].dimensions();
    let (sheet_w, sheet_h) = sheet_size(width, height);
    let mut sheet = GrayImage::from_pixel(sheet_w, sheet_h, image::Luma([GUTTER_VALUE]));
    for (index, panel) in (0u32..).zip(&frame.images) {
        let (x, y) = panel_origin(index, width, height);
        sheet.copy_from(panel, x, y)?;
    }
    Ok(sheet)
}

/// Render `frame` into `root/{stem}/` and return the written path.
///
/// # Errors
///
/// Returns [`ExportError`] if the directory cannot be created or the
/// PNG cannot be written.
pub fn save_frame(root: &Path, frame: &DebugFrame) -> Result<PathBuf, ExportError> {
    let dir = root.join(&frame.source_stem);
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(frame_filename(frame));
    render_frame(frame)?.save_with_format(&path, ImageFormat::Png)?;
    debug!("wrote debug frame {}", path.display());
    Ok(path)
}

/// Encode one linear value as an 8-bit sRGB level, clamping to `[0, 1]`.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn linear_to_srgb8(value: f32) -> u8 {
    let v = if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    };
    let encoded = if v <= 0.003_130_8 {
        v * 12.92
    } else {
        1.055f32.mul_add(v.powf(1.0 / 2.4), -0.055)
    };
    (encoded * 255.0).round().clamp(0.0, 255.0) as u8
}

fn display_rgb(image: &Rgb32FImage, order: ChannelOrder) -> RgbImage {
    RgbImage::from_fn(image.width(), image.height(), |x, y| {
        let rgb = order.arrange(image.get_pixel(x, y).0);
        image::Rgb(rgb.map(linear_to_srgb8))
    })
}

fn gray_to_rgb(mask: &GrayImage) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        let v = mask.get_pixel(x, y).0[0];
        image::Rgb([v, v, v])
    })
}

/// Tile threshold mask, dilated mask, original and processed images of
/// `bundle` into one RGB sheet.
///
/// `order` is the channel order the bundle's images are stored in.
///
/// # Errors
///
/// Returns [`ExportError::Image`] if the bundle's images differ in size.
pub fn render_preview(bundle: &OutputBundle, order: ChannelOrder) -> Result<RgbImage, ExportError> {
    let dims = bundle.dimensions();
    let (sheet_w, sheet_h) = sheet_size(dims.width, dims.height);
    let mut sheet = RgbImage::from_pixel(sheet_w, sheet_h, image::Rgb([GUTTER_VALUE; 3]));
    let panels = [
        gray_to_rgb(&bundle.threshold_mask),
        gray_to_rgb(&bundle.dilated_mask),
        display_rgb(&bundle.original, order),
        display_rgb(&bundle.processed, order),
    ];
    for (index, panel) in (0u32..).zip(&panels) {
        let (x, y) = panel_origin(index, dims.width, dims.height);
        sheet.copy_from(panel, x, y)?;
    }
    Ok(sheet)
}

/// Render and write the preview sheet of `bundle` to `path` as PNG.
///
/// # Errors
///
/// Returns [`ExportError`] if rendering or writing fails.
pub fn save_preview(
    path: &Path,
    bundle: &OutputBundle,
    order: ChannelOrder,
) -> Result<(), ExportError> {
    render_preview(bundle, order)?.save_with_format(path, ImageFormat::Png)?;
    debug!("wrote preview sheet {}", path.display());
    Ok(())
}
