//! hdri-dilate-io: Filesystem collaborators for the dilation engine.
//!
//! - [`FileLoader`] decodes OpenEXR / Radiance sources for the engine.
//! - [`save_hdr`] and [`save_mask`] write run outputs.
//! - [`sheet`] renders debug frames and four-way previews as PNG sheets.
//!
//! The engine itself stays sans-IO; everything that touches the disk
//! lives here.

pub mod hdr;
pub mod sheet;

pub use hdr::{FileLoader, default_output_path, format_for_path, save_hdr, save_mask};
pub use sheet::{frame_filename, render_frame, render_preview, save_frame, save_preview};

/// Errors that can occur while writing outputs.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    /// Encoding failed, or images could not be tiled.
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    /// A directory or file could not be written.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
