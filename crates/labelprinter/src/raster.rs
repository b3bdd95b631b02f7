//! Monochrome raster packing.
//!
//! The print head consumes columns: each column is a run of bytes holding
//! 8 vertical pixels apiece, least significant bit on top, and the page is
//! the columns laid out left to right.

use std::path::Path;

use image::{DynamicImage, GrayAlphaImage};
use tracing::debug;

use crate::job::Page;
use crate::{LabelPrinterError, Result};

/// Default luma threshold: darker pixels print.
pub const DEFAULT_THRESHOLD: u8 = 128;

/// Alpha below this counts as background.
const OPAQUE: u8 = 128;

/// A packed bitmap plus its blank margins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packed {
    pub data: Vec<u8>,
    pub columns: u32,
    pub bytes_per_column: usize,
    /// Blank pixel rows above the first inked row.
    pub margin_top: u32,
    /// Blank pixel rows below the last inked row.
    pub margin_bottom: u32,
}

impl Packed {
    pub fn is_blank(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}

impl From<Packed> for Page {
    fn from(packed: Packed) -> Self {
        Page::new(packed.data)
    }
}

/// Pack an image column-major. A pixel prints when it is opaque and its
/// luma is below `threshold`.
pub fn pack_columns(img: &GrayAlphaImage, threshold: u8) -> Packed {
    let (width, height) = img.dimensions();
    let bytes_per_column = height.div_ceil(8) as usize;
    let mut data = vec![0u8; bytes_per_column * width as usize];
    let mut inked = vec![false; height as usize];

    for (x, y, pixel) in img.enumerate_pixels() {
        let [luma, alpha] = pixel.0;
        if alpha < OPAQUE || luma >= threshold {
            continue;
        }
        let index = x as usize * bytes_per_column + (y / 8) as usize;
        data[index] |= 1 << (y % 8);
        inked[y as usize] = true;
    }

    let margin_top = inked.iter().take_while(|row| !**row).count() as u32;
    let margin_bottom = if margin_top == height {
        0
    } else {
        inked.iter().rev().take_while(|row| !**row).count() as u32
    };
    debug!(width, height, margin_top, margin_bottom, "Packed raster");

    Packed {
        data,
        columns: width,
        bytes_per_column,
        margin_top,
        margin_bottom,
    }
}

/// Decode a PNG file into a packed bitmap.
pub fn load_png(path: impl AsRef<Path>, threshold: u8) -> Result<Packed> {
    let img = image::open(path.as_ref()).map_err(|e| {
        LabelPrinterError::InvalidImage(format!("{}: {e}", path.as_ref().display()))
    })?;
    Ok(pack_image(&img, threshold))
}

/// Decode an in-memory PNG into a packed bitmap.
pub fn load_png_bytes(bytes: &[u8], threshold: u8) -> Result<Packed> {
    let img = image::load_from_memory_with_format(bytes, image::ImageFormat::Png)
        .map_err(|e| LabelPrinterError::InvalidImage(e.to_string()))?;
    Ok(pack_image(&img, threshold))
}

fn pack_image(img: &DynamicImage, threshold: u8) -> Packed {
    pack_columns(&img.to_luma_alpha8(), threshold)
}
