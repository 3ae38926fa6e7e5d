//! Image rasterization for the receipt printer.
//!
//! Turns any decodable image into the packed 1-bit bitmap consumed by the
//! `GS v 0` raster command. The pipeline is deterministic so a given file
//! always produces the same bytes on paper:
//!
//! 1. decode (PNG, JPEG, BMP)
//! 2. downscale to the paper width with Lanczos resampling, keeping aspect
//! 3. 8-bit luma (ITU-R 601-2, 16.16 fixed point)
//! 4. invert, so dark areas become set dots
//! 5. Floyd-Steinberg error diffusion to 1 bit
//! 6. pack 8 dots per byte, MSB first, rows zero-padded

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};
use std::path::Path;
use tracing::debug;

use crate::error::DeviceError;

/// Printable width of 80 mm paper at 203 dpi.
pub const DEFAULT_MAX_WIDTH: u32 = 576;

// ---------------------------------------------------------------------------
// Raster image
// ---------------------------------------------------------------------------

/// Packed 1-bit bitmap, row-major, MSB = leftmost dot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl RasterImage {
    /// Wrap already-packed rows. `data` must hold exactly
    /// `ceil(width / 8) * height` bytes.
    pub fn from_packed(width: u32, height: u32, data: Vec<u8>) -> Result<Self, DeviceError> {
        let expected = width.div_ceil(8) as usize * height as usize;
        if data.len() != expected || width == 0 || height == 0 {
            return Err(DeviceError::ImageDimensions { width, height });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width_bytes(&self) -> u32 {
        self.width.div_ceil(8)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Packed bytes of row `y`, `None` past the last row.
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let stride = self.width_bytes() as usize;
        let start = y as usize * stride;
        self.data.get(start..start + stride)
    }
}

// ---------------------------------------------------------------------------
// Rasterizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRasterizer {
    max_width: u32,
}

impl Default for ImageRasterizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH)
    }
}

impl ImageRasterizer {
    pub fn new(max_width: u32) -> Self {
        Self {
            max_width: max_width.max(8),
        }
    }

    pub fn max_width(&self) -> u32 {
        self.max_width
    }

    pub fn rasterize_file(&self, path: &Path) -> Result<RasterImage, DeviceError> {
        let img = image::open(path)?;
        self.rasterize(img)
    }

    pub fn rasterize_bytes(&self, bytes: &[u8]) -> Result<RasterImage, DeviceError> {
        let img = image::load_from_memory(bytes)?;
        self.rasterize(img)
    }

    pub fn rasterize(&self, img: DynamicImage) -> Result<RasterImage, DeviceError> {
        let (src_w, src_h) = (img.width(), img.height());
        if src_w == 0 || src_h == 0 {
            return Err(DeviceError::ImageDimensions {
                width: src_w,
                height: src_h,
            });
        }

        let img = if src_w > self.max_width {
            let ratio = self.max_width as f64 / src_w as f64;
            let target_h = ((src_h as f64 * ratio) as u32).max(1);
            debug!(src_w, src_h, target_w = self.max_width, target_h, "Downscaling image");
            img.resize_exact(self.max_width, target_h, FilterType::Lanczos3)
        } else {
            img
        };

        let (width, height) = (img.width(), img.height());
        if width.div_ceil(8) > u16::MAX as u32 || height > u16::MAX as u32 {
            return Err(DeviceError::ImageDimensions { width, height });
        }

        let levels = inverted_luma(&img.to_rgb8());
        let dots = floyd_steinberg(&levels, width as usize, height as usize);
        let data = pack_rows(&dots, width as usize, height as usize);

        Ok(RasterImage {
            width,
            height,
            data,
        })
    }
}

/// ITU-R 601-2 luma, inverted: 255 means full black in the source.
fn inverted_luma(rgb: &RgbImage) -> Vec<u8> {
    rgb.pixels()
        .map(|p| {
            let [r, g, b] = p.0;
            let luma = (r as u32 * 19_595 + g as u32 * 38_470 + b as u32 * 7_471 + 0x8000) >> 16;
            255 - luma as u8
        })
        .collect()
}

/// Floyd-Steinberg diffusion to on/off dots.
///
/// Integer arithmetic throughout: errors are kept in sixteenths, the carried
/// sum is divided with truncation toward zero, and a dot is set when the
/// corrected level exceeds 128. `errors[x + 1]` holds the error owed to
/// column `x` of the current row by the row above.
fn floyd_steinberg(levels: &[u8], width: usize, height: usize) -> Vec<bool> {
    let mut dots = vec![false; width * height];
    let mut errors = vec![0i32; width + 1];

    for y in 0..height {
        let row = &levels[y * width..(y + 1) * width];
        let (mut l, mut l0, mut l1) = (0i32, 0i32, 0i32);
        for x in 0..width {
            l = (row[x] as i32 + (l + errors[x + 1]) / 16).clamp(0, 255);
            let on = l > 128;
            dots[y * width + x] = on;

            l -= if on { 255 } else { 0 };
            let e = l;
            let twice = e + e;
            l += twice; // 3e: below-left
            errors[x] = l + l0;
            l += twice; // 5e: below
            l0 = l + l1;
            l1 = e; // 1e: below-right
            l += twice; // 7e: right
        }
        errors[width] = l0;
    }

    dots
}

/// Pack dots MSB-first, one zero-padded byte run per row.
fn pack_rows(dots: &[bool], width: usize, height: usize) -> Vec<u8> {
    let stride = width.div_ceil(8);
    let mut packed = vec![0u8; stride * height];
    for y in 0..height {
        for x in 0..width {
            if dots[y * width + x] {
                packed[y * stride + x / 8] |= 0x80 >> (x % 8);
            }
        }
    }
    packed
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
