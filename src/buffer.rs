//! RGBA pixel buffer shared between the engine and the host boundary.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of pixels the engine accepts before refusing with
/// [`Error::Resource`]. 100 megapixels keeps peak memory under ~400 MiB.
pub const MAX_PIXELS: u64 = 100_000_000;

/// A decoded raster image: tightly packed RGBA samples, row-major.
///
/// Invariant: `data.len() == width * height * 4`. Constructors validate this
/// so downstream pixel indexing never has to re-check bounds arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBuffer {
    /// Image width in pixels.
    pub width: u32,
    /// Image height in pixels.
    pub height: u32,
    /// RGBA samples, 4 bytes per pixel.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a buffer from raw RGBA bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Input`] when the buffer is empty, has zero dimensions,
    /// or its length does not equal `width * height * 4`, and
    /// [`Error::Resource`] when the pixel count exceeds [`MAX_PIXELS`].
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::Input {
                reason: format!("zero dimension ({width}x{height})"),
            });
        }
        let pixels = u64::from(width) * u64::from(height);
        if pixels > MAX_PIXELS {
            return Err(Error::Resource {
                width,
                height,
                max_pixels: MAX_PIXELS,
            });
        }
        let expected = (pixels * 4) as usize;
        if data.len() != expected {
            return Err(Error::Input {
                reason: format!(
                    "length {} does not match {width}x{height}x4 = {expected}",
                    data.len()
                ),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Re-validate a buffer that crossed a serialization boundary.
    ///
    /// # Errors
    ///
    /// Same conditions as [`PixelBuffer::new`].
    pub fn validate(self) -> Result<Self> {
        Self::new(self.width, self.height, self.data)
    }

    /// Number of pixels in the buffer.
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Byte offset of the pixel at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn offset(&self, x: u32, y: u32) -> usize {
        ((y as usize) * (self.width as usize) + (x as usize)) * 4
    }

    /// Read the RGBA sample at `(x, y)`. Caller guarantees in-bounds coordinates.
    #[inline]
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    /// Write the RGBA sample at `(x, y)`. Caller guarantees in-bounds coordinates.
    #[inline]
    pub fn put(&mut self, x: u32, y: u32, px: [u8; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&px);
    }

    /// Mean of the RGB channels at `(x, y)`, in `[0, 255]`.
    #[inline]
    #[must_use]
    pub fn brightness(&self, x: u32, y: u32) -> f32 {
        let px = self.get(x, y);
        (f32::from(px[0]) + f32::from(px[1]) + f32::from(px[2])) / 3.0
    }
}

impl From<RgbaImage> for PixelBuffer {
    fn from(img: RgbaImage) -> Self {
        let (width, height) = (img.width(), img.height());
        Self {
            width,
            height,
            data: img.into_raw(),
        }
    }
}

impl TryFrom<PixelBuffer> for RgbaImage {
    type Error = Error;

    fn try_from(buf: PixelBuffer) -> Result<Self> {
        let (width, height) = (buf.width, buf.height);
        RgbaImage::from_raw(width, height, buf.data).ok_or(Error::Input {
            reason: format!("buffer does not fit {width}x{height} RGBA image"),
        })
    }
}
