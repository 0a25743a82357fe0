//! Region handling: normalized user rectangles, heuristic default areas and
//! the per-pixel candidate mask the detector walks.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Confidence assigned to pixels inside an explicit user-marked region.
/// Near-certain so the pass threshold can never un-flag them.
pub const COMMITTED_CONFIDENCE: f32 = 0.98;

/// A rectangle in image-relative `[0, 1]` coordinates marking a watermark
/// area. Immutable for the duration of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRegion {
    /// Left edge, fraction of image width.
    pub x: f32,
    /// Top edge, fraction of image height.
    pub y: f32,
    /// Width, fraction of image width.
    pub w: f32,
    /// Height, fraction of image height.
    pub h: f32,
}

impl NormalizedRegion {
    /// Create a validated region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Region`] when the rectangle is zero-area or extends
    /// outside the unit square.
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Result<Self> {
        if !(x.is_finite() && y.is_finite() && w.is_finite() && h.is_finite()) {
            return Err(Error::Region {
                reason: "non-finite coordinate".to_string(),
            });
        }
        if w <= 0.0 || h <= 0.0 {
            return Err(Error::Region {
                reason: format!("zero-area rectangle ({w}x{h})"),
            });
        }
        if x < 0.0 || y < 0.0 || x + w > 1.0 || y + h > 1.0 {
            return Err(Error::Region {
                reason: format!("rectangle ({x},{y})+({w}x{h}) outside unit square"),
            });
        }
        Ok(Self { x, y, w, h })
    }
}

/// Integer pixel rectangle, half-open on the right and bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    /// Floor-convert a normalized region to pixel space.
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn from_normalized(region: &NormalizedRegion, width: u32, height: u32) -> Result<Self> {
        let x0 = (region.x * width as f32).floor() as u32;
        let y0 = (region.y * height as f32).floor() as u32;
        let x1 = (((region.x + region.w) * width as f32).floor() as u32).min(width);
        let y1 = (((region.y + region.h) * height as f32).floor() as u32).min(height);
        if x0 >= x1 || y0 >= y1 {
            return Err(Error::Region {
                reason: format!("region collapses to zero pixels at {width}x{height}"),
            });
        }
        Ok(Self { x0, y0, x1, y1 })
    }
}

/// How the engine treats a pixel during detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MaskState {
    /// Outside every candidate area; never evaluated, never mutated.
    Skip = 0,
    /// Inside a heuristic area; scored normally by the detector.
    Candidate = 1,
    /// Inside an explicit user region; confidence forced to
    /// [`COMMITTED_CONFIDENCE`] regardless of detector output.
    Committed = 2,
}

/// Per-pixel candidate mask produced once per run by [`resolve_mask`].
#[derive(Debug, Clone)]
pub struct RegionMask {
    width: u32,
    states: Vec<MaskState>,
}

impl RegionMask {
    fn filled(width: u32, height: u32) -> Self {
        Self {
            width,
            states: vec![MaskState::Skip; (width as usize) * (height as usize)],
        }
    }

    fn fill_rect(&mut self, rect: PixelRect, state: MaskState) {
        for y in rect.y0..rect.y1 {
            let row = (y as usize) * (self.width as usize);
            for x in rect.x0..rect.x1 {
                self.states[row + x as usize] = state;
            }
        }
    }

    /// Mask state of the pixel at `(x, y)`.
    #[inline]
    #[must_use]
    pub fn state(&self, x: u32, y: u32) -> MaskState {
        self.states[(y as usize) * (self.width as usize) + (x as usize)]
    }

    /// Whether the pixel belongs to an explicit user region.
    #[inline]
    #[must_use]
    pub fn is_committed(&self, x: u32, y: u32) -> bool {
        self.state(x, y) == MaskState::Committed
    }

    /// Number of pixels the detector will evaluate.
    #[must_use]
    pub fn active_pixels(&self) -> usize {
        self.states.iter().filter(|s| **s != MaskState::Skip).count()
    }
}

/// Build the candidate mask for one run.
///
/// With an explicit region, exactly its pixels are pre-committed and nothing
/// else is evaluated. Without one, a fixed set of heuristic rectangles (four
/// corners sized 25% of each dimension plus a central band) becomes the
/// candidate set, scored normally by the detector.
///
/// # Errors
///
/// Returns [`Error::Region`] when the explicit region collapses to zero
/// pixels at the given dimensions.
pub fn resolve_mask(
    region: Option<&NormalizedRegion>,
    width: u32,
    height: u32,
) -> Result<RegionMask> {
    let mut mask = RegionMask::filled(width, height);

    if let Some(region) = region {
        let rect = PixelRect::from_normalized(region, width, height)?;
        mask.fill_rect(rect, MaskState::Committed);
        return Ok(mask);
    }

    for rect in heuristic_rects(width, height) {
        mask.fill_rect(rect, MaskState::Candidate);
    }
    Ok(mask)
}

/// Default candidate areas when the user marks nothing: overlay watermarks
/// cluster in corners and across the horizontal center.
fn heuristic_rects(width: u32, height: u32) -> Vec<PixelRect> {
    let cw = width.div_ceil(4).max(1);
    let ch = height.div_ceil(4).max(1);
    let mut rects = vec![
        // Corners, 25% of each dimension.
        PixelRect { x0: 0, y0: 0, x1: cw, y1: ch },
        PixelRect { x0: width - cw, y0: 0, x1: width, y1: ch },
        PixelRect { x0: 0, y0: height - ch, x1: cw, y1: height },
        PixelRect { x0: width - cw, y0: height - ch, x1: width, y1: height },
    ];
    // Central band: middle 60% of the width, middle fifth of the height.
    let bx0 = width / 5;
    let bx1 = width - width / 5;
    let by0 = height * 2 / 5;
    let by1 = height - height * 2 / 5;
    if bx0 < bx1 && by0 < by1 {
        rects.push(PixelRect { x0: bx0, y0: by0, x1: bx1, y1: by1 });
    }
    rects
}
