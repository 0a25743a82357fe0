//! Multi-feature watermark detection.
//!
//! Each pixel gets a fused confidence in `[0, 1]` built from independently
//! scored features: transparency, brightness extremity, local contrast, Sobel
//! edge strength, monochrome uniformity and an isolated-pixel check. Every
//! feature adds its weight when its predicate holds; the sum is clamped to 1.
//! Scoring is pure: fixed buffer and profile always give the same result.

use crate::buffer::PixelBuffer;
use crate::region::{RegionMask, COMMITTED_CONFIDENCE};

/// Alpha below this is treated as watermark transparency.
const NEAR_OPAQUE_ALPHA: u8 = 250;
/// Feature weight: transparency.
const TRANSPARENCY_WEIGHT: f32 = 0.40;
/// Mean RGB above this counts as extremely bright.
const BRIGHTNESS_HIGH: f32 = 240.0;
/// Mean RGB below this counts as extremely dark.
const BRIGHTNESS_LOW: f32 = 15.0;
/// Feature weight: brightness extremity.
const BRIGHTNESS_WEIGHT: f32 = 0.30;
/// Minimum brightness delta to any 8-neighbour for the contrast feature.
const CONTRAST_DELTA: f32 = 45.0;
/// Feature weight: local contrast.
const CONTRAST_WEIGHT: f32 = 0.25;
/// Minimum Sobel gradient magnitude for the edge feature.
const EDGE_MAGNITUDE: f32 = 80.0;
/// Feature weight: edge strength.
const EDGE_WEIGHT: f32 = 0.20;
/// Maximum pairwise channel spread for the monochrome feature.
const MONO_SPREAD: u8 = 12;
/// Minimum brightness for the monochrome feature (bright gray/white overlays).
const MONO_BRIGHTNESS: f32 = 200.0;
/// Feature weight: monochrome uniformity.
const MONO_WEIGHT: f32 = 0.30;
/// Brightness delta that makes a neighbour "sharply different".
const ISOLATED_DELTA: f32 = 60.0;
/// Feature weight: isolated pixel.
const ISOLATED_WEIGHT: f32 = 0.30;

/// Brightness at `(x, y)` with coordinates clamped to the image, so 3x3
/// windows replicate the border instead of shrinking.
#[inline]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn brightness_clamped(buf: &PixelBuffer, x: i64, y: i64) -> f32 {
    let cx = x.clamp(0, i64::from(buf.width) - 1) as u32;
    let cy = y.clamp(0, i64::from(buf.height) - 1) as u32;
    buf.brightness(cx, cy)
}

/// Sobel gradient magnitude of the brightness field at `(x, y)`.
fn sobel_magnitude(buf: &PixelBuffer, x: u32, y: u32) -> f32 {
    let b = |dx: i64, dy: i64| brightness_clamped(buf, i64::from(x) + dx, i64::from(y) + dy);

    let gx = -b(-1, -1) + b(1, -1) - 2.0 * b(-1, 0) + 2.0 * b(1, 0) - b(-1, 1) + b(1, 1);
    let gy = -b(-1, -1) - 2.0 * b(0, -1) - b(1, -1) + b(-1, 1) + 2.0 * b(0, 1) + b(1, 1);

    (gx * gx + gy * gy).sqrt()
}

/// Walk the in-bounds 8-neighbourhood, yielding each neighbour's brightness.
fn for_each_neighbor_brightness(
    buf: &PixelBuffer,
    x: u32,
    y: u32,
    mut f: impl FnMut(f32),
) {
    for dy in -1i64..=1 {
        for dx in -1i64..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let nx = i64::from(x) + dx;
            let ny = i64::from(y) + dy;
            if nx < 0 || ny < 0 || nx >= i64::from(buf.width) || ny >= i64::from(buf.height) {
                continue;
            }
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            f(buf.brightness(nx as u32, ny as u32));
        }
    }
}

/// Fused watermark confidence for one pixel, ignoring any pre-commit.
///
/// Also used on repair-sample neighbours, which must never inherit the
/// user region's forced confidence.
#[must_use]
pub fn pixel_confidence(buf: &PixelBuffer, x: u32, y: u32) -> f32 {
    let px = buf.get(x, y);
    let brightness = buf.brightness(x, y);
    let mut score = 0.0f32;

    if px[3] < NEAR_OPAQUE_ALPHA {
        score += TRANSPARENCY_WEIGHT;
    }

    if brightness > BRIGHTNESS_HIGH || brightness < BRIGHTNESS_LOW {
        score += BRIGHTNESS_WEIGHT;
    }

    let mut max_delta = 0.0f32;
    let mut sharp = 0u32;
    let mut present = 0u32;
    for_each_neighbor_brightness(buf, x, y, |nb| {
        let delta = (brightness - nb).abs();
        max_delta = max_delta.max(delta);
        present += 1;
        if delta > ISOLATED_DELTA {
            sharp += 1;
        }
    });

    if max_delta > CONTRAST_DELTA {
        score += CONTRAST_WEIGHT;
    }

    if sobel_magnitude(buf, x, y) > EDGE_MAGNITUDE {
        score += EDGE_WEIGHT;
    }

    let spread_rg = px[0].abs_diff(px[1]);
    let spread_gb = px[1].abs_diff(px[2]);
    let spread_rb = px[0].abs_diff(px[2]);
    if spread_rg < MONO_SPREAD
        && spread_gb < MONO_SPREAD
        && spread_rb < MONO_SPREAD
        && brightness > MONO_BRIGHTNESS
    {
        score += MONO_WEIGHT;
    }

    // Majority of the actual neighbourhood, scaled as >= 5-of-8.
    if present > 0 && sharp * 8 >= present * 5 {
        score += ISOLATED_WEIGHT;
    }

    score.min(1.0)
}

/// Confidence with the region mask applied: committed pixels are forced to
/// [`COMMITTED_CONFIDENCE`] so user intent overrides the detector.
#[must_use]
pub fn masked_confidence(buf: &PixelBuffer, mask: &RegionMask, x: u32, y: u32) -> f32 {
    if mask.is_committed(x, y) {
        COMMITTED_CONFIDENCE
    } else {
        pixel_confidence(buf, x, y)
    }
}

/// Whether a neighbour pixel would itself be flagged at `threshold`.
///
/// Evaluates the raw detector only: repair sampling must not treat the whole
/// committed region as forced, or it could never find sources next to it.
/// Committed membership is checked separately by the caller.
#[inline]
#[must_use]
pub fn neighbor_flagged(buf: &PixelBuffer, x: u32, y: u32, threshold: f32) -> bool {
    pixel_confidence(buf, x, y) > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::resolve_mask;

    fn uniform(width: u32, height: u32, px: [u8; 4]) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height, vec![0u8; (width * height * 4) as usize])
            .unwrap();
        for y in 0..height {
            for x in 0..width {
                buf.put(x, y, px);
            }
        }
        buf
    }

    #[test]
    fn uniform_midtone_scores_zero() {
        let buf = uniform(8, 8, [100, 120, 140, 255]);
        for y in 0..8 {
            for x in 0..8 {
                assert!(pixel_confidence(&buf, x, y).abs() < f32::EPSILON);
            }
        }
    }

    #[test]
    fn transparent_dark_pixel_scores_transparency_and_brightness() {
        let mut buf = uniform(8, 8, [0, 0, 0, 0]);
        // Fully uniform transparent black: no contrast, no edges, not bright.
        let score = pixel_confidence(&buf, 4, 4);
        assert!((score - (TRANSPARENCY_WEIGHT + BRIGHTNESS_WEIGHT)).abs() < 1e-6);

        // Restore opacity: only the darkness feature remains.
        for y in 0..8 {
            for x in 0..8 {
                buf.put(x, y, [0, 0, 0, 255]);
            }
        }
        let score = pixel_confidence(&buf, 4, 4);
        assert!((score - BRIGHTNESS_WEIGHT).abs() < 1e-6);
    }

    #[test]
    fn bright_monochrome_overlay_scores_high() {
        // White semi-overlay pixel on a midtone background.
        let mut buf = uniform(8, 8, [100, 120, 140, 255]);
        buf.put(4, 4, [250, 252, 251, 255]);
        let score = pixel_confidence(&buf, 4, 4);
        // Bright + contrast + edge + monochrome + isolated all fire.
        assert!(score > 0.9, "expected near-certain confidence, got {score}");
    }

    #[test]
    fn confidence_is_clamped_to_one() {
        let mut buf = uniform(8, 8, [100, 120, 140, 255]);
        buf.put(4, 4, [255, 255, 255, 0]);
        assert!(pixel_confidence(&buf, 4, 4) <= 1.0);
    }

    #[test]
    fn confidence_is_deterministic() {
        let mut buf = uniform(16, 16, [90, 110, 130, 255]);
        buf.put(3, 3, [255, 255, 255, 128]);
        buf.put(12, 12, [0, 0, 0, 255]);
        for y in 0..16 {
            for x in 0..16 {
                assert_eq!(
                    pixel_confidence(&buf, x, y).to_bits(),
                    pixel_confidence(&buf, x, y).to_bits()
                );
            }
        }
    }

    #[test]
    fn committed_mask_forces_confidence() {
        let buf = uniform(10, 10, [100, 120, 140, 255]);
        let region = crate::region::NormalizedRegion::new(0.0, 0.0, 0.5, 0.5).unwrap();
        let mask = resolve_mask(Some(&region), 10, 10).unwrap();
        assert!((masked_confidence(&buf, &mask, 2, 2) - COMMITTED_CONFIDENCE).abs() < 1e-6);
        // Outside the region the raw detector wins (zero for uniform midtone).
        assert!(masked_confidence(&buf, &mask, 8, 8).abs() < f32::EPSILON);
    }

    #[test]
    fn sobel_zero_on_flat_field_nonzero_on_edge() {
        let flat = uniform(8, 8, [60, 60, 60, 255]);
        assert!(sobel_magnitude(&flat, 4, 4).abs() < 1e-4);

        let mut edge = uniform(8, 8, [0, 0, 0, 255]);
        for y in 0..8 {
            for x in 4..8 {
                edge.put(x, y, [255, 255, 255, 255]);
            }
        }
        assert!(sobel_magnitude(&edge, 4, 4) > EDGE_MAGNITUDE);
    }
}
