//! Neighbour-sampling repair.
//!
//! Flagged pixels are rebuilt from concentric-ring samples of nearby
//! non-watermark content. Ring offsets are generated once per profile and
//! reused for every pixel, so the hot path does no trigonometry.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::buffer::PixelBuffer;
use crate::detection;
use crate::region::RegionMask;

/// Number of concentric sampling rings spanning the profile's radius.
const RING_COUNT: u32 = 3;
/// Angular samples per ring.
const ANGULAR_STEPS: u32 = 16;
/// Distance-weight stabiliser: weight is `1 / (d^2 + EPSILON)`.
const EPSILON: f32 = 0.5;
/// Repair uses only the strongest samples per pixel.
const TOP_K: usize = 16;

/// One candidate replacement color and its weight. Lives only inside a single
/// pixel's repair computation.
#[derive(Debug, Clone, Copy)]
pub struct RepairSample {
    /// RGBA color of the sampled source pixel.
    pub color: [u8; 4],
    /// Combined distance and texture weight.
    pub weight: f32,
}

/// Opt-in seeded perturbation of repaired colors.
///
/// Repair is strictly deterministic by default; enabling noise keeps it
/// reproducible because the generator is re-seeded per pixel from `seed` and
/// the pixel's position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoiseParams {
    /// Base seed shared by the whole run.
    pub seed: u64,
    /// Maximum absolute perturbation per RGB channel, in channel units.
    pub amplitude: u8,
}

/// Precomputed ring sampling offsets for one `(radius, ring count)` pair.
#[derive(Debug, Clone)]
pub struct RingOffsets {
    offsets: Vec<(i32, i32, f32)>,
}

impl RingOffsets {
    /// Generate the offset table for a profile's sample radius.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn new(sample_radius: u32) -> Self {
        let mut offsets: Vec<(i32, i32, f32)> = Vec::new();
        for ring in 1..=RING_COUNT {
            let radius = (sample_radius as f32 * ring as f32 / RING_COUNT as f32).max(1.0);
            for step in 0..ANGULAR_STEPS {
                let angle = std::f32::consts::TAU * step as f32 / ANGULAR_STEPS as f32;
                let dx = (radius * angle.cos()).round() as i32;
                let dy = (radius * angle.sin()).round() as i32;
                if dx == 0 && dy == 0 {
                    continue;
                }
                // Rounding collapses adjacent steps on small rings.
                if offsets.iter().any(|&(ox, oy, _)| ox == dx && oy == dy) {
                    continue;
                }
                let d2 = (dx * dx + dy * dy) as f32;
                offsets.push((dx, dy, d2));
            }
        }
        Self { offsets }
    }

    /// Number of distinct offsets in the table.
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the table is empty (never the case for radius >= 1).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Texture consistency of the pixel at `(x, y)`: mean of
/// `max(0, 255 - |channel diff|) / 255` against its in-bounds 8-neighbours,
/// over the RGB channels. Smooth regions score near 1, noisy ones lower.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn texture_consistency(buf: &PixelBuffer, x: u32, y: u32) -> f32 {
    let center = buf.get(x, y);
    let mut sum = 0.0f32;
    let mut terms = 0u32;
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
            let npx = buf.get(nx as u32, ny as u32);
            for ch in 0..3 {
                let diff = f32::from(center[ch]) - f32::from(npx[ch]);
                sum += (255.0 - diff.abs()).max(0.0) / 255.0;
                terms += 1;
            }
        }
    }
    if terms == 0 {
        0.0
    } else {
        sum / terms as f32
    }
}

/// Compute a replacement color for the flagged pixel at `(x, y)`.
///
/// Samples along the precomputed rings, skipping sources that are committed
/// region pixels or themselves flagged at `threshold`. Returns `None` when no
/// valid source exists (fully surrounded by flagged pixels); the caller then
/// leaves the pixel unchanged.
#[must_use]
pub fn repair_pixel(
    buf: &PixelBuffer,
    mask: &RegionMask,
    x: u32,
    y: u32,
    rings: &RingOffsets,
    threshold: f32,
) -> Option<[u8; 4]> {
    let mut samples: Vec<RepairSample> = Vec::with_capacity(rings.len());

    for &(dx, dy, d2) in &rings.offsets {
        let nx = i64::from(x) + i64::from(dx);
        let ny = i64::from(y) + i64::from(dy);
        if nx < 0 || ny < 0 || nx >= i64::from(buf.width) || ny >= i64::from(buf.height) {
            continue;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (nx, ny) = (nx as u32, ny as u32);
        if mask.is_committed(nx, ny) {
            continue;
        }
        if detection::neighbor_flagged(buf, nx, ny, threshold) {
            continue;
        }
        let weight = 1.0 / (d2 + EPSILON) * (1.0 + texture_consistency(buf, nx, ny));
        samples.push(RepairSample {
            color: buf.get(nx, ny),
            weight,
        });
    }

    if samples.is_empty() {
        return None;
    }

    // Keep the strongest TOP_K; ties broken by the deterministic scan order.
    samples.sort_by(|a, b| b.weight.total_cmp(&a.weight));
    samples.truncate(TOP_K);

    let total: f32 = samples.iter().map(|s| s.weight).sum();
    let mut out = [0u8; 4];
    for ch in 0..4 {
        let acc: f32 = samples
            .iter()
            .map(|s| f32::from(s.color[ch]) * s.weight)
            .sum();
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            out[ch] = (acc / total).round().clamp(0.0, 255.0) as u8;
        }
    }
    Some(out)
}

/// Perturb a repaired color with seeded noise. The generator is derived from
/// the run seed and the pixel position, so output is independent of
/// processing order. Alpha is left untouched.
#[must_use]
pub fn perturb(repaired: [u8; 4], x: u32, y: u32, width: u32, noise: &NoiseParams) -> [u8; 4] {
    if noise.amplitude == 0 {
        return repaired;
    }
    let index = u64::from(y) * u64::from(width) + u64::from(x);
    let mut rng = ChaCha8Rng::seed_from_u64(noise.seed ^ index.wrapping_mul(0x9E37_79B9_7F4A_7C15));
    let amp = i16::from(noise.amplitude);
    let mut out = repaired;
    for ch in &mut out[..3] {
        let delta = rng.gen_range(-amp..=amp);
        *ch = i16::from(*ch).saturating_add(delta).clamp(0, 255) as u8;
    }
    out
}

/// Blend the repaired color over the original:
/// `out = original * (1 - blend) + repaired * blend`, per channel.
#[must_use]
pub fn blend(original: [u8; 4], repaired: [u8; 4], blend_factor: f32) -> [u8; 4] {
    let b = blend_factor.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for ch in 0..4 {
        let v = f32::from(original[ch]).mul_add(1.0 - b, f32::from(repaired[ch]) * b);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        {
            out[ch] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::resolve_mask;

    fn uniform(width: u32, height: u32, px: [u8; 4]) -> PixelBuffer {
        let mut buf =
            PixelBuffer::new(width, height, vec![0u8; (width * height * 4) as usize]).unwrap();
        for y in 0..height {
            for x in 0..width {
                buf.put(x, y, px);
            }
        }
        buf
    }

    #[test]
    fn ring_offsets_are_distinct_and_nonzero() {
        let rings = RingOffsets::new(6);
        assert!(!rings.is_empty());
        for (i, &(dx, dy, d2)) in rings.offsets.iter().enumerate() {
            assert!(dx != 0 || dy != 0);
            assert!(d2 >= 1.0);
            for &(ox, oy, _) in &rings.offsets[i + 1..] {
                assert!(!(dx == ox && dy == oy), "duplicate offset ({dx},{dy})");
            }
        }
    }

    #[test]
    fn ring_offsets_stay_within_radius() {
        let radius = 10;
        let rings = RingOffsets::new(radius);
        for &(dx, dy, _) in &rings.offsets {
            let d = f64::from(dx * dx + dy * dy).sqrt();
            // Rounding can push an offset at most half a pixel per axis out.
            assert!(d <= f64::from(radius) + 1.0, "offset ({dx},{dy}) beyond radius");
        }
    }

    #[test]
    fn texture_consistency_is_one_on_uniform_field() {
        let buf = uniform(5, 5, [80, 90, 100, 255]);
        assert!((texture_consistency(&buf, 2, 2) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn texture_consistency_drops_on_noise() {
        let mut buf = uniform(5, 5, [80, 90, 100, 255]);
        buf.put(1, 1, [255, 0, 255, 255]);
        buf.put(3, 3, [0, 255, 0, 255]);
        assert!(texture_consistency(&buf, 2, 2) < 1.0);
    }

    #[test]
    fn repair_on_uniform_background_returns_background() {
        let mut buf = uniform(20, 20, [100, 120, 140, 255]);
        // Transparent hole in the middle; every ring sample sees background.
        buf.put(10, 10, [0, 0, 0, 0]);
        let mask = resolve_mask(None, 20, 20).unwrap();
        let rings = RingOffsets::new(6);
        let repaired = repair_pixel(&buf, &mask, 10, 10, &rings, 0.5).unwrap();
        assert_eq!(repaired, [100, 120, 140, 255]);
    }

    #[test]
    fn repair_returns_none_when_fully_surrounded() {
        // Entire image transparent black: every candidate source is itself
        // flagged at any reasonable threshold.
        let buf = uniform(9, 9, [0, 0, 0, 0]);
        let mask = resolve_mask(None, 9, 9).unwrap();
        let rings = RingOffsets::new(3);
        assert!(repair_pixel(&buf, &mask, 4, 4, &rings, 0.5).is_none());
    }

    #[test]
    fn repair_skips_committed_sources() {
        let buf = uniform(20, 20, [100, 120, 140, 255]);
        let region = crate::region::NormalizedRegion::new(0.0, 0.0, 1.0, 1.0).unwrap();
        let mask = resolve_mask(Some(&region), 20, 20).unwrap();
        let rings = RingOffsets::new(6);
        // Everything committed: no valid sources anywhere.
        assert!(repair_pixel(&buf, &mask, 10, 10, &rings, 0.5).is_none());
    }

    #[test]
    fn blend_endpoints_and_midpoint() {
        let orig = [0, 0, 0, 0];
        let rep = [200, 100, 50, 255];
        assert_eq!(blend(orig, rep, 0.0), orig);
        assert_eq!(blend(orig, rep, 1.0), rep);
        assert_eq!(blend(orig, rep, 0.5), [100, 50, 25, 128]);
    }

    #[test]
    fn perturb_is_deterministic_and_bounded() {
        let noise = NoiseParams { seed: 42, amplitude: 5 };
        let a = perturb([100, 100, 100, 200], 3, 7, 64, &noise);
        let b = perturb([100, 100, 100, 200], 3, 7, 64, &noise);
        assert_eq!(a, b);
        for ch in 0..3 {
            assert!(i16::from(a[ch]).abs_diff(100) <= 5);
        }
        // Alpha untouched.
        assert_eq!(a[3], 200);
    }

    #[test]
    fn perturb_zero_amplitude_is_identity() {
        let noise = NoiseParams { seed: 1, amplitude: 0 };
        assert_eq!(perturb([9, 8, 7, 6], 0, 0, 10, &noise), [9, 8, 7, 6]);
    }
}
