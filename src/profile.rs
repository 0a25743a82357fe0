//! Algorithm profiles: named constant bundles selecting detection and repair
//! aggressiveness.

use serde::{Deserialize, Serialize};

/// Floor for the per-pass confidence threshold. Later passes tighten the
/// threshold but never below this, so weak features alone cannot flag pixels.
const MIN_THRESHOLD: f32 = 0.2;

/// Constant bundle controlling detection thresholds, repair radius and the
/// multi-pass schedule. Immutable for the duration of one run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmProfile {
    /// Confidence threshold for flagging a pixel in the first pass.
    pub threshold_base: f32,
    /// Upper bound on the original/repaired blend factor.
    pub blend_max: f32,
    /// Outer radius (pixels) of the repair sampling rings.
    pub sample_radius: u32,
    /// Number of detect+repair sweeps.
    pub pass_count: u32,
    /// Per-pass threshold decrease / blend margin increase.
    pub sensitivity_step: f32,
}

impl AlgorithmProfile {
    /// Cautious defaults: high threshold, moderate blending, two passes.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            threshold_base: 0.60,
            blend_max: 0.85,
            sample_radius: 6,
            pass_count: 2,
            sensitivity_step: 0.05,
        }
    }

    /// Balanced defaults for typical semi-transparent overlays.
    #[must_use]
    pub const fn enhanced() -> Self {
        Self {
            threshold_base: 0.50,
            blend_max: 0.90,
            sample_radius: 8,
            pass_count: 3,
            sensitivity_step: 0.05,
        }
    }

    /// Low threshold and strong blending for stubborn or opaque overlays.
    #[must_use]
    pub const fn aggressive() -> Self {
        Self {
            threshold_base: 0.40,
            blend_max: 0.95,
            sample_radius: 10,
            pass_count: 4,
            sensitivity_step: 0.07,
        }
    }

    /// For explicit user-marked regions: every region pixel is pre-committed,
    /// so the threshold only governs neighbour re-checks during sampling.
    #[must_use]
    pub const fn region_exact() -> Self {
        Self {
            threshold_base: 0.55,
            blend_max: 0.95,
            sample_radius: 8,
            pass_count: 2,
            sensitivity_step: 0.05,
        }
    }

    /// Confidence threshold for flagging during pass `pass` (0-based).
    ///
    /// Decreases by `sensitivity_step` each pass so later sweeps catch
    /// residual traces, floored at a fixed minimum.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn threshold_for_pass(&self, pass: u32) -> f32 {
        (self.threshold_base - pass as f32 * self.sensitivity_step).max(MIN_THRESHOLD)
    }

    /// Additive blend margin for pass `pass` (0-based). Later passes apply
    /// progressively stronger correction.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn blend_margin_for_pass(&self, pass: u32) -> f32 {
        pass as f32 * self.sensitivity_step
    }
}

impl Default for AlgorithmProfile {
    fn default() -> Self {
        Self::enhanced()
    }
}

/// Named profile selector, for configuration surfaces such as the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileKind {
    /// See [`AlgorithmProfile::conservative`].
    Conservative,
    /// See [`AlgorithmProfile::enhanced`].
    Enhanced,
    /// See [`AlgorithmProfile::aggressive`].
    Aggressive,
    /// See [`AlgorithmProfile::region_exact`].
    RegionExact,
}

impl ProfileKind {
    /// Resolve the selector to its constant bundle.
    #[must_use]
    pub const fn profile(self) -> AlgorithmProfile {
        match self {
            Self::Conservative => AlgorithmProfile::conservative(),
            Self::Enhanced => AlgorithmProfile::enhanced(),
            Self::Aggressive => AlgorithmProfile::aggressive(),
            Self::RegionExact => AlgorithmProfile::region_exact(),
        }
    }
}

impl std::fmt::Display for ProfileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Conservative => write!(f, "conservative"),
            Self::Enhanced => write!(f, "enhanced"),
            Self::Aggressive => write!(f, "aggressive"),
            Self::RegionExact => write!(f, "region-exact"),
        }
    }
}

impl std::str::FromStr for ProfileKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "conservative" => Ok(Self::Conservative),
            "enhanced" => Ok(Self::Enhanced),
            "aggressive" => Ok(Self::Aggressive),
            "region-exact" => Ok(Self::RegionExact),
            other => Err(format!(
                "unknown profile '{other}' (expected conservative, enhanced, aggressive or region-exact)"
            )),
        }
    }
}
