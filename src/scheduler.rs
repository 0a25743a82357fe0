//! Chunked execution: row-band partitioning, progress reporting, cooperative
//! yielding, cancellation and deadlines.
//!
//! The cooperative runner below is the single source of truth for band order
//! and pass semantics; the isolated worker (see [`crate::worker`]) drives the
//! same code on its own thread, so both strategies produce identical output.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::buffer::PixelBuffer;
use crate::error::{Error, Result};
use crate::inpaint::{NoiseParams, RingOffsets};
use crate::passes::{BandReport, PassController};
use crate::profile::AlgorithmProfile;
use crate::region::RegionMask;

/// Default number of row bands an image is split into.
pub const DEFAULT_BAND_COUNT: u32 = 32;

/// How the engine schedules its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionStrategy {
    /// Run on the caller's thread, yielding between bands.
    #[default]
    Cooperative,
    /// Delegate to an isolated background thread via message passing.
    Background,
}

/// Cooperative cancellation flag, checked at band boundaries only, so the
/// worst-case latency of a cancel is one band's processing time.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a token in the not-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next band boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Split `height` rows into at most `band_count` contiguous bands, in
/// strictly increasing row order.
#[must_use]
pub fn band_ranges(height: u32, band_count: u32) -> Vec<Range<u32>> {
    let bands = band_count.clamp(1, height.max(1));
    let rows_per_band = height.div_ceil(bands);
    let mut ranges = Vec::with_capacity(bands as usize);
    let mut start = 0u32;
    while start < height {
        let end = (start + rows_per_band).min(height);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Everything a scheduled run needs besides the buffer itself.
pub(crate) struct RunContext<'a> {
    /// Active profile.
    pub profile: &'a AlgorithmProfile,
    /// Candidate mask for this run.
    pub mask: &'a RegionMask,
    /// Precomputed sampling offsets.
    pub rings: &'a RingOffsets,
    /// Opt-in seeded noise.
    pub noise: Option<NoiseParams>,
    /// Number of row bands.
    pub band_count: u32,
    /// Cooperative cancellation flag.
    pub cancel: Option<&'a CancellationToken>,
    /// Absolute wall-clock deadline.
    pub deadline: Option<Instant>,
    /// When the run started, for timeout diagnostics.
    pub started: Instant,
}

/// Run all bands cooperatively on the current thread, emitting monotone
/// progress in `[0, 100]` after each band and yielding between bands.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] or [`Error::Timeout`] when aborted at a band
/// boundary; the buffer is left partially processed and must be discarded by
/// the caller (the engine owns it and never returns it on error). Propagates
/// [`Error::Algorithm`] from the pass controller.
pub(crate) fn run_cooperative(
    buf: &mut PixelBuffer,
    ctx: &RunContext<'_>,
    progress: &mut dyn FnMut(u8),
) -> Result<Vec<BandReport>> {
    let height = buf.height;
    let bands = band_ranges(height, ctx.band_count);
    let mut reports = Vec::with_capacity(bands.len());

    for rows in bands {
        if let Some(token) = ctx.cancel {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }
        if let Some(deadline) = ctx.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    elapsed_ms: ctx.started.elapsed().as_millis(),
                });
            }
        }

        let band_end = rows.end;
        let mut controller = PassController::new(ctx.profile, ctx.rings, ctx.noise);
        reports.push(controller.run_band(buf, ctx.mask, rows)?);

        // floor(band_end / height * 100); the final band lands exactly on 100.
        #[allow(clippy::cast_possible_truncation)]
        let percent = (u64::from(band_end) * 100 / u64::from(height)) as u8;
        progress(percent);

        std::thread::yield_now();
    }

    Ok(reports)
}
