//! Core removal engine: the host-facing API tying region resolution,
//! detection, inpainting and scheduling together, plus file-level helpers.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::buffer::PixelBuffer;
use crate::error::{Error, Result};
use crate::inpaint::{NoiseParams, RingOffsets};
use crate::passes::BandReport;
use crate::profile::AlgorithmProfile;
use crate::region::{self, NormalizedRegion};
use crate::scheduler::{
    self, CancellationToken, ExecutionStrategy, RunContext, DEFAULT_BAND_COUNT,
};
use crate::worker::{WorkerConfig, WorkerHandle};

/// Options controlling a single engine run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Cooperative (caller's thread) or delegated (background thread).
    pub strategy: ExecutionStrategy,
    /// Number of row bands; 0 selects the default.
    pub band_count: u32,
    /// Cooperative cancellation flag, checked at band boundaries.
    pub cancel: Option<CancellationToken>,
    /// Wall-clock budget; exceeding it aborts the run and discards the buffer.
    pub timeout: Option<Duration>,
    /// Opt-in seeded repair noise. Default is strictly deterministic repair.
    pub noise: Option<NoiseParams>,
}

impl RunOptions {
    fn bands(&self) -> u32 {
        if self.band_count == 0 {
            DEFAULT_BAND_COUNT
        } else {
            self.band_count
        }
    }
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessOutcome {
    /// Path of the processed file.
    pub path: PathBuf,
    /// Whether processing succeeded.
    pub success: bool,
    /// Whether the file was skipped (no watermark traces found).
    pub skipped: bool,
    /// Human-readable status message.
    pub message: String,
}

/// The watermark removal engine.
///
/// Create once per profile with [`RemovalEngine::new`] and reuse across
/// images; the ring sampling offsets are precomputed at construction. The
/// engine takes exclusive ownership of each buffer for the duration of a run
/// and returns it only on success.
#[derive(Debug)]
pub struct RemovalEngine {
    profile: AlgorithmProfile,
    rings: RingOffsets,
}

impl RemovalEngine {
    /// Create an engine for the given profile.
    #[must_use]
    pub fn new(profile: AlgorithmProfile) -> Self {
        let rings = RingOffsets::new(profile.sample_radius);
        Self { profile, rings }
    }

    /// The profile this engine was built with.
    #[must_use]
    pub fn profile(&self) -> &AlgorithmProfile {
        &self.profile
    }

    /// Detect and repair watermark pixels, returning the repaired buffer.
    ///
    /// See [`RemovalEngine::run_with_progress`]; this variant reports no
    /// progress.
    ///
    /// # Errors
    ///
    /// Same as [`RemovalEngine::run_with_progress`].
    pub fn run(
        &self,
        buffer: PixelBuffer,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
    ) -> Result<PixelBuffer> {
        self.run_with_progress(buffer, region, opts, |_| {})
    }

    /// Detect and repair watermark pixels, reporting monotone progress in
    /// `[0, 100]` after each processed band.
    ///
    /// Input and region validation happen before any mutation. Under the
    /// background strategy a channel failure falls back to the cooperative
    /// path instead of failing the run.
    ///
    /// # Errors
    ///
    /// [`Error::Input`], [`Error::Region`] or [`Error::Resource`] fail fast;
    /// [`Error::Cancelled`] and [`Error::Timeout`] abort mid-run without
    /// returning any partial buffer; [`Error::Algorithm`] signals an internal
    /// invariant violation.
    pub fn run_with_progress(
        &self,
        buffer: PixelBuffer,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
        mut progress: impl FnMut(u8),
    ) -> Result<PixelBuffer> {
        let buffer = buffer.validate()?;
        // Fail fast on a bad region before any work or thread spawn.
        let mask = region::resolve_mask(region.as_ref(), buffer.width, buffer.height)?;

        let started = Instant::now();
        let deadline = opts.timeout.map(|t| started + t);

        tracing::debug!(
            width = buffer.width,
            height = buffer.height,
            strategy = ?opts.strategy,
            bands = opts.bands(),
            active = mask.active_pixels(),
            "starting removal run"
        );

        let result = match opts.strategy {
            ExecutionStrategy::Cooperative => {
                let ctx = RunContext {
                    profile: &self.profile,
                    mask: &mask,
                    rings: &self.rings,
                    noise: opts.noise,
                    band_count: opts.bands(),
                    cancel: opts.cancel.as_ref(),
                    deadline,
                    started,
                };
                let mut buffer = buffer;
                let reports = scheduler::run_cooperative(&mut buffer, &ctx, &mut progress)?;
                tracing::debug!(
                    changed = reports.iter().map(BandReport::total_changed).sum::<usize>(),
                    "cooperative sweep finished"
                );
                buffer
            }
            ExecutionStrategy::Background => self.run_background(
                buffer,
                region,
                opts,
                &mask,
                started,
                deadline,
                &mut progress,
            )?,
        };

        tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "run complete");
        Ok(result)
    }

    /// Detect and repair on the calling thread, returning per-band
    /// diagnostics alongside the repaired buffer.
    ///
    /// Diagnostics are gathered in-thread only, so `opts.strategy` is
    /// ignored; the repaired buffer is bit-identical to what
    /// [`RemovalEngine::run`] produces for the same inputs.
    ///
    /// # Errors
    ///
    /// Same as [`RemovalEngine::run_with_progress`].
    pub fn run_with_report(
        &self,
        buffer: PixelBuffer,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
    ) -> Result<(PixelBuffer, Vec<BandReport>)> {
        let mut buffer = buffer.validate()?;
        let mask = region::resolve_mask(region.as_ref(), buffer.width, buffer.height)?;

        let started = Instant::now();
        let ctx = RunContext {
            profile: &self.profile,
            mask: &mask,
            rings: &self.rings,
            noise: opts.noise,
            band_count: opts.bands(),
            cancel: opts.cancel.as_ref(),
            deadline: opts.timeout.map(|t| started + t),
            started,
        };
        let reports = scheduler::run_cooperative(&mut buffer, &ctx, &mut |_| {})?;
        Ok((buffer, reports))
    }

    /// Delegated path. Falls back to cooperative execution on any channel
    /// failure, re-running from the pristine input.
    #[allow(clippy::too_many_arguments)]
    fn run_background(
        &self,
        buffer: PixelBuffer,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
        mask: &region::RegionMask,
        started: Instant,
        deadline: Option<Instant>,
        progress: &mut dyn FnMut(u8),
    ) -> Result<PixelBuffer> {
        let config = WorkerConfig {
            profile: self.profile,
            region,
            noise: opts.noise,
            band_count: opts.bands(),
            deadline,
        };

        // Keep the input so a channel failure can retry cooperatively.
        let fallback = buffer.clone();

        let delegated = WorkerHandle::spawn(config)
            .and_then(|worker| worker.process(buffer, deadline, started, &mut *progress));

        match delegated {
            Ok(result) => Ok(result),
            Err(Error::Channel(reason)) => {
                tracing::warn!(%reason, "worker channel failed, falling back to cooperative run");
                let ctx = RunContext {
                    profile: &self.profile,
                    mask,
                    rings: &self.rings,
                    noise: opts.noise,
                    band_count: opts.bands(),
                    cancel: opts.cancel.as_ref(),
                    deadline,
                    started,
                };
                let mut buffer = fallback;
                scheduler::run_cooperative(&mut buffer, &ctx, progress)?;
                Ok(buffer)
            }
            Err(e) => Err(e),
        }
    }

    /// Process a single image file: load, run, save.
    ///
    /// Files whose repaired output is bit-identical to the input are skipped
    /// (nothing was flagged) and no output file is written.
    #[must_use]
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
    ) -> ProcessOutcome {
        let mut outcome = ProcessOutcome {
            path: input.to_path_buf(),
            success: false,
            skipped: false,
            message: String::new(),
        };

        let dyn_img = match image::open(input) {
            Ok(img) => img,
            Err(e) => {
                outcome.message = format!("Failed to load: {e}");
                return outcome;
            }
        };

        let buffer = PixelBuffer::from(dyn_img.to_rgba8());
        let original = buffer.data.clone();

        let repaired = match self.run(buffer, region, opts) {
            Ok(b) => b,
            Err(e) => {
                outcome.message = format!("Processing failed: {e}");
                return outcome;
            }
        };

        if repaired.data == original {
            outcome.success = true;
            outcome.skipped = true;
            outcome.message = "No watermark traces found".to_string();
            return outcome;
        }

        let img = match RgbaImage::try_from(repaired) {
            Ok(img) => img,
            Err(e) => {
                outcome.message = format!("Internal buffer error: {e}");
                return outcome;
            }
        };

        if let Some(parent) = output.parent() {
            if !parent.exists() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    outcome.message = format!("Failed to create output directory: {e}");
                    return outcome;
                }
            }
        }

        match save_image(&img, output) {
            Ok(()) => {
                outcome.success = true;
                outcome.message = "Watermark repaired".to_string();
            }
            Err(e) => {
                outcome.message = format!("Failed to save: {e}");
            }
        }

        outcome
    }

    /// Process all supported images in a directory.
    ///
    /// Uses parallel iteration when the `cli` feature is enabled (via rayon).
    ///
    /// # Panics
    ///
    /// Panics if a directory entry has no filename (not possible for regular
    /// files).
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        region: Option<NormalizedRegion>,
        opts: &RunOptions,
    ) -> Vec<ProcessOutcome> {
        let entries: Vec<_> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .filter(|e| is_supported_image(e.path().as_path()))
                .collect(),
            Err(e) => {
                return vec![ProcessOutcome {
                    path: input_dir.to_path_buf(),
                    success: false,
                    skipped: false,
                    message: format!("Failed to read directory: {e}"),
                }];
            }
        };

        if !output_dir.exists() {
            if let Err(e) = std::fs::create_dir_all(output_dir) {
                return vec![ProcessOutcome {
                    path: output_dir.to_path_buf(),
                    success: false,
                    skipped: false,
                    message: format!("Failed to create output directory: {e}"),
                }];
            }
        }

        #[cfg(feature = "cli")]
        {
            use rayon::prelude::*;
            entries
                .par_iter()
                .map(|entry| {
                    let input_path = entry.path();
                    let filename = input_path.file_name().unwrap();
                    let output_path = output_dir.join(filename);
                    self.process_file(&input_path, &output_path, region, opts)
                })
                .collect()
        }

        #[cfg(not(feature = "cli"))]
        {
            entries
                .iter()
                .map(|entry| {
                    let input_path = entry.path();
                    let filename = input_path.file_name().unwrap();
                    let output_path = output_dir.join(filename);
                    self.process_file(&input_path, &output_path, region, opts)
                })
                .collect()
        }
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp" | "bmp"
        ),
        None => false,
    }
}

/// Save an RGBA image with format-specific handling.
///
/// JPEG has no alpha channel, so the image is flattened to RGB at maximum
/// quality; the other formats keep transparency.
///
/// # Errors
///
/// Returns an error if the format is unsupported or writing fails.
pub fn save_image(img: &RgbaImage, path: &Path) -> Result<()> {
    let format =
        ImageFormat::from_path(path).map_err(|e| Error::UnsupportedFormat(e.to_string()))?;

    match format {
        ImageFormat::Jpeg => {
            let rgb = DynamicImage::ImageRgba8(img.clone()).to_rgb8();
            let file = std::fs::File::create(path)?;
            let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(file, 100);
            encoder.encode_image(&rgb)?;
        }
        ImageFormat::Png | ImageFormat::WebP | ImageFormat::Bmp => {
            img.save(path)?;
        }
        _ => {
            return Err(Error::UnsupportedFormat(format!("{format:?}")));
        }
    }

    Ok(())
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_restored.jpg"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let ext = input.extension().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_restored.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn run_rejects_malformed_buffer_before_mutation() {
        let engine = RemovalEngine::new(AlgorithmProfile::conservative());
        let bad = PixelBuffer {
            width: 4,
            height: 4,
            data: vec![0u8; 3],
        };
        assert!(matches!(
            engine.run(bad, None, &RunOptions::default()),
            Err(Error::Input { .. })
        ));
    }

    #[test]
    fn run_rejects_degenerate_region_before_mutation() {
        let engine = RemovalEngine::new(AlgorithmProfile::region_exact());
        let buf = uniform(4, 4, [100, 120, 140, 255]);
        let region = NormalizedRegion::new(0.0, 0.0, 0.05, 0.05).unwrap();
        assert!(matches!(
            engine.run(buf, Some(region), &RunOptions::default()),
            Err(Error::Region { .. })
        ));
    }

    #[test]
    fn uniform_image_passes_through_unchanged() {
        let engine = RemovalEngine::new(AlgorithmProfile::conservative());
        let buf = uniform(4, 4, [100, 120, 140, 255]);
        let expected = buf.clone();
        let out = engine.run(buf, None, &RunOptions::default()).unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn default_output_path_appends_restored_suffix() {
        let p = default_output_path(Path::new("/tmp/photo.jpg"));
        assert_eq!(p, PathBuf::from("/tmp/photo_restored.jpg"));

        let p = default_output_path(Path::new("image.png"));
        assert_eq!(
            p.file_name().unwrap().to_str().unwrap(),
            "image_restored.png"
        );
    }

    #[test]
    fn is_supported_image_accepts_common_formats() {
        assert!(is_supported_image(Path::new("photo.jpg")));
        assert!(is_supported_image(Path::new("photo.JPEG")));
        assert!(is_supported_image(Path::new("photo.png")));
        assert!(is_supported_image(Path::new("photo.webp")));
        assert!(is_supported_image(Path::new("photo.bmp")));
    }

    #[test]
    fn is_supported_image_rejects_unsupported_formats() {
        assert!(!is_supported_image(Path::new("photo.gif")));
        assert!(!is_supported_image(Path::new("photo.txt")));
        assert!(!is_supported_image(Path::new("photo")));
    }
}
