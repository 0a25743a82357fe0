//! Detect and repair overlay watermarks in raster images.
//!
//! Watermark pixels are found by fusing several per-pixel features
//! (transparency, brightness extremity, local contrast, edge strength,
//! monochrome uniformity, isolation) into a confidence score, then repaired
//! from distance- and texture-weighted ring samples of the surrounding
//! content. Repeated passes with a tightening threshold catch residual
//! traces; the image is processed in row bands so a host UI stays responsive.
//!
//! # Quick Start
//!
//! ```no_run
//! use overlay_restore::{AlgorithmProfile, PixelBuffer, RemovalEngine, RunOptions};
//!
//! let engine = RemovalEngine::new(AlgorithmProfile::enhanced());
//! let img = image::open("photo.png").unwrap().to_rgba8();
//! let repaired = engine
//!     .run(PixelBuffer::from(img), None, &RunOptions::default())
//!     .unwrap();
//! let out = image::RgbaImage::try_from(repaired).unwrap();
//! out.save("photo_restored.png").unwrap();
//! ```
//!
//! # Explicit regions
//!
//! A user-marked [`NormalizedRegion`] overrides automatic detection: every
//! pixel inside it is treated as near-certain watermark, and nothing outside
//! it is touched.
//!
//! ```no_run
//! use overlay_restore::{
//!     AlgorithmProfile, NormalizedRegion, PixelBuffer, RemovalEngine, RunOptions,
//! };
//!
//! let engine = RemovalEngine::new(AlgorithmProfile::region_exact());
//! let img = image::open("photo.png").unwrap().to_rgba8();
//! let region = NormalizedRegion::new(0.7, 0.8, 0.25, 0.15).unwrap();
//! let repaired = engine
//!     .run(PixelBuffer::from(img), Some(region), &RunOptions::default())
//!     .unwrap();
//! ```

#![deny(missing_docs)]

mod buffer;
pub mod detection;
mod engine;
pub mod error;
pub mod inpaint;
mod passes;
mod profile;
pub mod region;
pub mod scheduler;
pub mod worker;

pub use buffer::{PixelBuffer, MAX_PIXELS};
pub use engine::{
    default_output_path, is_supported_image, save_image, ProcessOutcome, RemovalEngine,
    RunOptions,
};
pub use error::{Error, Result};
pub use inpaint::NoiseParams;
pub use passes::BandReport;
pub use profile::{AlgorithmProfile, ProfileKind};
pub use region::{MaskState, NormalizedRegion, RegionMask};
pub use scheduler::{CancellationToken, ExecutionStrategy, DEFAULT_BAND_COUNT};
pub use worker::{WorkerConfig, WorkerHandle, WorkerRequest, WorkerResponse};
