//! Isolated background execution unit.
//!
//! A dedicated thread owns the run and shares nothing with the caller; the
//! two sides communicate exclusively through the typed request/response
//! protocol below. The worker drives the same cooperative runner as the
//! in-thread path, so both strategies produce bit-identical output.

use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::buffer::PixelBuffer;
use crate::error::{Error, Result};
use crate::inpaint::{NoiseParams, RingOffsets};
use crate::profile::AlgorithmProfile;
use crate::region::{self, NormalizedRegion};
use crate::scheduler::{self, RunContext};

/// Request sent to the background execution unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerRequest {
    /// Process one buffer with the worker's configured profile and region.
    Process {
        /// The image to repair.
        buffer: PixelBuffer,
    },
}

/// Response stream from the background execution unit: zero or more
/// `Progress` messages followed by exactly one `Completed` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    /// Monotone progress in `[0, 100]`.
    Progress {
        /// Percent complete.
        progress: u8,
    },
    /// The run finished; the repaired buffer.
    Completed {
        /// Repaired image.
        result: PixelBuffer,
    },
    /// The run failed; no buffer is returned.
    Error {
        /// Human-readable failure description.
        error: String,
    },
}

/// Run parameters fixed when the worker is spawned.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Active profile.
    pub profile: AlgorithmProfile,
    /// Optional explicit user region.
    pub region: Option<NormalizedRegion>,
    /// Opt-in seeded noise.
    pub noise: Option<NoiseParams>,
    /// Number of row bands.
    pub band_count: u32,
    /// Abort processing once this instant passes, checked at band boundaries.
    pub deadline: Option<Instant>,
}

/// Handle to a spawned worker thread. Dropping it closes the request channel
/// and joins the thread.
#[derive(Debug)]
pub struct WorkerHandle {
    request_tx: Option<Sender<WorkerRequest>>,
    response_rx: Receiver<WorkerResponse>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn the background execution unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Channel`] if the thread cannot be spawned; the caller
    /// should fall back to the cooperative strategy.
    pub fn spawn(config: WorkerConfig) -> Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<WorkerRequest>();
        let (response_tx, response_rx) = mpsc::channel::<WorkerResponse>();

        let join = std::thread::Builder::new()
            .name("overlay-restore-worker".to_string())
            .spawn(move || worker_loop(&config, &request_rx, &response_tx))
            .map_err(|e| Error::Channel(format!("failed to spawn worker thread: {e}")))?;

        Ok(Self {
            request_tx: Some(request_tx),
            response_rx,
            join: Some(join),
        })
    }

    /// Process one buffer on the worker, forwarding progress to `progress`.
    ///
    /// Blocks until the worker completes, fails, or `deadline` passes. On
    /// timeout the in-flight result is abandoned and no partial buffer is
    /// ever surfaced; the worker observes the same deadline at its next band
    /// boundary, so the join on handle drop returns promptly.
    ///
    /// # Errors
    ///
    /// [`Error::Channel`] when the worker disappears mid-run,
    /// [`Error::Timeout`] when the deadline passes, or the worker-reported
    /// run error.
    pub fn process(
        &self,
        buffer: PixelBuffer,
        deadline: Option<Instant>,
        started: Instant,
        progress: &mut dyn FnMut(u8),
    ) -> Result<PixelBuffer> {
        let tx = self
            .request_tx
            .as_ref()
            .ok_or_else(|| Error::Channel("worker already shut down".to_string()))?;
        tx.send(WorkerRequest::Process { buffer })
            .map_err(|_| Error::Channel("worker request channel closed".to_string()))?;

        loop {
            let response = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Err(Error::Timeout {
                            elapsed_ms: started.elapsed().as_millis(),
                        });
                    }
                    self.response_rx.recv_timeout(remaining).map_err(|e| match e {
                        mpsc::RecvTimeoutError::Timeout => Error::Timeout {
                            elapsed_ms: started.elapsed().as_millis(),
                        },
                        mpsc::RecvTimeoutError::Disconnected => {
                            Error::Channel("worker response channel closed".to_string())
                        }
                    })?
                }
                None => self.response_rx.recv().map_err(|_| {
                    Error::Channel("worker response channel closed".to_string())
                })?,
            };

            match response {
                WorkerResponse::Progress { progress: percent } => progress(percent),
                WorkerResponse::Completed { result } => return Ok(result),
                WorkerResponse::Error { error } => return Err(Error::Algorithm(error)),
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        drop(self.request_tx.take());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn worker_loop(
    config: &WorkerConfig,
    requests: &Receiver<WorkerRequest>,
    responses: &Sender<WorkerResponse>,
) {
    let rings = RingOffsets::new(config.profile.sample_radius);

    while let Ok(WorkerRequest::Process { buffer }) = requests.recv() {
        let response = match process_one(config, &rings, buffer, responses) {
            Ok(result) => WorkerResponse::Completed { result },
            Err(e) => WorkerResponse::Error {
                error: e.to_string(),
            },
        };
        if responses.send(response).is_err() {
            // Host side hung up; nothing left to report to.
            break;
        }
    }
}

fn process_one(
    config: &WorkerConfig,
    rings: &RingOffsets,
    buffer: PixelBuffer,
    responses: &Sender<WorkerResponse>,
) -> Result<PixelBuffer> {
    let mut buffer = buffer.validate()?;
    let mask = region::resolve_mask(config.region.as_ref(), buffer.width, buffer.height)?;
    let ctx = RunContext {
        profile: &config.profile,
        mask: &mask,
        rings,
        noise: config.noise,
        band_count: config.band_count,
        cancel: None,
        deadline: config.deadline,
        started: Instant::now(),
    };

    let mut forward = |percent: u8| {
        let _ = responses.send(WorkerResponse::Progress { progress: percent });
    };
    scheduler::run_cooperative(&mut buffer, &ctx, &mut forward)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::DEFAULT_BAND_COUNT;

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
    fn request_serializes_to_documented_shape() {
        let buffer = PixelBuffer::new(1, 1, vec![1, 2, 3, 4]).unwrap();
        let json = serde_json::to_value(WorkerRequest::Process { buffer }).unwrap();
        assert_eq!(json["type"], "process");
        assert_eq!(json["buffer"]["width"], 1);
        assert_eq!(json["buffer"]["height"], 1);
        assert_eq!(json["buffer"]["data"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn responses_serialize_to_documented_shapes() {
        let progress = serde_json::to_value(WorkerResponse::Progress { progress: 40 }).unwrap();
        assert_eq!(progress["type"], "progress");
        assert_eq!(progress["progress"], 40);

        let error = serde_json::to_value(WorkerResponse::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["error"], "boom");

        let completed = serde_json::to_value(WorkerResponse::Completed {
            result: PixelBuffer::new(1, 1, vec![0, 0, 0, 0]).unwrap(),
        })
        .unwrap();
        assert_eq!(completed["type"], "completed");
        assert_eq!(completed["result"]["width"], 1);
    }

    #[test]
    fn protocol_round_trips_through_json() {
        let req = WorkerRequest::Process {
            buffer: PixelBuffer::new(2, 1, vec![9, 8, 7, 6, 5, 4, 3, 2]).unwrap(),
        };
        let back: WorkerRequest = serde_json::from_str(&serde_json::to_string(&req).unwrap()).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn worker_matches_cooperative_output() {
        let mut input = uniform(12, 12, [100, 120, 140, 255]);
        for y in 0..2 {
            for x in 0..2 {
                input.put(x, y, [0, 0, 0, 0]);
            }
        }
        let config = WorkerConfig {
            profile: AlgorithmProfile::conservative(),
            region: None,
            noise: None,
            band_count: DEFAULT_BAND_COUNT,
            deadline: None,
        };

        // Cooperative reference run.
        let mut reference = input.clone();
        let mask = region::resolve_mask(None, 12, 12).unwrap();
        let rings = RingOffsets::new(config.profile.sample_radius);
        let ctx = RunContext {
            profile: &config.profile,
            mask: &mask,
            rings: &rings,
            noise: None,
            band_count: DEFAULT_BAND_COUNT,
            cancel: None,
            deadline: None,
            started: Instant::now(),
        };
        scheduler::run_cooperative(&mut reference, &ctx, &mut |_| {}).unwrap();

        // Worker run.
        let worker = WorkerHandle::spawn(config).unwrap();
        let mut progress = Vec::new();
        let result = worker
            .process(input, None, Instant::now(), &mut |p| progress.push(p))
            .unwrap();

        assert_eq!(result, reference);
        assert_eq!(*progress.last().unwrap(), 100);
        for pair in progress.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn worker_observes_its_configured_deadline() {
        let config = WorkerConfig {
            profile: AlgorithmProfile::conservative(),
            region: None,
            noise: None,
            band_count: DEFAULT_BAND_COUNT,
            deadline: Some(Instant::now()),
        };
        let worker = WorkerHandle::spawn(config).unwrap();
        let err = worker
            .process(
                uniform(32, 32, [100, 120, 140, 255]),
                None,
                Instant::now(),
                &mut |_| {},
            )
            .unwrap_err();
        // The worker aborts its own run and reports the timeout back.
        assert!(err.to_string().contains("deadline"), "unexpected error: {err}");
    }

    #[test]
    fn worker_reports_invalid_buffer_as_error() {
        let config = WorkerConfig {
            profile: AlgorithmProfile::conservative(),
            region: None,
            noise: None,
            band_count: DEFAULT_BAND_COUNT,
            deadline: None,
        };
        let worker = WorkerHandle::spawn(config).unwrap();
        // Bypass the validating constructor to simulate a corrupt message.
        let bad = PixelBuffer {
            width: 4,
            height: 4,
            data: vec![0u8; 7],
        };
        let err = worker
            .process(bad, None, Instant::now(), &mut |_| {})
            .unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }
}
