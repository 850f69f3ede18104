//! Benchmark driver and throughput statistics.
//!
//! The driver runs a step closure through a warmup phase and `num_iters` timed rounds, printing
//! one line per round and a closing summary:
//!
//! ```text
//! Model: ConvNet
//! Batch size: 32
//! Running warmup...
//! Running benchmark...
//! Iter #0: 812.4 img/sec per CPU
//! ...
//! Img/sec per CPU: 815.0 +-6.1
//! ```

use crate::error::Result;
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, Instant};

/// 95% two-sided z-score.
pub const CONFIDENCE_Z: f64 = 1.96;

/// Monotonic time source for timing rounds.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Images per second for `images` processed in `elapsed`.
///
/// Returns infinity for a zero-length interval.
pub fn throughput(images: usize, elapsed: Duration) -> f64 {
    images as f64 / elapsed.as_secs_f64()
}

/// Mean and 95% confidence half-width of per-round throughputs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
    /// `1.96 * std_dev`.
    pub conf: f64,
}

impl Summary {
    /// `None` when there are no samples.
    pub fn from_samples(samples: &[f64]) -> Option<Summary> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();
        Some(Summary {
            mean,
            std_dev,
            conf: CONFIDENCE_Z * std_dev,
        })
    }
}

/// What the driver needs to know about the run.
#[derive(Debug, Clone)]
pub struct BenchSettings {
    pub model: String,
    pub device: String,
    pub batch_size: usize,
    pub num_warmup_batches: usize,
    pub num_batches_per_iter: usize,
    pub num_iters: usize,
}

impl BenchSettings {
    /// Images processed by one peer in one measured round.
    pub fn images_per_iter(&self) -> usize {
        self.batch_size * self.num_batches_per_iter
    }
}

/// Result of one peer's benchmark.
#[derive(Debug, Clone, Serialize)]
pub struct BenchReport {
    pub model: String,
    pub device: String,
    pub batch_size: usize,
    /// Images per second for each measured round, in order.
    pub throughputs: Vec<f64>,
    pub summary: Option<Summary>,
}

/// Runs `step` through warmup and the measured rounds, writing progress to `out`.
///
/// The first error returned by `step` aborts the run.
pub fn run_benchmark<C, W, F>(
    settings: &BenchSettings,
    clock: &C,
    out: &mut W,
    mut step: F,
) -> Result<BenchReport>
where
    C: Clock + ?Sized,
    W: Write + ?Sized,
    F: FnMut() -> Result<()>,
{
    writeln!(out, "Model: {}", settings.model)?;
    writeln!(out, "Batch size: {}", settings.batch_size)?;

    writeln!(out, "Running warmup...")?;
    for _ in 0..settings.num_warmup_batches {
        step()?;
    }

    writeln!(out, "Running benchmark...")?;
    let images = settings.images_per_iter();
    let mut throughputs = Vec::with_capacity(settings.num_iters);
    for iter in 0..settings.num_iters {
        let start = clock.now();
        for _ in 0..settings.num_batches_per_iter {
            step()?;
        }
        let img_sec = throughput(images, clock.now().saturating_sub(start));
        writeln!(out, "Iter #{iter}: {img_sec:.1} img/sec per {}", settings.device)?;
        throughputs.push(img_sec);
    }

    let summary = Summary::from_samples(&throughputs);
    if let Some(s) = &summary {
        writeln!(
            out,
            "Img/sec per {}: {:.1} +-{:.1}",
            settings.device, s.mean, s.conf
        )?;
    }
    out.flush()?;

    Ok(BenchReport {
        model: settings.model.clone(),
        device: settings.device.clone(),
        batch_size: settings.batch_size,
        throughputs,
        summary,
    })
}
