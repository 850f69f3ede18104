//! Runs a benchmark across a group of in-process peers.
//!
//! Every peer is a scoped thread with its own [`Replica`]. Peers share a ring of channels for
//! collectives and a [`PeerModelStore`] for asynchronous averaging. Only rank 0 writes the
//! progress lines; the others run the same driver against a sink so every rank performs the
//! same number of steps.

use crate::bench::{run_benchmark, BenchReport, BenchSettings, SystemClock};
use crate::config::RunConfig;
use crate::device::Device;
use crate::distributed::{
    CollectiveBackend, CommError, DistributedError, PeerContext, PeerModelStore, RingBackend,
};
use crate::error::{BenchError, Result};
use crate::trainer::Replica;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// Versions of each peer's model kept in the store.
pub const MODEL_STORE_WINDOW: usize = 3;

/// Outcome of a whole run, serialized for `--report`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub model: String,
    pub strategy: String,
    pub optimizer: String,
    pub device: String,
    pub workers: usize,
    pub batch_size: usize,
    pub eager: bool,
    /// Sum of every peer's mean throughput.
    pub total_img_per_sec: Option<f64>,
    /// One report per peer, in rank order.
    pub peers: Vec<BenchReport>,
}

impl RunReport {
    pub fn write_json(&self, path: &std::path::Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Validates `config`, runs every peer to completion and aggregates their reports.
///
/// Rank 0's progress lines go to `out`.
pub fn run<W: Write + Send>(config: &RunConfig, out: &mut W) -> Result<RunReport> {
    config.validate()?;
    let device = Device::resolve(!config.no_cuda);
    if config.eager {
        debug!("eager flag set; steps always run eagerly");
    }
    info!(
        model = %config.model,
        strategy = %config.strategy,
        optimizer = %config.optimizer,
        workers = config.workers,
        %device,
        "starting benchmark"
    );

    let settings = BenchSettings {
        model: config.model.to_string(),
        device: device.label().to_string(),
        batch_size: config.batch_size,
        num_warmup_batches: config.num_warmup_batches,
        num_batches_per_iter: config.num_batches_per_iter,
        num_iters: config.num_iters,
    };
    let store = Arc::new(PeerModelStore::new(config.workers, MODEL_STORE_WINDOW));

    let mut out = Some(out);
    let results: Vec<Result<BenchReport>> = thread::scope(|s| {
        let handles: Vec<_> = RingBackend::group(config.workers)
            .into_iter()
            .map(|backend| {
                let rank = backend.rank();
                let sink = if rank == 0 { out.take() } else { None };
                let store = Arc::clone(&store);
                let settings = &settings;
                let handle = s.spawn(move || run_peer(config, settings, backend, store, sink));
                (rank, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(rank, handle)| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(BenchError::WorkerPanicked { rank }))
            })
            .collect()
    });

    let peers = collect_reports(results)?;
    let total_img_per_sec = peers
        .iter()
        .map(|r| r.summary.map(|s| s.mean))
        .sum::<Option<f64>>();
    if let Some(total) = total_img_per_sec {
        info!(
            workers = config.workers,
            "Total img/sec on {} {}(s): {:.1}",
            config.workers,
            device,
            total
        );
    }

    let report = RunReport {
        model: config.model.to_string(),
        strategy: config.strategy.to_string(),
        optimizer: config.optimizer.to_string(),
        device: device.label().to_string(),
        workers: config.workers,
        batch_size: config.batch_size,
        eager: config.eager,
        total_img_per_sec,
        peers,
    };

    if let Some(path) = &config.report {
        report.write_json(path)?;
        info!(path = %path.display(), "wrote report");
    }
    Ok(report)
}

fn run_peer<W: Write>(
    config: &RunConfig,
    settings: &BenchSettings,
    backend: RingBackend,
    store: Arc<PeerModelStore>,
    out: Option<&mut W>,
) -> Result<BenchReport> {
    let ctx = PeerContext {
        backend: Arc::new(backend),
        store,
        seed: config.seed,
    };
    let rank = ctx.backend.rank();

    let mut replica = Replica::from_config(config, &ctx)?;
    replica.init()?;
    ctx.backend.barrier()?;
    debug!(rank, "initialized");

    let clock = SystemClock::new();
    let step = || replica.step().map(|_| ());
    let report = match out {
        Some(out) => run_benchmark(settings, &clock, out, step)?,
        None => run_benchmark(settings, &clock, &mut io::sink(), step)?,
    };

    ctx.backend.barrier()?;
    debug!(rank, "finished");
    Ok(report)
}

/// Returns every report, or the most telling error.
///
/// A failing peer drops its channels and its neighbors then fail with disconnects, so a
/// non-disconnect error is preferred as the cause.
fn collect_reports(results: Vec<Result<BenchReport>>) -> Result<Vec<BenchReport>> {
    let mut reports = Vec::with_capacity(results.len());
    let mut cause: Option<BenchError> = None;
    for result in results {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => {
                warn!(error = %err, "peer failed");
                let replace = match &cause {
                    None => true,
                    Some(prev) => is_disconnect(prev) && !is_disconnect(&err),
                };
                if replace {
                    cause = Some(err);
                }
            }
        }
    }
    match cause {
        Some(err) => Err(err),
        None => Ok(reports),
    }
}

fn is_disconnect(err: &BenchError) -> bool {
    matches!(
        err,
        BenchError::Distributed(DistributedError::Comm(CommError::Disconnected { .. }))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::TensorError;

    #[test]
    fn test_collect_prefers_root_cause() {
        let results = vec![
            Err(CommError::Disconnected { rank: 0 }.into()),
            Err(TensorError::InvalidArgument("bad".to_string()).into()),
            Err(CommError::Disconnected { rank: 2 }.into()),
        ];
        let err = collect_reports(results).unwrap_err();
        assert!(matches!(err, BenchError::Tensor(_)));
    }

    #[test]
    fn test_collect_all_ok() {
        let report = BenchReport {
            model: "ConvNet".to_string(),
            device: "CPU".to_string(),
            batch_size: 1,
            throughputs: vec![1.0],
            summary: None,
        };
        let reports = collect_reports(vec![Ok(report.clone()), Ok(report)]).unwrap();
        assert_eq!(reports.len(), 2);
    }
}
