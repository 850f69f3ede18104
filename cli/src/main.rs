use anyhow::{Context, Result};
use clap::Parser;
use std::io;
use std::path::PathBuf;
use syncbench::distributed::Strategy;
use syncbench::models::ModelKind;
use syncbench::optim::OptimizerKind;
use syncbench::{cluster, Device, RunConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Synthetic-data training throughput benchmark for distributed optimizer strategies.
#[derive(Parser, Debug)]
#[command(name = "synthetic-benchmark", version, about)]
struct Args {
    /// Model to benchmark: ConvNet, ResNet18, ResNet34 or ResNet50.
    #[arg(long, default_value = "ResNet50")]
    model: ModelKind,

    /// Input batch size.
    #[arg(long, default_value_t = 32)]
    batch_size: usize,

    /// Number of warm-up batches that don't count towards benchmark.
    #[arg(long, default_value_t = 10)]
    num_warmup_batches: usize,

    /// Number of batches per benchmark iteration.
    #[arg(long, default_value_t = 10)]
    num_batches_per_iter: usize,

    /// Number of benchmark iterations.
    #[arg(long, default_value_t = 10)]
    num_iters: usize,

    /// Enables eager execution.
    #[arg(long)]
    eager: bool,

    /// Disables CUDA training.
    #[arg(long)]
    no_cuda: bool,

    /// sync-sgd, async-sgd, sync-sgd-nccl, ideal, ada-sgd or sma-sgd.
    #[arg(long, default_value = "sync-sgd")]
    strategy: Strategy,

    /// Base optimizer: sgd or adam.
    #[arg(long, default_value = "sgd")]
    optimizer: OptimizerKind,

    /// Number of in-process peers.
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Side of the square synthetic images.
    #[arg(long, default_value_t = 224)]
    image_size: usize,

    /// Number of classifier outputs.
    #[arg(long, default_value_t = 1000)]
    num_classes: usize,

    #[arg(long, default_value_t = 0.01)]
    learning_rate: f32,

    /// Decoupled weight decay, applied by adam only.
    #[arg(long, default_value_t = 0.0)]
    weight_decay: f32,

    /// Seed for synthetic data and weight initialization.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write a JSON summary of the run to this path.
    #[arg(long)]
    report: Option<PathBuf>,
}

impl From<Args> for RunConfig {
    fn from(args: Args) -> Self {
        RunConfig {
            model: args.model,
            batch_size: args.batch_size,
            num_warmup_batches: args.num_warmup_batches,
            num_batches_per_iter: args.num_batches_per_iter,
            num_iters: args.num_iters,
            eager: args.eager,
            no_cuda: args.no_cuda,
            strategy: args.strategy,
            optimizer: args.optimizer,
            workers: args.workers,
            image_size: args.image_size,
            num_classes: args.num_classes,
            learning_rate: args.learning_rate,
            weight_decay: args.weight_decay,
            seed: args.seed,
            report: args.report,
        }
    }
}

fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let config = RunConfig::from(Args::parse());
    // Still single-threaded here, so the process environment can be changed safely
    if let Some((key, value)) = Device::cuda_env(config.no_cuda) {
        std::env::set_var(key, value);
        info!("{key}={value}");
    }
    cluster::run(&config, &mut io::stdout()).with_context(|| {
        format!(
            "benchmark of {} with {} failed",
            config.model, config.strategy
        )
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::from(Args::parse_from(["synthetic-benchmark"]));
        assert_eq!(config, RunConfig::default());
    }

    #[test]
    fn test_flags() {
        let args = Args::parse_from([
            "synthetic-benchmark",
            "--model",
            "ConvNet",
            "--strategy",
            "ada-sgd",
            "--optimizer",
            "adam",
            "--workers",
            "4",
            "--no-cuda",
            "--weight-decay",
            "0.01",
        ]);
        let config = RunConfig::from(args);
        assert_eq!(config.model, ModelKind::ConvNet);
        assert_eq!(config.strategy, Strategy::AdaSgd);
        assert_eq!(config.optimizer, OptimizerKind::Adam);
        assert_eq!(config.workers, 4);
        assert!(config.no_cuda);
        assert_eq!(config.weight_decay, 0.01);
    }

    #[test]
    fn test_unknown_names_fail_to_parse() {
        assert!(Args::try_parse_from(["synthetic-benchmark", "--strategy", "hogwild"]).is_err());
        assert!(Args::try_parse_from(["synthetic-benchmark", "--optimizer", "lamb"]).is_err());
        assert!(Args::try_parse_from(["synthetic-benchmark", "--model", "VGG16"]).is_err());
    }
}
