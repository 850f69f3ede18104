use std::sync::Arc;
use std::thread;
use syncbench::cluster;
use syncbench::device::CUDA_VISIBILITY_VAR;
use syncbench::distributed::{
    DistributedError, PeerContext, PeerModelStore, RingBackend, Strategy,
};
use syncbench::models::ModelKind;
use syncbench::optim::{OptimError, OptimizerKind};
use syncbench::trainer::Replica;
use syncbench::RunConfig;

fn tiny_config(strategy: Strategy, workers: usize) -> RunConfig {
    RunConfig {
        model: ModelKind::ConvNet,
        batch_size: 2,
        image_size: 8,
        num_classes: 3,
        num_warmup_batches: 1,
        num_batches_per_iter: 2,
        num_iters: 2,
        learning_rate: 0.05,
        strategy,
        workers,
        ..RunConfig::default()
    }
}

/// Trains one replica per peer for `steps` steps and returns every replica's parameters.
fn train_group(config: &RunConfig, steps: usize) -> Vec<Vec<f32>> {
    let store = Arc::new(PeerModelStore::new(config.workers, 3));
    thread::scope(|s| {
        let handles: Vec<_> = RingBackend::group(config.workers)
            .into_iter()
            .map(|backend| {
                let store = Arc::clone(&store);
                s.spawn(move || {
                    let ctx = PeerContext {
                        backend: Arc::new(backend),
                        store,
                        seed: config.seed,
                    };
                    let mut replica = Replica::from_config(config, &ctx).unwrap();
                    replica.init().unwrap();
                    for _ in 0..steps {
                        replica.step().unwrap();
                    }
                    ctx.backend.barrier().unwrap();
                    replica.model().flatten_params()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_sync_strategies_keep_replicas_identical() {
    for strategy in [Strategy::SyncSgd, Strategy::SyncSgdNccl] {
        let params = train_group(&tiny_config(strategy, 3), 3);
        assert_eq!(params[0], params[1], "{strategy}");
        assert_eq!(params[1], params[2], "{strategy}");
    }
}

#[test]
fn test_adaptive_replicas_converge_after_switch() {
    // Ten model-averaging steps, then synchronous SGD from an exact average
    let params = train_group(&tiny_config(Strategy::AdaSgd, 2), 12);
    assert_eq!(params[0], params[1]);
}

#[test]
fn test_ideal_replicas_diverge() {
    // No broadcast and different seeds per rank
    let params = train_group(&tiny_config(Strategy::Ideal, 2), 1);
    assert_ne!(params[0], params[1]);
}

#[test]
fn test_async_and_sma_run_in_a_group() {
    for strategy in [Strategy::AsyncSgd, Strategy::SmaSgd] {
        let params = train_group(&tiny_config(strategy, 3), 4);
        assert_eq!(params.len(), 3);
        assert!(params.iter().flatten().all(|v| v.is_finite()), "{strategy}");
    }
}

#[test]
fn test_unknown_names_rejected() {
    let err = "hogwild".parse::<Strategy>().unwrap_err();
    assert!(matches!(err, DistributedError::UnknownStrategy(name) if name == "hogwild"));

    let err = "lamb".parse::<OptimizerKind>().unwrap_err();
    assert_eq!(err, OptimError::UnknownOptimizer("lamb".to_string()));

    assert!("resnet50".parse::<ModelKind>().is_err());
}

#[test]
fn test_cluster_runs_every_strategy() {
    for strategy in Strategy::ALL {
        let config = tiny_config(strategy, 2);
        let mut out = Vec::new();
        let report = cluster::run(&config, &mut out).unwrap();

        assert_eq!(report.peers.len(), 2, "{strategy}");
        assert_eq!(report.strategy, strategy.as_str());
        for peer in &report.peers {
            assert_eq!(peer.throughputs.len(), 2);
            assert!(peer.summary.is_some());
        }
        assert!(report.total_img_per_sec.is_some_and(|t| t > 0.0));

        // Only rank 0 prints
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Model: ConvNet").count(), 1);
        assert_eq!(text.matches("Iter #").count(), 2);
        assert!(text.contains("Img/sec per CPU: "));
    }
}

#[test]
fn test_cluster_leaves_process_environment_alone() {
    let before = std::env::var_os(CUDA_VISIBILITY_VAR);
    let config = RunConfig {
        no_cuda: true,
        ..tiny_config(Strategy::Ideal, 2)
    };
    cluster::run(&config, &mut Vec::new()).unwrap();
    assert_eq!(std::env::var_os(CUDA_VISIBILITY_VAR), before);
}

#[test]
fn test_cluster_rejects_invalid_config() {
    let config = RunConfig {
        num_iters: 0,
        ..tiny_config(Strategy::SyncSgd, 1)
    };
    let mut out = Vec::new();
    assert!(cluster::run(&config, &mut out).is_err());
    assert!(out.is_empty());
}

#[test]
fn test_cluster_writes_json_report() {
    let path = std::env::temp_dir().join(format!("syncbench-report-{}.json", std::process::id()));
    let config = RunConfig {
        report: Some(path.clone()),
        optimizer: OptimizerKind::Adam,
        ..tiny_config(Strategy::SmaSgd, 1)
    };
    cluster::run(&config, &mut Vec::new()).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    std::fs::remove_file(&path).unwrap();

    assert_eq!(json["strategy"], "sma-sgd");
    assert_eq!(json["optimizer"], "adam");
    assert_eq!(json["peers"][0]["throughputs"].as_array().unwrap().len(), 2);
}
