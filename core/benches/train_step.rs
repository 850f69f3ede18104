use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::sync::Arc;
use syncbench::distributed::{PeerContext, PeerModelStore, RingBackend, Strategy};
use syncbench::models::ModelKind;
use syncbench::trainer::Replica;
use syncbench::RunConfig;

fn single_peer(config: &RunConfig) -> Replica {
    let ctx = PeerContext {
        backend: Arc::new(RingBackend::group(1).remove(0)),
        store: Arc::new(PeerModelStore::new(1, 2)),
        seed: config.seed,
    };
    let mut replica = Replica::from_config(config, &ctx).unwrap();
    replica.init().unwrap();
    replica
}

fn benchmark_train_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("train_step");
    group.sample_size(10);

    // Single peer, so this measures compute plus strategy bookkeeping
    for (model, image_size) in [(ModelKind::ConvNet, 32), (ModelKind::ResNet18, 64)] {
        for strategy in [Strategy::Ideal, Strategy::SyncSgdNccl, Strategy::SmaSgd] {
            let config = RunConfig {
                model,
                batch_size: 8,
                image_size,
                num_classes: 10,
                strategy,
                ..RunConfig::default()
            };
            let mut replica = single_peer(&config);

            group.bench_function(format!("{model}_{image_size}px/{strategy}"), |b| {
                b.iter(|| black_box(replica.step().unwrap()))
            });
        }
    }
    group.finish();
}

criterion_group!(benches, benchmark_train_step);
criterion_main!(benches);
