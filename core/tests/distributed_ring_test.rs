use crossbeam::channel::unbounded;
use std::thread;
use syncbench::distributed::{CollectiveBackend, CommError, RingBackend};

#[test]
fn test_ring_all_reduce_hand_wired() {
    let world_size = 4;

    // Channel i connects node i to node i + 1
    let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();

    let handles: Vec<_> = (0..world_size)
        .map(|rank| {
            let right_tx = txs[rank].clone();
            let left_rx = rxs[(rank + world_size - 1) % world_size].clone();

            thread::spawn(move || {
                let backend = RingBackend::new(rank, world_size, left_rx, right_tx);

                // Rank 0 has 1s, Rank 1 has 2s, etc. The sum is 1 + 2 + 3 + 4 = 10.
                let mut data = vec![(rank + 1) as f32; 8];
                backend.all_reduce_sum(&mut data).unwrap();
                data
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![10.0; 8]);
    }
}

#[test]
fn test_broadcast_copies_root() {
    let handles: Vec<_> = RingBackend::group(3)
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                let rank = backend.rank();
                let mut data = vec![rank as f32 + 0.5; 5];
                backend.broadcast(&mut data, 2).unwrap();
                data
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), vec![2.5; 5]);
    }
}

#[test]
fn test_repeated_collectives_stay_in_lockstep() {
    let handles: Vec<_> = RingBackend::group(3)
        .into_iter()
        .map(|backend| {
            thread::spawn(move || {
                let mut sums = Vec::new();
                for round in 0..5 {
                    let mut data = vec![(backend.rank() + round) as f32; 7];
                    backend.all_reduce_sum(&mut data).unwrap();
                    backend.barrier().unwrap();
                    sums.push(data[0]);
                }
                sums
            })
        })
        .collect();

    // Round r sums (0 + r) + (1 + r) + (2 + r)
    let expected: Vec<f32> = (0..5).map(|r| (3 + 3 * r) as f32).collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn test_failed_peer_unblocks_neighbors() {
    let mut group = RingBackend::group(3);
    let survivors: Vec<_> = vec![group.remove(0), group.remove(1)];
    // Rank 1 never joins
    drop(group);

    let handles: Vec<_> = survivors
        .into_iter()
        .map(|backend| thread::spawn(move || backend.all_reduce_sum(&mut [1.0; 6])))
        .collect();

    for handle in handles {
        let err = handle.join().unwrap().unwrap_err();
        assert!(matches!(err, CommError::Disconnected { .. }));
    }
}
