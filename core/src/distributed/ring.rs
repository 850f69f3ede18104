use super::backend::CollectiveBackend;
use super::CommError;
use crossbeam::channel::{unbounded, Receiver, Sender};

/// In-process collective backend over a ring of `crossbeam` channels.
///
/// Implements **Ring All-Reduce**: the buffer is cut into `world_size` chunks, a
/// scatter-reduce phase leaves each peer owning one fully summed chunk, and an all-gather
/// phase circulates the summed chunks. Each phase takes `world_size - 1` steps in which every
/// peer sends one chunk to the right and receives one from the left.
///
/// Every chunk is summed in the same order whichever peer ends up holding it, so all peers
/// finish with bit-identical buffers.
#[derive(Debug)]
pub struct RingBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Vec<f32>>, // Receive from rank - 1
    right_tx: Sender<Vec<f32>>,  // Send to rank + 1
}

impl RingBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Vec<f32>>,
        right_tx: Sender<Vec<f32>>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Wires a ring of `world_size` peers, returned in rank order.
    ///
    /// Channel `i` carries traffic from rank `i` to rank `i + 1`. Each channel has exactly one
    /// sender, so when a peer is dropped its right neighbor sees a disconnect instead of
    /// blocking forever.
    pub fn group(world_size: usize) -> Vec<RingBackend> {
        let (txs, mut rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();

        // Rank r receives on channel r - 1; rotate so rxs[r] is that receiver
        if world_size > 0 {
            rxs.rotate_right(1);
        }

        txs.into_iter()
            .zip(rxs)
            .enumerate()
            .map(|(rank, (right_tx, left_rx))| {
                RingBackend::new(rank, world_size, left_rx, right_tx)
            })
            .collect()
    }

    fn chunk_range(&self, idx: usize, chunk_size: usize, len: usize) -> std::ops::Range<usize> {
        let start = (idx * chunk_size).min(len);
        let end = (start + chunk_size).min(len);
        start..end
    }

    fn exchange(&self, send: Vec<f32>, expected_len: usize) -> Result<Vec<f32>, CommError> {
        self.right_tx
            .send(send)
            .map_err(|_| CommError::Disconnected { rank: self.rank })?;
        let recv = self
            .left_rx
            .recv()
            .map_err(|_| CommError::Disconnected { rank: self.rank })?;
        if recv.len() != expected_len {
            return Err(CommError::ChunkMismatch {
                expected: expected_len,
                got: recv.len(),
            });
        }
        Ok(recv)
    }

    fn ring_index(&self, offset: isize) -> usize {
        (self.rank as isize + offset).rem_euclid(self.world_size as isize) as usize
    }
}

impl CollectiveBackend for RingBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum(&self, data: &mut [f32]) -> Result<(), CommError> {
        if self.world_size <= 1 {
            return Ok(());
        }

        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size);

        // --- Phase 1: Scatter-Reduce ---
        // Rank r sends chunk (r - step) and accumulates chunk (r - step - 1).
        for step in 0..self.world_size - 1 {
            let step = step as isize;
            let send = self.chunk_range(self.ring_index(-step), chunk_size, total_elements);
            let recv = self.chunk_range(self.ring_index(-step - 1), chunk_size, total_elements);

            let incoming = self.exchange(data[send].to_vec(), recv.len())?;
            for (dst, val) in data[recv].iter_mut().zip(incoming) {
                *dst += val;
            }
        }

        // --- Phase 2: All-Gather ---
        // Rank r now owns the summed chunk (r + 1) and forwards what it last received.
        for step in 0..self.world_size - 1 {
            let step = step as isize;
            let send = self.chunk_range(self.ring_index(1 - step), chunk_size, total_elements);
            let recv = self.chunk_range(self.ring_index(-step), chunk_size, total_elements);

            let incoming = self.exchange(data[send].to_vec(), recv.len())?;
            data[recv].copy_from_slice(&incoming);
        }

        Ok(())
    }
}
