use super::CommError;

/// Abstraction for a collective communication backend.
///
/// Every peer must issue the same collectives, in the same order, with buffers of the same
/// length. With a world size of one every collective is the identity.
pub trait CollectiveBackend: Send + Sync {
    /// Returns the rank of the current peer.
    fn rank(&self) -> usize;

    /// Returns the total number of peers.
    fn world_size(&self) -> usize;

    /// Replaces `buf` on every peer with the element-wise sum over all peers.
    fn all_reduce_sum(&self, buf: &mut [f32]) -> Result<(), CommError>;

    /// Copies `root`'s buffer to every peer.
    fn broadcast(&self, buf: &mut [f32], root: usize) -> Result<(), CommError> {
        let world_size = self.world_size();
        if root >= world_size {
            return Err(CommError::InvalidRoot { root, world_size });
        }
        if self.rank() != root {
            buf.fill(0.0);
        }
        self.all_reduce_sum(buf)
    }

    /// Blocks until every peer has reached the barrier.
    fn barrier(&self) -> Result<(), CommError> {
        let mut token = [0.0f32];
        self.all_reduce_sum(&mut token)
    }
}
