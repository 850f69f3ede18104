use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Swaps the last two dimensions of a row-major buffer.
///
/// Leading dimensions are treated as a batch. Shapes of rank below 2 are rejected.
pub fn cpu_transpose<T: KernelElem>(data: &[T], shape: &[usize]) -> Result<Vec<T>> {
    let rank = shape.len();
    if rank < 2 {
        return Err(KernelError::InvalidArgument(format!(
            "transpose needs rank >= 2, got shape {shape:?}"
        )));
    }
    check_len(data.len(), shape)?;

    let m = shape[rank - 2];
    let n = shape[rank - 1];
    let mut out_data = vec![T::zero(); data.len()];
    if m == 0 || n == 0 {
        return Ok(out_data);
    }

    // Output is viewed as `batch * N` rows of length `M`
    out_data
        .par_chunks_mut(m)
        .enumerate()
        .for_each(|(i, out_row)| {
            let batch_idx = i / n;
            let col_idx = i % n;
            let input_batch_offset = batch_idx * m * n;

            for (r, out_elem) in out_row.iter_mut().enumerate() {
                *out_elem = data[input_batch_offset + r * n + col_idx];
            }
        });

    Ok(out_data)
}
