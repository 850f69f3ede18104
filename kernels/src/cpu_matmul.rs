use crate::{check_len, KernelElem, KernelError, Result};
use rayon::prelude::*;

/// Batched matrix multiplication `[..., M, K] x [..., K, N] -> [..., M, N]`.
///
/// Both operands must share the same leading (batch) dimensions. The right-hand side
/// is transposed once up front so the inner loop walks both operands sequentially.
pub fn cpu_matmul<T: KernelElem>(
    lhs_data: &[T],
    rhs_data: &[T],
    lhs_shape: &[usize],
    rhs_shape: &[usize],
) -> Result<Vec<T>> {
    let rank = lhs_shape.len();
    if rank < 2 || rhs_shape.len() != rank {
        return Err(KernelError::ShapeMismatch {
            expected: lhs_shape.to_vec(),
            got: rhs_shape.to_vec(),
        });
    }
    if lhs_shape[..rank - 2] != rhs_shape[..rank - 2] {
        return Err(KernelError::ShapeMismatch {
            expected: lhs_shape[..rank - 2].to_vec(),
            got: rhs_shape[..rank - 2].to_vec(),
        });
    }
    check_len(lhs_data.len(), lhs_shape)?;
    check_len(rhs_data.len(), rhs_shape)?;

    let m = lhs_shape[rank - 2];
    let k = lhs_shape[rank - 1];
    let n = rhs_shape[rank - 1];

    if k != rhs_shape[rank - 2] {
        return Err(KernelError::ShapeMismatch {
            expected: vec![k],
            got: vec![rhs_shape[rank - 2]],
        });
    }

    let batch: usize = lhs_shape[..rank - 2].iter().product();
    let mut out_data = vec![T::zero(); batch * m * n];
    if out_data.is_empty() {
        return Ok(out_data);
    }

    // rhs is [..., K, N], rhs_t is [..., N, K]
    let rhs_t_data = crate::cpu_transpose(rhs_data, rhs_shape)?;

    // One task per output row across all batches
    out_data
        .par_chunks_mut(n)
        .enumerate()
        .for_each(|(global_row_idx, out_row)| {
            let batch_idx = global_row_idx / m;
            let row_in_matrix = global_row_idx % m;

            let a_row_start = batch_idx * m * k + row_in_matrix * k;
            let a_slice = &lhs_data[a_row_start..a_row_start + k];
            let b_t_batch_offset = batch_idx * n * k;

            for (col_in_matrix, out_elem) in out_row.iter_mut().enumerate() {
                let b_t_row_start = b_t_batch_offset + col_in_matrix * k;
                let b_t_slice = &rhs_t_data[b_t_row_start..b_t_row_start + k];

                let mut sum = T::zero();
                for (&val_a, &val_b) in a_slice.iter().zip(b_t_slice.iter()) {
                    sum += val_a * val_b;
                }
                *out_elem = sum;
            }
        });

    Ok(out_data)
}
