//! Sample-axis fan-out for the batched kernels.
//!
//! Every sample's row is independent during one layer's forward or backward
//! pass, so the batch dimension is the only parallelism axis. Layer order
//! stays strictly sequential. Small batches run inline so tiny layers don't
//! oversubscribe the worker pool.

use rayon::prelude::*;

use crate::tensor::{Tensor, Vector};

/// Batches below this row count always run sequentially.
pub const MIN_PAR_ROWS: usize = 8;

/// Run `f(sample, row)` over every row of `rows`.
pub fn for_each_row<F>(parallelize: bool, rows: &mut Tensor, f: F)
where
    F: Fn(usize, &mut Vector) + Send + Sync,
{
    if parallelize && rows.len() >= MIN_PAR_ROWS {
        rows.par_iter_mut()
            .enumerate()
            .for_each(|(sample, row)| f(sample, row));
    } else {
        for (sample, row) in rows.iter_mut().enumerate() {
            f(sample, row);
        }
    }
}

/// Run `f(sample, a_row, b_row, c_row)` over three row-aligned tensors.
/// Used by backward kernels that write the input delta, the weight gradient
/// and the bias gradient of one sample at a time.
pub fn for_each_row3<F>(parallelize: bool, a: &mut Tensor, b: &mut Tensor, c: &mut Tensor, f: F)
where
    F: Fn(usize, &mut Vector, &mut Vector, &mut Vector) + Send + Sync,
{
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), c.len());
    if parallelize && a.len() >= MIN_PAR_ROWS {
        a.par_iter_mut()
            .zip(b.par_iter_mut())
            .zip(c.par_iter_mut())
            .enumerate()
            .for_each(|(sample, ((ra, rb), rc))| f(sample, ra, rb, rc));
    } else {
        for (sample, ((ra, rb), rc)) in a.iter_mut().zip(b.iter_mut()).zip(c.iter_mut()).enumerate()
        {
            f(sample, ra, rb, rc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_and_parallel_agree() {
        let make = || (0..32).map(|i| vec![i as f32; 4]).collect::<Tensor>();

        let mut seq = make();
        for_each_row(false, &mut seq, |sample, row| {
            for v in row.iter_mut() {
                *v += sample as f32;
            }
        });

        let mut par = make();
        for_each_row(true, &mut par, |sample, row| {
            for v in row.iter_mut() {
                *v += sample as f32;
            }
        });

        assert_eq!(seq, par);
    }
}
