//! Scalar kernels shared by the dense numeric loops.

/// Dot product of two equally long slices.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// `dst += src * factor`, element-wise.
#[inline]
pub fn muladd(src: &[f32], factor: f32, dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s * factor;
    }
}

/// `dst += src`, element-wise.
#[inline]
pub fn accumulate(src: &[f32], dst: &mut [f32]) {
    debug_assert_eq!(src.len(), dst.len());
    for (d, s) in dst.iter_mut().zip(src) {
        *d += *s;
    }
}

/// Broadcast-add a scalar over a slice.
#[inline]
pub fn add_scalar(value: f32, dst: &mut [f32]) {
    for d in dst.iter_mut() {
        *d += value;
    }
}

#[inline]
pub fn fill(dst: &mut [f32], value: f32) {
    for d in dst.iter_mut() {
        *d = value;
    }
}

/// Index of the largest element. The first maximum wins on ties.
pub fn max_index(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate() {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_and_muladd() {
        assert_eq!(dot(&[1., 2., 3.], &[4., 5., 6.]), 32.);
        let mut dst = vec![1., 1., 1.];
        muladd(&[1., 2., 3.], 2., &mut dst);
        assert_eq!(dst, vec![3., 5., 7.]);
    }

    #[test]
    fn max_index_prefers_first() {
        assert_eq!(max_index(&[0.1, 0.9, 0.9, 0.3]), 1);
        assert_eq!(max_index(&[-1., -2.]), 0);
    }
}
