// ============================================================================
// SIMD-FRIENDLY VECTOR OPERATIONS
// These tight loops auto-vectorize with opt-level=3 + LTO
// ============================================================================

use rand::Rng;
use rand_distr::StandardNormal;

#[inline]
pub fn vec_add(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x + y).collect()
}

#[inline]
pub fn vec_add_inplace(a: &mut [f32], b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) { *x += y; }
}

/// `a += s * b`
#[inline]
pub fn vec_axpy(a: &mut [f32], s: f32, b: &[f32]) {
    debug_assert_eq!(a.len(), b.len());
    for (x, y) in a.iter_mut().zip(b.iter()) { *x += s * y; }
}

#[inline]
pub fn vec_mul(a: &[f32], b: &[f32]) -> Vec<f32> {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).collect()
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Logistic function, split on sign so neither branch overflows.
#[inline]
pub fn sigmoid(x: f32) -> f32 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)`, stable for large |x|.
#[inline]
pub fn softplus(x: f32) -> f32 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

#[inline]
pub fn vec_sigmoid(a: &[f32]) -> Vec<f32> {
    a.iter().map(|&x| sigmoid(x)).collect()
}

#[inline]
pub fn vec_tanh(a: &[f32]) -> Vec<f32> {
    a.iter().map(|&x| x.tanh()).collect()
}

#[inline]
pub fn vec_max(a: &[f32]) -> f32 {
    a.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
}

/// Index of the largest element; ties resolve to the lowest index, NaN never wins.
pub fn argmax(a: &[f32]) -> usize {
    let mut best = 0;
    let mut best_v = f32::NEG_INFINITY;
    for (i, &v) in a.iter().enumerate() {
        if v > best_v { best = i; best_v = v; }
    }
    best
}

/// `c[m,n] = a[m,k] · b[k,n] + beta * c`, operands read through (row, col)
/// strides so transposed views need no copy.
#[allow(clippy::too_many_arguments)]
pub fn gemm(
    m: usize, k: usize, n: usize,
    a: &[f32], a_strides: (usize, usize),
    b: &[f32], b_strides: (usize, usize),
    beta: f32, c: &mut [f32],
) {
    if m == 0 || n == 0 { return; }
    assert!(k == 0 || a.len() > (m - 1) * a_strides.0 + (k - 1) * a_strides.1);
    assert!(k == 0 || b.len() > (k - 1) * b_strides.0 + (n - 1) * b_strides.1);
    assert!(c.len() >= m * n);
    // SAFETY: the asserts above keep every strided read inside `a` and `b`,
    // and `c` holds a dense row-major [m, n] block.
    unsafe {
        matrixmultiply::sgemm(
            m, k, n,
            1.0,
            a.as_ptr(), a_strides.0 as isize, a_strides.1 as isize,
            b.as_ptr(), b_strides.0 as isize, b_strides.1 as isize,
            beta,
            c.as_mut_ptr(), n as isize, 1,
        );
    }
}

pub fn rand_normal(n: usize, scale: f32, rng: &mut impl Rng) -> Vec<f32> {
    (0..n).map(|_| rng.sample::<f32, _>(StandardNormal) * scale).collect()
}

/// Glorot-scaled Gaussian init for a `[fan_in, fan_out]` matrix.
pub fn glorot(fan_in: usize, fan_out: usize, rng: &mut impl Rng) -> Vec<f32> {
    let scale = (2.0 / (fan_in + fan_out) as f32).sqrt();
    rand_normal(fan_in * fan_out, scale, rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softplus_matches_naive_in_safe_range() {
        for &x in &[-5.0f32, -1.0, 0.0, 0.5, 3.0] {
            let naive = (1.0 + x.exp()).ln();
            assert!((softplus(x) - naive).abs() < 1e-5, "x={x}");
        }
        assert!(softplus(200.0).is_finite());
        assert!(softplus(-200.0) >= 0.0);
    }

    #[test]
    fn sigmoid_stays_open_interval_for_moderate_inputs() {
        for &x in &[-15.0f32, -1.0, 0.0, 1.0, 15.0] {
            let s = sigmoid(x);
            assert!(s > 0.0 && s < 1.0);
        }
    }

    #[test]
    fn argmax_prefers_first_of_ties() {
        assert_eq!(argmax(&[1.0, 3.0, 3.0, -1.0]), 1);
        assert_eq!(argmax(&[f32::NAN, 0.5]), 1);
    }

    #[test]
    fn gemm_transposed_view() {
        // a = [[1,2],[3,4]], b^T where b = [[5,6],[7,8]] -> a·b^T = [[17,23],[39,53]]
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [5.0, 6.0, 7.0, 8.0];
        let mut c = [0.0; 4];
        gemm(2, 2, 2, &a, (2, 1), &b, (1, 2), 0.0, &mut c);
        assert_eq!(c, [17.0, 23.0, 39.0, 53.0]);
    }
}
