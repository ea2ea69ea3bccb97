//! Jordan algebra of the second-order cone, applied blockwise.
//!
//! Every function takes a concatenation of blocks of dimension `dim`
//! (t, x) ∈ ℝ × ℝ^{dim-1} and works on each block independently.
//!
//! - Product: (t,x) ∘ (u,v) = (tu + x^T v, tv + ux)
//! - Identity: e = (1, 0, ..., 0)
//! - Spectral values: λ₁ = t + ||x||, λ₂ = t - ||x||
//! - Quadratic representation: Q_x = 2 x x^T - det(x) R, R = diag(1, -1, ..., -1)

use nalgebra::DMatrix;

use super::soc::SocCone;

fn check_blocks(len: usize, dim: usize) {
    assert!(dim >= 2, "Jordan blocks must have dimension >= 2");
    assert_eq!(len % dim, 0, "length {} is not a multiple of {}", len, dim);
}

/// Jordan product of a single block.
#[inline]
fn product_block(a: &[f64], b: &[f64], out: &mut [f64]) {
    let t = a[0];
    let u = b[0];

    out[0] = t * u + a[1..].iter().zip(&b[1..]).map(|(&ai, &bi)| ai * bi).sum::<f64>();
    for i in 1..a.len() {
        out[i] = t * b[i] + u * a[i];
    }
}

/// Blockwise Jordan product `out = x ∘ y`.
pub fn product(x: &[f64], y: &[f64], dim: usize, out: &mut [f64]) {
    check_blocks(x.len(), dim);
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), out.len());

    for ((xb, yb), ob) in x
        .chunks_exact(dim)
        .zip(y.chunks_exact(dim))
        .zip(out.chunks_exact_mut(dim))
    {
        product_block(xb, yb, ob);
    }
}

/// Identity element e = (1, 0, ..., 0) repeated `blocks` times.
pub fn identity(blocks: usize, dim: usize) -> Vec<f64> {
    let mut e = vec![0.0; blocks * dim];
    for block in e.chunks_exact_mut(dim) {
        block[0] = 1.0;
    }
    e
}

/// Per-block determinants t² - ||x||².
pub fn determinants(x: &[f64], dim: usize) -> Vec<f64> {
    check_blocks(x.len(), dim);
    x.chunks_exact(dim).map(SocCone::discriminant).collect()
}

/// Blockwise Jordan inverse: (t, -x) / det.
///
/// Blocks with a zero determinant produce non-finite entries.
pub fn inverse(x: &[f64], dim: usize, out: &mut [f64]) {
    check_blocks(x.len(), dim);
    assert_eq!(x.len(), out.len());

    for (xb, ob) in x.chunks_exact(dim).zip(out.chunks_exact_mut(dim)) {
        let det = SocCone::discriminant(xb);
        ob[0] = xb[0] / det;
        for i in 1..dim {
            ob[i] = -xb[i] / det;
        }
    }
}

/// Blockwise Jordan square root (interior points only).
pub fn sqrt(x: &[f64], dim: usize, out: &mut [f64]) {
    check_blocks(x.len(), dim);
    assert_eq!(x.len(), out.len());

    for (xb, ob) in x.chunks_exact(dim).zip(out.chunks_exact_mut(dim)) {
        let x_norm = SocCone::x_norm(xb);
        let sqrt_lambda1 = (xb[0] + x_norm).sqrt();
        let sqrt_lambda2 = (xb[0] - x_norm).max(0.0).sqrt();

        ob[0] = 0.5 * (sqrt_lambda1 + sqrt_lambda2);
        if x_norm > 1e-14 {
            let scale = (sqrt_lambda1 - sqrt_lambda2) / (2.0 * x_norm);
            for i in 1..dim {
                ob[i] = scale * xb[i];
            }
        } else {
            ob[1..].fill(0.0);
        }
    }
}

/// Arrow matrix of one block: Arw(x) y = x ∘ y.
pub fn arrow_matrix(x: &[f64]) -> DMatrix<f64> {
    let dim = x.len();
    let mut arw = DMatrix::from_diagonal_element(dim, dim, x[0]);
    for i in 1..dim {
        arw[(0, i)] = x[i];
        arw[(i, 0)] = x[i];
    }
    arw
}

/// Quadratic representation of one block: Q_x = 2 x x^T - det(x) R.
pub fn quad_rep_matrix(x: &[f64]) -> DMatrix<f64> {
    let dim = x.len();
    let det = SocCone::discriminant(x);
    let mut q = DMatrix::from_fn(dim, dim, |i, j| 2.0 * x[i] * x[j]);
    q[(0, 0)] -= det;
    for i in 1..dim {
        q[(i, i)] += det;
    }
    q
}

/// Blockwise quadratic representation `out = Q_x y`.
pub fn quad_rep_apply(x: &[f64], y: &[f64], dim: usize, out: &mut [f64]) {
    check_blocks(x.len(), dim);
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), out.len());

    for ((xb, yb), ob) in x
        .chunks_exact(dim)
        .zip(y.chunks_exact(dim))
        .zip(out.chunks_exact_mut(dim))
    {
        let det = SocCone::discriminant(xb);
        let x_dot_y: f64 = xb.iter().zip(yb).map(|(a, b)| a * b).sum();
        ob[0] = 2.0 * x_dot_y * xb[0] - det * yb[0];
        for i in 1..dim {
            ob[i] = 2.0 * x_dot_y * xb[i] + det * yb[i];
        }
    }
}

/// Euclidean norm of the blockwise product, ||x ∘ y||.
pub fn product_norm(x: &[f64], y: &[f64], dim: usize) -> f64 {
    let mut prod = vec![0.0; x.len()];
    product(x, y, dim, &mut prod);
    prod.iter().map(|v| v * v).sum::<f64>().sqrt()
}
