//! Nesterov-Todd scaling for second-order cone blocks.
//!
//! For interior x (primal) and z (dual) the NT scaling is the symmetric
//! matrix Q_p with
//!
//!   Q_p x = Q_p⁻¹ z,  i.e.  Q_p² x = z
//!
//! Two constructions are available:
//! - quadratic representation: w = Q_{z^½} (Q_{z^½} x)^{-½}, p = w^½, Q_p the
//!   quadratic representation of p
//! - closed form: with x̄ = x/√det x, z̄ = z/√det z, γ = √((1 + x̄ᵀz̄)/2),
//!   w̄ = (z̄ + R x̄)/(2γ), η = (det z / det x)^¼,
//!   Q_p = η [[w̄0, w̄1ᵀ], [w̄1, I + w̄1 w̄1ᵀ/(1 + w̄0)]]

use nalgebra::DMatrix;
use thiserror::Error;

use crate::cones::{jordan, SocCone};

/// NT scaling errors
#[derive(Error, Debug)]
pub enum NtScalingError {
    /// Point not in interior
    #[error("Block {block} is not in the cone interior")]
    NotInterior { block: usize },

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// How the scaling matrices are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NtMethod {
    /// Through the NT vector p and its quadratic representation.
    QuadraticRepresentation,
    /// Closed-form matrix from the normalized points.
    ClosedForm,
}

/// Blockwise NT scaling of a family of second-order cone blocks.
#[derive(Debug, Clone)]
pub struct NtScaling {
    dim: usize,
    qp: Vec<DMatrix<f64>>,
    qp_inv: Vec<DMatrix<f64>>,
}

impl NtScaling {
    /// Build the scaling of `x` (primal) and `z` (dual), both concatenations
    /// of blocks of dimension `dim`.
    pub fn compute(x: &[f64], z: &[f64], dim: usize, method: NtMethod) -> Result<Self, NtScalingError> {
        if x.len() != z.len() {
            return Err(NtScalingError::DimensionMismatch {
                expected: x.len(),
                actual: z.len(),
            });
        }
        if dim < 2 || x.len() % dim != 0 {
            return Err(NtScalingError::DimensionMismatch {
                expected: dim,
                actual: x.len(),
            });
        }

        let cone = SocCone::new(dim);
        let blocks = x.len() / dim;
        let mut qp = Vec::with_capacity(blocks);
        let mut qp_inv = Vec::with_capacity(blocks);

        for (block, (xb, zb)) in x.chunks_exact(dim).zip(z.chunks_exact(dim)).enumerate() {
            if !cone.is_interior(xb) || !cone.is_interior(zb) {
                return Err(NtScalingError::NotInterior { block });
            }
            let (q, q_inv) = match method {
                NtMethod::QuadraticRepresentation => quad_rep_scaling(xb, zb),
                NtMethod::ClosedForm => closed_form_scaling(xb, zb),
            };
            qp.push(q);
            qp_inv.push(q_inv);
        }

        Ok(Self { dim, qp, qp_inv })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn blocks(&self) -> usize {
        self.qp.len()
    }

    /// Q_p of block `i`.
    pub fn block(&self, i: usize) -> &DMatrix<f64> {
        &self.qp[i]
    }

    /// Q_p² of block `i`.
    pub fn squared_block(&self, i: usize) -> DMatrix<f64> {
        &self.qp[i] * &self.qp[i]
    }

    /// out = Q_p v
    pub fn apply(&self, v: &[f64], out: &mut [f64]) {
        apply_blocks(&self.qp, self.dim, v, out);
    }

    /// out = Q_p⁻¹ v
    pub fn apply_inv(&self, v: &[f64], out: &mut [f64]) {
        apply_blocks(&self.qp_inv, self.dim, v, out);
    }
}

fn apply_blocks(mats: &[DMatrix<f64>], dim: usize, v: &[f64], out: &mut [f64]) {
    assert_eq!(v.len(), mats.len() * dim);
    assert_eq!(out.len(), v.len());

    for ((m, vb), ob) in mats.iter().zip(v.chunks_exact(dim)).zip(out.chunks_exact_mut(dim)) {
        for i in 0..dim {
            ob[i] = (0..dim).map(|j| m[(i, j)] * vb[j]).sum();
        }
    }
}

/// NT vector p of one block, with Q_p² x = z.
pub fn nt_vector(x: &[f64], z: &[f64]) -> Vec<f64> {
    let dim = x.len();
    let mut z_half = vec![0.0; dim];
    let mut tmp = vec![0.0; dim];
    let mut tmp_sqrt = vec![0.0; dim];
    let mut tmp_inv = vec![0.0; dim];
    let mut w = vec![0.0; dim];
    let mut p = vec![0.0; dim];

    jordan::sqrt(z, dim, &mut z_half);
    jordan::quad_rep_apply(&z_half, x, dim, &mut tmp);
    jordan::sqrt(&tmp, dim, &mut tmp_sqrt);
    jordan::inverse(&tmp_sqrt, dim, &mut tmp_inv);
    jordan::quad_rep_apply(&z_half, &tmp_inv, dim, &mut w);
    jordan::sqrt(&w, dim, &mut p);
    p
}

fn quad_rep_scaling(x: &[f64], z: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
    let p = nt_vector(x, z);
    let mut p_inv = vec![0.0; p.len()];
    jordan::inverse(&p, p.len(), &mut p_inv);
    (jordan::quad_rep_matrix(&p), jordan::quad_rep_matrix(&p_inv))
}

fn closed_form_scaling(x: &[f64], z: &[f64]) -> (DMatrix<f64>, DMatrix<f64>) {
    let dim = x.len();
    let det_x = SocCone::discriminant(x);
    let det_z = SocCone::discriminant(z);
    let sx = det_x.sqrt();
    let sz = det_z.sqrt();

    let x_dot_z: f64 = x.iter().zip(z).map(|(a, b)| a * b).sum();
    let gamma = ((1.0 + x_dot_z / (sx * sz)) / 2.0).sqrt();

    let w0 = (z[0] / sz + x[0] / sx) / (2.0 * gamma);
    let w1: Vec<f64> = (1..dim)
        .map(|i| (z[i] / sz - x[i] / sx) / (2.0 * gamma))
        .collect();
    let eta = (det_z / det_x).sqrt().sqrt();

    let mut w = DMatrix::zeros(dim, dim);
    let mut w_inv = DMatrix::zeros(dim, dim);
    w[(0, 0)] = eta * w0;
    w_inv[(0, 0)] = w0 / eta;
    for i in 1..dim {
        w[(0, i)] = eta * w1[i - 1];
        w[(i, 0)] = eta * w1[i - 1];
        w_inv[(0, i)] = -w1[i - 1] / eta;
        w_inv[(i, 0)] = -w1[i - 1] / eta;
        for j in 1..dim {
            let delta = if i == j { 1.0 } else { 0.0 };
            let entry = delta + w1[i - 1] * w1[j - 1] / (1.0 + w0);
            w[(i, j)] = eta * entry;
            w_inv[(i, j)] = entry / eta;
        }
    }
    (w, w_inv)
}
