//! Newton systems of the rolling friction IPM.
//!
//! The unknowns are laid out as
//!
//! ```text
//!   (dv [m], dr [nd], du1 [3n], du2 [3n])
//! ```
//!
//! and the first two block rows are shared by both strategies:
//!
//! ```text
//!   |  M   -H̃ᵀ   0 | m
//!   | -H̃    0    J | nd
//! ```
//!
//! where J maps the two velocity sub-blocks back to the contact velocity,
//! du[5i] = du1[3i] + du2[3i]. The complementarity rows differ:
//!
//! - [`NtScaledSystem`]: `[0, Jᵀ, Q²]`, symmetric, factorized with LDLᵀ
//! - [`UnscaledSystem`]: `[0, B(u), Arw(r)]`, non-symmetric, factorized with LU

use nalgebra::DMatrix;
use thiserror::Error;

use super::scaled::ScaledProblem;
use super::workspace::IpmWorkspace;
use crate::cones::{jordan, CONTACT_DIM, SUB_DIM};
use crate::linalg::backend::{BackendError, LdltSolver, LinearSolver, LuSolver};
use crate::linalg::sparse::{SparseCsc, SparseTriMat};
use crate::scaling::{NtMethod, NtScaling, NtScalingError};

#[derive(Debug, Error)]
pub enum NewtonSystemError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Scaling(#[from] NtScalingError),
    #[error("Newton system solved before it was assembled")]
    NotAssembled,
}

/// Offsets of the unknown blocks in the canonical layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemLayout {
    pub m: usize,
    pub nd: usize,
    pub n3: usize,
}

impl SystemLayout {
    pub fn new(m: usize, n: usize) -> Self {
        Self {
            m,
            nd: n * CONTACT_DIM,
            n3: n * SUB_DIM,
        }
    }

    pub fn dim(&self) -> usize {
        self.m + self.nd + 2 * self.n3
    }

    #[inline]
    pub fn dr(&self) -> usize {
        self.m
    }

    #[inline]
    pub fn du1(&self) -> usize {
        self.m + self.nd
    }

    #[inline]
    pub fn du2(&self) -> usize {
        self.m + self.nd + self.n3
    }
}

/// One strategy for building and solving the Newton system.
pub trait NewtonSystem {
    /// Assemble and factorize the Jacobian at the current iterate.
    fn prepare(&mut self, data: &ScaledProblem, ws: &IpmWorkspace) -> Result<(), NewtonSystemError>;

    /// Complementarity rows of the predictor right-hand side, before negation.
    fn predictor_complementarity(&self, ws: &IpmWorkspace, out1: &mut [f64], out2: &mut [f64]);

    /// Complementarity rows of the corrector right-hand side, before negation.
    ///
    /// Expects the predictor direction in `ws`.
    fn corrector_complementarity(
        &self,
        ws: &IpmWorkspace,
        barr_param: f64,
        sigma: f64,
        out1: &mut [f64],
        out2: &mut [f64],
    );

    /// Solve in place. `rhs` and the solution use the canonical layout.
    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), NewtonSystemError>;
}

/// Predictor right-hand side -[dres, pres, c1, c2].
pub fn predictor_rhs(system: &dyn NewtonSystem, layout: SystemLayout, ws: &mut IpmWorkspace) {
    let mut rhs = std::mem::take(&mut ws.rhs);
    fill_residual_rows(layout, ws, &mut rhs);
    let (c1, c2) = rhs[layout.du1()..].split_at_mut(layout.n3);
    system.predictor_complementarity(ws, c1, c2);
    negate(&mut rhs);
    ws.rhs = rhs;
}

/// Corrector right-hand side, same residual rows as the predictor.
pub fn corrector_rhs(
    system: &dyn NewtonSystem,
    layout: SystemLayout,
    ws: &mut IpmWorkspace,
    barr_param: f64,
    sigma: f64,
) {
    let mut rhs = std::mem::take(&mut ws.rhs);
    fill_residual_rows(layout, ws, &mut rhs);
    let (c1, c2) = rhs[layout.du1()..].split_at_mut(layout.n3);
    system.corrector_complementarity(ws, barr_param, sigma, c1, c2);
    negate(&mut rhs);
    ws.rhs = rhs;
}

fn fill_residual_rows(layout: SystemLayout, ws: &IpmWorkspace, rhs: &mut [f64]) {
    rhs[..layout.m].copy_from_slice(&ws.dual_residual);
    rhs[layout.dr()..layout.du1()].copy_from_slice(&ws.primal_residual);
}

fn negate(x: &mut [f64]) {
    x.iter_mut().for_each(|v| *v = -*v);
}

/// Push the shared rows [M, -H̃ᵀ, 0] and [-H̃, 0, J], with every index
/// mapped through `place`.
fn push_common_blocks<P>(tri: &mut SparseTriMat, data: &ScaledProblem, layout: SystemLayout, place: P)
where
    P: Fn(usize) -> usize,
{
    for (&val, (row, col)) in data.M.iter() {
        tri.add_triplet(place(row), place(col), val);
    }
    for (&val, (row, col)) in data.H.iter() {
        tri.add_triplet(place(col), place(layout.dr() + row), -val);
        tri.add_triplet(place(layout.dr() + row), place(col), -val);
    }
}

/// Entries (contact row, sub-block column) of J, both relative to their blocks.
fn j_entries(n: usize) -> impl Iterator<Item = (usize, usize)> {
    let n3 = n * SUB_DIM;
    (0..n).flat_map(move |i| {
        let (b, k) = (CONTACT_DIM * i, SUB_DIM * i);
        [
            (b, k),
            (b + 1, k + 1),
            (b + 2, k + 2),
            (b, n3 + k),
            (b + 3, n3 + k + 1),
            (b + 4, n3 + k + 2),
        ]
    })
}

fn push_dense_block(tri: &mut SparseTriMat, mat: &DMatrix<f64>, row_off: usize, col_off: usize) {
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            let v = mat[(i, j)];
            if v != 0.0 {
                tri.add_triplet(row_off + i, col_off + j, v);
            }
        }
    }
}

/// Symmetric system with Nesterov-Todd scaled complementarity rows.
///
/// The reaction block has a zero diagonal, so the unknowns are reordered as
/// (dv, du1, du2, dr) before the LDLᵀ factorization: the definite blocks M
/// and Q² are eliminated first and every pivot is nonzero.
pub struct NtScaledSystem {
    layout: SystemLayout,
    method: NtMethod,
    solver: LdltSolver,
    scalings: Option<[NtScaling; 2]>,
    permuted: Vec<f64>,
}

impl NtScaledSystem {
    pub fn new(layout: SystemLayout, method: NtMethod) -> Self {
        Self {
            layout,
            method,
            solver: LdltSolver::new(),
            scalings: None,
            permuted: vec![0.0; layout.dim()],
        }
    }

    /// Position of canonical unknown `idx` in the factorized ordering.
    #[inline]
    fn place(layout: SystemLayout, idx: usize) -> usize {
        let SystemLayout { m, nd, .. } = layout;
        if idx < m {
            idx
        } else if idx < m + nd {
            idx + 2 * layout.n3
        } else {
            idx - nd
        }
    }

    /// Assembled matrix in canonical ordering, for inspection.
    pub fn assemble_canonical(&self, data: &ScaledProblem) -> Option<SparseCsc> {
        self.scalings
            .as_ref()
            .map(|s| self.assemble(data, s, |idx| idx))
    }

    fn assemble<P>(&self, data: &ScaledProblem, scalings: &[NtScaling; 2], place: P) -> SparseCsc
    where
        P: Fn(usize) -> usize,
    {
        let layout = self.layout;
        let dim = layout.dim();
        let mut tri = SparseTriMat::new((dim, dim));

        push_common_blocks(&mut tri, data, layout, &place);

        for (row, col) in j_entries(data.num_contacts()) {
            let (r, c) = (place(layout.dr() + row), place(layout.du1() + col));
            tri.add_triplet(r, c, 1.0);
            tri.add_triplet(c, r, 1.0);
        }

        for (scaling, off) in scalings.iter().zip([layout.du1(), layout.du2()]) {
            for i in 0..scaling.blocks() {
                let q2 = scaling.squared_block(i);
                for c in 0..SUB_DIM {
                    for r in 0..SUB_DIM {
                        let v = q2[(r, c)];
                        if v != 0.0 {
                            let base = off + SUB_DIM * i;
                            tri.add_triplet(place(base + r), place(base + c), v);
                        }
                    }
                }
            }
        }

        tri.to_csc()
    }
}

impl NewtonSystem for NtScaledSystem {
    fn prepare(&mut self, data: &ScaledProblem, ws: &IpmWorkspace) -> Result<(), NewtonSystemError> {
        self.scalings = None;
        let s1 = NtScaling::compute(&ws.velocity_1, &ws.reaction_1, SUB_DIM, self.method)?;
        let s2 = NtScaling::compute(&ws.velocity_2, &ws.reaction_2, SUB_DIM, self.method)?;
        let scalings = [s1, s2];

        let layout = self.layout;
        let mat = self.assemble(data, &scalings, |idx| Self::place(layout, idx));
        self.solver.factorize(&mat)?;
        self.scalings = Some(scalings);
        Ok(())
    }

    fn predictor_complementarity(&self, ws: &IpmWorkspace, out1: &mut [f64], out2: &mut [f64]) {
        out1.copy_from_slice(&ws.reaction_1);
        out2.copy_from_slice(&ws.reaction_2);
    }

    /// r_k - 2μσ Q_p (Q_p u_k)⁻¹ + (Q_p du_k) ∘ (Q_p⁻¹ dr_k)
    fn corrector_complementarity(
        &self,
        ws: &IpmWorkspace,
        barr_param: f64,
        sigma: f64,
        out1: &mut [f64],
        out2: &mut [f64],
    ) {
        let Some(scalings) = self.scalings.as_ref() else {
            // Unreachable after a successful prepare; fall back to the affine rows.
            self.predictor_complementarity(ws, out1, out2);
            return;
        };

        let n3 = ws.velocity_1.len();
        let mut qu = vec![0.0; n3];
        let mut qu_inv = vec![0.0; n3];
        let mut centering = vec![0.0; n3];
        let mut qdu = vec![0.0; n3];
        let mut qdr = vec![0.0; n3];
        let mut second_order = vec![0.0; n3];

        let families = [
            (&ws.velocity_1, &ws.reaction_1, &ws.d_velocity_1, &ws.d_reaction_1),
            (&ws.velocity_2, &ws.reaction_2, &ws.d_velocity_2, &ws.d_reaction_2),
        ];
        for ((scaling, (u, r, du, dr)), out) in scalings.iter().zip(families).zip([out1, out2]) {
            scaling.apply(u, &mut qu);
            jordan::inverse(&qu, SUB_DIM, &mut qu_inv);
            scaling.apply(&qu_inv, &mut centering);

            scaling.apply(du, &mut qdu);
            scaling.apply_inv(dr, &mut qdr);
            jordan::product(&qdu, &qdr, SUB_DIM, &mut second_order);

            for i in 0..n3 {
                out[i] = r[i] - 2.0 * barr_param * sigma * centering[i] + second_order[i];
            }
        }
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), NewtonSystemError> {
        if self.scalings.is_none() {
            return Err(NewtonSystemError::NotAssembled);
        }
        let layout = self.layout;
        for (idx, &v) in rhs.iter().enumerate() {
            self.permuted[Self::place(layout, idx)] = v;
        }
        self.solver.solve_in_place(&mut self.permuted)?;
        for (idx, v) in rhs.iter_mut().enumerate() {
            *v = self.permuted[Self::place(layout, idx)];
        }
        Ok(())
    }
}

/// Non-symmetric system with the plain linearization of u_k ∘ r_k.
pub struct UnscaledSystem {
    layout: SystemLayout,
    solver: LuSolver,
    assembled: bool,
}

impl UnscaledSystem {
    pub fn new(layout: SystemLayout) -> Self {
        Self {
            layout,
            solver: LuSolver::new(),
            assembled: false,
        }
    }

    pub fn assemble(&self, data: &ScaledProblem, ws: &IpmWorkspace) -> SparseCsc {
        let layout = self.layout;
        let dim = layout.dim();
        let n = data.num_contacts();
        let mut tri = SparseTriMat::new((dim, dim));

        push_common_blocks(&mut tri, data, layout, |idx| idx);

        for (row, col) in j_entries(n) {
            tri.add_triplet(layout.dr() + row, layout.du1() + col, 1.0);
        }

        // Complementarity rows: u_k ∘ dr_k + r_k ∘ du_k
        let families = [
            (layout.du1(), 0, &ws.velocity_1, &ws.reaction_1),
            (layout.du2(), 2, &ws.velocity_2, &ws.reaction_2),
        ];
        for (off, shift, u, r) in families {
            for i in 0..n {
                let px = SUB_DIM * i;
                let py = layout.dr() + CONTACT_DIM * i;
                let row = off + px;

                tri.add_triplet(row, py, u[px]);
                for j in 1..SUB_DIM {
                    tri.add_triplet(row, py + j + shift, u[px + j]);
                    tri.add_triplet(row + j, py, u[px + j]);
                    tri.add_triplet(row + j, py + j + shift, u[px]);
                }

                let arw = jordan::arrow_matrix(&r[px..px + SUB_DIM]);
                push_dense_block(&mut tri, &arw, row, off + px);
            }
        }

        tri.to_csc()
    }
}

impl NewtonSystem for UnscaledSystem {
    fn prepare(&mut self, data: &ScaledProblem, ws: &IpmWorkspace) -> Result<(), NewtonSystemError> {
        self.assembled = false;
        let mat = self.assemble(data, ws);
        self.solver.factorize(&mat)?;
        self.assembled = true;
        Ok(())
    }

    fn predictor_complementarity(&self, ws: &IpmWorkspace, out1: &mut [f64], out2: &mut [f64]) {
        jordan::product(&ws.velocity_1, &ws.reaction_1, SUB_DIM, out1);
        jordan::product(&ws.velocity_2, &ws.reaction_2, SUB_DIM, out2);
    }

    /// u_k ∘ r_k - 2μσ e + du_k ∘ dr_k
    fn corrector_complementarity(
        &self,
        ws: &IpmWorkspace,
        barr_param: f64,
        sigma: f64,
        out1: &mut [f64],
        out2: &mut [f64],
    ) {
        let n3 = ws.velocity_1.len();
        let mut second_order = vec![0.0; n3];
        let families = [
            (&ws.velocity_1, &ws.reaction_1, &ws.d_velocity_1, &ws.d_reaction_1),
            (&ws.velocity_2, &ws.reaction_2, &ws.d_velocity_2, &ws.d_reaction_2),
        ];
        for ((u, r, du, dr), out) in families.into_iter().zip([out1, out2]) {
            jordan::product(u, r, SUB_DIM, out);
            jordan::product(du, dr, SUB_DIM, &mut second_order);
            for i in 0..n3 {
                out[i] += second_order[i];
                if i % SUB_DIM == 0 {
                    out[i] -= 2.0 * barr_param * sigma;
                }
            }
        }
    }

    fn solve(&mut self, rhs: &mut [f64]) -> Result<(), NewtonSystemError> {
        if !self.assembled {
            return Err(NewtonSystemError::NotAssembled);
        }
        self.solver.solve_in_place(rhs)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;
    use crate::problem::{IpmSettings, RollingFrictionProblem};

    fn two_contacts() -> RollingFrictionProblem {
        let triplets = (0..10).map(|i| (i, i % 4, 1.0 + 0.1 * i as f64));
        RollingFrictionProblem {
            M: sparse::from_triplets(4, 4, (0..4).map(|i| (i, i, 2.0)).chain([(0, 1, 0.5), (1, 0, 0.5)])),
            H: sparse::from_triplets(10, 4, triplets),
            f: vec![-1.0, 0.5, 0.2, -0.3],
            w: vec![0.1; 10],
            mu: vec![0.5, 0.3],
            mu_r: vec![0.1, 0.2],
        }
    }

    fn prepared_workspace() -> IpmWorkspace {
        let mut ws = IpmWorkspace::new(4, 2);
        ws.set_starting_point();
        ws.refresh_sub_blocks();
        ws
    }

    fn dense(mat: &SparseCsc) -> DMatrix<f64> {
        let mut d = DMatrix::zeros(mat.rows(), mat.cols());
        for (&v, (r, c)) in mat.iter() {
            d[(r, c)] += v;
        }
        d
    }

    #[test]
    fn test_permutation_is_bijection() {
        let layout = SystemLayout::new(4, 2);
        let mut seen = vec![false; layout.dim()];
        for idx in 0..layout.dim() {
            let p = NtScaledSystem::place(layout, idx);
            assert!(!seen[p], "position {} used twice", p);
            seen[p] = true;
        }
        // du blocks come right after dv
        assert_eq!(NtScaledSystem::place(layout, layout.du1()), 4);
        assert_eq!(NtScaledSystem::place(layout, layout.dr()), 4 + 12);
    }

    #[test]
    fn test_nt_system_symmetric_and_solves() {
        let prob = two_contacts();
        let data = ScaledProblem::new(&prob, &IpmSettings::default());
        let ws = prepared_workspace();
        let layout = SystemLayout::new(4, 2);

        let mut system = NtScaledSystem::new(layout, NtMethod::ClosedForm);
        system.prepare(&data, &ws).unwrap();
        let mat = system.assemble_canonical(&data).unwrap();
        assert!(sparse::is_symmetric(&mat, 1e-12), "NT Jacobian must be symmetric");

        // Solve against a known solution.
        let x: Vec<f64> = (0..layout.dim()).map(|i| ((i * 7) % 5) as f64 - 2.0).collect();
        let mut rhs = vec![0.0; layout.dim()];
        sparse::spmv(&mat, &x, &mut rhs, 1.0, 0.0);
        system.solve(&mut rhs).unwrap();
        for (a, b) in rhs.iter().zip(&x) {
            assert!((a - b).abs() < 1e-8, "solution mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_unscaled_system_solves() {
        let prob = two_contacts();
        let data = ScaledProblem::new(&prob, &IpmSettings::default());
        let ws = prepared_workspace();
        let layout = SystemLayout::new(4, 2);

        let mut system = UnscaledSystem::new(layout);
        system.prepare(&data, &ws).unwrap();
        let mat = system.assemble(&data, &ws);

        let x: Vec<f64> = (0..layout.dim()).map(|i| 0.1 * i as f64 - 1.0).collect();
        let mut rhs = vec![0.0; layout.dim()];
        sparse::spmv(&mat, &x, &mut rhs, 1.0, 0.0);
        system.solve(&mut rhs).unwrap();
        for (a, b) in rhs.iter().zip(&x) {
            assert!((a - b).abs() < 1e-8, "solution mismatch: {} vs {}", a, b);
        }
    }

    #[test]
    fn test_unscaled_complementarity_rows_linearize_product() {
        // Row block k applied to (dr, du_k) must equal u_k ∘ dr_k + r_k ∘ du_k.
        let prob = two_contacts();
        let data = ScaledProblem::new(&prob, &IpmSettings::default());
        let mut ws = prepared_workspace();
        ws.u[3] = 0.2;
        ws.r[8] = 0.1;
        ws.refresh_sub_blocks();

        let layout = SystemLayout::new(4, 2);
        let system = UnscaledSystem::new(layout);
        let mat = dense(&system.assemble(&data, &ws));

        let mut x = vec![0.0; layout.dim()];
        for (i, xi) in x.iter_mut().enumerate().skip(layout.dr()) {
            *xi = ((i * 3) % 7) as f64 * 0.25 - 0.5;
        }
        let y = &mat * nalgebra::DVector::from_vec(x.clone());

        let mut ws_dir = prepared_workspace();
        ws_dir.unpack_direction(&x);
        let mut expected_1 = vec![0.0; 6];
        let mut expected_2 = vec![0.0; 6];
        let mut tmp = vec![0.0; 6];
        jordan::product(&ws.velocity_1, &ws_dir.d_reaction_1, SUB_DIM, &mut expected_1);
        jordan::product(&ws.reaction_1, &ws_dir.d_velocity_1, SUB_DIM, &mut tmp);
        expected_1.iter_mut().zip(&tmp).for_each(|(a, b)| *a += b);
        jordan::product(&ws.velocity_2, &ws_dir.d_reaction_2, SUB_DIM, &mut expected_2);
        jordan::product(&ws.reaction_2, &ws_dir.d_velocity_2, SUB_DIM, &mut tmp);
        expected_2.iter_mut().zip(&tmp).for_each(|(a, b)| *a += b);

        for i in 0..6 {
            assert!((y[layout.du1() + i] - expected_1[i]).abs() < 1e-12, "block 1 row {}", i);
            assert!((y[layout.du2() + i] - expected_2[i]).abs() < 1e-12, "block 2 row {}", i);
        }
    }

    #[test]
    fn test_solve_before_prepare_fails() {
        let layout = SystemLayout::new(4, 2);
        let mut system = UnscaledSystem::new(layout);
        let mut rhs = vec![0.0; layout.dim()];
        assert!(matches!(system.solve(&mut rhs), Err(NewtonSystemError::NotAssembled)));
    }
}
