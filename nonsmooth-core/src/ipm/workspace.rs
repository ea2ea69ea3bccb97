//! Pre-allocated workspace for the rolling friction IPM.
//!
//! Every iterate, residual and direction vector has a name and a fixed size
//! derived from the problem dimensions.

use crate::cones::{rolling, SubBlock, CONTACT_DIM, SUB_DIM};

/// Iterate and scratch buffers of one IPM solve.
///
/// Contact-space vectors (u, r, w̃, ...) are in the scaled variables
/// `P_mu · (·)`.
pub struct IpmWorkspace {
    m: usize,
    n: usize,

    // ========================================================================
    // Iterate
    // ========================================================================
    /// Generalized velocity v (m)
    pub v: Vec<f64>,
    /// Contact velocity u (nd)
    pub u: Vec<f64>,
    /// Contact reaction r (nd)
    pub r: Vec<f64>,
    /// Auxiliary lead of the sliding velocity sub-block (n)
    pub t: Vec<f64>,
    /// Auxiliary lead of the rolling velocity sub-block (n)
    pub t_prime: Vec<f64>,

    // ========================================================================
    // Sub-blocks, rebuilt from (u, r, t, t') every iteration
    // ========================================================================
    pub velocity_1: Vec<f64>,
    pub velocity_2: Vec<f64>,
    pub reaction_1: Vec<f64>,
    pub reaction_2: Vec<f64>,

    // ========================================================================
    // Residuals
    // ========================================================================
    /// Dual residual M v - H̃^T r + f (m)
    pub dual_residual: Vec<f64>,
    /// Primal residual u - H̃ v - w̃ (nd)
    pub primal_residual: Vec<f64>,
    /// M v (m)
    pub mv: Vec<f64>,
    /// H̃ v (nd)
    pub hv: Vec<f64>,
    /// H̃^T r (m)
    pub htr: Vec<f64>,

    // ========================================================================
    // Directions
    // ========================================================================
    pub dv: Vec<f64>,
    pub du: Vec<f64>,
    pub dr: Vec<f64>,
    pub dt: Vec<f64>,
    pub dt_prime: Vec<f64>,

    pub d_velocity_1: Vec<f64>,
    pub d_velocity_2: Vec<f64>,
    pub d_reaction_1: Vec<f64>,
    pub d_reaction_2: Vec<f64>,

    /// Right-hand side and solution of the Newton system
    pub rhs: Vec<f64>,
}

impl IpmWorkspace {
    /// Allocate a workspace for `m` velocities and `n` contacts.
    pub fn new(m: usize, n: usize) -> Self {
        let nd = n * CONTACT_DIM;
        let n3 = n * SUB_DIM;
        let system = m + nd + 2 * n3;

        Self {
            m,
            n,
            v: vec![0.0; m],
            u: vec![0.0; nd],
            r: vec![0.0; nd],
            t: vec![0.0; n],
            t_prime: vec![0.0; n],
            velocity_1: vec![0.0; n3],
            velocity_2: vec![0.0; n3],
            reaction_1: vec![0.0; n3],
            reaction_2: vec![0.0; n3],
            dual_residual: vec![0.0; m],
            primal_residual: vec![0.0; nd],
            mv: vec![0.0; m],
            hv: vec![0.0; nd],
            htr: vec![0.0; m],
            dv: vec![0.0; m],
            du: vec![0.0; nd],
            dr: vec![0.0; nd],
            dt: vec![0.0; n],
            dt_prime: vec![0.0; n],
            d_velocity_1: vec![0.0; n3],
            d_velocity_2: vec![0.0; n3],
            d_reaction_1: vec![0.0; n3],
            d_reaction_2: vec![0.0; n3],
            rhs: vec![0.0; system],
        }
    }

    pub fn num_velocities(&self) -> usize {
        self.m
    }

    pub fn num_contacts(&self) -> usize {
        self.n
    }

    /// Contact-space dimension nd = 5n.
    pub fn contact_dim(&self) -> usize {
        self.n * CONTACT_DIM
    }

    /// Size of the Newton system, m + nd + 6n.
    pub fn system_dim(&self) -> usize {
        self.rhs.len()
    }

    /// Fixed heuristic starting point.
    pub fn set_starting_point(&mut self) {
        self.v.fill(0.01);
        self.u.fill(0.001);
        self.r.fill(0.04);
        for i in 0..self.n {
            self.u[CONTACT_DIM * i] = 3.0;
            self.r[CONTACT_DIM * i] = 0.5;
        }
        self.t.fill(2.0);
        self.t_prime.fill(1.0);
    }

    /// Overwrite the iterate with a given point in the scaled variables.
    pub fn load_point(&mut self, v: &[f64], u: &[f64], r: &[f64], t: &[f64], t_prime: &[f64]) {
        self.v.copy_from_slice(v);
        self.u.copy_from_slice(u);
        self.r.copy_from_slice(r);
        self.t.copy_from_slice(t);
        self.t_prime.copy_from_slice(t_prime);
        self.refresh_sub_blocks();
    }

    /// Rebuild the four sub-block vectors from (u, r, t, t').
    pub fn refresh_sub_blocks(&mut self) {
        rolling::extract_sub_block(&self.u, Some(&self.t), SubBlock::Sliding, &mut self.velocity_1);
        rolling::extract_sub_block(&self.u, Some(&self.t_prime), SubBlock::Rolling, &mut self.velocity_2);
        rolling::extract_sub_block(&self.r, None, SubBlock::Sliding, &mut self.reaction_1);
        rolling::extract_sub_block(&self.r, None, SubBlock::Rolling, &mut self.reaction_2);
    }

    /// Unpack a Newton solution laid out as (dv, dr, du1, du2) into the
    /// direction vectors.
    pub fn unpack_direction(&mut self, sol: &[f64]) {
        let m = self.m;
        let nd = self.contact_dim();
        let n3 = self.n * SUB_DIM;
        assert_eq!(sol.len(), m + nd + 2 * n3);

        self.dv.copy_from_slice(&sol[..m]);
        self.dr.copy_from_slice(&sol[m..m + nd]);
        self.d_velocity_1.copy_from_slice(&sol[m + nd..m + nd + n3]);
        self.d_velocity_2.copy_from_slice(&sol[m + nd + n3..]);

        for i in 0..self.n {
            let (b, k) = (CONTACT_DIM * i, SUB_DIM * i);
            let du1 = &self.d_velocity_1[k..k + SUB_DIM];
            let du2 = &self.d_velocity_2[k..k + SUB_DIM];

            self.du[b] = du1[0] + du2[0];
            self.du[b + 1] = du1[1];
            self.du[b + 2] = du1[2];
            self.du[b + 3] = du2[1];
            self.du[b + 4] = du2[2];
            self.dt[i] = du1[0];
            self.dt_prime[i] = du2[0];
        }

        rolling::extract_sub_block(&self.dr, None, SubBlock::Sliding, &mut self.d_reaction_1);
        rolling::extract_sub_block(&self.dr, None, SubBlock::Rolling, &mut self.d_reaction_2);
    }

    /// Move the iterate by `alpha` (v, u, r) and `alpha_dual` (t, t').
    pub fn apply_step(&mut self, alpha: f64, alpha_dual: f64) {
        axpy(alpha, &self.dv, &mut self.v);
        axpy(alpha, &self.du, &mut self.u);
        axpy(alpha, &self.dr, &mut self.r);
        axpy(alpha_dual, &self.dt, &mut self.t);
        axpy(alpha_dual, &self.dt_prime, &mut self.t_prime);
    }

    /// Whether every iterate entry is finite.
    pub fn iterate_is_finite(&self) -> bool {
        [&self.v, &self.u, &self.r, &self.t, &self.t_prime]
            .iter()
            .all(|x| x.iter().all(|v| v.is_finite()))
    }
}

#[inline]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starting_point() {
        let mut ws = IpmWorkspace::new(4, 2);
        ws.set_starting_point();
        ws.refresh_sub_blocks();

        assert_eq!(ws.u[0], 3.0);
        assert_eq!(ws.u[6], 0.001);
        assert_eq!(ws.r[5], 0.5);
        assert_eq!(&ws.velocity_1[..3], &[2.0, 0.001, 0.001]);
        assert_eq!(&ws.velocity_2[3..], &[1.0, 0.001, 0.001]);
        assert_eq!(&ws.reaction_2[..3], &[0.5, 0.04, 0.04]);
        assert_eq!(ws.system_dim(), 4 + 10 + 12);
    }

    #[test]
    fn test_unpack_direction() {
        let mut ws = IpmWorkspace::new(1, 1);
        // dv | dr (5) | du1 (3) | du2 (3)
        let sol = [9.0, 1.0, 2.0, 3.0, 4.0, 5.0, 10.0, 11.0, 12.0, 20.0, 21.0, 22.0];
        ws.unpack_direction(&sol);

        assert_eq!(ws.dv, vec![9.0]);
        assert_eq!(ws.du, vec![30.0, 11.0, 12.0, 21.0, 22.0]);
        assert_eq!(ws.dt, vec![10.0]);
        assert_eq!(ws.dt_prime, vec![20.0]);
        assert_eq!(ws.d_reaction_1, vec![1.0, 2.0, 3.0]);
        assert_eq!(ws.d_reaction_2, vec![1.0, 4.0, 5.0]);
    }

    #[test]
    fn test_non_finite_detection() {
        let mut ws = IpmWorkspace::new(2, 1);
        ws.set_starting_point();
        assert!(ws.iterate_is_finite());
        ws.t_prime[0] = f64::NAN;
        assert!(!ws.iterate_is_finite());
    }
}
