//! Problem data after the change of variables P_mu = diag(1, μ, μ, μr, μr).
//!
//! In the scaled variables every contact cone is the intersection of two
//! unit second-order cones sharing the leading coordinate:
//!
//! - H̃ = P_mu H, w̃ = P_mu w
//! - u_orig = P_mu⁻¹ u, r_orig = P_mu r

use std::borrow::Cow;

use log::{debug, info};

use crate::cones::rolling;
use crate::linalg::sparse::{self, SparseCsc};
use crate::problem::{IpmSettings, RollingFrictionProblem};

const SYMMETRY_TOL: f64 = 1e-14;

#[allow(non_snake_case)]
pub struct ScaledProblem<'a> {
    /// M, or its symmetric part when symmetrization was requested
    pub M: Cow<'a, SparseCsc>,
    /// H̃ = P_mu H
    pub H: SparseCsc,
    pub f: &'a [f64],
    /// w̃ = P_mu w
    pub w: Vec<f64>,
    pub mu: &'a [f64],
    pub mu_r: &'a [f64],
    /// Diagonal of P_mu
    pub p_mu: Vec<f64>,
}

impl<'a> ScaledProblem<'a> {
    #[allow(non_snake_case)]
    pub fn new(prob: &'a RollingFrictionProblem, settings: &IpmSettings) -> Self {
        let M = if settings.symmetrize && !prob.is_mass_symmetric(SYMMETRY_TOL) {
            Cow::Owned(prob.symmetrized())
        } else {
            Cow::Borrowed(&prob.M)
        };

        let p_mu = rolling::p_mu_diagonal(&prob.mu, &prob.mu_r);
        let H = sparse::scale_rows(&prob.H, &p_mu);
        let w = prob.w.iter().zip(&p_mu).map(|(wi, pi)| wi * pi).collect();

        Self {
            M,
            H,
            f: &prob.f,
            w,
            mu: &prob.mu,
            mu_r: &prob.mu_r,
            p_mu,
        }
    }

    pub fn num_velocities(&self) -> usize {
        self.M.rows()
    }

    pub fn num_contacts(&self) -> usize {
        self.mu.len()
    }

    /// u_orig = P_mu⁻¹ u
    pub fn unscale_velocity(&self, u: &[f64]) -> Vec<f64> {
        u.iter().zip(&self.p_mu).map(|(ui, pi)| ui / pi).collect()
    }

    /// r_orig = P_mu r
    pub fn unscale_reaction(&self, r: &[f64]) -> Vec<f64> {
        r.iter().zip(&self.p_mu).map(|(ri, pi)| ri * pi).collect()
    }

    /// u = P_mu u_orig
    pub fn scale_velocity(&self, u: &[f64]) -> Vec<f64> {
        u.iter().zip(&self.p_mu).map(|(ui, pi)| ui * pi).collect()
    }

    /// r = P_mu⁻¹ r_orig
    pub fn scale_reaction(&self, r: &[f64]) -> Vec<f64> {
        r.iter().zip(&self.p_mu).map(|(ri, pi)| ri / pi).collect()
    }

    /// Log sizes, norms and symmetry of the original data.
    pub fn report(&self, prob: &RollingFrictionProblem) {
        let norm2 = |x: &[f64]| x.iter().map(|v| v * v).sum::<f64>().sqrt();
        info!(
            "problem: m = {}, n = {} contacts, nnz(M) = {}, nnz(H) = {}",
            self.num_velocities(),
            self.num_contacts(),
            prob.M.nnz(),
            prob.H.nnz()
        );
        info!(
            "  ||M||_1 = {:.3e}, ||M||_inf = {:.3e}, ||H||_1 = {:.3e}, ||H||_inf = {:.3e}",
            sparse::norm_1(&prob.M),
            sparse::norm_inf(&prob.M),
            sparse::norm_1(&prob.H),
            sparse::norm_inf(&prob.H)
        );
        info!(
            "  ||f|| = {:.3e}, ||w|| = {:.3e}, M symmetric: {}",
            norm2(&prob.f),
            norm2(&prob.w),
            prob.is_mass_symmetric(SYMMETRY_TOL)
        );
        debug!("  mu = {:?}, mu_r = {:?}", prob.mu, prob.mu_r);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_contacts() -> RollingFrictionProblem {
        RollingFrictionProblem {
            M: sparse::identity(3),
            H: sparse::from_triplets(10, 3, (0..10).map(|i| (i, i % 3, 1.0))),
            f: vec![0.0; 3],
            w: vec![1.0; 10],
            mu: vec![0.5, 0.25],
            mu_r: vec![0.1, 0.2],
        }
    }

    #[test]
    fn test_change_of_variables() {
        let prob = two_contacts();
        let data = ScaledProblem::new(&prob, &IpmSettings::default());

        assert_eq!(data.w, vec![1.0, 0.5, 0.5, 0.1, 0.1, 1.0, 0.25, 0.25, 0.2, 0.2]);
        assert_eq!(data.H.get(6, 0).copied(), Some(0.25));

        let u = vec![1.0; 10];
        let u_orig = data.unscale_velocity(&u);
        assert!((u_orig[1] - 2.0).abs() < 1e-15);
        assert!((u_orig[8] - 5.0).abs() < 1e-15);

        let r_orig = data.unscale_reaction(&u);
        assert_eq!(r_orig, data.p_mu);
    }

    #[test]
    fn test_symmetrize_only_on_request() {
        let mut prob = two_contacts();
        prob.M = sparse::from_triplets(3, 3, vec![(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0), (0, 2, 1.0)]);

        let data = ScaledProblem::new(&prob, &IpmSettings::default());
        assert!(matches!(data.M, Cow::Borrowed(_)));

        let settings = IpmSettings {
            symmetrize: true,
            ..IpmSettings::default()
        };
        let data = ScaledProblem::new(&prob, &settings);
        assert!(matches!(data.M, Cow::Owned(_)));
        assert_eq!(data.M.get(2, 0).copied(), Some(0.5));
        assert_eq!(prob.M.get(2, 0), None);
    }
}
