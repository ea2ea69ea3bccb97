//! Problem data, solver settings and results for the rolling friction IPM.
//!
//! The IPM solves
//!
//! ```text
//! minimize    (1/2) v^T M v + f^T v
//! subject to  u = H v + w,  u ∈ K*,  r ∈ K,  u^T r = 0
//! ```
//!
//! where K is a product of rolling friction cones, one per contact.
//!
//! # Dimensions
//!
//! - `m`: number of generalized velocities (length of v)
//! - `n`: number of contacts
//! - `nd = 5n`: contact-space dimension
//! - M: m × m, H: nd × m, f: m, w: nd, mu / mu_r: n

use std::fmt;

use log::warn;

use crate::cones::CONTACT_DIM;
use crate::linalg::sparse::{self, SparseCsc};
use crate::scaling::NtMethod;

/// Rolling friction-contact problem (read-only during a solve).
#[derive(Debug, Clone)]
#[allow(non_snake_case)] // M and H are standard mechanical notation
pub struct RollingFrictionProblem {
    /// Mass/stiffness matrix M (m × m, symmetric PSD)
    pub M: SparseCsc,

    /// Contact matrix H (nd × m)
    pub H: SparseCsc,

    /// Generalized force f (length m)
    pub f: Vec<f64>,

    /// Contact offset w (length nd)
    pub w: Vec<f64>,

    /// Sliding friction coefficient per contact
    pub mu: Vec<f64>,

    /// Rolling friction coefficient per contact
    pub mu_r: Vec<f64>,
}

impl RollingFrictionProblem {
    /// Contact block dimension (normal, 2 tangential, 2 rolling)
    pub const DIMENSION: usize = CONTACT_DIM;

    /// Number of generalized velocities (m)
    pub fn num_velocities(&self) -> usize {
        self.M.rows()
    }

    /// Number of contacts (n)
    pub fn num_contacts(&self) -> usize {
        self.mu.len()
    }

    /// Validate dimensions and friction coefficients.
    pub fn validate(&self) -> Result<(), String> {
        let m = self.num_velocities();
        let n = self.num_contacts();
        let nd = n * Self::DIMENSION;

        if n == 0 {
            return Err("problem has no contacts".to_string());
        }
        if self.M.cols() != m {
            return Err(format!("M has shape {}×{}, expected a square matrix", m, self.M.cols()));
        }
        if self.H.cols() != m {
            return Err(format!("H has {} cols, expected {}", self.H.cols(), m));
        }
        if self.H.rows() != nd {
            return Err(format!("H has {} rows, expected {}", self.H.rows(), nd));
        }
        if self.f.len() != m {
            return Err(format!("f has length {}, expected {}", self.f.len(), m));
        }
        if self.w.len() != nd {
            return Err(format!("w has length {}, expected {}", self.w.len(), nd));
        }
        if self.mu_r.len() != n {
            return Err(format!("mu_r has length {}, expected {}", self.mu_r.len(), n));
        }
        for (i, (&mu, &mu_r)) in self.mu.iter().zip(&self.mu_r).enumerate() {
            if !(mu > 0.0 && mu.is_finite()) || !(mu_r > 0.0 && mu_r.is_finite()) {
                return Err(format!(
                    "contact {} has friction coefficients mu = {}, mu_r = {}, expected positive values",
                    i, mu, mu_r
                ));
            }
        }

        Ok(())
    }

    /// Whether M equals its transpose up to `tol`.
    pub fn is_mass_symmetric(&self, tol: f64) -> bool {
        sparse::is_symmetric(&self.M, tol)
    }

    /// Symmetric part (M + M^T) / 2 as a new matrix.
    ///
    /// The problem itself is left untouched.
    pub fn symmetrized(&self) -> SparseCsc {
        warn!("symmetrizing M: using (M + M^T) / 2 for this solve");
        let mt = sparse::transpose(&self.M);
        sparse::add(0.5, &self.M, 0.5, &mt)
    }
}

/// Which complementarity model the full error measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorModel {
    /// Convex relaxation: u is compared as is.
    Convex,
    /// Non-smooth model: u0 is shifted by μ||ū|| + μr||ũ||.
    NonSmooth,
}

/// IPM settings and parameters.
#[derive(Debug, Clone)]
pub struct IpmSettings {
    /// Maximum number of IPM iterations
    pub max_iter: usize,

    /// Stopping tolerance on max(pinfeas, dinfeas, <u1, r1>, <u2, r2>)
    pub tol: f64,

    /// Use the symmetric Nesterov-Todd scaled Newton system
    pub nesterov_todd_scaling: bool,

    /// Construction of the NT scaling matrices
    pub nt_method: NtMethod,

    /// Switch to the unscaled system once the full error drops below 1e-6
    pub finish_without_scaling: bool,

    /// Complementarity model used by the full error
    pub error_model: ErrorModel,

    /// Barrier threshold above which the centering exponent grows with α
    pub sigma_threshold: f64,

    /// Coefficient of α² in the centering exponent
    pub sigma_exponent_scale: f64,

    /// Centering exponent once the barrier is below the threshold
    pub sigma_exponent_floor: f64,

    /// Step damping update gmm = gamma_base + gamma_slope * α
    pub gamma_base: f64,
    pub gamma_slope: f64,

    /// Replace a non-symmetric M by its symmetric part (logged)
    pub symmetrize: bool,

    /// Log norms, sizes and symmetry of the problem data before iterating
    pub report_problem_info: bool,

    /// Log the iteration table at info level
    pub verbose: bool,
}

impl Default for IpmSettings {
    fn default() -> Self {
        let max_iter = std::env::var("NONSMOOTH_IPM_MAX_ITER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(200);
        let tol = std::env::var("NONSMOOTH_IPM_TOL")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1e-10);

        Self {
            max_iter,
            tol,
            nesterov_todd_scaling: std::env::var("NONSMOOTH_IPM_NT")
                .map(|s| s == "1" || s.to_lowercase() == "true")
                .unwrap_or(false),
            nt_method: NtMethod::ClosedForm,
            finish_without_scaling: true,
            error_model: ErrorModel::Convex,
            sigma_threshold: 1e-5,
            sigma_exponent_scale: 3.0,
            sigma_exponent_floor: 1.0,
            gamma_base: 0.9,
            gamma_slope: 0.09,
            symmetrize: false,
            report_problem_info: false,
            verbose: false,
        }
    }
}

/// IPM termination status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpmStatus {
    /// Convergence test met
    Converged,

    /// Iteration budget exhausted
    MaxIterations,

    /// NaN/Inf in the iterate or a failed factorization
    NumericalError,
}

impl IpmStatus {
    /// Legacy integer code: 0 converged, 1 iteration limit, 2 numerical failure.
    pub fn info(self) -> i32 {
        match self {
            IpmStatus::Converged => 0,
            IpmStatus::MaxIterations => 1,
            IpmStatus::NumericalError => 2,
        }
    }
}

impl fmt::Display for IpmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpmStatus::Converged => write!(f, "Converged"),
            IpmStatus::MaxIterations => write!(f, "MaxIterations"),
            IpmStatus::NumericalError => write!(f, "Numerical Error"),
        }
    }
}

/// Metrics of the last iterate.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpmInfo {
    /// Relative primal residual
    pub pinfeas: f64,
    /// Relative dual residual
    pub dinfeas: f64,
    /// <u1, r1>
    pub u1_dot_r1: f64,
    /// <u2, r2>
    pub u2_dot_r2: f64,
    /// ||u1 ∘ r1||
    pub complem_1: f64,
    /// ||u2 ∘ r2||
    pub complem_2: f64,
    /// u^T r / n
    pub barr_param: f64,
    /// Relative primal-dual objective gap
    pub relgap: f64,
    /// Problem-level error in original variables
    pub full_error: f64,
    /// Whether NT scaling was switched off before the end
    pub finished_without_scaling: bool,
}

/// IPM result. Velocities and reactions are in original variables.
#[derive(Debug, Clone)]
pub struct IpmResult {
    pub status: IpmStatus,

    /// Generalized velocity v (length m)
    pub global_velocity: Vec<f64>,

    /// Contact velocity u (length nd)
    pub velocity: Vec<f64>,

    /// Contact reaction r (length nd)
    pub reaction: Vec<f64>,

    /// Leads t, t' of the two velocity sub-blocks (length n each)
    pub t: Vec<f64>,
    pub t_prime: Vec<f64>,

    /// Number of iterations performed
    pub iterations: usize,

    pub info: IpmInfo,
}

impl IpmResult {
    pub fn info_code(&self) -> i32 {
        self.status.info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_contact() -> RollingFrictionProblem {
        RollingFrictionProblem {
            M: sparse::identity(5),
            H: sparse::identity(5),
            f: vec![-1.0, 0.1, 0.0, 0.05, 0.0],
            w: vec![0.0; 5],
            mu: vec![0.5],
            mu_r: vec![0.1],
        }
    }

    #[test]
    fn test_validate_ok() {
        let prob = single_contact();
        assert!(prob.validate().is_ok());
        assert_eq!(prob.num_contacts(), 1);
        assert_eq!(prob.num_velocities(), 5);
    }

    #[test]
    fn test_validate_dimension_errors() {
        let mut prob = single_contact();
        prob.w = vec![0.0; 4];
        let err = prob.validate().unwrap_err();
        assert!(err.contains("w has length 4"), "unexpected message: {}", err);

        let mut prob = single_contact();
        prob.mu_r = vec![];
        assert!(prob.validate().is_err());

        let mut prob = single_contact();
        prob.H = sparse::identity(4);
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_validate_friction_coefficients() {
        let mut prob = single_contact();
        prob.mu = vec![0.0];
        assert!(prob.validate().is_err());
    }

    #[test]
    fn test_symmetrized_leaves_problem_untouched() {
        let mut prob = single_contact();
        prob.M = sparse::from_triplets(
            5,
            5,
            (0..5).map(|i| (i, i, 1.0)).chain(std::iter::once((0, 1, 0.4))),
        );
        assert!(!prob.is_mass_symmetric(1e-14));

        let sym = prob.symmetrized();
        assert!(sparse::is_symmetric(&sym, 1e-14));
        assert_eq!(sym.get(1, 0).copied(), Some(0.2));
        assert_eq!(prob.M.get(1, 0), None);
    }

    #[test]
    fn test_status_info_codes() {
        assert_eq!(IpmStatus::Converged.info(), 0);
        assert_eq!(IpmStatus::MaxIterations.info(), 1);
        assert_eq!(IpmStatus::NumericalError.info(), 2);
        assert_eq!(IpmStatus::NumericalError.to_string(), "Numerical Error");
    }
}
