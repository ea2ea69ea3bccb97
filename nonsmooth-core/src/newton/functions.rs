//! Capability interface of the globalized Newton method.
//!
//! A problem supplies the residual F, the merit residual F_merit (often F
//! itself) and an error routine, plus at least one way of producing a descent
//! direction. Optional operations default to "not provided"; which ones a
//! type implements is declared once through [`NewtonFunctions::capabilities`]
//! and checked when the solver is built.

use thiserror::Error;

use crate::linalg::sparse::SparseCsc;

/// Raised by a user-supplied direction routine that could not find a direction.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("descent direction computation failed")]
pub struct DirectionFailure;

/// Optional operations a [`NewtonFunctions`] implementation provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `compute_jacobian`: Jacobian H of F_merit
    pub jacobian: bool,
    /// `compute_jacobian_desc`: matrix of the descent system
    pub jacobian_desc: bool,
    /// `compute_rhs_desc`: right-hand side of the descent system
    pub rhs_desc: bool,
    /// `compute_descent_direction`: direction computed by the problem itself
    pub descent_direction: bool,
    /// `compute_jac_theta_merit`: gradient of the merit function
    pub jac_theta_merit: bool,
    /// `project_onto_set`: projection used by the arc search
    pub projection: bool,
}

pub trait NewtonFunctions {
    /// Number of unknowns.
    fn dim(&self) -> usize;

    /// Optional operations this type implements.
    fn capabilities(&self) -> Capabilities;

    /// f = F(z)
    fn compute_f(&mut self, z: &[f64], f: &mut [f64]);

    /// f_merit = F_merit(z), given f = F(z)
    fn compute_f_merit(&mut self, z: &[f64], f: &[f64], f_merit: &mut [f64]);

    /// User error measure, also used for the initial error.
    fn compute_error(&mut self, z: &[f64], f: &[f64], grad_merit: &[f64], tol: f64) -> f64;

    /// Jacobian of F_merit at z.
    fn compute_jacobian(&mut self, _z: &[f64], _f: &[f64]) -> Option<SparseCsc> {
        None
    }

    /// Matrix of the descent system, paired with `compute_rhs_desc`.
    fn compute_jacobian_desc(&mut self, _z: &[f64], _f: &[f64]) -> Option<SparseCsc> {
        None
    }

    /// Right-hand side of the descent system, solved as H_desc d = -rhs.
    fn compute_rhs_desc(&mut self, _z: &[f64], _f: &[f64]) -> Option<Vec<f64>> {
        None
    }

    /// Descent direction computed by the problem.
    fn compute_descent_direction(&mut self, _z: &[f64], _f: &[f64]) -> Result<Vec<f64>, DirectionFailure> {
        Err(DirectionFailure)
    }

    /// Gradient of θ = ½||F_merit||².
    fn compute_jac_theta_merit(&mut self, _z: &[f64], _f: &[f64], _f_merit: &[f64]) -> Option<Vec<f64>> {
        None
    }

    /// Project z onto the feasible set of the arc search.
    fn project_onto_set(&mut self, _z: &mut [f64]) {}
}

/// How the descent direction is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionStrategy {
    /// `compute_descent_direction`
    Provided,
    /// Solve H_desc d = -rhs_desc
    DescentSystem,
    /// Solve H d = -F_merit with H from `compute_jacobian`
    Jacobian,
}

impl Capabilities {
    /// Direction source in order of precedence.
    pub fn direction_strategy(&self) -> Option<DirectionStrategy> {
        if self.descent_direction {
            Some(DirectionStrategy::Provided)
        } else if self.rhs_desc && self.jacobian_desc {
            Some(DirectionStrategy::DescentSystem)
        } else if self.jacobian {
            Some(DirectionStrategy::Jacobian)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_precedence() {
        let caps = Capabilities {
            jacobian: true,
            rhs_desc: true,
            jacobian_desc: true,
            ..Capabilities::default()
        };
        assert_eq!(caps.direction_strategy(), Some(DirectionStrategy::DescentSystem));

        let caps = Capabilities {
            descent_direction: true,
            ..caps
        };
        assert_eq!(caps.direction_strategy(), Some(DirectionStrategy::Provided));

        let caps = Capabilities {
            rhs_desc: true,
            ..Capabilities::default()
        };
        assert_eq!(caps.direction_strategy(), None);
    }
}
