//! Factorize-and-solve backends for the Newton systems.
//!
//! Two factorizations are available behind the [`LinearSolver`] trait:
//!
//! - [`LdltSolver`]: sparse LDL^T (`sprs_ldl`) for symmetric indefinite
//!   matrices. No pivoting is performed, so the caller orders the unknowns
//!   so that every leading block is definite.
//! - [`LuSolver`]: dense partial-pivoting LU (`nalgebra`) for general
//!   non-symmetric matrices.
//!
//! A solver owns its factorization, so one handle must never be shared by two
//! concurrent solves.

use super::sparse::SparseCsc;
use nalgebra::linalg::LU;
use nalgebra::{DMatrix, DVector, Dyn};
use sprs::errors::{LinalgError, SingularMatrixInfo};
use sprs::{FillInReduction, SymmetryCheck};
use sprs_ldl::{Ldl, LdlNumeric};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Ldlt(#[from] LinalgError),
    #[error("LU factorization of a {0}x{0} matrix is singular")]
    SingularLu(usize),
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("Linear solve produced non-finite values")]
    NonFinite,
}

/// Which factorization a Newton system asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverKind {
    /// LDL^T, the matrix must be symmetric.
    Symmetric,
    /// LU with partial pivoting.
    General,
}

pub trait LinearSolver {
    fn kind(&self) -> SolverKind;

    /// Factorize `mat`, replacing any previous factorization.
    fn factorize(&mut self, mat: &SparseCsc) -> Result<(), BackendError>;

    /// Solve with the current factorization, overwriting `rhs` with the solution.
    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), BackendError>;

    fn factorize_and_solve(&mut self, mat: &SparseCsc, rhs: &mut [f64]) -> Result<(), BackendError> {
        self.factorize(mat)?;
        self.solve_in_place(rhs)
    }
}

/// Build the backend matching `kind`.
pub fn new_solver(kind: SolverKind) -> Box<dyn LinearSolver> {
    match kind {
        SolverKind::Symmetric => Box::new(LdltSolver::new()),
        SolverKind::General => Box::new(LuSolver::new()),
    }
}

fn check_square(mat: &SparseCsc) -> Result<usize, BackendError> {
    if mat.rows() != mat.cols() {
        return Err(BackendError::DimensionMismatch {
            expected: mat.rows(),
            actual: mat.cols(),
        });
    }
    Ok(mat.rows())
}

fn check_rhs(n: usize, rhs: &[f64]) -> Result<(), BackendError> {
    if rhs.len() != n {
        return Err(BackendError::DimensionMismatch {
            expected: n,
            actual: rhs.len(),
        });
    }
    Ok(())
}

/// Sparse LDL^T backend.
pub struct LdltSolver {
    factor: Option<LdlNumeric<f64, usize>>,
    n: usize,
}

impl LdltSolver {
    pub fn new() -> Self {
        Self {
            factor: None,
            n: 0,
        }
    }

    /// Pivots of the last factorization.
    pub fn d_values(&self) -> Option<&[f64]> {
        self.factor.as_ref().map(|f| &f.d()[..])
    }
}

impl Default for LdltSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver for LdltSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::Symmetric
    }

    fn factorize(&mut self, mat: &SparseCsc) -> Result<(), BackendError> {
        let n = check_square(mat)?;
        self.factor = None;

        let ldl = Ldl::new()
            .fill_in_reduction(FillInReduction::NoReduction)
            .check_symmetry(SymmetryCheck::DontCheckSymmetry)
            .numeric(mat.view())?;

        for (i, &di) in ldl.d().iter().enumerate() {
            if di == 0.0 || !di.is_finite() {
                return Err(LinalgError::SingularMatrix(SingularMatrixInfo {
                    index: i,
                    reason: "zero or non-finite pivot in LDL^T factorization",
                })
                .into());
            }
        }

        self.n = n;
        self.factor = Some(ldl);
        Ok(())
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), BackendError> {
        let factor = self
            .factor
            .as_ref()
            .ok_or_else(|| BackendError::Message("LDL^T solve called before factorization".into()))?;
        check_rhs(self.n, rhs)?;

        let sol = factor.solve(&*rhs);
        if sol.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite);
        }
        rhs.copy_from_slice(&sol);
        Ok(())
    }
}

/// Dense LU backend with partial pivoting.
pub struct LuSolver {
    factor: Option<LU<f64, Dyn, Dyn>>,
    n: usize,
}

impl LuSolver {
    pub fn new() -> Self {
        Self { factor: None, n: 0 }
    }
}

impl Default for LuSolver {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearSolver for LuSolver {
    fn kind(&self) -> SolverKind {
        SolverKind::General
    }

    fn factorize(&mut self, mat: &SparseCsc) -> Result<(), BackendError> {
        let n = check_square(mat)?;
        self.factor = None;

        let mut dense = DMatrix::zeros(n, n);
        for (&val, (row, col)) in mat.iter() {
            dense[(row, col)] += val;
        }

        let lu = dense.lu();
        if !lu.is_invertible() {
            return Err(BackendError::SingularLu(n));
        }

        self.n = n;
        self.factor = Some(lu);
        Ok(())
    }

    fn solve_in_place(&self, rhs: &mut [f64]) -> Result<(), BackendError> {
        let factor = self
            .factor
            .as_ref()
            .ok_or_else(|| BackendError::Message("LU solve called before factorization".into()))?;
        check_rhs(self.n, rhs)?;

        let b = DVector::from_column_slice(rhs);
        let sol = factor.solve(&b).ok_or(BackendError::SingularLu(self.n))?;
        if sol.iter().any(|v| !v.is_finite()) {
            return Err(BackendError::NonFinite);
        }
        rhs.copy_from_slice(sol.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::sparse;

    fn quasi_definite() -> SparseCsc {
        // [[2, 0, 1],
        //  [0, 1, 1],
        //  [1, 1, -1]]
        sparse::from_triplets(
            3,
            3,
            vec![
                (0, 0, 2.0),
                (1, 1, 1.0),
                (0, 2, 1.0),
                (2, 0, 1.0),
                (1, 2, 1.0),
                (2, 1, 1.0),
                (2, 2, -1.0),
            ],
        )
    }

    fn residual(mat: &SparseCsc, x: &[f64], b: &[f64]) -> f64 {
        let mut ax = vec![0.0; b.len()];
        sparse::spmv(mat, x, &mut ax, 1.0, 0.0);
        ax.iter().zip(b).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max)
    }

    #[test]
    fn test_ldlt_quasi_definite() {
        let mat = quasi_definite();
        let b = vec![1.0, 2.0, 3.0];
        let mut x = b.clone();

        let mut solver = LdltSolver::new();
        solver.factorize_and_solve(&mat, &mut x).unwrap();

        let res = residual(&mat, &x, &b);
        assert!(res < 1e-12, "LDL^T residual too large: {}", res);
        assert_eq!(solver.d_values().map(|d| d.len()), Some(3));
    }

    #[test]
    fn test_lu_non_symmetric() {
        // [[0, 1], [2, 3]] needs a row swap.
        let mat = sparse::from_triplets(2, 2, vec![(0, 1, 1.0), (1, 0, 2.0), (1, 1, 3.0)]);
        let b = vec![1.0, 5.0];
        let mut x = b.clone();

        let mut solver = LuSolver::new();
        solver.factorize_and_solve(&mat, &mut x).unwrap();

        assert!((x[0] - 1.0).abs() < 1e-12, "x[0] = {}", x[0]);
        assert!((x[1] - 1.0).abs() < 1e-12, "x[1] = {}", x[1]);
    }

    #[test]
    fn test_lu_singular_is_error() {
        let mat = sparse::from_triplets(2, 2, vec![(0, 0, 1.0), (1, 0, 1.0)]);
        let mut x = vec![1.0, 1.0];

        let mut solver = LuSolver::new();
        let err = solver.factorize_and_solve(&mat, &mut x);
        assert!(matches!(err, Err(BackendError::SingularLu(2))), "got {:?}", err.err());
    }

    #[test]
    fn test_ldlt_zero_pivot_is_error() {
        let mat = sparse::from_triplets(2, 2, vec![(0, 1, 1.0), (1, 0, 1.0)]);
        let mut x = vec![1.0, 1.0];

        let mut solver = LdltSolver::new();
        assert!(solver.factorize_and_solve(&mat, &mut x).is_err());
    }

    #[test]
    fn test_solve_before_factorize() {
        let solver = new_solver(SolverKind::General);
        let mut x = vec![1.0];
        assert!(solver.solve_in_place(&mut x).is_err());
        assert_eq!(solver.kind(), SolverKind::General);
    }
}
