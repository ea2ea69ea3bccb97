//! Globalized semismooth Newton method with line search.
//!
//! Solves F(z) = 0 for a problem described by [`NewtonFunctions`]. Each
//! iteration computes a Newton-type direction d, tries the full step and falls
//! back to a line search on the merit function θ = ½||F_merit||² when the full
//! step does not decrease θ by the factor `sigma`. Directions whose slope is
//! not steep enough are replaced by the steepest descent direction -∇θ.
//!
//! Only two outcomes are errors: a problem missing the capabilities needed by
//! the chosen settings, and a starting point of the wrong size. A failed
//! linear solve is reported through [`NewtonStatus::LinearSolveFailed`].

pub mod functions;
pub mod line_search;

use log::{debug, info, warn};
use thiserror::Error;

use crate::diagnostics::{diagnostics_enabled, NewtonObserver, NoopObserver};
use crate::linalg::backend::{LinearSolver, LuSolver};
use crate::linalg::sparse::{self, SparseCsc};

pub use functions::{Capabilities, DirectionFailure, DirectionStrategy, NewtonFunctions};
pub use line_search::{
    Armijo, Goldstein, LineSearch, LineSearchContext, LineSearchKind, LineSearchResult, NonmonotoneReference,
    Trial,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NewtonError {
    #[error("missing capability: {0}")]
    MissingCapability(&'static str),
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Error measure compared against `tol` after every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppingCriterion {
    /// ||F_merit||
    Residual,
    /// ||∇θ||
    Stationarity,
    /// max(||F_merit||, ||∇θ||)
    Both,
    /// `NewtonFunctions::compute_error`
    User,
}

#[derive(Debug, Clone)]
pub struct NewtonSettings {
    pub max_iter: usize,
    pub tol: f64,
    pub criterion: StoppingCriterion,
    pub line_search: LineSearchKind,
    /// Search along the projected arc P(z + αd) instead of the ray.
    pub force_arcsearch: bool,
    /// First step size tried by the line search.
    pub alpha0: f64,
    pub alpha_min: f64,
    /// Number of past merit values in the nonmonotone reference, 0 for a
    /// monotone search.
    pub nonmonotone_window: usize,
    /// Exponent of the direction quality test ⟨∇θ, d⟩ ≤ -rho ||d||^p.
    pub p: f64,
    /// Full steps are accepted when θ(z + d) ≤ sigma θ(z).
    pub sigma: f64,
    pub rho: f64,
    pub check_dir_quality: bool,
    /// Keep the last assembled Jacobian in the workspace after each iteration.
    pub keep_jacobian: bool,
    pub verbose: bool,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        let max_iter = std::env::var("NONSMOOTH_NEWTON_MAX_ITER")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(1000);
        let tol = std::env::var("NONSMOOTH_NEWTON_TOL")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(1e-10);

        Self {
            max_iter,
            tol,
            criterion: StoppingCriterion::Residual,
            line_search: LineSearchKind::Armijo,
            force_arcsearch: false,
            alpha0: 2.0,
            alpha_min: 1e-16,
            nonmonotone_window: 0,
            p: 2.1,
            sigma: 0.9,
            rho: 1e-8,
            check_dir_quality: true,
            keep_jacobian: false,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStatus {
    Converged,
    MaxIterations,
    LinearSolveFailed,
}

impl NewtonStatus {
    /// Integer code: 0 converged, 1 not converged, 2 linear solve failure.
    pub fn info(&self) -> i32 {
        match self {
            NewtonStatus::Converged => 0,
            NewtonStatus::MaxIterations => 1,
            NewtonStatus::LinearSolveFailed => 2,
        }
    }
}

impl std::fmt::Display for NewtonStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NewtonStatus::Converged => write!(f, "converged"),
            NewtonStatus::MaxIterations => write!(f, "max iterations reached"),
            NewtonStatus::LinearSolveFailed => write!(f, "linear solve failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonResult {
    pub status: NewtonStatus,
    pub iterations: usize,
    /// Final error, or the merit value when the linear solve failed.
    pub residual: f64,
}

impl NewtonResult {
    pub fn info(&self) -> i32 {
        self.status.info()
    }
}

/// Origin of the direction used in an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionKind {
    /// Solution of the Newton system, or the problem's own direction
    Newton,
    /// Retry H d = -F_merit after the descent system failed
    MeritDescent,
    /// -∇θ
    Gradient,
}

/// How the step size of an iteration was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    /// Full step accepted without search
    Full,
    /// Line search accepted `alpha`
    LineSearch,
    /// Line search failed, unit step taken
    Restart,
}

/// Snapshot handed to the observer after every iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NewtonStats {
    pub iteration: usize,
    /// θ at the new iterate
    pub merit_value: f64,
    /// Step size, NaN when the line search failed
    pub alpha: f64,
    pub error: f64,
    pub direction: DirectionKind,
    pub step: StepKind,
}

/// Buffers of one Newton solve. Reusable across solves of the same size.
#[derive(Debug, Clone, Default)]
pub struct NewtonWorkspace {
    f: Vec<f64>,
    f_merit: Vec<f64>,
    grad: Vec<f64>,
    direction: Vec<f64>,
    trial: Vec<f64>,
    jacobian: Option<SparseCsc>,
    nonmonotone: NonmonotoneReference,
}

impl NewtonWorkspace {
    pub fn new(n: usize) -> Self {
        let mut ws = Self::default();
        ws.resize(n);
        ws
    }

    fn resize(&mut self, n: usize) {
        for v in [&mut self.f, &mut self.f_merit, &mut self.grad, &mut self.direction, &mut self.trial] {
            v.clear();
            v.resize(n, 0.0);
        }
    }

    /// F at the final iterate.
    pub fn residual(&self) -> &[f64] {
        &self.f
    }

    /// ∇θ of the last iteration.
    pub fn merit_gradient(&self) -> &[f64] {
        &self.grad
    }

    /// Last assembled Jacobian, kept only with `keep_jacobian`.
    pub fn jacobian(&self) -> Option<&SparseCsc> {
        self.jacobian.as_ref()
    }
}

/// Newton solver bound to a problem.
pub struct NewtonLsa<F: NewtonFunctions> {
    functions: F,
    settings: NewtonSettings,
    strategy: DirectionStrategy,
    capabilities: Capabilities,
    line_search: Box<dyn LineSearch>,
    lu: LuSolver,
}

impl<F: NewtonFunctions> NewtonLsa<F> {
    /// Check the problem's capabilities against `settings`.
    pub fn new(functions: F, settings: NewtonSettings) -> Result<Self, NewtonError> {
        let capabilities = functions.capabilities();

        let strategy = capabilities.direction_strategy().ok_or(NewtonError::MissingCapability(
            "compute_jacobian, compute_rhs_desc with compute_jacobian_desc, or compute_descent_direction",
        ))?;
        if capabilities.rhs_desc != capabilities.jacobian_desc {
            return Err(NewtonError::MissingCapability(
                "compute_rhs_desc and compute_jacobian_desc must be provided together",
            ));
        }
        if strategy != DirectionStrategy::Jacobian && !capabilities.jac_theta_merit && !capabilities.jacobian {
            return Err(NewtonError::MissingCapability(
                "compute_jac_theta_merit or compute_jacobian, needed for the merit gradient",
            ));
        }
        if settings.force_arcsearch && !capabilities.projection {
            return Err(NewtonError::MissingCapability("project_onto_set, needed by the arc search"));
        }

        let line_search = settings.line_search.build();
        Ok(Self {
            functions,
            settings,
            strategy,
            capabilities,
            line_search,
            lu: LuSolver::new(),
        })
    }

    /// Replace the step-size policy.
    pub fn with_line_search(mut self, line_search: Box<dyn LineSearch>) -> Self {
        self.line_search = line_search;
        self
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }

    pub fn strategy(&self) -> DirectionStrategy {
        self.strategy
    }

    pub fn functions(&self) -> &F {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut F {
        &mut self.functions
    }

    pub fn into_inner(self) -> F {
        self.functions
    }

    /// Solve from the starting point `z`, overwritten with the last iterate.
    pub fn solve(&mut self, z: &mut [f64]) -> Result<NewtonResult, NewtonError> {
        let mut ws = NewtonWorkspace::new(z.len());
        self.solve_with_workspace(z, &mut ws, &mut NoopObserver)
    }

    pub fn solve_with_observer(
        &mut self,
        z: &mut [f64],
        observer: &mut dyn NewtonObserver,
    ) -> Result<NewtonResult, NewtonError> {
        let mut ws = NewtonWorkspace::new(z.len());
        self.solve_with_workspace(z, &mut ws, observer)
    }

    pub fn solve_with_workspace(
        &mut self,
        z: &mut [f64],
        ws: &mut NewtonWorkspace,
        observer: &mut dyn NewtonObserver,
    ) -> Result<NewtonResult, NewtonError> {
        let n = self.functions.dim();
        if z.len() != n {
            return Err(NewtonError::DimensionMismatch {
                expected: n,
                actual: z.len(),
            });
        }
        ws.resize(n);
        ws.jacobian = None;
        ws.nonmonotone = NonmonotoneReference::new(self.settings.nonmonotone_window);

        let settings = &self.settings;
        let strategy = self.strategy;
        let caps = self.capabilities;
        let functions = &mut self.functions;
        let line_search = &mut self.line_search;
        let lu = &mut self.lu;
        let verbose = settings.verbose || diagnostics_enabled();

        let NewtonWorkspace {
            f,
            f_merit,
            grad,
            direction: d,
            trial,
            jacobian,
            nonmonotone,
        } = ws;

        // No gradient yet, keep the stationarity test from passing.
        grad.fill(0.0);
        if let Some(g0) = grad.first_mut() {
            *g0 = f64::MAX;
        }

        functions.compute_f(z, f);
        functions.compute_f_merit(z, f, f_merit);
        let mut theta = 0.5 * dot(f_merit, f_merit);
        let mut err = functions.compute_error(z, f, grad, settings.tol);
        nonmonotone.push(theta);

        if verbose {
            info!(
                "newton: n = {}, direction {:?}, line search {:?}{}, tol = {:.1e}",
                n,
                strategy,
                settings.line_search,
                if settings.force_arcsearch { " (arc)" } else { "" },
                settings.tol
            );
            info!("newton: initial merit {:.3e}, error {:.3e}", theta, err);
        }

        let mut iter = 0;
        let mut failed = false;

        while iter < settings.max_iter && !(err <= settings.tol) {
            iter += 1;

            // Direction
            let mut solved = match strategy {
                DirectionStrategy::Provided => match functions.compute_descent_direction(z, f) {
                    Ok(dir) if dir.len() == n => {
                        d.copy_from_slice(&dir);
                        true
                    }
                    _ => false,
                },
                DirectionStrategy::DescentSystem => {
                    let h = functions.compute_jacobian_desc(z, f);
                    let rhs = functions.compute_rhs_desc(z, f);
                    match (h, rhs) {
                        (Some(h), Some(rhs)) if rhs.len() == n => {
                            f_merit.copy_from_slice(&rhs);
                            let ok = solve_negated(lu, &h, f_merit, d);
                            *jacobian = Some(h);
                            ok
                        }
                        _ => false,
                    }
                }
                DirectionStrategy::Jacobian => match functions.compute_jacobian(z, f) {
                    Some(h) => {
                        sparse::spmv_transpose(&h, f_merit, grad, 1.0, 0.0);
                        let ok = solve_negated(lu, &h, f_merit, d);
                        *jacobian = Some(h);
                        ok
                    }
                    None => false,
                },
            };

            // Merit gradient for the directions not built from H
            if strategy != DirectionStrategy::Jacobian {
                let updated = if caps.jac_theta_merit {
                    match functions.compute_jac_theta_merit(z, f, f_merit) {
                        Some(g) if g.len() == n => {
                            grad.copy_from_slice(&g);
                            true
                        }
                        _ => false,
                    }
                } else {
                    match functions.compute_jacobian(z, f) {
                        Some(h) => {
                            functions.compute_f_merit(z, f, f_merit);
                            sparse::spmv_transpose(&h, f_merit, grad, 1.0, 0.0);
                            *jacobian = Some(h);
                            true
                        }
                        None => false,
                    }
                };
                if !updated {
                    warn!("newton iter {}: merit gradient unavailable, keeping the previous one", iter);
                }
            }

            let mut kind = DirectionKind::Newton;
            let mut retried = false;
            if !solved {
                if caps.rhs_desc {
                    retried = true;
                    kind = DirectionKind::MeritDescent;
                    solved = match jacobian.as_ref() {
                        Some(h) => solve_negated(lu, h, f_merit, d),
                        None => false,
                    };
                    debug!("newton iter {}: descent system failed, retry on -F_merit: {}", iter, solved);
                } else {
                    warn!("newton iter {}: linear solve for the direction failed", iter);
                    failed = true;
                    err = theta;
                    break;
                }
            }

            // Full step trial
            let theta_iter = if solved {
                for ((t, zi), di) in trial.iter_mut().zip(z.iter()).zip(d.iter()) {
                    *t = zi + di;
                }
                functions.compute_f(trial, f);
                functions.compute_f_merit(trial, f, f_merit);
                0.5 * dot(f_merit, f_merit)
            } else {
                kind = DirectionKind::Gradient;
                for (di, gi) in d.iter_mut().zip(grad.iter()) {
                    *di = -gi;
                }
                f64::INFINITY
            };

            let mut tau = 1.0;
            let mut step = StepKind::Full;
            if !(theta_iter <= settings.sigma * theta) || retried {
                let mut slope = dot(grad, d);
                let threshold = -settings.rho * norm(d).powf(settings.p);
                if settings.check_dir_quality && slope > threshold {
                    debug!(
                        "newton iter {}: direction slope {:.3e} above {:.3e}, using -grad",
                        iter, slope, threshold
                    );
                    for (di, gi) in d.iter_mut().zip(grad.iter()) {
                        *di = -gi;
                    }
                    slope = dot(grad, d);
                    kind = DirectionKind::Gradient;
                }

                let ctx = LineSearchContext {
                    merit_ref: if nonmonotone.is_enabled() {
                        nonmonotone.reference(theta)
                    } else {
                        theta
                    },
                    alpha0: settings.alpha0,
                    alpha_min: settings.alpha_min,
                };
                let arc = settings.force_arcsearch;
                let zc: &[f64] = z;
                let dc: &[f64] = d;
                let gc: &[f64] = grad;
                let mut eval = |alpha: f64| -> Option<Trial> {
                    for ((t, zi), di) in trial.iter_mut().zip(zc).zip(dc) {
                        *t = zi + alpha * di;
                    }
                    let predicted = if arc {
                        functions.project_onto_set(trial);
                        trial.iter().zip(zc).zip(gc).map(|((t, zi), gi)| gi * (t - zi)).sum::<f64>()
                    } else {
                        alpha * slope
                    };
                    functions.compute_f(trial, f);
                    functions.compute_f_merit(trial, f, f_merit);
                    let merit = 0.5 * dot(f_merit, f_merit);
                    merit.is_finite().then_some(Trial { merit, predicted })
                };

                let res = line_search.search(&ctx, &mut eval);
                tau = res.step();
                step = if res.accepted { StepKind::LineSearch } else { StepKind::Restart };
                if !res.accepted {
                    debug!("newton iter {}: line search failed, taking a unit step", iter);
                }
            }

            // Update
            let scale = if tau.is_finite() { tau } else { 1.0 };
            for (zi, di) in z.iter_mut().zip(d.iter()) {
                *zi += scale * di;
            }
            if settings.force_arcsearch {
                functions.project_onto_set(z);
            }

            functions.compute_f(z, f);
            functions.compute_f_merit(z, f, f_merit);
            theta = 0.5 * dot(f_merit, f_merit);
            nonmonotone.push(theta);

            err = match settings.criterion {
                StoppingCriterion::Residual => norm(f_merit),
                StoppingCriterion::Stationarity => norm(grad),
                StoppingCriterion::Both => norm(f_merit).max(norm(grad)),
                StoppingCriterion::User => functions.compute_error(z, f, grad, settings.tol),
            };

            if !settings.keep_jacobian {
                *jacobian = None;
            }

            debug!(
                "newton iter {}: merit={:.3e} tau={:.3e} err={:.3e} dir={:?} step={:?}",
                iter, theta, tau, err, kind, step
            );
            observer.on_iteration(&NewtonStats {
                iteration: iter,
                merit_value: theta,
                alpha: tau,
                error: err,
                direction: kind,
                step,
            });
        }

        let status = if failed {
            NewtonStatus::LinearSolveFailed
        } else if err <= settings.tol {
            NewtonStatus::Converged
        } else {
            NewtonStatus::MaxIterations
        };

        if verbose {
            info!("newton: {} after {} iterations, residual {:.3e}", status, iter, err);
        }

        Ok(NewtonResult {
            status,
            iterations: iter,
            residual: err,
        })
    }
}

/// d = -H⁻¹ b. Returns false when H cannot be factorized.
fn solve_negated(lu: &mut LuSolver, h: &SparseCsc, b: &[f64], d: &mut [f64]) -> bool {
    for (di, bi) in d.iter_mut().zip(b) {
        *di = -bi;
    }
    lu.factorize_and_solve(h, d).is_ok()
}

#[inline]
fn dot(x: &[f64], y: &[f64]) -> f64 {
    x.iter().zip(y).map(|(a, b)| a * b).sum()
}

#[inline]
fn norm(x: &[f64]) -> f64 {
    dot(x, x).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// F(z) = z, F_merit = F
    struct Identity {
        n: usize,
    }

    impl NewtonFunctions for Identity {
        fn dim(&self) -> usize {
            self.n
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                jacobian: true,
                ..Capabilities::default()
            }
        }

        fn compute_f(&mut self, z: &[f64], f: &mut [f64]) {
            f.copy_from_slice(z);
        }

        fn compute_f_merit(&mut self, _z: &[f64], f: &[f64], f_merit: &mut [f64]) {
            f_merit.copy_from_slice(f);
        }

        fn compute_error(&mut self, _z: &[f64], f: &[f64], _grad: &[f64], _tol: f64) -> f64 {
            norm(f)
        }

        fn compute_jacobian(&mut self, _z: &[f64], _f: &[f64]) -> Option<SparseCsc> {
            Some(sparse::identity(self.n))
        }
    }

    #[test]
    fn test_identity_converges_in_one_step() {
        let mut solver = NewtonLsa::new(Identity { n: 3 }, NewtonSettings::default()).unwrap();
        let mut z = vec![1.0, -2.0, 0.5];
        let mut seen = Vec::new();
        let res = solver
            .solve_with_observer(&mut z, &mut |s: &NewtonStats| seen.push(*s))
            .unwrap();

        assert_eq!(res.status, NewtonStatus::Converged);
        assert_eq!(res.iterations, 1);
        assert!(z.iter().all(|v| v.abs() < 1e-14), "z = {:?}", z);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].step, StepKind::Full);
        assert_eq!(seen[0].alpha, 1.0);
    }

    #[test]
    fn test_converged_start_skips_loop() {
        let mut solver = NewtonLsa::new(Identity { n: 2 }, NewtonSettings::default()).unwrap();
        let mut z = vec![0.0, 0.0];
        let res = solver.solve(&mut z).unwrap();
        assert_eq!(res.iterations, 0);
        assert_eq!(res.info(), 0);
    }

    #[test]
    fn test_dimension_mismatch() {
        let mut solver = NewtonLsa::new(Identity { n: 2 }, NewtonSettings::default()).unwrap();
        let mut z = vec![1.0; 3];
        assert_eq!(
            solver.solve(&mut z),
            Err(NewtonError::DimensionMismatch { expected: 2, actual: 3 })
        );
    }

    #[test]
    fn test_arc_search_requires_projection() {
        let settings = NewtonSettings {
            force_arcsearch: true,
            ..NewtonSettings::default()
        };
        assert!(matches!(
            NewtonLsa::new(Identity { n: 1 }, settings),
            Err(NewtonError::MissingCapability(_))
        ));
    }

    #[test]
    fn test_keep_jacobian() {
        let settings = NewtonSettings {
            keep_jacobian: true,
            ..NewtonSettings::default()
        };
        let mut solver = NewtonLsa::new(Identity { n: 2 }, settings).unwrap();
        let mut ws = NewtonWorkspace::new(2);
        let mut z = vec![1.0, 1.0];
        solver.solve_with_workspace(&mut z, &mut ws, &mut NoopObserver).unwrap();
        assert_eq!(ws.jacobian().map(|h| h.rows()), Some(2));

        let mut solver = NewtonLsa::new(Identity { n: 2 }, NewtonSettings::default()).unwrap();
        let mut z = vec![1.0, 1.0];
        solver.solve_with_workspace(&mut z, &mut ws, &mut NoopObserver).unwrap();
        assert!(ws.jacobian().is_none());
    }
}
