//! Nonsmooth-core: interior-point and semismooth Newton solvers for
//! contact mechanics
//!
//! The crate provides two solvers:
//!
//! - **Rolling friction IPM**: a primal-dual interior-point method for the
//!   global rolling friction-contact problem
//!
//!   ```text
//!   M v - Hᵀ r + f = 0,    u = H v + w,    K* ∋ u ⟂ r ∈ K
//!   ```
//!
//!   where K is a product of 5-dimensional rolling friction cones, each
//!   written as two 3-dimensional second-order cones sharing the normal
//!   component.
//! - **Newton core**: a globalized Newton method with line search for
//!   nonsmooth equations F(z) = 0, driven by a capability trait.
//!
//! # Algorithm
//!
//! The IPM runs Mehrotra predictor-corrector steps on one of two Newton
//! systems:
//!
//! - **Nesterov-Todd scaling**, symmetric quasi-definite, solved by LDLᵀ
//! - **Unscaled**, non-symmetric, solved by LU
//!
//! Near convergence the NT-scaled system may be dropped for the unscaled one
//! ("finish without scaling").
//!
//! # Example
//!
//! ```ignore
//! use nonsmooth_core::{solve_ipm, IpmSettings, RollingFrictionProblem};
//! use nonsmooth_core::linalg::sparse;
//!
//! let prob = RollingFrictionProblem {
//!     M: sparse::identity(5),
//!     H: sparse::identity(5),
//!     f: vec![-1.0, 0.1, 0.0, 0.05, 0.0],
//!     w: vec![0.0; 5],
//!     mu: vec![0.5],
//!     mu_r: vec![0.1],
//! };
//!
//! let result = solve_ipm(&prob, &IpmSettings::default())?;
//! println!("Status: {} in {} iterations", result.status, result.iterations);
//! println!("Reaction: {:?}", result.reaction);
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

pub mod cones;
pub mod diagnostics;
pub mod ipm;
pub mod linalg;
pub mod newton;
pub mod problem;
pub mod scaling;

pub use diagnostics::{IpmIterate, IpmIterationStats, IpmObserver, NewtonObserver, NoopObserver};
pub use ipm::{evaluate_result, solve_ipm, solve_ipm_with_observer, IpmError};
pub use newton::{
    Capabilities, NewtonError, NewtonFunctions, NewtonLsa, NewtonResult, NewtonSettings, NewtonStats,
    NewtonStatus, NewtonWorkspace, StoppingCriterion,
};
pub use problem::{ErrorModel, IpmInfo, IpmResult, IpmSettings, IpmStatus, RollingFrictionProblem};
