//! Primal-dual interior-point method for rolling friction-contact problems.
//!
//! Every contact cone is split into two second-order sub-blocks sharing the
//! normal reaction. Each iteration runs a Mehrotra-style predictor-corrector
//! step on one of two Newton systems:
//!
//! - Nesterov-Todd scaled, symmetric, LDLᵀ
//! - unscaled, non-symmetric, LU
//!
//! Numerical trouble (NaN in the iterate, failed factorization) ends the solve
//! with [`IpmStatus::NumericalError`]; only an invalid problem is an `Err`.

pub mod newton_system;
pub mod scaled;
pub mod step;
pub mod termination;
pub mod workspace;

use log::{debug, info, warn};
use thiserror::Error;

use crate::diagnostics::{diagnostics_enabled, IpmIterate, IpmIterationStats, IpmObserver, NoopObserver};
use crate::problem::{IpmInfo, IpmResult, IpmSettings, IpmStatus, RollingFrictionProblem};
use newton_system::{NewtonSystem, NewtonSystemError, NtScaledSystem, SystemLayout, UnscaledSystem};
use scaled::ScaledProblem;
use workspace::IpmWorkspace;

/// Full error below which NT scaling is dropped when finishing without scaling.
const FINISH_WITHOUT_SCALING_ERROR: f64 = 1e-6;

/// Initial damping factor of the ratio test.
const INITIAL_GAMMA: f64 = 0.999;

#[derive(Debug, Error)]
pub enum IpmError {
    #[error("invalid problem: {0}")]
    InvalidProblem(String),
}

/// Solve a rolling friction-contact problem.
pub fn solve_ipm(prob: &RollingFrictionProblem, settings: &IpmSettings) -> Result<IpmResult, IpmError> {
    solve_ipm_with_observer(prob, settings, &mut NoopObserver)
}

/// Solve, reporting every iteration to `observer`.
pub fn solve_ipm_with_observer(
    prob: &RollingFrictionProblem,
    settings: &IpmSettings,
    observer: &mut dyn IpmObserver,
) -> Result<IpmResult, IpmError> {
    prob.validate().map_err(IpmError::InvalidProblem)?;

    let data = ScaledProblem::new(prob, settings);
    if settings.report_problem_info {
        data.report(prob);
    }

    let m = data.num_velocities();
    let n = data.num_contacts();
    let layout = SystemLayout::new(m, n);
    let verbose = settings.verbose || diagnostics_enabled();

    let mut ws = IpmWorkspace::new(m, n);
    ws.set_starting_point();

    let mut nt_system = NtScaledSystem::new(layout, settings.nt_method);
    let mut plain_system = UnscaledSystem::new(layout);
    let mut use_nt = settings.nesterov_todd_scaling;
    let mut switched = false;

    let mut gmm = INITIAL_GAMMA;
    let mut last_full_error = f64::INFINITY;
    let mut info = IpmInfo::default();
    let mut status = IpmStatus::MaxIterations;
    let mut iteration = 0;

    if verbose {
        print_header(m, n, settings);
    }

    while iteration < settings.max_iter {
        if settings.finish_without_scaling
            && use_nt
            && !switched
            && last_full_error <= FINISH_WITHOUT_SCALING_ERROR
        {
            use_nt = false;
            switched = true;
            warn!(
                "iter {}: full error {:.2e} reached, finishing without NT scaling",
                iteration, last_full_error
            );
        }

        info = termination::compute_metrics(&data, &mut ws, settings.error_model);
        info.finished_without_scaling = switched;
        last_full_error = info.full_error;

        if termination::is_converged(&info, settings.tol) {
            if verbose {
                print_converged_row(iteration, switched, &info);
            }
            status = IpmStatus::Converged;
            break;
        }

        let system: &mut dyn NewtonSystem = if use_nt {
            &mut nt_system
        } else {
            &mut plain_system
        };

        // Predictor
        if let Err(e) = system.prepare(&data, &ws) {
            warn!("iter {}: Newton system assembly failed: {}", iteration, e);
            status = IpmStatus::NumericalError;
            break;
        }
        newton_system::predictor_rhs(&*system, layout, &mut ws);
        if let Err(e) = solve_direction(system, &mut ws) {
            warn!("iter {}: predictor solve failed: {}", iteration, e);
            status = IpmStatus::NumericalError;
            break;
        }

        let alpha_aff = step::common_step_length(&ws, gmm);
        gmm = step::next_gamma(alpha_aff, settings);
        let barr_param_a = step::barrier_after_step(&ws, alpha_aff);
        let sigma = step::centering(info.barr_param, barr_param_a, alpha_aff, settings);

        // Corrector
        newton_system::corrector_rhs(&*system, layout, &mut ws, info.barr_param, sigma);
        if let Err(e) = solve_direction(system, &mut ws) {
            warn!("iter {}: corrector solve failed: {}", iteration, e);
            status = IpmStatus::NumericalError;
            break;
        }

        let alpha = step::common_step_length(&ws, gmm);
        gmm = step::next_gamma(alpha, settings);

        let stats = IpmIterationStats {
            iteration,
            pinfeas: info.pinfeas,
            dinfeas: info.dinfeas,
            relgap: info.relgap,
            u1_dot_r1: info.u1_dot_r1,
            u2_dot_r2: info.u2_dot_r2,
            complem_1: info.complem_1,
            complem_2: info.complem_2,
            full_error: info.full_error,
            barr_param: info.barr_param,
            alpha_primal: alpha,
            alpha_dual: alpha,
            sigma,
            nesterov_todd_scaling: use_nt,
        };
        if verbose {
            print_row(&stats, switched);
        }
        debug!(
            "iter {}: alpha_aff={:.3e} sigma={:.3e} alpha={:.3e} gmm={:.4}",
            iteration, alpha_aff, sigma, alpha, gmm
        );
        observer.on_iteration(&stats);

        if let Err(s) = update_iterate(&mut ws, alpha, iteration) {
            status = s;
            break;
        }

        ws.refresh_sub_blocks();
        observer.on_iterate(&IpmIterate {
            iteration,
            velocity_1: &ws.velocity_1,
            velocity_2: &ws.velocity_2,
            reaction_1: &ws.reaction_1,
            reaction_2: &ws.reaction_2,
        });

        iteration += 1;
    }

    if status == IpmStatus::MaxIterations {
        info = termination::compute_metrics(&data, &mut ws, settings.error_model);
        info.finished_without_scaling = switched;
    }

    if verbose {
        info!("{}", "-".repeat(151));
        info!("status: {} after {} iterations, full error {:.3e}", status, iteration, info.full_error);
    }

    Ok(IpmResult {
        status,
        global_velocity: ws.v.clone(),
        velocity: data.unscale_velocity(&ws.u),
        reaction: data.unscale_reaction(&ws.r),
        t: ws.t.clone(),
        t_prime: ws.t_prime.clone(),
        iterations: iteration,
        info,
    })
}

/// Recompute the metrics of a returned point without iterating.
pub fn evaluate_result(
    prob: &RollingFrictionProblem,
    settings: &IpmSettings,
    result: &IpmResult,
) -> Result<IpmInfo, IpmError> {
    prob.validate().map_err(IpmError::InvalidProblem)?;
    let data = ScaledProblem::new(prob, settings);
    let n = data.num_contacts();
    let sizes_ok = result.global_velocity.len() == data.num_velocities()
        && result.velocity.len() == prob.H.rows()
        && result.reaction.len() == prob.H.rows()
        && result.t.len() == n
        && result.t_prime.len() == n;
    if !sizes_ok {
        return Err(IpmError::InvalidProblem("result dimensions do not match the problem".into()));
    }

    let mut ws = IpmWorkspace::new(data.num_velocities(), n);
    ws.load_point(
        &result.global_velocity,
        &data.scale_velocity(&result.velocity),
        &data.scale_reaction(&result.reaction),
        &result.t,
        &result.t_prime,
    );
    Ok(termination::compute_metrics(&data, &mut ws, settings.error_model))
}

/// Take the step and reject an iterate that overflowed.
fn update_iterate(ws: &mut IpmWorkspace, alpha: f64, iteration: usize) -> Result<(), IpmStatus> {
    ws.apply_step(alpha, alpha);
    if ws.iterate_is_finite() {
        Ok(())
    } else {
        warn!("iter {}: non-finite values in the iterate", iteration);
        Err(IpmStatus::NumericalError)
    }
}

/// Solve the system in `ws.rhs` and unpack the direction.
fn solve_direction(system: &mut dyn NewtonSystem, ws: &mut IpmWorkspace) -> Result<(), NewtonSystemError> {
    let mut rhs = std::mem::take(&mut ws.rhs);
    let result = system.solve(&mut rhs);
    if result.is_ok() {
        ws.unpack_direction(&rhs);
    }
    ws.rhs = rhs;
    result
}

fn print_header(m: usize, n: usize, settings: &IpmSettings) {
    info!("rolling friction IPM: m = {}, n = {}, tol = {:.1e}", m, n, settings.tol);
    info!(
        "NT scaling: {} ({:?}), finish without scaling: {}",
        settings.nesterov_todd_scaling, settings.nt_method, settings.finish_without_scaling
    );
    info!("{}", "-".repeat(151));
    info!(
        "| {:>4} | {:>9} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} | {:>8} |",
        "it", "rel gap", "pinfeas", "dinfeas", "<u1,r1>", "<u2,r2>", "|u1or1|", "|u2or2|", "full err",
        "barr", "alpha_p", "alpha_d", "sigma"
    );
    info!("{}", "-".repeat(151));
}

fn print_row(stats: &IpmIterationStats, switched: bool) {
    info!(
        "| {:>3}{} | {:9.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} |",
        stats.iteration,
        if switched { '*' } else { ' ' },
        stats.relgap,
        stats.pinfeas,
        stats.dinfeas,
        stats.u1_dot_r1,
        stats.u2_dot_r2,
        stats.complem_1,
        stats.complem_2,
        stats.full_error,
        stats.barr_param,
        stats.alpha_primal,
        stats.alpha_dual,
        stats.sigma,
    );
}

fn print_converged_row(iteration: usize, switched: bool, info: &IpmInfo) {
    info!(
        "| {:>3}{} | {:9.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} | {:.2e} |",
        iteration,
        if switched { '*' } else { ' ' },
        info.relgap,
        info.pinfeas,
        info.dinfeas,
        info.u1_dot_r1,
        info.u2_dot_r2,
        info.complem_1,
        info.complem_2,
        info.full_error,
        info.barr_param,
    );
}
