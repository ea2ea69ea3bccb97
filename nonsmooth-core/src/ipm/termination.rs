//! Residuals, iteration metrics and the convergence test.
//!
//! All quantities except the full error are measured in the scaled
//! variables. The full error maps the iterate back to the original variables
//! and measures the complementarity through the natural map
//! r - Π_K(r - û).

use super::scaled::ScaledProblem;
use super::workspace::IpmWorkspace;
use crate::cones::{jordan, RollingFrictionCone, CONTACT_DIM, SUB_DIM};
use crate::linalg::sparse;
use crate::problem::{ErrorModel, IpmInfo};

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(ai, bi)| ai * bi).sum()
}

#[inline]
fn norm2(v: &[f64]) -> f64 {
    dot(v, v).sqrt()
}

/// Relative residual with a guard against an all-zero scale.
#[inline]
fn relative(residual: f64, scale: f64) -> f64 {
    if scale > 0.0 {
        residual / scale
    } else {
        residual
    }
}

/// Fill the residual buffers of `ws` and return (pinfeas, dinfeas).
///
/// - primal: u - H̃ v - w̃, relative to max(||u||, ||w̃||, ||H̃ v||)
/// - dual: M v - H̃^T r + f, relative to max(||M v||, ||H̃^T r||, ||f||)
pub fn compute_residuals(data: &ScaledProblem, ws: &mut IpmWorkspace) -> (f64, f64) {
    sparse::spmv(&data.H, &ws.v, &mut ws.hv, 1.0, 0.0);
    for i in 0..ws.primal_residual.len() {
        ws.primal_residual[i] = ws.u[i] - ws.hv[i] - data.w[i];
    }
    let pscale = norm2(&ws.u).max(norm2(&data.w)).max(norm2(&ws.hv));
    let pinfeas = relative(norm2(&ws.primal_residual), pscale);

    sparse::spmv(&data.M, &ws.v, &mut ws.mv, 1.0, 0.0);
    sparse::spmv_transpose(&data.H, &ws.r, &mut ws.htr, 1.0, 0.0);
    for i in 0..ws.dual_residual.len() {
        ws.dual_residual[i] = ws.mv[i] - ws.htr[i] + data.f[i];
    }
    let dscale = norm2(&ws.mv).max(norm2(&ws.htr)).max(norm2(data.f));
    let dinfeas = relative(norm2(&ws.dual_residual), dscale);

    (pinfeas, dinfeas)
}

/// Relative gap between the primal and dual objectives:
///
/// pval = ½ vᵀM v + fᵀv, dval = -½ vᵀM v - w̃ᵀr,
/// relgap = |pval - dval| / (1 + |pval| + |dval|)
///
/// Expects `ws.mv` to hold M v.
pub fn relative_gap(data: &ScaledProblem, ws: &IpmWorkspace) -> f64 {
    let vmv = dot(&ws.v, &ws.mv);
    let pval = 0.5 * vmv + dot(data.f, &ws.v);
    let dval = -0.5 * vmv - dot(&data.w, &ws.r);
    (pval - dval).abs() / (1.0 + pval.abs() + dval.abs())
}

/// Barrier parameter uᵀr / n.
pub fn barrier_parameter(u: &[f64], r: &[f64], n: usize) -> f64 {
    dot(u, r) / n as f64
}

/// Metrics of the current iterate. Refreshes sub-blocks and residuals.
pub fn compute_metrics(data: &ScaledProblem, ws: &mut IpmWorkspace, model: ErrorModel) -> IpmInfo {
    ws.refresh_sub_blocks();
    let (pinfeas, dinfeas) = compute_residuals(data, ws);
    let relgap = relative_gap(data, ws);

    let u_orig = data.unscale_velocity(&ws.u);
    let r_orig = data.unscale_reaction(&ws.r);
    let comp = complementarity_error(data.mu, data.mu_r, &u_orig, &r_orig, model);

    IpmInfo {
        pinfeas,
        dinfeas,
        u1_dot_r1: dot(&ws.velocity_1, &ws.reaction_1),
        u2_dot_r2: dot(&ws.velocity_2, &ws.reaction_2),
        complem_1: jordan::product_norm(&ws.velocity_1, &ws.reaction_1, SUB_DIM),
        complem_2: jordan::product_norm(&ws.velocity_2, &ws.reaction_2, SUB_DIM),
        barr_param: barrier_parameter(&ws.u, &ws.r, ws.num_contacts()),
        relgap,
        full_error: pinfeas.max(dinfeas).max(comp),
        finished_without_scaling: false,
    }
}

/// Convergence test: max(pinfeas, dinfeas, <u1, r1>, <u2, r2>) <= tol.
///
/// Pure, evaluating it twice on the same metrics gives the same answer.
/// A NaN metric never passes.
pub fn is_converged(info: &IpmInfo, tol: f64) -> bool {
    [info.pinfeas, info.dinfeas, info.u1_dot_r1, info.u2_dot_r2]
        .iter()
        .all(|&x| x <= tol)
}

/// Relative natural-map residual in original variables:
///
/// sqrt(Σ_i ||r_i - Π_{K_i}(r_i - û_i)||²) / max(1, ||r||)
pub fn complementarity_error(
    mu: &[f64],
    mu_r: &[f64],
    u: &[f64],
    r: &[f64],
    model: ErrorModel,
) -> f64 {
    assert_eq!(u.len(), r.len());
    assert_eq!(u.len(), mu.len() * CONTACT_DIM);

    let mut sum = 0.0;
    for (i, (ub, rb)) in u
        .chunks_exact(CONTACT_DIM)
        .zip(r.chunks_exact(CONTACT_DIM))
        .enumerate()
    {
        let cone = RollingFrictionCone::new(mu[i], mu_r[i]);

        let mut u_hat = [ub[0], ub[1], ub[2], ub[3], ub[4]];
        if model == ErrorModel::NonSmooth {
            u_hat[0] += mu[i] * ub[1].hypot(ub[2]) + mu_r[i] * ub[3].hypot(ub[4]);
        }

        let mut y = [0.0; CONTACT_DIM];
        for k in 0..CONTACT_DIM {
            y[k] = rb[k] - u_hat[k];
        }
        let proj = cone.project(&y);
        for k in 0..CONTACT_DIM {
            sum += (rb[k] - proj[k]).powi(2);
        }
    }

    sum.sqrt() / norm2(r).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problem::{IpmSettings, RollingFrictionProblem};

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
    fn test_residuals_at_starting_point() {
        let prob = single_contact();
        let data = ScaledProblem::new(&prob, &IpmSettings::default());
        let mut ws = IpmWorkspace::new(5, 1);
        ws.set_starting_point();

        compute_residuals(&data, &mut ws);

        // u - P_mu v - 0
        let expected = [3.0 - 0.01, 0.001 - 0.005, 0.001 - 0.005, 0.001 - 0.001, 0.001 - 0.001];
        for (a, b) in ws.primal_residual.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-15, "primal residual = {:?}", ws.primal_residual);
        }
        // v - P_mu r + f
        assert!((ws.dual_residual[0] - (0.01 - 0.5 - 1.0)).abs() < 1e-15);
        assert!((ws.dual_residual[1] - (0.01 - 0.02 + 0.1)).abs() < 1e-15);
    }

    #[test]
    fn test_convergence_check_is_pure() {
        let info = IpmInfo {
            pinfeas: 1e-12,
            dinfeas: 5e-11,
            u1_dot_r1: 2e-11,
            u2_dot_r2: 1e-13,
            ..IpmInfo::default()
        };
        let first = is_converged(&info, 1e-10);
        let second = is_converged(&info, 1e-10);
        assert!(first);
        assert_eq!(first, second);
        assert!(!is_converged(&info, 1e-11));

        let nan = IpmInfo {
            dinfeas: f64::NAN,
            ..info
        };
        assert!(!is_converged(&nan, 1e-10));
    }

    #[test]
    fn test_complementarity_error_zero_at_solution() {
        // r on the boundary, u in the dual cone and orthogonal to r:
        // r = (1, 0.5, 0, 0, 0), u = (0.5, -1, 0, 0, 0) with μ = 0.5.
        let r = [1.0, 0.5, 0.0, 0.0, 0.0];
        let u = [0.5, -1.0, 0.0, 0.0, 0.0];
        let err = complementarity_error(&[0.5], &[0.1], &u, &r, ErrorModel::Convex);
        assert!(err < 1e-14, "err = {}", err);
    }

    #[test]
    fn test_complementarity_error_positive_off_solution() {
        let r = [1.0, 0.0, 0.0, 0.0, 0.0];
        let u = [1.0, 0.0, 0.0, 0.0, 0.0];
        let err = complementarity_error(&[0.5], &[0.1], &u, &r, ErrorModel::Convex);
        assert!((err - 1.0).abs() < 1e-14, "err = {}", err);
    }

    #[test]
    fn test_non_smooth_model_shifts_normal_velocity() {
        // Sliding contact: u = (0, 1, 0, 0, 0), r on the boundary opposing it.
        let r = [1.0, -0.5, 0.0, 0.0, 0.0];
        let u = [0.0, 1.0, 0.0, 0.0, 0.0];
        let convex = complementarity_error(&[0.5], &[0.1], &u, &r, ErrorModel::Convex);
        let shifted = complementarity_error(&[0.5], &[0.1], &u, &r, ErrorModel::NonSmooth);
        assert!(shifted < 1e-14, "shifted = {}", shifted);
        assert!(convex > 1e-3, "convex = {}", convex);
    }
}
