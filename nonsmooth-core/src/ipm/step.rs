//! Step length and centering rules.

use super::workspace::IpmWorkspace;
use crate::cones::{SocCone, SUB_DIM};
use crate::problem::IpmSettings;

/// Common damped step over the four sub-block families (u1, r1, u2, r2).
///
/// Primal and dual steps are equal: the result is used for both.
pub fn common_step_length(ws: &IpmWorkspace, gmm: f64) -> f64 {
    let cone = SocCone::new(SUB_DIM);
    let alpha_u1 = cone.step_length(&ws.velocity_1, &ws.d_velocity_1, gmm);
    let alpha_u2 = cone.step_length(&ws.velocity_2, &ws.d_velocity_2, gmm);
    let alpha_r1 = cone.step_length(&ws.reaction_1, &ws.d_reaction_1, gmm);
    let alpha_r2 = cone.step_length(&ws.reaction_2, &ws.d_reaction_2, gmm);
    alpha_u1.min(alpha_u2).min(alpha_r1).min(alpha_r2)
}

/// Barrier parameter after a trial step, (u + α du)ᵀ(r + α dr) / n.
pub fn barrier_after_step(ws: &IpmWorkspace, alpha: f64) -> f64 {
    let mut acc = 0.0;
    for i in 0..ws.u.len() {
        acc += (ws.u[i] + alpha * ws.du[i]) * (ws.r[i] + alpha * ws.dr[i]);
    }
    acc / ws.num_contacts() as f64
}

/// Centering parameter from the predictor step.
///
/// e = max(1, σ₂ α²) while the barrier is above σ₁, σ₃ afterwards;
/// σ = min(1, (μ_a / μ)^e) / 5.
pub fn centering(barr_param: f64, barr_param_a: f64, alpha: f64, settings: &IpmSettings) -> f64 {
    let e = if barr_param > settings.sigma_threshold {
        (settings.sigma_exponent_scale * alpha * alpha).max(1.0)
    } else {
        settings.sigma_exponent_floor
    };
    (barr_param_a / barr_param).powf(e).min(1.0) / 5.0
}

/// Damping factor for the next ratio test.
#[inline]
pub fn next_gamma(alpha: f64, settings: &IpmSettings) -> f64 {
    settings.gamma_base + settings.gamma_slope * alpha
}
