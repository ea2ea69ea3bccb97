//! Step-size policies for the globalized Newton method.
//!
//! A policy receives the reference merit value and a trial evaluator. The
//! evaluator moves to the trial point for a given step size (along the ray
//! z + αd, or along the projected arc P(z + αd)) and returns the merit there
//! together with the predicted first-order decrease.

use std::collections::VecDeque;

/// Merit value at a trial step and the linear model's predicted change.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Trial {
    pub merit: f64,
    /// α⟨∇θ, d⟩ on a ray, ⟨∇θ, z(α) - z⟩ on an arc. Negative for descent.
    pub predicted: f64,
}

/// Per-iteration input of a line search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSearchContext {
    /// θ, or the nonmonotone reference built from recent θ values
    pub merit_ref: f64,
    pub alpha0: f64,
    pub alpha_min: f64,
}

/// Outcome of a line search.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSearchResult {
    pub accepted: bool,
    pub alpha: f64,
}

impl LineSearchResult {
    fn failed() -> Self {
        Self {
            accepted: false,
            alpha: f64::NAN,
        }
    }

    /// Accepted step size, NaN when the search failed.
    pub fn step(&self) -> f64 {
        if self.accepted {
            self.alpha
        } else {
            f64::NAN
        }
    }
}

/// Policy interface for selecting a step size.
///
/// `eval(alpha)` returns `None` when the trial merit is not finite.
pub trait LineSearch {
    fn search(&mut self, ctx: &LineSearchContext, eval: &mut dyn FnMut(f64) -> Option<Trial>) -> LineSearchResult;
}

/// Which policy the solver builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearchKind {
    Armijo,
    Goldstein,
}

impl LineSearchKind {
    pub fn build(self) -> Box<dyn LineSearch> {
        match self {
            LineSearchKind::Armijo => Box::new(Armijo::default()),
            LineSearchKind::Goldstein => Box::new(Goldstein::default()),
        }
    }
}

/// Backtracking with halving: θ(α) ≤ θ_ref + γ predicted(α).
#[derive(Clone, Copy, Debug)]
pub struct Armijo {
    pub gamma: f64,
    pub beta: f64,
}

impl Default for Armijo {
    fn default() -> Self {
        Self { gamma: 1e-4, beta: 0.5 }
    }
}

impl LineSearch for Armijo {
    fn search(&mut self, ctx: &LineSearchContext, eval: &mut dyn FnMut(f64) -> Option<Trial>) -> LineSearchResult {
        let mut alpha = ctx.alpha0;
        while alpha >= ctx.alpha_min {
            if let Some(trial) = eval(alpha) {
                if trial.merit <= ctx.merit_ref + self.gamma * trial.predicted {
                    return LineSearchResult { accepted: true, alpha };
                }
            }
            alpha *= self.beta;
        }
        LineSearchResult::failed()
    }
}

/// Goldstein test by bisection and extrapolation:
///
/// θ_ref + (1 - c) predicted(α) ≤ θ(α) ≤ θ_ref + γ predicted(α)
#[derive(Clone, Copy, Debug)]
pub struct Goldstein {
    pub gamma: f64,
    pub c: f64,
    pub alpha_max: f64,
    pub max_iter: usize,
}

impl Default for Goldstein {
    fn default() -> Self {
        Self {
            gamma: 1e-4,
            c: 0.1,
            alpha_max: 1e4,
            max_iter: 100,
        }
    }
}

impl LineSearch for Goldstein {
    fn search(&mut self, ctx: &LineSearchContext, eval: &mut dyn FnMut(f64) -> Option<Trial>) -> LineSearchResult {
        let mut lo = 0.0;
        let mut hi = f64::INFINITY;
        let mut alpha = ctx.alpha0;

        for _ in 0..self.max_iter {
            if alpha < ctx.alpha_min {
                break;
            }
            match eval(alpha) {
                Some(trial) if trial.merit > ctx.merit_ref + self.gamma * trial.predicted => {
                    hi = alpha;
                    alpha = 0.5 * (lo + hi);
                }
                None => {
                    hi = alpha;
                    alpha = 0.5 * (lo + hi);
                }
                Some(trial) if trial.merit < ctx.merit_ref + (1.0 - self.c) * trial.predicted => {
                    lo = alpha;
                    alpha = if hi.is_finite() {
                        0.5 * (lo + hi)
                    } else {
                        (2.0 * alpha).min(self.alpha_max)
                    };
                    if lo >= self.alpha_max {
                        return LineSearchResult { accepted: true, alpha: lo };
                    }
                }
                Some(_) => return LineSearchResult { accepted: true, alpha },
            }
        }

        // Bracket exhausted: the last step satisfying the sufficient decrease
        // test is still a valid Armijo step.
        if lo > 0.0 {
            LineSearchResult { accepted: true, alpha: lo }
        } else {
            LineSearchResult::failed()
        }
    }
}

/// Reference merit of a nonmonotone search: max of the last `window` values.
#[derive(Clone, Debug, Default)]
pub struct NonmonotoneReference {
    window: usize,
    history: VecDeque<f64>,
}

impl NonmonotoneReference {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            history: VecDeque::with_capacity(window),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.window > 0
    }

    pub fn push(&mut self, theta: f64) {
        if self.window == 0 {
            return;
        }
        if self.history.len() == self.window {
            self.history.pop_front();
        }
        self.history.push_back(theta);
    }

    /// max(θ, recent values) when enabled, θ otherwise.
    pub fn reference(&self, theta: f64) -> f64 {
        self.history.iter().copied().fold(theta, f64::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(merit_ref: f64) -> LineSearchContext {
        LineSearchContext {
            merit_ref,
            alpha0: 2.0,
            alpha_min: 1e-16,
        }
    }

    /// θ(α) = ½ (1 - α)² along d = 1 from z = -1 ... minimized at α = 1.
    fn quadratic(alpha: f64) -> Option<Trial> {
        Some(Trial {
            merit: 0.5 * (1.0 - alpha).powi(2),
            predicted: -alpha,
        })
    }

    #[test]
    fn test_armijo_halves_from_alpha0() {
        let mut ls = Armijo::default();
        let mut tried = Vec::new();
        let res = ls.search(&ctx(0.5), &mut |a| {
            tried.push(a);
            quadratic(a)
        });
        // α = 2 gives θ = 0.5 > 0.5 - 2e-4, α = 1 accepted.
        assert!(res.accepted);
        assert_eq!(res.alpha, 1.0);
        assert_eq!(tried, vec![2.0, 1.0]);
    }

    #[test]
    fn test_armijo_fails_with_nan() {
        let mut ls = Armijo::default();
        let res = ls.search(&ctx(0.5), &mut |a| Some(Trial { merit: 1.0, predicted: -a }));
        assert!(!res.accepted);
        assert!(res.step().is_nan());
    }

    #[test]
    fn test_armijo_skips_non_finite_trials() {
        let mut ls = Armijo::default();
        let res = ls.search(&ctx(0.5), &mut |a| if a > 1.0 { None } else { quadratic(a) });
        assert!(res.accepted);
        assert_eq!(res.alpha, 1.0);
    }

    #[test]
    fn test_goldstein_extrapolates_short_steps() {
        // θ(α) = ½(4 - α)²/16 with minimizer at α = 4.
        let mut ls = Goldstein::default();
        let c = LineSearchContext {
            alpha0: 0.25,
            ..ctx(0.5)
        };
        let res = ls.search(&c, &mut |a| {
            Some(Trial {
                merit: 0.5 * (4.0 - a).powi(2) / 16.0,
                predicted: -0.25 * a,
            })
        });
        assert!(res.accepted);
        let theta = 0.5 * (4.0 - res.alpha).powi(2) / 16.0;
        assert!(theta <= 0.5 - 1e-4 * 0.25 * res.alpha);
        assert!(theta >= 0.5 - 0.9 * 0.25 * res.alpha);
        assert!(res.alpha > 0.25);
    }

    #[test]
    fn test_nonmonotone_reference() {
        let mut nm = NonmonotoneReference::new(2);
        assert_eq!(nm.reference(1.0), 1.0);
        nm.push(5.0);
        nm.push(3.0);
        assert_eq!(nm.reference(1.0), 5.0);
        nm.push(2.0);
        assert_eq!(nm.reference(1.0), 3.0);

        let off = NonmonotoneReference::new(0);
        assert!(!off.is_enabled());
        assert_eq!(off.reference(1.0), 1.0);
    }
}
