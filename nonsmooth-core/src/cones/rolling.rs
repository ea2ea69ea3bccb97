//! Rolling friction cone.
//!
//! Each contact carries a 5-dimensional block (r0, r̄, r̃) with r̄ the two
//! tangential components and r̃ the two rolling-resistance components:
//!
//! K_{μ,μr} = {(r0, r̄, r̃) : ||r̄|| ≤ μ r0, ||r̃|| ≤ μr r0}
//!
//! After the change of variables P_mu = diag(1, μ, μ, μr, μr) the cone is the
//! intersection of two 3-dimensional second-order cones sharing the leading
//! coordinate. The IPM splits every block into those two sub-blocks, with an
//! auxiliary leading coordinate (t or t′) on the velocity side.

/// Dimension of one contact block.
pub const CONTACT_DIM: usize = 5;

/// Dimension of each second-order sub-block.
pub const SUB_DIM: usize = CONTACT_DIM - 2;

/// One of the two overlapping sub-blocks of a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubBlock {
    /// (·, r̄): entries 1 and 2 of the contact block.
    Sliding,
    /// (·, r̃): entries 3 and 4 of the contact block.
    Rolling,
}

impl SubBlock {
    /// Offset of the first tail entry inside a contact block.
    #[inline]
    pub fn offset(self) -> usize {
        match self {
            SubBlock::Sliding => 1,
            SubBlock::Rolling => 3,
        }
    }
}

/// Pack sub-block `which` of every contact of `x` into `out`.
///
/// `out[3i]` is `lead[i]` when given, else `x[5i]`; the two remaining entries
/// are copied from the contact block.
pub fn extract_sub_block(x: &[f64], lead: Option<&[f64]>, which: SubBlock, out: &mut [f64]) {
    assert_eq!(x.len() % CONTACT_DIM, 0);
    let n = x.len() / CONTACT_DIM;
    assert_eq!(out.len(), n * SUB_DIM);
    if let Some(lead) = lead {
        assert_eq!(lead.len(), n);
    }

    let off = which.offset();
    for (i, (xb, ob)) in x
        .chunks_exact(CONTACT_DIM)
        .zip(out.chunks_exact_mut(SUB_DIM))
        .enumerate()
    {
        ob[0] = lead.map_or(xb[0], |l| l[i]);
        ob[1] = xb[off];
        ob[2] = xb[off + 1];
    }
}

/// Diagonal of P_mu, (1, μ, μ, μr, μr) per contact.
pub fn p_mu_diagonal(mu: &[f64], mu_r: &[f64]) -> Vec<f64> {
    assert_eq!(mu.len(), mu_r.len());
    mu.iter()
        .zip(mu_r)
        .flat_map(|(&m, &mr)| [1.0, m, m, mr, mr])
        .collect()
}

/// Rolling friction cone of one contact.
#[derive(Debug, Clone, Copy)]
pub struct RollingFrictionCone {
    pub mu: f64,
    pub mu_r: f64,
}

impl RollingFrictionCone {
    pub fn new(mu: f64, mu_r: f64) -> Self {
        assert!(mu >= 0.0 && mu_r >= 0.0, "friction coefficients must be non-negative");
        Self { mu, mu_r }
    }

    pub fn contains(&self, r: &[f64], tol: f64) -> bool {
        assert_eq!(r.len(), CONTACT_DIM);
        let bar = r[1].hypot(r[2]);
        let tilde = r[3].hypot(r[4]);
        r[0] >= -tol && bar <= self.mu * r[0] + tol && tilde <= self.mu_r * r[0] + tol
    }

    /// Euclidean projection of `y` onto the cone.
    ///
    /// For a fixed r0 the tails are projected onto their balls, leaving the
    /// convex piecewise quadratic
    /// φ(r0) = (r0 - y0)² + (||ȳ|| - μ r0)₊² + (||ỹ|| - μr r0)₊²
    /// to minimize over r0 ≥ 0.
    pub fn project(&self, y: &[f64]) -> [f64; CONTACT_DIM] {
        assert_eq!(y.len(), CONTACT_DIM);

        let a = y[1].hypot(y[2]);
        let b = y[3].hypot(y[4]);
        let (mu, mu_r) = (self.mu, self.mu_r);

        let phi = |r0: f64| {
            (r0 - y[0]).powi(2) + (a - mu * r0).max(0.0).powi(2) + (b - mu_r * r0).max(0.0).powi(2)
        };

        let mut breaks = vec![0.0];
        for (norm, coef) in [(a, mu), (b, mu_r)] {
            if coef > 0.0 {
                breaks.push(norm / coef);
            }
        }
        breaks.push(f64::INFINITY);
        breaks.sort_by(|p, q| p.total_cmp(q));

        let mut best_r0 = 0.0;
        let mut best_phi = phi(0.0);
        for window in breaks.windows(2) {
            let (lo, hi) = (window[0], window[1]);
            if hi <= lo {
                continue;
            }
            let mid = if hi.is_finite() { 0.5 * (lo + hi) } else { lo + 1.0 };

            // Stationary point of the quadratic piece active on (lo, hi).
            let mut num = y[0];
            let mut den = 1.0;
            if a - mu * mid > 0.0 {
                num += mu * a;
                den += mu * mu;
            }
            if b - mu_r * mid > 0.0 {
                num += mu_r * b;
                den += mu_r * mu_r;
            }
            let r0 = (num / den).clamp(lo, hi);
            let value = phi(r0);
            if value < best_phi {
                best_phi = value;
                best_r0 = r0;
            }
        }

        let shrink = |norm: f64, radius: f64| if norm > radius { radius / norm } else { 1.0 };
        let s_bar = shrink(a, mu * best_r0);
        let s_tilde = shrink(b, mu_r * best_r0);

        [
            best_r0,
            s_bar * y[1],
            s_bar * y[2],
            s_tilde * y[3],
            s_tilde * y[4],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_sub_blocks() {
        let x = [10.0, 1.0, 2.0, 3.0, 4.0, 20.0, 5.0, 6.0, 7.0, 8.0];
        let t = [0.5, 0.25];
        let mut out = [0.0; 6];

        extract_sub_block(&x, Some(&t), SubBlock::Sliding, &mut out);
        assert_eq!(out, [0.5, 1.0, 2.0, 0.25, 5.0, 6.0]);

        extract_sub_block(&x, None, SubBlock::Rolling, &mut out);
        assert_eq!(out, [10.0, 3.0, 4.0, 20.0, 7.0, 8.0]);
    }

    #[test]
    fn test_p_mu_diagonal() {
        let d = p_mu_diagonal(&[0.5, 0.3], &[0.1, 0.2]);
        assert_eq!(d, vec![1.0, 0.5, 0.5, 0.1, 0.1, 1.0, 0.3, 0.3, 0.2, 0.2]);
    }

    #[test]
    fn test_project_inside_is_identity() {
        let cone = RollingFrictionCone::new(0.5, 0.1);
        let y = [2.0, 0.3, -0.4, 0.05, 0.1];
        let p = cone.project(&y);
        for (a, b) in p.iter().zip(&y) {
            assert!((a - b).abs() < 1e-14, "projection moved an interior point: {:?}", p);
        }
    }

    #[test]
    fn test_project_polar_goes_to_origin() {
        let cone = RollingFrictionCone::new(0.5, 0.1);
        let p = cone.project(&[-1.0, 0.1, 0.0, 0.0, 0.01]);
        assert!(p.iter().all(|v| v.abs() < 1e-14), "p = {:?}", p);
    }

    #[test]
    fn test_project_single_active_ball() {
        // Only the sliding part is outside: reduces to a 3D SOC projection
        // onto ||r̄|| ≤ r0 (μ = 1) with the rolling tail unchanged.
        let cone = RollingFrictionCone::new(1.0, 1.0);
        let p = cone.project(&[1.0, 3.0, 0.0, 0.1, 0.0]);

        // SOC projection of (1, 3): ((1 + 3) / 2) * (1, 1) = (2, 2)
        assert!((p[0] - 2.0).abs() < 1e-12, "p = {:?}", p);
        assert!((p[1] - 2.0).abs() < 1e-12, "p = {:?}", p);
        assert!((p[3] - 0.1).abs() < 1e-12, "p = {:?}", p);
        assert!(cone.contains(&p, 1e-12));
    }

    #[test]
    fn test_project_is_optimal_against_samples() {
        let cone = RollingFrictionCone::new(0.3, 0.05);
        let y = [0.2, 1.0, -0.5, 0.4, 0.3];
        let p = cone.project(&y);
        assert!(cone.contains(&p, 1e-12));

        let dist = |z: &[f64]| z.iter().zip(&y).map(|(a, b)| (a - b).powi(2)).sum::<f64>();
        let d_best = dist(&p);
        let (a, b) = (y[1].hypot(y[2]), y[3].hypot(y[4]));
        for k in 0..50 {
            // Best feasible point with a prescribed leading coordinate.
            let r0 = 0.05 * k as f64;
            let s_bar = (0.3 * r0 / a).min(1.0);
            let s_tilde = (0.05 * r0 / b).min(1.0);
            let candidate = [r0, s_bar * y[1], s_bar * y[2], s_tilde * y[3], s_tilde * y[4]];
            assert!(dist(&candidate) >= d_best - 1e-12, "r0 = {} beats the projection", r0);
        }
    }
}
