//! Second-order (Lorentz) cone.
//!
//! K_SOC = {(t, x) ∈ ℝ × ℝ^{d-1} : t ≥ ||x||₂}
//!
//! The rolling friction cone is handled as two three-dimensional SOC
//! sub-blocks per contact, so most vectors passed here are concatenations of
//! many blocks of the same dimension.

/// Second-order (Lorentz) cone of a fixed block dimension.
#[derive(Debug, Clone)]
pub struct SocCone {
    /// Total dimension (d = 1 + length of x vector)
    dim: usize,
}

impl SocCone {
    /// Create a new second-order cone of the given dimension.
    pub fn new(dim: usize) -> Self {
        assert!(dim >= 2, "SOC cone must have dimension >= 2");
        Self { dim }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Interior tolerance
    const INTERIOR_TOL: f64 = 1e-12;

    /// Compute t² - ||x||² (the Jordan determinant of the block)
    #[inline]
    pub fn discriminant(s: &[f64]) -> f64 {
        let t = s[0];
        let x_norm_sq: f64 = s[1..].iter().map(|&xi| xi * xi).sum();
        t * t - x_norm_sq
    }

    /// Compute ||x||₂
    #[inline]
    pub fn x_norm(s: &[f64]) -> f64 {
        s[1..].iter().map(|&xi| xi * xi).sum::<f64>().sqrt()
    }

    /// Strict interior test for a single block.
    pub fn is_interior(&self, s: &[f64]) -> bool {
        assert_eq!(s.len(), self.dim);

        if s.iter().any(|&x| !x.is_finite()) {
            return false;
        }

        let s_norm = s.iter().map(|x| x.abs()).fold(0.0f64, f64::max);
        let tol = Self::INTERIOR_TOL * s_norm.max(1.0);

        s[0] > tol && s[0] - Self::x_norm(s) > 0.0
    }

    /// Strict interior test for every block of a concatenated vector.
    pub fn all_interior(&self, s: &[f64]) -> bool {
        assert_eq!(s.len() % self.dim, 0);
        s.chunks_exact(self.dim).all(|block| self.is_interior(block))
    }

    /// Largest α ≥ 0 keeping `s + α ds` in the cone, for a single block.
    ///
    /// Returns `f64::INFINITY` when the whole ray stays inside.
    pub fn step_to_boundary(&self, s: &[f64], ds: &[f64]) -> f64 {
        assert_eq!(s.len(), self.dim);
        assert_eq!(ds.len(), self.dim);

        // (t + α Δt)² - ||x + α Δx||² ≥ 0  <=>  aα² + bα + c ≥ 0 with
        //   a = (Δt)² - ||Δx||²
        //   b = 2(t Δt - x^T Δx)
        //   c = t² - ||x||² > 0

        let t = s[0];
        let dt = ds[0];

        let x_norm_sq: f64 = s[1..].iter().map(|&xi| xi * xi).sum();
        let dx_norm_sq: f64 = ds[1..].iter().map(|&dxi| dxi * dxi).sum();
        let x_dot_dx: f64 = s[1..].iter().zip(&ds[1..]).map(|(&xi, &dxi)| xi * dxi).sum();

        let a = dt * dt - dx_norm_sq;
        let b = 2.0 * (t * dt - x_dot_dx);
        let c = t * t - x_norm_sq;

        if c <= 0.0 || !c.is_finite() || !a.is_finite() || !b.is_finite() {
            return 0.0;
        }

        let coef_scale = a.abs().max(b.abs()).max(c.abs()).max(1.0);
        if a.abs() < 1e-12 * coef_scale {
            // Linear case
            let mut alpha_max = if b < 0.0 { -c / b } else { f64::INFINITY };
            if dt < 0.0 {
                alpha_max = alpha_max.min(-t / dt);
            }
            return alpha_max;
        }

        let discriminant = b * b - 4.0 * a * c;
        let disc_scale = (b * b).abs().max((4.0 * a * c).abs()).max(1e-300);
        let disc_tol = 1e-12 * disc_scale;

        if discriminant < -disc_tol {
            // No real roots: the quadratic keeps the sign of c.
            return if dt < 0.0 { -t / dt } else { f64::INFINITY };
        }

        let sqrt_disc = discriminant.max(0.0).sqrt();

        // Citardauq formula: compute one root directly and the other via c = a*α1*α2.
        let (alpha1, alpha2) = if b >= 0.0 {
            let q = -0.5 * (b + sqrt_disc);
            if q.abs() < 1e-300 {
                (0.0, 0.0)
            } else {
                (q / a, c / q)
            }
        } else {
            let q = -0.5 * (b - sqrt_disc);
            if q.abs() < 1e-300 {
                (0.0, 0.0)
            } else {
                (q / a, c / q)
            }
        };

        let mut alpha_max = f64::INFINITY;
        if alpha1 > 0.0 {
            alpha_max = alpha_max.min(alpha1);
        }
        if alpha2 > 0.0 {
            alpha_max = alpha_max.min(alpha2);
        }

        // Also need t + α Δt > 0
        if dt < 0.0 {
            alpha_max = alpha_max.min(-t / dt);
        }

        alpha_max
    }

    /// Damped ratio test over all blocks of `x`.
    ///
    /// Returns `min(1, gmm * α_max)` where α_max is the smallest
    /// step-to-boundary over the blocks. Non-decreasing in `gmm`.
    pub fn step_length(&self, x: &[f64], dx: &[f64], gmm: f64) -> f64 {
        assert_eq!(x.len(), dx.len());
        assert_eq!(x.len() % self.dim, 0);

        let alpha_max = x
            .chunks_exact(self.dim)
            .zip(dx.chunks_exact(self.dim))
            .map(|(xb, dxb)| self.step_to_boundary(xb, dxb))
            .fold(f64::INFINITY, f64::min);

        (gmm * alpha_max).min(1.0)
    }
}
