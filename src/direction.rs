//! Descent-direction selection: steepest descent, Polak-Ribiere
//! conjugate gradient with automatic restart, and the BFGS
//! inverse-Hessian update.

use ndarray::{Array1, Array2, Axis};

use crate::linalg;

/// Conjugate gradient sub-state. `cycle` counts steps within the
/// current conjugacy cycle; a restart begins a new cycle whose first
/// step is the restart's steepest-descent direction.
pub(crate) struct CgState {
    pub cycle: usize,
    pub beta_prev: f64,
    pub beta: f64,
    pub just_restarted: bool,
    pub restarts: usize,
}

impl CgState {
    pub(crate) fn new() -> Self {
        Self {
            cycle: 1,
            beta_prev: 0.0,
            beta: 0.0,
            just_restarted: false,
            restarts: 0,
        }
    }

    fn restart(&mut self, g: &Array1<f64>) -> Array1<f64> {
        self.beta = 0.0;
        self.just_restarted = true;
        self.restarts += 1;
        self.cycle = 2;
        -g.clone()
    }
}

/// Steepest descent, the negative gradient.
pub(crate) fn steepest_descent(g: &Array1<f64>) -> Array1<f64> {
    -g.clone()
}

/// Polak-Ribiere direction with the non-negativity clamp. Restarts to
/// steepest descent when the clamped coefficient vanishes or when the
/// candidate fails the descent test.
pub(crate) fn conjugate_gradient(
    state: &mut CgState,
    g: &Array1<f64>,
    g_prev: &Array1<f64>,
    p_prev: &Array1<f64>,
) -> Array1<f64> {
    state.beta_prev = state.beta;
    if state.cycle == 1 {
        state.beta = 0.0;
        state.just_restarted = false;
        state.cycle = 2;
        return -g.clone();
    }

    let denom = g_prev.dot(g_prev);
    let beta = if denom > 0.0 {
        (g.dot(&(g - g_prev)) / denom).max(0.0)
    } else {
        0.0
    };
    state.beta = beta;
    if beta == 0.0 {
        log::debug!("conjugate gradient restarted on a vanishing Polak-Ribiere coefficient");
        return state.restart(g);
    }

    let p = p_prev * beta - g;
    if p.dot(g) >= 0.0 {
        log::warn!(
            "conjugate gradient produced a non-descent direction (beta = {:.3e}); restarting",
            beta
        );
        return state.restart(g);
    }
    state.just_restarted = false;
    state.cycle += 1;
    p
}

/// Scale for a freshly seeded or reset inverse Hessian. The objective
/// value seeds the scale; anything unusable falls back to the
/// identity so the approximation stays positive definite.
pub(crate) fn hessian_seed_scale(f: f64) -> f64 {
    if f.is_finite() && f > f64::EPSILON {
        f
    } else {
        1.0
    }
}

/// Two-sided BFGS update of the inverse Hessian,
/// `H <- (I - rho s yᵀ) H (I - rho y sᵀ) + rho s sᵀ`, followed by an
/// explicit symmetrization so rounding cannot accumulate asymmetry.
/// When the curvature condition `y·s > 0` fails the approximation is
/// reset to a scaled identity instead. Returns whether a reset
/// happened.
pub(crate) fn bfgs_update(
    h: &mut Array2<f64>,
    s: &Array1<f64>,
    y: &Array1<f64>,
    f_current: f64,
) -> bool {
    let n = h.nrows();
    let sy = s.dot(y);
    if !sy.is_finite() || sy <= 0.0 {
        log::warn!(
            "curvature condition failed (y's = {:.3e}); resetting the inverse Hessian",
            sy
        );
        *h = linalg::scaled_identity(n, hessian_seed_scale(f_current));
        return true;
    }

    let rho = 1.0 / sy;
    let s_col = s.view().insert_axis(Axis(1));
    let y_col = y.view().insert_axis(Axis(1));
    let left = &Array2::<f64>::eye(n) - rho * s_col.dot(&y_col.t());
    *h = left.dot(h).dot(&left.t()) + rho * s_col.dot(&s_col.t());
    linalg::symmetrize(h);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // xorshift64*, enough randomness for positive-definiteness probes
    // without pulling in a dependency.
    struct XorShift(u64);

    impl XorShift {
        fn next_unit(&mut self) -> f64 {
            let mut x = self.0;
            x ^= x >> 12;
            x ^= x << 25;
            x ^= x >> 27;
            self.0 = x;
            let u = ((x.wrapping_mul(0x2545F4914F6CDD1D) >> 11) as f64) / (1u64 << 53) as f64;
            2.0 * u - 1.0
        }
    }

    #[test]
    fn steepest_descent_negates_the_gradient() {
        assert_eq!(steepest_descent(&array![3.0, -4.0]), array![-3.0, 4.0]);
    }

    #[test]
    fn first_cycle_step_is_steepest_descent() {
        let mut state = CgState::new();
        let g = array![3.0, -4.0];
        let p = conjugate_gradient(&mut state, &g, &array![0.0, 0.0], &array![0.0, 0.0]);
        assert_eq!(p, array![-3.0, 4.0]);
        assert_eq!(state.beta, 0.0);
        assert!(!state.just_restarted);
    }

    #[test]
    fn negative_polak_ribiere_coefficient_forces_a_restart() {
        let mut state = CgState::new();
        let g_prev = array![1.0, 0.0];
        let p_prev = conjugate_gradient(&mut state, &g_prev, &array![0.0, 0.0], &array![0.0, 0.0]);
        // g'(g - g_prev) = 0.25 - 0.5 < 0, so the clamp zeroes beta.
        let g = array![0.5, 0.0];
        let p = conjugate_gradient(&mut state, &g, &g_prev, &p_prev);
        assert!(state.just_restarted);
        assert_eq!(state.restarts, 1);
        assert_eq!(p, array![-0.5, 0.0]);
    }

    #[test]
    fn conjugate_step_mixes_in_the_previous_direction() {
        let mut state = CgState::new();
        let g_prev = array![1.0, 0.0];
        let p_prev = conjugate_gradient(&mut state, &g_prev, &array![0.0, 0.0], &array![0.0, 0.0]);
        let g = array![0.5, 1.0];
        let p = conjugate_gradient(&mut state, &g, &g_prev, &p_prev);
        assert!(!state.just_restarted);
        assert!(state.beta > 0.0);
        // Descent is preserved.
        assert!(p.dot(&g) < 0.0);
    }

    #[test]
    fn bfgs_update_keeps_symmetry_and_positive_definiteness() {
        let mut h = linalg::scaled_identity(3, 1.0);
        let mut rng = XorShift(0x9E3779B97F4A7C15);
        for _ in 0..25 {
            let s = array![rng.next_unit(), rng.next_unit(), rng.next_unit()];
            // Build y with guaranteed positive curvature against s.
            let mut y = array![rng.next_unit(), rng.next_unit(), rng.next_unit()];
            let sy = s.dot(&y);
            if sy <= 0.1 {
                y = &y + &((0.2 - sy) / s.dot(&s) * &s);
            }
            let reset = bfgs_update(&mut h, &s, &y, 1.0);
            assert!(!reset);
            for i in 0..3 {
                for j in 0..3 {
                    assert!((h[[i, j]] - h[[j, i]]).abs() < 1e-12);
                }
            }
            for _ in 0..4 {
                let v = array![rng.next_unit(), rng.next_unit(), rng.next_unit()];
                if v.dot(&v) > 0.0 {
                    assert!(v.dot(&h.dot(&v)) > 0.0);
                }
            }
        }
    }

    #[test]
    fn failed_curvature_resets_to_a_scaled_identity() {
        let mut h = linalg::scaled_identity(2, 5.0);
        let s = array![1.0, 0.0];
        let y = array![-1.0, 0.0];
        let reset = bfgs_update(&mut h, &s, &y, 2.0);
        assert!(reset);
        assert_eq!(h, array![[2.0, 0.0], [0.0, 2.0]]);
    }

    #[test]
    fn seed_scale_guards_nonpositive_values() {
        assert_eq!(hessian_seed_scale(3.5), 3.5);
        assert_eq!(hessian_seed_scale(0.0), 1.0);
        assert_eq!(hessian_seed_scale(-2.0), 1.0);
        assert_eq!(hessian_seed_scale(f64::NAN), 1.0);
    }
}
