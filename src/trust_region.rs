//! Positive-definite dogleg trust-region step: quadratic model
//! subproblem, reduction-ratio radius schedule, and the direct BFGS
//! model-Hessian update.

use ndarray::{Array1, Array2, Axis};

use crate::config::Settings;
use crate::linalg;

const SHRINK_FACTOR: f64 = 0.25;
const EXPAND_FACTOR: f64 = 2.0;
// Keeps a shrinking radius representable; termination is governed by
// the configured radius tolerance well above this.
const DELTA_FLOOR: f64 = 1e-12;
// A step this close to the boundary counts as hitting it.
const BOUNDARY_FRACTION: f64 = 0.99;

/// Trust-region sub-state: the radius, its schedule parameters, and
/// the quadratic model's Hessian approximation.
pub(crate) struct TrustRegionState {
    pub delta: f64,
    pub delta_max: f64,
    pub eta: [f64; 3],
    pub max_cond: f64,
    /// Model Hessian, symmetric positive definite by maintenance.
    pub b: Array2<f64>,
    pub accepted: bool,
    pub shrinks: usize,
    pub expands: usize,
}

/// A tentative step produced by the dogleg subproblem.
pub(crate) struct Trial {
    pub step: Array1<f64>,
    /// Model decrease `m(0) - m(p)`, positive for a useful trial.
    pub predicted: f64,
}

impl TrustRegionState {
    pub(crate) fn new(n: usize, settings: &Settings) -> Self {
        Self {
            delta: settings.delta_init,
            delta_max: settings.delta_max,
            eta: settings.eta,
            max_cond: settings.max_cond,
            b: Array2::<f64>::eye(n),
            accepted: false,
            shrinks: 0,
            expands: 0,
        }
    }
}

/// Solve the dogleg subproblem for the current radius: Newton point
/// when it fits, boundary-clipped gradient when even the Cauchy point
/// leaves the region, and the dogleg segment crossing otherwise.
pub(crate) fn dogleg(state: &mut TrustRegionState, g: &Array1<f64>) -> Trial {
    let n = g.len();
    linalg::symmetrize(&mut state.b);
    if let Some(shift) = linalg::clamp_condition(&mut state.b, state.max_cond) {
        log::debug!(
            "trust-region model regularized with a diagonal shift of {:.3e}",
            shift
        );
    }
    let factor = match linalg::SpdFactor::new(&state.b) {
        Some(factor) => factor,
        None => {
            log::warn!("trust-region model lost positive definiteness; resetting to the identity");
            state.b = Array2::<f64>::eye(n);
            linalg::SpdFactor::identity(n)
        }
    };

    let g_norm = g.dot(g).sqrt();
    let delta = state.delta;
    let g_bg = g.dot(&state.b.dot(g));

    // Cauchy point, or the boundary gradient step when the model has
    // no curvature along the gradient.
    let p_u = if g_bg > 0.0 {
        -(g.dot(g) / g_bg) * g
    } else {
        log::warn!(
            "trust-region model is singular along the gradient (g'Bg = {:.3e})",
            g_bg
        );
        -(delta / g_norm) * g
    };

    // Newton point.
    let p_b = -factor.solve(g);
    let p_b_norm = p_b.dot(&p_b).sqrt();

    let step = if p_b_norm <= delta {
        p_b
    } else {
        let p_u_norm = p_u.dot(&p_u).sqrt();
        if p_u_norm >= delta {
            -(delta / g_norm) * g
        } else {
            // Crossing of the segment from the Cauchy point to the
            // Newton point with the boundary.
            let d = &p_b - &p_u;
            let a = d.dot(&d);
            let b_coef = 2.0 * p_u.dot(&d);
            let c = p_u.dot(&p_u) - delta * delta;
            let disc = (b_coef * b_coef - 4.0 * a * c).max(0.0);
            let tau = ((-b_coef + disc.sqrt()) / (2.0 * a)).clamp(0.0, 1.0);
            &p_u + &(tau * d)
        }
    };

    let predicted = -(g.dot(&step) + 0.5 * step.dot(&state.b.dot(&step)));
    Trial { step, predicted }
}

/// Apply the reduction-ratio schedule to the radius and decide whether
/// the trial point is kept. `rho` is actual decrease over predicted
/// decrease; non-finite values reject.
pub(crate) fn update_radius(state: &mut TrustRegionState, rho: f64, step_norm: f64) -> bool {
    let [eta1, eta2, eta3] = state.eta;
    let accept = if !rho.is_finite() || rho < eta1 {
        state.delta = (state.delta * SHRINK_FACTOR).max(DELTA_FLOOR);
        state.shrinks += 1;
        false
    } else if rho < eta2 {
        state.delta = (state.delta * SHRINK_FACTOR).max(DELTA_FLOOR);
        state.shrinks += 1;
        true
    } else if rho < eta3 {
        true
    } else {
        if step_norm >= BOUNDARY_FRACTION * state.delta {
            state.delta = (state.delta * EXPAND_FACTOR).min(state.delta_max);
            state.expands += 1;
        }
        true
    };
    state.accepted = accept;
    accept
}

/// Direct BFGS update of the model Hessian,
/// `B <- B - (Bs)(Bs)ᵀ/(s'Bs) + yyᵀ/(y's)`, skipped when the
/// curvature condition fails so `B` stays positive definite.
pub(crate) fn update_model(state: &mut TrustRegionState, s: &Array1<f64>, y: &Array1<f64>) {
    let sy = s.dot(y);
    if !sy.is_finite() || sy <= 0.0 {
        log::warn!(
            "skipping the trust-region model update on failed curvature (y's = {:.3e})",
            sy
        );
        return;
    }
    let bs = state.b.dot(s);
    let sbs = s.dot(&bs);
    if !(sbs > 0.0) {
        return;
    }
    let bs_col = bs.view().insert_axis(Axis(1));
    let y_col = y.view().insert_axis(Axis(1));
    let correction = &(y_col.dot(&y_col.t()) / sy) - &(bs_col.dot(&bs_col.t()) / sbs);
    state.b = &state.b + &correction;
    linalg::symmetrize(&mut state.b);
}
