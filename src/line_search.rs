//! Step-length selection: Armijo backtracking for first-order descent
//! and a Strong Wolfe bracketing search with cubic-interpolation zoom,
//! following Nocedal & Wright (Algs. 3.5 and 3.6).

use ndarray::Array1;

use crate::problem::{Evaluator, Objective};

// Below this the backtracking step can no longer change the iterate.
const ALPHA_FLOOR: f64 = 1e-16;
// Bracket width under which zoom stops refining.
const ALPHA_TOL: f64 = 1e-12;
// Minimum distance the cubic trial must keep from the bracket ends.
const MIN_INTERIOR_STEP: f64 = 1e-12;
const MAX_BRACKET_ATTEMPTS: usize = 20;
const MAX_ZOOM_ATTEMPTS: usize = 30;

/// A step length accepted by one of the searches.
#[derive(Debug)]
pub(crate) struct Accepted {
    pub alpha: f64,
    pub f: f64,
    /// Present when the search evaluated the gradient at the accepted
    /// point (Strong Wolfe); Armijo leaves it to the driver.
    pub g: Option<Array1<f64>>,
    /// Objective evaluations spent inside the search.
    pub evals: usize,
    /// Set when the zoom bracket collapsed below its width floor and
    /// the low end was accepted on sufficient decrease alone.
    pub tolerance_breached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LineSearchError {
    /// Backtracking pushed the step below the machine floor.
    StepTooSmall,
    /// Bracketing or zoom ran out of attempts without an acceptable
    /// step.
    NoAcceptableStep,
}

impl std::fmt::Display for LineSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LineSearchError::StepTooSmall => {
                write!(f, "step length fell below the machine floor")
            }
            LineSearchError::NoAcceptableStep => {
                write!(f, "no step satisfying the acceptance conditions was found")
            }
        }
    }
}

/// Armijo backtracking. Starts at `alpha0` and halves until the
/// sufficient-decrease condition holds. Evaluates values only.
pub(crate) fn armijo<O: Objective>(
    obj: &mut Evaluator<O>,
    x: &Array1<f64>,
    p: &Array1<f64>,
    f0: f64,
    g_dot_p: f64,
    c1: f64,
    alpha0: f64,
) -> Result<Accepted, LineSearchError> {
    let mut alpha = alpha0;
    let mut evals = 0;
    loop {
        let f_trial = obj.value(&(x + alpha * p));
        evals += 1;
        if f_trial.is_finite() && f_trial <= f0 + c1 * alpha * g_dot_p {
            return Ok(Accepted {
                alpha,
                f: f_trial,
                g: None,
                evals,
                tolerance_breached: false,
            });
        }
        alpha *= 0.5;
        if alpha < ALPHA_FLOOR {
            return Err(LineSearchError::StepTooSmall);
        }
    }
}

/// Strong Wolfe bracketing search. Expands the trial step until the
/// minimum is bracketed, then hands the bracket to [`zoom`]. Each trial
/// evaluates the value and gradient together.
#[allow(clippy::too_many_arguments)]
pub(crate) fn strong_wolfe<O: Objective>(
    obj: &mut Evaluator<O>,
    x: &Array1<f64>,
    p: &Array1<f64>,
    f0: f64,
    g0_dot_p: f64,
    c1: f64,
    c2: f64,
    alpha_init: f64,
    alpha_max: f64,
) -> Result<Accepted, LineSearchError> {
    if g0_dot_p >= 0.0 {
        log::warn!(
            "strong Wolfe search entered with a non-descent direction (g'p = {:.2e})",
            g0_dot_p
        );
    }

    let mut alpha_prev: f64 = 0.0;
    let mut f_prev = f0;
    let mut d_prev = g0_dot_p;
    let mut alpha = alpha_init.min(alpha_max);
    let mut evals = 0;

    for attempt in 0..MAX_BRACKET_ATTEMPTS {
        let (f_i, g_i) = obj.value_and_gradient(&(x + alpha * p));
        evals += 1;
        let d_i = g_i.dot(p);

        let armijo_fail =
            !f_i.is_finite() || f_i > f0 + c1 * alpha * g0_dot_p || (attempt > 0 && f_i >= f_prev);
        if armijo_fail {
            return zoom(
                obj, x, p, f0, g0_dot_p, c1, c2, alpha_prev, alpha, f_prev, f_i, d_prev, d_i,
                evals,
            );
        }

        if d_i.abs() <= c2 * g0_dot_p.abs() {
            return Ok(Accepted {
                alpha,
                f: f_i,
                g: Some(g_i),
                evals,
                tolerance_breached: false,
            });
        }

        if d_i >= 0.0 {
            // The slope turned positive, so the bracket runs from the
            // current trial back to the previous one.
            return zoom(
                obj, x, p, f0, g0_dot_p, c1, c2, alpha, alpha_prev, f_i, f_prev, d_i, d_prev,
                evals,
            );
        }

        if alpha >= alpha_max {
            break;
        }
        alpha_prev = alpha;
        f_prev = f_i;
        d_prev = d_i;
        alpha = (2.0 * alpha).min(alpha_max);
    }

    Err(LineSearchError::NoAcceptableStep)
}

// Refine a bracket [alpha_lo, alpha_hi] known to contain a Strong Wolfe
// point. `alpha_lo` always carries the lowest objective value seen and
// satisfies sufficient decrease; the endpoints need not be ordered.
#[allow(clippy::too_many_arguments)]
fn zoom<O: Objective>(
    obj: &mut Evaluator<O>,
    x: &Array1<f64>,
    p: &Array1<f64>,
    f0: f64,
    g0_dot_p: f64,
    c1: f64,
    c2: f64,
    mut alpha_lo: f64,
    mut alpha_hi: f64,
    mut f_lo: f64,
    mut f_hi: f64,
    mut d_lo: f64,
    mut d_hi: f64,
    mut evals: usize,
) -> Result<Accepted, LineSearchError> {
    for _ in 0..MAX_ZOOM_ATTEMPTS {
        if (alpha_hi - alpha_lo).abs() < ALPHA_TOL {
            // The bracket collapsed before curvature was satisfied.
            // The low end still guarantees sufficient decrease.
            if alpha_lo <= ALPHA_FLOOR {
                return Err(LineSearchError::StepTooSmall);
            }
            let (f_j, g_j) = obj.value_and_gradient(&(x + alpha_lo * p));
            evals += 1;
            return Ok(Accepted {
                alpha: alpha_lo,
                f: f_j,
                g: Some(g_j),
                evals,
                tolerance_breached: true,
            });
        }

        let alpha_j = cubic_trial(alpha_lo, alpha_hi, f_lo, f_hi, d_lo, d_hi);

        let (f_j, g_j) = obj.value_and_gradient(&(x + alpha_j * p));
        evals += 1;
        let d_j = g_j.dot(p);

        if !f_j.is_finite() || f_j > f0 + c1 * alpha_j * g0_dot_p || f_j >= f_lo {
            alpha_hi = alpha_j;
            f_hi = f_j;
            d_hi = d_j;
        } else {
            if d_j.abs() <= c2 * g0_dot_p.abs() {
                return Ok(Accepted {
                    alpha: alpha_j,
                    f: f_j,
                    g: Some(g_j),
                    evals,
                    tolerance_breached: false,
                });
            }
            if d_j * (alpha_hi - alpha_lo) >= 0.0 {
                alpha_hi = alpha_lo;
                f_hi = f_lo;
                d_hi = d_lo;
            }
            alpha_lo = alpha_j;
            f_lo = f_j;
            d_lo = d_j;
        }
    }
    Err(LineSearchError::NoAcceptableStep)
}

// Minimizer of the cubic interpolating the values and slopes at the
// bracket ends, falling back to bisection when the interpolation is
// unusable or lands outside the interior of the bracket.
fn cubic_trial(alpha_lo: f64, alpha_hi: f64, f_lo: f64, f_hi: f64, d_lo: f64, d_hi: f64) -> f64 {
    let midpoint = 0.5 * (alpha_lo + alpha_hi);
    if !f_lo.is_finite() || !f_hi.is_finite() {
        return midpoint;
    }
    let width = alpha_hi - alpha_lo;
    if width.abs() < MIN_INTERIOR_STEP {
        return midpoint;
    }
    let d1 = d_lo + d_hi - 3.0 * (f_lo - f_hi) / (alpha_lo - alpha_hi);
    let d2_sq = d1 * d1 - d_lo * d_hi;
    if d2_sq < 0.0 || !d2_sq.is_finite() {
        return midpoint;
    }
    let d2 = d2_sq.sqrt() * width.signum();
    let trial = alpha_hi - width * (d_hi + d2 - d1) / (d_hi - d_lo + 2.0 * d2);
    let lower = alpha_lo.min(alpha_hi);
    let upper = alpha_lo.max(alpha_hi);
    if !trial.is_finite() || trial <= lower || trial >= upper {
        return midpoint;
    }
    if (trial - lower).abs() < MIN_INTERIOR_STEP || (trial - upper).abs() < MIN_INTERIOR_STEP {
        return midpoint;
    }
    trial
}
