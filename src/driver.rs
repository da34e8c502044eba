//! The iteration driver: seeds the solution state, alternates
//! direction selection with step acceptance, commits history once per
//! iteration, and decides when to stop.

use std::fmt;
use std::mem;
use std::time::{SystemTime, UNIX_EPOCH};

use ndarray::{Array1, Array2};

use crate::config::{LineSearchKind, Method, Settings};
use crate::direction::{self, CgState};
use crate::line_search;
use crate::linalg;
use crate::problem::{Evaluator, Objective, Problem};
use crate::trust_region::{self, TrustRegionState};
use crate::Error;

/// Why the solver stopped. Several causes can hold at once; the first
/// recorded one supplies the status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// The line search could not produce an acceptable step.
    LineSearchFailed,
    /// The previous iterate's gradient norm fell below tolerance.
    PreviousGradientNorm,
    /// The current gradient norm fell below tolerance.
    GradientNorm,
    /// The objective changed less than the tolerance between iterates.
    ObjectiveChange,
    /// The iterate moved less than the tolerance.
    IterateChange,
    /// The iteration ceiling was reached.
    MaxIterations,
    /// The trust radius shrank below its tolerance.
    TrustRadius,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopCause::LineSearchFailed => write!(f, "line search failed"),
            StopCause::PreviousGradientNorm => {
                write!(f, "gradient norm at the previous iterate below tolerance")
            }
            StopCause::GradientNorm => write!(f, "gradient norm below tolerance"),
            StopCause::ObjectiveChange => write!(f, "objective change below tolerance"),
            StopCause::IterateChange => write!(f, "iterate change below tolerance"),
            StopCause::MaxIterations => write!(f, "maximum iterations reached"),
            StopCause::TrustRadius => write!(f, "trust radius below tolerance"),
        }
    }
}

/// Cumulative work counters for a finished run.
#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    /// Objective value evaluations.
    pub func_evals: usize,
    /// Gradient evaluations.
    pub grad_evals: usize,
    /// Hessian evaluations. Always zero for the quasi-Newton and
    /// first-order methods in this crate.
    pub hessian_evals: usize,
    /// Objective evaluations spent acquiring steps: line-search
    /// trials, or trust-region trials for that method.
    pub line_search_evals: usize,
    /// Conjugate gradient restarts.
    pub cg_restarts: usize,
    /// Trust-radius shrinks.
    pub tr_shrinks: usize,
    /// Trust-radius expansions.
    pub tr_expands: usize,
}

/// One committed iteration.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    /// Objective value after the iteration.
    pub f: f64,
    /// Accepted step length (1 for an accepted trust-region trial, 0
    /// for a rejected one).
    pub alpha: f64,
    /// Euclidean gradient norm after the iteration.
    pub grad_norm: f64,
    /// Gradient after the iteration.
    pub gradient: Array1<f64>,
    /// Iterate after the iteration.
    pub x: Array1<f64>,
    /// Objective evaluations the step acceptance spent this
    /// iteration (line-search or trust-region trials).
    pub line_search_evals: usize,
}

/// The result of a finished run.
#[derive(Debug)]
pub struct Report {
    /// Whether a convergence-style cause stopped the run (gradient
    /// norm, objective change, iterate change, or trust radius).
    pub converged: bool,
    /// False when a line search failed and ended the run.
    pub line_search_ok: bool,
    /// Human-readable form of the first stop cause.
    pub status: String,
    /// Final iterate.
    pub x: Array1<f64>,
    /// Final objective value.
    pub f: f64,
    /// Final gradient.
    pub gradient: Array1<f64>,
    /// Final Euclidean gradient norm.
    pub grad_norm: f64,
    /// Committed iterations, equal to `history.len()`.
    pub iterations: usize,
    /// Per-iteration records in commit order.
    pub history: Vec<IterationRecord>,
    /// Cumulative work counters.
    pub counters: Counters,
    /// Every stop cause that held at termination, in check order.
    pub causes: Vec<StopCause>,
    /// The configuration the run used.
    pub settings: Settings,
}

// Method-specific sub-state, created once at method selection.
enum MethodState {
    SteepestDescent,
    ConjugateGradient(CgState),
    QuasiNewton(Array2<f64>),
    TrustRegion(TrustRegionState),
}

struct SolverState {
    x_prev: Array1<f64>,
    x: Array1<f64>,
    f_prev: f64,
    f: f64,
    g_prev: Array1<f64>,
    g: Array1<f64>,
    g_prev_norm: f64,
    g_norm: f64,
    p_prev: Array1<f64>,
    p: Array1<f64>,
    alpha: f64,
    line_search_ok: bool,
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}

fn ensure_finite(f: f64, g: &Array1<f64>, iteration: usize, x: &Array1<f64>) -> Result<(), Error> {
    if f.is_finite() && g.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(Error::NonFiniteValue {
            iteration,
            x: x.clone(),
        })
    }
}

pub(crate) fn run<O: Objective>(problem: Problem<O>) -> Result<Report, Error> {
    let Problem {
        objective,
        x0,
        settings,
    } = problem;
    settings.validate()?;
    if x0.is_empty() {
        return Err(Error::InvalidSettings {
            reason: "the initial guess must not be empty".to_string(),
        });
    }

    let n = x0.len();
    let mut obj = Evaluator::new(objective);
    let (f0, g0) = obj.value_and_gradient(&x0);
    ensure_finite(f0, &g0, 0, &x0)?;

    let g0_norm = norm(&g0);
    let mut state = SolverState {
        // Infinite previous slots keep the change tests quiet until a
        // real previous iterate exists.
        x_prev: Array1::from_elem(n, f64::INFINITY),
        x: x0,
        f_prev: f64::INFINITY,
        f: f0,
        g_prev: g0.clone(),
        g: g0,
        g_prev_norm: g0_norm,
        g_norm: g0_norm,
        p_prev: Array1::zeros(n),
        p: Array1::zeros(n),
        alpha: 0.0,
        line_search_ok: true,
    };

    let mut method_state = match settings.method {
        Method::GradientDescent => MethodState::SteepestDescent,
        Method::ConjugateGradient => MethodState::ConjugateGradient(CgState::new()),
        Method::Bfgs => MethodState::QuasiNewton(linalg::scaled_identity(
            n,
            direction::hessian_seed_scale(f0),
        )),
        Method::TrustRegion => MethodState::TrustRegion(TrustRegionState::new(n, &settings)),
    };

    let mut history: Vec<IterationRecord> = Vec::new();
    let mut causes: Vec<StopCause> = Vec::new();
    let mut counters = Counters::default();

    if settings.progress > 0 {
        emit_header();
    }

    let mut k: usize = 0;
    loop {
        k += 1;

        // Termination checks against the committed state, in order.
        if state.g_prev_norm < settings.grad_tol {
            causes.push(StopCause::PreviousGradientNorm);
        }
        if state.g_norm < settings.grad_tol {
            causes.push(StopCause::GradientNorm);
        }
        let just_restarted = matches!(
            &method_state,
            MethodState::ConjugateGradient(cg) if cg.just_restarted
        );
        let suppress_change =
            matches!(settings.method, Method::TrustRegion) || just_restarted;
        if !suppress_change {
            if settings.f_tol > 0.0 && (state.f - state.f_prev).abs() < settings.f_tol {
                causes.push(StopCause::ObjectiveChange);
            }
            if settings.x_tol > 0.0 && norm(&(&state.x - &state.x_prev)) < settings.x_tol {
                causes.push(StopCause::IterateChange);
            }
        }
        if k > settings.max_iter {
            causes.push(StopCause::MaxIterations);
        }
        if let MethodState::TrustRegion(tr) = &method_state {
            if tr.delta < settings.delta_tol {
                causes.push(StopCause::TrustRadius);
            }
        }
        if !causes.is_empty() {
            break;
        }

        let ls_evals = if let MethodState::TrustRegion(tr) = &mut method_state {
            trust_region_iteration(tr, &mut obj, &mut state)
        } else {
            let p = match &mut method_state {
                MethodState::SteepestDescent => direction::steepest_descent(&state.g),
                MethodState::ConjugateGradient(cg) => {
                    direction::conjugate_gradient(cg, &state.g, &state.g_prev, &state.p_prev)
                }
                MethodState::QuasiNewton(h) => {
                    let mut p = -h.dot(&state.g);
                    if p.dot(&state.g) >= 0.0 {
                        log::warn!(
                            "quasi-Newton direction lost descent at iteration {k}; resetting"
                        );
                        *h = linalg::scaled_identity(n, direction::hessian_seed_scale(state.f));
                        p = -state.g.clone();
                    }
                    p
                }
                MethodState::TrustRegion(_) => unreachable!("handled above"),
            };

            let g_dot_p = state.g.dot(&p);
            let outcome = match settings.line_search {
                LineSearchKind::Armijo => line_search::armijo(
                    &mut obj,
                    &state.x,
                    &p,
                    state.f,
                    g_dot_p,
                    settings.c1,
                    settings.step_init,
                ),
                LineSearchKind::StrongWolfe => line_search::strong_wolfe(
                    &mut obj,
                    &state.x,
                    &p,
                    state.f,
                    g_dot_p,
                    settings.c1,
                    settings.c2,
                    settings.step_init,
                    settings.step_max,
                ),
            };

            match outcome {
                Err(err) => {
                    log::warn!("line search failed at iteration {k}: {err}");
                    state.line_search_ok = false;
                    causes.push(StopCause::LineSearchFailed);
                    break;
                }
                Ok(accepted) => {
                    if accepted.tolerance_breached {
                        log::warn!(
                            "line-search bracket collapsed at iteration {k}; \
                             keeping the best bracketed step"
                        );
                    }
                    let x_new = &state.x + &(accepted.alpha * &p);
                    let (f_new, g_new) = match accepted.g {
                        Some(g) => (accepted.f, g),
                        None => obj.value_and_gradient(&x_new),
                    };
                    ensure_finite(f_new, &g_new, k, &x_new)?;

                    if let MethodState::QuasiNewton(h) = &mut method_state {
                        let s = &x_new - &state.x;
                        let y = &g_new - &state.g;
                        direction::bfgs_update(h, &s, &y, f_new);
                    }

                    commit(&mut state, x_new, f_new, g_new, p, accepted.alpha);
                    accepted.evals
                }
            }
        };

        if let MethodState::ConjugateGradient(cg) = &method_state {
            counters.cg_restarts = cg.restarts;
        }
        counters.line_search_evals += ls_evals;

        history.push(IterationRecord {
            f: state.f,
            alpha: state.alpha,
            grad_norm: state.g_norm,
            gradient: state.g.clone(),
            x: state.x.clone(),
            line_search_evals: ls_evals,
        });
        if settings.progress > 0 && k % settings.progress == 0 {
            emit_row(k, state.f);
        }
    }

    if settings.progress > 0 {
        emit_row(history.len(), state.f);
    }

    match &method_state {
        MethodState::TrustRegion(tr) => {
            counters.tr_shrinks = tr.shrinks;
            counters.tr_expands = tr.expands;
        }
        MethodState::ConjugateGradient(cg) => counters.cg_restarts = cg.restarts,
        _ => {}
    }
    counters.func_evals = obj.func_evals;
    counters.grad_evals = obj.grad_evals;

    let converged = causes.iter().any(|c| {
        matches!(
            c,
            StopCause::PreviousGradientNorm
                | StopCause::GradientNorm
                | StopCause::ObjectiveChange
                | StopCause::IterateChange
                | StopCause::TrustRadius
        )
    });
    let status = causes
        .first()
        .map(ToString::to_string)
        .unwrap_or_default();
    log::info!(
        "finished: converged={converged}, line_search_ok={}, iterations={}, f={:.6e}, \
         |g|={:.3e}, fe={}, ge={}",
        state.line_search_ok,
        history.len(),
        state.f,
        state.g_norm,
        counters.func_evals,
        counters.grad_evals,
    );

    Ok(Report {
        converged,
        line_search_ok: state.line_search_ok,
        status,
        iterations: history.len(),
        history,
        counters,
        causes,
        settings,
        x: state.x,
        f: state.f,
        gradient: state.g,
        grad_norm: state.g_norm,
    })
}

// One trust-region iteration: solve the subproblem, judge the trial,
// and commit it when accepted. Returns the objective evaluations the
// trial consumed (reported alongside line-search work).
fn trust_region_iteration<O: Objective>(
    tr: &mut TrustRegionState,
    obj: &mut Evaluator<O>,
    state: &mut SolverState,
) -> usize {
    let trial = trust_region::dogleg(tr, &state.g);
    let x_trial = &state.x + &trial.step;
    let (f_trial, g_trial) = obj.value_and_gradient(&x_trial);

    let usable = f_trial.is_finite()
        && g_trial.iter().all(|v| v.is_finite())
        && trial.predicted.is_finite()
        && trial.predicted > 0.0;
    let rho = if usable {
        (state.f - f_trial) / trial.predicted
    } else {
        f64::NEG_INFINITY
    };
    let step_norm = norm(&trial.step);
    let accept = trust_region::update_radius(tr, rho, step_norm);

    if accept {
        let y = &g_trial - &state.g;
        trust_region::update_model(tr, &trial.step, &y);
        commit(state, x_trial, f_trial, g_trial, trial.step, 1.0);
    } else {
        state.alpha = 0.0;
        log::debug!(
            "trust-region trial rejected (rho = {rho:.3e}); radius now {:.3e}",
            tr.delta
        );
    }
    1
}

// Shift the one-iteration history window and install the new iterate.
fn commit(
    state: &mut SolverState,
    x_new: Array1<f64>,
    f_new: f64,
    g_new: Array1<f64>,
    p: Array1<f64>,
    alpha: f64,
) {
    state.x_prev = mem::replace(&mut state.x, x_new);
    state.f_prev = state.f;
    state.f = f_new;
    state.g_prev = mem::replace(&mut state.g, g_new);
    state.g_prev_norm = state.g_norm;
    state.g_norm = norm(&state.g);
    state.p_prev = mem::replace(&mut state.p, p);
    state.alpha = alpha;
}

fn emit_header() {
    log::info!(
        target: "nlmin::progress",
        "{:<12}{:<10}{:>8}  {:>12}",
        "date",
        "time",
        "iter",
        "log10(f)"
    );
}

fn emit_row(iteration: usize, f: f64) {
    let (date, time) = timestamp();
    log::info!(
        target: "nlmin::progress",
        "{:<12}{:<10}{:>8}  {:>12.6}",
        date,
        time,
        iteration,
        f.log10()
    );
}

// Wall-clock date and time (UTC) without a date dependency: the
// standard days-to-civil conversion over the Unix epoch.
fn timestamp() -> (String, String) {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    let date = format!("{year:04}-{month:02}-{day:02}");
    let time = format!(
        "{:02}:{:02}:{:02}",
        rem / 3_600,
        (rem % 3_600) / 60,
        rem % 60
    );
    (date, time)
}
