//! Gradient-based local minimization of smooth objectives `f: R^n -> R`
//! with caller-supplied gradients.
//!
//! The solver iterates direction selection, step acceptance, and a
//! committed history update until a stopping rule fires. Four
//! direction strategies are available behind one configuration:
//!
//! - [`Method::GradientDescent`]: steepest descent.
//! - [`Method::ConjugateGradient`]: Polak-Ribiere conjugate gradient
//!   with the non-negativity clamp and automatic restart.
//! - [`Method::Bfgs`]: BFGS quasi-Newton on an inverse-Hessian
//!   approximation kept symmetric positive definite.
//! - [`Method::TrustRegion`]: positive-definite dogleg trust region
//!   with a reduction-ratio radius schedule.
//!
//! Step lengths come from Armijo backtracking or a Strong Wolfe
//! bracketing search with cubic-interpolation zoom (Nocedal & Wright,
//! Algs. 3.5 and 3.6); the trust-region method judges whole trial
//! steps instead. Progress rows and recovery warnings go through the
//! [`log`] facade, so the host application's logger is the only sink.
//!
//! # Example
//!
//! Minimize the Rosenbrock function with BFGS under Strong Wolfe
//! steps.
//!
//! ```
//! use ndarray::{array, Array1};
//! use nlmin::{optimize, LineSearchKind, Method, Problem, Settings};
//!
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let f = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0].powi(2)),
//!         200.0 * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let settings = Settings::new(Method::Bfgs)
//!     .with_line_search(LineSearchKind::StrongWolfe)
//!     .with_max_iter(200)
//!     .with_progress(0);
//! let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
//!
//! assert!(report.converged);
//! assert!((report.x[0] - 1.0).abs() < 1e-3);
//! assert!((report.x[1] - 1.0).abs() < 1e-3);
//! ```

mod config;
mod direction;
mod driver;
mod line_search;
mod linalg;
mod problem;
mod trust_region;

pub use config::{LineSearchKind, Method, Settings};
pub use driver::{Counters, IterationRecord, Report, StopCause};
pub use problem::{Objective, Problem};

use ndarray::Array1;

/// Errors that abort a run before or during iteration. Line-search
/// failure is not among them: it ends the run cleanly and is reported
/// through [`Report::causes`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A configuration constraint was violated. Nothing ran.
    #[error("invalid settings: {reason}")]
    InvalidSettings {
        /// Which constraint failed.
        reason: String,
    },
    /// The objective or gradient came back NaN or infinite at a point
    /// the solver needed to commit.
    #[error("non-finite objective value or gradient at iteration {iteration}")]
    NonFiniteValue {
        /// Iteration index at which the evaluation happened; zero for
        /// the initial evaluation.
        iteration: usize,
        /// The iterate that produced the non-finite value.
        x: Array1<f64>,
    },
}

/// Minimize the problem's objective from its starting point and return
/// the full run report.
pub fn optimize<O: Objective>(problem: Problem<O>) -> Result<Report, Error> {
    problem.solve()
}

#[cfg(test)]
mod tests {
    // End-to-end runs over the classic benchmark objectives, one per
    // method, plus termination and determinism checks. Unit tests for
    // the individual subsystems live next to their modules.

    use super::*;
    use ndarray::{array, Array1};
    use spectral::assert_that;
    use spectral::prelude::*;

    fn quadratic_diag(x: &Array1<f64>) -> (f64, Array1<f64>) {
        // f = 1/2 x'Ax - b'x with A = diag(1, 10, 100) and b = 1, so
        // the minimizer is (1, 0.1, 0.01).
        let a = [1.0, 10.0, 100.0];
        let mut f = 0.0;
        let mut g = Array1::zeros(3);
        for i in 0..3 {
            f += 0.5 * a[i] * x[i] * x[i] - x[i];
            g[i] = a[i] * x[i] - 1.0;
        }
        (f, g)
    }

    fn rosenbrock(x: &Array1<f64>) -> (f64, Array1<f64>) {
        let f = (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2);
        let g = array![
            -2.0 * (1.0 - x[0]) - 400.0 * x[0] * (x[1] - x[0].powi(2)),
            200.0 * (x[1] - x[0].powi(2)),
        ];
        (f, g)
    }

    fn rastrigin(x: &Array1<f64>) -> (f64, Array1<f64>) {
        use std::f64::consts::PI;
        let mut f = 10.0 * x.len() as f64;
        let mut g = Array1::zeros(x.len());
        for i in 0..x.len() {
            f += x[i] * x[i] - 10.0 * (2.0 * PI * x[i]).cos();
            g[i] = 2.0 * x[i] + 20.0 * PI * (2.0 * PI * x[i]).sin();
        }
        (f, g)
    }

    #[test]
    fn bfgs_solves_the_ill_scaled_quadratic() {
        let settings = Settings::new(Method::Bfgs)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_c2(0.1)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(50)
            .with_progress(0);
        let report =
            optimize(Problem::new(quadratic_diag, array![0.0, 0.0, 0.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.iterations).is_less_than_or_equal_to(12);
        assert_that!(&report.grad_norm).is_less_than(1e-8);
        assert_that!(&report.x[0]).is_close_to(1.0, 1e-6);
        assert_that!(&report.x[1]).is_close_to(0.1, 1e-6);
        assert_that!(&report.x[2]).is_close_to(0.01, 1e-6);
    }

    #[test]
    fn bfgs_minimizes_rosenbrock() {
        let settings = Settings::new(Method::Bfgs)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(200)
            .with_progress(0);
        let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.f).is_less_than(1e-10);
        assert_that!(&report.x[0]).is_close_to(1.0, 1e-5);
        assert_that!(&report.x[1]).is_close_to(1.0, 1e-5);
        assert_that!(&report.iterations).is_less_than(100);
    }

    #[test]
    fn conjugate_gradient_restarts_while_minimizing_rosenbrock() {
        let settings = Settings::new(Method::ConjugateGradient)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_grad_tol(1e-6)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(5_000)
            .with_progress(0);
        let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.x[0]).is_close_to(1.0, 1e-3);
        assert_that!(&report.x[1]).is_close_to(1.0, 1e-3);
        assert_that!(&report.counters.cg_restarts).is_greater_than_or_equal_to(1);
    }

    #[test]
    fn gradient_descent_finds_the_nearest_rastrigin_minimum() {
        let settings = Settings::new(Method::GradientDescent)
            .with_step_init(1e-3)
            .with_grad_tol(1e-6)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(20_000)
            .with_progress(0);
        let report = optimize(Problem::new(rastrigin, array![0.3, 0.3], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.grad_norm).is_less_than(1e-6);
        assert_that!(&report.x[0].abs()).is_less_than(1e-6);
        assert_that!(&report.x[1].abs()).is_less_than(1e-6);
        assert_that!(&report.f).is_less_than(1e-8);
    }

    #[test]
    fn trust_region_traverses_rosenbrock() {
        let settings = Settings::new(Method::TrustRegion)
            .with_delta_init(1.0)
            .with_grad_tol(1e-6)
            .with_max_iter(5_000)
            .with_progress(0);
        let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.x[0]).is_close_to(1.0, 1e-3);
        assert_that!(&report.x[1]).is_close_to(1.0, 1e-3);
        // The schedule exercised both directions of the radius update.
        assert_that!(&report.counters.tr_shrinks).is_greater_than_or_equal_to(1);
        assert_that!(&report.counters.tr_expands).is_greater_than_or_equal_to(1);
    }

    #[test]
    fn trust_region_steps_stay_within_the_radius() {
        let settings = Settings::new(Method::TrustRegion)
            .with_delta_init(0.5)
            .with_delta_max(2.0)
            .with_grad_tol(1e-6)
            .with_max_iter(2_000)
            .with_progress(0);
        let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
        // Every accepted move between consecutive recorded iterates is
        // bounded by the radius ceiling.
        let mut prev = array![-1.2, 1.0];
        for record in &report.history {
            let step = &record.x - &prev;
            assert!(step.dot(&step).sqrt() <= 2.0 + 1e-9);
            prev = record.x.clone();
        }
    }

    #[test]
    fn stationary_start_stops_during_the_first_pass() {
        let bowl = |x: &Array1<f64>| (x.dot(x), 2.0 * x);
        let settings = Settings::new(Method::Bfgs)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_progress(0);
        let report = optimize(Problem::new(bowl, array![0.0, 0.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert_that!(&report.iterations).is_equal_to(0);
        assert!(report.causes.contains(&StopCause::GradientNorm));
        assert!(report.history.is_empty());
    }

    #[test]
    fn constant_objective_stops_on_the_gradient_check() {
        let constant = |x: &Array1<f64>| (1.0, Array1::zeros(x.len()));
        let settings = Settings::new(Method::GradientDescent).with_progress(0);
        let report = optimize(Problem::new(constant, array![2.0, -3.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        assert!(report.causes.contains(&StopCause::GradientNorm));
        assert_that!(&report.iterations).is_equal_to(0);
        // The starting point comes back untouched.
        assert_that!(&report.x[0]).is_equal_to(2.0);
        assert_that!(&report.x[1]).is_equal_to(-3.0);
    }

    #[test]
    fn flat_objective_with_nonzero_gradient_fails_the_line_search() {
        // The claimed gradient promises descent the objective never
        // delivers, so backtracking exhausts itself.
        let deceptive = |x: &Array1<f64>| (1.0, Array1::from_elem(x.len(), 1.0));
        let settings = Settings::new(Method::GradientDescent).with_progress(0);
        let report = optimize(Problem::new(deceptive, array![0.5], settings)).unwrap();
        assert_that!(&report.converged).is_false();
        assert_that!(&report.line_search_ok).is_false();
        assert!(report.causes.contains(&StopCause::LineSearchFailed));
        assert_that!(&report.x[0]).is_equal_to(0.5);
        assert!(report.status.contains("line search"));
    }

    #[test]
    fn iteration_ceiling_is_reported() {
        let settings = Settings::new(Method::Bfgs)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(3)
            .with_progress(0);
        let report = optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap();
        assert_that!(&report.converged).is_false();
        assert!(report.causes.contains(&StopCause::MaxIterations));
        assert_that!(&report.iterations).is_equal_to(3);
    }

    #[test]
    fn reruns_are_bit_identical() {
        let run = || {
            let settings = Settings::new(Method::Bfgs)
                .with_line_search(LineSearchKind::StrongWolfe)
                .with_max_iter(200)
                .with_progress(0);
            optimize(Problem::new(rosenbrock, array![-1.2, 1.0], settings)).unwrap()
        };
        let first = run();
        let second = run();
        assert_eq!(first.iterations, second.iterations);
        for (a, b) in first.history.iter().zip(second.history.iter()) {
            assert_eq!(a.f, b.f);
            assert_eq!(a.alpha, b.alpha);
            assert_eq!(a.x, b.x);
            assert_eq!(a.gradient, b.gradient);
        }
    }

    #[test]
    fn descent_is_monotone_on_a_convex_objective() {
        let bowl = |x: &Array1<f64>| {
            let f = 2.0 * x[0] * x[0] + x[1] * x[1] + 0.5 * x[0] * x[1];
            let g = array![4.0 * x[0] + 0.5 * x[1], 2.0 * x[1] + 0.5 * x[0]];
            (f, g)
        };
        let settings = Settings::new(Method::GradientDescent)
            .with_f_tol(0.0)
            .with_x_tol(0.0)
            .with_max_iter(500)
            .with_progress(0);
        let report = optimize(Problem::new(bowl, array![4.0, -7.0], settings)).unwrap();
        assert_that!(&report.converged).is_true();
        let mut last = f64::INFINITY;
        for record in &report.history {
            assert!(record.f <= last);
            last = record.f;
        }
    }

    #[test]
    fn invalid_settings_never_reach_the_objective() {
        let mut calls = 0usize;
        let counting = |x: &Array1<f64>| {
            calls += 1;
            (x.dot(x), 2.0 * x)
        };
        let settings = Settings::new(Method::Bfgs).with_c1(0.7);
        let err = optimize(Problem::new(counting, array![1.0], settings)).unwrap_err();
        assert!(matches!(err, Error::InvalidSettings { .. }));
        assert_eq!(calls, 0);
    }

    #[test]
    fn non_finite_objective_surfaces_the_iterate() {
        let broken = |x: &Array1<f64>| (f64::NAN, x.clone());
        let settings = Settings::new(Method::GradientDescent).with_progress(0);
        let err = optimize(Problem::new(broken, array![1.0, 2.0], settings)).unwrap_err();
        match err {
            Error::NonFiniteValue { iteration, x } => {
                assert_eq!(iteration, 0);
                assert_eq!(x, array![1.0, 2.0]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn report_echoes_the_configuration() {
        let bowl = |x: &Array1<f64>| (x.dot(x), 2.0 * x);
        let settings = Settings::new(Method::Bfgs)
            .with_line_search(LineSearchKind::StrongWolfe)
            .with_grad_tol(1e-10)
            .with_progress(0);
        let report = optimize(Problem::new(bowl, array![3.0, -1.0], settings)).unwrap();
        assert_eq!(report.settings.method, Method::Bfgs);
        assert_eq!(report.settings.grad_tol, 1e-10);
        assert_eq!(report.iterations, report.history.len());
        assert!(report.counters.func_evals >= report.counters.grad_evals);
    }
}
