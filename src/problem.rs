//! The objective contract and the problem value handed to the solver.

use ndarray::Array1;

use crate::config::Settings;
use crate::driver;
use crate::{Error, Report};

/// A smooth objective `f: R^n -> R` with a caller-supplied gradient.
///
/// The solver asks for the value alone where the gradient is not
/// needed (Armijo trial points, trust-region trials) and for both
/// otherwise. Implementations must be deterministic in `x`; finiteness
/// is checked by the driver, not here.
///
/// Any `FnMut(&Array1<f64>) -> (f64, Array1<f64>)` closure implements
/// this trait, so the common case is passing a closure that returns
/// the `(value, gradient)` pair.
pub trait Objective {
    /// Objective value at `x`.
    fn value(&mut self, x: &Array1<f64>) -> f64;
    /// Objective value and gradient at `x`. The gradient has the same
    /// length as `x`.
    fn value_and_gradient(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>);
}

impl<F> Objective for F
where
    F: FnMut(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn value(&mut self, x: &Array1<f64>) -> f64 {
        self(x).0
    }

    fn value_and_gradient(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>) {
        self(x)
    }
}

/// Counting wrapper around an objective. Tracks how many evaluations
/// of each mode the solver has requested.
pub(crate) struct Evaluator<O> {
    objective: O,
    pub(crate) func_evals: usize,
    pub(crate) grad_evals: usize,
}

impl<O: Objective> Evaluator<O> {
    pub(crate) fn new(objective: O) -> Self {
        Self {
            objective,
            func_evals: 0,
            grad_evals: 0,
        }
    }

    pub(crate) fn value(&mut self, x: &Array1<f64>) -> f64 {
        self.func_evals += 1;
        self.objective.value(x)
    }

    pub(crate) fn value_and_gradient(&mut self, x: &Array1<f64>) -> (f64, Array1<f64>) {
        self.func_evals += 1;
        self.grad_evals += 1;
        self.objective.value_and_gradient(x)
    }
}

/// An objective, a starting point, and the algorithm configuration,
/// bundled by value for the pure [`optimize`](crate::optimize) entry
/// point.
pub struct Problem<O> {
    pub(crate) objective: O,
    pub(crate) x0: Array1<f64>,
    pub(crate) settings: Settings,
}

impl<O: Objective> Problem<O> {
    /// Bundles an objective with its starting point and settings.
    pub fn new(objective: O, x0: Array1<f64>, settings: Settings) -> Self {
        Self {
            objective,
            x0,
            settings,
        }
    }

    /// Runs the solver to termination. Equivalent to
    /// [`optimize`](crate::optimize).
    pub fn solve(self) -> Result<Report, Error> {
        driver::run(self)
    }
}
