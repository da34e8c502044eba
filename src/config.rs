//! Solver configuration: method selection, line-search selection, and
//! the tolerance/parameter bundle with its construction-time checks.

use crate::Error;

/// Direction strategy used by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Steepest descent, `p = -g`.
    GradientDescent,
    /// Polak-Ribiere conjugate gradient with automatic restart.
    ConjugateGradient,
    /// BFGS quasi-Newton with an inverse-Hessian approximation.
    Bfgs,
    /// Positive-definite dogleg trust region.
    TrustRegion,
}

/// Step-length acceptance rule for the line-search methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearchKind {
    /// Backtracking under the sufficient-decrease condition alone.
    Armijo,
    /// Bracketing search under the Strong Wolfe conditions.
    StrongWolfe,
}

/// Algorithm configuration.
///
/// Build one with [`Settings::new`], which picks method-appropriate
/// defaults, then adjust individual fields through the `with_*`
/// mutators. All gradient-norm comparisons use the Euclidean norm.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Direction strategy.
    pub method: Method,
    /// Step-length rule. Ignored by [`Method::TrustRegion`].
    pub line_search: LineSearchKind,
    /// Iteration ceiling. Unbounded by default.
    pub max_iter: usize,
    /// Stop when the Euclidean gradient norm drops below this.
    pub grad_tol: f64,
    /// Stop when the objective change between iterates drops below
    /// this. Zero disables the check; it never applies to the
    /// trust-region method or to the step right after a conjugate
    /// gradient restart.
    pub f_tol: f64,
    /// Stop when the iterate change drops below this. Same exclusions
    /// as [`Settings::f_tol`].
    pub x_tol: f64,
    /// Initial trial step length for the line searches.
    pub step_init: f64,
    /// Upper bound on any line-search trial step.
    pub step_max: f64,
    /// Sufficient-decrease constant, `0 < c1 < 1/2`.
    pub c1: f64,
    /// Curvature constant, `c1 < c2 < 1` (`< 1/2` for conjugate
    /// gradient).
    pub c2: f64,
    /// Initial trust radius.
    pub delta_init: f64,
    /// Largest trust radius the schedule may expand to.
    pub delta_max: f64,
    /// Stop the trust-region method when the radius drops below this.
    pub delta_tol: f64,
    /// Reduction-ratio thresholds `[accept, shrink, expand]`,
    /// increasing within `[0, 1)`.
    pub eta: [f64; 3],
    /// Condition-number cap on the trust-region model Hessian.
    pub max_cond: f64,
    /// Emit a progress row every this many iterations. Zero disables
    /// progress output entirely.
    pub progress: usize,
}

impl Settings {
    /// Defaults for the given method. Conjugate gradient gets the
    /// tighter curvature pair `c1 = 1e-3`, `c2 = 0.4`; every other
    /// method gets the standard `c1 = 1e-4`, `c2 = 0.9`.
    pub fn new(method: Method) -> Self {
        let (c1, c2) = match method {
            Method::ConjugateGradient => (1e-3, 0.4),
            _ => (1e-4, 0.9),
        };
        Self {
            method,
            line_search: LineSearchKind::Armijo,
            max_iter: usize::MAX,
            grad_tol: 1e-8,
            f_tol: 1e-8,
            x_tol: 1e-8,
            step_init: 1.0,
            step_max: 100.0,
            c1,
            c2,
            delta_init: 1.0,
            delta_max: 100.0,
            delta_tol: f64::EPSILON.sqrt(),
            eta: [0.01, 0.25, 0.75],
            max_cond: 1e3,
            progress: 1,
        }
    }

    /// Sets the step-length rule.
    pub fn with_line_search(mut self, kind: LineSearchKind) -> Self {
        self.line_search = kind;
        self
    }

    /// Sets the iteration ceiling.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Sets the gradient-norm stopping tolerance.
    pub fn with_grad_tol(mut self, grad_tol: f64) -> Self {
        self.grad_tol = grad_tol;
        self
    }

    /// Sets the objective-change stopping tolerance.
    pub fn with_f_tol(mut self, f_tol: f64) -> Self {
        self.f_tol = f_tol;
        self
    }

    /// Sets the iterate-change stopping tolerance.
    pub fn with_x_tol(mut self, x_tol: f64) -> Self {
        self.x_tol = x_tol;
        self
    }

    /// Sets the initial line-search step length.
    pub fn with_step_init(mut self, step_init: f64) -> Self {
        self.step_init = step_init;
        self
    }

    /// Sets the line-search step cap.
    pub fn with_step_max(mut self, step_max: f64) -> Self {
        self.step_max = step_max;
        self
    }

    /// Sets the sufficient-decrease constant.
    pub fn with_c1(mut self, c1: f64) -> Self {
        self.c1 = c1;
        self
    }

    /// Sets the curvature constant.
    pub fn with_c2(mut self, c2: f64) -> Self {
        self.c2 = c2;
        self
    }

    /// Sets the initial trust radius.
    pub fn with_delta_init(mut self, delta_init: f64) -> Self {
        self.delta_init = delta_init;
        self
    }

    /// Sets the trust-radius ceiling.
    pub fn with_delta_max(mut self, delta_max: f64) -> Self {
        self.delta_max = delta_max;
        self
    }

    /// Sets the trust-radius stopping tolerance.
    pub fn with_delta_tol(mut self, delta_tol: f64) -> Self {
        self.delta_tol = delta_tol;
        self
    }

    /// Sets the reduction-ratio thresholds.
    pub fn with_eta(mut self, eta: [f64; 3]) -> Self {
        self.eta = eta;
        self
    }

    /// Sets the model-Hessian condition cap.
    pub fn with_max_cond(mut self, max_cond: f64) -> Self {
        self.max_cond = max_cond;
        self
    }

    /// Sets the progress emission interval.
    pub fn with_progress(mut self, progress: usize) -> Self {
        self.progress = progress;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        let fail = |reason: &str| {
            Err(Error::InvalidSettings {
                reason: reason.to_string(),
            })
        };
        if !(self.c1 > 0.0 && self.c1 < 0.5) {
            return fail("c1 must lie in (0, 1/2)");
        }
        let c2_cap = match self.method {
            Method::ConjugateGradient => 0.5,
            _ => 1.0,
        };
        if !(self.c2 > self.c1 && self.c2 < c2_cap) {
            return fail(match self.method {
                Method::ConjugateGradient => {
                    "c2 must lie in (c1, 1/2) for the conjugate gradient method"
                }
                _ => "c2 must lie in (c1, 1)",
            });
        }
        if !(self.step_init > 0.0 && self.step_init.is_finite()) {
            return fail("the initial step length must be positive and finite");
        }
        if !(self.step_max >= self.step_init && self.step_max.is_finite()) {
            return fail("the step cap must be finite and at least the initial step");
        }
        for (tol, name) in [
            (self.grad_tol, "grad_tol"),
            (self.f_tol, "f_tol"),
            (self.x_tol, "x_tol"),
        ] {
            if !(tol >= 0.0 && tol.is_finite()) {
                return Err(Error::InvalidSettings {
                    reason: format!("{name} must be finite and non-negative"),
                });
            }
        }
        if !(self.delta_init > 0.0 && self.delta_init.is_finite()) {
            return fail("the initial trust radius must be positive and finite");
        }
        if !(self.delta_max >= self.delta_init && self.delta_max.is_finite()) {
            return fail("the trust-radius ceiling must be finite and at least the initial radius");
        }
        if !(self.delta_tol > 0.0 && self.delta_tol.is_finite()) {
            return fail("the trust-radius tolerance must be positive and finite");
        }
        let [eta1, eta2, eta3] = self.eta;
        if !(eta1 >= 0.0 && eta1 < eta2 && eta2 < eta3 && eta3 < 1.0) {
            return fail("the reduction thresholds must increase within [0, 1)");
        }
        if !(self.max_cond > 1.0 && self.max_cond.is_finite()) {
            return fail("the condition cap must exceed 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conjugate_gradient_gets_its_own_curvature_pair() {
        let cg = Settings::new(Method::ConjugateGradient);
        assert_eq!(cg.c1, 1e-3);
        assert_eq!(cg.c2, 0.4);
        let bfgs = Settings::new(Method::Bfgs);
        assert_eq!(bfgs.c1, 1e-4);
        assert_eq!(bfgs.c2, 0.9);
    }

    #[test]
    fn defaults_validate_for_every_method() {
        for method in [
            Method::GradientDescent,
            Method::ConjugateGradient,
            Method::Bfgs,
            Method::TrustRegion,
        ] {
            assert!(Settings::new(method).validate().is_ok());
        }
    }

    #[test]
    fn rejects_out_of_range_sufficient_decrease() {
        assert!(Settings::new(Method::Bfgs).with_c1(0.5).validate().is_err());
        assert!(Settings::new(Method::Bfgs).with_c1(0.0).validate().is_err());
    }

    #[test]
    fn rejects_curvature_below_sufficient_decrease() {
        let s = Settings::new(Method::Bfgs).with_c1(0.2).with_c2(0.1);
        assert!(s.validate().is_err());
    }

    #[test]
    fn conjugate_gradient_caps_curvature_at_one_half() {
        let s = Settings::new(Method::ConjugateGradient).with_c2(0.9);
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_disordered_reduction_thresholds() {
        let s = Settings::new(Method::TrustRegion).with_eta([0.25, 0.25, 0.75]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn zero_change_tolerances_are_allowed() {
        let s = Settings::new(Method::GradientDescent)
            .with_f_tol(0.0)
            .with_x_tol(0.0);
        assert!(s.validate().is_ok());
    }
}
