use crate::error::ProblemError;
use crate::expression::VariableSet;
use num_traits::Num;
use std::fmt::Debug;
use std::ops::Neg;

/// A trait for types the VM can evaluate expressions over.
/// Implemented by `f64` for plain evaluation and by `Dual` for forward-mode gradients.
pub trait Scalar: Num + Neg<Output = Self> + Copy + Debug + 'static {
    /// Lifts a real constant into the scalar type (zero tangent).
    fn from_real(value: f64) -> Self;

    /// The real part, used for domain checks.
    fn real(&self) -> f64;

    /// True when the value carries a non-zero derivative component.
    fn has_tangent(&self) -> bool;

    /// Raises `self` to `exponent`. Callers check the real-valued domain first.
    fn pow(self, exponent: Self) -> Self;
}

impl Scalar for f64 {
    fn from_real(value: f64) -> Self {
        value
    }

    fn real(&self) -> f64 {
        *self
    }

    fn has_tangent(&self) -> bool {
        false
    }

    fn pow(self, exponent: Self) -> Self {
        self.powf(exponent)
    }
}

/// A scalar constraint `r(x) = 0` over an ordered set of variables.
/// The feasible-start search only talks to this interface.
pub trait ConstraintProblem {
    /// The variables, in the order `x` is laid out.
    fn variables(&self) -> &VariableSet;

    /// Number of free variables.
    fn dimension(&self) -> usize {
        self.variables().len()
    }

    /// Evaluate the signed residual at `x`.
    fn residual(&mut self, x: &[f64]) -> Result<f64, ProblemError>;

    /// Write the gradient of the residual at `x` into `out`.
    fn gradient(&mut self, x: &[f64], out: &mut [f64]) -> Result<(), ProblemError>;
}
