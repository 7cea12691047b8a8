//! Error taxonomy for parsing, evaluation, differentiation and the feasible-start search.
//!
//! Every family is a distinct enum so callers can tell a malformed equation apart from
//! a point that cannot be evaluated or a search that simply did not converge.

use crate::expression::FeasibleAssignment;
use thiserror::Error;

/// Malformed equation text.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("equation has no '=' sign")]
    MissingEquals,

    #[error("left-hand side `{lhs}` is not a legal identifier")]
    InvalidLhs { lhs: String },

    #[error("unbalanced parentheses at position {position}")]
    UnbalancedParens { position: usize },

    #[error("unexpected token `{token}` at position {position}")]
    UnexpectedToken { token: String, position: usize },
}

/// Failure while evaluating a tree at one assignment.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("variable `{name}` has no value in the assignment")]
    UndefinedVariable { name: String },

    #[error("{base} ^ {exponent} has no real value")]
    DomainError { base: f64, exponent: f64 },

    #[error("expression evaluated to a non-finite value ({value})")]
    NonFinite { value: f64 },

    #[error("bytecode stack underflow")]
    StackUnderflow,

    #[error("program expects {expected} variable values, got {got}")]
    ArityMismatch { expected: usize, got: usize },
}

/// The expression uses a construct outside the supported derivative rules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DifferentiationError {
    #[error("cannot differentiate power with non-literal exponent `{exponent}`")]
    UnsupportedExponent { exponent: String },
}

/// Errors a `ConstraintProblem` may raise while the search probes it.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProblemError {
    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Differentiation(#[from] DifferentiationError),
}

/// Rejected search configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("tolerance must be positive, got {0}")]
    NonPositiveTolerance(f64),

    #[error("step_size must be positive, got {0}")]
    NonPositiveStepSize(f64),

    #[error("max_iterations must be greater than zero")]
    ZeroMaxIterations,

    #[error("epsilon must be finite and non-negative, got {0}")]
    InvalidEpsilon(f64),

    #[error("default_value must be finite, got {0}")]
    NonFiniteDefaultValue(f64),

    #[error("initial value for `{name}` is not finite ({value})")]
    NonFiniteInitialValue { name: String, value: f64 },
}

/// Why the heuristic search stopped short of a feasible point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SearchError {
    #[error("gradient vanished at iteration {iteration} (residual {residual})")]
    Stalled { iteration: usize, residual: f64 },

    #[error("no convergence in {iterations} iterations (residual {residual})")]
    NotConverged { iterations: usize, residual: f64 },

    #[error("evaluation failed at iteration {iteration}")]
    Eval {
        iteration: usize,
        #[source]
        source: EvalError,
    },

    #[error("differentiation failed")]
    Differentiation(#[source] DifferentiationError),
}

impl SearchError {
    pub(crate) fn from_problem(iteration: usize, err: ProblemError) -> Self {
        match err {
            ProblemError::Eval(source) => Self::Eval { iteration, source },
            ProblemError::Differentiation(source) => Self::Differentiation(source),
        }
    }
}

/// A failed search together with the best point it visited, so the caller can
/// decide whether that point is good enough.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("feasible-start search failed: {error}")]
pub struct SearchFailure {
    #[source]
    pub error: SearchError,
    pub best: FeasibleAssignment,
    /// `None` when not even the initial point could be evaluated.
    pub best_residual: Option<f64>,
    pub iterations: usize,
}

/// Umbrella error for the one-shot `find_feasible_start` entry point.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeasibleError {
    #[error("invalid equation: {0}")]
    Parse(#[from] ParseError),

    #[error("invalid config: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Search(#[from] SearchFailure),
}
