pub mod autodiff;
pub mod derivative;
pub mod equation;
pub mod equation_engine;
pub mod error;
pub mod expression;
pub mod feasible;
pub mod node_table;
pub mod parser;
/// The `feasible_core` crate turns constraint equations of the form `lhs = rhs` into
/// expression trees, evaluates and differentiates them, and searches for a starting point
/// at which `rhs` hits a target value.
///
/// Key components:
/// - **Parser**: Tokenizer and recursive-descent parser producing `Expr` trees.
/// - **Equation Engine**: Bytecode compiler and stack VM, generic over `Scalar`.
/// - **Derivative**: Symbolic partial derivatives with light simplification.
/// - **Autodiff**: Dual numbers for forward-mode gradients over the same bytecode.
/// - **Feasible**: Newton-style feasible-start search with best-point reporting.
pub mod traits;

pub use equation::Equation;
pub use error::{
    ConfigError, DifferentiationError, EvalError, FeasibleError, ParseError, SearchError,
    SearchFailure,
};
pub use expression::{BinaryOp, Expr, FeasibleAssignment, UnaryOp, VariableSet};
pub use feasible::{
    find_feasible_start, search_feasible_start, EquationProblem, FeasibleSearch,
    FeasibleSettings, FeasibleStart, GradientMode, SearchProgress, SearchStep,
};
pub use parser::{parse_equation, parse_expression};
