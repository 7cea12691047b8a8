use crate::derivative::{differentiate, simplify};
use crate::error::{DifferentiationError, EvalError, ParseError};
use crate::expression::{Expr, FeasibleAssignment, VariableSet};
use crate::node_table::{classify_terms, Term};
use crate::parser::parse_equation;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::debug;

/// A constraint `lhs = rhs`: the output name paired with the tree that computes it.
///
/// The equation owns its tree and a lazily filled cache of simplified partial
/// derivatives keyed by variable name. Any structural change to the tree clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    lhs: String,
    rhs: Expr,
    variables: VariableSet,
    gradient_cache: HashMap<String, Expr>,
}

impl Equation {
    pub fn new(lhs: impl Into<String>, rhs: Expr) -> Self {
        let variables = rhs.variables();
        Self {
            lhs: lhs.into(),
            rhs,
            variables,
            gradient_cache: HashMap::new(),
        }
    }

    pub fn lhs(&self) -> &str {
        &self.lhs
    }

    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    /// Replaces the right-hand side, recomputing the variable set and dropping every
    /// cached derivative.
    pub fn replace_rhs(&mut self, rhs: Expr) -> Expr {
        let old = std::mem::replace(&mut self.rhs, rhs);
        self.variables = self.rhs.variables();
        self.clear_gradient_cache();
        old
    }

    /// Evaluates the right-hand side at `assignment`.
    pub fn evaluate(&self, assignment: &FeasibleAssignment) -> Result<f64, EvalError> {
        self.rhs.evaluate(assignment)
    }

    /// Signed gap `rhs(assignment) - target`.
    pub fn residual(&self, assignment: &FeasibleAssignment, target: f64) -> Result<f64, EvalError> {
        Ok(self.evaluate(assignment)? - target)
    }

    /// Simplified partial derivative with respect to `var`, computed once and cached.
    pub fn partial(&mut self, var: &str) -> Result<&Expr, DifferentiationError> {
        match self.gradient_cache.entry(var.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                debug!(lhs = %self.lhs, var, "differentiating");
                let derivative = simplify(&differentiate(&self.rhs, var)?);
                Ok(entry.insert(derivative))
            }
        }
    }

    /// The cached derivative for `var`, without computing it.
    pub fn cached_partial(&self, var: &str) -> Option<&Expr> {
        self.gradient_cache.get(var)
    }

    /// Drops the cached derivative for one variable.
    pub fn invalidate_partial(&mut self, var: &str) -> Option<Expr> {
        self.gradient_cache.remove(var)
    }

    pub fn clear_gradient_cache(&mut self) {
        self.gradient_cache.clear();
    }

    /// Additive terms of the right-hand side with their classification.
    pub fn terms(&self) -> Vec<Term> {
        classify_terms(&self.rhs)
    }
}

impl FromStr for Equation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_equation(s)
    }
}
