//! Feasible-start search: a best-effort Newton-style walk that drives
//! `rhs(x) - target` toward zero to seed a downstream optimizer.
//!
//! Each step moves every variable by `step_size * r * g_i / (|g|^2 + epsilon)`, the
//! minimum-norm Newton step for a single scalar equation. The loop stops on tolerance,
//! on a vanishing gradient, or when the iteration cap is reached; failures report the
//! best point seen.

use crate::autodiff::{forward_gradient, Dual};
use crate::equation::Equation;
use crate::equation_engine::{Bytecode, Compiler, VM};
use crate::error::{
    ConfigError, EvalError, FeasibleError, ProblemError, SearchError, SearchFailure,
};
use crate::expression::{FeasibleAssignment, VariableSet};
use crate::node_table::TermKind;
use crate::parser::parse_equation;
use crate::traits::ConstraintProblem;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Where partial derivatives come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GradientMode {
    /// Cached symbolic partials, compiled and evaluated per step.
    #[default]
    Symbolic,
    /// Forward-mode dual numbers over the residual program.
    Dual,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeasibleSettings {
    pub tolerance: f64,
    pub step_size: f64,
    pub max_iterations: usize,
    /// Added to |g|^2 in the step denominator.
    pub epsilon: f64,
    /// Starting value for every variable without an override.
    pub default_value: f64,
    pub initial_values: BTreeMap<String, f64>,
    pub gradient: GradientMode,
}

impl Default for FeasibleSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            step_size: 1.0,
            max_iterations: 100,
            epsilon: 1e-12,
            default_value: 1.0,
            initial_values: BTreeMap::new(),
            gradient: GradientMode::Symbolic,
        }
    }
}

impl FeasibleSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance > 0.0) {
            return Err(ConfigError::NonPositiveTolerance(self.tolerance));
        }
        if !(self.step_size > 0.0) {
            return Err(ConfigError::NonPositiveStepSize(self.step_size));
        }
        if self.max_iterations == 0 {
            return Err(ConfigError::ZeroMaxIterations);
        }
        if !self.epsilon.is_finite() || self.epsilon < 0.0 {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        if !self.default_value.is_finite() {
            return Err(ConfigError::NonFiniteDefaultValue(self.default_value));
        }
        if let Some((name, value)) = self.initial_values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::NonFiniteInitialValue {
                name: name.clone(),
                value: *value,
            });
        }
        Ok(())
    }

    /// `default_value` everywhere, then `initial_values` applied by name.
    /// Overrides for names outside `variables` are ignored.
    pub fn initial_assignment(&self, variables: &VariableSet) -> FeasibleAssignment {
        let mut assignment = FeasibleAssignment::uniform(variables.clone(), self.default_value);
        for (name, value) in &self.initial_values {
            if !assignment.set(name, *value) {
                debug!(name = %name, "ignoring initial value for unknown variable");
            }
        }
        assignment
    }
}

/// A feasible (within tolerance) assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibleStart {
    pub assignment: FeasibleAssignment,
    pub residual: f64,
    /// Number of updates applied before the residual met tolerance.
    pub iterations: usize,
}

/// Report for one non-terminal step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchProgress {
    pub iteration: usize,
    /// Residual at the point the step started from.
    pub residual: f64,
    pub gradient_norm: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SearchStep {
    Progress(SearchProgress),
    Converged(FeasibleStart),
}

/// `Equation` with a target value, exposed as a `ConstraintProblem`.
///
/// Holds the compiled residual program and lazily compiled partial programs so that
/// repeated steps only run the VM.
pub struct EquationProblem<'a> {
    equation: &'a mut Equation,
    variables: VariableSet,
    target: f64,
    mode: GradientMode,
    residual_program: Bytecode,
    partial_programs: Vec<Option<Bytecode>>,
    stack: Vec<f64>,
    dual_stack: Vec<Dual>,
}

impl<'a> EquationProblem<'a> {
    pub fn new(
        equation: &'a mut Equation,
        target: f64,
        mode: GradientMode,
    ) -> Result<Self, EvalError> {
        let variables = equation.variables().clone();
        let residual_program = Compiler::new(&variables).compile(equation.rhs())?;

        let terms = equation.terms();
        let nonlinear = terms
            .iter()
            .filter(|t| matches!(t.kind, TermKind::Nonlinear { .. }))
            .count();
        debug!(
            lhs = %equation.lhs(),
            variables = variables.len(),
            terms = terms.len(),
            nonlinear,
            ?mode,
            "prepared equation problem"
        );

        Ok(Self {
            partial_programs: vec![None; variables.len()],
            equation,
            variables,
            target,
            mode,
            residual_program,
            stack: Vec::with_capacity(64),
            dual_stack: Vec::with_capacity(64),
        })
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn equation(&self) -> &Equation {
        self.equation
    }

    fn ensure_partial_program(&mut self, idx: usize) -> Result<(), ProblemError> {
        if self.partial_programs[idx].is_none() {
            let partial = self.equation.partial(&self.variables.names()[idx])?;
            let code = Compiler::new(&self.variables).compile(partial)?;
            self.partial_programs[idx] = Some(code);
        }
        Ok(())
    }
}

impl ConstraintProblem for EquationProblem<'_> {
    fn variables(&self) -> &VariableSet {
        &self.variables
    }

    fn residual(&mut self, x: &[f64]) -> Result<f64, ProblemError> {
        let value = VM::execute(&self.residual_program, x, &mut self.stack)?;
        Ok(value - self.target)
    }

    fn gradient(&mut self, x: &[f64], out: &mut [f64]) -> Result<(), ProblemError> {
        match self.mode {
            GradientMode::Symbolic => {
                for idx in 0..self.variables.len() {
                    self.ensure_partial_program(idx)?;
                    if let Some(code) = &self.partial_programs[idx] {
                        out[idx] = VM::execute(code, x, &mut self.stack)?;
                    }
                }
            }
            GradientMode::Dual => {
                forward_gradient(&self.residual_program, x, out, &mut self.dual_stack)?;
                if let Some(bad) = out.iter().copied().find(|g| !g.is_finite()) {
                    return Err(EvalError::NonFinite { value: bad }.into());
                }
            }
        }
        Ok(())
    }
}

/// Stepped feasible-start search over any `ConstraintProblem`.
///
/// Terminal states are stable: calling `step` again after convergence or failure
/// reports the same outcome without moving the point.
pub struct FeasibleSearch<P> {
    problem: P,
    settings: FeasibleSettings,
    state: Vec<f64>,
    gradient: DVector<f64>,
    best: Option<(Vec<f64>, f64)>,
    iterations: usize,
}

impl<P: ConstraintProblem> FeasibleSearch<P> {
    /// Starts from `settings.initial_assignment` for the problem's variables.
    pub fn new(problem: P, settings: FeasibleSettings) -> Result<Self, ConfigError> {
        let start = settings.initial_assignment(problem.variables());
        Self::with_start(problem, &start, settings)
    }

    /// Starts from `start`, matched by name; missing variables take `default_value`.
    pub fn with_start(
        problem: P,
        start: &FeasibleAssignment,
        settings: FeasibleSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        let state: Vec<f64> = problem
            .variables()
            .iter()
            .map(|name| start.get(name).unwrap_or(settings.default_value))
            .collect();
        if let Some((name, value)) = problem
            .variables()
            .iter()
            .zip(&state)
            .find(|(_, v)| !v.is_finite())
        {
            return Err(ConfigError::NonFiniteInitialValue {
                name: name.to_string(),
                value: *value,
            });
        }
        let dim = problem.dimension();
        Ok(Self {
            problem,
            settings,
            state,
            gradient: DVector::zeros(dim),
            best: None,
            iterations: 0,
        })
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// The point the next step will start from.
    pub fn current(&self) -> FeasibleAssignment {
        FeasibleAssignment::from_parts(self.problem.variables().clone(), self.state.clone())
    }

    pub fn settings(&self) -> &FeasibleSettings {
        &self.settings
    }

    pub fn into_problem(self) -> P {
        self.problem
    }

    /// One iteration: evaluate, test, and (if neither converged nor stuck) update.
    pub fn step(&mut self) -> Result<SearchStep, SearchFailure> {
        let iteration = self.iterations;

        let residual = match self.problem.residual(&self.state) {
            Ok(r) => r,
            Err(err) => {
                warn!(iteration, error = %err, "residual evaluation failed");
                return Err(self.fail(SearchError::from_problem(iteration, err)));
            }
        };
        self.record(residual);

        if residual.abs() <= self.settings.tolerance {
            info!(iterations = iteration, residual, "feasible start found");
            return Ok(SearchStep::Converged(FeasibleStart {
                assignment: self.current(),
                residual,
                iterations: iteration,
            }));
        }

        if iteration >= self.settings.max_iterations {
            warn!(iterations = iteration, residual, "feasible-start search did not converge");
            return Err(self.fail(SearchError::NotConverged {
                iterations: iteration,
                residual,
            }));
        }

        if let Err(err) = self
            .problem
            .gradient(&self.state, self.gradient.as_mut_slice())
        {
            warn!(iteration, error = %err, "gradient evaluation failed");
            return Err(self.fail(SearchError::from_problem(iteration, err)));
        }

        if self.gradient.iter().all(|g| *g == 0.0) {
            warn!(iteration, residual, "gradient vanished");
            return Err(self.fail(SearchError::Stalled {
                iteration,
                residual,
            }));
        }

        let norm_sq = self.gradient.norm_squared();
        let scale = self.settings.step_size * residual / (norm_sq + self.settings.epsilon);
        for (x, g) in self.state.iter_mut().zip(self.gradient.iter()) {
            *x -= scale * g;
        }
        self.iterations += 1;

        let gradient_norm = norm_sq.sqrt();
        debug!(iteration, residual, gradient_norm, "feasible-start step");
        Ok(SearchStep::Progress(SearchProgress {
            iteration,
            residual,
            gradient_norm,
        }))
    }

    /// Steps until convergence or failure.
    pub fn run(mut self) -> Result<FeasibleStart, SearchFailure> {
        loop {
            if let SearchStep::Converged(start) = self.step()? {
                return Ok(start);
            }
        }
    }

    fn record(&mut self, residual: f64) {
        let improved = self
            .best
            .as_ref()
            .map_or(true, |(_, best)| residual.abs() < best.abs());
        if improved {
            self.best = Some((self.state.clone(), residual));
        }
    }

    fn fail(&self, error: SearchError) -> SearchFailure {
        let (values, best_residual) = match &self.best {
            Some((values, residual)) => (values.clone(), Some(*residual)),
            None => (self.state.clone(), None),
        };
        SearchFailure {
            error,
            best: FeasibleAssignment::from_parts(self.problem.variables().clone(), values),
            best_residual,
            iterations: self.iterations,
        }
    }
}

/// Searches for an assignment with `rhs = target`, reusing the equation's derivative cache.
pub fn search_feasible_start(
    equation: &mut Equation,
    target: f64,
    settings: &FeasibleSettings,
) -> Result<FeasibleStart, FeasibleError> {
    settings.validate()?;
    let start = settings.initial_assignment(equation.variables());
    let problem = match EquationProblem::new(equation, target, settings.gradient) {
        Ok(problem) => problem,
        Err(source) => {
            return Err(SearchFailure {
                error: SearchError::Eval {
                    iteration: 0,
                    source,
                },
                best: start,
                best_residual: None,
                iterations: 0,
            }
            .into())
        }
    };
    let search = FeasibleSearch::with_start(problem, &start, settings.clone())?;
    Ok(search.run()?)
}

/// Parses `source` (`"lhs = rhs"`) and searches for a feasible start for `rhs = target`.
pub fn find_feasible_start(
    source: &str,
    target: f64,
    settings: &FeasibleSettings,
) -> Result<FeasibleStart, FeasibleError> {
    let mut equation = parse_equation(source)?;
    search_feasible_start(&mut equation, target, settings)
}
