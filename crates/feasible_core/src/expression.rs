use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Binary operators, in the spelling the parser accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> char {
        match self {
            BinaryOp::Add => '+',
            BinaryOp::Sub => '-',
            BinaryOp::Mul => '*',
            BinaryOp::Div => '/',
            BinaryOp::Pow => '^',
        }
    }
}

/// Unary operators. Only negation is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
}

/// Expression tree node.
///
/// Each node owns its children, so a tree is never shared between parents and
/// cannot contain cycles. Upward traversal goes through `NodeTable`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Literal(f64),
    Variable(String),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
}

impl Expr {
    pub fn literal(value: f64) -> Self {
        Expr::Literal(value)
    }

    pub fn variable(name: impl Into<String>) -> Self {
        Expr::Variable(name.into())
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn neg(operand: Expr) -> Self {
        Expr::Unary(UnaryOp::Neg, Box::new(operand))
    }

    /// Children in left-to-right order: none for leaves, one for unary, two for binary.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Expr::Literal(_) | Expr::Variable(_) => Vec::new(),
            Expr::Unary(_, operand) => vec![operand.as_ref()],
            Expr::Binary(_, left, right) => vec![left.as_ref(), right.as_ref()],
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Expr::Literal(_) | Expr::Variable(_))
    }

    pub fn as_literal(&self) -> Option<f64> {
        match self {
            Expr::Literal(value) => Some(*value),
            _ => None,
        }
    }

    /// True when no `Variable` leaf appears anywhere below this node.
    pub fn is_constant(&self) -> bool {
        match self {
            Expr::Literal(_) => true,
            Expr::Variable(_) => false,
            Expr::Unary(_, operand) => operand.is_constant(),
            Expr::Binary(_, left, right) => left.is_constant() && right.is_constant(),
        }
    }

    /// Number of nodes in the subtree rooted here.
    pub fn node_count(&self) -> usize {
        1 + self.children().iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Distinct variable names in first-occurrence (left-to-right) order.
    pub fn variables(&self) -> VariableSet {
        let mut set = VariableSet::new();
        self.collect_variables(&mut set);
        set
    }

    fn collect_variables(&self, set: &mut VariableSet) {
        match self {
            Expr::Literal(_) => {}
            Expr::Variable(name) => {
                set.insert(name);
            }
            Expr::Unary(_, operand) => operand.collect_variables(set),
            Expr::Binary(_, left, right) => {
                left.collect_variables(set);
                right.collect_variables(set);
            }
        }
    }
}

/// Fully parenthesized infix. Re-parses to a tree that evaluates identically.
///
/// Negative literals are wrapped too, since `-2 ^ 2` would read back as `-(2 ^ 2)`.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) if value.is_sign_negative() => write!(f, "({value})"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::Variable(name) => write!(f, "{name}"),
            Expr::Unary(UnaryOp::Neg, operand) => write!(f, "(-{operand})"),
            Expr::Binary(op, left, right) => write!(f, "({left} {} {right})", op.symbol()),
        }
    }
}

/// Ordered set of distinct variable names.
/// Order fixes the layout of assignment vectors and gradients.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableSet {
    names: Vec<String>,
}

impl VariableSet {
    pub fn new() -> Self {
        Self { names: Vec::new() }
    }

    /// Inserts `name` if absent. Returns its index either way.
    pub fn insert(&mut self, name: &str) -> usize {
        match self.index_of(name) {
            Some(idx) => idx,
            None => {
                self.names.push(name.to_string());
                self.names.len() - 1
            }
        }
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for VariableSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = VariableSet::new();
        for name in iter {
            set.insert(name.as_ref());
        }
        set
    }
}

/// One point in variable space: a value for every variable of a `VariableSet`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeasibleAssignment {
    variables: VariableSet,
    values: Vec<f64>,
}

impl FeasibleAssignment {
    /// Every variable set to `value`.
    pub fn uniform(variables: VariableSet, value: f64) -> Self {
        let values = vec![value; variables.len()];
        Self { variables, values }
    }

    /// Pairs names with values positionally. Returns `None` on a length mismatch.
    pub fn from_values(variables: VariableSet, values: Vec<f64>) -> Option<Self> {
        (variables.len() == values.len()).then_some(Self { variables, values })
    }

    pub(crate) fn from_parts(variables: VariableSet, values: Vec<f64>) -> Self {
        debug_assert_eq!(variables.len(), values.len());
        Self { variables, values }
    }

    /// Builds an assignment from `(name, value)` pairs; a repeated name keeps the last value.
    pub fn from_pairs<S: AsRef<str>>(pairs: impl IntoIterator<Item = (S, f64)>) -> Self {
        let mut assignment = Self::uniform(VariableSet::new(), 0.0);
        for (name, value) in pairs {
            assignment.insert(name.as_ref(), value);
        }
        assignment
    }

    pub fn variables(&self) -> &VariableSet {
        &self.variables
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.variables.index_of(name).map(|idx| self.values[idx])
    }

    /// Updates an existing variable. Returns false if `name` is not part of the assignment.
    pub fn set(&mut self, name: &str, value: f64) -> bool {
        match self.variables.index_of(name) {
            Some(idx) => {
                self.values[idx] = value;
                true
            }
            None => false,
        }
    }

    /// Sets `name`, appending it if it is new.
    pub fn insert(&mut self, name: &str, value: f64) {
        let idx = self.variables.insert(name);
        if idx == self.values.len() {
            self.values.push(value);
        } else {
            self.values[idx] = value;
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.variables.iter().zip(self.values.iter().copied())
    }

    pub fn to_map(&self) -> HashMap<String, f64> {
        self.iter().map(|(n, v)| (n.to_string(), v)).collect()
    }
}
