//! Parent-index view over an owning expression tree.
//!
//! `Expr` only points downwards. When a caller needs to walk upwards (which operator
//! consumes a leaf, which additive term a variable belongs to) it builds a `NodeTable`
//! once; nodes are numbered in pre-order, so the root is always `0`.

use crate::expression::{BinaryOp, Expr, UnaryOp, VariableSet};

pub type NodeId = usize;

/// Operator attached to an internal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Binary(BinaryOp),
    Unary(UnaryOp),
}

pub struct NodeTable<'a> {
    nodes: Vec<&'a Expr>,
    parents: Vec<Option<NodeId>>,
    children: Vec<Vec<NodeId>>,
}

impl<'a> NodeTable<'a> {
    pub fn build(root: &'a Expr) -> Self {
        let capacity = root.node_count();
        let mut table = Self {
            nodes: Vec::with_capacity(capacity),
            parents: Vec::with_capacity(capacity),
            children: Vec::with_capacity(capacity),
        };
        table.visit(root, None);
        table
    }

    fn visit(&mut self, expr: &'a Expr, parent: Option<NodeId>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(expr);
        self.parents.push(parent);
        self.children.push(Vec::new());
        for child in expr.children() {
            let child_id = self.visit(child, Some(id));
            self.children[id].push(child_id);
        }
        id
    }

    pub fn root(&self) -> NodeId {
        0
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&'a Expr> {
        self.nodes.get(id).copied()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.parents.get(id).copied().flatten()
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Parent, grandparent, ... up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&p| self.parent(p))
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.ancestors(id).count()
    }

    /// Every `Variable` leaf named `name`, in left-to-right order.
    pub fn occurrences(&self, name: &str) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| matches!(node, Expr::Variable(n) if n == name))
            .map(|(id, _)| id)
            .collect()
    }

    /// The operator of the node's parent, i.e. the operator that consumes its value.
    pub fn consumer(&self, id: NodeId) -> Option<Operator> {
        self.parent(id).and_then(|p| operator_of(self.nodes[p]))
    }

    /// True when `ancestor` lies on the path from `id` to the root (or is `id`).
    pub fn is_within(&self, id: NodeId, ancestor: NodeId) -> bool {
        id == ancestor || self.ancestors(id).any(|a| a == ancestor)
    }
}

fn operator_of(expr: &Expr) -> Option<Operator> {
    match expr {
        Expr::Binary(op, _, _) => Some(Operator::Binary(*op)),
        Expr::Unary(op, _) => Some(Operator::Unary(*op)),
        Expr::Literal(_) | Expr::Variable(_) => None,
    }
}

/// How a term depends on the variables.
#[derive(Debug, Clone, PartialEq)]
pub enum TermKind {
    Constant,
    /// Affine in every variable it mentions.
    Linear { variables: VariableSet },
    Nonlinear { variables: VariableSet },
}

/// One summand of the right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub expr: Expr,
    /// True when the term enters the sum with a minus sign.
    pub negated: bool,
    pub kind: TermKind,
}

/// Splits `expr` along its top-level `+`, `-` and negation nodes and classifies each
/// resulting term.
pub fn classify_terms(expr: &Expr) -> Vec<Term> {
    let table = NodeTable::build(expr);
    let mut terms = Vec::new();
    collect_terms(&table, table.root(), false, &mut terms);
    terms
}

fn collect_terms(table: &NodeTable<'_>, id: NodeId, negated: bool, out: &mut Vec<Term>) {
    let Some(node) = table.node(id) else {
        return;
    };
    let children = table.children(id);
    match node {
        Expr::Binary(BinaryOp::Add, _, _) => {
            collect_terms(table, children[0], negated, out);
            collect_terms(table, children[1], negated, out);
        }
        Expr::Binary(BinaryOp::Sub, _, _) => {
            collect_terms(table, children[0], negated, out);
            collect_terms(table, children[1], !negated, out);
        }
        Expr::Unary(UnaryOp::Neg, _) => collect_terms(table, children[0], !negated, out),
        _ => out.push(Term {
            expr: node.clone(),
            negated,
            kind: classify(table, id),
        }),
    }
}

fn classify(table: &NodeTable<'_>, term: NodeId) -> TermKind {
    let Some(node) = table.node(term) else {
        return TermKind::Constant;
    };
    let variables = node.variables();
    if variables.is_empty() {
        return TermKind::Constant;
    }

    let linear = variables.iter().all(|name| {
        table
            .occurrences(name)
            .into_iter()
            .filter(|&leaf| table.is_within(leaf, term))
            .all(|leaf| is_linear_path(table, leaf, term))
    });

    if linear {
        TermKind::Linear { variables }
    } else {
        TermKind::Nonlinear { variables }
    }
}

/// Walks from a variable leaf up to the term root, checking that every operator on the
/// way keeps the expression affine in that leaf.
fn is_linear_path(table: &NodeTable<'_>, leaf: NodeId, term: NodeId) -> bool {
    let mut child = leaf;
    while child != term {
        let Some(parent) = table.parent(child) else {
            return false;
        };
        let siblings = table.children(parent);
        let sibling_is_constant = siblings
            .iter()
            .filter(|&&s| s != child)
            .all(|&s| table.node(s).is_some_and(Expr::is_constant));
        let ok = match table.consumer(child) {
            Some(Operator::Binary(BinaryOp::Add | BinaryOp::Sub)) => true,
            Some(Operator::Unary(UnaryOp::Neg)) => true,
            Some(Operator::Binary(BinaryOp::Mul)) => sibling_is_constant,
            Some(Operator::Binary(BinaryOp::Div)) => siblings[0] == child && sibling_is_constant,
            Some(Operator::Binary(BinaryOp::Pow)) | None => false,
        };
        if !ok {
            return false;
        }
        child = parent;
    }
    true
}
