//! Symbolic partial derivatives.
//!
//! `differentiate` applies the sum, difference, product, quotient and power rules node by
//! node and may leave `+ 0` / `* 1` noise behind; `simplify` removes the obvious cases.

use crate::error::DifferentiationError;
use crate::expression::{BinaryOp, Expr, UnaryOp};

/// Partial derivative of `expr` with respect to `var`, unsimplified.
///
/// Powers are only differentiable when the exponent is a literal.
pub fn differentiate(expr: &Expr, var: &str) -> Result<Expr, DifferentiationError> {
    Ok(match expr {
        Expr::Literal(_) => Expr::literal(0.0),
        Expr::Variable(name) => Expr::literal(if name == var { 1.0 } else { 0.0 }),
        Expr::Unary(UnaryOp::Neg, a) => Expr::neg(differentiate(a, var)?),
        Expr::Binary(op, a, b) => match op {
            BinaryOp::Add => Expr::binary(
                BinaryOp::Add,
                differentiate(a, var)?,
                differentiate(b, var)?,
            ),
            BinaryOp::Sub => Expr::binary(
                BinaryOp::Sub,
                differentiate(a, var)?,
                differentiate(b, var)?,
            ),
            BinaryOp::Mul => {
                // d(a)*b + a*d(b)
                Expr::binary(
                    BinaryOp::Add,
                    Expr::binary(BinaryOp::Mul, differentiate(a, var)?, b.as_ref().clone()),
                    Expr::binary(BinaryOp::Mul, a.as_ref().clone(), differentiate(b, var)?),
                )
            }
            BinaryOp::Div => {
                // (d(a)*b - a*d(b)) / (b*b)
                let numerator = Expr::binary(
                    BinaryOp::Sub,
                    Expr::binary(BinaryOp::Mul, differentiate(a, var)?, b.as_ref().clone()),
                    Expr::binary(BinaryOp::Mul, a.as_ref().clone(), differentiate(b, var)?),
                );
                let denominator =
                    Expr::binary(BinaryOp::Mul, b.as_ref().clone(), b.as_ref().clone());
                Expr::binary(BinaryOp::Div, numerator, denominator)
            }
            BinaryOp::Pow => {
                let n = b
                    .as_literal()
                    .ok_or_else(|| DifferentiationError::UnsupportedExponent {
                        exponent: b.to_string(),
                    })?;
                // n * a^(n-1) * d(a)
                Expr::binary(
                    BinaryOp::Mul,
                    Expr::binary(
                        BinaryOp::Mul,
                        Expr::literal(n),
                        Expr::binary(BinaryOp::Pow, a.as_ref().clone(), Expr::literal(n - 1.0)),
                    ),
                    differentiate(a, var)?,
                )
            }
        },
    })
}

/// Bottom-up cleanup: folds literal arithmetic and drops neutral elements.
///
/// Folding never produces a non-finite literal, so `1/0` and `0^-1` are left for the
/// evaluator to reject.
pub fn simplify(expr: &Expr) -> Expr {
    match expr {
        Expr::Literal(_) | Expr::Variable(_) => expr.clone(),
        Expr::Unary(UnaryOp::Neg, a) => match simplify(a) {
            Expr::Literal(v) => Expr::literal(-v),
            Expr::Unary(UnaryOp::Neg, inner) => *inner,
            other => Expr::neg(other),
        },
        Expr::Binary(op, a, b) => simplify_binary(*op, simplify(a), simplify(b)),
    }
}

fn simplify_binary(op: BinaryOp, a: Expr, b: Expr) -> Expr {
    if let (Some(x), Some(y)) = (a.as_literal(), b.as_literal()) {
        let folded = match op {
            BinaryOp::Add => x + y,
            BinaryOp::Sub => x - y,
            BinaryOp::Mul => x * y,
            BinaryOp::Div => x / y,
            BinaryOp::Pow => x.powf(y),
        };
        if folded.is_finite() {
            return Expr::literal(folded);
        }
    }

    let is = |e: &Expr, v: f64| e.as_literal() == Some(v);
    match op {
        BinaryOp::Add if is(&a, 0.0) => b,
        BinaryOp::Add | BinaryOp::Sub if is(&b, 0.0) => a,
        BinaryOp::Sub if is(&a, 0.0) => simplify(&Expr::neg(b)),
        BinaryOp::Mul if is(&a, 0.0) || is(&b, 0.0) => Expr::literal(0.0),
        BinaryOp::Mul if is(&a, 1.0) => b,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow if is(&b, 1.0) => a,
        BinaryOp::Pow if is(&b, 0.0) => Expr::literal(1.0),
        _ => Expr::binary(op, a, b),
    }
}
