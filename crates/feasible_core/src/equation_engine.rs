use crate::error::EvalError;
use crate::expression::{BinaryOp, Expr, FeasibleAssignment, UnaryOp, VariableSet};
use crate::traits::Scalar;
use tracing::trace;

/// Instructions for the stack VM. Binary ops pop the right operand first.
/// The stack holds `Scalar` values, so one program serves f64 and Dual evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    LoadConst(f64),
    /// Slot index into the `VariableSet` the program was compiled against.
    LoadVar(usize),
    Add,
    Sub,
    Mul,
    /// Fails when the divisor is exactly zero.
    Div,
    Pow,
    Neg,
}

/// A tree lowered to post-order: children are always emitted before their parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    ops: Vec<OpCode>,
    /// Number of variable slots the program expects.
    arity: usize,
}

impl Bytecode {
    pub fn ops(&self) -> &[OpCode] {
        &self.ops
    }

    pub fn arity(&self) -> usize {
        self.arity
    }
}

/// Compiles an `Expr` into `Bytecode`, resolving variable names to slot indices.
pub struct Compiler<'a> {
    variables: &'a VariableSet,
}

impl<'a> Compiler<'a> {
    pub fn new(variables: &'a VariableSet) -> Self {
        Self { variables }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, EvalError> {
        let mut ops = Vec::with_capacity(expr.node_count());
        self.compile_recursive(expr, &mut ops)?;
        trace!(ops = ops.len(), slots = self.variables.len(), "compiled expression");
        Ok(Bytecode {
            ops,
            arity: self.variables.len(),
        })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), EvalError> {
        match expr {
            Expr::Literal(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let idx = self
                    .variables
                    .index_of(name)
                    .ok_or_else(|| EvalError::UndefinedVariable { name: name.clone() })?;
                ops.push(OpCode::LoadVar(idx));
            }
            Expr::Binary(op, left, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
            }
            Expr::Unary(UnaryOp::Neg, operand) => {
                self.compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
        }
        Ok(())
    }
}

/// Stack-based Virtual Machine for evaluating compiled expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Variable values, indexed like the `VariableSet` used to compile.
/// - `stack`: A mutable buffer for intermediate computations.
///
/// Domain checks run on real parts, so a `Dual` evaluation fails exactly where the
/// plain one does.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        stack: &mut Vec<T>,
    ) -> Result<T, EvalError> {
        if vars.len() < bytecode.arity {
            return Err(EvalError::ArityMismatch {
                expected: bytecode.arity,
                got: vars.len(),
            });
        }
        stack.clear();

        for op in &bytecode.ops {
            match op {
                OpCode::LoadConst(val) => stack.push(T::from_real(*val)),
                OpCode::LoadVar(idx) => stack.push(vars[*idx]),
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                binary => {
                    let b = pop(stack)?;
                    let a = pop(stack)?;
                    stack.push(apply_binary(*binary, a, b)?);
                }
            }
        }

        let result = pop(stack)?;
        if !result.real().is_finite() {
            return Err(EvalError::NonFinite {
                value: result.real(),
            });
        }
        Ok(result)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, EvalError> {
    stack.pop().ok_or(EvalError::StackUnderflow)
}

fn apply_binary<T: Scalar>(op: OpCode, a: T, b: T) -> Result<T, EvalError> {
    match op {
        OpCode::Add => Ok(a + b),
        OpCode::Sub => Ok(a - b),
        OpCode::Mul => Ok(a * b),
        OpCode::Div => {
            if b.real() == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            Ok(a / b)
        }
        OpCode::Pow => {
            let (base, exponent) = (a.real(), b.real());
            if base == 0.0 && exponent < 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            let fractional = exponent.fract() != 0.0;
            if (base < 0.0 && fractional) || (base <= 0.0 && b.has_tangent()) {
                return Err(EvalError::DomainError { base, exponent });
            }
            Ok(a.pow(b))
        }
        // Loads and Neg are handled by the VM loop.
        OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::Neg => Err(EvalError::StackUnderflow),
    }
}

impl Expr {
    /// Evaluates the tree at `assignment`. Pure: the tree is only read.
    pub fn evaluate(&self, assignment: &FeasibleAssignment) -> Result<f64, EvalError> {
        let bytecode = Compiler::new(assignment.variables()).compile(self)?;
        let mut stack = Vec::with_capacity(16);
        VM::execute(&bytecode, assignment.values(), &mut stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;
    use crate::parser::parse_expression;
    use approx::assert_relative_eq;

    fn eval(src: &str, pairs: &[(&str, f64)]) -> Result<f64, EvalError> {
        let expr = parse_expression(src).expect("expression should parse");
        expr.evaluate(&FeasibleAssignment::from_pairs(pairs.iter().copied()))
    }

    #[test]
    fn compiles_to_post_order() {
        let vars: VariableSet = ["x"].into_iter().collect();
        let expr = parse_expression("2*x + 3").unwrap();
        let code = Compiler::new(&vars).compile(&expr).unwrap();
        assert_eq!(
            code.ops(),
            &[
                OpCode::LoadConst(2.0),
                OpCode::LoadVar(0),
                OpCode::Mul,
                OpCode::LoadConst(3.0),
                OpCode::Add,
            ]
        );
        assert_eq!(code.arity(), 1);
    }

    #[test]
    fn evaluates_with_precedence() {
        assert_relative_eq!(eval("2*x + 3", &[("x", 4.0)]).unwrap(), 11.0);
        assert_relative_eq!(eval("-x^2", &[("x", 3.0)]).unwrap(), -9.0);
        assert_relative_eq!(eval("2^3^2", &[]).unwrap(), 512.0);
        assert_relative_eq!(
            eval("(a - b) * c", &[("a", 5.0), ("b", 2.0), ("c", 4.0)]).unwrap(),
            12.0
        );
    }

    #[test]
    fn negative_base_with_integer_exponent_is_real() {
        assert_relative_eq!(eval("x^3", &[("x", -2.0)]).unwrap(), -8.0);
        assert_relative_eq!(eval("x^-2", &[("x", -2.0)]).unwrap(), 0.25);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert_eq!(eval("1/x", &[("x", 0.0)]), Err(EvalError::DivisionByZero));
        assert_eq!(eval("1/(x - x)", &[("x", 3.0)]), Err(EvalError::DivisionByZero));
        assert_eq!(eval("x^-1", &[("x", 0.0)]), Err(EvalError::DivisionByZero));
    }

    #[test]
    fn undefined_variable_is_an_error() {
        assert_eq!(
            eval("x + y", &[("x", 1.0)]),
            Err(EvalError::UndefinedVariable { name: "y".into() })
        );
    }

    #[test]
    fn fractional_power_of_negative_is_a_domain_error() {
        assert_eq!(
            eval("x^0.5", &[("x", -4.0)]),
            Err(EvalError::DomainError {
                base: -4.0,
                exponent: 0.5
            })
        );
        assert_relative_eq!(eval("x^0.5", &[("x", 4.0)]).unwrap(), 2.0);
    }

    #[test]
    fn overflow_is_reported_as_non_finite() {
        assert!(matches!(
            eval("x^400", &[("x", 1e10)]),
            Err(EvalError::NonFinite { .. })
        ));
    }

    #[test]
    fn execute_rejects_short_variable_slice() {
        let vars: VariableSet = ["x", "y"].into_iter().collect();
        let code = Compiler::new(&vars)
            .compile(&parse_expression("x + y").unwrap())
            .unwrap();
        let mut stack = Vec::new();
        assert_eq!(
            VM::execute(&code, &[1.0], &mut stack),
            Err(EvalError::ArityMismatch {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn dual_execution_carries_derivative() {
        let vars: VariableSet = ["x"].into_iter().collect();
        let code = Compiler::new(&vars)
            .compile(&parse_expression("x^2 - 4*x + 4").unwrap())
            .unwrap();
        let mut stack = Vec::new();
        let out = VM::execute(&code, &[Dual::new(5.0, 1.0)], &mut stack).unwrap();
        assert_relative_eq!(out.value, 9.0);
        assert_relative_eq!(out.tangent, 6.0);
    }

    #[test]
    fn variable_exponent_needs_positive_base_under_dual() {
        let vars: VariableSet = ["x"].into_iter().collect();
        let code = Compiler::new(&vars)
            .compile(&parse_expression("2^x").unwrap())
            .unwrap();
        let mut stack = Vec::new();
        let out = VM::execute(&code, &[Dual::new(3.0, 1.0)], &mut stack).unwrap();
        assert_relative_eq!(out.value, 8.0);
        assert_relative_eq!(out.tangent, 8.0 * 2.0_f64.ln(), epsilon = 1e-12);

        let code = Compiler::new(&vars)
            .compile(&parse_expression("(0 - 2)^x").unwrap())
            .unwrap();
        assert!(matches!(
            VM::execute(&code, &[Dual::new(2.0, 1.0)], &mut stack),
            Err(EvalError::DomainError { .. })
        ));
    }
}
