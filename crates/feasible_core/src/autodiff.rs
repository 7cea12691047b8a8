use crate::equation_engine::{Bytecode, VM};
use crate::error::EvalError;
use crate::traits::Scalar;
use num_traits::{Num, One, Zero};
use std::ops::{Add, Div, Mul, Neg, Rem, Sub};

/// Dual number `value + tangent * e` with `e^2 = 0`, for forward-mode gradients.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Dual {
    pub value: f64,
    pub tangent: f64,
}

impl Dual {
    pub fn new(value: f64, tangent: f64) -> Self {
        Self { value, tangent }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(value, 0.0)
    }

    /// Seed for the variable being differentiated.
    pub fn seeded(value: f64) -> Self {
        Self::new(value, 1.0)
    }
}

impl Zero for Dual {
    fn zero() -> Self {
        Self::new(0.0, 0.0)
    }
    fn is_zero(&self) -> bool {
        self.value == 0.0 && self.tangent == 0.0
    }
}

impl One for Dual {
    fn one() -> Self {
        Self::new(1.0, 0.0)
    }
}

impl Add for Dual {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.value + rhs.value, self.tangent + rhs.tangent)
    }
}

impl Sub for Dual {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.value - rhs.value, self.tangent - rhs.tangent)
    }
}

impl Mul for Dual {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.value * rhs.value, self.value * rhs.tangent + self.tangent * rhs.value)
    }
}

impl Div for Dual {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        let quotient = self.value / rhs.value;
        Self::new(quotient, (self.tangent - quotient * rhs.tangent) / rhs.value)
    }
}

impl Neg for Dual {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.value, -self.tangent)
    }
}

impl Rem for Dual {
    type Output = Self;
    fn rem(self, rhs: Self) -> Self {
        // Piecewise constant offset, so the tangent passes through unchanged.
        Self::new(self.value % rhs.value, self.tangent)
    }
}

impl Num for Dual {
    type FromStrRadixErr = ();
    fn from_str_radix(str: &str, radix: u32) -> Result<Self, Self::FromStrRadixErr> {
        f64::from_str_radix(str, radix)
            .map(Self::constant)
            .map_err(|_| ())
    }
}

impl Scalar for Dual {
    fn from_real(value: f64) -> Self {
        Self::constant(value)
    }

    fn real(&self) -> f64 {
        self.value
    }

    fn has_tangent(&self) -> bool {
        self.tangent != 0.0
    }

    fn pow(self, exponent: Self) -> Self {
        let value = self.value.powf(exponent.value);
        if exponent.tangent == 0.0 {
            if self.tangent == 0.0 {
                return Self::constant(value);
            }
            // Power rule; no ln(), so negative bases with integer exponents work.
            let slope = exponent.value * self.value.powf(exponent.value - 1.0);
            return Self::new(value, slope * self.tangent);
        }
        // d(a^b) = a^b * (b' ln a + b a' / a)
        let tangent = value
            * (exponent.tangent * self.value.ln() + exponent.value * self.tangent / self.value);
        Self::new(value, tangent)
    }
}

/// Forward-mode gradient of a compiled program at `x`: one seeded pass per variable.
/// Returns the plain value alongside the gradient written into `out`.
pub fn forward_gradient(
    bytecode: &Bytecode,
    x: &[f64],
    out: &mut [f64],
    stack: &mut Vec<Dual>,
) -> Result<f64, EvalError> {
    let mut seeded: Vec<Dual> = x.iter().copied().map(Dual::constant).collect();
    if x.is_empty() {
        return VM::execute(bytecode, &seeded, stack).map(|d| d.value);
    }

    let mut value = 0.0;
    for (j, slot) in out.iter_mut().enumerate().take(x.len()) {
        seeded[j] = Dual::seeded(x[j]);
        let result = VM::execute(bytecode, &seeded, stack)?;
        seeded[j] = Dual::constant(x[j]);
        *slot = result.tangent;
        value = result.value;
    }
    Ok(value)
}
