//======---------------------------------------------------------------======//
//                                                                           //
// Copyright 2022-2023 Evan Cox <evanacox00@gmail.com>. All rights reserved. //
//                                                                           //
// Use of this source code is governed by a BSD-style license that can be    //
// found in the LICENSE.txt file at the root of this project, or at the      //
// following link: https://opensource.org/licenses/BSD-3-Clause              //
//                                                                           //
//======---------------------------------------------------------------======//

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};
use std::fmt;
use std::ops;
use std::str::FromStr;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// An arbitrary-precision signed integer, the sole runtime value type of
/// the IL.
///
/// All arithmetic is exact. The partial operations (division, remainder and
/// the shifts) go through the `checked_*` methods, which report the failure
/// kind instead of panicking.
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Value(BigInt);

/// The ways a partial arithmetic operation can fail at runtime.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ArithError {
    /// Division or remainder with a zero divisor
    #[error("division by zero")]
    DivByZero,
    /// A shift with a negative shift amount
    #[error("negative shift amount")]
    NegativeShift,
    /// A left shift whose amount does not fit in the address space
    #[error("shift amount too wide to materialize")]
    ShiftTooWide,
}

impl Value {
    /// The value `0`.
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    /// Maps `true` to `1` and `false` to `0`, the encoding every comparison
    /// instruction produces.
    pub fn from_bool(b: bool) -> Self {
        Self(BigInt::from(b as i64))
    }

    /// Whether the value is non-zero. This is the branch-condition rule:
    /// any non-zero integer (including negatives) is true.
    pub fn is_truthy(&self) -> bool {
        !self.0.is_zero()
    }

    /// Division truncating toward zero. The remainder counterpart is
    /// [`Self::checked_rem`]; together they satisfy `l == (l / r) * r + l % r`.
    pub fn checked_div(&self, rhs: &Value) -> Result<Value, ArithError> {
        if rhs.0.is_zero() {
            return Err(ArithError::DivByZero);
        }

        Ok(Value(&self.0 / &rhs.0))
    }

    /// Remainder matching truncated division, i.e. the result has the sign
    /// of the dividend.
    pub fn checked_rem(&self, rhs: &Value) -> Result<Value, ArithError> {
        if rhs.0.is_zero() {
            return Err(ArithError::DivByZero);
        }

        Ok(Value(&self.0 % &rhs.0))
    }

    /// Left shift. The amount must be non-negative and small enough that
    /// the result fits in the address space.
    pub fn checked_shl(&self, amount: &Value) -> Result<Value, ArithError> {
        let n = Self::shift_amount(amount)?.ok_or(ArithError::ShiftTooWide)?;

        Ok(Value(&self.0 << n))
    }

    /// Arithmetic right shift. The amount must be non-negative; an amount
    /// wider than the address space saturates to `0` or `-1` without
    /// materializing anything.
    pub fn checked_shr(&self, amount: &Value) -> Result<Value, ArithError> {
        match Self::shift_amount(amount)? {
            Some(n) => Ok(Value(&self.0 >> n)),
            None if self.0.is_negative() => Ok(Value::from(-1)),
            None => Ok(Value::zero()),
        }
    }

    fn shift_amount(amount: &Value) -> Result<Option<usize>, ArithError> {
        if amount.0.is_negative() {
            return Err(ArithError::NegativeShift);
        }

        Ok(amount.0.to_usize())
    }

    /// Parses an integer literal in the surface syntax, `-?(0x<hex>+|<dec>+)`.
    pub fn parse(s: &str) -> Option<Value> {
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let magnitude = match digits.strip_prefix("0x") {
            Some(hex) if !hex.is_empty() => BigInt::parse_bytes(hex.as_bytes(), 16)?,
            Some(_) => return None,
            None if !digits.is_empty() => BigInt::from_str(digits).ok()?,
            None => return None,
        };

        Some(Value(if negative { -magnitude } else { magnitude }))
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self(BigInt::from(v))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! value_binop {
    ($($trait:ident, $method:ident);+ $(;)?) => {
        $(
            impl ops::$trait<&Value> for &Value {
                type Output = Value;

                fn $method(self, rhs: &Value) -> Value {
                    Value(ops::$trait::$method(&self.0, &rhs.0))
                }
            }
        )+
    };
}

value_binop! {
    Add, add;
    Sub, sub;
    Mul, mul;
    BitAnd, bitand;
    BitOr, bitor;
    BitXor, bitxor;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(n: i64) -> Value {
        Value::from(n)
    }

    #[test]
    fn division_truncates_toward_zero() {
        for (l, r, q, m) in [(7, 2, 3, 1), (-7, 2, -3, -1), (7, -2, -3, 1), (-7, -2, 3, -1)] {
            assert_eq!(v(l).checked_div(&v(r)), Ok(v(q)));
            assert_eq!(v(l).checked_rem(&v(r)), Ok(v(m)));

            // l == (l / r) * r + l % r
            assert_eq!(&(&v(q) * &v(r)) + &v(m), v(l));
        }
    }

    #[test]
    fn zero_divisor_is_rejected() {
        assert_eq!(v(1).checked_div(&v(0)), Err(ArithError::DivByZero));
        assert_eq!(v(1).checked_rem(&v(0)), Err(ArithError::DivByZero));
    }

    #[test]
    fn right_shift_is_arithmetic() {
        assert_eq!(v(-8).checked_shr(&v(1)), Ok(v(-4)));
        assert_eq!(v(-1).checked_shr(&v(200)), Ok(v(-1)));
        assert_eq!(v(1).checked_shr(&v(200)), Ok(v(0)));
    }

    #[test]
    fn negative_shift_amounts_are_rejected() {
        assert_eq!(v(1).checked_shl(&v(-1)), Err(ArithError::NegativeShift));
        assert_eq!(v(1).checked_shr(&v(-1)), Err(ArithError::NegativeShift));
    }

    #[test]
    fn parse_decimal_and_hex() {
        assert_eq!(Value::parse("42"), Some(v(42)));
        assert_eq!(Value::parse("-42"), Some(v(-42)));
        assert_eq!(Value::parse("0x2a"), Some(v(42)));
        assert_eq!(Value::parse("-0x2A"), Some(v(-42)));
        assert_eq!(Value::parse(""), None);
        assert_eq!(Value::parse("0x"), None);
        assert_eq!(Value::parse("4 2"), None);
    }

    #[test]
    fn big_values_do_not_wrap() {
        let big = Value::parse("0xffffffffffffffffffffffff").unwrap();
        let bigger = &big + &v(1);

        assert!(bigger > big);
        assert_eq!(&bigger - &big, v(1));
    }
}
