//! Runtime value type for the script language.
//!
//! Scripts are dynamically typed: every value is text at heart, but numeric
//! assignments (`:=`) produce integers and the evaluator coerces between the
//! two when an operator needs it.

use std::fmt;

/// A script runtime value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

impl Value {
    /// Truthiness: the empty string and the canonical literal `0` are false.
    ///
    /// Non-canonical spellings such as `"0 "` or `"00"` are true, as is every
    /// non-zero integer including negative ones.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty() && s != "0",
        }
    }

    /// Integer view of the value, or `None` if the text is not an integer.
    ///
    /// Surrounding whitespace is tolerated; a leading `+` is accepted.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
        }
    }

    /// Text view of the value.
    pub fn as_str(&self) -> String {
        self.to_string()
    }

    /// Promote a string that spells a canonical integer to `Int`.
    pub fn normalized(self) -> Value {
        match self {
            Value::Str(s) => match s.parse::<i64>() {
                Ok(n) if n.to_string() == s => Value::Int(n),
                _ => Value::Str(s),
            },
            v => v,
        }
    }

    // ── Arithmetic helpers ────────────────────────────────────────────────────

    fn operands(&self, rhs: &Value, op: &str) -> Result<(i64, i64), String> {
        let a = self
            .as_int()
            .ok_or_else(|| format!("'{self}' is not a number (operator {op})"))?;
        let b = rhs
            .as_int()
            .ok_or_else(|| format!("'{rhs}' is not a number (operator {op})"))?;
        Ok((a, b))
    }

    pub fn arith_add(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b) = self.operands(rhs, "+")?;
        Ok(Value::Int(a.wrapping_add(b)))
    }

    pub fn arith_sub(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b) = self.operands(rhs, "-")?;
        Ok(Value::Int(a.wrapping_sub(b)))
    }

    pub fn arith_mul(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b) = self.operands(rhs, "*")?;
        Ok(Value::Int(a.wrapping_mul(b)))
    }

    /// Integer division truncating toward zero.
    pub fn arith_div(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b) = self.operands(rhs, "/")?;
        if b == 0 {
            return Err("division by zero".into());
        }
        Ok(Value::Int(a.wrapping_div(b)))
    }

    /// Remainder with the sign of the dividend (truncating division).
    pub fn arith_rem(&self, rhs: &Value) -> Result<Value, String> {
        let (a, b) = self.operands(rhs, "%")?;
        if b == 0 {
            return Err("modulo by zero".into());
        }
        Ok(Value::Int(a.wrapping_rem(b)))
    }

    pub fn arith_neg(&self) -> Result<Value, String> {
        let n = self
            .as_int()
            .ok_or_else(|| format!("'{self}' is not a number (unary -)"))?;
        Ok(Value::Int(n.wrapping_neg()))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Int(if b { 1 } else { 0 })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::Str("hello".into()).to_string(), "hello");
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Str(String::new()).as_bool());
        assert!(!Value::Str("0".into()).as_bool());
        assert!(!Value::Int(0).as_bool());
        assert!(Value::Str("0 ".into()).as_bool());
        assert!(Value::Str("00".into()).as_bool());
        assert!(Value::Int(-1).as_bool());
        assert!(Value::Str("no".into()).as_bool());
    }

    #[test]
    fn int_coercion() {
        assert_eq!(Value::Str(" 42 ".into()).as_int(), Some(42));
        assert_eq!(Value::Str("abc".into()).as_int(), None);
        assert_eq!(Value::Int(3).as_int(), Some(3));
    }

    #[test]
    fn normalized_only_canonical() {
        assert_eq!(Value::from("12").normalized(), Value::Int(12));
        assert_eq!(Value::from("012").normalized(), Value::from("012"));
        assert_eq!(Value::from("1 ").normalized(), Value::from("1 "));
    }

    #[test]
    fn arithmetic_truncates_toward_zero() {
        let a = Value::Int(-7);
        let b = Value::Int(2);
        assert_eq!(a.arith_div(&b), Ok(Value::Int(-3)));
        assert_eq!(a.arith_rem(&b), Ok(Value::Int(-1)));
        assert_eq!(Value::Int(10).arith_add(&Value::from("5")), Ok(Value::Int(15)));
    }

    #[test]
    fn div_by_zero() {
        assert!(Value::Int(1).arith_div(&Value::Int(0)).is_err());
        assert!(Value::Int(1).arith_rem(&Value::Int(0)).is_err());
    }

    #[test]
    fn non_numeric_operand_is_error() {
        assert!(Value::from("x").arith_add(&Value::Int(1)).is_err());
        assert!(Value::from("x").arith_neg().is_err());
    }

    #[test]
    fn from_impls() {
        let v: Value = true.into();
        assert_eq!(v, Value::Int(1));
        let v: Value = 4usize.into();
        assert_eq!(v, Value::Int(4));
    }
}
