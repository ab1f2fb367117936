//! Runtime values
//!
//! `Value` is what an Oaf program computes with: pure data, no references
//! between values. Strings are shared handles so cloning a value is cheap.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A single runtime value.
///
/// Integers are 64-bit two's complement and wrap on overflow. Floats are
/// IEEE 754 doubles. `Unit` is the result of programs that fall off the end
/// without a top-level `return`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    /// Shared string handle; cloning is an `Arc` bump.
    Str(Arc<str>),
    Unit,
}

impl Value {
    /// Human-readable name of the value's type, used in runtime errors.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::Str(_) => "string",
            Value::Unit => "unit",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                // Always show a decimal point so `2.0` does not print as `2`.
                if x.fract() == 0.0 && x.is_finite() {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{}", c),
            Value::Str(s) => write!(f, "{}", s),
            Value::Unit => write!(f, "unit"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_int_and_float() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(2.0).to_string(), "2.0");
        assert_eq!(Value::Float(1.25).to_string(), "1.25");
    }

    #[test]
    fn test_display_unit_and_bool() {
        assert_eq!(Value::Unit.to_string(), "unit");
        assert_eq!(Value::Bool(true).to_string(), "true");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(Value::Int(0).type_name(), "int");
        assert_eq!(Value::Str(Arc::from("x")).type_name(), "string");
    }
}
