//! Exact compile-time values attached to constant expressions.

use serde::{Deserialize, Serialize};

use crate::ast::NodeId;

/// A compile-time constant computed by the semantic phase.
///
/// `Compound` points back at the originating literal; its element
/// expressions carry their own exact values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExactValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Str(String),
    Compound(NodeId),
}

impl ExactValue {
    /// Coerce towards an integer value, truncating floats.
    pub fn to_integer(&self) -> ExactValue {
        match self {
            ExactValue::Integer(_) => self.clone(),
            ExactValue::Float(f) => ExactValue::Integer(*f as i64),
            ExactValue::Bool(b) => ExactValue::Integer(i64::from(*b)),
            _ => self.clone(),
        }
    }

    /// Coerce towards a floating-point value.
    pub fn to_float(&self) -> ExactValue {
        match self {
            ExactValue::Float(_) => self.clone(),
            ExactValue::Integer(i) => ExactValue::Float(*i as f64),
            _ => self.clone(),
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ExactValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ExactValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_coercion() {
        assert_eq!(ExactValue::Float(3.7).to_integer(), ExactValue::Integer(3));
        assert_eq!(ExactValue::Bool(true).to_integer(), ExactValue::Integer(1));
    }

    #[test]
    fn test_float_coercion() {
        assert_eq!(ExactValue::Integer(2).to_float(), ExactValue::Float(2.0));
    }
}
