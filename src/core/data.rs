//! Presentation value types.
//!
//! [`Value`] is what a presentation surface sees once a raw sensor payload
//! has been rendered; it carries no protocol detail.

use serde::Serialize;

/// A rendered sensor value.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(untagged)]
pub enum Value {
    /// Floating-point number (sensors with decimal places)
    Float(f64),

    /// Integer value
    Integer(i64),

    /// Boolean value
    Bool(bool),

    /// String value
    String(String),

    /// Null/missing value
    #[default]
    Null,
}

impl Value {
    /// Try to get the value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Try to get the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Bool(v) => Some(if *v { 1 } else { 0 }),
            _ => None,
        }
    }

    /// Check if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{}", v),
            Self::Integer(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
            Self::String(s) => write!(f, "{}", s),
            Self::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_conversions() {
        let v = Value::Float(42.5);
        assert_eq!(v.as_f64(), Some(42.5));
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::Bool(true);
        assert_eq!(v.as_f64(), Some(1.0));
        assert!(!v.is_null());
    }

    #[test]
    fn test_value_serializes_untagged() {
        assert_eq!(serde_json::to_string(&Value::Float(123.4)).unwrap(), "123.4");
        assert_eq!(serde_json::to_string(&Value::Integer(7)).unwrap(), "7");
        assert_eq!(serde_json::to_string(&Value::Null).unwrap(), "null");
    }
}
