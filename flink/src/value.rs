//! Boxed runtime values and their static kinds.
//!
//! A `Value` is the uniform boxed representation every frame slot can fall
//! back to. The interpreter prefers to keep `Int`/`Float`/`Bool` payloads
//! in typed frame slots and only materializes a `Value` when a site has
//! gone boxed.

use std::fmt;
use std::sync::Arc;

/// A boxed runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Arc<str>),
}

/// Static kind of a stack input or result.
///
/// `Ref` covers everything without a native primitive layout; it never
/// participates in boxing elimination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Int,
    Float,
    Bool,
    Ref,
}

impl ValueKind {
    /// Whether values of this kind can live unboxed in a frame slot.
    pub fn is_unboxable(self) -> bool {
        !matches!(self, ValueKind::Ref)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Bool => "bool",
            ValueKind::Ref => "ref",
        }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Bool(_) => ValueKind::Bool,
            Value::Null | Value::Str(_) => ValueKind::Ref,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            // bitwise so NaN constants dedupe stably in the pool
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

#[cfg(test)]
mod value_tests {
    use super::*;

    #[test]
    fn kinds_match_payloads() {
        assert_eq!(Value::Int(1).kind(), ValueKind::Int);
        assert_eq!(Value::Float(1.5).kind(), ValueKind::Float);
        assert_eq!(Value::Bool(true).kind(), ValueKind::Bool);
        assert_eq!(Value::Null.kind(), ValueKind::Ref);
        assert_eq!(Value::from("x").kind(), ValueKind::Ref);
    }

    #[test]
    fn ref_kind_is_never_unboxable() {
        assert!(ValueKind::Int.is_unboxable());
        assert!(ValueKind::Float.is_unboxable());
        assert!(ValueKind::Bool.is_unboxable());
        assert!(!ValueKind::Ref.is_unboxable());
    }

    #[test]
    fn accessors_only_match_their_own_payload() {
        assert_eq!(Value::Int(3).as_int(), Some(3));
        assert_eq!(Value::Float(2.5).as_float(), Some(2.5));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::from("s").as_str(), Some("s"));
        assert_eq!(Value::Int(3).as_float(), None);
        assert_eq!(Value::Null.as_int(), None);
    }

    #[test]
    fn float_equality_is_bitwise() {
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
    }
}
