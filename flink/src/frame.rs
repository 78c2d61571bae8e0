//! Per-invocation frame: typed local and stack slots.
//!
//! Each slot holds either an unboxed primitive of one fixed kind or a boxed
//! [`Value`]. Typed reads on a slot of the wrong kind fail with
//! [`FrameTypeMismatch`] and nothing else; that failure is the signal the
//! boxing-elimination state machine observes, so it must never be
//! conflated with bounds errors (those panic) or operation faults.

use crate::value::Value;

/// Signal raised by a typed read on a slot storing a different kind.
///
/// Always caught inside the interpreter; never surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTypeMismatch {
    pub slot: usize,
}

#[derive(Debug, Clone, Default)]
enum Slot {
    #[default]
    Empty,
    Int(i64),
    Float(f64),
    Bool(bool),
    Boxed(Value),
}

/// Indexable slot storage for one invocation: locals first, then the
/// operand stack.
#[derive(Debug)]
pub struct Frame {
    slots: Vec<Slot>,
}

impl Frame {
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![Slot::Empty; size],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get_int(&self, slot: usize) -> Result<i64, FrameTypeMismatch> {
        match self.slots[slot] {
            Slot::Int(v) => Ok(v),
            _ => Err(FrameTypeMismatch { slot }),
        }
    }

    pub fn get_float(&self, slot: usize) -> Result<f64, FrameTypeMismatch> {
        match self.slots[slot] {
            Slot::Float(v) => Ok(v),
            _ => Err(FrameTypeMismatch { slot }),
        }
    }

    pub fn get_bool(&self, slot: usize) -> Result<bool, FrameTypeMismatch> {
        match self.slots[slot] {
            Slot::Bool(v) => Ok(v),
            _ => Err(FrameTypeMismatch { slot }),
        }
    }

    /// Boxed read. Never fails on kind grounds: primitives are boxed on the
    /// way out, empty slots read as `Null`.
    pub fn get_value(&self, slot: usize) -> Value {
        match &self.slots[slot] {
            Slot::Empty => Value::Null,
            Slot::Int(v) => Value::Int(*v),
            Slot::Float(v) => Value::Float(*v),
            Slot::Bool(v) => Value::Bool(*v),
            Slot::Boxed(v) => v.clone(),
        }
    }

    pub fn set_int(&mut self, slot: usize, value: i64) {
        self.slots[slot] = Slot::Int(value);
    }

    pub fn set_float(&mut self, slot: usize, value: f64) {
        self.slots[slot] = Slot::Float(value);
    }

    pub fn set_bool(&mut self, slot: usize, value: bool) {
        self.slots[slot] = Slot::Bool(value);
    }

    /// Boxed write. Always succeeds.
    pub fn set_value(&mut self, slot: usize, value: Value) {
        self.slots[slot] = Slot::Boxed(value);
    }

    /// Store with the natural representation: primitives go in unboxed,
    /// everything else boxed.
    pub fn store(&mut self, slot: usize, value: Value) {
        self.slots[slot] = match value {
            Value::Int(v) => Slot::Int(v),
            Value::Float(v) => Slot::Float(v),
            Value::Bool(v) => Slot::Bool(v),
            other => Slot::Boxed(other),
        };
    }

    /// Copy a slot verbatim, preserving its boxed/unboxed representation.
    pub fn copy(&mut self, from: usize, to: usize) {
        self.slots[to] = self.slots[from].clone();
    }

    pub fn clear(&mut self, slot: usize) {
        self.slots[slot] = Slot::Empty;
    }

    /// Whether the slot currently holds a boxed value. Instrumentation and
    /// test helper, not part of the execution protocol.
    pub fn is_boxed(&self, slot: usize) -> bool {
        matches!(self.slots[slot], Slot::Boxed(_))
    }
}

#[cfg(test)]
mod frame_tests {
    use super::*;

    #[test]
    fn typed_read_matches_typed_write() {
        let mut frame = Frame::new(4);
        frame.set_int(0, 7);
        frame.set_float(1, 2.5);
        frame.set_bool(2, true);
        assert_eq!(frame.get_int(0), Ok(7));
        assert_eq!(frame.get_float(1), Ok(2.5));
        assert_eq!(frame.get_bool(2), Ok(true));
    }

    #[test]
    fn typed_read_on_wrong_kind_reports_mismatch() {
        let mut frame = Frame::new(2);
        frame.set_int(0, 1);
        assert_eq!(frame.get_bool(0), Err(FrameTypeMismatch { slot: 0 }));
        frame.set_value(1, Value::Int(1));
        assert_eq!(
            frame.get_int(1),
            Err(FrameTypeMismatch { slot: 1 }),
            "a boxed slot must not satisfy a typed read"
        );
    }

    #[test]
    fn boxed_read_never_fails() {
        let mut frame = Frame::new(3);
        frame.set_int(0, 3);
        frame.set_value(1, Value::from("s"));
        assert_eq!(frame.get_value(0), Value::Int(3));
        assert_eq!(frame.get_value(1), Value::from("s"));
        assert_eq!(frame.get_value(2), Value::Null);
    }

    #[test]
    fn copy_preserves_representation() {
        let mut frame = Frame::new(4);
        frame.set_int(0, 9);
        frame.set_value(1, Value::Int(9));
        frame.copy(0, 2);
        frame.copy(1, 3);
        assert!(!frame.is_boxed(2));
        assert!(frame.is_boxed(3));
        assert_eq!(frame.get_int(2), Ok(9));
    }

    #[test]
    fn store_picks_natural_representation() {
        let mut frame = Frame::new(2);
        frame.store(0, Value::Int(4));
        frame.store(1, Value::from("x"));
        assert!(!frame.is_boxed(0));
        assert!(frame.is_boxed(1));
    }
}
