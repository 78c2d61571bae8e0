//! Operation shapes: the static description of a user computation.
//!
//! An operation is registered once with the catalog and is immutable
//! afterwards. Its shape (input kinds, result kind, captured state counts)
//! fixes the wire layout of the custom instruction wrapping it; its `eval`
//! function is the behavior the instruction handler invokes.

use crate::error::Fault;
use crate::interpreter::OpScope;
use crate::value::{Value, ValueKind};

/// Behavior of an operation. Receives the site scope (captured constants
/// and children, plus reentrant child calls) and the operand values in
/// declaration order; variadic operations receive all popped values.
pub type EvalFn = fn(&mut OpScope<'_>, &[Value]) -> Result<Value, Fault>;

/// Static shape and behavior of a user operation.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: &'static str,
    /// Stack input kinds, in declaration order. Ignored when `variadic`.
    pub inputs: Vec<ValueKind>,
    /// A variadic operation pops a site-determined number of values, all
    /// boxed; it never participates in boxing elimination.
    pub variadic: bool,
    /// Stack result kind, if the operation pushes one.
    pub result: Option<ValueKind>,
    /// Number of constants each call site must capture.
    pub num_consts: usize,
    /// Number of child trees each call site must capture.
    pub num_children: usize,
    pub eval: EvalFn,
}

impl Operation {
    /// Plain operation with fixed typed inputs and no captured state.
    pub fn new(
        name: &'static str,
        inputs: Vec<ValueKind>,
        result: Option<ValueKind>,
        eval: EvalFn,
    ) -> Self {
        Self {
            name,
            inputs,
            variadic: false,
            result,
            num_consts: 0,
            num_children: 0,
            eval,
        }
    }

    /// Variadic operation: pops however many values the site encodes.
    pub fn variadic(name: &'static str, result: Option<ValueKind>, eval: EvalFn) -> Self {
        Self {
            name,
            inputs: Vec::new(),
            variadic: true,
            result,
            num_consts: 0,
            num_children: 0,
            eval,
        }
    }

    pub fn with_consts(mut self, num_consts: usize) -> Self {
        self.num_consts = num_consts;
        self
    }

    pub fn with_children(mut self, num_children: usize) -> Self {
        self.num_children = num_children;
        self
    }

    /// Static pop count for non-variadic operations.
    pub fn num_pop_static(&self) -> usize {
        if self.variadic { 0 } else { self.inputs.len() }
    }
}

/// Stable handle returned by catalog registration; names the operation's
/// opcode for the life of that catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationHandle(pub(crate) u8);

impl OperationHandle {
    pub fn opcode(self) -> u8 {
        self.0
    }
}
