//! Operation trees: the encoder's input.
//!
//! A compiled unit is built from a list of statement nodes. Expression
//! nodes push exactly one value; a value-producing node used in statement
//! position gets its result dropped. `If`/`While` bodies leave the stack
//! balanced, so every stack slot has exactly one producing instruction —
//! the property the producer side-map relies on.

use crate::operation::OperationHandle;
use crate::value::Value;

/// Body of a captured child: compiled into its own nested unit.
#[derive(Debug, Clone)]
pub struct ChildDef {
    pub num_locals: u16,
    pub body: Vec<OpNode>,
}

#[derive(Debug, Clone)]
pub enum OpNode {
    /// Push a constant from the pool.
    Constant(Value),
    /// Push a copy of a local slot.
    LoadLocal(u16),
    /// Pop into a local slot.
    StoreLocal(u16, Box<OpNode>),
    /// Invoke a registered operation on its evaluated arguments.
    Call {
        op: OperationHandle,
        args: Vec<OpNode>,
        /// Captured constants, one pool slot each, in order.
        consts: Vec<Value>,
        /// Captured children, compiled into nested units.
        children: Vec<ChildDef>,
    },
    If {
        cond: Box<OpNode>,
        then_body: Vec<OpNode>,
        else_body: Vec<OpNode>,
    },
    While {
        cond: Box<OpNode>,
        body: Vec<OpNode>,
    },
    /// Evaluate and discard.
    Drop(Box<OpNode>),
    /// Return a value to the caller.
    Return(Box<OpNode>),
}

impl OpNode {
    /// Shorthand for a call with no captured state.
    pub fn call(op: OperationHandle, args: Vec<OpNode>) -> Self {
        OpNode::Call {
            op,
            args,
            consts: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn constant(value: impl Into<Value>) -> Self {
        OpNode::Constant(value.into())
    }
}
