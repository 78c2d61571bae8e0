//! Instruction kinds and their wire layout.
//!
//! Every instruction is a fixed header (opcode byte plus LE u16 static
//! operands) followed by one byte per additional-data slot. `Const` and
//! `Child` slots hold a 16-bit side-table base index, so each is followed
//! by a `Continuation` slot reserving the second byte of the index.

use std::sync::Arc;

use crate::error::CompileError;
use crate::operation::Operation;
use crate::state_bits::{StateFlag, StateLayout, StateLayoutBuilder};

/// Kind of one additional-data slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// One state word of boxing flags.
    Bits,
    /// Low byte of a constant-pool base index.
    Const,
    /// Low byte of a child-table base index.
    Child,
    /// Second byte of the preceding `Const`/`Child` index.
    Continuation,
}

/// Closed tag set of instruction kinds; the interpreter dispatches on this.
#[derive(Debug, Clone)]
pub enum InstructionKind {
    Pop,
    LoadConstant,
    LoadLocal,
    StoreLocal,
    Jump,
    /// `branch.false`: jumps to the encoded target when the condition is
    /// false. The `boxed` variant reads the condition boxed and occupies
    /// its own opcode; the generic variant quickens itself into it.
    Branch { boxed: bool },
    Return,
    Custom(Arc<Operation>),
}

/// A concrete, encodable instruction: dense opcode, kind tag, additional
/// data layout, and the state-bit layout embedded in its `Bits` slots.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub name: &'static str,
    pub opcode: u8,
    pub kind: InstructionKind,
    pub data_kinds: Vec<DataKind>,
    pub state: StateLayout,
}

/// Byte offset of a branch target operand within `jump`/`branch` headers.
pub const TARGET_OFFSET: usize = 1;
/// Byte offset of the profile index within branch headers.
pub const PROFILE_OFFSET: usize = 3;

impl Instruction {
    pub(crate) fn builtin(name: &'static str, opcode: u8, kind: InstructionKind) -> Self {
        let (data_kinds, state) = match kind {
            // loads track whether a consumer demanded their result boxed
            InstructionKind::LoadConstant | InstructionKind::LoadLocal => {
                let mut b = StateLayoutBuilder::new(name, 1);
                b.allocate(StateFlag::ResultBoxed)
                    .expect("one flag always fits");
                (vec![DataKind::Bits], b.finish())
            }
            _ => (Vec::new(), StateLayout::empty()),
        };
        Self {
            name,
            opcode,
            kind,
            data_kinds,
            state,
        }
    }

    /// Build the custom instruction wrapping `op`. The data-kind layout is
    /// fixed here, before any stream can be encoded from it.
    pub(crate) fn custom(
        opcode: u8,
        op: Arc<Operation>,
        max_state_words: usize,
    ) -> Result<Self, CompileError> {
        let mut builder = StateLayoutBuilder::new(op.name, max_state_words);
        if !op.variadic {
            for (i, kind) in op.inputs.iter().enumerate() {
                if kind.is_unboxable() {
                    builder.allocate(StateFlag::InputBoxed(i as u8))?;
                }
            }
            if matches!(op.result, Some(kind) if kind.is_unboxable()) {
                builder.allocate(StateFlag::ResultBoxed)?;
            }
        }
        let state = builder.finish();

        let mut data_kinds = vec![DataKind::Bits; state.words()];
        if op.num_consts > 0 {
            data_kinds.push(DataKind::Const);
            data_kinds.push(DataKind::Continuation);
        }
        if op.num_children > 0 {
            data_kinds.push(DataKind::Child);
            data_kinds.push(DataKind::Continuation);
        }

        Ok(Self {
            name: op.name,
            opcode,
            kind: InstructionKind::Custom(op),
            data_kinds,
            state,
        })
    }

    /// Fixed header length: opcode byte plus static operand bytes.
    pub fn length_without_state(&self) -> usize {
        match &self.kind {
            InstructionKind::Pop | InstructionKind::Return => 1,
            InstructionKind::LoadConstant
            | InstructionKind::LoadLocal
            | InstructionKind::StoreLocal
            | InstructionKind::Jump => 3,
            InstructionKind::Branch { .. } => 5,
            InstructionKind::Custom(op) => {
                if op.variadic {
                    3
                } else {
                    1
                }
            }
        }
    }

    /// Total encoded length: header plus one byte per data slot.
    pub fn length(&self) -> usize {
        self.length_without_state() + self.data_kinds.len()
    }

    /// Offset (from the instruction start) of the `Const` base index slot.
    pub fn const_slot(&self) -> Option<usize> {
        self.data_slot(DataKind::Const)
    }

    /// Offset (from the instruction start) of the `Child` base index slot.
    pub fn child_slot(&self) -> Option<usize> {
        self.data_slot(DataKind::Child)
    }

    fn data_slot(&self, kind: DataKind) -> Option<usize> {
        self.data_kinds
            .iter()
            .position(|&k| k == kind)
            .map(|i| self.length_without_state() + i)
    }

    pub fn is_branch(&self) -> bool {
        matches!(self.kind, InstructionKind::Branch { .. })
    }
}

#[cfg(test)]
mod instruction_tests {
    use super::*;
    use crate::value::{Value, ValueKind};

    fn nop_eval(
        _: &mut crate::interpreter::OpScope<'_>,
        _: &[Value],
    ) -> Result<Value, crate::error::Fault> {
        Ok(Value::Null)
    }

    #[test]
    fn custom_layout_orders_bits_const_child() {
        let op = Operation::new(
            "demo",
            vec![ValueKind::Int, ValueKind::Int],
            Some(ValueKind::Int),
            nop_eval,
        )
        .with_consts(1)
        .with_children(1);
        let instr = Instruction::custom(10, Arc::new(op), 2).unwrap();

        assert_eq!(
            instr.data_kinds,
            vec![
                DataKind::Bits,
                DataKind::Const,
                DataKind::Continuation,
                DataKind::Child,
                DataKind::Continuation,
            ]
        );
        assert_eq!(instr.length_without_state(), 1);
        assert_eq!(instr.length(), 6);
        assert_eq!(instr.const_slot(), Some(1));
        assert_eq!(instr.child_slot(), Some(3));
    }

    #[test]
    fn reference_inputs_take_no_state_bits() {
        let op = Operation::new(
            "concat",
            vec![ValueKind::Ref, ValueKind::Ref],
            Some(ValueKind::Ref),
            nop_eval,
        );
        let instr = Instruction::custom(10, Arc::new(op), 2).unwrap();
        assert_eq!(instr.state.words(), 0);
        assert!(instr.data_kinds.is_empty());
        assert_eq!(instr.length(), 1);
    }

    #[test]
    fn variadic_gets_argc_operand_and_no_flags() {
        let op = Operation::variadic("pack", Some(ValueKind::Ref), nop_eval);
        let instr = Instruction::custom(10, Arc::new(op), 2).unwrap();
        assert_eq!(instr.length_without_state(), 3);
        assert_eq!(instr.state.words(), 0);
    }

    #[test]
    fn branch_variants_share_a_layout() {
        let generic = Instruction::builtin("branch.false", 5, InstructionKind::Branch {
            boxed: false,
        });
        let boxed = Instruction::builtin("branch.false.boxed", 6, InstructionKind::Branch {
            boxed: true,
        });
        assert_eq!(generic.length(), boxed.length());
        assert_eq!(generic.length(), 5);
    }
}
