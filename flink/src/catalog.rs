//! Instruction catalog: dense opcode assignment and lookup.
//!
//! Builtins occupy the low opcodes; registered operations follow. Opcodes
//! are stable for the life of one catalog, and every stream encoded
//! against it; re-numbering would invalidate them all, so registration is
//! append-only and duplicates are rejected.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::CompileError;
use crate::instruction::{Instruction, InstructionKind};
use crate::operation::{Operation, OperationHandle};

pub(crate) const OP_POP: u8 = 0;
pub(crate) const OP_LOAD_CONSTANT: u8 = 1;
pub(crate) const OP_LOAD_LOCAL: u8 = 2;
pub(crate) const OP_STORE_LOCAL: u8 = 3;
pub(crate) const OP_JUMP: u8 = 4;
pub(crate) const OP_BRANCH_FALSE: u8 = 5;
pub(crate) const OP_BRANCH_FALSE_BOXED: u8 = 6;
pub(crate) const OP_RETURN: u8 = 7;

#[derive(Debug, Clone)]
pub struct CatalogCreateInfo {
    /// State-word budget per instruction; exceeding it at registration is
    /// a `StateBitOverflow`.
    pub max_state_words: usize,
}

impl Default for CatalogCreateInfo {
    fn default() -> Self {
        Self { max_state_words: 2 }
    }
}

struct CatalogInner {
    instructions: Vec<Arc<Instruction>>,
    names: HashMap<&'static str, u8>,
}

/// The interpreter-wide instruction set. Shared read-mostly; registration
/// happens before any encoding, lookup afterwards.
pub struct Catalog {
    max_state_words: usize,
    inner: RwLock<CatalogInner>,
}

impl Catalog {
    pub fn new(info: CatalogCreateInfo) -> Self {
        let builtins = [
            Instruction::builtin("pop", OP_POP, InstructionKind::Pop),
            Instruction::builtin("load.constant", OP_LOAD_CONSTANT, InstructionKind::LoadConstant),
            Instruction::builtin("load.local", OP_LOAD_LOCAL, InstructionKind::LoadLocal),
            Instruction::builtin("store.local", OP_STORE_LOCAL, InstructionKind::StoreLocal),
            Instruction::builtin("jump", OP_JUMP, InstructionKind::Jump),
            Instruction::builtin("branch.false", OP_BRANCH_FALSE, InstructionKind::Branch {
                boxed: false,
            }),
            Instruction::builtin(
                "branch.false.boxed",
                OP_BRANCH_FALSE_BOXED,
                InstructionKind::Branch { boxed: true },
            ),
            Instruction::builtin("return", OP_RETURN, InstructionKind::Return),
        ];

        let mut inner = CatalogInner {
            instructions: Vec::new(),
            names: HashMap::new(),
        };
        for instr in builtins {
            debug_assert_eq!(instr.opcode as usize, inner.instructions.len());
            inner.names.insert(instr.name, instr.opcode);
            inner.instructions.push(Arc::new(instr));
        }

        Self {
            max_state_words: info.max_state_words,
            inner: RwLock::new(inner),
        }
    }

    /// Register a user operation, assigning it the next dense opcode and
    /// fixing its wire layout.
    pub fn register_operation(&self, op: Operation) -> Result<OperationHandle, CompileError> {
        let mut inner = self.inner.write();
        if inner.names.contains_key(op.name) {
            return Err(CompileError::DuplicateOperation { name: op.name });
        }
        let opcode = inner.instructions.len();
        if opcode > u8::MAX as usize {
            return Err(CompileError::OpcodeSpaceExhausted);
        }
        let opcode = opcode as u8;
        let instr = Instruction::custom(opcode, Arc::new(op), self.max_state_words)?;
        inner.names.insert(instr.name, opcode);
        inner.instructions.push(Arc::new(instr));
        Ok(OperationHandle(opcode))
    }

    /// Total over the dense opcode range; `None` outside it means the
    /// stream handing us this opcode is corrupt.
    pub fn lookup(&self, opcode: u8) -> Option<Arc<Instruction>> {
        self.inner.read().instructions.get(opcode as usize).cloned()
    }

    pub fn num_instructions(&self) -> usize {
        self.inner.read().instructions.len()
    }
}

#[cfg(test)]
mod catalog_tests {
    use super::*;
    use crate::value::{Value, ValueKind};

    fn nop_eval(
        _: &mut crate::interpreter::OpScope<'_>,
        _: &[Value],
    ) -> Result<Value, crate::error::Fault> {
        Ok(Value::Null)
    }

    #[test]
    fn builtins_are_dense_from_zero() {
        let catalog = Catalog::new(CatalogCreateInfo::default());
        for opcode in 0..catalog.num_instructions() as u8 {
            let instr = catalog.lookup(opcode).expect("dense range is total");
            assert_eq!(instr.opcode, opcode);
        }
        assert!(catalog.lookup(200).is_none());
    }

    #[test]
    fn registration_assigns_the_next_opcode() {
        let catalog = Catalog::new(CatalogCreateInfo::default());
        let first = catalog
            .register_operation(Operation::new("a", vec![ValueKind::Int], None, nop_eval))
            .unwrap();
        let second = catalog
            .register_operation(Operation::new("b", vec![], None, nop_eval))
            .unwrap();
        assert_eq!(first.opcode(), OP_RETURN + 1);
        assert_eq!(second.opcode(), OP_RETURN + 2);
        assert_eq!(catalog.lookup(first.opcode()).unwrap().name, "a");
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let catalog = Catalog::new(CatalogCreateInfo::default());
        catalog
            .register_operation(Operation::new("dup", vec![], None, nop_eval))
            .unwrap();
        let err = catalog
            .register_operation(Operation::new("dup", vec![], None, nop_eval))
            .unwrap_err();
        assert_eq!(err, CompileError::DuplicateOperation { name: "dup" });
    }

    #[test]
    fn oversized_state_fails_at_registration() {
        let catalog = Catalog::new(CatalogCreateInfo { max_state_words: 1 });
        // 8 primitive inputs + primitive result = 9 flags > 8 bits
        let op = Operation::new(
            "wide",
            vec![ValueKind::Int; 8],
            Some(ValueKind::Int),
            nop_eval,
        );
        let err = catalog.register_operation(op).unwrap_err();
        assert!(matches!(err, CompileError::StateBitOverflow { .. }));
    }
}
