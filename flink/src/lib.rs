mod catalog;
mod encoder;
mod error;
mod frame;
mod instruction;
mod interpreter;
mod operation;
mod profile;
mod state_bits;
mod stream;
mod tree;
mod unit;
mod value;

pub use catalog::{Catalog, CatalogCreateInfo};
pub use encoder::Encoder;
pub use error::{CompileError, Fault};
pub use frame::{Frame, FrameTypeMismatch};
pub use instruction::{DataKind, Instruction, InstructionKind};
pub use interpreter::{BoxingState, Inspector, Interpreter, OpScope};
pub use operation::{EvalFn, Operation, OperationHandle};
pub use profile::BranchProfile;
pub use state_bits::{BITS_PER_WORD, BitRef, StateFlag, StateLayout, StateLayoutBuilder};
pub use stream::CodeStream;
pub use tree::{ChildDef, OpNode};
pub use unit::CompiledUnit;
pub use value::{Value, ValueKind};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn add_eval(_: &mut OpScope<'_>, args: &[Value]) -> Result<Value, Fault> {
        match (args[0].as_int(), args[1].as_int()) {
            (Some(a), Some(b)) => Ok(Value::Int(a + b)),
            _ => Err(Fault::TypeError {
                expected: "int",
                got: args[0].clone(),
            }),
        }
    }

    fn mul_eval(_: &mut OpScope<'_>, args: &[Value]) -> Result<Value, Fault> {
        match (args[0].as_int(), args[1].as_int()) {
            (Some(a), Some(b)) => Ok(Value::Int(a * b)),
            _ => Err(Fault::TypeError {
                expected: "int",
                got: args[0].clone(),
            }),
        }
    }

    // Ref result, so every call site commits it boxed
    fn boxed_five_eval(_: &mut OpScope<'_>, _: &[Value]) -> Result<Value, Fault> {
        Ok(Value::Int(5))
    }

    fn boxed_true_eval(_: &mut OpScope<'_>, _: &[Value]) -> Result<Value, Fault> {
        Ok(Value::Bool(true))
    }

    struct Setup {
        catalog: Arc<Catalog>,
        add: OperationHandle,
        mul: OperationHandle,
        boxed_five: OperationHandle,
        boxed_true: OperationHandle,
    }

    fn setup() -> Setup {
        let catalog = Catalog::new(CatalogCreateInfo::default());
        let add = catalog
            .register_operation(Operation::new(
                "add",
                vec![ValueKind::Int, ValueKind::Int],
                Some(ValueKind::Int),
                add_eval,
            ))
            .unwrap();
        let mul = catalog
            .register_operation(Operation::new(
                "mul",
                vec![ValueKind::Int, ValueKind::Int],
                Some(ValueKind::Int),
                mul_eval,
            ))
            .unwrap();
        let boxed_five = catalog
            .register_operation(Operation::new(
                "boxed.five",
                vec![],
                Some(ValueKind::Ref),
                boxed_five_eval,
            ))
            .unwrap();
        let boxed_true = catalog
            .register_operation(Operation::new(
                "boxed.true",
                vec![],
                Some(ValueKind::Ref),
                boxed_true_eval,
            ))
            .unwrap();
        Setup {
            catalog: Arc::new(catalog),
            add,
            mul,
            boxed_five,
            boxed_true,
        }
    }

    fn opcode_bcis(catalog: &Catalog, unit: &CompiledUnit, opcode: u8) -> Vec<u32> {
        let mut out = Vec::new();
        let mut bci = 0usize;
        while bci < unit.stream().len() {
            let at = unit.stream().opcode_at(bci as u32);
            if at == opcode {
                out.push(bci as u32);
            }
            bci += catalog.lookup(at).unwrap().length();
        }
        out
    }

    #[test]
    fn compiled_execution_matches_direct_evaluation() {
        let s = setup();
        // add(mul(2, 3), add(4, 5))
        let body = [OpNode::Return(Box::new(OpNode::call(s.add, vec![
            OpNode::call(s.mul, vec![OpNode::constant(2i64), OpNode::constant(3i64)]),
            OpNode::call(s.add, vec![OpNode::constant(4i64), OpNode::constant(5i64)]),
        ])))];
        let unit = Encoder::compile(&s.catalog, 0, &body).unwrap();
        let interp = Interpreter::new(s.catalog.clone());
        assert_eq!(
            interp.execute(&unit, &[]),
            Ok(Value::Int((2 * 3) + (4 + 5)))
        );
    }

    #[test]
    fn boxing_flags_only_ever_grow() {
        let s = setup();
        let body = [OpNode::Return(Box::new(OpNode::call(s.add, vec![
            OpNode::call(s.boxed_five, vec![]),
            OpNode::constant(1i64),
        ])))];
        let unit = Encoder::compile(&s.catalog, 0, &body).unwrap();
        let interp = Interpreter::new(s.catalog.clone());

        let before = unit.stream().snapshot();
        assert_eq!(interp.execute(&unit, &[]), Ok(Value::Int(6)));
        let after_first = unit.stream().snapshot();
        assert_eq!(interp.execute(&unit, &[]), Ok(Value::Int(6)));
        let after_second = unit.stream().snapshot();

        assert_ne!(before, after_first, "first run must record the mismatch");
        for (a, b) in after_first.iter().zip(&after_second) {
            assert_eq!(a & b, *a, "a set bit must never clear");
        }

        let add_bci = opcode_bcis(&s.catalog, &unit, s.add.opcode())[0];
        let state = interp.boxing_state(&unit, add_bci).unwrap();
        assert!(state.input_boxed(0));
        assert!(!state.input_boxed(1));
    }

    #[test]
    fn quickening_settles_after_the_first_rewrite() {
        let s = setup();
        let body = [
            OpNode::If {
                cond: Box::new(OpNode::call(s.boxed_true, vec![])),
                then_body: vec![OpNode::Return(Box::new(OpNode::constant(1i64)))],
                else_body: vec![],
            },
            OpNode::Return(Box::new(OpNode::constant(2i64))),
        ];
        let unit = Encoder::compile(&s.catalog, 0, &body).unwrap();
        let interp = Interpreter::new(s.catalog.clone());

        interp.execute(&unit, &[]).unwrap();
        let settled = unit.stream().snapshot();
        for _ in 0..5 {
            assert_eq!(interp.execute(&unit, &[]), Ok(Value::Int(1)));
            assert_eq!(unit.stream().snapshot(), settled);
        }
    }

    #[test]
    fn concurrent_runs_join_their_boxing_state() {
        let s = setup();
        // two call sites, each reached by only one of the threads
        let body = [
            OpNode::If {
                cond: Box::new(OpNode::LoadLocal(0)),
                then_body: vec![OpNode::Drop(Box::new(OpNode::call(s.add, vec![
                    OpNode::call(s.boxed_five, vec![]),
                    OpNode::constant(1i64),
                ])))],
                else_body: vec![OpNode::Drop(Box::new(OpNode::call(s.mul, vec![
                    OpNode::call(s.boxed_five, vec![]),
                    OpNode::constant(2i64),
                ])))],
            },
            OpNode::Return(Box::new(OpNode::constant(0i64))),
        ];
        let unit = Encoder::compile(&s.catalog, 1, &body).unwrap();
        let interp = Interpreter::new(s.catalog.clone());

        std::thread::scope(|scope| {
            for &arg in &[true, false] {
                let interp = &interp;
                let unit = &unit;
                scope.spawn(move || {
                    for _ in 0..50 {
                        assert_eq!(
                            interp.execute(unit, &[Value::Bool(arg)]),
                            Ok(Value::Int(0))
                        );
                    }
                });
            }
        });

        let add_bci = opcode_bcis(&s.catalog, &unit, s.add.opcode())[0];
        let mul_bci = opcode_bcis(&s.catalog, &unit, s.mul.opcode())[0];
        let add_state = interp.boxing_state(&unit, add_bci).unwrap();
        let mul_state = interp.boxing_state(&unit, mul_bci).unwrap();
        assert!(add_state.input_boxed(0), "then-site flag set by one thread");
        assert!(mul_state.input_boxed(0), "else-site flag set by the other");
    }

    #[test]
    fn repeated_constants_share_one_pool_slot() {
        let s = setup();
        let body = [OpNode::Return(Box::new(OpNode::call(s.add, vec![
            OpNode::call(s.add, vec![OpNode::constant(7i64), OpNode::constant(7i64)]),
            OpNode::constant(7i64),
        ])))];
        let unit = Encoder::compile(&s.catalog, 0, &body).unwrap();
        let sevens = unit
            .constants()
            .iter()
            .filter(|c| **c == Value::Int(7))
            .count();
        assert_eq!(sevens, 1);
    }

    #[test]
    fn disassembly_tracks_the_quickened_stream() {
        let s = setup();
        let body = [
            OpNode::If {
                cond: Box::new(OpNode::call(s.boxed_true, vec![])),
                then_body: vec![],
                else_body: vec![],
            },
            OpNode::Return(Box::new(OpNode::constant(0i64))),
        ];
        let unit = Encoder::compile(&s.catalog, 0, &body).unwrap();
        let interp = Interpreter::new(s.catalog.clone());

        assert!(unit.disasm(&s.catalog).contains("branch.false"));
        assert!(!unit.disasm(&s.catalog).contains("branch.false.boxed"));
        assert!(
            !unit.disasm(&s.catalog).contains("lean="),
            "an unexecuted site has no lean yet"
        );
        interp.execute(&unit, &[]).unwrap();
        assert!(unit.disasm(&s.catalog).contains("branch.false.boxed"));
        assert!(unit.disasm(&s.catalog).contains("lean=true"));
    }
}
