//! The dispatch loop and the boxing-elimination protocol.
//!
//! Dispatch is single-threaded per call: each invocation owns its frame,
//! bci and stack pointer, while the unit's stream and side tables are
//! shared. The loop reads an opcode, resolves it through the catalog, runs
//! the handler and either advances or returns.
//!
//! Boxing elimination happens at two points. On the read side, a consumer
//! whose input flag is clear does a typed frame read; a `FrameTypeMismatch`
//! flips the flag one-way, notifies the producing instruction through the
//! unit's producer map, and falls back to the boxed read. On the commit
//! side, a producer whose result flag is clear stores its value in the
//! natural unboxed representation; once some consumer has flagged it, it
//! stores boxed. Both transitions are monotonic, so concurrent executions
//! only ever agree more.

use std::sync::Arc;

use log::{debug, trace};

use crate::catalog::{Catalog, OP_BRANCH_FALSE_BOXED};
use crate::error::Fault;
use crate::frame::{Frame, FrameTypeMismatch};
use crate::instruction::{Instruction, InstructionKind, PROFILE_OFFSET, TARGET_OFFSET};
use crate::operation::Operation;
use crate::state_bits::StateFlag;
use crate::unit::CompiledUnit;
use crate::value::{Value, ValueKind};

/// Outcome of one executed instruction.
enum NextAction {
    Advance(u32),
    Return(Value),
}

/// Per-instruction observation hook. Called after each instruction commits,
/// with the instruction's bci and the stack pointer it left behind.
pub trait Inspector {
    fn after_instruction(&mut self, bci: u32, sp: usize);
}

/// Read-only snapshot of one site's boxing flags.
#[derive(Debug, Clone)]
pub struct BoxingState {
    entries: Vec<(StateFlag, bool)>,
}

impl BoxingState {
    pub fn input_boxed(&self, operand: u8) -> bool {
        self.is_set(StateFlag::InputBoxed(operand))
    }

    pub fn result_boxed(&self) -> bool {
        self.is_set(StateFlag::ResultBoxed)
    }

    pub fn flags(&self) -> &[(StateFlag, bool)] {
        &self.entries
    }

    fn is_set(&self, flag: StateFlag) -> bool {
        self.entries
            .iter()
            .any(|&(f, set)| f == flag && set)
    }
}

/// Call-site scope handed to an operation's `eval`: its captured constants
/// and children, resolved through the site's encoded base indices.
pub struct OpScope<'a> {
    interp: &'a Interpreter,
    unit: &'a CompiledUnit,
    const_base: usize,
    child_base: usize,
}

impl OpScope<'_> {
    /// The site's `index`-th captured constant.
    pub fn constant(&self, index: usize) -> &Value {
        &self.unit.constants()[self.const_base + index]
    }

    /// Execute the site's `index`-th captured child in a fresh frame.
    pub fn call_child(&mut self, index: usize, args: &[Value]) -> Result<Value, Fault> {
        let child = &self.unit.children()[self.child_base + index];
        self.interp.execute(child, args)
    }
}

pub struct Interpreter {
    catalog: Arc<Catalog>,
}

impl Interpreter {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Execute a unit with `args` stored into its leading locals.
    pub fn execute(&self, unit: &CompiledUnit, args: &[Value]) -> Result<Value, Fault> {
        let mut frame = self.frame_for(unit, args);
        self.run(unit, &mut frame, None)
    }

    /// Execute inside a caller-provided frame. The frame must have at least
    /// `unit.frame_size()` slots.
    pub fn execute_in_frame(&self, unit: &CompiledUnit, frame: &mut Frame) -> Result<Value, Fault> {
        assert!(frame.len() >= unit.frame_size(), "frame too small for unit");
        self.run(unit, frame, None)
    }

    pub fn execute_with_inspector(
        &self,
        unit: &CompiledUnit,
        args: &[Value],
        inspector: &mut dyn Inspector,
    ) -> Result<Value, Fault> {
        let mut frame = self.frame_for(unit, args);
        self.run(unit, &mut frame, Some(inspector))
    }

    /// Snapshot the boxing flags of the instruction at `bci`. `None` when
    /// the byte there is not a known opcode.
    pub fn boxing_state(&self, unit: &CompiledUnit, bci: u32) -> Option<BoxingState> {
        let instr = self.catalog.lookup(unit.stream().opcode_at(bci))?;
        let bits = bci as usize + instr.length_without_state();
        let entries = instr
            .state
            .flags()
            .map(|flag| {
                let bit = instr.state.bit(flag).expect("layout lists its own flags");
                (flag, unit.stream().flag_set(bits, bit))
            })
            .collect();
        Some(BoxingState { entries })
    }

    fn frame_for(&self, unit: &CompiledUnit, args: &[Value]) -> Frame {
        let mut frame = Frame::new(unit.frame_size());
        for (i, arg) in args.iter().take(unit.num_locals as usize).enumerate() {
            frame.store(i, arg.clone());
        }
        frame
    }

    fn run(
        &self,
        unit: &CompiledUnit,
        frame: &mut Frame,
        mut inspector: Option<&mut dyn Inspector>,
    ) -> Result<Value, Fault> {
        let stream = unit.stream();
        let mut bci: u32 = 0;
        let mut sp = unit.num_locals as usize;

        loop {
            let opcode = stream.opcode_at(bci);
            let instr = self
                .catalog
                .lookup(opcode)
                .ok_or(Fault::UnknownOpcode { opcode, bci })?;
            trace!("{bci:04x} {}", instr.name);

            let action = match &instr.kind {
                InstructionKind::Pop => {
                    sp -= 1;
                    frame.clear(sp);
                    NextAction::Advance(bci + instr.length() as u32)
                }
                InstructionKind::LoadConstant => {
                    let idx = stream.u16_at(bci as usize + 1);
                    let value = unit.constants()[idx as usize].clone();
                    self.commit_load(unit, &instr, bci, frame, sp, value);
                    sp += 1;
                    NextAction::Advance(bci + instr.length() as u32)
                }
                InstructionKind::LoadLocal => {
                    let local = stream.u16_at(bci as usize + 1) as usize;
                    if self.result_goes_boxed(unit, &instr, bci) {
                        frame.set_value(sp, frame.get_value(local));
                    } else {
                        frame.copy(local, sp);
                    }
                    sp += 1;
                    NextAction::Advance(bci + instr.length() as u32)
                }
                InstructionKind::StoreLocal => {
                    let local = stream.u16_at(bci as usize + 1) as usize;
                    sp -= 1;
                    frame.copy(sp, local);
                    frame.clear(sp);
                    NextAction::Advance(bci + instr.length() as u32)
                }
                InstructionKind::Jump => {
                    NextAction::Advance(stream.u16_at(bci as usize + TARGET_OFFSET) as u32)
                }
                InstructionKind::Branch { boxed } => {
                    let next = self.run_branch(unit, frame, &mut sp, bci, &instr, *boxed)?;
                    NextAction::Advance(next)
                }
                InstructionKind::Return => {
                    sp -= 1;
                    NextAction::Return(frame.get_value(sp))
                }
                InstructionKind::Custom(op) => {
                    let next = self.run_custom(unit, frame, &mut sp, bci, &instr, op)?;
                    NextAction::Advance(next)
                }
            };

            if let Some(ins) = inspector.as_deref_mut() {
                ins.after_instruction(bci, sp);
            }
            match action {
                NextAction::Advance(next) => bci = next,
                NextAction::Return(value) => return Ok(value),
            }
        }
    }

    /// Commit rule for `load.constant`: natural representation until some
    /// consumer has demanded the result boxed.
    fn commit_load(
        &self,
        unit: &CompiledUnit,
        instr: &Instruction,
        bci: u32,
        frame: &mut Frame,
        slot: usize,
        value: Value,
    ) {
        if self.result_goes_boxed(unit, instr, bci) {
            frame.set_value(slot, value);
        } else {
            frame.store(slot, value);
        }
    }

    fn result_goes_boxed(&self, unit: &CompiledUnit, instr: &Instruction, bci: u32) -> bool {
        match instr.state.bit(StateFlag::ResultBoxed) {
            Some(bit) => {
                let bits = bci as usize + instr.length_without_state();
                unit.stream().flag_set(bits, bit)
            }
            // no flag means the result never unboxes
            None => true,
        }
    }

    fn run_branch(
        &self,
        unit: &CompiledUnit,
        frame: &mut Frame,
        sp: &mut usize,
        bci: u32,
        instr: &Instruction,
        boxed: bool,
    ) -> Result<u32, Fault> {
        let slot = *sp - 1;
        let cond = if boxed {
            Self::expect_bool(frame.get_value(slot))?
        } else {
            match frame.get_bool(slot) {
                Ok(cond) => cond,
                Err(FrameTypeMismatch { .. }) => {
                    debug!("branch at {bci:04x} saw a boxed condition, rewriting");
                    self.quicken(unit, bci, OP_BRANCH_FALSE_BOXED);
                    if let Some(&producer) = unit.producers.get(&(bci, 0)) {
                        self.mark_producer_boxed(unit, producer);
                    }
                    Self::expect_bool(frame.get_value(slot))?
                }
            }
        };
        *sp = slot;
        frame.clear(slot);

        let profile = unit.stream().u16_at(bci as usize + PROFILE_OFFSET);
        let cond = unit.profile(profile).record(cond);
        if cond {
            Ok(bci + instr.length() as u32)
        } else {
            Ok(unit.stream().u16_at(bci as usize + TARGET_OFFSET) as u32)
        }
    }

    fn run_custom(
        &self,
        unit: &CompiledUnit,
        frame: &mut Frame,
        sp: &mut usize,
        bci: u32,
        instr: &Instruction,
        op: &Arc<Operation>,
    ) -> Result<u32, Fault> {
        let stream = unit.stream();
        let argc = if op.variadic {
            stream.u16_at(bci as usize + 1) as usize
        } else {
            op.inputs.len()
        };
        let base = *sp - argc;

        let mut values = Vec::with_capacity(argc);
        if op.variadic {
            for i in 0..argc {
                values.push(frame.get_value(base + i));
            }
        } else {
            for (i, &kind) in op.inputs.iter().enumerate() {
                values.push(self.read_operand(unit, instr, bci, frame, base + i, i as u8, kind));
            }
        }

        let mut scope = OpScope {
            interp: self,
            unit,
            const_base: instr
                .const_slot()
                .map(|slot| stream.u16_at(bci as usize + slot) as usize)
                .unwrap_or(0),
            child_base: instr
                .child_slot()
                .map(|slot| stream.u16_at(bci as usize + slot) as usize)
                .unwrap_or(0),
        };
        let result = (op.eval)(&mut scope, &values)?;

        for slot in base..*sp {
            frame.clear(slot);
        }
        *sp = base;

        if op.result.is_some() {
            if self.result_goes_boxed(unit, instr, bci) {
                frame.set_value(*sp, result);
            } else {
                frame.store(*sp, result);
            }
            *sp += 1;
        }
        Ok(bci + instr.length() as u32)
    }

    /// Read one declared operand. A clear input flag takes the typed path;
    /// a mismatch there flips the flag, notifies the producer and re-reads
    /// boxed. The boxed read cannot fail.
    fn read_operand(
        &self,
        unit: &CompiledUnit,
        instr: &Instruction,
        bci: u32,
        frame: &Frame,
        slot: usize,
        operand: u8,
        kind: ValueKind,
    ) -> Value {
        if !kind.is_unboxable() || self.input_goes_boxed(unit, instr, bci, operand) {
            return frame.get_value(slot);
        }
        match Self::typed_read(frame, slot, kind) {
            Ok(value) => value,
            Err(FrameTypeMismatch { .. }) => {
                debug!(
                    "{} at {bci:04x}: operand {operand} went boxed",
                    instr.name
                );
                let bit = instr
                    .state
                    .bit(StateFlag::InputBoxed(operand))
                    .expect("unboxable operands have a flag");
                let bits = bci as usize + instr.length_without_state();
                unit.stream().set_flag(bits, bit);
                if let Some(&producer) = unit.producers.get(&(bci, operand)) {
                    self.mark_producer_boxed(unit, producer);
                }
                frame.get_value(slot)
            }
        }
    }

    fn input_goes_boxed(
        &self,
        unit: &CompiledUnit,
        instr: &Instruction,
        bci: u32,
        operand: u8,
    ) -> bool {
        match instr.state.bit(StateFlag::InputBoxed(operand)) {
            Some(bit) => {
                let bits = bci as usize + instr.length_without_state();
                unit.stream().flag_set(bits, bit)
            }
            None => true,
        }
    }

    fn typed_read(frame: &Frame, slot: usize, kind: ValueKind) -> Result<Value, FrameTypeMismatch> {
        match kind {
            ValueKind::Int => frame.get_int(slot).map(Value::Int),
            ValueKind::Float => frame.get_float(slot).map(Value::Float),
            ValueKind::Bool => frame.get_bool(slot).map(Value::Bool),
            ValueKind::Ref => Ok(frame.get_value(slot)),
        }
    }

    fn expect_bool(value: Value) -> Result<bool, Fault> {
        value.as_bool().ok_or(Fault::TypeError {
            expected: "bool",
            got: value,
        })
    }

    /// Set the `ResultBoxed` flag of the instruction at `producer`, so it
    /// stores boxed from now on. A producer without that flag never stores
    /// unboxed, so there is nothing to do for it.
    fn mark_producer_boxed(&self, unit: &CompiledUnit, producer: u32) {
        let Some(instr) = self.catalog.lookup(unit.stream().opcode_at(producer)) else {
            return;
        };
        if let Some(bit) = instr.state.bit(StateFlag::ResultBoxed) {
            debug!("{} at {producer:04x}: result goes boxed", instr.name);
            let bits = producer as usize + instr.length_without_state();
            unit.stream().set_flag(bits, bit);
        }
    }

    /// In-place opcode rewrite. The replacement must come from the same
    /// opcode family, meaning an identical encoded length.
    fn quicken(&self, unit: &CompiledUnit, bci: u32, opcode: u8) {
        #[cfg(debug_assertions)]
        {
            let from = self.catalog.lookup(unit.stream().opcode_at(bci)).unwrap();
            let to = self.catalog.lookup(opcode).unwrap();
            debug_assert_eq!(from.length(), to.length(), "quickening changed the layout");
        }
        unit.stream().rewrite_opcode(bci, opcode);
    }
}
