//! Encoder: lowers operation trees into the byte stream and side tables.
//!
//! One `Encoder` produces one [`CompiledUnit`]. It lays out each
//! instruction's fixed header, resolves forward branches through
//! [`Label`]s, interns constants and children into the 16-bit side tables,
//! zero-initializes state words, and simulates stack depth to compute
//! `max_stack` and the producer map the boxing protocol needs at run time.

use std::sync::Arc;

use ahash::AHashMap;
use log::debug;

use crate::catalog::{
    Catalog, OP_BRANCH_FALSE, OP_JUMP, OP_LOAD_CONSTANT, OP_LOAD_LOCAL, OP_POP, OP_RETURN,
    OP_STORE_LOCAL,
};
use crate::error::CompileError;
use crate::instruction::{DataKind, Instruction, InstructionKind};
use crate::profile::BranchProfile;
use crate::stream::CodeStream;
use crate::tree::{ChildDef, OpNode};
use crate::unit::CompiledUnit;
use crate::value::Value;

/// A forward branch whose 16-bit absolute target is not yet known.
/// Resolve with [`Encoder::bind`].
#[derive(Debug)]
struct Label {
    /// Position of the target bytes in the buffer.
    offset_pos: usize,
}

pub struct Encoder<'a> {
    catalog: &'a Catalog,
    buf: Vec<u8>,
    consts: Vec<Value>,
    children: Vec<Arc<CompiledUnit>>,
    num_profiles: usize,
    producers: AHashMap<(u32, u8), u32>,
    /// Producer bci per live stack slot.
    stack: Vec<u32>,
    max_stack: usize,
    num_locals: u16,
}

impl<'a> Encoder<'a> {
    pub fn new(catalog: &'a Catalog, num_locals: u16) -> Self {
        Self {
            catalog,
            buf: Vec::new(),
            consts: Vec::new(),
            children: Vec::new(),
            num_profiles: 0,
            producers: AHashMap::new(),
            stack: Vec::new(),
            max_stack: 0,
            num_locals,
        }
    }

    /// Compile a statement body into a unit.
    pub fn compile(
        catalog: &'a Catalog,
        num_locals: u16,
        body: &[OpNode],
    ) -> Result<CompiledUnit, CompileError> {
        let mut encoder = Encoder::new(catalog, num_locals);
        for node in body {
            encoder.encode_stmt(node)?;
            debug_assert!(encoder.stack.is_empty(), "statement left the stack unbalanced");
        }
        // epilogue for bodies that fall off the end
        encoder.encode_expr(&OpNode::Constant(Value::Null))?;
        encoder.pop_producer();
        encoder.emit_u8(OP_RETURN);
        encoder.finish()
    }

    fn finish(self) -> Result<CompiledUnit, CompileError> {
        debug!(
            "encoded unit: {} bytes, {} consts, {} children, {} profiles, max_stack {}",
            self.buf.len(),
            self.consts.len(),
            self.children.len(),
            self.num_profiles,
            self.max_stack,
        );
        Ok(CompiledUnit {
            stream: CodeStream::new(self.buf),
            consts: self.consts,
            children: self.children,
            profiles: (0..self.num_profiles).map(|_| BranchProfile::new()).collect(),
            producers: self.producers,
            max_stack: self.max_stack,
            num_locals: self.num_locals,
        })
    }

    // ── emit helpers ────────────────────────────────────────────────

    fn pos(&self) -> usize {
        self.buf.len()
    }

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a placeholder target, to be patched by [`bind`](Self::bind).
    fn emit_label(&mut self) -> Label {
        let offset_pos = self.pos();
        self.emit_u16(u16::MAX);
        Label { offset_pos }
    }

    fn bind(&mut self, label: Label) -> Result<(), CompileError> {
        let target = self.pos();
        if target > u16::MAX as usize {
            return Err(CompileError::StreamTooLarge);
        }
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&(target as u16).to_le_bytes());
        Ok(())
    }

    fn emit_target(&mut self, target: usize) -> Result<(), CompileError> {
        if target > u16::MAX as usize {
            return Err(CompileError::StreamTooLarge);
        }
        self.emit_u16(target as u16);
        Ok(())
    }

    // ── side tables ─────────────────────────────────────────────────

    /// Intern a scalar constant, reusing an existing pool slot holding the
    /// same logical value.
    pub fn intern_constant(&mut self, value: Value) -> Result<u16, CompileError> {
        if let Some(idx) = self.consts.iter().position(|c| *c == value) {
            return Ok(idx as u16);
        }
        let idx = self.consts.len();
        if idx > u16::MAX as usize {
            return Err(CompileError::TableOverflow { table: "constant" });
        }
        self.consts.push(value);
        Ok(idx as u16)
    }

    /// Reserve a consecutive block of pool slots for one site's captured
    /// constants and return the base index.
    fn reserve_constants(&mut self, values: &[Value]) -> Result<u16, CompileError> {
        let base = self.consts.len();
        if base + values.len() > u16::MAX as usize + 1 {
            return Err(CompileError::TableOverflow { table: "constant" });
        }
        self.consts.extend_from_slice(values);
        Ok(base as u16)
    }

    fn intern_children(&mut self, defs: &[ChildDef]) -> Result<u16, CompileError> {
        let base = self.children.len();
        if base + defs.len() > u16::MAX as usize + 1 {
            return Err(CompileError::TableOverflow { table: "child" });
        }
        for def in defs {
            let unit = Encoder::compile(self.catalog, def.num_locals, &def.body)?;
            self.children.push(Arc::new(unit));
        }
        Ok(base as u16)
    }

    fn new_profile(&mut self) -> Result<u16, CompileError> {
        let idx = self.num_profiles;
        if idx > u16::MAX as usize {
            return Err(CompileError::TableOverflow { table: "profile" });
        }
        self.num_profiles += 1;
        Ok(idx as u16)
    }

    // ── stack simulation ────────────────────────────────────────────

    fn push_producer(&mut self, bci: u32) {
        self.stack.push(bci);
        self.max_stack = self.max_stack.max(self.stack.len());
    }

    fn pop_producer(&mut self) -> u32 {
        self.stack.pop().expect("encoder stack underflow")
    }

    // ── nodes ───────────────────────────────────────────────────────

    fn encode_stmt(&mut self, node: &OpNode) -> Result<(), CompileError> {
        match node {
            OpNode::StoreLocal(local, value) => {
                self.check_local(*local)?;
                self.encode_expr(value)?;
                self.pop_producer();
                self.emit_u8(OP_STORE_LOCAL);
                self.emit_u16(*local);
            }
            OpNode::If {
                cond,
                then_body,
                else_body,
            } => {
                let else_label = self.encode_branch(cond)?;
                for stmt in then_body {
                    self.encode_stmt(stmt)?;
                }
                if else_body.is_empty() {
                    self.bind(else_label)?;
                } else {
                    self.emit_u8(OP_JUMP);
                    let end_label = self.emit_label();
                    self.bind(else_label)?;
                    for stmt in else_body {
                        self.encode_stmt(stmt)?;
                    }
                    self.bind(end_label)?;
                }
            }
            OpNode::While { cond, body } => {
                let top = self.pos();
                let end_label = self.encode_branch(cond)?;
                for stmt in body {
                    self.encode_stmt(stmt)?;
                }
                self.emit_u8(OP_JUMP);
                self.emit_target(top)?;
                self.bind(end_label)?;
            }
            OpNode::Return(value) => {
                self.encode_expr(value)?;
                self.pop_producer();
                self.emit_u8(OP_RETURN);
            }
            OpNode::Drop(value) => {
                self.encode_expr(value)?;
                self.pop_producer();
                self.emit_u8(OP_POP);
            }
            OpNode::Call { .. } if !self.call_produces(node) => {
                self.encode_expr_inner(node, false)?;
            }
            // a value-producing node in statement position: drop the value
            other => {
                self.encode_expr(other)?;
                self.pop_producer();
                self.emit_u8(OP_POP);
            }
        }
        Ok(())
    }

    /// Encode the condition and a `branch.false` consuming it; returns the
    /// label for the false edge.
    fn encode_branch(&mut self, cond: &OpNode) -> Result<Label, CompileError> {
        self.encode_expr(cond)?;
        let bci = self.pos() as u32;
        self.emit_u8(OP_BRANCH_FALSE);
        let label = self.emit_label();
        let profile = self.new_profile()?;
        self.emit_u16(profile);
        let producer = self.pop_producer();
        self.producers.insert((bci, 0), producer);
        Ok(label)
    }

    fn encode_expr(&mut self, node: &OpNode) -> Result<(), CompileError> {
        self.encode_expr_inner(node, true)
    }

    fn encode_expr_inner(&mut self, node: &OpNode, want_value: bool) -> Result<(), CompileError> {
        match node {
            OpNode::Constant(value) => {
                let idx = self.intern_constant(value.clone())?;
                let bci = self.pos() as u32;
                self.emit_u8(OP_LOAD_CONSTANT);
                self.emit_u16(idx);
                self.emit_u8(0); // state word
                self.push_producer(bci);
            }
            OpNode::LoadLocal(local) => {
                self.check_local(*local)?;
                let bci = self.pos() as u32;
                self.emit_u8(OP_LOAD_LOCAL);
                self.emit_u16(*local);
                self.emit_u8(0); // state word
                self.push_producer(bci);
            }
            OpNode::Call {
                op,
                args,
                consts,
                children,
            } => {
                let instr = self
                    .catalog
                    .lookup(op.opcode())
                    .expect("operation handle from another catalog");
                let operation = match &instr.kind {
                    InstructionKind::Custom(operation) => operation.clone(),
                    _ => unreachable!("handles only name custom instructions"),
                };
                if !operation.variadic && args.len() != operation.inputs.len() {
                    return Err(CompileError::ArityMismatch {
                        name: operation.name,
                        what: "stack inputs",
                        expected: operation.inputs.len(),
                        found: args.len(),
                    });
                }
                if consts.len() != operation.num_consts {
                    return Err(CompileError::ArityMismatch {
                        name: operation.name,
                        what: "captured constants",
                        expected: operation.num_consts,
                        found: consts.len(),
                    });
                }
                if children.len() != operation.num_children {
                    return Err(CompileError::ArityMismatch {
                        name: operation.name,
                        what: "captured children",
                        expected: operation.num_children,
                        found: children.len(),
                    });
                }

                for arg in args {
                    self.encode_expr(arg)?;
                }

                let bci = self.pos() as u32;
                self.emit_u8(instr.opcode);
                if operation.variadic {
                    if args.len() > u16::MAX as usize {
                        return Err(CompileError::ArityMismatch {
                            name: operation.name,
                            what: "variadic inputs",
                            expected: u16::MAX as usize,
                            found: args.len(),
                        });
                    }
                    self.emit_u16(args.len() as u16);
                }
                self.encode_data_slots(&instr, consts, children)?;

                // pop argument producers back-to-front, record the links
                for i in (0..args.len()).rev() {
                    let producer = self.pop_producer();
                    if !operation.variadic {
                        self.producers.insert((bci, i as u8), producer);
                    }
                }
                if operation.result.is_some() {
                    self.push_producer(bci);
                    if !want_value {
                        self.emit_u8(OP_POP);
                        self.pop_producer();
                    }
                }
            }
            _ => unreachable!("statement node in expression position"),
        }
        Ok(())
    }

    fn encode_data_slots(
        &mut self,
        instr: &Instruction,
        consts: &[Value],
        children: &[ChildDef],
    ) -> Result<(), CompileError> {
        let mut i = 0;
        while i < instr.data_kinds.len() {
            match instr.data_kinds[i] {
                DataKind::Bits => {
                    self.emit_u8(0);
                    i += 1;
                }
                DataKind::Const => {
                    let base = self.reserve_constants(consts)?;
                    self.emit_u16(base);
                    i += 2; // base slot + continuation
                }
                DataKind::Child => {
                    let base = self.intern_children(children)?;
                    self.emit_u16(base);
                    i += 2; // base slot + continuation
                }
                DataKind::Continuation => {
                    unreachable!("continuation without a preceding base index")
                }
            }
        }
        Ok(())
    }

    fn call_produces(&self, node: &OpNode) -> bool {
        let OpNode::Call { op, .. } = node else {
            return false;
        };
        let instr = self
            .catalog
            .lookup(op.opcode())
            .expect("operation handle from another catalog");
        matches!(&instr.kind, InstructionKind::Custom(operation) if operation.result.is_some())
    }

    fn check_local(&self, local: u16) -> Result<(), CompileError> {
        if local >= self.num_locals {
            return Err(CompileError::LocalOutOfRange {
                local,
                num_locals: self.num_locals,
            });
        }
        Ok(())
    }
}
