//! Compiled units: one encoded stream plus its side tables.

use std::sync::Arc;

use ahash::AHashMap;

use crate::catalog::Catalog;
use crate::instruction::{InstructionKind, PROFILE_OFFSET, TARGET_OFFSET};
use crate::profile::BranchProfile;
use crate::stream::CodeStream;
use crate::value::Value;

/// One compiled operation tree: the byte stream, the append-only side
/// tables it indexes, and the producer map linking each consumed operand
/// back to the instruction that pushed it.
///
/// A unit is shared read-mostly: many threads may execute it at once, each
/// with its own frame and cursors. Only the stream's opcode and state
/// bytes ever change after compilation.
#[derive(Debug)]
pub struct CompiledUnit {
    pub(crate) stream: CodeStream,
    pub(crate) consts: Vec<Value>,
    pub(crate) children: Vec<Arc<CompiledUnit>>,
    pub(crate) profiles: Vec<BranchProfile>,
    /// `(consumer bci, operand index) -> producer bci`.
    pub(crate) producers: AHashMap<(u32, u8), u32>,
    pub max_stack: usize,
    pub num_locals: u16,
}

impl CompiledUnit {
    /// Slots a frame executing this unit needs: locals then stack.
    pub fn frame_size(&self) -> usize {
        self.num_locals as usize + self.max_stack
    }

    pub fn stream(&self) -> &CodeStream {
        &self.stream
    }

    pub fn constants(&self) -> &[Value] {
        &self.consts
    }

    pub fn children(&self) -> &[Arc<CompiledUnit>] {
        &self.children
    }

    pub fn profile(&self, index: u16) -> &BranchProfile {
        &self.profiles[index as usize]
    }

    /// Textual disassembly of the current stream state, including the
    /// additional-data slots of each instruction.
    pub fn disasm(&self, catalog: &Catalog) -> String {
        use std::fmt::Write;

        let mut out = String::new();
        let mut bci = 0usize;
        while bci < self.stream.len() {
            let opcode = self.stream.u8_at(bci);
            let Some(instr) = catalog.lookup(opcode) else {
                let _ = writeln!(out, "{bci:04x} ?? 0x{opcode:02x}");
                break;
            };
            let _ = write!(out, "{bci:04x} {}", instr.name);
            match &instr.kind {
                InstructionKind::LoadConstant => {
                    let idx = self.stream.u16_at(bci + 1);
                    let _ = write!(out, " {} ({})", idx, self.consts[idx as usize]);
                }
                InstructionKind::LoadLocal | InstructionKind::StoreLocal => {
                    let _ = write!(out, " l{}", self.stream.u16_at(bci + 1));
                }
                InstructionKind::Jump => {
                    let _ = write!(out, " -> {:04x}", self.stream.u16_at(bci + TARGET_OFFSET));
                }
                InstructionKind::Branch { .. } => {
                    let profile = self.stream.u16_at(bci + PROFILE_OFFSET);
                    let _ = write!(
                        out,
                        " -> {:04x} ~{}",
                        self.stream.u16_at(bci + TARGET_OFFSET),
                        profile,
                    );
                    if let Some(lean) = self.profiles[profile as usize].bias() {
                        let _ = write!(out, " lean={lean}");
                    }
                }
                InstructionKind::Custom(op) if op.variadic => {
                    let _ = write!(out, " argc={}", self.stream.u16_at(bci + 1));
                }
                _ => {}
            }

            let base = bci + instr.length_without_state();
            for word in 0..instr.state.words() {
                let _ = write!(out, " bits[{word}]={:08b}", self.stream.u8_at(base + word));
            }
            if let Some(slot) = instr.const_slot() {
                let _ = write!(out, " const@{}", self.stream.u16_at(bci + slot));
            }
            if let Some(slot) = instr.child_slot() {
                let _ = write!(out, " child@{}", self.stream.u16_at(bci + slot));
            }
            let _ = writeln!(out);
            bci += instr.length();
        }
        out
    }
}
