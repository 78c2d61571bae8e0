//! The encoded instruction stream: an arena of atomic bytes addressed only
//! by offset.
//!
//! The stream is shared by every concurrent execution of one compiled
//! unit. After encoding, exactly two things are ever written: opcode bytes
//! (quickening, a single relaxed store that cannot tear) and state-word
//! bytes (a relaxed fetch-or; legal because the flags are monotonic and
//! racing writers write the same bit). Static u16 operands are frozen, so
//! their two-byte reads need no further ordering.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::state_bits::BitRef;

pub struct CodeStream {
    bytes: Box<[AtomicU8]>,
}

impl CodeStream {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: bytes.into_iter().map(AtomicU8::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn u8_at(&self, offset: usize) -> u8 {
        self.bytes[offset].load(Ordering::Relaxed)
    }

    pub fn u16_at(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.u8_at(offset), self.u8_at(offset + 1)])
    }

    pub fn opcode_at(&self, bci: u32) -> u8 {
        self.u8_at(bci as usize)
    }

    /// Quickening write: overwrite the opcode byte at `bci` in place.
    /// Callers must stay within an opcode-compatible family (identical
    /// encoded length); the interpreter asserts that in debug builds.
    pub fn rewrite_opcode(&self, bci: u32, opcode: u8) {
        self.bytes[bci as usize].store(opcode, Ordering::Relaxed);
    }

    /// One-way state flag set in the word at `offset`.
    pub fn set_flag(&self, offset: usize, bit: BitRef) {
        self.bytes[offset + bit.word as usize].fetch_or(bit.mask, Ordering::Relaxed);
    }

    pub fn flag_set(&self, offset: usize, bit: BitRef) -> bool {
        self.u8_at(offset + bit.word as usize) & bit.mask != 0
    }

    /// Copy of the current bytes, for disassembly and tests.
    pub fn snapshot(&self) -> Vec<u8> {
        self.bytes.iter().map(|b| b.load(Ordering::Relaxed)).collect()
    }
}

impl std::fmt::Debug for CodeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CodeStream({} bytes)", self.bytes.len())
    }
}
