//! State bit allocation for the boxing-elimination flags.
//!
//! Every instruction kind that tracks boxing carries one or more byte-sized
//! state words in its encoded form. The allocator assigns each flag a fixed
//! bit position inside those words, once, at catalog build time. Flag
//! identity is the enum variant itself, so two semantically different flags
//! can never collide. Positions are part of the instruction's wire layout
//! and never change afterwards.

use crate::error::CompileError;

/// Bits per state word. One word is one byte in the encoded stream.
pub const BITS_PER_WORD: usize = 8;

/// Identity of a per-site state flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateFlag {
    /// Operand `i` of this instruction is currently stored boxed.
    InputBoxed(u8),
    /// The result of this instruction must be stored boxed.
    ResultBoxed,
}

/// An allocated bit: which state word, and the mask within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitRef {
    pub word: u8,
    pub mask: u8,
}

/// Assigns bit positions. Consumed into a [`StateLayout`] once the
/// instruction's flag set is complete.
#[derive(Debug)]
pub struct StateLayoutBuilder {
    name: &'static str,
    max_words: usize,
    entries: Vec<(StateFlag, BitRef)>,
}

impl StateLayoutBuilder {
    pub fn new(name: &'static str, max_words: usize) -> Self {
        Self {
            name,
            max_words,
            entries: Vec::new(),
        }
    }

    /// Allocate a bit for `flag`. Idempotent: asking for the same flag
    /// again returns the position assigned the first time.
    pub fn allocate(&mut self, flag: StateFlag) -> Result<BitRef, CompileError> {
        if let Some(&(_, bit)) = self.entries.iter().find(|(f, _)| *f == flag) {
            return Ok(bit);
        }
        let index = self.entries.len();
        let word = index / BITS_PER_WORD;
        if word >= self.max_words {
            return Err(CompileError::StateBitOverflow {
                name: self.name,
                max_words: self.max_words,
            });
        }
        let bit = BitRef {
            word: word as u8,
            mask: 1 << (index % BITS_PER_WORD),
        };
        self.entries.push((flag, bit));
        Ok(bit)
    }

    pub fn finish(self) -> StateLayout {
        let words = self
            .entries
            .last()
            .map(|(_, bit)| bit.word as usize + 1)
            .unwrap_or(0);
        StateLayout {
            entries: self.entries,
            words,
        }
    }
}

/// Finalized flag → bit mapping for one instruction kind.
#[derive(Debug, Clone, Default)]
pub struct StateLayout {
    entries: Vec<(StateFlag, BitRef)>,
    words: usize,
}

impl StateLayout {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of state words (= `Bits` data slots) this layout occupies.
    pub fn words(&self) -> usize {
        self.words
    }

    pub fn bit(&self, flag: StateFlag) -> Option<BitRef> {
        self.entries
            .iter()
            .find(|(f, _)| *f == flag)
            .map(|&(_, bit)| bit)
    }

    /// Pure test against a snapshot of the state words.
    pub fn contains(&self, words: &[u8], flag: StateFlag) -> bool {
        match self.bit(flag) {
            Some(bit) => words[bit.word as usize] & bit.mask != 0,
            None => false,
        }
    }

    pub fn contains_all(&self, words: &[u8], flags: &[StateFlag]) -> bool {
        flags.iter().all(|&f| self.contains(words, f))
    }

    /// Pure single-word set; the stream applies the run-time equivalent via
    /// an atomic fetch-or.
    pub fn set(word: u8, bit: BitRef) -> u8 {
        word | bit.mask
    }

    pub fn flags(&self) -> impl Iterator<Item = StateFlag> + '_ {
        self.entries.iter().map(|&(f, _)| f)
    }
}
