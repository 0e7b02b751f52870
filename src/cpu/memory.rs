//! Ocho instruction memory.
//!
//! A flat array of 2048 sixteen-bit words, populated by a loader before
//! the run starts. The machine has no separate data space; instruction
//! memory is the only memory there is.

use serde::{Serialize, Deserialize};

/// Number of 16-bit words in instruction memory.
pub const MEMORY_SIZE: usize = 2048;

/// Instruction memory: 2048 sixteen-bit words.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    words: Vec<u16>,
}

impl Memory {
    /// Create a new memory with all words zeroed.
    pub fn new() -> Self {
        Self {
            words: vec![0; MEMORY_SIZE],
        }
    }

    /// Read a word by index (0-2047).
    ///
    /// # Panics
    /// Panics if the index is out of range.
    #[inline]
    pub fn read(&self, addr: usize) -> u16 {
        assert!(addr < MEMORY_SIZE, "memory address {} out of range (0-{})", addr, MEMORY_SIZE - 1);
        self.words[addr]
    }

    /// Write a word by index (0-2047).
    ///
    /// # Panics
    /// Panics if the index is out of range.
    #[inline]
    pub fn write(&mut self, addr: usize, value: u16) {
        assert!(addr < MEMORY_SIZE, "memory address {} out of range (0-{})", addr, MEMORY_SIZE - 1);
        self.words[addr] = value;
    }

    /// Fetch the word at a program-counter address.
    ///
    /// A program counter past the end of memory (e.g. after running off
    /// the last word, or after a return-address underflow) is reported as
    /// a distinct error rather than wrapped around.
    pub fn fetch(&self, pc: u16) -> Result<u16, MemoryError> {
        let index = pc as usize;
        if index >= MEMORY_SIZE {
            return Err(MemoryError::AddressOutOfRange(pc));
        }
        Ok(self.words[index])
    }

    /// Clear all words to zero.
    pub fn clear(&mut self) {
        for word in &mut self.words {
            *word = 0;
        }
    }

    /// Load a program at address 0, truncating at capacity.
    ///
    /// Words beyond the 2048-word capacity are not loaded. Returns the
    /// number of words actually stored.
    pub fn load_program(&mut self, program: &[u16]) -> usize {
        let count = program.len().min(MEMORY_SIZE);
        self.words[..count].copy_from_slice(&program[..count]);
        count
    }

    /// All words, for inspection and the debugger views.
    pub fn words(&self) -> &[u16] {
        &self.words
    }

    /// Dump a range of memory (for debugging).
    pub fn dump(&self, start: usize, count: usize) -> Vec<(usize, u16)> {
        let end = (start + count).min(MEMORY_SIZE);
        (start..end)
            .map(|i| (i, self.words[i]))
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.words.iter().filter(|&&w| w != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_words", &non_zero)
            .field("total_words", &MEMORY_SIZE)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Fetch address is outside valid memory range.
    AddressOutOfRange(u16),
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AddressOutOfRange(addr) => {
                write!(f, "memory address {:#06x} out of range (0-{})", addr, MEMORY_SIZE - 1)
            }
        }
    }
}

impl std::error::Error for MemoryError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_write_roundtrip() {
        let mut mem = Memory::new();
        mem.write(10, 0xBEEF);
        assert_eq!(mem.read(10), 0xBEEF);
    }

    #[test]
    fn fetch_bounds() {
        let mem = Memory::new();
        assert!(mem.fetch(0).is_ok());
        assert!(mem.fetch(2047).is_ok());
        assert_eq!(
            mem.fetch(2048),
            Err(MemoryError::AddressOutOfRange(2048))
        );
        assert!(mem.fetch(0xFFFF).is_err());
    }

    #[test]
    fn load_program_at_zero() {
        let mut mem = Memory::new();
        let loaded = mem.load_program(&[1, 2, 3]);
        assert_eq!(loaded, 3);
        assert_eq!(mem.read(0), 1);
        assert_eq!(mem.read(1), 2);
        assert_eq!(mem.read(2), 3);
        assert_eq!(mem.read(3), 0);
    }

    #[test]
    fn load_program_truncates_at_capacity() {
        let mut mem = Memory::new();
        let oversized = vec![7u16; MEMORY_SIZE + 100];
        let loaded = mem.load_program(&oversized);
        assert_eq!(loaded, MEMORY_SIZE);
        assert_eq!(mem.read(MEMORY_SIZE - 1), 7);
    }
}
