//! WebAssembly bindings for the Ocho emulator.
//!
//! This module provides JavaScript-friendly wrappers around the core emulator.

use wasm_bindgen::prelude::*;
use crate::Cpu;
use crate::asm::assembler::assemble;
use crate::asm::disasm::disassemble_instruction;
use crate::cpu::memory::MEMORY_SIZE;

/// Initialize panic hook for better error messages in console.
#[wasm_bindgen(start)]
pub fn init() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WebAssembly-friendly CPU wrapper.
#[wasm_bindgen]
pub struct WasmCpu {
    cpu: Cpu,
    program: Vec<u16>,
}

#[wasm_bindgen]
impl WasmCpu {
    /// Create a new CPU instance.
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            program: Vec::new(),
        }
    }

    /// Load a program from assembly source code.
    #[wasm_bindgen]
    pub fn load_asm(&mut self, source: &str) -> Result<usize, JsError> {
        let words = assemble(source)
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        let len = words.len();
        self.program = words;
        self.cpu = Cpu::new();
        let _ = self.cpu.load_program(&self.program);

        Ok(len)
    }

    /// Load a program from raw instruction words.
    #[wasm_bindgen]
    pub fn load_words(&mut self, words: &[u16]) -> usize {
        self.program = words.to_vec();
        self.cpu = Cpu::new();
        self.cpu.load_program(&self.program)
    }

    /// Step one instruction. Returns the disassembled instruction.
    #[wasm_bindgen]
    pub fn step(&mut self) -> Result<String, JsError> {
        if !self.cpu.is_running() {
            return Err(JsError::new("CPU is halted"));
        }

        let instr = self.cpu.step()
            .map_err(|e| JsError::new(&format!("{}", e)))?;

        Ok(disassemble_instruction(instr.word()))
    }

    /// Run until halt or max cycles.
    #[wasm_bindgen]
    pub fn run(&mut self, max_cycles: u32) -> u64 {
        let _ = self.cpu.run_limited(max_cycles as u64);
        self.cpu.cycles
    }

    /// Reset CPU to initial state with loaded program.
    #[wasm_bindgen]
    pub fn reset(&mut self) {
        self.cpu = Cpu::new();
        if !self.program.is_empty() {
            let _ = self.cpu.load_program(&self.program);
        }
    }

    /// Check if CPU is running.
    #[wasm_bindgen]
    pub fn is_running(&self) -> bool {
        self.cpu.is_running()
    }

    /// Check if CPU is halted.
    #[wasm_bindgen]
    pub fn is_halted(&self) -> bool {
        self.cpu.is_halted()
    }

    /// Get cycle count.
    #[wasm_bindgen]
    pub fn cycles(&self) -> u64 {
        self.cpu.cycles
    }

    /// Get program counter.
    #[wasm_bindgen]
    pub fn pc(&self) -> u16 {
        self.cpu.regs.pc
    }

    /// Get one register value (index masked to 0-15).
    #[wasm_bindgen]
    pub fn register(&self, index: u8) -> u8 {
        self.cpu.regs.read(index)
    }

    /// Get all 16 registers.
    #[wasm_bindgen]
    pub fn registers(&self) -> Vec<u8> {
        self.cpu.regs.gpr().to_vec()
    }

    /// Get the zero flag.
    #[wasm_bindgen]
    pub fn zero_flag(&self) -> bool {
        self.cpu.regs.flags.zero
    }

    /// Get the carry flag.
    #[wasm_bindgen]
    pub fn carry_flag(&self) -> bool {
        self.cpu.regs.flags.carry
    }

    /// Get call stack depth.
    #[wasm_bindgen]
    pub fn stack_depth(&self) -> usize {
        self.cpu.stack.depth()
    }

    /// Get state as string.
    #[wasm_bindgen]
    pub fn state(&self) -> String {
        format!("{:?}", self.cpu.state)
    }

    /// Get memory word at index (0-2047).
    #[wasm_bindgen]
    pub fn memory_at(&self, index: usize) -> u16 {
        if index < MEMORY_SIZE {
            self.cpu.mem.read(index)
        } else {
            0
        }
    }

    /// Get all memory words.
    #[wasm_bindgen]
    pub fn memory_all(&self) -> Vec<u16> {
        self.cpu.mem.words().to_vec()
    }

    /// Get registers as JSON string.
    #[wasm_bindgen]
    pub fn registers_json(&self) -> String {
        format!(r#"{{"registers":{:?},"pc":{},"zero":{},"carry":{},"cycles":{}}}"#,
            self.cpu.regs.gpr(),
            self.cpu.regs.pc,
            self.cpu.regs.flags.zero,
            self.cpu.regs.flags.carry,
            self.cpu.cycles
        )
    }
}

impl Default for WasmCpu {
    fn default() -> Self {
        Self::new()
    }
}

/// Assemble source code and return the instruction words.
#[wasm_bindgen]
pub fn wasm_assemble(source: &str) -> Result<Vec<u16>, JsError> {
    assemble(source).map_err(|e| JsError::new(&format!("{}", e)))
}

/// Disassemble a single 16-bit word.
#[wasm_bindgen]
pub fn wasm_disassemble(word: u16) -> String {
    disassemble_instruction(word)
}
