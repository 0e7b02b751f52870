//! CPU execution engine for the Ocho.
//!
//! Implements the fetch-decode-execute cycle and all instruction behaviors.

use crate::cpu::{CallStack, Memory, Registers};
use crate::cpu::decode::{self, Condition, Instruction, Opcode};
use crate::cpu::memory::MemoryError;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// CPU execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuState {
    /// CPU is running normally.
    Running,
    /// CPU has halted (executed HLT instruction).
    Halted,
}

/// The Ocho CPU.
#[derive(Clone, Serialize, Deserialize)]
pub struct Cpu {
    /// Register file, program counter, and flags.
    pub regs: Registers,
    /// Instruction memory.
    pub mem: Memory,
    /// Call stack for CAL/RET linkage.
    pub stack: CallStack,
    /// Current execution state.
    pub state: CpuState,
    /// Instruction count (for profiling).
    pub cycles: u64,
    /// Last executed instruction (for debugging).
    last_instr: Option<Instruction>,
}

impl Cpu {
    /// Create a new CPU with zeroed state.
    pub fn new() -> Self {
        Self {
            regs: Registers::new(),
            mem: Memory::new(),
            stack: CallStack::new(),
            state: CpuState::Running,
            cycles: 0,
            last_instr: None,
        }
    }

    /// Reset the CPU to initial state.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.stack.clear();
        self.state = CpuState::Running;
        self.cycles = 0;
        self.last_instr = None;
    }

    /// Load a program into memory at address 0, truncating at capacity.
    /// Returns the number of words loaded.
    pub fn load_program(&mut self, program: &[u16]) -> usize {
        self.mem.load_program(program)
    }

    /// Execute a single instruction.
    ///
    /// Returns the instruction that was executed, or an error if the CPU
    /// is not running or the program counter points outside memory.
    pub fn step(&mut self) -> Result<Instruction, CpuError> {
        if self.state != CpuState::Running {
            return Err(CpuError::NotRunning(self.state));
        }

        // Fetch
        let raw = self.mem.fetch(self.regs.pc)?;

        // Decode
        let instr = decode::decode(raw);

        // Execute
        self.execute(instr);

        // Update state
        self.cycles += 1;
        self.last_instr = Some(instr);

        Ok(instr)
    }

    /// Run until halt or error.
    ///
    /// Returns the number of instructions executed. The core provides no
    /// step budget of its own: a program that never executes HLT runs
    /// until the fetch faults or the embedder cancels via
    /// [`Cpu::run_until`] / [`Cpu::run_limited`].
    pub fn run(&mut self) -> Result<u64, CpuError> {
        self.run_until(|_| true)
    }

    /// Run until halt, error, or until `keep_going` returns false.
    ///
    /// The check is invoked once per cycle before each fetch, so an
    /// embedder can impose a step budget, a wall-clock deadline, or any
    /// other cancellation policy without the core baking one in.
    pub fn run_until<F>(&mut self, mut keep_going: F) -> Result<u64, CpuError>
    where
        F: FnMut(&Cpu) -> bool,
    {
        let start_cycles = self.cycles;

        while self.state == CpuState::Running && keep_going(self) {
            self.step()?;
        }

        Ok(self.cycles - start_cycles)
    }

    /// Run for at most `max_cycles` instructions.
    pub fn run_limited(&mut self, max_cycles: u64) -> Result<u64, CpuError> {
        let limit = self.cycles.saturating_add(max_cycles);
        self.run_until(|cpu| cpu.cycles < limit)
    }

    /// Execute a decoded instruction.
    ///
    /// All faults at this level are value-level by design: unassigned
    /// opcodes leave the machine untouched (including the program
    /// counter), stack overflow drops the push, stack underflow yields
    /// the in-band sentinel address.
    fn execute(&mut self, instr: Instruction) {
        let Some(opcode) = instr.opcode() else {
            // Reserved opcode: no side effect and no PC advance, so a
            // stray word traps the program in place instead of silently
            // making forward progress.
            return;
        };

        match opcode {
            Opcode::Nop => {
                self.regs.advance_pc();
            }

            Opcode::Hlt => {
                self.state = CpuState::Halted;
            }

            // ==================== Arithmetic & Logic ====================

            Opcode::Add => {
                let sum = self.regs.read(instr.reg_a()) as u16
                    + self.regs.read(instr.reg_b()) as u16;
                let result = sum as u8;
                self.regs.write(instr.reg_c(), result);
                self.regs.set_flags(result == 0, sum > 0xFF);
                self.regs.advance_pc();
            }

            Opcode::Sub => {
                let a = self.regs.read(instr.reg_a());
                let b = self.regs.read(instr.reg_b());
                let (result, borrow) = a.overflowing_sub(b);
                self.regs.write(instr.reg_c(), result);
                self.regs.set_flags(result == 0, borrow);
                self.regs.advance_pc();
            }

            Opcode::Nor => {
                let result = !(self.regs.read(instr.reg_a()) | self.regs.read(instr.reg_b()));
                self.regs.write(instr.reg_c(), result);
                self.regs.set_flags(result == 0, false);
                self.regs.advance_pc();
            }

            Opcode::And => {
                let result = self.regs.read(instr.reg_a()) & self.regs.read(instr.reg_b());
                self.regs.write(instr.reg_c(), result);
                self.regs.set_flags(result == 0, false);
                self.regs.advance_pc();
            }

            Opcode::Xor => {
                let result = self.regs.read(instr.reg_a()) ^ self.regs.read(instr.reg_b());
                self.regs.write(instr.reg_c(), result);
                self.regs.set_flags(result == 0, false);
                self.regs.advance_pc();
            }

            Opcode::Rsh => {
                let a = self.regs.read(instr.reg_a());
                let result = a >> 1;
                self.regs.write(instr.reg_c(), result);
                // Carry is the bit shifted out.
                self.regs.set_flags(result == 0, a & 1 != 0);
                self.regs.advance_pc();
            }

            // ==================== Immediates ====================

            Opcode::Ldi => {
                self.regs.write(instr.reg_a(), instr.imm());
                // The load is not run through the ALU, so the zero flag
                // is not tested: both flags read false afterwards even
                // when the immediate is 0. Architecture quirk, kept.
                self.regs.set_flags(false, false);
                self.regs.advance_pc();
            }

            Opcode::Adi => {
                let sum = self.regs.read(instr.reg_a()) as u16 + instr.imm() as u16;
                let result = sum as u8;
                self.regs.write(instr.reg_a(), result);
                self.regs.set_flags(result == 0, sum > 0xFF);
                self.regs.advance_pc();
            }

            // ==================== Control Flow ====================

            Opcode::Jmp => {
                // Target comes from the 8-bit immediate: JMP reaches only
                // addresses 0-255 even though memory holds 2048 words.
                self.regs.jump(instr.imm() as u16);
            }

            Opcode::Brh => {
                if self.condition_holds(instr.cond()) {
                    self.regs.jump(instr.address());
                } else {
                    self.regs.advance_pc();
                }
            }

            Opcode::Cal => {
                // The call-site PC goes on the stack; RET resumes at the
                // following instruction via the pop-with-increment.
                self.stack.push(self.regs.pc);
                self.regs.jump(instr.imm() as u16);
            }

            Opcode::Ret => {
                let target = self.stack.pop_return();
                self.regs.jump(target);
            }
        }
    }

    /// Evaluate a branch condition against the current flags.
    fn condition_holds(&self, cond: Condition) -> bool {
        match cond {
            Condition::ZeroSet => self.regs.flags.zero,
            Condition::ZeroClear => !self.regs.flags.zero,
            Condition::CarrySet => self.regs.flags.carry,
            Condition::CarryClear => !self.regs.flags.carry,
        }
    }

    /// Get the last executed instruction.
    pub fn last_instruction(&self) -> Option<Instruction> {
        self.last_instr
    }

    /// Check if the CPU is halted.
    pub fn is_halted(&self) -> bool {
        self.state == CpuState::Halted
    }

    /// Check if the CPU is running.
    pub fn is_running(&self) -> bool {
        self.state == CpuState::Running
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Cpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cpu")
            .field("state", &self.state)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("stack_depth", &self.stack.depth())
            .finish()
    }
}

/// Errors that can occur during CPU execution.
#[derive(Debug, Clone, Error)]
pub enum CpuError {
    #[error("CPU not running: {0:?}")]
    NotRunning(CpuState),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::stack::UNDERFLOW_SENTINEL;

    fn make_program(instructions: &[Instruction]) -> Vec<u16> {
        instructions.iter().map(|i| i.word()).collect()
    }

    fn run_program(instructions: &[Instruction]) -> Cpu {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(instructions));
        cpu.run().unwrap();
        cpu
    }

    #[test]
    fn halt_stops_the_loop() {
        let cpu = run_program(&[Instruction::plain(Opcode::Hlt)]);
        assert!(cpu.is_halted());
        assert_eq!(cpu.cycles, 1);
        // HLT does not advance the PC.
        assert_eq!(cpu.regs.pc, 0);
    }

    #[test]
    fn nop_then_halt() {
        let cpu = run_program(&[
            Instruction::plain(Opcode::Nop),
            Instruction::plain(Opcode::Nop),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.cycles, 3);
        assert_eq!(cpu.regs.pc, 2);
    }

    #[test]
    fn add_small_values() {
        // LDI r1,5; LDI r2,3; ADD r1,r2,r3; HLT => r3=8
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 5),
            Instruction::immediate(Opcode::Ldi, 2, 3),
            Instruction::three_reg(Opcode::Add, 1, 2, 3),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(3), 8);
        assert!(!cpu.regs.flags.zero);
        assert!(!cpu.regs.flags.carry);
    }

    #[test]
    fn add_overflow_sets_carry_and_zero() {
        // 255 + 1 wraps to 0 with carry out.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 255),
            Instruction::immediate(Opcode::Ldi, 2, 1),
            Instruction::three_reg(Opcode::Add, 1, 2, 3),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(3), 0);
        assert!(cpu.regs.flags.zero);
        assert!(cpu.regs.flags.carry);
    }

    #[test]
    fn sub_borrow_sets_carry() {
        // 0 - 1 = 255 with borrow.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 2, 1),
            Instruction::three_reg(Opcode::Sub, 0, 2, 3),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(3), 255);
        assert!(cpu.regs.flags.carry);
        assert!(!cpu.regs.flags.zero);
    }

    #[test]
    fn sub_equal_sets_zero_without_borrow() {
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 9),
            Instruction::immediate(Opcode::Ldi, 2, 9),
            Instruction::three_reg(Opcode::Sub, 1, 2, 3),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(3), 0);
        assert!(cpu.regs.flags.zero);
        assert!(!cpu.regs.flags.carry);
    }

    #[test]
    fn nor_and_xor() {
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 0b1100_1100),
            Instruction::immediate(Opcode::Ldi, 2, 0b1010_1010),
            Instruction::three_reg(Opcode::Nor, 1, 2, 3),
            Instruction::three_reg(Opcode::And, 1, 2, 4),
            Instruction::three_reg(Opcode::Xor, 1, 2, 5),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(3), 0b0001_0001);
        assert_eq!(cpu.regs.read(4), 0b1000_1000);
        assert_eq!(cpu.regs.read(5), 0b0110_0110);
        // Last logic op produced a nonzero result with carry cleared.
        assert!(!cpu.regs.flags.zero);
        assert!(!cpu.regs.flags.carry);
    }

    #[test]
    fn rsh_carries_out_low_bit() {
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 0b0000_0011),
            Instruction::three_reg(Opcode::Rsh, 1, 0, 2),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(2), 1);
        assert!(cpu.regs.flags.carry);

        // Shifting 1 gives 0: zero set, carry from the shifted-out bit.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 1),
            Instruction::three_reg(Opcode::Rsh, 1, 0, 2),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(2), 0);
        assert!(cpu.regs.flags.zero);
        assert!(cpu.regs.flags.carry);
    }

    #[test]
    fn ldi_never_sets_zero_flag() {
        // Loading 0 leaves the zero flag clear even though the value is
        // zero: the load bypasses the ALU. Regression test for the quirk.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 1),
            Instruction::three_reg(Opcode::Sub, 1, 1, 2), // zero := true
            Instruction::immediate(Opcode::Ldi, 3, 0),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert!(!cpu.regs.flags.zero);
        assert!(!cpu.regs.flags.carry);
    }

    #[test]
    fn adi_boundary_carry() {
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 200),
            Instruction::immediate(Opcode::Adi, 1, 100),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(1), 44);
        assert!(cpu.regs.flags.carry);
        assert!(!cpu.regs.flags.zero);
    }

    #[test]
    fn register_zero_stays_zero_as_destination() {
        // ADD r0,r1,r0 must never leave a nonzero value in r0.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 7),
            Instruction::three_reg(Opcode::Add, 0, 1, 0),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(0), 0);
    }

    #[test]
    fn jmp_is_absolute() {
        let cpu = run_program(&[
            Instruction::jump(Opcode::Jmp, 3),
            Instruction::immediate(Opcode::Ldi, 1, 1), // skipped
            Instruction::plain(Opcode::Hlt),           // skipped
            Instruction::immediate(Opcode::Ldi, 2, 2),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(1), 0);
        assert_eq!(cpu.regs.read(2), 2);
        assert_eq!(cpu.regs.pc, 4);
    }

    #[test]
    fn brh_taken_and_not_taken() {
        // AND r0,r0,r1 produces 0, so zero is set; the ZeroClear branch
        // must fall through to the HLT right after it.
        let cpu = run_program(&[
            Instruction::three_reg(Opcode::And, 0, 0, 1),
            Instruction::branch(Condition::ZeroClear, 4),
            Instruction::plain(Opcode::Hlt),
            Instruction::plain(Opcode::Hlt),
            Instruction::immediate(Opcode::Ldi, 4, 9),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(4), 0);
        assert_eq!(cpu.regs.pc, 2);

        // Same program with ZeroSet: the branch is taken.
        let cpu = run_program(&[
            Instruction::three_reg(Opcode::And, 0, 0, 1),
            Instruction::branch(Condition::ZeroSet, 4),
            Instruction::plain(Opcode::Hlt),
            Instruction::plain(Opcode::Hlt),
            Instruction::immediate(Opcode::Ldi, 4, 9),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(4), 9);
    }

    #[test]
    fn brh_carry_conditions() {
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 255),
            Instruction::immediate(Opcode::Adi, 1, 1), // carry := true
            Instruction::branch(Condition::CarrySet, 4),
            Instruction::plain(Opcode::Hlt),
            Instruction::immediate(Opcode::Ldi, 2, 1),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert_eq!(cpu.regs.read(2), 1);
    }

    #[test]
    fn cal_then_ret_resumes_after_call_site() {
        // CAL at address 1 calls the subroutine at 4; RET must resume at
        // address 2 (call site + 1).
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 1),
            Instruction::jump(Opcode::Cal, 4),
            Instruction::immediate(Opcode::Ldi, 2, 2),
            Instruction::plain(Opcode::Hlt),
            Instruction::immediate(Opcode::Ldi, 3, 3),
            Instruction::plain(Opcode::Ret),
        ]);
        assert_eq!(cpu.regs.read(1), 1);
        assert_eq!(cpu.regs.read(2), 2);
        assert_eq!(cpu.regs.read(3), 3);
        assert!(cpu.stack.is_empty());
    }

    #[test]
    fn call_stack_saturates_at_sixteen() {
        // Sixteen nested CALs fill the stack; the 17th still jumps but
        // its return address is dropped.
        let mut cpu = Cpu::new();
        let mut program: Vec<Instruction> = Vec::new();
        for i in 0..17u8 {
            // Each CAL targets the next instruction.
            program.push(Instruction::jump(Opcode::Cal, i + 1));
        }
        program.push(Instruction::plain(Opcode::Hlt));
        cpu.load_program(&make_program(&program));
        cpu.run().unwrap();

        assert_eq!(cpu.stack.depth(), 16);
        assert!(cpu.is_halted());
    }

    #[test]
    fn ret_underflow_propagates_sentinel() {
        // RET on an empty stack jumps to the sentinel address; the next
        // fetch then faults because 0xFFFF is outside memory.
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::plain(Opcode::Ret)]));
        cpu.step().unwrap();
        assert_eq!(cpu.regs.pc, UNDERFLOW_SENTINEL);

        match cpu.step() {
            Err(CpuError::Memory(MemoryError::AddressOutOfRange(addr))) => {
                assert_eq!(addr, UNDERFLOW_SENTINEL);
            }
            other => panic!("expected fetch fault, got {:?}", other),
        }
    }

    #[test]
    fn reserved_opcodes_freeze_the_pc() {
        // 0xE and 0xF are the two unassigned opcode slots (the earlier
        // table revision kept load/store there; the conditional-branch
        // revision is canonical and leaves them reserved). Executing one
        // changes nothing, not even the program counter.
        for nibble in [0xEu16, 0xF] {
            let mut cpu = Cpu::new();
            cpu.load_program(&[nibble << 12]);
            cpu.step().unwrap();
            assert_eq!(cpu.regs.pc, 0);
            assert!(cpu.is_running());
            assert_eq!(cpu.regs.gpr(), &[0u8; 16]);
        }
    }

    #[test]
    fn run_limited_cancels_endless_program() {
        // JMP 0 loops forever; the step budget must stop it.
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::jump(Opcode::Jmp, 0)]));
        let executed = cpu.run_limited(100).unwrap();
        assert_eq!(executed, 100);
        assert!(cpu.is_running());
    }

    #[test]
    fn run_until_cooperative_check() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::jump(Opcode::Jmp, 0)]));
        let executed = cpu.run_until(|cpu| cpu.cycles < 5).unwrap();
        assert_eq!(executed, 5);
    }

    #[test]
    fn step_after_halt_is_an_error() {
        let mut cpu = Cpu::new();
        cpu.load_program(&make_program(&[Instruction::plain(Opcode::Hlt)]));
        cpu.run().unwrap();
        assert!(matches!(cpu.step(), Err(CpuError::NotRunning(CpuState::Halted))));
    }

    #[test]
    fn running_off_the_end_faults() {
        // No HLT: the PC walks past the last word and the fetch faults.
        let mut cpu = Cpu::new();
        // Memory is all NOPs (zero words); run to the end.
        let result = cpu.run();
        assert!(matches!(
            result,
            Err(CpuError::Memory(MemoryError::AddressOutOfRange(2048)))
        ));
        assert_eq!(cpu.cycles, 2048);
    }

    #[test]
    fn flags_survive_non_alu_opcodes() {
        // JMP/NOP/CAL/RET neither read nor write flags.
        let cpu = run_program(&[
            Instruction::immediate(Opcode::Ldi, 1, 255),
            Instruction::immediate(Opcode::Adi, 1, 1), // zero+carry set
            Instruction::jump(Opcode::Jmp, 3),
            Instruction::plain(Opcode::Nop),
            Instruction::plain(Opcode::Hlt),
        ]);
        assert!(cpu.regs.flags.zero);
        assert!(cpu.regs.flags.carry);
    }
}
