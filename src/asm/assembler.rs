//! Simple assembler for Ocho programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! LOOP:               ; Define a label
//!     LDI r1, 5       ; Load immediate
//!     ADD r1, r2, r3  ; Three-register ALU op
//!     RSH r3, r4      ; Shift source into destination
//!     BRH nz, LOOP    ; Conditional branch (zero/nz/carry/nc)
//!     CAL SUB1        ; Call a subroutine
//!     JMP END         ; Unconditional jump
//!     HLT             ; Halt
//!
//!     DAT 42          ; Define a raw data word
//! ```
//!
//! Commas between operands are optional. JMP/CAL targets must fit in
//! 8 bits (0-255) and BRH targets in 10 bits (0-1023); the assembler
//! rejects anything wider instead of silently truncating.

use crate::cpu::decode::{Condition, Instruction, Opcode};
use std::collections::HashMap;
use thiserror::Error;

/// Assemble source code to a list of instruction words.
pub fn assemble(source: &str) -> Result<Vec<u16>, AssemblerError> {
    let mut asm = Assembler::new();
    asm.assemble(source)
}

/// Which field of an already-emitted word a label reference patches.
#[derive(Debug, Clone, Copy)]
enum FixupKind {
    /// 8-bit JMP/CAL target in the low byte.
    Jump,
    /// 10-bit BRH target in the low ten bits.
    Branch,
}

impl FixupKind {
    fn max_target(self) -> u16 {
        match self {
            FixupKind::Jump => 0xFF,
            FixupKind::Branch => 0x3FF,
        }
    }

    fn patch(self, word: u16, target: u16) -> u16 {
        match self {
            FixupKind::Jump => (word & 0xFF00) | target,
            FixupKind::Branch => (word & 0xFC00) | target,
        }
    }
}

/// The assembler state.
struct Assembler {
    /// Symbol table (label -> address).
    symbols: HashMap<String, u16>,
    /// Unresolved label references: (output index, label, source line, field).
    pending: Vec<(usize, String, usize, FixupKind)>,
    /// Output words.
    output: Vec<u16>,
}

impl Assembler {
    fn new() -> Self {
        Self {
            symbols: HashMap::new(),
            pending: Vec::new(),
            output: Vec::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Vec<u16>, AssemblerError> {
        // Pass 1: collect labels and generate code
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        // Pass 2: resolve forward references
        self.resolve_references()?;

        Ok(self.output.clone())
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let line = line.trim();

        // Skip empty lines and comments
        if line.is_empty() || line.starts_with(';') {
            return Ok(());
        }

        // Remove inline comments
        let line = if let Some(idx) = line.find(';') {
            line[..idx].trim()
        } else {
            line
        };

        if line.is_empty() {
            return Ok(());
        }

        // Check for label definition
        if let Some(colon_idx) = line.find(':') {
            let label = line[..colon_idx].trim().to_uppercase();
            if !label.is_empty() {
                self.symbols.insert(label, self.output.len() as u16);
            }

            // Process rest of line if any
            let rest = line[colon_idx + 1..].trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let parts: Vec<&str> = line
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|t| !t.is_empty())
            .collect();
        if parts.is_empty() {
            return Ok(());
        }

        let mnemonic = parts[0].to_uppercase();
        let operands = &parts[1..];

        match mnemonic.as_str() {
            "DAT" | "DATA" => {
                let value = self.parse_value(
                    expect_operand(operands, 0, &mnemonic, line_num)?,
                    line_num,
                )?;
                if value > 0xFFFF || value < -0x8000 {
                    return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
                }
                self.output.push(value as u16);
            }

            _ => {
                let word = self.parse_instruction(&mnemonic, operands, line_num)?;
                self.output.push(word);
            }
        }

        Ok(())
    }

    fn parse_instruction(
        &mut self,
        mnemonic: &str,
        operands: &[&str],
        line_num: usize,
    ) -> Result<u16, AssemblerError> {
        let word = match mnemonic {
            "NOP" => Instruction::plain(Opcode::Nop),
            "HLT" | "HALT" => Instruction::plain(Opcode::Hlt),
            "RET" => Instruction::plain(Opcode::Ret),

            // Three-register ALU ops
            "ADD" | "SUB" | "NOR" | "AND" | "XOR" => {
                let op = match mnemonic {
                    "ADD" => Opcode::Add,
                    "SUB" => Opcode::Sub,
                    "NOR" => Opcode::Nor,
                    "AND" => Opcode::And,
                    _ => Opcode::Xor,
                };
                let a = parse_register(expect_operand(operands, 0, mnemonic, line_num)?, line_num)?;
                let b = parse_register(expect_operand(operands, 1, mnemonic, line_num)?, line_num)?;
                let c = parse_register(expect_operand(operands, 2, mnemonic, line_num)?, line_num)?;
                Instruction::three_reg(op, a, b, c)
            }

            // Shift takes a source and a destination
            "RSH" => {
                let a = parse_register(expect_operand(operands, 0, mnemonic, line_num)?, line_num)?;
                let c = parse_register(expect_operand(operands, 1, mnemonic, line_num)?, line_num)?;
                Instruction::three_reg(Opcode::Rsh, a, 0, c)
            }

            // Register + immediate
            "LDI" | "ADI" => {
                let op = if mnemonic == "LDI" { Opcode::Ldi } else { Opcode::Adi };
                let a = parse_register(expect_operand(operands, 0, mnemonic, line_num)?, line_num)?;
                let value = self.parse_value(
                    expect_operand(operands, 1, mnemonic, line_num)?,
                    line_num,
                )?;
                if value > 0xFF || value < -0x80 {
                    return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
                }
                Instruction::immediate(op, a, value as u8)
            }

            // Jumps: 8-bit target
            "JMP" | "CAL" | "CALL" => {
                let op = if mnemonic == "JMP" { Opcode::Jmp } else { Opcode::Cal };
                let target = self.parse_target(
                    expect_operand(operands, 0, mnemonic, line_num)?,
                    line_num,
                    FixupKind::Jump,
                )?;
                Instruction::jump(op, target as u8)
            }

            // Conditional branch: condition, 10-bit target
            "BRH" => {
                let cond = parse_condition(
                    expect_operand(operands, 0, mnemonic, line_num)?,
                    line_num,
                )?;
                let target = self.parse_target(
                    expect_operand(operands, 1, mnemonic, line_num)?,
                    line_num,
                    FixupKind::Branch,
                )?;
                Instruction::branch(cond, target)
            }

            _ => {
                return Err(AssemblerError::UnknownMnemonic {
                    line: line_num,
                    mnemonic: mnemonic.to_string(),
                })
            }
        };

        Ok(word.word())
    }

    /// Parse a jump/branch target: a numeric address, or a label to be
    /// resolved in pass 2.
    fn parse_target(
        &mut self,
        operand: &str,
        line_num: usize,
        kind: FixupKind,
    ) -> Result<u16, AssemblerError> {
        if let Ok(value) = self.parse_value(operand, line_num) {
            if value < 0 || value > kind.max_target() as i64 {
                return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
            }
            return Ok(value as u16);
        }

        // Label reference: emit a placeholder, patch in pass 2.
        self.pending.push((
            self.output.len(),
            operand.to_uppercase(),
            line_num,
            kind,
        ));
        Ok(0)
    }

    /// Parse a numeric literal: decimal, `0x` hex, or `0b` binary.
    fn parse_value(&self, operand: &str, line_num: usize) -> Result<i64, AssemblerError> {
        let operand = operand.trim();

        let parsed = if let Some(hex) = operand.strip_prefix("0x").or_else(|| operand.strip_prefix("0X")) {
            i64::from_str_radix(hex, 16).ok()
        } else if let Some(bin) = operand.strip_prefix("0b").or_else(|| operand.strip_prefix("0B")) {
            i64::from_str_radix(bin, 2).ok()
        } else {
            operand.parse::<i64>().ok()
        };

        parsed.ok_or_else(|| AssemblerError::SyntaxError {
            line: line_num,
            message: format!("expected a number, found {:?}", operand),
        })
    }

    fn resolve_references(&mut self) -> Result<(), AssemblerError> {
        for (out_idx, label, line_num, kind) in &self.pending {
            let addr = *self.symbols.get(label).ok_or_else(|| {
                AssemblerError::UndefinedLabel {
                    line: *line_num,
                    label: label.clone(),
                }
            })?;

            if addr > kind.max_target() {
                return Err(AssemblerError::ValueOutOfRange {
                    line: *line_num,
                    value: addr as i64,
                });
            }

            self.output[*out_idx] = kind.patch(self.output[*out_idx], addr);
        }
        Ok(())
    }
}

fn expect_operand<'a>(
    operands: &[&'a str],
    index: usize,
    mnemonic: &str,
    line_num: usize,
) -> Result<&'a str, AssemblerError> {
    operands.get(index).copied().ok_or_else(|| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("{} is missing operand {}", mnemonic, index + 1),
    })
}

fn parse_register(operand: &str, line_num: usize) -> Result<u8, AssemblerError> {
    let lower = operand.to_lowercase();
    let index = lower
        .strip_prefix('r')
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|&n| n < 16);

    index.ok_or_else(|| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("expected a register r0-r15, found {:?}", operand),
    })
}

fn parse_condition(operand: &str, line_num: usize) -> Result<Condition, AssemblerError> {
    match operand.to_lowercase().as_str() {
        "zero" | "z" | "eq" => Ok(Condition::ZeroSet),
        "notzero" | "nz" | "ne" => Ok(Condition::ZeroClear),
        "carry" | "c" | "cs" => Ok(Condition::CarrySet),
        "notcarry" | "nc" | "cc" => Ok(Condition::CarryClear),
        _ => Err(AssemblerError::SyntaxError {
            line: line_num,
            message: format!("unknown branch condition {:?}", operand),
        }),
    }
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("undefined label on line {line}: {label}")]
    UndefinedLabel { line: usize, label: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::decode;

    #[test]
    fn assemble_simple_program() {
        let source = r#"
            ; add two constants
            LDI r1, 5
            LDI r2, 3
            ADD r1, r2, r3
            HLT
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0], 0x8105);
        assert_eq!(words[1], 0x8203);
        assert_eq!(words[2], 0x2123);
        assert_eq!(words[3], 0x1000);
    }

    #[test]
    fn assemble_with_forward_label() {
        let source = r#"
        START:
            LDI r1, 1
            JMP END
            NOP
        END:
            HLT
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words.len(), 4);
        let jmp = decode(words[1]);
        assert_eq!(jmp.imm(), 3);
    }

    #[test]
    fn assemble_branch_with_label_and_condition() {
        let source = r#"
        LOOP:
            ADI r1, 1
            BRH nz, LOOP
            HLT
        "#;

        let words = assemble(source).unwrap();
        let brh = decode(words[1]);
        assert_eq!(brh.cond(), Condition::ZeroClear);
        assert_eq!(brh.address(), 0);
    }

    #[test]
    fn assemble_data_words() {
        let source = r#"
            DAT 42
            DAT 0xFFFF
            DAT 0b101
        "#;

        let words = assemble(source).unwrap();
        assert_eq!(words, vec![42, 0xFFFF, 5]);
    }

    #[test]
    fn rsh_takes_source_and_destination() {
        let words = assemble("RSH r4, r5").unwrap();
        let instr = decode(words[0]);
        assert_eq!(instr.opcode(), Some(crate::cpu::decode::Opcode::Rsh));
        assert_eq!(instr.reg_a(), 4);
        assert_eq!(instr.reg_c(), 5);
    }

    #[test]
    fn commas_are_optional() {
        assert_eq!(
            assemble("ADD r1 r2 r3").unwrap(),
            assemble("ADD r1, r2, r3").unwrap()
        );
    }

    #[test]
    fn immediate_out_of_range_is_rejected() {
        assert!(matches!(
            assemble("LDI r1, 300"),
            Err(AssemblerError::ValueOutOfRange { value: 300, .. })
        ));
    }

    #[test]
    fn jump_target_must_fit_eight_bits() {
        assert!(assemble("JMP 255").is_ok());
        assert!(matches!(
            assemble("JMP 256"),
            Err(AssemblerError::ValueOutOfRange { .. })
        ));
        // BRH reaches the full 10-bit range.
        assert!(assemble("BRH z, 1023").is_ok());
        assert!(assemble("BRH z, 1024").is_err());
    }

    #[test]
    fn unknown_mnemonic_is_reported() {
        assert!(matches!(
            assemble("FOO r1"),
            Err(AssemblerError::UnknownMnemonic { .. })
        ));
    }

    #[test]
    fn undefined_label_is_reported() {
        assert!(matches!(
            assemble("JMP NOWHERE"),
            Err(AssemblerError::UndefinedLabel { .. })
        ));
    }

    #[test]
    fn bad_register_is_reported() {
        assert!(matches!(
            assemble("ADD r1, r2, r16"),
            Err(AssemblerError::SyntaxError { .. })
        ));
    }
}
