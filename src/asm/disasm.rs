//! Disassembler for Ocho programs.
//!
//! Converts binary instruction words back to readable assembly.

use crate::cpu::decode::{decode, Instruction, Opcode};

/// Disassemble a single instruction word to text.
pub fn disassemble_instruction(word: u16) -> String {
    format_instruction(decode(word))
}

/// Disassemble a slice of instruction words.
pub fn disassemble(words: &[u16]) -> String {
    let mut output = String::new();
    output.push_str("; Ocho Disassembly\n");
    output.push_str("; ----------------\n\n");

    for (addr, word) in words.iter().enumerate() {
        let line = disassemble_instruction(*word);
        output.push_str(&format!("{:04}: {}  ; {:016b}\n", addr, line, word));
    }

    output
}

/// Format a decoded instruction as assembly text.
fn format_instruction(instr: Instruction) -> String {
    let Some(opcode) = instr.opcode() else {
        // Reserved opcode slot.
        return format!("??? ; {:#06x}", instr.word());
    };

    match opcode {
        Opcode::Nop | Opcode::Hlt | Opcode::Ret => opcode.mnemonic().to_string(),

        Opcode::Add | Opcode::Sub | Opcode::Nor | Opcode::And | Opcode::Xor => {
            format!(
                "{} r{}, r{}, r{}",
                opcode.mnemonic(),
                instr.reg_a(),
                instr.reg_b(),
                instr.reg_c()
            )
        }

        Opcode::Rsh => format!("RSH r{}, r{}", instr.reg_a(), instr.reg_c()),

        Opcode::Ldi | Opcode::Adi => {
            format!("{} r{}, {}", opcode.mnemonic(), instr.reg_a(), instr.imm())
        }

        Opcode::Jmp | Opcode::Cal => {
            format!("{} {}", opcode.mnemonic(), instr.imm())
        }

        Opcode::Brh => {
            format!("BRH {}, {}", instr.cond().mnemonic(), instr.address())
        }
    }
}
