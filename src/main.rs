//! Ocho Emulator - CLI Entry Point
//!
//! Commands:
//! - `ocho-emu run <program>` - Run an image or ASM file
//! - `ocho-emu debug <program>` - Interactive debugger
//! - `ocho-emu asm <source>` - Assemble to a program image
//! - `ocho-emu disasm <image>` - Disassemble a program image
//! - `ocho-emu test` - Run the built-in self-test

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "ocho-emu")]
#[command(version = "0.1.0")]
#[command(about = "An emulator of the Ocho, an 8-bit teaching CPU")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the image or ASM file to execute
        program: String,
        /// Maximum number of cycles to run (default: 10000)
        #[arg(short, long, default_value = "10000")]
        max_cycles: u64,
        /// Show trace output
        #[arg(short, long)]
        trace: bool,
        /// Print the final machine state as JSON
        #[arg(short, long)]
        json: bool,
    },
    /// Interactive debugger
    Debug {
        /// Path to the program to debug
        program: String,
    },
    /// Assemble source to a program image
    Asm {
        /// Path to the source file
        source: String,
        /// Output image file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble a program image to readable text
    Disasm {
        /// Path to the image file
        image: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_cycles, trace, json }) => {
            run_program(&program, max_cycles, trace, json);
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { image }) => {
            disassemble_file(&image);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("Ocho Emulator v0.1.0");
            println!("An 8-bit teaching CPU emulator");
            println!();
            println!("Use --help for available commands");
            println!();
            demo_machine();
        }
    }
}

/// Load a program from either an assembly source or a binary image.
fn load_program_file(path: &str) -> Vec<u16> {
    use ocho::{assemble, load_image};

    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(words) => {
                println!("📝 Assembled {} instructions", words.len());
                words
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_image(path) {
            Ok(image) => {
                println!("📂 Loaded {} words", image.len());
                image.words
            }
            Err(e) => {
                eprintln!("❌ Failed to load image: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn run_program(path: &str, max_cycles: u64, trace: bool, json: bool) {
    use ocho::Cpu;
    use ocho::asm::disasm::disassemble_instruction;

    println!("🔧 Running: {}", path);

    let words = load_program_file(path);
    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    // Create CPU and load program
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&words);

    println!();
    println!("━━━ Execution ━━━");

    // Run with optional trace
    let mut cycles = 0u64;
    while cpu.is_running() && cycles < max_cycles {
        let pc = cpu.regs.pc;

        match cpu.step() {
            Ok(instr) => {
                if trace {
                    println!("{:04}: {}  zero={} carry={}",
                        pc,
                        disassemble_instruction(instr.word()),
                        cpu.regs.flags.zero as u8,
                        cpu.regs.flags.carry as u8);
                }
                cycles += 1;
            }
            Err(e) => {
                eprintln!("❌ CPU error at PC={}: {}", pc, e);
                std::process::exit(1);
            }
        }
    }

    println!();
    println!("━━━ Result ━━━");

    if json {
        let snapshot = serde_json::json!({
            "registers": cpu.regs.gpr(),
            "pc": cpu.regs.pc,
            "flags": { "zero": cpu.regs.flags.zero, "carry": cpu.regs.flags.carry },
            "stack_depth": cpu.stack.depth(),
            "cycles": cpu.cycles,
            "state": format!("{:?}", cpu.state),
        });
        println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default());
    } else {
        println!("Cycles: {}", cycles);
        println!("State: {:?}", cpu.state);
        println!("PC: {}", cpu.regs.pc);
        println!("Flags: zero={} carry={}", cpu.regs.flags.zero, cpu.regs.flags.carry);
        for (i, value) in cpu.regs.gpr().iter().enumerate() {
            println!("r{:<2}: {:3} ({:#04x})", i, value, value);
        }
    }

    if cycles >= max_cycles {
        println!();
        println!("⚠️  Reached max cycles limit ({}). Use --max-cycles to increase.", max_cycles);
    }
}

fn debug_program(path: &str) {
    println!("🔍 Loading: {}", path);

    let words = load_program_file(path);
    if words.is_empty() {
        eprintln!("❌ No instructions to execute");
        std::process::exit(1);
    }

    println!("🚀 Launching debugger...");
    println!();

    #[cfg(feature = "tui")]
    if let Err(e) = ocho::run_debugger(words) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }

    #[cfg(not(feature = "tui"))]
    {
        let _ = words;
        eprintln!("❌ Debugger not available: rebuild with the 'tui' feature");
        std::process::exit(1);
    }
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use ocho::{assemble, save_image, ImageFile};

    let out_path = output.unwrap_or_else(|| {
        source_path.replace(".asm", ".img")
    });

    println!("📝 Assembling: {} → {}", source_path, out_path);

    // Read source
    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    // Assemble
    let words = match assemble(&source) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} instructions", words.len());

    // Save image
    let image = ImageFile {
        words: words.clone(),
        source_lines: words.iter().map(|w| format!("{:016b}", w)).collect(),
    };

    if let Err(e) = save_image(&out_path, &image) {
        eprintln!("❌ Failed to save image: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(image_path: &str) {
    use ocho::load_image;
    use ocho::asm::disasm::disassemble;

    println!("📖 Disassembling: {}", image_path);
    println!();

    let image = match load_image(image_path) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("❌ Failed to load image: {}", e);
            std::process::exit(1);
        }
    };

    let output = disassemble(&image.words);
    println!("{}", output);
}

fn demo_machine() {
    use ocho::{Cpu, Instruction, Opcode};
    use ocho::asm::disasm::disassemble_instruction;

    println!("━━━ Ocho Demo ━━━");
    println!();

    let program = [
        Instruction::immediate(Opcode::Ldi, 1, 5),
        Instruction::immediate(Opcode::Ldi, 2, 3),
        Instruction::three_reg(Opcode::Add, 1, 2, 3),
        Instruction::plain(Opcode::Hlt),
    ];

    println!("Program:");
    for (addr, instr) in program.iter().enumerate() {
        println!("  {:04}: {:016b}  {}", addr, instr.word(), disassemble_instruction(instr.word()));
    }
    println!();

    let words: Vec<u16> = program.iter().map(|i| i.word()).collect();
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&words);

    match cpu.run() {
        Ok(executed) => {
            println!("Executed {} instructions", executed);
            println!("r3 = {} (5 + 3)", cpu.regs.read(3));
            println!("flags: zero={} carry={}", cpu.regs.flags.zero, cpu.regs.flags.carry);
            println!();
            println!("✓ Core machine working!");
        }
        Err(e) => println!("✗ Demo failed: {}", e),
    }
}

fn run_self_test() {
    use ocho::{Cpu, Instruction, Opcode, Condition};

    println!("━━━ Ocho Emulator Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    let mut check = |name: &str, ok: bool| {
        if ok {
            println!("{}... ✓", name);
            passed += 1;
        } else {
            println!("{}... ✗", name);
            failed += 1;
        }
    };

    // Test 1: Decode field extraction
    let instr = ocho::cpu::decode(0x2123);
    check(
        "Decode field extraction",
        instr.opcode() == Some(Opcode::Add)
            && instr.reg_a() == 1
            && instr.reg_b() == 2
            && instr.reg_c() == 3,
    );

    // Test 2: Halt
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&[Instruction::plain(Opcode::Hlt).word()]);
    check("CPU halt instruction", cpu.run().is_ok() && cpu.is_halted());

    // Test 3: Addition with flags
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&[
        Instruction::immediate(Opcode::Ldi, 1, 255).word(),
        Instruction::immediate(Opcode::Ldi, 2, 1).word(),
        Instruction::three_reg(Opcode::Add, 1, 2, 3).word(),
        Instruction::plain(Opcode::Hlt).word(),
    ]);
    let _ = cpu.run();
    check(
        "Addition overflow flags",
        cpu.regs.read(3) == 0 && cpu.regs.flags.zero && cpu.regs.flags.carry,
    );

    // Test 4: Register 0 hardwired
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&[
        Instruction::immediate(Opcode::Ldi, 0, 99).word(),
        Instruction::plain(Opcode::Hlt).word(),
    ]);
    let _ = cpu.run();
    check("Register 0 hardwired to zero", cpu.regs.read(0) == 0);

    // Test 5: Call/return linkage
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&[
        Instruction::jump(Opcode::Cal, 3).word(),
        Instruction::immediate(Opcode::Ldi, 1, 1).word(),
        Instruction::plain(Opcode::Hlt).word(),
        Instruction::plain(Opcode::Ret).word(),
    ]);
    let _ = cpu.run();
    check("CAL/RET linkage", cpu.regs.read(1) == 1 && cpu.is_halted());

    // Test 6: Conditional branch
    let mut cpu = Cpu::new();
    let _ = cpu.load_program(&[
        Instruction::three_reg(Opcode::And, 0, 0, 1).word(),
        Instruction::branch(Condition::ZeroSet, 3).word(),
        Instruction::plain(Opcode::Hlt).word(),
        Instruction::immediate(Opcode::Ldi, 2, 7).word(),
        Instruction::plain(Opcode::Hlt).word(),
    ]);
    let _ = cpu.run();
    check("Conditional branch on zero", cpu.regs.read(2) == 7);

    // Test 7: Assembler roundtrip
    let words = ocho::assemble("LDI r1, 5\nHLT");
    check(
        "Assembler",
        matches!(words, Ok(ref w) if w == &[0x8105, 0x1000]),
    );

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
