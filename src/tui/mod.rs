//! TUI debugger for the Ocho emulator.
//!
//! Provides an interactive terminal-based debugger with:
//! - Real-time register, flag, and call-stack visualization
//! - Memory view with binary word rendering
//! - Step/run/breakpoint controls
//! - Disassembly view

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
