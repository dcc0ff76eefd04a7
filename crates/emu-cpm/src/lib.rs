//! CP/M 2.2 emulator.
//!
//! Loads unmodified 8-bit CP/M `.COM` executables into a virtual 64 KiB
//! address space, interprets the Z80 instruction stream, and traps the BDOS
//! and BIOS entry points, servicing them against the host filesystem and
//! console. CP/M drives map to single-letter host directories (`A`-`P`).

mod bdos;
mod bios;
mod config;
mod console;
mod disasm;
mod error;
mod fcb;
mod log;
mod machine;
mod memory;

pub use bdos::{Bdos, BdosOutcome};
pub use bios::Bios;
pub use config::MachineConfig;
pub use console::Console;
pub use disasm::disassemble;
pub use error::MachineError;
pub use fcb::Fcb;
pub use log::Log;
pub use machine::Machine;
pub use memory::Memory;
