//! Instruction-stepped Zilog Z80 CPU core.
//!
//! Each call to [`Z80::step`] fetches, decodes and executes exactly one
//! instruction against a [`Bus`] and returns the number of T-states it
//! consumed. Undecodable opcode combinations surface as a [`Trap`] instead
//! of silently degrading to a NOP.

mod alu;
mod bus;
mod cpu;
mod flags;
mod registers;

pub use bus::{Bus, SimpleBus};
pub use cpu::{Trap, Z80};
pub use flags::{CF, HF, NF, PF, SF, XF, YF, ZF};
pub use registers::Registers;
