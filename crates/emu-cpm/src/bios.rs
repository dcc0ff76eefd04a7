//! BIOS jump-vector table.
//!
//! Seventeen three-byte `JP` slots starting at the configured base. Each
//! slot targets its own address, so a guest jumping through the table lands
//! on it and the dispatch loop traps the PC instead of executing the jump.
//! Only the console entries have host implementations.

use cpu_z80::Z80;

use crate::console::Console;
use crate::error::MachineError;
use crate::memory::Memory;

/// Number of jump slots in the table.
pub const SLOT_COUNT: u16 = 17;

/// Vector indices with host implementations.
const CONST: u8 = 2;
const CONIN: u8 = 3;
const CONOUT: u8 = 4;
const LIST: u8 = 5;

/// The BIOS jump table and its console vectors.
pub struct Bios {
    base: u16,
}

impl Bios {
    #[must_use]
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    #[must_use]
    pub fn base(&self) -> u16 {
        self.base
    }

    /// Write the jump table: `C3 lo hi` per slot, each pointing at itself.
    pub fn install(&self, mem: &mut Memory) {
        for slot in 0..SLOT_COUNT {
            let addr = self.base.wrapping_add(slot * 3);
            mem.write8(addr, 0xC3);
            mem.write16(addr.wrapping_add(1), addr);
        }
    }

    /// The vector index for a PC inside the jump table, if any.
    #[must_use]
    pub fn vector_for(&self, pc: u16) -> Option<u8> {
        let offset = pc.wrapping_sub(self.base);
        if offset < SLOT_COUNT * 3 {
            Some((offset / 3) as u8)
        } else {
            None
        }
    }

    /// Service a trapped vector.
    ///
    /// # Errors
    ///
    /// Vectors without a host implementation are fatal, as is console I/O
    /// failure.
    pub fn call(
        &self,
        vector: u8,
        cpu: &mut Z80,
        console: &mut Console,
        pc: u16,
    ) -> Result<(), MachineError> {
        match vector {
            CONST => {
                cpu.regs.a = if console.status() { 0xFF } else { 0x00 };
            }
            CONIN => {
                cpu.regs.a = console.read_byte().map_err(MachineError::Console)?;
            }
            CONOUT | LIST => {
                console
                    .write_byte(cpu.regs.c)
                    .map_err(MachineError::Console)?;
            }
            other => {
                return Err(MachineError::UnsupportedBiosCall { vector: other, pc })
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_writes_self_pointing_jumps() {
        let bios = Bios::new(0xFC00);
        let mut mem = Memory::new();
        bios.install(&mut mem);

        for slot in 0..SLOT_COUNT {
            let addr = 0xFC00 + slot * 3;
            assert_eq!(mem.read8(addr), 0xC3);
            assert_eq!(mem.read16(addr + 1), addr);
        }
    }

    #[test]
    fn vector_lookup_covers_the_table_only() {
        let bios = Bios::new(0xFC00);
        assert_eq!(bios.vector_for(0xFC00), Some(0));
        assert_eq!(bios.vector_for(0xFC06), Some(2));
        assert_eq!(bios.vector_for(0xFC07), Some(2), "mid-slot PC maps to its slot");
        assert_eq!(bios.vector_for(0xFC30), Some(16));
        assert_eq!(bios.vector_for(0xFC33), None);
        assert_eq!(bios.vector_for(0xFBFF), None);
        assert_eq!(bios.vector_for(0x0100), None);
    }

    #[test]
    fn const_reports_input_state() {
        let bios = Bios::new(0xFC00);
        let mut cpu = Z80::new();

        let mut console = Console::scripted(b"x");
        bios.call(CONST, &mut cpu, &mut console, 0xFC06).unwrap();
        assert_eq!(cpu.regs.a, 0xFF);

        let mut console = Console::scripted(b"");
        bios.call(CONST, &mut cpu, &mut console, 0xFC06).unwrap();
        assert_eq!(cpu.regs.a, 0x00);
    }

    #[test]
    fn conin_conout_roundtrip() {
        let bios = Bios::new(0xFC00);
        let mut cpu = Z80::new();
        let mut console = Console::scripted(b"Q");

        bios.call(CONIN, &mut cpu, &mut console, 0xFC09).unwrap();
        assert_eq!(cpu.regs.a, b'Q');

        cpu.regs.c = b'R';
        bios.call(CONOUT, &mut cpu, &mut console, 0xFC0C).unwrap();
        assert_eq!(console.captured(), b"R");
    }

    #[test]
    fn unimplemented_vector_is_fatal() {
        let bios = Bios::new(0xFC00);
        let mut cpu = Z80::new();
        let mut console = Console::scripted(b"");
        let err = bios.call(9, &mut cpu, &mut console, 0xFC1B).unwrap_err();
        assert!(err.to_string().contains("BIOS function 9"));
    }
}
