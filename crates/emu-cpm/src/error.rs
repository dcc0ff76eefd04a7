//! Machine-level fatal errors.
//!
//! Guest-visible failures (open errors, EOF, exhausted searches) never reach
//! this type; they go back to the guest in `A` per the BDOS return contract.

use std::error::Error;
use std::fmt;
use std::io;
use std::path::PathBuf;

use cpu_z80::Trap;

/// Conditions that terminate the machine.
#[derive(Debug)]
pub enum MachineError {
    /// The decoder found no entry for the bytes at `pc`.
    IllegalOpcode { pc: u16, bytes: [u8; 4] },
    /// A guest invoked a BDOS function outside the emulated set.
    UnsupportedBdosCall { function: u8, pc: u16 },
    /// A guest jumped into a BIOS slot with no host implementation.
    UnsupportedBiosCall { vector: u8, pc: u16 },
    /// The guest halted and no interrupt source exists to resume it.
    Halted { pc: u16 },
    /// A 128-byte record transfer would run past the top of memory.
    DmaOverrun { dma: u16 },
    /// A boot image or program file could not be read.
    Load { path: PathBuf, source: io::Error },
    /// Host console I/O failed.
    Console(io::Error),
}

impl fmt::Display for MachineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalOpcode { pc, bytes } => write!(
                f,
                "illegal opcode: PC={pc:04X} bytes={:02X} {:02X} {:02X} {:02X}",
                bytes[0], bytes[1], bytes[2], bytes[3]
            ),
            Self::UnsupportedBdosCall { function, pc } => write!(
                f,
                "un-emulated BDOS function {function:02X}h (called from PC={pc:04X})"
            ),
            Self::UnsupportedBiosCall { vector, pc } => write!(
                f,
                "un-emulated BIOS function {vector} (PC={pc:04X})"
            ),
            Self::Halted { pc } => write!(
                f,
                "halt: guest halted at PC={pc:04X} with no interrupt source"
            ),
            Self::DmaOverrun { dma } => write!(
                f,
                "dma overrun: record transfer at {dma:04X} crosses the top of memory"
            ),
            Self::Load { path, source } => {
                write!(f, "cannot load {}: {source}", path.display())
            }
            Self::Console(err) => write!(f, "console I/O failed: {err}"),
        }
    }
}

impl Error for MachineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Load { source, .. } => Some(source),
            Self::Console(err) => Some(err),
            _ => None,
        }
    }
}

impl From<Trap> for MachineError {
    fn from(trap: Trap) -> Self {
        match trap {
            Trap::IllegalOpcode { pc, bytes } => Self::IllegalOpcode { pc, bytes },
        }
    }
}

impl From<io::Error> for MachineError {
    fn from(err: io::Error) -> Self {
        Self::Console(err)
    }
}
