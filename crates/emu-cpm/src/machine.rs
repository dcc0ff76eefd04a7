//! The machine: dispatch loop, PC traps, and boot seeding.
//!
//! One instruction is the unit of progress. Before stepping the CPU the
//! loop inspects the program counter: `0x0000` ends the run, the BDOS
//! entries divert into [`Bdos`], a PC inside the BIOS jump table diverts
//! into [`Bios`]. Trap handlers return to the guest by popping the return
//! address the guest's `CALL` pushed.

use std::fs;
use std::path::Path;

use cpu_z80::Z80;

use crate::bdos::{Bdos, BdosOutcome};
use crate::bios::Bios;
use crate::config::MachineConfig;
use crate::console::Console;
use crate::disasm;
use crate::error::MachineError;
use crate::log::Log;
use crate::memory::Memory;

/// Offset of the BDOS entry point above the BIOS base, clear of the
/// 51-byte jump table. The word at 0x0006 points here, so guests reading
/// it to size the TPA get a sane ceiling.
const BDOS_ENTRY_OFFSET: u16 = 0x40;

/// A complete CP/M machine.
pub struct Machine {
    cpu: Z80,
    mem: Memory,
    bdos: Bdos,
    bios: Bios,
    console: Console,
    log: Log,
    trace: bool,
    bdos_entry: u16,
    instructions: u64,
    cycles: u64,
}

impl Machine {
    /// Machine wired to the host console, logging per the build-time
    /// `logfile` switch.
    #[must_use]
    pub fn new(config: &MachineConfig) -> Self {
        Self::with_console(config, Console::host(), Log::for_host())
    }

    /// Machine with an explicit console and log sink. Tests use this with
    /// [`Console::scripted`].
    #[must_use]
    pub fn with_console(config: &MachineConfig, console: Console, log: Log) -> Self {
        let mut machine = Self {
            cpu: Z80::new(),
            mem: Memory::new(),
            bdos: Bdos::new(&config.disk_root),
            bios: Bios::new(config.bios_base),
            console,
            log,
            trace: config.trace,
            bdos_entry: config.bios_base.wrapping_add(BDOS_ENTRY_OFFSET),
            instructions: 0,
            cycles: 0,
        };
        machine.seed();
        machine
    }

    /// Boot-time memory seeding: page-zero vectors, the BIOS jump table,
    /// and the initial stack.
    fn seed(&mut self) {
        // JP to the warm-boot entry.
        self.mem.write8(0x0000, 0xC3);
        self.mem.write16(0x0001, 0x0003);
        // Default drive and IOBYTE.
        self.mem.write8(0x0003, 0x00);
        self.mem.write8(0x0004, 0x00);
        // JP to the BDOS entry; the word at 0x0006 doubles as the TPA
        // ceiling guests read with LHLD.
        self.mem.write8(0x0005, 0xC3);
        self.mem.write16(0x0006, self.bdos_entry);

        self.bios.install(&mut self.mem);

        self.cpu.regs.sp = 0x0100;
        self.cpu.regs.c = 0x00;
    }

    /// Read a host file into guest memory at `addr`. Returns the number of
    /// bytes loaded.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read.
    pub fn load_image(&mut self, path: &Path, addr: u16) -> Result<usize, MachineError> {
        let data = fs::read(path).map_err(|source| MachineError::Load {
            path: path.to_path_buf(),
            source,
        })?;
        self.mem.load(addr, &data);
        self.log
            .line(&format!("loaded {} ({} bytes)", path.display(), data.len()));
        Ok(data.len())
    }

    /// Run from `entry` until the guest exits or a fatal condition stops
    /// the machine.
    ///
    /// # Errors
    ///
    /// See [`MachineError`]; every variant except guest exit is fatal.
    pub fn run(&mut self, entry: u16) -> Result<(), MachineError> {
        self.cpu.regs.pc = entry;

        loop {
            let pc = self.cpu.regs.pc;

            // Jump to the reset vector is a clean exit.
            if pc == 0x0000 {
                self.log.line(&format!(
                    "guest exited: {} instructions, {} cycles",
                    self.instructions, self.cycles
                ));
                return Ok(());
            }

            if pc == 0x0005 || pc == self.bdos_entry {
                let outcome = self.bdos.call(
                    &mut self.cpu,
                    &mut self.mem,
                    &mut self.console,
                    &mut self.log,
                    self.trace,
                )?;
                if outcome == BdosOutcome::Terminate {
                    return Ok(());
                }
                self.force_ret();
                continue;
            }

            if let Some(vector) = self.bios.vector_for(pc) {
                if self.trace {
                    self.log.line(&format!("bios vector {vector}"));
                }
                self.bios
                    .call(vector, &mut self.cpu, &mut self.console, pc)?;
                self.force_ret();
                continue;
            }

            if self.trace {
                let (text, len) = disasm::disassemble(&self.mem, pc);
                let bytes: Vec<String> = (0..len)
                    .map(|i| format!("{:02X}", self.mem.read8(pc.wrapping_add(i as u16))))
                    .collect();
                self.log
                    .line(&format!("{pc:04X}  {:<11}  {text}", bytes.join(" ")));
            }

            let cycles = self.cpu.step(&mut self.mem)?;
            self.instructions += 1;
            self.cycles += u64::from(cycles);

            // No interrupt source exists, so a halted guest can never
            // resume; surface it instead of spinning.
            if self.cpu.regs.halted {
                return Err(MachineError::Halted { pc });
            }
        }
    }

    /// Return from a trapped CALL: pop the return address into PC, low
    /// byte first.
    fn force_ret(&mut self) {
        let sp = self.cpu.regs.sp;
        self.cpu.regs.pc = self.mem.read16(sp);
        self.cpu.regs.sp = sp.wrapping_add(2);
    }

    /// Address the `0x0005` vector targets.
    #[must_use]
    pub fn bdos_entry(&self) -> u16 {
        self.bdos_entry
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.mem
    }

    #[must_use]
    pub fn cpu(&self) -> &Z80 {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Z80 {
        &mut self.cpu
    }

    /// Output captured by a scripted console.
    #[must_use]
    pub fn console_output(&self) -> &[u8] {
        self.console.captured()
    }

    /// Instructions retired so far.
    #[must_use]
    pub fn instructions(&self) -> u64 {
        self.instructions
    }
}
