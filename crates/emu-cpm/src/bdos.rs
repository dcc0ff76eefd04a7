//! BDOS function dispatch.
//!
//! A guest enters the BDOS with `CALL 0x0005`, the function number in `C`
//! and the argument in `E`, `DE`, or an FCB pointed to by `DE`. Results go
//! back through `A` (mirrored in `L`) with `B` mirroring `H`.
//!
//! Drives are host directories named `A`-`P` under the configured disk
//! root; files inside them are host files named per the 8.3 translation in
//! [`crate::fcb`].

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use cpu_z80::Z80;

use crate::console::Console;
use crate::error::MachineError;
use crate::fcb::{self, Fcb, RECORD_SIZE};
use crate::log::Log;
use crate::memory::Memory;

/// What the dispatch loop should do after a BDOS call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BdosOutcome {
    /// Pop the return address and keep running.
    Continue,
    /// The guest asked to terminate (P_TERMCPM).
    Terminate,
}

/// Success / failure bytes of the BDOS return contract.
const OK: u16 = 0x00;
const ERR: u16 = 0xFF;
/// End-of-file from F_READ.
const EOF: u16 = 0x01;

/// Open host files addressed by the slot number stored in an FCB.
struct HandlePool {
    slots: [Option<File>; 16],
}

impl HandlePool {
    fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Store a file, returning its guest-visible handle (slot + 1).
    fn insert(&mut self, file: File) -> Option<u16> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(file);
        Some(slot as u16 + 1)
    }

    fn get(&mut self, handle: u16) -> Option<&mut File> {
        match handle {
            0 => None,
            h => self.slots.get_mut(h as usize - 1)?.as_mut(),
        }
    }

    fn close(&mut self, handle: u16) -> bool {
        match handle {
            0 => false,
            h => self
                .slots
                .get_mut(h as usize - 1)
                .map(Option::take)
                .is_some_and(|file| file.is_some()),
        }
    }
}

/// An in-progress F_SFIRST/F_SNEXT iteration.
struct Search {
    dir: fs::ReadDir,
    pattern: [u8; 11],
    /// Drive byte echoed into byte 0 of the directory-entry image.
    drive_byte: u8,
}

/// BDOS ambient state and function handlers.
pub struct Bdos {
    /// Current drive, 0-15.
    drive: u8,
    /// Current user, 0-15.
    user: u8,
    /// Record-transfer address.
    dma: u16,
    search: Option<Search>,
    files: HandlePool,
    disk_root: PathBuf,
}

impl Bdos {
    #[must_use]
    pub fn new(disk_root: &Path) -> Self {
        Self {
            drive: 0,
            user: 0,
            dma: 0x0080,
            search: None,
            files: HandlePool::new(),
            disk_root: disk_root.to_path_buf(),
        }
    }

    /// Current drive, for tests and the trace log.
    #[must_use]
    pub fn current_drive(&self) -> u8 {
        self.drive
    }

    /// Service the function selected by `C`.
    ///
    /// # Errors
    ///
    /// Only host-fatal conditions (unsupported function, DMA overrun,
    /// console failure) become errors; file problems return to the guest
    /// through `A`.
    pub fn call(
        &mut self,
        cpu: &mut Z80,
        mem: &mut Memory,
        console: &mut Console,
        log: &mut Log,
        trace: bool,
    ) -> Result<BdosOutcome, MachineError> {
        let function = cpu.regs.c;
        if trace {
            log.line(&format!(
                "bdos {:02X}h {} DE={:04X}",
                function,
                function_name(function),
                cpu.regs.de()
            ));
        }

        // Anything but search-next tears down a live search iteration.
        if function != 0x12 {
            self.search = None;
        }

        match function {
            // P_TERMCPM: warm boot, i.e. guest exit.
            0x00 => return Ok(BdosOutcome::Terminate),

            // C_READ: blocking console input with echo.
            0x01 => {
                let byte = console.read_byte().map_err(MachineError::Console)?;
                console.write_byte(byte).map_err(MachineError::Console)?;
                ret(cpu, u16::from(byte));
            }

            // C_WRITE
            0x02 => {
                console
                    .write_byte(cpu.regs.e)
                    .map_err(MachineError::Console)?;
                ret(cpu, OK);
            }

            // C_WRITESTR: bytes at DE until '$'.
            0x09 => {
                let mut addr = cpu.regs.de();
                loop {
                    let byte = mem.read8(addr);
                    if byte == b'$' {
                        break;
                    }
                    console.write_byte(byte).map_err(MachineError::Console)?;
                    addr = addr.wrapping_add(1);
                }
                ret(cpu, OK);
            }

            // C_READSTR: buffered line input. mem[DE] is the capacity,
            // mem[DE+1] receives the length, bytes follow.
            0x0A => {
                let buffer = cpu.regs.de();
                let max = mem.read8(buffer) as usize;
                let line = console.read_line(max).map_err(MachineError::Console)?;
                mem.write8(buffer.wrapping_add(1), line.len() as u8);
                for (i, &byte) in line.iter().enumerate() {
                    mem.write8(buffer.wrapping_add(2 + i as u16), byte);
                }
                ret(cpu, OK);
            }

            // C_STAT
            0x0B => {
                let ready = console.status();
                ret(cpu, if ready { ERR } else { OK });
            }

            // S_BDOSVER: CP/M 2.2.
            0x0C => ret(cpu, 0x0022),

            // DRV_ALLRESET
            0x0D => {
                self.drive = 0;
                self.dma = 0x0080;
                ret(cpu, OK);
            }

            // DRV_SET: only drives whose host directory exists.
            0x0E => {
                let e = cpu.regs.e;
                let exists = e <= 15
                    && self
                        .drive_dir(e + 1)
                        .is_some_and(|dir| dir.is_dir());
                if exists {
                    self.drive = e;
                    ret(cpu, OK);
                } else {
                    ret(cpu, ERR);
                }
            }

            // F_OPEN
            0x0F => {
                let fcb = Fcb(cpu.regs.de());
                let code = self.open_file(fcb, mem, false);
                ret(cpu, code);
            }

            // F_CLOSE
            0x10 => {
                let fcb = Fcb(cpu.regs.de());
                let handle = fcb.handle(mem);
                if self.files.close(handle) {
                    fcb.set_handle(mem, 0);
                    ret(cpu, OK);
                } else {
                    ret(cpu, ERR);
                }
            }

            // F_SFIRST
            0x11 => {
                let fcb = Fcb(cpu.regs.de());
                let pattern = fcb.name_bytes(mem);
                let drive_byte = fcb.drive(mem);
                let entries = self
                    .drive_dir(drive_byte)
                    .and_then(|dir| fs::read_dir(dir).ok());
                match entries {
                    Some(entries) => {
                        self.search = Some(Search {
                            dir: entries,
                            pattern,
                            drive_byte,
                        });
                        let code = self.search_advance(mem)?;
                        ret(cpu, code);
                    }
                    None => ret(cpu, ERR),
                }
            }

            // F_SNEXT
            0x12 => {
                let code = self.search_advance(mem)?;
                ret(cpu, code);
            }

            // F_DELETE: remove every match of the FCB wildcard.
            0x13 => {
                let fcb = Fcb(cpu.regs.de());
                let code = self.delete_matches(fcb, mem);
                ret(cpu, code);
            }

            // F_READ: next 128-byte record into the DMA buffer.
            0x14 => {
                let fcb = Fcb(cpu.regs.de());
                let code = self.read_record(fcb, mem, None)?;
                ret(cpu, code);
            }

            // F_WRITE
            0x15 => {
                let fcb = Fcb(cpu.regs.de());
                let code = self.write_record(fcb, mem, None)?;
                ret(cpu, code);
            }

            // F_MAKE: create; existing files are an error.
            0x16 => {
                let fcb = Fcb(cpu.regs.de());
                let code = self.open_file(fcb, mem, true);
                ret(cpu, code);
            }

            // DRV_GET
            0x19 => ret(cpu, u16::from(self.drive)),

            // F_DMAOFF
            0x1A => {
                self.dma = cpu.regs.de();
                ret(cpu, OK);
            }

            // F_USERNUM: E=0xFF reads, otherwise sets.
            0x20 => {
                if cpu.regs.e == 0xFF {
                    ret(cpu, u16::from(self.user));
                } else {
                    self.user = cpu.regs.e & 0x1F;
                    ret(cpu, OK);
                }
            }

            // F_READRAND / F_WRITERAND: record number from R0..R2.
            0x21 => {
                let fcb = Fcb(cpu.regs.de());
                let record = fcb.random_record(mem);
                let code = self.read_record(fcb, mem, Some(record))?;
                ret(cpu, code);
            }
            0x22 => {
                let fcb = Fcb(cpu.regs.de());
                let record = fcb.random_record(mem);
                let code = self.write_record(fcb, mem, Some(record))?;
                ret(cpu, code);
            }

            other => {
                return Err(MachineError::UnsupportedBdosCall {
                    function: other,
                    pc: 0x0005,
                })
            }
        }

        Ok(BdosOutcome::Continue)
    }

    /// Host directory for a drive byte (0 = current drive, 1-16 = A-P);
    /// `None` for bytes outside that range.
    fn drive_dir(&self, drive_byte: u8) -> Option<PathBuf> {
        let letter = match drive_byte {
            0 => b'A' + self.drive,
            1..=16 => b'A' + drive_byte - 1,
            _ => return None,
        };
        Some(self.disk_root.join((letter as char).to_string()))
    }

    /// Resolve an FCB to a host path; `None` when the drive or name is not
    /// valid.
    fn resolve(&self, fcb: Fcb, mem: &Memory) -> Option<PathBuf> {
        let name = fcb::host_name(&fcb.name_bytes(mem))?;
        Some(self.drive_dir(fcb.drive(mem))?.join(name))
    }

    /// F_OPEN / F_MAKE: open or create, stash the handle in the FCB.
    fn open_file(&mut self, fcb: Fcb, mem: &mut Memory, create: bool) -> u16 {
        let Some(path) = self.resolve(fcb, mem) else {
            return ERR;
        };
        let result = if create {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create_new(true)
                .open(&path)
        } else {
            OpenOptions::new().read(true).write(true).open(&path)
        };
        let Ok(file) = result else { return ERR };

        let records = file
            .metadata()
            .map(|meta| meta.len().div_ceil(RECORD_SIZE as u64))
            .unwrap_or(0);
        let Some(handle) = self.files.insert(file) else {
            return ERR;
        };
        fcb.set_handle(mem, handle);
        fcb.set_record_count(mem, records.min(128) as u8);
        OK
    }

    /// Advance the search iterator and image the next match at the DMA
    /// address as a 32-byte directory entry.
    fn search_advance(&mut self, mem: &mut Memory) -> Result<u16, MachineError> {
        let Some(search) = self.search.as_mut() else {
            return Ok(ERR);
        };

        for entry in search.dir.by_ref() {
            let Ok(entry) = entry else { continue };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(packed) = fcb::cpm_name(name) else {
                continue;
            };
            if !fcb::matches(&search.pattern, &packed) {
                continue;
            }

            let dma = self.dma;
            let Some(image) = mem.block_mut(dma, 32) else {
                return Err(MachineError::DmaOverrun { dma });
            };
            image.fill(0);
            image[0] = search.drive_byte;
            image[1..12].copy_from_slice(&packed);
            return Ok(OK);
        }

        // Exhausted: drop the host directory handle.
        self.search = None;
        Ok(ERR)
    }

    /// F_DELETE across all wildcard matches on the FCB's drive.
    fn delete_matches(&mut self, fcb: Fcb, mem: &Memory) -> u16 {
        let pattern = fcb.name_bytes(mem);
        let Some(dir) = self.drive_dir(fcb.drive(mem)) else {
            return ERR;
        };
        let Ok(entries) = fs::read_dir(&dir) else {
            return ERR;
        };

        let mut removed = 0u32;
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(packed) = fcb::cpm_name(name) else {
                continue;
            };
            if fcb::matches(&pattern, &packed) && fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
        if removed > 0 {
            OK
        } else {
            ERR
        }
    }

    /// One 128-byte record from the file into the DMA buffer. `record`
    /// seeks first (random access); `None` reads at the host cursor.
    fn read_record(
        &mut self,
        fcb: Fcb,
        mem: &mut Memory,
        record: Option<u32>,
    ) -> Result<u16, MachineError> {
        let dma = self.dma;
        let handle = fcb.handle(mem);
        let Some(file) = self.files.get(handle) else {
            return Ok(ERR);
        };

        if let Some(record) = record {
            let offset = u64::from(record) * RECORD_SIZE as u64;
            if file.seek(SeekFrom::Start(offset)).is_err() {
                return Ok(ERR);
            }
        }

        let mut buffer = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match file.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(_) => return Ok(ERR),
            }
        }
        if filled == 0 {
            return Ok(EOF);
        }

        let position = file.stream_position().unwrap_or(0);
        let Some(block) = mem.block_mut(dma, RECORD_SIZE) else {
            return Err(MachineError::DmaOverrun { dma });
        };
        block.copy_from_slice(&buffer);
        fcb.set_position(mem, (position.div_ceil(RECORD_SIZE as u64)) as u32);
        Ok(OK)
    }

    /// One 128-byte record from the DMA buffer into the file.
    fn write_record(
        &mut self,
        fcb: Fcb,
        mem: &mut Memory,
        record: Option<u32>,
    ) -> Result<u16, MachineError> {
        let dma = self.dma;
        let Some(block) = mem.block(dma, RECORD_SIZE) else {
            return Err(MachineError::DmaOverrun { dma });
        };
        let mut buffer = [0u8; RECORD_SIZE];
        buffer.copy_from_slice(block);

        let handle = fcb.handle(mem);
        let Some(file) = self.files.get(handle) else {
            return Ok(ERR);
        };

        if let Some(record) = record {
            let offset = u64::from(record) * RECORD_SIZE as u64;
            if file.seek(SeekFrom::Start(offset)).is_err() {
                return Ok(ERR);
            }
        }

        if file.write_all(&buffer).is_err() {
            return Ok(ERR);
        }
        let position = file.stream_position().unwrap_or(0);
        fcb.set_position(mem, (position / RECORD_SIZE as u64) as u32);
        Ok(OK)
    }
}

/// Set the 16-bit return value: HL, with A mirroring L and B mirroring H.
fn ret(cpu: &mut Z80, value: u16) {
    cpu.regs.set_hl(value);
    cpu.regs.a = cpu.regs.l;
    cpu.regs.b = cpu.regs.h;
}

/// Human-readable name for the trace log.
fn function_name(function: u8) -> &'static str {
    match function {
        0x00 => "P_TERMCPM",
        0x01 => "C_READ",
        0x02 => "C_WRITE",
        0x09 => "C_WRITESTR",
        0x0A => "C_READSTR",
        0x0B => "C_STAT",
        0x0C => "S_BDOSVER",
        0x0D => "DRV_ALLRESET",
        0x0E => "DRV_SET",
        0x0F => "F_OPEN",
        0x10 => "F_CLOSE",
        0x11 => "F_SFIRST",
        0x12 => "F_SNEXT",
        0x13 => "F_DELETE",
        0x14 => "F_READ",
        0x15 => "F_WRITE",
        0x16 => "F_MAKE",
        0x19 => "DRV_GET",
        0x1A => "F_DMAOFF",
        0x20 => "F_USERNUM",
        0x21 => "F_READRAND",
        0x22 => "F_WRITERAND",
        _ => "?",
    }
}
