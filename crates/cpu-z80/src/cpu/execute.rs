//! Per-opcode execution.
//!
//! Split by prefix group, mirroring the hardware decode: unprefixed, CB,
//! ED, DD/FD, and the doubly-prefixed DD CB/FD CB forms. Every arm returns
//! the T-states the instruction costs, with conditional instructions
//! returning the count for the path actually taken.

use crate::alu;
use crate::bus::Bus;
use crate::flags::{flag_if, sz53, sz53p, CF, HF, NF, PF, SF, XF, YF, ZF};

use super::{Index, Trap, Z80};

impl Z80 {
    // =====================================================================
    // Unprefixed table
    // =====================================================================

    pub(super) fn exec_main<B: Bus>(&mut self, bus: &mut B, op: u8) -> u32 {
        match op {
            // NOP
            0x00 => 4,

            // LD rr, nn
            0x01 | 0x11 | 0x21 | 0x31 => {
                let nn = self.fetch_imm16(bus);
                self.set_reg16((op >> 4) & 3, nn);
                10
            }

            // LD (BC), A / LD (DE), A
            0x02 => {
                bus.write(self.regs.bc(), self.regs.a);
                7
            }
            0x12 => {
                bus.write(self.regs.de(), self.regs.a);
                7
            }

            // INC rr / DEC rr
            0x03 | 0x13 | 0x23 | 0x33 => {
                let rp = (op >> 4) & 3;
                self.set_reg16(rp, self.get_reg16(rp).wrapping_add(1));
                6
            }
            0x0B | 0x1B | 0x2B | 0x3B => {
                let rp = (op >> 4) & 3;
                self.set_reg16(rp, self.get_reg16(rp).wrapping_sub(1));
                6
            }

            // INC r / INC (HL)
            0x04 | 0x0C | 0x14 | 0x1C | 0x24 | 0x2C | 0x3C => {
                let r = (op >> 3) & 7;
                let (value, flags) = alu::inc8(self.get_reg8(r));
                self.set_reg8(r, value);
                self.regs.f = (self.regs.f & CF) | flags;
                4
            }
            0x34 => {
                let addr = self.regs.hl();
                let (value, flags) = alu::inc8(bus.read(addr));
                bus.write(addr, value);
                self.regs.f = (self.regs.f & CF) | flags;
                11
            }

            // DEC r / DEC (HL)
            0x05 | 0x0D | 0x15 | 0x1D | 0x25 | 0x2D | 0x3D => {
                let r = (op >> 3) & 7;
                let (value, flags) = alu::dec8(self.get_reg8(r));
                self.set_reg8(r, value);
                self.regs.f = (self.regs.f & CF) | flags;
                4
            }
            0x35 => {
                let addr = self.regs.hl();
                let (value, flags) = alu::dec8(bus.read(addr));
                bus.write(addr, value);
                self.regs.f = (self.regs.f & CF) | flags;
                11
            }

            // LD r, n / LD (HL), n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => {
                let n = self.fetch_imm8(bus);
                self.set_reg8((op >> 3) & 7, n);
                7
            }
            0x36 => {
                let n = self.fetch_imm8(bus);
                bus.write(self.regs.hl(), n);
                10
            }

            // Accumulator rotates: S, Z and P/V survive, X/Y from the result.
            0x07 => {
                let carry = self.regs.a >> 7;
                self.regs.a = self.regs.a.rotate_left(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | flag_if(carry != 0, CF);
                4
            }
            0x0F => {
                let carry = self.regs.a & 1;
                self.regs.a = self.regs.a.rotate_right(1);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | flag_if(carry != 0, CF);
                4
            }
            0x17 => {
                let carry = self.regs.a >> 7;
                self.regs.a = (self.regs.a << 1) | (self.regs.f & CF);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | flag_if(carry != 0, CF);
                4
            }
            0x1F => {
                let carry = self.regs.a & 1;
                self.regs.a = (self.regs.a >> 1) | ((self.regs.f & CF) << 7);
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | flag_if(carry != 0, CF);
                4
            }

            // EX AF, AF'
            0x08 => {
                std::mem::swap(&mut self.regs.a, &mut self.regs.a_alt);
                std::mem::swap(&mut self.regs.f, &mut self.regs.f_alt);
                4
            }

            // ADD HL, rr
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rr = self.get_reg16((op >> 4) & 3);
                let (result, flags) = alu::add16(self.regs.hl(), rr);
                self.regs.set_hl(result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                11
            }

            // LD A, (BC) / LD A, (DE)
            0x0A => {
                self.regs.a = bus.read(self.regs.bc());
                7
            }
            0x1A => {
                self.regs.a = bus.read(self.regs.de());
                7
            }

            // DJNZ d
            0x10 => {
                let d = self.fetch_imm8(bus) as i8;
                self.regs.b = self.regs.b.wrapping_sub(1);
                if self.regs.b != 0 {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                    13
                } else {
                    8
                }
            }

            // JR d / JR cc, d
            0x18 => {
                let d = self.fetch_imm8(bus) as i8;
                self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                12
            }
            0x20 | 0x28 | 0x30 | 0x38 => {
                let d = self.fetch_imm8(bus) as i8;
                if self.condition((op >> 3) & 3) {
                    self.regs.pc = self.regs.pc.wrapping_add(d as u16);
                    12
                } else {
                    7
                }
            }

            // LD (nn), HL / LD HL, (nn)
            0x22 => {
                let addr = self.fetch_imm16(bus);
                let hl = self.regs.hl();
                self.write16(bus, addr, hl);
                16
            }
            0x2A => {
                let addr = self.fetch_imm16(bus);
                let value = self.read16(bus, addr);
                self.regs.set_hl(value);
                16
            }

            // DAA / CPL / SCF / CCF
            0x27 => {
                let (value, flags) = alu::daa(self.regs.a, self.regs.f);
                self.regs.a = value;
                self.regs.f = flags;
                4
            }
            0x2F => {
                self.regs.a = !self.regs.a;
                self.regs.f = (self.regs.f & (SF | ZF | PF | CF))
                    | HF
                    | NF
                    | (self.regs.a & (YF | XF));
                4
            }
            0x37 => {
                self.regs.f =
                    (self.regs.f & (SF | ZF | PF)) | (self.regs.a & (YF | XF)) | CF;
                4
            }
            0x3F => {
                let carry = self.regs.f & CF != 0;
                self.regs.f = (self.regs.f & (SF | ZF | PF))
                    | (self.regs.a & (YF | XF))
                    | flag_if(carry, HF)
                    | flag_if(!carry, CF);
                4
            }

            // LD (nn), A / LD A, (nn)
            0x32 => {
                let addr = self.fetch_imm16(bus);
                bus.write(addr, self.regs.a);
                13
            }
            0x3A => {
                let addr = self.fetch_imm16(bus);
                self.regs.a = bus.read(addr);
                13
            }

            // HALT, and the LD r, r' quadrant around it
            0x76 => {
                self.regs.halted = true;
                4
            }
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let value = bus.read(self.regs.hl());
                    self.set_reg8(dst, value);
                    7
                } else if dst == 6 {
                    bus.write(self.regs.hl(), self.get_reg8(src));
                    7
                } else {
                    let value = self.get_reg8(src);
                    self.set_reg8(dst, value);
                    4
                }
            }

            // ALU A, r
            0x80..=0xBF => {
                let src = op & 7;
                let (value, cycles) = if src == 6 {
                    (bus.read(self.regs.hl()), 7)
                } else {
                    (self.get_reg8(src), 4)
                };
                self.alu_acc((op >> 3) & 7, value);
                cycles
            }

            // RET cc / RET
            0xC0 | 0xC8 | 0xD0 | 0xD8 | 0xE0 | 0xE8 | 0xF0 | 0xF8 => {
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = self.pop16(bus);
                    11
                } else {
                    5
                }
            }
            0xC9 => {
                self.regs.pc = self.pop16(bus);
                10
            }

            // POP / PUSH qq
            0xC1 | 0xD1 | 0xE1 | 0xF1 => {
                let value = self.pop16(bus);
                self.set_reg16_af((op >> 4) & 3, value);
                10
            }
            0xC5 | 0xD5 | 0xE5 | 0xF5 => {
                let value = self.get_reg16_af((op >> 4) & 3);
                self.push16(bus, value);
                11
            }

            // JP nn / JP cc, nn
            0xC3 => {
                self.regs.pc = self.fetch_imm16(bus);
                10
            }
            0xC2 | 0xCA | 0xD2 | 0xDA | 0xE2 | 0xEA | 0xF2 | 0xFA => {
                let target = self.fetch_imm16(bus);
                if self.condition((op >> 3) & 7) {
                    self.regs.pc = target;
                }
                10
            }

            // CALL nn / CALL cc, nn
            0xCD => {
                let target = self.fetch_imm16(bus);
                let ret = self.regs.pc;
                self.push16(bus, ret);
                self.regs.pc = target;
                17
            }
            0xC4 | 0xCC | 0xD4 | 0xDC | 0xE4 | 0xEC | 0xF4 | 0xFC => {
                let target = self.fetch_imm16(bus);
                if self.condition((op >> 3) & 7) {
                    let ret = self.regs.pc;
                    self.push16(bus, ret);
                    self.regs.pc = target;
                    17
                } else {
                    10
                }
            }

            // ALU A, n
            0xC6 | 0xCE | 0xD6 | 0xDE | 0xE6 | 0xEE | 0xF6 | 0xFE => {
                let n = self.fetch_imm8(bus);
                self.alu_acc((op >> 3) & 7, n);
                7
            }

            // RST p
            0xC7 | 0xCF | 0xD7 | 0xDF | 0xE7 | 0xEF | 0xF7 | 0xFF => {
                let ret = self.regs.pc;
                self.push16(bus, ret);
                self.regs.pc = u16::from(op & 0x38);
                11
            }

            // OUT (n), A / IN A, (n) — A supplies the high port byte.
            0xD3 => {
                let n = self.fetch_imm8(bus);
                let port = u16::from(n) | (u16::from(self.regs.a) << 8);
                bus.io_write(port, self.regs.a);
                11
            }
            0xDB => {
                let n = self.fetch_imm8(bus);
                let port = u16::from(n) | (u16::from(self.regs.a) << 8);
                self.regs.a = bus.io_read(port);
                11
            }

            // EXX
            0xD9 => {
                std::mem::swap(&mut self.regs.b, &mut self.regs.b_alt);
                std::mem::swap(&mut self.regs.c, &mut self.regs.c_alt);
                std::mem::swap(&mut self.regs.d, &mut self.regs.d_alt);
                std::mem::swap(&mut self.regs.e, &mut self.regs.e_alt);
                std::mem::swap(&mut self.regs.h, &mut self.regs.h_alt);
                std::mem::swap(&mut self.regs.l, &mut self.regs.l_alt);
                4
            }

            // EX (SP), HL / EX DE, HL
            0xE3 => {
                let sp = self.regs.sp;
                let stacked = self.read16(bus, sp);
                let hl = self.regs.hl();
                self.write16(bus, sp, hl);
                self.regs.set_hl(stacked);
                19
            }
            0xEB => {
                let de = self.regs.de();
                let hl = self.regs.hl();
                self.regs.set_de(hl);
                self.regs.set_hl(de);
                4
            }

            // JP (HL) / LD SP, HL
            0xE9 => {
                self.regs.pc = self.regs.hl();
                4
            }
            0xF9 => {
                self.regs.sp = self.regs.hl();
                6
            }

            // DI / EI
            0xF3 => {
                self.regs.iff1 = false;
                self.regs.iff2 = false;
                4
            }
            0xFB => {
                self.regs.iff1 = true;
                self.regs.iff2 = true;
                self.ei_delay = 2;
                4
            }

            // Prefix bytes never reach this table.
            0xCB | 0xDD | 0xED | 0xFD => unreachable!("prefix byte in exec_main"),
        }
    }

    /// Accumulator ALU operation by 3-bit encoding
    /// (ADD ADC SUB SBC AND XOR OR CP).
    fn alu_acc(&mut self, kind: u8, value: u8) {
        let carry = self.regs.f & CF != 0;
        let a = self.regs.a;
        match kind & 7 {
            0 => (self.regs.a, self.regs.f) = alu::add8(a, value, false),
            1 => (self.regs.a, self.regs.f) = alu::add8(a, value, carry),
            2 => (self.regs.a, self.regs.f) = alu::sub8(a, value, false),
            3 => (self.regs.a, self.regs.f) = alu::sub8(a, value, carry),
            4 => (self.regs.a, self.regs.f) = alu::and8(a, value),
            5 => (self.regs.a, self.regs.f) = alu::xor8(a, value),
            6 => (self.regs.a, self.regs.f) = alu::or8(a, value),
            _ => self.regs.f = alu::cp8(a, value),
        }
    }

    // =====================================================================
    // CB prefix: rotates, shifts, bit test and set/reset
    // =====================================================================

    pub(super) fn exec_cb<B: Bus>(&mut self, bus: &mut B, op: u8) -> u32 {
        let group = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;

        let operand = if z == 6 {
            bus.read(self.regs.hl())
        } else {
            self.get_reg8(z)
        };

        match group {
            0 => {
                let (value, flags) = Self::rotate_shift(y, operand, self.regs.f & CF != 0);
                self.regs.f = flags;
                if z == 6 {
                    bus.write(self.regs.hl(), value);
                    15
                } else {
                    self.set_reg8(z, value);
                    8
                }
            }
            1 => {
                self.regs.f = Self::bit_flags(y, operand, operand) | (self.regs.f & CF);
                if z == 6 { 12 } else { 8 }
            }
            _ => {
                let value = if group == 2 {
                    operand & !(1 << y)
                } else {
                    operand | (1 << y)
                };
                if z == 6 {
                    bus.write(self.regs.hl(), value);
                    15
                } else {
                    self.set_reg8(z, value);
                    8
                }
            }
        }
    }

    /// CB rotate/shift selected by the 3-bit `y` field.
    fn rotate_shift(y: u8, value: u8, carry: bool) -> (u8, u8) {
        match y & 7 {
            0 => alu::rlc8(value),
            1 => alu::rrc8(value),
            2 => alu::rl8(value, carry),
            3 => alu::rr8(value, carry),
            4 => alu::sla8(value),
            5 => alu::sra8(value),
            6 => alu::sll8(value),
            _ => alu::srl8(value),
        }
    }

    /// BIT b flags; `xy_source` differs between register and indexed forms.
    fn bit_flags(bit: u8, value: u8, xy_source: u8) -> u8 {
        let tested = value & (1 << bit);
        HF | flag_if(tested == 0, ZF | PF)
            | flag_if(bit == 7 && tested != 0, SF)
            | (xy_source & (YF | XF))
    }

    // =====================================================================
    // ED prefix: extended group
    // =====================================================================

    pub(super) fn exec_ed<B: Bus>(
        &mut self,
        bus: &mut B,
        op: u8,
        start_pc: u16,
    ) -> Result<u32, Trap> {
        match op {
            // IN r, (C) — ED 70 tests the port without storing.
            0x40 | 0x48 | 0x50 | 0x58 | 0x60 | 0x68 | 0x70 | 0x78 => {
                let value = bus.io_read(self.regs.bc());
                let r = (op >> 3) & 7;
                if r != 6 {
                    self.set_reg8(r, value);
                }
                self.regs.f = (self.regs.f & CF) | sz53p(value);
                Ok(12)
            }

            // OUT (C), r — ED 71 drives zero.
            0x41 | 0x49 | 0x51 | 0x59 | 0x61 | 0x69 | 0x71 | 0x79 => {
                let r = (op >> 3) & 7;
                let value = if r == 6 { 0 } else { self.get_reg8(r) };
                bus.io_write(self.regs.bc(), value);
                Ok(12)
            }

            // SBC HL, ss / ADC HL, ss
            0x42 | 0x52 | 0x62 | 0x72 => {
                let ss = self.get_reg16((op >> 4) & 3);
                let (result, flags) =
                    alu::sbc16(self.regs.hl(), ss, self.regs.f & CF != 0);
                self.regs.set_hl(result);
                self.regs.f = flags;
                Ok(15)
            }
            0x4A | 0x5A | 0x6A | 0x7A => {
                let ss = self.get_reg16((op >> 4) & 3);
                let (result, flags) =
                    alu::adc16(self.regs.hl(), ss, self.regs.f & CF != 0);
                self.regs.set_hl(result);
                self.regs.f = flags;
                Ok(15)
            }

            // LD (nn), dd / LD dd, (nn)
            0x43 | 0x53 | 0x63 | 0x73 => {
                let addr = self.fetch_imm16(bus);
                let value = self.get_reg16((op >> 4) & 3);
                self.write16(bus, addr, value);
                Ok(20)
            }
            0x4B | 0x5B | 0x6B | 0x7B => {
                let addr = self.fetch_imm16(bus);
                let value = self.read16(bus, addr);
                self.set_reg16((op >> 4) & 3, value);
                Ok(20)
            }

            // NEG and its mirrors
            0x44 | 0x4C | 0x54 | 0x5C | 0x64 | 0x6C | 0x74 | 0x7C => {
                let (value, flags) = alu::sub8(0, self.regs.a, false);
                self.regs.a = value;
                self.regs.f = flags;
                Ok(8)
            }

            // RETN mirrors and RETI: both pop PC; RETN restores IFF1.
            0x45 | 0x55 | 0x65 | 0x75 | 0x4D | 0x5D | 0x6D | 0x7D => {
                self.regs.iff1 = self.regs.iff2;
                self.regs.pc = self.pop16(bus);
                Ok(14)
            }

            // IM 0/1/2 and mirrors
            0x46 | 0x4E | 0x56 | 0x5E | 0x66 | 0x6E | 0x76 | 0x7E => {
                self.regs.im = match (op >> 3) & 3 {
                    2 => 1,
                    3 => 2,
                    _ => 0,
                };
                Ok(8)
            }

            // LD I, A / LD R, A / LD A, I / LD A, R
            0x47 => {
                self.regs.i = self.regs.a;
                Ok(9)
            }
            0x4F => {
                self.regs.r = self.regs.a;
                Ok(9)
            }
            0x57 => {
                self.regs.a = self.regs.i;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | flag_if(self.regs.iff2, PF);
                Ok(9)
            }
            0x5F => {
                self.regs.a = self.regs.r;
                self.regs.f = (self.regs.f & CF)
                    | sz53(self.regs.a)
                    | flag_if(self.regs.iff2, PF);
                Ok(9)
            }

            // RRD / RLD: nibble rotation through A and (HL).
            0x67 => {
                let addr = self.regs.hl();
                let m = bus.read(addr);
                let a = self.regs.a;
                bus.write(addr, (a << 4) | (m >> 4));
                self.regs.a = (a & 0xF0) | (m & 0x0F);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                Ok(18)
            }
            0x6F => {
                let addr = self.regs.hl();
                let m = bus.read(addr);
                let a = self.regs.a;
                bus.write(addr, (m << 4) | (a & 0x0F));
                self.regs.a = (a & 0xF0) | (m >> 4);
                self.regs.f = (self.regs.f & CF) | sz53p(self.regs.a);
                Ok(18)
            }

            // Block transfer / compare / port groups
            0xA0 => Ok(self.block_ld(bus, 1, false)),
            0xA8 => Ok(self.block_ld(bus, -1, false)),
            0xB0 => Ok(self.block_ld(bus, 1, true)),
            0xB8 => Ok(self.block_ld(bus, -1, true)),

            0xA1 => Ok(self.block_cp(bus, 1, false)),
            0xA9 => Ok(self.block_cp(bus, -1, false)),
            0xB1 => Ok(self.block_cp(bus, 1, true)),
            0xB9 => Ok(self.block_cp(bus, -1, true)),

            0xA2 => Ok(self.block_in(bus, 1, false)),
            0xAA => Ok(self.block_in(bus, -1, false)),
            0xB2 => Ok(self.block_in(bus, 1, true)),
            0xBA => Ok(self.block_in(bus, -1, true)),

            0xA3 => Ok(self.block_out(bus, 1, false)),
            0xAB => Ok(self.block_out(bus, -1, false)),
            0xB3 => Ok(self.block_out(bus, 1, true)),
            0xBB => Ok(self.block_out(bus, -1, true)),

            _ => Err(Trap::IllegalOpcode {
                pc: start_pc,
                bytes: Self::opcode_window(bus, start_pc),
            }),
        }
    }

    /// LDI/LDD/LDIR/LDDR. Repeating forms rewind PC by two so the
    /// instruction re-executes on the next step while BC is non-zero.
    fn block_ld<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) -> u32 {
        let hl = self.regs.hl();
        let de = self.regs.de();
        let value = bus.read(hl);
        bus.write(de, value);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.set_de(de.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let n = self.regs.a.wrapping_add(value);
        self.regs.f = (self.regs.f & (SF | ZF | CF))
            | flag_if(bc != 0, PF)
            | flag_if(n & 0x02 != 0, YF)
            | flag_if(n & 0x08 != 0, XF);

        if repeat && bc != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    /// CPI/CPD/CPIR/CPDR.
    fn block_cp<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) -> u32 {
        let hl = self.regs.hl();
        let value = bus.read(hl);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        let bc = self.regs.bc().wrapping_sub(1);
        self.regs.set_bc(bc);

        let result = self.regs.a.wrapping_sub(value);
        let half = (self.regs.a & 0x0F) < (value & 0x0F);
        let n = result.wrapping_sub(u8::from(half));
        self.regs.f = (self.regs.f & CF)
            | NF
            | flag_if(result & 0x80 != 0, SF)
            | flag_if(result == 0, ZF)
            | flag_if(half, HF)
            | flag_if(bc != 0, PF)
            | flag_if(n & 0x02 != 0, YF)
            | flag_if(n & 0x08 != 0, XF);

        if repeat && bc != 0 && result != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    /// INI/IND/INIR/INDR.
    fn block_in<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) -> u32 {
        let value = bus.io_read(self.regs.bc());
        let hl = self.regs.hl();
        bus.write(hl, value);
        self.regs.set_hl(hl.wrapping_add(dir as u16));
        self.regs.b = self.regs.b.wrapping_sub(1);

        let c_adj = self.regs.c.wrapping_add(dir as u8);
        let k = u16::from(value) + u16::from(c_adj);
        self.regs.f = sz53(self.regs.b)
            | flag_if(value & 0x80 != 0, NF)
            | flag_if(k > 0xFF, HF | CF)
            | flag_if(((k as u8 & 0x07) ^ self.regs.b).count_ones() % 2 == 0, PF);

        if repeat && self.regs.b != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    /// OUTI/OUTD/OTIR/OTDR. B decrements before the port sees the address.
    fn block_out<B: Bus>(&mut self, bus: &mut B, dir: i16, repeat: bool) -> u32 {
        let hl = self.regs.hl();
        let value = bus.read(hl);
        self.regs.b = self.regs.b.wrapping_sub(1);
        bus.io_write(self.regs.bc(), value);
        self.regs.set_hl(hl.wrapping_add(dir as u16));

        let k = u16::from(value) + u16::from(self.regs.l);
        self.regs.f = sz53(self.regs.b)
            | flag_if(value & 0x80 != 0, NF)
            | flag_if(k > 0xFF, HF | CF)
            | flag_if(((k as u8 & 0x07) ^ self.regs.b).count_ones() % 2 == 0, PF);

        if repeat && self.regs.b != 0 {
            self.regs.pc = self.regs.pc.wrapping_sub(2);
            21
        } else {
            16
        }
    }

    // =====================================================================
    // DD/FD prefix: IX/IY forms
    // =====================================================================

    pub(super) fn exec_index<B: Bus>(&mut self, bus: &mut B, index: Index) -> u32 {
        // A prefix followed by another prefix acts as a 4-T-state no-op;
        // the next step re-decodes from the second prefix.
        let next = bus.read(self.regs.pc);
        if matches!(next, 0xDD | 0xFD | 0xED) {
            return 4;
        }

        let op = self.fetch_m1(bus);
        match op {
            0xCB => {
                let d = self.fetch_imm8(bus) as i8;
                let sub = self.fetch_imm8(bus);
                self.exec_index_cb(bus, index, d, sub)
            }

            // LD IX, nn and the other 16-bit index forms
            0x21 => {
                let nn = self.fetch_imm16(bus);
                self.set_index_reg(index, nn);
                14
            }
            0x22 => {
                let addr = self.fetch_imm16(bus);
                let value = self.index_reg(index);
                self.write16(bus, addr, value);
                20
            }
            0x2A => {
                let addr = self.fetch_imm16(bus);
                let value = self.read16(bus, addr);
                self.set_index_reg(index, value);
                20
            }
            0x23 => {
                let value = self.index_reg(index).wrapping_add(1);
                self.set_index_reg(index, value);
                10
            }
            0x2B => {
                let value = self.index_reg(index).wrapping_sub(1);
                self.set_index_reg(index, value);
                10
            }

            // ADD IX, pp (pp slot 2 is the index register itself)
            0x09 | 0x19 | 0x29 | 0x39 => {
                let rp = (op >> 4) & 3;
                let rhs = if rp == 2 {
                    self.index_reg(index)
                } else {
                    self.get_reg16(rp)
                };
                let (result, flags) = alu::add16(self.index_reg(index), rhs);
                self.set_index_reg(index, result);
                self.regs.f = (self.regs.f & (SF | ZF | PF)) | flags;
                15
            }

            // INC/DEC/LD on IXH/IXL (undocumented)
            0x24 | 0x25 | 0x2C | 0x2D => {
                let r = (op >> 3) & 7;
                let operand = self.get_reg8_indexed(r, index);
                let (value, flags) = if op & 1 == 0 {
                    alu::inc8(operand)
                } else {
                    alu::dec8(operand)
                };
                self.set_reg8_indexed(r, index, value);
                self.regs.f = (self.regs.f & CF) | flags;
                8
            }
            0x26 | 0x2E => {
                let n = self.fetch_imm8(bus);
                self.set_reg8_indexed((op >> 3) & 7, index, n);
                11
            }

            // INC/DEC/LD n on (IX+d)
            0x34 | 0x35 => {
                let addr = self.indexed_addr(bus, index);
                let (value, flags) = if op == 0x34 {
                    alu::inc8(bus.read(addr))
                } else {
                    alu::dec8(bus.read(addr))
                };
                bus.write(addr, value);
                self.regs.f = (self.regs.f & CF) | flags;
                23
            }
            0x36 => {
                let addr = self.indexed_addr(bus, index);
                let n = self.fetch_imm8(bus);
                bus.write(addr, n);
                19
            }

            // LD quadrant. Memory forms pair (IX+d) with the *real* H/L;
            // register-to-register forms substitute IXH/IXL.
            0x76 => {
                self.regs.halted = true;
                8
            }
            0x40..=0x7F => {
                let dst = (op >> 3) & 7;
                let src = op & 7;
                if src == 6 {
                    let addr = self.indexed_addr(bus, index);
                    let value = bus.read(addr);
                    self.set_reg8(dst, value);
                    19
                } else if dst == 6 {
                    let addr = self.indexed_addr(bus, index);
                    bus.write(addr, self.get_reg8(src));
                    19
                } else {
                    let value = self.get_reg8_indexed(src, index);
                    self.set_reg8_indexed(dst, index, value);
                    8
                }
            }

            // ALU quadrant
            0x80..=0xBF => {
                let src = op & 7;
                let (value, cycles) = if src == 6 {
                    let addr = self.indexed_addr(bus, index);
                    (bus.read(addr), 19)
                } else {
                    (self.get_reg8_indexed(src, index), 8)
                };
                self.alu_acc((op >> 3) & 7, value);
                cycles
            }

            // Stack and jump forms
            0xE1 => {
                let value = self.pop16(bus);
                self.set_index_reg(index, value);
                14
            }
            0xE5 => {
                let value = self.index_reg(index);
                self.push16(bus, value);
                15
            }
            0xE3 => {
                let sp = self.regs.sp;
                let stacked = self.read16(bus, sp);
                let value = self.index_reg(index);
                self.write16(bus, sp, value);
                self.set_index_reg(index, stacked);
                23
            }
            0xE9 => {
                self.regs.pc = self.index_reg(index);
                8
            }
            0xF9 => {
                self.regs.sp = self.index_reg(index);
                10
            }

            // Everything else ignores the prefix and pays four T-states.
            other => 4 + self.exec_main(bus, other),
        }
    }

    /// Effective address for (IX+d)/(IY+d); the displacement byte follows
    /// the opcode.
    fn indexed_addr<B: Bus>(&mut self, bus: &mut B, index: Index) -> u16 {
        let d = self.fetch_imm8(bus) as i8;
        self.index_reg(index).wrapping_add(d as u16)
    }

    // =====================================================================
    // DD CB / FD CB: displacement comes before the final opcode
    // =====================================================================

    fn exec_index_cb<B: Bus>(&mut self, bus: &mut B, index: Index, d: i8, op: u8) -> u32 {
        let addr = self.index_reg(index).wrapping_add(d as u16);
        let group = op >> 6;
        let y = (op >> 3) & 7;
        let z = op & 7;
        let operand = bus.read(addr);

        match group {
            1 => {
                // BIT: X/Y leak from the high byte of the effective address.
                self.regs.f =
                    Self::bit_flags(y, operand, (addr >> 8) as u8) | (self.regs.f & CF);
                20
            }
            _ => {
                let value = match group {
                    0 => {
                        let (value, flags) =
                            Self::rotate_shift(y, operand, self.regs.f & CF != 0);
                        self.regs.f = flags;
                        value
                    }
                    2 => operand & !(1 << y),
                    _ => operand | (1 << y),
                };
                bus.write(addr, value);
                // Undocumented: non-(HL) encodings copy the result into the
                // plain register as well.
                if z != 6 {
                    self.set_reg8(z, value);
                }
                23
            }
        }
    }
}
