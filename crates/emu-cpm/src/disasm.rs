//! One-line instruction disassembly for the trace log.
//!
//! Decodes by the 2-3-3 bit fields of the opcode rather than a 256-entry
//! table; the groups fall out of the encoding. DD/FD forms reuse the main
//! decoder with a substituted name table. Unknown byte sequences render as
//! `DB` so a trace never dies on garbage.

use crate::memory::Memory;

const CC: [&str; 8] = ["NZ", "Z", "NC", "C", "PO", "PE", "P", "M"];
const ALU: [&str; 8] = ["ADD A,", "ADC A,", "SUB ", "SBC A,", "AND ", "XOR ", "OR ", "CP "];
const ROT: [&str; 8] = ["RLC", "RRC", "RL", "RR", "SLA", "SRA", "SLL", "SRL"];
const ACC_OPS: [&str; 8] = ["RLCA", "RRCA", "RLA", "RRA", "DAA", "CPL", "SCF", "CCF"];

/// Operand spellings for one prefix context.
struct Names<'a> {
    r: [&'a str; 8],
    rp: [&'a str; 4],
    rp_af: [&'a str; 4],
    /// 16-bit register named in ADD/EX/JP/LD SP forms.
    hl: &'a str,
}

const PLAIN: Names<'static> = Names {
    r: ["B", "C", "D", "E", "H", "L", "(HL)", "A"],
    rp: ["BC", "DE", "HL", "SP"],
    rp_af: ["BC", "DE", "HL", "AF"],
    hl: "HL",
};

/// Disassemble the instruction at `pc`, returning its text and length.
#[must_use]
pub fn disassemble(mem: &Memory, pc: u16) -> (String, usize) {
    let op = mem.read8(pc);
    match op {
        0xCB => {
            let sub = mem.read8(pc.wrapping_add(1));
            (cb_text(sub, PLAIN.r[(sub & 7) as usize]), 2)
        }
        0xED => ed(mem, pc),
        0xDD => indexed(mem, pc, "IX"),
        0xFD => indexed(mem, pc, "IY"),
        _ => main(mem, pc, op, &PLAIN),
    }
}

fn imm8(mem: &Memory, pc: u16, offset: u16) -> u8 {
    mem.read8(pc.wrapping_add(offset))
}

fn imm16(mem: &Memory, pc: u16, offset: u16) -> u16 {
    mem.read16(pc.wrapping_add(offset))
}

/// Relative-jump target: displacement at `pc+offset`, counted from the end
/// of the instruction.
fn rel_target(mem: &Memory, pc: u16, offset: u16) -> u16 {
    let d = imm8(mem, pc, offset) as i8;
    pc.wrapping_add(offset + 1).wrapping_add(d as u16)
}

/// Unprefixed decode. Prefixed callers pass a shifted `pc` so immediates
/// and relative targets resolve against the true instruction layout; the
/// returned length is the unprefixed one.
fn main(mem: &Memory, pc: u16, op: u8, names: &Names) -> (String, usize) {
    let x = op >> 6;
    let y = ((op >> 3) & 7) as usize;
    let z = (op & 7) as usize;
    let p = y >> 1;
    let q = y & 1;
    let r = &names.r;

    match x {
        0 => match z {
            0 => match y {
                0 => ("NOP".into(), 1),
                1 => ("EX AF,AF'".into(), 1),
                2 => (format!("DJNZ {:04X}h", rel_target(mem, pc, 1)), 2),
                3 => (format!("JR {:04X}h", rel_target(mem, pc, 1)), 2),
                _ => (
                    format!("JR {},{:04X}h", CC[y - 4], rel_target(mem, pc, 1)),
                    2,
                ),
            },
            1 => {
                if q == 0 {
                    (format!("LD {},{:04X}h", names.rp[p], imm16(mem, pc, 1)), 3)
                } else {
                    (format!("ADD {},{}", names.hl, names.rp[p]), 1)
                }
            }
            2 => match (q, p) {
                (0, 0) => ("LD (BC),A".into(), 1),
                (0, 1) => ("LD (DE),A".into(), 1),
                (0, 2) => (
                    format!("LD ({:04X}h),{}", imm16(mem, pc, 1), names.hl),
                    3,
                ),
                (0, _) => (format!("LD ({:04X}h),A", imm16(mem, pc, 1)), 3),
                (_, 0) => ("LD A,(BC)".into(), 1),
                (_, 1) => ("LD A,(DE)".into(), 1),
                (_, 2) => (
                    format!("LD {},({:04X}h)", names.hl, imm16(mem, pc, 1)),
                    3,
                ),
                (_, _) => (format!("LD A,({:04X}h)", imm16(mem, pc, 1)), 3),
            },
            3 => {
                if q == 0 {
                    (format!("INC {}", names.rp[p]), 1)
                } else {
                    (format!("DEC {}", names.rp[p]), 1)
                }
            }
            4 => (format!("INC {}", r[y]), 1),
            5 => (format!("DEC {}", r[y]), 1),
            6 => (format!("LD {},{:02X}h", r[y], imm8(mem, pc, 1)), 2),
            _ => (ACC_OPS[y].into(), 1),
        },
        1 => {
            if op == 0x76 {
                ("HALT".into(), 1)
            } else {
                (format!("LD {},{}", r[y], r[z]), 1)
            }
        }
        2 => (format!("{}{}", ALU[y], r[z]), 1),
        _ => match z {
            0 => (format!("RET {}", CC[y]), 1),
            1 => {
                if q == 0 {
                    (format!("POP {}", names.rp_af[p]), 1)
                } else {
                    match p {
                        0 => ("RET".into(), 1),
                        1 => ("EXX".into(), 1),
                        2 => (format!("JP ({})", names.hl), 1),
                        _ => (format!("LD SP,{}", names.hl), 1),
                    }
                }
            }
            2 => (format!("JP {},{:04X}h", CC[y], imm16(mem, pc, 1)), 3),
            3 => match y {
                0 => (format!("JP {:04X}h", imm16(mem, pc, 1)), 3),
                2 => (format!("OUT ({:02X}h),A", imm8(mem, pc, 1)), 2),
                3 => (format!("IN A,({:02X}h)", imm8(mem, pc, 1)), 2),
                4 => (format!("EX (SP),{}", names.hl), 1),
                5 => ("EX DE,HL".into(), 1),
                6 => ("DI".into(), 1),
                _ => ("EI".into(), 1),
            },
            4 => (format!("CALL {},{:04X}h", CC[y], imm16(mem, pc, 1)), 3),
            5 => {
                if q == 0 {
                    (format!("PUSH {}", names.rp_af[p]), 1)
                } else {
                    (format!("CALL {:04X}h", imm16(mem, pc, 1)), 3)
                }
            }
            6 => (format!("{}{:02X}h", ALU[y], imm8(mem, pc, 1)), 2),
            _ => (format!("RST {:02X}h", op & 0x38), 1),
        },
    }
}

fn cb_text(sub: u8, operand: &str) -> String {
    let y = (sub >> 3) & 7;
    match sub >> 6 {
        0 => format!("{} {}", ROT[y as usize], operand),
        1 => format!("BIT {y},{operand}"),
        2 => format!("RES {y},{operand}"),
        _ => format!("SET {y},{operand}"),
    }
}

fn ed(mem: &Memory, pc: u16) -> (String, usize) {
    let sub = mem.read8(pc.wrapping_add(1));
    let y = ((sub >> 3) & 7) as usize;
    let p = y >> 1;
    let q = y & 1;

    let known: Option<(String, usize)> = match sub {
        0x40..=0x7F => match sub & 7 {
            0 => Some((format!("IN {},(C)", PLAIN.r[y]), 2)),
            1 => Some((format!("OUT (C),{}", PLAIN.r[y]), 2)),
            2 => {
                let name = if q == 0 { "SBC" } else { "ADC" };
                Some((format!("{name} HL,{}", PLAIN.rp[p]), 2))
            }
            3 => {
                if q == 0 {
                    Some((
                        format!("LD ({:04X}h),{}", imm16(mem, pc, 2), PLAIN.rp[p]),
                        4,
                    ))
                } else {
                    Some((
                        format!("LD {},({:04X}h)", PLAIN.rp[p], imm16(mem, pc, 2)),
                        4,
                    ))
                }
            }
            4 => Some(("NEG".into(), 2)),
            5 => Some((if y == 1 { "RETI" } else { "RETN" }.into(), 2)),
            6 => {
                let mode = match y & 3 {
                    2 => "1",
                    3 => "2",
                    _ => "0",
                };
                Some((format!("IM {mode}"), 2))
            }
            _ => match y {
                0 => Some(("LD I,A".into(), 2)),
                1 => Some(("LD R,A".into(), 2)),
                2 => Some(("LD A,I".into(), 2)),
                3 => Some(("LD A,R".into(), 2)),
                4 => Some(("RRD".into(), 2)),
                5 => Some(("RLD".into(), 2)),
                _ => None,
            },
        },
        0xA0 | 0xA1 | 0xA2 | 0xA3 | 0xA8 | 0xA9 | 0xAA | 0xAB | 0xB0 | 0xB1 | 0xB2
        | 0xB3 | 0xB8 | 0xB9 | 0xBA | 0xBB => {
            const BLOCK: [[&str; 4]; 4] = [
                ["LDI", "CPI", "INI", "OUTI"],
                ["LDD", "CPD", "IND", "OUTD"],
                ["LDIR", "CPIR", "INIR", "OTIR"],
                ["LDDR", "CPDR", "INDR", "OTDR"],
            ];
            let row = (((sub >> 3) & 1) | ((sub >> 3) & 2)) as usize;
            let col = (sub & 3) as usize;
            Some((BLOCK[row][col].into(), 2))
        }
        _ => None,
    };

    known.unwrap_or_else(|| (format!("DB EDh,{sub:02X}h"), 2))
}

/// Does this unprefixed opcode address memory through (HL), gaining a
/// displacement byte under DD/FD?
fn uses_hl_memory(op: u8) -> bool {
    match op {
        0x34 | 0x35 | 0x36 | 0x76 => op != 0x76,
        0x46..=0x7E | 0x86..=0xBE => op & 7 == 6 || (0x70..=0x77).contains(&op),
        _ => false,
    }
}

fn indexed(mem: &Memory, pc: u16, reg: &str) -> (String, usize) {
    let sub = mem.read8(pc.wrapping_add(1));

    // DD CB d op: displacement precedes the final opcode.
    if sub == 0xCB {
        let d = imm8(mem, pc, 2) as i8;
        let op = imm8(mem, pc, 3);
        let operand = format!("({reg}{d:+})");
        let mut text = cb_text(op, &operand);
        if op & 7 != 6 && op >> 6 != 1 {
            // Undocumented copy-back form.
            text = format!("{text},{}", PLAIN.r[(op & 7) as usize]);
        }
        return (text, 4);
    }

    // A prefix in front of another prefix is inert.
    if matches!(sub, 0xDD | 0xFD | 0xED) {
        return (format!("DB {:02X}h", mem.read8(pc)), 1);
    }

    let high = format!("{reg}H");
    let low = format!("{reg}L");
    let paren = format!("({reg})");

    if uses_hl_memory(sub) {
        let d = imm8(mem, pc, 2) as i8;
        let target = format!("({reg}{d:+})");
        // Memory forms keep the real H and L as register operands.
        let names = Names {
            r: ["B", "C", "D", "E", "H", "L", target.as_str(), "A"],
            rp: ["BC", "DE", reg, "SP"],
            rp_af: ["BC", "DE", reg, "AF"],
            hl: reg,
        };
        // Shift pc by 2 so an immediate after the displacement resolves.
        let (text, len) = main(mem, pc.wrapping_add(2), sub, &names);
        (text, len + 2)
    } else {
        let names = Names {
            r: ["B", "C", "D", "E", high.as_str(), low.as_str(), paren.as_str(), "A"],
            rp: ["BC", "DE", reg, "SP"],
            rp_af: ["BC", "DE", reg, "AF"],
            hl: reg,
        };
        // Shift pc by 1 for the prefix byte.
        let (text, len) = main(mem, pc.wrapping_add(1), sub, &names);
        (text, len + 1)
    }
}
