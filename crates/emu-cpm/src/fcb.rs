//! File Control Block access and CP/M filename handling.
//!
//! A File Control Block is 36 bytes of guest memory at a caller-chosen
//! address. [`Fcb`] is a view over that memory; the host file object itself
//! lives in the machine's handle pool, with only a slot number smuggled
//! through the 16-byte allocation field.

use crate::memory::Memory;

/// Bytes in one CP/M record.
pub const RECORD_SIZE: usize = 128;

// Field offsets within the 36-byte block.
const DR: u16 = 0;
const NAME: u16 = 1;
const EX: u16 = 12;
const S2: u16 = 14;
const RC: u16 = 15;
const AL: u16 = 16;
const CR: u16 = 32;
const R0: u16 = 33;

/// A File Control Block at a guest address.
#[derive(Debug, Clone, Copy)]
pub struct Fcb(pub u16);

impl Fcb {
    /// Drive byte: 0 = default, 1-16 = A-P.
    #[must_use]
    pub fn drive(&self, mem: &Memory) -> u8 {
        mem.read8(self.0.wrapping_add(DR))
    }

    /// The 11 name/type bytes, uppercased.
    #[must_use]
    pub fn name_bytes(&self, mem: &Memory) -> [u8; 11] {
        let mut name = [0u8; 11];
        for (i, byte) in name.iter_mut().enumerate() {
            *byte = mem.read8(self.0.wrapping_add(NAME + i as u16)).to_ascii_uppercase();
        }
        name
    }

    /// Handle slot stored in the allocation field; 0 means closed.
    #[must_use]
    pub fn handle(&self, mem: &Memory) -> u16 {
        mem.read16(self.0.wrapping_add(AL))
    }

    pub fn set_handle(&self, mem: &mut Memory, handle: u16) {
        mem.write16(self.0.wrapping_add(AL), handle);
    }

    /// 24-bit random record number from R0..R2.
    #[must_use]
    pub fn random_record(&self, mem: &Memory) -> u32 {
        u32::from(mem.read8(self.0.wrapping_add(R0)))
            | (u32::from(mem.read8(self.0.wrapping_add(R0 + 1))) << 8)
            | (u32::from(mem.read8(self.0.wrapping_add(R0 + 2))) << 16)
    }

    /// Record count of the current extent, reported by open.
    pub fn set_record_count(&self, mem: &mut Memory, rc: u8) {
        mem.write8(self.0.wrapping_add(RC), rc);
    }

    /// Write the sequential position fields (CR, EX, S2) for an absolute
    /// record number, so guests inspecting the FCB see where the host
    /// cursor sits.
    pub fn set_position(&self, mem: &mut Memory, record: u32) {
        mem.write8(self.0.wrapping_add(CR), (record % 128) as u8);
        mem.write8(self.0.wrapping_add(EX), ((record / 128) % 32) as u8);
        mem.write8(self.0.wrapping_add(S2), (record / 4096) as u8);
    }
}

/// CP/M name/type to a host filename: trailing spaces stripped, the dot
/// dropped when the type is blank. Returns `None` for a blank name.
#[must_use]
pub fn host_name(name: &[u8; 11]) -> Option<String> {
    let base: &[u8] = trim_spaces(&name[..8]);
    let ext: &[u8] = trim_spaces(&name[8..]);
    if base.is_empty() {
        return None;
    }
    let mut out = String::from_utf8_lossy(base).into_owned();
    if !ext.is_empty() {
        out.push('.');
        out.push_str(&String::from_utf8_lossy(ext));
    }
    Some(out)
}

/// Host filename to the 11-byte CP/M form: split at the last dot,
/// uppercase, space-pad to 8+3. Rejects names that do not fit 8.3.
#[must_use]
pub fn cpm_name(host: &str) -> Option<[u8; 11]> {
    let (base, ext) = match host.rsplit_once('.') {
        Some((base, ext)) => (base, ext),
        None => (host, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 {
        return None;
    }
    if !base.bytes().chain(ext.bytes()).all(|b| b.is_ascii_graphic()) {
        return None;
    }
    let mut name = [b' '; 11];
    for (i, byte) in base.bytes().enumerate() {
        name[i] = byte.to_ascii_uppercase();
    }
    for (i, byte) in ext.bytes().enumerate() {
        name[8 + i] = byte.to_ascii_uppercase();
    }
    Some(name)
}

/// Match an 11-byte name against an 11-byte pattern where `?` matches any
/// byte in that position.
#[must_use]
pub fn matches(pattern: &[u8; 11], name: &[u8; 11]) -> bool {
    pattern
        .iter()
        .zip(name.iter())
        .all(|(&p, &n)| p == b'?' || p == n)
}

fn trim_spaces(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ')
        .map_or(0, |pos| pos + 1);
    &bytes[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packed(name: &str, ext: &str) -> [u8; 11] {
        let mut bytes = [b' '; 11];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        bytes[8..8 + ext.len()].copy_from_slice(ext.as_bytes());
        bytes
    }

    #[test]
    fn host_name_joins_with_dot() {
        assert_eq!(host_name(&packed("HELLO", "COM")).unwrap(), "HELLO.COM");
    }

    #[test]
    fn host_name_drops_empty_type() {
        assert_eq!(host_name(&packed("README", "")).unwrap(), "README");
    }

    #[test]
    fn host_name_rejects_blank() {
        assert!(host_name(&packed("", "")).is_none());
    }

    #[test]
    fn cpm_name_pads_and_uppercases() {
        assert_eq!(cpm_name("hello.com").unwrap(), packed("HELLO", "COM"));
        assert_eq!(cpm_name("a.b").unwrap(), packed("A", "B"));
        assert_eq!(cpm_name("README").unwrap(), packed("README", ""));
    }

    #[test]
    fn cpm_name_rejects_oversize() {
        assert!(cpm_name("longbasename.txt").is_none());
        assert!(cpm_name("file.text").is_none());
        assert!(cpm_name(".hidden").is_none());
    }

    #[test]
    fn translation_roundtrip() {
        for name in ["HELLO.COM", "A.B", "README", "WORLD.TXT"] {
            assert_eq!(host_name(&cpm_name(name).unwrap()).unwrap(), name);
        }
    }

    #[test]
    fn wildcard_positions() {
        let all = [b'?'; 11];
        assert!(matches(&all, &packed("HELLO", "COM")));

        let mut com_only = [b'?'; 11];
        com_only[8..].copy_from_slice(b"COM");
        assert!(matches(&com_only, &packed("HELLO", "COM")));
        assert!(!matches(&com_only, &packed("WORLD", "TXT")));

        let exact = packed("HELLO", "COM");
        assert!(matches(&exact, &packed("HELLO", "COM")));
        assert!(!matches(&exact, &packed("HELLP", "COM")));
    }

    #[test]
    fn fcb_field_access() {
        let mut mem = Memory::new();
        let fcb = Fcb(0x005C);
        mem.write8(0x005C, 1); // drive A
        mem.load(0x005D, b"TEST    TXT");
        assert_eq!(fcb.drive(&mem), 1);
        assert_eq!(&fcb.name_bytes(&mem), b"TEST    TXT");

        fcb.set_handle(&mut mem, 3);
        assert_eq!(fcb.handle(&mem), 3);
        assert_eq!(mem.read8(0x005C + 16), 3, "handle lives in AL");

        mem.write8(0x005C + 33, 0x10); // R0
        mem.write8(0x005C + 34, 0x02); // R1
        assert_eq!(fcb.random_record(&mem), 0x0210);

        fcb.set_position(&mut mem, 130);
        assert_eq!(mem.read8(0x005C + 32), 2); // CR
        assert_eq!(mem.read8(0x005C + 12), 1); // EX
    }
}
