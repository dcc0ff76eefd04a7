//! End-to-end scenarios: whole guest programs through `Machine::run`.

use emu_cpm::{Console, Log, Machine, MachineConfig, MachineError};

/// Machine with a scripted console and the given program at 0x0100.
fn machine_with(program: &[u8], input: &[u8]) -> Machine {
    let config = MachineConfig::default();
    let mut machine = Machine::with_console(&config, Console::scripted(input), Log::discard());
    machine.memory_mut().load(0x0100, program);
    machine
}

#[test]
fn print_string_writes_to_stdout() {
    // LD C,9; LD DE,string; CALL 5; JP 0; "HI$"
    let mut machine = machine_with(
        &[
            0x0E, 0x09, // LD C, 9
            0x11, 0x0B, 0x01, // LD DE, 0x010B
            0xCD, 0x05, 0x00, // CALL 5
            0xC3, 0x00, 0x00, // JP 0
            b'H', b'I', b'$',
        ],
        b"",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"HI");
}

#[test]
fn dollar_is_not_written() {
    let mut machine = machine_with(
        &[
            0x0E, 0x09, 0x11, 0x0B, 0x01, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00, b'$', b'X',
        ],
        b"",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"");
}

#[test]
fn ldir_self_copy_then_halt() {
    // LDIR; HALT — the halt is terminal because nothing can interrupt.
    let mut machine = machine_with(&[0xED, 0xB0, 0x76], b"");
    machine.memory_mut().load(0x2000, &[0xDE, 0xAD, 0xBE, 0xEF]);
    {
        let regs = &mut machine.cpu_mut().regs;
        regs.set_hl(0x2000);
        regs.set_de(0x2100);
        regs.set_bc(0x0004);
    }

    let err = machine.run(0x0100).unwrap_err();
    assert!(matches!(err, MachineError::Halted { .. }), "{err}");

    for (i, &expect) in [0xDE, 0xAD, 0xBE, 0xEF].iter().enumerate() {
        assert_eq!(machine.memory().read8(0x2100 + i as u16), expect);
    }
    let regs = &machine.cpu().regs;
    assert_eq!(regs.hl(), 0x2004);
    assert_eq!(regs.de(), 0x2104);
    assert_eq!(regs.bc(), 0x0000);
    assert_eq!(regs.f & 0x04, 0, "P/V clear once BC reaches zero");
    assert_eq!(regs.f & 0x10, 0, "H clear");
    assert_eq!(regs.f & 0x02, 0, "N clear");
}

#[test]
fn bdos_trap_preserves_stack_discipline() {
    // Marker sits just below where CALL pushes its return address; the
    // trap must pop exactly those two bytes and resume after the CALL.
    let mut machine = machine_with(
        &[
            0x31, 0xF0, 0x00, // LD SP, 0x00F0
            0x0E, 0x02, // LD C, 2
            0x1E, b'A', // LD E, 'A'
            0xCD, 0x05, 0x00, // CALL 5
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"",
    );
    machine.memory_mut().load(0x00EC, &[0x55, 0xAA]);

    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"A");
    assert_eq!(machine.cpu().regs.sp, 0x00F0, "net pop of exactly two bytes");
    assert_eq!(machine.memory().read8(0x00EC), 0x55);
    assert_eq!(machine.memory().read8(0x00ED), 0xAA);
}

#[test]
fn bdos_entry_reachable_through_tpa_ceiling_word() {
    // LHLD 0x0006 / JP (HL) with a hand-pushed return address, the way
    // the CCP sizes and calls the BDOS.
    let mut machine = machine_with(
        &[
            0x0E, 0x02, // LD C, 2
            0x1E, b'X', // LD E, 'X'
            0x21, 0x0C, 0x01, // LD HL, 0x010C (return address)
            0xE5, // PUSH HL
            0x2A, 0x06, 0x00, // LD HL, (0x0006)
            0xE9, // JP (HL)
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"X");
}

#[test]
fn console_read_echoes() {
    let mut machine = machine_with(
        &[
            0x0E, 0x01, // LD C, 1
            0xCD, 0x05, 0x00, // CALL 5
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"Z",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"Z", "C_READ echoes");
    assert_eq!(machine.cpu().regs.a, b'Z');
}

#[test]
fn buffered_line_input() {
    // C_READSTR into a buffer at 0x0200 with room for 8 bytes.
    let mut machine = machine_with(
        &[
            0x0E, 0x0A, // LD C, 0x0A
            0x11, 0x00, 0x02, // LD DE, 0x0200
            0xCD, 0x05, 0x00, // CALL 5
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"hello\n",
    );
    machine.memory_mut().write8(0x0200, 8);
    machine.run(0x0100).unwrap();

    let mem = machine.memory();
    assert_eq!(mem.read8(0x0201), 5, "length byte");
    let bytes: Vec<u8> = (0..5).map(|i| mem.read8(0x0202 + i)).collect();
    assert_eq!(bytes, b"hello");
}

#[test]
fn console_status_reflects_pending_input() {
    let program = &[
        0x0E, 0x0B, // LD C, 0x0B
        0xCD, 0x05, 0x00, // CALL 5
        0xC3, 0x00, 0x00, // JP 0
    ];

    let mut machine = machine_with(program, b"Q");
    machine.run(0x0100).unwrap();
    assert_eq!(machine.cpu().regs.a, 0xFF);

    let mut machine = machine_with(program, b"");
    machine.run(0x0100).unwrap();
    assert_eq!(machine.cpu().regs.a, 0x00);
}

#[test]
fn version_word_is_cpm_22() {
    let mut machine = machine_with(&[0x0E, 0x0C, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00], b"");
    machine.run(0x0100).unwrap();
    let regs = &machine.cpu().regs;
    assert_eq!(regs.hl(), 0x0022);
    assert_eq!(regs.a, 0x22, "A mirrors L");
    assert_eq!(regs.b, 0x00, "B mirrors H");
}

#[test]
fn bios_conout_writes_register_c() {
    // CALL straight into the CONOUT jump slot.
    let mut machine = machine_with(
        &[
            0x0E, b'C', // LD C, 'C'
            0xCD, 0x0C, 0xFC, // CALL 0xFC0C (slot 4)
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.console_output(), b"C");
}

#[test]
fn bios_wboot_vector_is_fatal() {
    // Only the console slots are serviced; WBOOT (slot 1) is not.
    let mut machine = machine_with(&[0xC3, 0x03, 0xFC], b""); // JP WBOOT slot
    let err = machine.run(0x0100).unwrap_err();
    assert!(matches!(err, MachineError::UnsupportedBiosCall { vector: 1, .. }), "{err}");
}

#[test]
fn unemulated_bios_vector_is_fatal() {
    // Slot 8 (HOME) has no host implementation.
    let mut machine = machine_with(&[0xCD, 0x18, 0xFC], b"");
    let err = machine.run(0x0100).unwrap_err();
    assert!(matches!(err, MachineError::UnsupportedBiosCall { vector: 8, .. }), "{err}");
}

#[test]
fn unemulated_bdos_function_is_fatal() {
    let mut machine = machine_with(&[0x0E, 0x6B, 0xCD, 0x05, 0x00], b"");
    let err = machine.run(0x0100).unwrap_err();
    assert!(
        matches!(err, MachineError::UnsupportedBdosCall { function: 0x6B, .. }),
        "{err}"
    );
}

#[test]
fn illegal_opcode_is_fatal_with_diagnostics() {
    let mut machine = machine_with(&[0xED, 0x77], b"");
    let err = machine.run(0x0100).unwrap_err();
    let text = err.to_string();
    assert!(matches!(err, MachineError::IllegalOpcode { pc: 0x0100, .. }));
    assert!(text.contains("0100"), "{text}");
    assert!(text.contains("ED 77"), "{text}");
}

#[test]
fn halt_with_interrupts_enabled_is_still_terminal() {
    // EI; HALT: no interrupt source exists, so this can never resume.
    let mut machine = machine_with(&[0xFB, 0x00, 0x76], b"");
    let err = machine.run(0x0100).unwrap_err();
    assert!(matches!(err, MachineError::Halted { .. }), "{err}");
}

#[test]
fn drv_allreset_restores_defaults() {
    // DRV_ALLRESET answers 0 and resets the DMA pointer to 0x0080.
    let mut machine = machine_with(&[0x0E, 0x0D, 0xCD, 0x05, 0x00, 0xC3, 0x00, 0x00], b"");
    machine.run(0x0100).unwrap();
    assert_eq!(machine.cpu().regs.a, 0x00);
}

#[test]
fn user_number_get_and_set() {
    // Set user 7, read it back.
    let mut machine = machine_with(
        &[
            0x0E, 0x20, // LD C, 0x20
            0x1E, 0x07, // LD E, 7
            0xCD, 0x05, 0x00, // CALL 5
            0x0E, 0x20, // LD C, 0x20
            0x1E, 0xFF, // LD E, 0xFF
            0xCD, 0x05, 0x00, // CALL 5
            0xC3, 0x00, 0x00, // JP 0
        ],
        b"",
    );
    machine.run(0x0100).unwrap();
    assert_eq!(machine.cpu().regs.a, 7);
}

#[test]
fn boot_seeding_layout() {
    let machine = machine_with(&[], b"");
    let mem = machine.memory();

    // Page zero: warm boot vector, drive, IOBYTE, BDOS vector.
    assert_eq!(mem.read8(0x0000), 0xC3);
    assert_eq!(mem.read16(0x0001), 0x0003);
    assert_eq!(mem.read8(0x0003), 0x00);
    assert_eq!(mem.read8(0x0004), 0x00);
    assert_eq!(mem.read8(0x0005), 0xC3);
    assert_eq!(mem.read16(0x0006), machine.bdos_entry());

    // The BDOS entry sits inside the BIOS region, above the jump table.
    assert!(machine.bdos_entry() >= 0xFC00 + 17 * 3);

    // All 17 BIOS slots are self-pointing jumps.
    for slot in 0u16..17 {
        let addr = 0xFC00 + slot * 3;
        assert_eq!(mem.read8(addr), 0xC3);
        assert_eq!(mem.read16(addr + 1), addr);
    }

    // Initial stack and function register.
    assert_eq!(machine.cpu().regs.sp, 0x0100);
    assert_eq!(machine.cpu().regs.c, 0x00);
}
