//! CP/M 2.2 emulator binary.
//!
//! With no program argument, boots `CPM.SYS` cold into the CCP. With one,
//! loads it at the standard TPA entry and runs it as a transient program.

use std::path::PathBuf;
use std::process;

use emu_cpm::{Machine, MachineConfig};

/// Where a system image loads and starts: CCP base plus the relocation
/// bias of the shipped CPM.SYS build.
const SYSTEM_ENTRY: u16 = 0x3400 + 0xA800;
/// Transient program area entry.
const TPA_ENTRY: u16 = 0x0100;

struct CliArgs {
    program: Option<PathBuf>,
    disk_root: PathBuf,
    bios_base: u16,
    trace: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        program: None,
        disk_root: PathBuf::from("."),
        bios_base: 0xFC00,
        trace: false,
    };

    let mut positional = 0usize;
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--disk-root" => {
                i += 1;
                if let Some(dir) = args.get(i) {
                    cli.disk_root = PathBuf::from(dir);
                }
            }
            "--bios-base" => {
                i += 1;
                let parsed = args
                    .get(i)
                    .and_then(|s| u16::from_str_radix(s.trim_start_matches("0x"), 16).ok());
                match parsed {
                    Some(base) => cli.bios_base = base,
                    None => {
                        eprintln!("--bios-base expects a hex address");
                        process::exit(1);
                    }
                }
            }
            "--trace" => {
                cli.trace = true;
            }
            "--help" | "-h" => {
                eprintln!("Usage: emu-cpm [OPTIONS] [program.com]");
                eprintln!();
                eprintln!("With no program, boots CPM.SYS from the working directory.");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --disk-root <dir>   Directory holding the drive folders A-P [default: .]");
                eprintln!("  --bios-base <hex>   Base of the BIOS jump table [default: FC00]");
                eprintln!("  --trace             Log every instruction and system call");
                process::exit(0);
            }
            flag if flag.starts_with('-') => {
                eprintln!("Unknown argument: {flag}");
                process::exit(1);
            }
            program => {
                positional += 1;
                if positional > 1 {
                    eprintln!("Expected at most one program file");
                    process::exit(1);
                }
                cli.program = Some(PathBuf::from(program));
            }
        }
        i += 1;
    }

    cli
}

fn main() {
    let cli = parse_args();
    let config = MachineConfig {
        bios_base: cli.bios_base,
        disk_root: cli.disk_root,
        trace: cli.trace,
    };
    let mut machine = Machine::new(&config);

    let (image, entry) = match &cli.program {
        Some(path) => (path.clone(), TPA_ENTRY),
        None => (PathBuf::from("CPM.SYS"), SYSTEM_ENTRY),
    };

    if let Err(err) = machine.load_image(&image, entry) {
        eprintln!("{err}");
        process::exit(1);
    }
    if let Err(err) = machine.run(entry) {
        eprintln!("{err}");
        process::exit(1);
    }
}
