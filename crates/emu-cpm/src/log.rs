//! Diagnostic log sink.
//!
//! Guest output goes to stdout; everything the emulator says about itself
//! goes through here. The sink is stderr by default, or `emu-cpm.log` when
//! the `logfile` feature is compiled in.

use std::fs::File;
use std::io::{self, BufWriter, Write};

/// Where diagnostic lines end up.
pub struct Log {
    sink: Sink,
}

enum Sink {
    Stderr,
    File(BufWriter<File>),
    Discard,
}

impl Log {
    /// Stderr sink.
    #[must_use]
    pub fn stderr() -> Self {
        Self { sink: Sink::Stderr }
    }

    /// File sink; falls back to stderr if the file cannot be created.
    #[must_use]
    pub fn file(path: &str) -> Self {
        match File::create(path) {
            Ok(file) => Self {
                sink: Sink::File(BufWriter::new(file)),
            },
            Err(_) => Self::stderr(),
        }
    }

    /// Swallow everything. Used by tests.
    #[must_use]
    pub fn discard() -> Self {
        Self {
            sink: Sink::Discard,
        }
    }

    /// The sink a host invocation should use, honoring the build-time
    /// `logfile` switch.
    #[must_use]
    pub fn for_host() -> Self {
        if cfg!(feature = "logfile") {
            Self::file("emu-cpm.log")
        } else {
            Self::stderr()
        }
    }

    /// Write one diagnostic line. Best-effort: sink errors are ignored.
    pub fn line(&mut self, text: &str) {
        match &mut self.sink {
            Sink::Stderr => {
                let _ = writeln!(io::stderr(), "{text}");
            }
            Sink::File(file) => {
                let _ = writeln!(file, "{text}");
            }
            Sink::Discard => {}
        }
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        if let Sink::File(file) = &mut self.sink {
            let _ = file.flush();
        }
    }
}
