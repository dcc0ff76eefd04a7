//! Host console.
//!
//! CONST and C_STAT need a non-destructive "is a byte waiting?" poll, which
//! plain blocking stdin cannot answer. A pump thread drains host stdin into
//! a channel; a one-byte pushback slot in front of the channel gives the
//! peek-and-putback behavior the polling calls rely on. The scripted
//! variant replaces both ends with in-memory buffers for tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

/// Console input source plus output sink.
pub struct Console {
    input: Input,
    output: Output,
}

enum Input {
    /// Live stdin behind a pump thread.
    Host {
        rx: Receiver<u8>,
        /// A byte taken off the channel by a poll but not yet consumed.
        pending: Option<u8>,
    },
    /// Canned bytes for tests.
    Script(VecDeque<u8>),
}

enum Output {
    Stdout(io::Stdout),
    Capture(Vec<u8>),
}

impl Console {
    /// Console wired to the process stdin/stdout.
    #[must_use]
    pub fn host() -> Self {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let stdin = io::stdin();
            for byte in stdin.lock().bytes() {
                let Ok(byte) = byte else { break };
                if tx.send(byte).is_err() {
                    break;
                }
            }
        });
        Self {
            input: Input::Host { rx, pending: None },
            output: Output::Stdout(io::stdout()),
        }
    }

    /// Console that reads from `input` and captures output in memory.
    #[must_use]
    pub fn scripted(input: &[u8]) -> Self {
        Self {
            input: Input::Script(input.iter().copied().collect()),
            output: Output::Capture(Vec::new()),
        }
    }

    /// Non-destructive poll: is at least one byte waiting?
    pub fn status(&mut self) -> bool {
        match &mut self.input {
            Input::Host { rx, pending } => {
                if pending.is_some() {
                    return true;
                }
                match rx.try_recv() {
                    Ok(byte) => {
                        *pending = Some(byte);
                        true
                    }
                    Err(TryRecvError::Empty | TryRecvError::Disconnected) => false,
                }
            }
            Input::Script(data) => !data.is_empty(),
        }
    }

    /// Blocking single-byte read.
    pub fn read_byte(&mut self) -> io::Result<u8> {
        match &mut self.input {
            Input::Host { rx, pending } => {
                if let Some(byte) = pending.take() {
                    return Ok(byte);
                }
                rx.recv().map_err(|_| {
                    io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed")
                })
            }
            Input::Script(data) => data.pop_front().ok_or_else(|| {
                io::Error::new(io::ErrorKind::UnexpectedEof, "script input exhausted")
            }),
        }
    }

    /// Read a line, consuming through the newline, returning at most `max`
    /// bytes of it (terminator excluded).
    pub fn read_line(&mut self, max: usize) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        loop {
            let byte = self.read_byte()?;
            match byte {
                b'\n' => break,
                b'\r' => {
                    // Swallow a following LF if one is already waiting.
                    if self.status() {
                        let next = self.read_byte()?;
                        if next != b'\n' {
                            self.push_back(next);
                        }
                    }
                    break;
                }
                _ => line.push(byte),
            }
        }
        line.truncate(max);
        Ok(line)
    }

    pub fn write_byte(&mut self, byte: u8) -> io::Result<()> {
        match &mut self.output {
            Output::Stdout(stdout) => {
                stdout.write_all(&[byte])?;
                stdout.flush()
            }
            Output::Capture(buffer) => {
                buffer.push(byte);
                Ok(())
            }
        }
    }

    /// Captured output of a scripted console; empty for the host console.
    #[must_use]
    pub fn captured(&self) -> &[u8] {
        match &self.output {
            Output::Capture(buffer) => buffer,
            Output::Stdout(_) => &[],
        }
    }

    fn push_back(&mut self, byte: u8) {
        match &mut self.input {
            Input::Host { pending, .. } => *pending = Some(byte),
            Input::Script(data) => data.push_front(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_read_and_status() {
        let mut console = Console::scripted(b"AB");
        assert!(console.status());
        assert_eq!(console.read_byte().unwrap(), b'A');
        assert_eq!(console.read_byte().unwrap(), b'B');
        assert!(!console.status());
        assert!(console.read_byte().is_err());
    }

    #[test]
    fn status_does_not_consume() {
        let mut console = Console::scripted(b"X");
        assert!(console.status());
        assert!(console.status());
        assert_eq!(console.read_byte().unwrap(), b'X');
    }

    #[test]
    fn read_line_stops_at_newline() {
        let mut console = Console::scripted(b"hello\nrest");
        assert_eq!(console.read_line(80).unwrap(), b"hello");
        assert_eq!(console.read_byte().unwrap(), b'r');
    }

    #[test]
    fn read_line_truncates_to_max() {
        let mut console = Console::scripted(b"abcdefgh\n");
        assert_eq!(console.read_line(3).unwrap(), b"abc");
        // The rest of the line is consumed either way.
        assert!(!console.status());
    }

    #[test]
    fn read_line_handles_crlf() {
        let mut console = Console::scripted(b"ok\r\nZ");
        assert_eq!(console.read_line(80).unwrap(), b"ok");
        assert_eq!(console.read_byte().unwrap(), b'Z');
    }

    #[test]
    fn captured_output() {
        let mut console = Console::scripted(b"");
        console.write_byte(b'H').unwrap();
        console.write_byte(b'I').unwrap();
        assert_eq!(console.captured(), b"HI");
    }
}
