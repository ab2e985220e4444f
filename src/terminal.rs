//! Raw-mode terminal control and keystroke decoding.
//!
//! The terminal snapshots the original attributes on construction and
//! restores them on drop, so a panicking or exiting shell never leaves the
//! user's terminal in raw mode. External commands run with the terminal
//! restored to cooked mode; see [`Terminal::restore_cooked`] and
//! [`Terminal::enter_raw`].

use std::io::{self, Write};

/// A decoded input event from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    /// An ordinary byte, including anything ≥ 0x80.
    Char(u8),
    Enter,
    Backspace,
    Delete,
    Tab,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
    Home,
    End,
    CtrlC,
    CtrlD,
    /// An escape sequence this shell does not handle.
    Unknown,
}

/// Terminal state: attribute snapshots plus the output stream used for all
/// editor drawing.
pub struct Terminal {
    out: Box<dyn Write>,
    orig: Option<libc::termios>,
    raw: Option<libc::termios>,
    raw_active: bool,
    is_tty: bool,
}

impl Terminal {
    /// Capture the terminal attributes and enter raw mode, iff standard
    /// input is a terminal. Batch input (a pipe or file on stdin) leaves the
    /// terminal alone and flips the editor into line-buffer mode.
    pub fn new() -> io::Result<Self> {
        let is_tty = unsafe { libc::isatty(libc::STDIN_FILENO) } == 1;
        let mut term = Terminal {
            out: Box::new(io::stdout()),
            orig: None,
            raw: None,
            raw_active: false,
            is_tty,
        };
        if is_tty {
            let orig = tcgetattr(libc::STDIN_FILENO)?;
            term.orig = Some(orig);
            term.raw = Some(make_raw(orig));
            term.enter_raw()?;
        }
        Ok(term)
    }

    /// Build a terminal over an arbitrary writer, leaving the process tty
    /// untouched. Raw/cooked transitions become no-ops.
    pub fn with_writer(out: Box<dyn Write>, is_tty: bool) -> Self {
        Terminal {
            out,
            orig: None,
            raw: None,
            raw_active: false,
            is_tty,
        }
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Switch to raw attributes. Idempotent; a no-op off-tty.
    pub fn enter_raw(&mut self) -> io::Result<()> {
        if let Some(raw) = self.raw {
            if !self.raw_active {
                tcsetattr(libc::STDIN_FILENO, &raw)?;
                self.raw_active = true;
            }
        }
        Ok(())
    }

    /// Restore the original attributes. Idempotent; a no-op off-tty.
    pub fn restore_cooked(&mut self) -> io::Result<()> {
        if let Some(orig) = self.orig {
            if self.raw_active {
                tcsetattr(libc::STDIN_FILENO, &orig)?;
                self.raw_active = false;
            }
        }
        Ok(())
    }

    /// Block for the next key event on standard input.
    ///
    /// Raw-mode bytes are decoded into the full [`Key`] set; in non-tty mode
    /// only `0x0A` is special (end of line) and end-of-input reads as
    /// [`Key::CtrlD`].
    pub fn read_key(&mut self) -> io::Result<Key> {
        let first = match read_byte()? {
            Some(b) => b,
            None => return Ok(Key::CtrlD),
        };
        if !self.is_tty {
            return Ok(decode_plain(first));
        }
        Ok(decode_raw(first, &mut || read_byte().ok().flatten()))
    }

    /// Write bytes to the terminal and flush immediately.
    pub fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.out.write_all(bytes)?;
        self.out.flush()
    }

    /// Emit BEL.
    pub fn bell(&mut self) -> io::Result<()> {
        self.write(b"\x07")
    }

    /// Return to column zero and clear to end of line.
    pub fn clear_line(&mut self) -> io::Result<()> {
        self.write(b"\r\x1b[K")
    }

    pub fn move_cursor_left(&mut self, n: usize) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.write(format!("\x1b[{n}D").as_bytes())
    }

    pub fn move_cursor_right(&mut self, n: usize) -> io::Result<()> {
        if n == 0 {
            return Ok(());
        }
        self.write(format!("\x1b[{n}C").as_bytes())
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = self.restore_cooked();
    }
}

/// Read one byte from standard input, retrying on EINTR. `None` is
/// end-of-input.
fn read_byte() -> io::Result<Option<u8>> {
    let mut buf = [0u8; 1];
    loop {
        let n = unsafe { libc::read(libc::STDIN_FILENO, buf.as_mut_ptr().cast(), 1) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if n == 0 {
            return Ok(None);
        }
        return Ok(Some(buf[0]));
    }
}

/// Decode one raw-mode key. `next` supplies further bytes of an escape
/// sequence and returns `None` when the stream runs dry mid-sequence.
fn decode_raw(first: u8, next: &mut dyn FnMut() -> Option<u8>) -> Key {
    match first {
        0x03 => Key::CtrlC,
        0x04 => Key::CtrlD,
        0x09 => Key::Tab,
        0x0A | 0x0D => Key::Enter,
        0x08 | 0x7F => Key::Backspace,
        0x1B => decode_escape(next),
        other => Key::Char(other),
    }
}

fn decode_escape(next: &mut dyn FnMut() -> Option<u8>) -> Key {
    match next() {
        Some(b'[') => match next() {
            Some(b'A') => Key::ArrowUp,
            Some(b'B') => Key::ArrowDown,
            Some(b'C') => Key::ArrowRight,
            Some(b'D') => Key::ArrowLeft,
            Some(b'H') => Key::Home,
            Some(b'F') => Key::End,
            Some(b'3') => {
                // ESC [ 3 ~
                let _ = next();
                Key::Delete
            }
            _ => Key::Unknown,
        },
        _ => Key::Unknown,
    }
}

/// Non-tty decoding: newline ends the line, everything else is a plain byte.
fn decode_plain(b: u8) -> Key {
    match b {
        0x0A => Key::Enter,
        other => Key::Char(other),
    }
}

fn tcgetattr(fd: libc::c_int) -> io::Result<libc::termios> {
    let mut attrs = unsafe { std::mem::zeroed::<libc::termios>() };
    if unsafe { libc::tcgetattr(fd, &mut attrs) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(attrs)
}

fn tcsetattr(fd: libc::c_int, attrs: &libc::termios) -> io::Result<()> {
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, attrs) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Raw attributes: no CR→NL input translation, no XON/XOFF, no echo, no
/// canonical buffering, no signal keys, no extended input processing.
/// Output processing stays on so `\n` still reaches the screen as CRLF.
fn make_raw(orig: libc::termios) -> libc::termios {
    let mut raw = orig;
    raw.c_iflag &= !(libc::ICRNL | libc::IXON);
    raw.c_lflag &= !(libc::ECHO | libc::ICANON | libc::ISIG | libc::IEXTEN);
    raw.c_cc[libc::VMIN] = 1;
    raw.c_cc[libc::VTIME] = 0;
    raw
}
