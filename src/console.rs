use std::io::{self, Write};

/// ANSI foreground codes indexed by VGA color number.
const ANSI_FG: [u8; 16] = [
    30, 34, 32, 36, 31, 35, 33, 37, 90, 94, 92, 96, 91, 95, 93, 97,
];

/// Text output device handed to running programs.
///
/// Programs print through the capability table, which forwards here. The
/// methods mirror what a VGA text console offers; implementations decide
/// what clearing or coloring means for their medium.
pub trait Console {
    fn print(&mut self, text: &str);
    fn put_char(&mut self, c: char);
    fn clear(&mut self);
    fn backspace(&mut self);
    /// Sets the VGA color pair for subsequent output; values are masked to 0..16.
    fn set_color(&mut self, foreground: u8, background: u8);
}

/// Console that renders to stdout with ANSI escapes.
#[derive(Debug, Default)]
pub struct StdConsole;

impl StdConsole {
    pub fn new() -> StdConsole {
        StdConsole
    }

    fn emit(&self, text: &str) {
        // stdout going away leaves nowhere to report, so drop the error
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

impl Console for StdConsole {
    fn print(&mut self, text: &str) {
        self.emit(text);
    }

    fn put_char(&mut self, c: char) {
        self.emit(c.encode_utf8(&mut [0u8; 4]));
    }

    fn clear(&mut self) {
        self.emit("\x1b[2J\x1b[H");
    }

    fn backspace(&mut self) {
        self.emit("\x08 \x08");
    }

    fn set_color(&mut self, foreground: u8, background: u8) {
        let fg = ANSI_FG[(foreground & 0x0F) as usize];
        let bg = ANSI_FG[(background & 0x0F) as usize] + 10;
        self.emit(&format!("\x1b[{fg};{bg}m"));
    }
}

/// Console that captures everything into a string, for headless use.
#[derive(Debug, Default)]
pub struct BufferConsole {
    buffer: String,
}

impl BufferConsole {
    pub fn new() -> BufferConsole {
        BufferConsole::default()
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn into_string(self) -> String {
        self.buffer
    }
}

impl Console for BufferConsole {
    fn print(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    fn put_char(&mut self, c: char) {
        self.buffer.push(c);
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }

    fn backspace(&mut self) {
        self.buffer.pop();
    }

    fn set_color(&mut self, _foreground: u8, _background: u8) {}
}

/// Clonable capture console for tests that route output through the
/// installed session.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub(crate) struct SharedConsole(std::sync::Arc<std::sync::Mutex<String>>);

#[cfg(test)]
impl SharedConsole {
    pub(crate) fn contents(&self) -> String {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn take(&self) -> String {
        std::mem::take(&mut *self.0.lock().unwrap())
    }
}

#[cfg(test)]
impl Console for SharedConsole {
    fn print(&mut self, text: &str) {
        self.0.lock().unwrap().push_str(text);
    }

    fn put_char(&mut self, c: char) {
        self.0.lock().unwrap().push(c);
    }

    fn clear(&mut self) {
        self.0.lock().unwrap().clear();
    }

    fn backspace(&mut self) {
        self.0.lock().unwrap().pop();
    }

    fn set_color(&mut self, _foreground: u8, _background: u8) {}
}

#[test]
fn buffer_console_captures_prints_and_chars() {
    let mut console = BufferConsole::new();
    console.print("hi ");
    console.put_char('!');
    assert_eq!(console.contents(), "hi !");
}

#[test]
fn buffer_console_backspace_drops_the_last_char() {
    let mut console = BufferConsole::new();
    console.print("abc");
    console.backspace();
    assert_eq!(console.contents(), "ab");
    console.clear();
    assert_eq!(console.contents(), "");
}
