//! The interactive line editor: buffer and cursor maintenance, history
//! navigation, and two-stage TAB completion.

use crate::builtin;
use crate::history::History;
use crate::resolver::PathResolver;
use crate::terminal::{Key, Terminal};
use std::io;

const PROMPT: &[u8] = b"$ ";

/// What the REPL should do after a key has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ContinueEditing,
    /// The line is complete; take the buffer.
    Submit,
    /// End of input on an empty line.
    Eof,
}

/// Line editor state. The editor owns its buffer and the session history;
/// the terminal and resolver are borrowed per call so the executor can use
/// them between lines.
pub struct LineEditor {
    buffer: Vec<u8>,
    cursor: usize,
    history: History,
    /// `None` while editing fresh text; `Some(k)` while viewing the
    /// (k+1)-th most recent history entry.
    history_index: Option<usize>,
    /// The in-progress line, preserved while navigating history.
    saved_line: Vec<u8>,
    last_key_was_tab: bool,
}

impl LineEditor {
    pub fn new() -> Self {
        LineEditor {
            buffer: Vec::new(),
            cursor: 0,
            history: History::new(),
            history_index: None,
            saved_line: Vec::new(),
            last_key_was_tab: false,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Record a submitted line in the history.
    pub fn record(&mut self, line: &str) {
        self.history.push(line);
    }

    #[cfg(test)]
    fn buffer_text(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.cursor
    }

    /// Read one line. Prints the prompt when interactive, then feeds keys to
    /// [`LineEditor::handle_key`] until the line is submitted (`Some`) or
    /// input ends (`None`).
    pub fn read_line(
        &mut self,
        term: &mut Terminal,
        resolver: &PathResolver,
    ) -> io::Result<Option<String>> {
        self.buffer.clear();
        self.cursor = 0;
        self.history_index = None;
        self.saved_line.clear();
        self.last_key_was_tab = false;
        if term.is_tty() {
            term.write(PROMPT)?;
        }
        loop {
            let key = term.read_key()?;
            match self.handle_key(key, term, resolver)? {
                Action::ContinueEditing => {}
                Action::Submit => {
                    let line = String::from_utf8_lossy(&self.buffer).into_owned();
                    tracing::debug!(line = %line, "line submitted");
                    return Ok(Some(line));
                }
                Action::Eof => return Ok(None),
            }
        }
    }

    /// Apply one key event to the editor state.
    ///
    /// Terminal effects only happen in tty mode; off-tty the editor is a
    /// silent line buffer.
    pub fn handle_key(
        &mut self,
        key: Key,
        term: &mut Terminal,
        resolver: &PathResolver,
    ) -> io::Result<Action> {
        let action = match key {
            Key::Char(b) => {
                self.insert_byte(b, term)?;
                Action::ContinueEditing
            }
            Key::Enter => {
                if term.is_tty() {
                    term.write(b"\n")?;
                }
                Action::Submit
            }
            Key::Backspace => {
                self.backspace(term)?;
                Action::ContinueEditing
            }
            Key::Delete => {
                self.delete_at_cursor(term)?;
                Action::ContinueEditing
            }
            Key::ArrowLeft => {
                if self.cursor > 0 {
                    self.cursor -= 1;
                    if term.is_tty() {
                        term.move_cursor_left(1)?;
                    }
                }
                Action::ContinueEditing
            }
            Key::ArrowRight => {
                if self.cursor < self.buffer.len() {
                    self.cursor += 1;
                    if term.is_tty() {
                        term.move_cursor_right(1)?;
                    }
                }
                Action::ContinueEditing
            }
            Key::Home => {
                if term.is_tty() {
                    term.move_cursor_left(self.cursor)?;
                }
                self.cursor = 0;
                Action::ContinueEditing
            }
            Key::End => {
                if term.is_tty() {
                    term.move_cursor_right(self.buffer.len() - self.cursor)?;
                }
                self.cursor = self.buffer.len();
                Action::ContinueEditing
            }
            Key::ArrowUp => {
                self.history_up(term)?;
                Action::ContinueEditing
            }
            Key::ArrowDown => {
                self.history_down(term)?;
                Action::ContinueEditing
            }
            Key::Tab => {
                self.complete(term, resolver)?;
                Action::ContinueEditing
            }
            Key::CtrlD => {
                if self.buffer.is_empty() {
                    Action::Eof
                } else if !term.is_tty() {
                    // Batch input without a trailing newline still runs its
                    // final line.
                    Action::Submit
                } else {
                    term.bell()?;
                    Action::ContinueEditing
                }
            }
            Key::CtrlC | Key::Unknown => {
                if term.is_tty() {
                    term.bell()?;
                }
                Action::ContinueEditing
            }
        };
        self.last_key_was_tab = matches!(key, Key::Tab);
        Ok(action)
    }

    fn insert_byte(&mut self, b: u8, term: &mut Terminal) -> io::Result<()> {
        if self.cursor == self.buffer.len() {
            self.buffer.push(b);
            self.cursor += 1;
            if term.is_tty() {
                term.write(&[b])?;
            }
        } else {
            self.buffer.insert(self.cursor, b);
            self.cursor += 1;
            if term.is_tty() {
                term.write(&self.buffer[self.cursor - 1..])?;
                term.move_cursor_left(self.buffer.len() - self.cursor)?;
            }
        }
        Ok(())
    }

    fn backspace(&mut self, term: &mut Terminal) -> io::Result<()> {
        if self.cursor == 0 {
            return Ok(());
        }
        self.cursor -= 1;
        self.buffer.remove(self.cursor);
        if term.is_tty() {
            term.write(b"\x08")?;
            term.write(&self.buffer[self.cursor..])?;
            term.write(b" \x08")?;
            term.move_cursor_left(self.buffer.len() - self.cursor)?;
        }
        Ok(())
    }

    fn delete_at_cursor(&mut self, term: &mut Terminal) -> io::Result<()> {
        if self.cursor >= self.buffer.len() {
            return Ok(());
        }
        self.buffer.remove(self.cursor);
        if term.is_tty() {
            term.write(&self.buffer[self.cursor..])?;
            term.write(b" \x08")?;
            term.move_cursor_left(self.buffer.len() - self.cursor)?;
        }
        Ok(())
    }

    fn history_up(&mut self, term: &mut Terminal) -> io::Result<()> {
        if self.history.is_empty() {
            return self.bell_if_tty(term);
        }
        match self.history_index {
            None => {
                self.saved_line = self.buffer.clone();
                self.history_index = Some(0);
                self.show_history_entry(0, term)
            }
            Some(k) if k + 1 < self.history.len() => {
                self.history_index = Some(k + 1);
                self.show_history_entry(k + 1, term)
            }
            Some(_) => self.bell_if_tty(term),
        }
    }

    fn history_down(&mut self, term: &mut Terminal) -> io::Result<()> {
        match self.history_index {
            None => self.bell_if_tty(term),
            Some(0) => {
                self.history_index = None;
                let saved = std::mem::take(&mut self.saved_line);
                self.replace_line(saved, term)
            }
            Some(k) => {
                self.history_index = Some(k - 1);
                self.show_history_entry(k - 1, term)
            }
        }
    }

    /// Display the (k+1)-th most recent entry.
    fn show_history_entry(&mut self, k: usize, term: &mut Terminal) -> io::Result<()> {
        let index = self.history.len() - 1 - k;
        let entry = self.history.get(index).unwrap_or("").as_bytes().to_vec();
        self.replace_line(entry, term)
    }

    /// Swap the whole visible line: back to column start, clear to EOL,
    /// write the new text, cursor to its end.
    fn replace_line(&mut self, new: Vec<u8>, term: &mut Terminal) -> io::Result<()> {
        if term.is_tty() {
            term.move_cursor_left(self.cursor)?;
            term.write(b"\x1b[K")?;
            term.write(&new)?;
        }
        self.buffer = new;
        self.cursor = self.buffer.len();
        Ok(())
    }

    /// TAB completion over builtin names and `PATH` executables. Only the
    /// first word of the line completes.
    fn complete(&mut self, term: &mut Terminal, resolver: &PathResolver) -> io::Result<()> {
        if !term.is_tty() {
            return Ok(());
        }
        if self.buffer[..self.cursor].contains(&b' ') {
            return term.bell();
        }
        let prefix = String::from_utf8_lossy(&self.buffer[..self.cursor]).into_owned();
        if prefix.is_empty() {
            return term.bell();
        }

        let mut candidates: Vec<String> = builtin::NAMES
            .iter()
            .filter(|name| name.starts_with(&prefix))
            .map(|name| name.to_string())
            .collect();
        for name in resolver.completions(&prefix) {
            if !candidates.contains(&name) {
                candidates.push(name);
            }
        }

        match candidates.len() {
            0 => term.bell(),
            1 => {
                let mut head = candidates[0].clone().into_bytes();
                head.push(b' ');
                self.replace_head(head, term)
            }
            _ => {
                let lcp = longest_common_prefix(&candidates);
                if lcp.len() > prefix.len() {
                    self.insert_extension(lcp.as_bytes()[prefix.len()..].to_vec(), term)
                } else if self.last_key_was_tab {
                    candidates.sort();
                    let listing = candidates.join("  ");
                    term.write(b"\n")?;
                    term.write(listing.as_bytes())?;
                    term.write(b"\n")?;
                    term.write(PROMPT)?;
                    term.write(&self.buffer)?;
                    term.move_cursor_left(self.buffer.len() - self.cursor)
                } else {
                    term.bell()
                }
            }
        }
    }

    /// Replace `buffer[..cursor]` with `head`, keeping the tail, and redraw
    /// the line.
    fn replace_head(&mut self, head: Vec<u8>, term: &mut Terminal) -> io::Result<()> {
        let mut new = head;
        let new_cursor = new.len();
        new.extend_from_slice(&self.buffer[self.cursor..]);
        term.clear_line()?;
        term.write(PROMPT)?;
        term.write(&new)?;
        term.move_cursor_left(new.len() - new_cursor)?;
        self.buffer = new;
        self.cursor = new_cursor;
        Ok(())
    }

    /// Insert completion bytes at the cursor and redraw the tail.
    fn insert_extension(&mut self, ext: Vec<u8>, term: &mut Terminal) -> io::Result<()> {
        let start = self.cursor;
        self.buffer.splice(start..start, ext.iter().copied());
        self.cursor += ext.len();
        term.write(&self.buffer[start..])?;
        term.move_cursor_left(self.buffer.len() - self.cursor)?;
        Ok(())
    }

    fn bell_if_tty(&self, term: &mut Terminal) -> io::Result<()> {
        if term.is_tty() {
            term.bell()?;
        }
        Ok(())
    }
}

impl Default for LineEditor {
    fn default() -> Self {
        Self::new()
    }
}

/// Longest common prefix of a non-empty candidate set.
fn longest_common_prefix(items: &[String]) -> String {
    let mut prefix = items.first().cloned().unwrap_or_default();
    for item in &items[1..] {
        let common = prefix
            .bytes()
            .zip(item.bytes())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common);
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_adapters::MemWriter;
    use std::cell::RefCell;
    use std::fs::{self, File};
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::rc::Rc;

    struct Fixture {
        editor: LineEditor,
        term: Terminal,
        resolver: PathResolver,
        seen: Rc<RefCell<Vec<u8>>>,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_resolver(PathResolver::new(vec![]))
        }

        fn with_resolver(resolver: PathResolver) -> Self {
            let (writer, seen) = MemWriter::with_handle();
            Fixture {
                editor: LineEditor::new(),
                term: Terminal::with_writer(Box::new(writer), true),
                resolver,
                seen,
            }
        }

        fn key(&mut self, key: Key) -> Action {
            self.editor
                .handle_key(key, &mut self.term, &self.resolver)
                .unwrap()
        }

        fn type_str(&mut self, text: &str) {
            for &b in text.as_bytes() {
                self.key(Key::Char(b));
            }
        }

        /// Output emitted since the last call.
        fn drain_output(&mut self) -> Vec<u8> {
            std::mem::take(&mut *self.seen.borrow_mut())
        }
    }

    fn exec_dir(tag: &str, names: &[&str]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("editor_tests_{}_{tag}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        for name in names {
            let path = dir.join(name);
            File::create(&path).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        }
        dir
    }

    #[test]
    fn buffer_equals_typed_input() {
        let mut f = Fixture::new();
        f.type_str("echo hi");
        assert_eq!(f.editor.buffer_text(), "echo hi");
        assert_eq!(f.editor.cursor(), 7);
        assert_eq!(f.drain_output(), b"echo hi");
    }

    #[test]
    fn backspace_undoes_a_char() {
        let mut f = Fixture::new();
        f.type_str("ab");
        f.key(Key::Backspace);
        assert_eq!(f.editor.buffer_text(), "a");
        f.key(Key::Backspace);
        assert_eq!(f.editor.buffer_text(), "");
        // Backspace on an empty buffer is silent.
        f.drain_output();
        f.key(Key::Backspace);
        assert_eq!(f.editor.buffer_text(), "");
        assert_eq!(f.drain_output(), b"");
    }

    #[test]
    fn mid_line_insert_and_delete() {
        let mut f = Fixture::new();
        f.type_str("held");
        f.key(Key::ArrowLeft);
        f.key(Key::ArrowLeft);
        f.type_str("l");
        assert_eq!(f.editor.buffer_text(), "helld");
        assert_eq!(f.editor.cursor(), 3);
        f.key(Key::Delete);
        assert_eq!(f.editor.buffer_text(), "held");
        f.key(Key::Delete);
        f.key(Key::Delete);
        assert_eq!(f.editor.buffer_text(), "hel");
        // Delete at end of line is silent.
        f.key(Key::Delete);
        assert_eq!(f.editor.buffer_text(), "hel");
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut f = Fixture::new();
        let keys = [
            Key::Char(b'a'),
            Key::ArrowLeft,
            Key::ArrowLeft,
            Key::Char(b'b'),
            Key::ArrowRight,
            Key::ArrowRight,
            Key::ArrowRight,
            Key::Backspace,
            Key::Home,
            Key::Delete,
            Key::End,
            Key::Char(b'c'),
        ];
        for key in keys {
            f.key(key);
            assert!(f.editor.cursor() <= f.editor.buffer_text().len());
        }
    }

    #[test]
    fn home_and_end_jump() {
        let mut f = Fixture::new();
        f.type_str("abc");
        f.key(Key::Home);
        assert_eq!(f.editor.cursor(), 0);
        f.key(Key::End);
        assert_eq!(f.editor.cursor(), 3);
    }

    #[test]
    fn enter_submits_and_writes_newline() {
        let mut f = Fixture::new();
        f.type_str("ok");
        f.drain_output();
        assert_eq!(f.key(Key::Enter), Action::Submit);
        assert_eq!(f.drain_output(), b"\n");
    }

    #[test]
    fn ctrl_d_is_eof_only_on_an_empty_line() {
        let mut f = Fixture::new();
        assert_eq!(f.key(Key::CtrlD), Action::Eof);
        f.type_str("x");
        f.drain_output();
        assert_eq!(f.key(Key::CtrlD), Action::ContinueEditing);
        assert_eq!(f.drain_output(), b"\x07");
    }

    #[test]
    fn ctrl_c_rings_the_bell() {
        let mut f = Fixture::new();
        f.drain_output();
        assert_eq!(f.key(Key::CtrlC), Action::ContinueEditing);
        assert_eq!(f.drain_output(), b"\x07");
    }

    #[test]
    fn history_navigation_round_trip() {
        let mut f = Fixture::new();
        f.editor.record("echo one");
        f.editor.record("echo two");
        f.type_str("dra");

        f.key(Key::ArrowUp);
        assert_eq!(f.editor.buffer_text(), "echo two");
        f.key(Key::ArrowUp);
        assert_eq!(f.editor.buffer_text(), "echo one");
        // Oldest entry: another Up just rings the bell.
        f.drain_output();
        f.key(Key::ArrowUp);
        assert_eq!(f.editor.buffer_text(), "echo one");
        assert_eq!(f.drain_output(), b"\x07");

        f.key(Key::ArrowDown);
        assert_eq!(f.editor.buffer_text(), "echo two");
        f.key(Key::ArrowDown);
        assert_eq!(f.editor.buffer_text(), "dra");
        // Fresh line again: Down rings the bell.
        f.drain_output();
        f.key(Key::ArrowDown);
        assert_eq!(f.drain_output(), b"\x07");
    }

    #[test]
    fn history_up_on_empty_history_rings_the_bell() {
        let mut f = Fixture::new();
        f.drain_output();
        f.key(Key::ArrowUp);
        assert_eq!(f.drain_output(), b"\x07");
    }

    #[test]
    fn replace_line_redraw_sequence() {
        let mut f = Fixture::new();
        f.editor.record("history");
        f.type_str("ab");
        f.drain_output();
        f.key(Key::ArrowUp);
        // Cursor left over "ab", clear to EOL, new text.
        assert_eq!(f.drain_output(), b"\x1b[2D\x1b[Khistory");
    }

    #[test]
    fn single_candidate_completes_with_a_space() {
        let mut f = Fixture::new();
        f.type_str("pw");
        f.key(Key::Tab);
        assert_eq!(f.editor.buffer_text(), "pwd ");
        assert_eq!(f.editor.cursor(), 4);
    }

    #[test]
    fn completion_needs_a_first_word_prefix() {
        let mut f = Fixture::new();
        // Empty prefix.
        f.drain_output();
        f.key(Key::Tab);
        assert_eq!(f.drain_output(), b"\x07");
        // Cursor past the first word.
        f.type_str("echo pw");
        f.drain_output();
        f.key(Key::Tab);
        assert_eq!(f.drain_output(), b"\x07");
        assert_eq!(f.editor.buffer_text(), "echo pw");
    }

    #[test]
    fn no_candidates_rings_the_bell() {
        let mut f = Fixture::new();
        f.type_str("zzz");
        f.drain_output();
        f.key(Key::Tab);
        assert_eq!(f.drain_output(), b"\x07");
    }

    #[test]
    fn multiple_candidates_extend_to_the_common_prefix() {
        let dir = exec_dir("lcp", &["myprog-a", "myprog-b"]);
        let mut f = Fixture::with_resolver(PathResolver::new(vec![dir.clone()]));
        f.type_str("myp");
        f.drain_output();
        f.key(Key::Tab);
        assert_eq!(f.editor.buffer_text(), "myprog-");
        assert_eq!(f.drain_output(), b"rog-");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn two_stage_tab_lists_candidates() {
        let dir = exec_dir("listing", &["echx"]);
        let mut f = Fixture::with_resolver(PathResolver::new(vec![dir.clone()]));
        f.type_str("ech");
        f.drain_output();

        // LCP equals the prefix: first TAB is exactly one bell, no change.
        f.key(Key::Tab);
        assert_eq!(f.editor.buffer_text(), "ech");
        assert_eq!(f.drain_output(), b"\x07");

        // Second consecutive TAB lists the sorted candidates and redraws.
        f.key(Key::Tab);
        assert_eq!(f.editor.buffer_text(), "ech");
        assert_eq!(f.drain_output(), b"\necho  echx\n$ ech");

        // A non-TAB key resets the two-stage state.
        f.key(Key::ArrowLeft);
        f.key(Key::ArrowRight);
        f.key(Key::Tab);
        assert_eq!(f.drain_output().last(), Some(&0x07));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn builtins_and_executables_dedup_in_candidates() {
        // An executable shadowing a builtin name must not list twice.
        let dir = exec_dir("dedup", &["history"]);
        let mut f = Fixture::with_resolver(PathResolver::new(vec![dir.clone()]));
        f.type_str("histor");
        f.key(Key::Tab);
        // Single distinct candidate: completes with a trailing space.
        assert_eq!(f.editor.buffer_text(), "history ");
        let _ = fs::remove_dir_all(&dir);
    }
}
