use std::io::{self, BufRead, Write};

use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{self, ClearType},
    tty::IsTty,
};

/// Enables raw mode for the lifetime of the guard, so the terminal is restored
/// on every return path.
struct RawModeGuard;

impl RawModeGuard {
    fn enter() -> io::Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Read one line, showing `prompt` first.
///
/// On a terminal this is a small raw-mode editor whose Up/Down keys walk
/// `history` (oldest first). Otherwise the line is read as-is from stdin.
/// `Ok(None)` means end of input.
pub fn read_line(prompt: &str, history: &[String]) -> io::Result<Option<String>> {
    if !io::stdin().is_tty() {
        return read_plain(prompt);
    }

    let mut session = EditSession::new(history);
    let _raw = RawModeGuard::enter()?;
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}")?;
    stdout.flush()?;

    loop {
        let key = match event::read() {
            Ok(Event::Key(key)) if key.kind != KeyEventKind::Release => key,
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };

        match session.apply(key) {
            Edit::Nothing => {}
            Edit::Cursor => move_cursor(&mut stdout, prompt, &session)?,
            Edit::Redraw => redraw(&mut stdout, prompt, &session)?,
            Edit::Interrupt => {
                write!(stdout, "^C\r\n{prompt}")?;
                stdout.flush()?;
            }
            Edit::Submit(line) => {
                write!(stdout, "\r\n")?;
                stdout.flush()?;
                return Ok(Some(line));
            }
            Edit::Eof => return Ok(None),
        }
    }
}

fn read_plain(prompt: &str) -> io::Result<Option<String>> {
    if !prompt.is_empty() {
        print!("{prompt}");
        io::stdout().flush()?;
    }
    let mut line = String::new();
    loop {
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => return Ok(None),
            Ok(_) => {
                let trimmed = line.trim_end_matches(['\n', '\r']).len();
                line.truncate(trimmed);
                return Ok(Some(line));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}

fn redraw(out: &mut impl Write, prompt: &str, session: &EditSession<'_>) -> io::Result<()> {
    let line: String = session.buffer.iter().collect();
    execute!(out, cursor::MoveToColumn(0), terminal::Clear(ClearType::CurrentLine))?;
    write!(out, "{prompt}{line}")?;
    move_cursor(out, prompt, session)
}

fn move_cursor(out: &mut impl Write, prompt: &str, session: &EditSession<'_>) -> io::Result<()> {
    let column = prompt.chars().count() + session.cursor;
    execute!(out, cursor::MoveToColumn(column.min(u16::MAX as usize) as u16))?;
    out.flush()
}

/// What the terminal needs to show after a key.
#[derive(Debug, PartialEq, Eq)]
enum Edit {
    Nothing,
    Cursor,
    Redraw,
    /// Ctrl-C at the prompt: the line is discarded and a new prompt shown.
    Interrupt,
    Submit(String),
    Eof,
}

/// Editing state for one prompt. Keeps no terminal handle, so every key can
/// be exercised in tests.
struct EditSession<'h> {
    buffer: Vec<char>,
    cursor: usize,
    history: &'h [String],
    /// Position in `history` while browsing; `history.len()` means the draft.
    index: usize,
    /// The line being typed before Up was first pressed.
    draft: String,
}

impl<'h> EditSession<'h> {
    fn new(history: &'h [String]) -> Self {
        Self {
            buffer: Vec::new(),
            cursor: 0,
            history,
            index: history.len(),
            draft: String::new(),
        }
    }

    fn line(&self) -> String {
        self.buffer.iter().collect()
    }

    fn apply(&mut self, key: KeyEvent) -> Edit {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Enter => Edit::Submit(self.line()),
            KeyCode::Char('d') if ctrl => {
                if self.buffer.is_empty() {
                    Edit::Eof
                } else {
                    self.delete_at_cursor()
                }
            }
            KeyCode::Char('c') if ctrl => {
                self.replace("");
                self.index = self.history.len();
                Edit::Interrupt
            }
            // Ctrl-Z at the prompt has nothing to stop.
            KeyCode::Char('z') if ctrl => Edit::Nothing,
            KeyCode::Char('a') if ctrl => self.seek(0),
            KeyCode::Home => self.seek(0),
            KeyCode::Char('e') if ctrl => self.seek(self.buffer.len()),
            KeyCode::End => self.seek(self.buffer.len()),
            KeyCode::Char('u') if ctrl => {
                self.buffer.drain(..self.cursor);
                self.cursor = 0;
                Edit::Redraw
            }
            KeyCode::Char('k') if ctrl => {
                self.buffer.truncate(self.cursor);
                Edit::Redraw
            }
            KeyCode::Char('w') if ctrl => self.delete_word(),
            KeyCode::Char(_) if ctrl => Edit::Nothing,
            KeyCode::Char(c) => {
                self.buffer.insert(self.cursor, c);
                self.cursor += 1;
                Edit::Redraw
            }
            KeyCode::Left if self.cursor > 0 => self.seek(self.cursor - 1),
            KeyCode::Right if self.cursor < self.buffer.len() => self.seek(self.cursor + 1),
            KeyCode::Backspace if self.cursor > 0 => {
                self.cursor -= 1;
                self.buffer.remove(self.cursor);
                Edit::Redraw
            }
            KeyCode::Delete => self.delete_at_cursor(),
            KeyCode::Up => self.older(),
            KeyCode::Down => self.newer(),
            _ => Edit::Nothing,
        }
    }

    fn seek(&mut self, position: usize) -> Edit {
        self.cursor = position;
        Edit::Cursor
    }

    fn replace(&mut self, text: &str) {
        self.buffer = text.chars().collect();
        self.cursor = self.buffer.len();
    }

    fn delete_at_cursor(&mut self) -> Edit {
        if self.cursor < self.buffer.len() {
            self.buffer.remove(self.cursor);
            Edit::Redraw
        } else {
            Edit::Nothing
        }
    }

    fn delete_word(&mut self) -> Edit {
        let mut start = self.cursor;
        while start > 0 && self.buffer[start - 1] == ' ' {
            start -= 1;
        }
        while start > 0 && self.buffer[start - 1] != ' ' {
            start -= 1;
        }
        if start == self.cursor {
            return Edit::Nothing;
        }
        self.buffer.drain(start..self.cursor);
        self.cursor = start;
        Edit::Redraw
    }

    fn older(&mut self) -> Edit {
        if self.index == 0 {
            return Edit::Nothing;
        }
        if self.index == self.history.len() {
            self.draft = self.line();
        }
        self.index -= 1;
        let history = self.history;
        self.replace(&history[self.index]);
        Edit::Redraw
    }

    fn newer(&mut self) -> Edit {
        if self.index >= self.history.len() {
            return Edit::Nothing;
        }
        self.index += 1;
        let text = match self.history.get(self.index) {
            Some(entry) => entry.clone(),
            None => std::mem::take(&mut self.draft),
        };
        self.replace(&text);
        Edit::Redraw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn ctrl(c: char) -> KeyEvent {
        KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
    }

    fn type_text(session: &mut EditSession<'_>, text: &str) {
        for c in text.chars() {
            session.apply(key(KeyCode::Char(c)));
        }
    }

    #[test]
    fn typing_and_cursor_movement_edit_in_place() {
        let mut s = EditSession::new(&[]);
        type_text(&mut s, "hi");
        assert_eq!(s.apply(key(KeyCode::Left)), Edit::Cursor);
        type_text(&mut s, "i");
        s.apply(key(KeyCode::Right));
        s.apply(key(KeyCode::Backspace));
        s.apply(key(KeyCode::Home));
        s.apply(KeyEvent::new(KeyCode::Char('H'), KeyModifiers::SHIFT));
        s.apply(key(KeyCode::End));

        assert_eq!(s.line(), "Hhi");
        assert_eq!(s.cursor, 3);
        assert_eq!(s.apply(key(KeyCode::Enter)), Edit::Submit("Hhi".to_string()));
    }

    #[test]
    fn up_and_down_walk_history_and_restore_the_draft() {
        let history = vec!["sleep 5 &".to_string(), "cat a | sort".to_string()];
        let mut s = EditSession::new(&history);
        type_text(&mut s, "rev");

        s.apply(key(KeyCode::Up));
        assert_eq!(s.line(), "cat a | sort");
        s.apply(key(KeyCode::Up));
        assert_eq!(s.line(), "sleep 5 &");
        assert_eq!(s.apply(key(KeyCode::Up)), Edit::Nothing);

        s.apply(key(KeyCode::Down));
        assert_eq!(s.line(), "cat a | sort");
        s.apply(key(KeyCode::Down));
        assert_eq!(s.line(), "rev");
        assert_eq!(s.apply(key(KeyCode::Down)), Edit::Nothing);
    }

    #[test]
    fn ctrl_w_removes_the_previous_word_and_its_spaces() {
        let mut s = EditSession::new(&[]);
        type_text(&mut s, "ping 42   ");
        s.apply(ctrl('w'));
        assert_eq!(s.line(), "ping ");
        s.apply(key(KeyCode::Home));
        assert_eq!(s.apply(ctrl('w')), Edit::Nothing);
    }

    #[test]
    fn kill_shortcuts_cut_around_the_cursor() {
        let mut s = EditSession::new(&[]);
        type_text(&mut s, "abcdef");
        s.apply(key(KeyCode::Left));
        s.apply(key(KeyCode::Left));
        s.apply(ctrl('k'));
        assert_eq!(s.line(), "abcd");
        s.apply(key(KeyCode::Left));
        s.apply(ctrl('u'));
        assert_eq!((s.line().as_str(), s.cursor), ("d", 0));
    }

    #[test]
    fn ctrl_c_discards_the_line_and_ctrl_d_ends_input_only_when_empty() {
        let mut s = EditSession::new(&[]);
        type_text(&mut s, "sleep 10");
        s.apply(key(KeyCode::Home));
        assert_eq!(s.apply(ctrl('d')), Edit::Redraw);
        assert_eq!(s.line(), "leep 10");

        assert_eq!(s.apply(ctrl('c')), Edit::Interrupt);
        assert_eq!(s.line(), "");
        assert_eq!(s.apply(ctrl('z')), Edit::Nothing);
        assert_eq!(s.apply(ctrl('d')), Edit::Eof);
    }
}
