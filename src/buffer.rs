//! Plain-text buffer: lines plus a cursor
//!
//! Invariant: `lines` is never empty, `row < lines.len()` and
//! `col <= lines[row].chars().count()`. Columns count chars, not bytes.

use crate::edits::LineSink;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("Buffer has no file name")]
    NoPath,
    #[error("Could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Could not write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Cursor {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone)]
pub struct Buffer {
    lines: Vec<String>,
    cursor: Cursor,
    path: Option<PathBuf>,
    dirty: bool,
}

impl Default for Buffer {
    fn default() -> Self {
        Self {
            lines: vec![String::new()],
            cursor: Cursor::default(),
            path: None,
            dirty: false,
        }
    }
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_text(text: &str) -> Self {
        let mut lines: Vec<String> = text.lines().map(str::to_string).collect();
        if lines.is_empty() {
            lines.push(String::new());
        }
        Self {
            lines,
            ..Self::default()
        }
    }

    /// Load `path`; a missing file gives an empty buffer bound to that path
    pub fn open(path: &Path) -> Result<Self, BufferError> {
        let mut buffer = match fs::read_to_string(path) {
            Ok(text) => Self::from_text(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(),
            Err(source) => {
                return Err(BufferError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        buffer.path = Some(path.to_path_buf());
        Ok(buffer)
    }

    pub fn save(&mut self) -> Result<&Path, BufferError> {
        let path = self.path.as_ref().ok_or(BufferError::NoPath)?;
        let mut text = self.lines.join("\n");
        text.push('\n');
        fs::write(path, text).map_err(|source| BufferError::Write {
            path: path.clone(),
            source,
        })?;
        self.dirty = false;
        Ok(path)
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// A buffer always holds at least one (possibly empty) line
    pub fn is_empty(&self) -> bool {
        self.lines.len() == 1 && self.lines[0].is_empty()
    }

    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn insert_char(&mut self, c: char) {
        let Cursor { row, col } = self.cursor;
        let at = byte_index(&self.lines[row], col);
        self.lines[row].insert(at, c);
        self.cursor.col += 1;
        self.dirty = true;
    }

    pub fn insert_newline(&mut self) {
        let Cursor { row, col } = self.cursor;
        let at = byte_index(&self.lines[row], col);
        let rest = self.lines[row].split_off(at);
        self.lines.insert(row + 1, rest);
        self.cursor = Cursor { row: row + 1, col: 0 };
        self.dirty = true;
    }

    /// Delete the char before the cursor, joining lines at column 0
    pub fn backspace(&mut self) {
        let Cursor { row, col } = self.cursor;
        if col > 0 {
            let at = byte_index(&self.lines[row], col - 1);
            self.lines[row].remove(at);
            self.cursor.col -= 1;
            self.dirty = true;
        } else if row > 0 {
            let line = self.lines.remove(row);
            let prev_len = char_len(&self.lines[row - 1]);
            self.lines[row - 1].push_str(&line);
            self.cursor = Cursor {
                row: row - 1,
                col: prev_len,
            };
            self.dirty = true;
        }
    }

    pub fn move_left(&mut self) {
        if self.cursor.col > 0 {
            self.cursor.col -= 1;
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
            self.cursor.col = char_len(&self.lines[self.cursor.row]);
        }
    }

    pub fn move_right(&mut self) {
        let len = char_len(&self.lines[self.cursor.row]);
        if self.cursor.col < len {
            self.cursor.col += 1;
        } else if self.cursor.row + 1 < self.lines.len() {
            self.cursor.row += 1;
            self.cursor.col = 0;
        }
    }

    pub fn move_up(&mut self) {
        if self.cursor.row > 0 {
            self.cursor.row -= 1;
            self.clamp_col();
        }
    }

    pub fn move_down(&mut self) {
        if self.cursor.row + 1 < self.lines.len() {
            self.cursor.row += 1;
            self.clamp_col();
        }
    }

    fn clamp_col(&mut self) {
        let len = char_len(&self.lines[self.cursor.row]);
        self.cursor.col = self.cursor.col.min(len);
    }
}

impl LineSink for Buffer {
    fn append_lines(&mut self, lines: Vec<String>) {
        if lines.is_empty() {
            return;
        }
        self.lines.extend(lines);
        self.dirty = true;
    }
}

fn char_len(line: &str) -> usize {
    line.chars().count()
}

fn byte_index(line: &str, col: usize) -> usize {
    line.char_indices()
        .nth(col)
        .map(|(i, _)| i)
        .unwrap_or(line.len())
}
