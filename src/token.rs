use serde::{Deserialize, Serialize};

/// What terminated a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// A field delimiter: more fields follow on this row.
    Field,
    /// A record terminator (`\n` or `\r\n`): the row is complete.
    Record,
    /// End of input: the row is complete and the stream is done.
    Eof,
}

/// Position in the CSV input
///
/// `line` and `column` are 1-based; `offset` counts UTF-8 bytes from the
/// start of the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl Position {
    pub fn new() -> Self {
        Self {
            line: 1,
            column: 1,
            offset: 0,
        }
    }

    /// Advance over one character.
    pub(crate) fn advance(&mut self, ch: char) {
        self.offset += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }

    /// Advance over one UTF-8 byte; continuation bytes do not count as a
    /// column.
    pub(crate) fn advance_byte(&mut self, byte: u8) {
        self.offset += 1;
        if byte == b'\n' {
            self.line += 1;
            self.column = 1;
        } else if (byte & 0xC0) != 0x80 {
            self.column += 1;
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::new()
    }
}

/// Span of one token, populated when location tracking is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Position of the first character of the field (including an opening
    /// quote).
    pub start: Position,
    /// Position one past the token's terminator.
    pub end: Position,
    /// 1-based row the field belongs to.
    pub row_number: usize,
}

/// One field plus what follows it.
///
/// Every record that contains at least one character produces at least one
/// token; a trailing field delimiter produces an extra empty-valued `Eof`
/// token at flush.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Decoded field text: enclosing quotes removed, doubled quotes
    /// unescaped.
    pub value: String,
    /// What terminated the field.
    pub terminator: Terminator,
    /// Length of the terminator as it appeared: 0 for `Eof`, 1 for `\n` or a
    /// single-character field delimiter, 2 for `\r\n`.
    pub terminator_len: usize,
    /// Span of the token, when location tracking is enabled.
    pub location: Option<Location>,
}

impl Token {
    pub(crate) fn new(value: String, terminator: Terminator, terminator_len: usize) -> Self {
        Self {
            value,
            terminator,
            terminator_len,
            location: None,
        }
    }

    /// True when this token completes a record.
    pub fn ends_record(&self) -> bool {
        matches!(self.terminator, Terminator::Record | Terminator::Eof)
    }
}
