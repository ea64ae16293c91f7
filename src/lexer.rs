use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::token::{Location, Position, Terminator, Token};

/// Incremental CSV lexer.
///
/// The lexer scans character input into unified field tokens with RFC 4180
/// semantics and configurable delimiter/quotation. Input arrives in chunks
/// of arbitrary size; quoted-field state propagates across chunk boundaries,
/// and a token is only emitted once its terminator is fully visible. When
/// the buffer cannot advance without more input, [`FieldLexer::next_token`]
/// returns `Ok(None)`.
///
/// Consumed input is truncated from the buffer on each new chunk; the
/// cumulative line/column/offset of the dropped prefix is folded into the
/// base position so error positions stay correct.
pub struct FieldLexer {
    /// Unconsumed input plus the not-yet-classifiable tail.
    buffer: String,
    /// Byte offset of the first unconsumed character in `buffer`.
    buffer_offset: usize,
    /// Absolute position of `buffer_offset` in the overall input.
    base: Position,
    /// Terminator of the most recently emitted token.
    last_terminator: Option<Terminator>,
    /// Set by [`FieldLexer::finish`]: the current buffer is the whole input.
    flush_requested: bool,
    /// 1-based row of the field currently being scanned.
    row_number: usize,
    delimiter: String,
    quotation: String,
    /// Char length of the delimiter, for `terminator_len`.
    delimiter_chars: usize,
    options: ParseOptions,
}

/// Outcome of one field scan. The scan itself is read-only; `Emit` carries
/// everything `next_token` needs to commit the consumption.
enum Scan {
    Emit {
        value: String,
        terminator: Terminator,
        terminator_len: usize,
        start: Position,
        end: Position,
        consumed: usize,
    },
    /// The buffer cannot advance without more input.
    NeedInput,
}

impl FieldLexer {
    pub fn new(options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            buffer: String::new(),
            buffer_offset: 0,
            base: Position::new(),
            last_terminator: None,
            flush_requested: false,
            row_number: 1,
            delimiter: options.delimiter.clone(),
            quotation: options.quotation.clone(),
            delimiter_chars: options.delimiter.chars().count(),
            options: options.clone(),
        })
    }

    /// Append a chunk, truncating the consumed prefix and enforcing
    /// `max_buffer_size` on the retained total. An empty chunk is a no-op.
    pub fn push_chunk(&mut self, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.buffer_offset > 0 {
            self.buffer.drain(..self.buffer_offset);
            self.buffer_offset = 0;
        }
        let retained = self.buffer.len() + chunk.len();
        if retained > self.options.max_buffer_size {
            return Err(Error::BufferOverflow {
                size: retained,
                limit: self.options.max_buffer_size,
                source_label: self.options.source.clone(),
            });
        }
        self.buffer.push_str(chunk);
        Ok(())
    }

    /// Mark the current buffer as the complete remaining input. Subsequent
    /// [`FieldLexer::next_token`] calls drain it and emit the final
    /// EOF-bound token.
    pub fn finish(&mut self) {
        self.flush_requested = true;
    }

    /// Produce the next token, or `None` when the buffer cannot advance
    /// without more input (or, after [`FieldLexer::finish`], when the input
    /// is exhausted).
    pub fn next_token(&mut self) -> Result<Option<Token>> {
        if self.options.is_cancelled() {
            return Err(self.options.cancelled_error());
        }
        if self.buffer_offset >= self.buffer.len() {
            return Ok(self.flush_tail_token());
        }
        match self.scan_field()? {
            Scan::Emit {
                value,
                terminator,
                terminator_len,
                start,
                end,
                consumed,
            } => Ok(Some(self.emit(value, terminator, terminator_len, start, end, consumed))),
            Scan::NeedInput => Ok(None),
        }
    }

    /// Teacher-style driver: push an optional chunk, flush unless
    /// `stream`, and collect every token that became available. A
    /// non-streaming call resets the lexer afterwards so the instance can
    /// be reused.
    pub fn lex(&mut self, chunk: Option<&str>, stream: bool) -> Result<Vec<Token>> {
        if let Some(chunk) = chunk {
            self.push_chunk(chunk)?;
        }
        if !stream {
            self.finish();
        }
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        if !stream {
            self.reset();
        }
        Ok(tokens)
    }

    /// Return the lexer to its initial state for reuse.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_offset = 0;
        self.base = Position::new();
        self.last_terminator = None;
        self.flush_requested = false;
        self.row_number = 1;
    }

    /// Token emitted when the buffer is exhausted: a trailing field
    /// delimiter owes one empty EOF-bound field.
    fn flush_tail_token(&mut self) -> Option<Token> {
        if !self.flush_requested {
            return None;
        }
        if self.last_terminator == Some(Terminator::Field) {
            self.last_terminator = Some(Terminator::Eof);
            let mut token = Token::new(String::new(), Terminator::Eof, 0);
            if self.options.track_location {
                token.location = Some(Location {
                    start: self.base,
                    end: self.base,
                    row_number: self.row_number,
                });
            }
            return Some(token);
        }
        None
    }

    /// Scan one field starting at `buffer_offset`.
    ///
    /// A single pass handles all four cursor patterns: delimiter and record
    /// terminators produce empty-valued tokens, a leading quotation enters
    /// the quoted scanner, and a quotation mid-field switches into the
    /// partial-quoted continuation that concatenates unquoted and quoted
    /// segments into one value.
    fn scan_field(&self) -> Result<Scan> {
        let rest = &self.buffer[self.buffer_offset..];
        let flush = self.flush_requested;
        let delimiter = self.delimiter.as_str();
        let quotation = self.quotation.as_str();
        let qlen = quotation.len();

        let field_start = self.base;
        let mut pos = self.base;
        let mut value = String::new();
        let mut in_quotes = false;
        let mut quote_open_pos = None;
        let mut i = 0;

        loop {
            let tail = &rest[i..];

            if tail.is_empty() {
                if !flush {
                    return Ok(Scan::NeedInput);
                }
                if in_quotes {
                    return Err(self.unterminated(quote_open_pos.unwrap_or(field_start)));
                }
                return Ok(Scan::Emit {
                    value,
                    terminator: Terminator::Eof,
                    terminator_len: 0,
                    start: field_start,
                    end: pos,
                    consumed: i,
                });
            }

            if in_quotes {
                if tail.starts_with(quotation) {
                    let after = &tail[qlen..];
                    if after.starts_with(quotation) {
                        // Doubled quotation: one literal quotation in the
                        // output.
                        self.guard_field_size(value.len() + qlen)?;
                        value.push_str(quotation);
                        advance_str(&mut pos, &tail[..2 * qlen]);
                        i += 2 * qlen;
                    } else if after.is_empty() && !flush {
                        // Cannot yet tell a closing quote from the first
                        // half of a doubled one.
                        return Ok(Scan::NeedInput);
                    } else if quotation.starts_with(after) && !after.is_empty() && !flush {
                        return Ok(Scan::NeedInput);
                    } else {
                        in_quotes = false;
                        advance_str(&mut pos, quotation);
                        i += qlen;
                    }
                    continue;
                }
                if is_partial_match(tail, quotation) && !flush {
                    return Ok(Scan::NeedInput);
                }
                let ch = tail.chars().next().expect("tail is non-empty");
                self.guard_field_size(value.len() + ch.len_utf8())?;
                value.push(ch);
                pos.advance(ch);
                i += ch.len_utf8();
                continue;
            }

            if tail.starts_with(delimiter) {
                advance_str(&mut pos, delimiter);
                return Ok(Scan::Emit {
                    value,
                    terminator: Terminator::Field,
                    terminator_len: self.delimiter_chars,
                    start: field_start,
                    end: pos,
                    consumed: i + delimiter.len(),
                });
            }
            if tail.starts_with("\r\n") {
                pos.advance('\r');
                pos.advance('\n');
                return Ok(Scan::Emit {
                    value,
                    terminator: Terminator::Record,
                    terminator_len: 2,
                    start: field_start,
                    end: pos,
                    consumed: i + 2,
                });
            }
            if tail.starts_with('\n') {
                pos.advance('\n');
                return Ok(Scan::Emit {
                    value,
                    terminator: Terminator::Record,
                    terminator_len: 1,
                    start: field_start,
                    end: pos,
                    consumed: i + 1,
                });
            }
            if tail.starts_with(quotation) {
                in_quotes = true;
                quote_open_pos = Some(pos);
                advance_str(&mut pos, quotation);
                i += qlen;
                continue;
            }
            if !flush
                && (is_partial_match(tail, delimiter)
                    || is_partial_match(tail, quotation)
                    || tail == "\r")
            {
                // The tail could complete into a delimiter, a quotation, or
                // a CRLF once the next chunk arrives.
                return Ok(Scan::NeedInput);
            }
            let ch = tail.chars().next().expect("tail is non-empty");
            self.guard_field_size(value.len() + ch.len_utf8())?;
            value.push(ch);
            pos.advance(ch);
            i += ch.len_utf8();
        }
    }

    /// Commit `consumed` bytes and build the token.
    fn emit(
        &mut self,
        value: String,
        terminator: Terminator,
        terminator_len: usize,
        start: Position,
        end: Position,
        consumed: usize,
    ) -> Token {
        self.buffer_offset += consumed;
        self.base = end;
        self.last_terminator = Some(terminator);
        let row = self.row_number;
        if terminator == Terminator::Record {
            self.row_number += 1;
        }
        let mut token = Token::new(value, terminator, terminator_len);
        if self.options.track_location {
            token.location = Some(Location {
                start,
                end,
                row_number: row,
            });
        }
        token
    }

    fn guard_field_size(&self, size: usize) -> Result<()> {
        if size > self.options.max_field_size {
            return Err(Error::FieldTooLarge {
                size,
                limit: self.options.max_field_size,
                row: self.row_number,
                source_label: self.options.source.clone(),
            });
        }
        Ok(())
    }

    fn unterminated(&self, quote_pos: Position) -> Error {
        Error::UnexpectedEof {
            row: self.row_number,
            position: Some(quote_pos),
            source_label: self.options.source.clone(),
        }
    }
}

/// True when `tail` is a non-empty proper prefix of `pattern`, i.e. the
/// pattern may complete in the next chunk.
fn is_partial_match(tail: &str, pattern: &str) -> bool {
    !tail.is_empty() && tail.len() < pattern.len() && pattern.starts_with(tail)
}

/// Advance a position over every character of `s`.
fn advance_str(pos: &mut Position, s: &str) {
    for ch in s.chars() {
        pos.advance(ch);
    }
}
