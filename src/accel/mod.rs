//! Accelerated backend: a separator indexer plus a token synthesizer.
//!
//! The scanner identifies delimiter/line-feed positions with quote parity
//! tracked across chunks; the synthesizer slices fields between separator
//! positions and emits the same unified tokens as the character lexer.
//! Compatibility envelope: UTF-8 input, single-byte delimiter, `"`
//! quotation, no location tracking.

pub mod scanner;

use std::collections::VecDeque;

use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::token::{Position, Terminator, Token};

use scanner::{decode_field, unpack_offset, unpack_type, SeparatorScanner, SEP_LF};

/// Largest buffer offset the packed separator format can represent.
const MAX_SCAN_OFFSET: usize = 0x7FFF_FFFF;

pub struct AccelLexer {
    scanner: SeparatorScanner,
    options: ParseOptions,
    /// Raw bytes not yet consumed into tokens.
    buffer: Vec<u8>,
    /// How far `buffer` has been scanned for separators.
    scan_pos: usize,
    /// Start of the field currently being accumulated.
    field_start: usize,
    /// Pending separator positions, relative to `buffer`.
    separators: VecDeque<u32>,
    last_terminator: Option<Terminator>,
    row: usize,
    finished: bool,
    /// Absolute position of `buffer[0]`, folded forward on compaction so
    /// error positions can be recovered lazily.
    base: Position,
}

impl AccelLexer {
    pub fn new(options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        if !options.compiled_compatible() {
            return Err(Error::EngineUnavailable {
                reason: "options are outside the accelerated backend envelope".to_string(),
            });
        }
        Ok(Self {
            scanner: SeparatorScanner::new(options.delimiter.as_bytes()[0], b'"'),
            options: options.clone(),
            buffer: Vec::new(),
            scan_pos: 0,
            field_start: 0,
            separators: VecDeque::new(),
            last_terminator: None,
            row: 1,
            finished: false,
            base: Position::new(),
        })
    }

    pub fn push_chunk(&mut self, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        if self.field_start > 0 {
            for &b in &self.buffer[..self.field_start] {
                self.base.advance_byte(b);
            }
            self.buffer.drain(..self.field_start);
            self.scan_pos -= self.field_start;
            let shift = self.field_start as u32;
            for sep in self.separators.iter_mut() {
                *sep -= shift;
            }
            self.field_start = 0;
        }
        let retained = self.buffer.len() + chunk.len();
        if retained > self.options.max_buffer_size.min(MAX_SCAN_OFFSET) {
            return Err(Error::BufferOverflow {
                size: retained,
                limit: self.options.max_buffer_size.min(MAX_SCAN_OFFSET),
                source_label: self.options.source.clone(),
            });
        }
        self.buffer.extend_from_slice(chunk.as_bytes());
        let result = self
            .scanner
            .scan(&self.buffer[self.scan_pos..], self.scan_pos as u32);
        self.separators.extend(result.separators);
        self.scan_pos = self.buffer.len();
        Ok(())
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        if self.options.is_cancelled() {
            return Err(self.options.cancelled_error());
        }

        if let Some(packed) = self.separators.pop_front() {
            let offset = unpack_offset(packed) as usize;
            let is_lf = unpack_type(packed) == SEP_LF;
            let mut field = &self.buffer[self.field_start..offset];

            let (terminator, terminator_len) = if is_lf {
                if field.last() == Some(&b'\r') {
                    field = &field[..field.len() - 1];
                    (Terminator::Record, 2)
                } else {
                    (Terminator::Record, 1)
                }
            } else {
                (Terminator::Field, 1)
            };

            let value = self.decode(field)?;
            self.field_start = offset + 1;
            self.last_terminator = Some(terminator);
            if terminator == Terminator::Record {
                self.row += 1;
            }
            return Ok(Some(Token::new(value, terminator, terminator_len)));
        }

        if !self.finished {
            return Ok(None);
        }
        if self.scanner.in_quote() {
            return Err(Error::UnexpectedEof {
                row: self.row,
                position: self.unterminated_position(),
                source_label: self.options.source.clone(),
            });
        }

        let remaining = &self.buffer[self.field_start..];
        if !remaining.is_empty() {
            let value = self.decode(remaining)?;
            self.field_start = self.buffer.len();
            self.last_terminator = Some(Terminator::Eof);
            return Ok(Some(Token::new(value, Terminator::Eof, 0)));
        }
        if self.last_terminator == Some(Terminator::Field) {
            self.last_terminator = Some(Terminator::Eof);
            return Ok(Some(Token::new(String::new(), Terminator::Eof, 0)));
        }
        Ok(None)
    }

    pub fn reset(&mut self) {
        self.scanner.reset();
        self.buffer.clear();
        self.scan_pos = 0;
        self.field_start = 0;
        self.separators.clear();
        self.last_terminator = None;
        self.row = 1;
        self.finished = false;
        self.base = Position::new();
    }

    /// Recover the opening quote's position by replaying the retained
    /// buffer; only runs on the error path.
    fn unterminated_position(&self) -> Option<Position> {
        let mut pos = self.base;
        let mut open = None;
        let mut in_quotes = false;
        let mut i = 0;
        while i < self.buffer.len() {
            let b = self.buffer[i];
            if b == b'"' {
                if in_quotes && self.buffer.get(i + 1) == Some(&b'"') {
                    pos.advance_byte(b);
                    pos.advance_byte(b);
                    i += 2;
                    continue;
                }
                if !in_quotes {
                    open = Some(pos);
                }
                in_quotes = !in_quotes;
            }
            pos.advance_byte(b);
            i += 1;
        }
        open
    }

    fn decode(&self, field: &[u8]) -> Result<String> {
        let decoded = decode_field(field, b'"');
        if decoded.len() > self.options.max_field_size {
            return Err(Error::FieldTooLarge {
                size: decoded.len(),
                limit: self.options.max_field_size,
                row: self.row,
                source_label: self.options.source.clone(),
            });
        }
        String::from_utf8(decoded.into_owned()).map_err(|_| Error::Decode {
            charset: self.options.charset.clone(),
            source_label: self.options.source.clone(),
        })
    }
}
