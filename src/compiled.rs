use std::collections::VecDeque;

use csv_core::{ReadFieldResult, Reader, ReaderBuilder};

use crate::error::{Error, Result};
use crate::options::ParseOptions;
use crate::token::{Position, Terminator, Token};

/// Initial field output buffer; grown geometrically under `OutputFull`.
const FIELD_BUFFER_SIZE: usize = 64 * 1024;

/// Compiled backend: csv-core's DFA drives field extraction and the
/// results are synthesized into the same unified tokens the hand-written
/// lexer emits.
///
/// The compatibility envelope is UTF-8 input, a single-byte delimiter and
/// `"` quotation. Two behaviors csv-core does not surface are recovered
/// from a byte-level side scan of the raw input: quote parity (so an
/// unterminated quoted field still fails at flush instead of being
/// silently completed) and empty-line detection (csv-core swallows blank
/// rows; the side scan reinserts their record tokens so the assembler can
/// apply `skip_empty_lines` uniformly).
pub struct CompiledLexer {
    reader: Reader,
    options: ParseOptions,
    field_buffer: Vec<u8>,
    /// Field bytes accumulated across `InputEmpty`/`OutputFull` calls.
    partial_field: Vec<u8>,
    tokens: VecDeque<Token>,
    /// XOR quote parity over all input seen so far.
    in_quote: bool,
    /// Byte cursor is at the start of a record (nothing significant seen
    /// since the last record terminator).
    at_record_start: bool,
    /// A CR was seen at record start; the next byte decides whether it was
    /// an empty CRLF line.
    pending_cr: bool,
    row: usize,
    delimiter: u8,
    /// Position of the byte cursor over the raw input.
    position: Position,
    /// Position of the most recent quote that opened a quoted region.
    quote_open: Option<Position>,
}

impl CompiledLexer {
    pub fn new(options: &ParseOptions) -> Result<Self> {
        options.validate()?;
        if !options.compiled_compatible() {
            return Err(Error::EngineUnavailable {
                reason: "options are outside the compiled backend envelope".to_string(),
            });
        }
        let delimiter = options.delimiter.as_bytes()[0];
        Ok(Self {
            reader: ReaderBuilder::new().delimiter(delimiter).build(),
            options: options.clone(),
            field_buffer: vec![0; FIELD_BUFFER_SIZE],
            partial_field: Vec::new(),
            tokens: VecDeque::new(),
            in_quote: false,
            at_record_start: true,
            pending_cr: false,
            row: 1,
            delimiter,
            position: Position::new(),
            quote_open: None,
        })
    }

    pub fn push_chunk(&mut self, chunk: &str) -> Result<()> {
        if self.options.is_cancelled() {
            return Err(self.options.cancelled_error());
        }
        let retained = self.partial_field.len() + chunk.len();
        if retained > self.options.max_buffer_size {
            return Err(Error::BufferOverflow {
                size: retained,
                limit: self.options.max_buffer_size,
                source_label: self.options.source.clone(),
            });
        }
        let bytes = chunk.as_bytes();
        let mut segment_start = 0;

        for (i, &b) in bytes.iter().enumerate() {
            if self.in_quote {
                if b == b'"' {
                    self.in_quote = false;
                }
                self.position.advance_byte(b);
                continue;
            }
            match b {
                b'"' => {
                    self.in_quote = true;
                    self.quote_open = Some(self.position);
                    self.at_record_start = false;
                    self.pending_cr = false;
                }
                b'\r' => {
                    if self.at_record_start {
                        self.pending_cr = true;
                    }
                }
                b'\n' => {
                    if self.at_record_start {
                        // Blank row: csv-core would swallow it. Feed the
                        // preceding segment, then reinsert the record
                        // token.
                        self.feed(&bytes[segment_start..i], false)?;
                        segment_start = i + 1;
                        let len = if self.pending_cr { 2 } else { 1 };
                        self.emit(Token::new(String::new(), Terminator::Record, len));
                    }
                    self.at_record_start = true;
                    self.pending_cr = false;
                }
                _ => {
                    self.at_record_start = false;
                    self.pending_cr = false;
                }
            }
            self.position.advance_byte(b);
        }

        self.feed(&bytes[segment_start..], false)
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.in_quote {
            return Err(Error::UnexpectedEof {
                row: self.row,
                position: self.quote_open,
                source_label: self.options.source.clone(),
            });
        }
        let before = self.tokens.len();
        self.feed(&[], true)?;
        if self.tokens.len() > before {
            // Tokens synthesized at flush terminate the stream, not a
            // record.
            if let Some(last) = self.tokens.back_mut() {
                last.terminator = Terminator::Eof;
                last.terminator_len = 0;
            }
        }
        Ok(())
    }

    pub fn next_token(&mut self) -> Result<Option<Token>> {
        if self.options.is_cancelled() {
            return Err(self.options.cancelled_error());
        }
        Ok(self.tokens.pop_front())
    }

    /// Drive csv-core over one input segment, synthesizing tokens for each
    /// completed field. An empty input slice tells csv-core the stream is
    /// over, so the streaming loop is bounded by the segment length and
    /// only the `eof` drain loop may pass one.
    fn feed(&mut self, input: &[u8], eof: bool) -> Result<()> {
        let mut pos = 0;
        while pos < input.len() {
            let (result, nin, nout) = self.reader.read_field(&input[pos..], &mut self.field_buffer);
            pos += nin;
            match result {
                ReadFieldResult::InputEmpty => {
                    if nout > 0 {
                        self.accumulate(nout)?;
                    }
                }
                ReadFieldResult::OutputFull => {
                    self.accumulate(nout)?;
                    let new_size = self.field_buffer.len() * 2;
                    self.field_buffer.resize(new_size, 0);
                }
                ReadFieldResult::Field { record_end } => {
                    self.accumulate(nout)?;
                    let value = self.take_field()?;
                    let token = if record_end {
                        Token::new(value, Terminator::Record, 1)
                    } else {
                        Token::new(value, Terminator::Field, 1)
                    };
                    self.emit(token);
                }
                ReadFieldResult::End => break,
            }
        }
        if !eof {
            return Ok(());
        }

        loop {
            let (result, _nin, nout) = self.reader.read_field(&[], &mut self.field_buffer);
            match result {
                ReadFieldResult::InputEmpty => break,
                ReadFieldResult::OutputFull => {
                    self.accumulate(nout)?;
                    let new_size = self.field_buffer.len() * 2;
                    self.field_buffer.resize(new_size, 0);
                }
                ReadFieldResult::Field { record_end: _ } => {
                    self.accumulate(nout)?;
                    let value = self.take_field()?;
                    self.emit(Token::new(value, Terminator::Record, 1));
                }
                ReadFieldResult::End => {
                    if nout > 0 {
                        self.accumulate(nout)?;
                        let value = self.take_field()?;
                        self.emit(Token::new(value, Terminator::Record, 1));
                    }
                    break;
                }
            }
        }
        Ok(())
    }

    fn emit(&mut self, token: Token) {
        if token.terminator == Terminator::Record {
            self.row += 1;
        }
        self.tokens.push_back(token);
    }

    fn accumulate(&mut self, nout: usize) -> Result<()> {
        let size = self.partial_field.len() + nout;
        if size > self.options.max_field_size {
            return Err(Error::FieldTooLarge {
                size,
                limit: self.options.max_field_size,
                row: self.row,
                source_label: self.options.source.clone(),
            });
        }
        if size > self.options.max_buffer_size {
            return Err(Error::BufferOverflow {
                size,
                limit: self.options.max_buffer_size,
                source_label: self.options.source.clone(),
            });
        }
        self.partial_field.extend_from_slice(&self.field_buffer[..nout]);
        Ok(())
    }

    fn take_field(&mut self) -> Result<String> {
        let bytes = std::mem::take(&mut self.partial_field);
        String::from_utf8(bytes).map_err(|_| Error::Decode {
            charset: self.options.charset.clone(),
            source_label: self.options.source.clone(),
        })
    }

    /// Reset for reuse after a flush, preserving the configured options.
    pub fn reset(&mut self) {
        self.reader = ReaderBuilder::new().delimiter(self.delimiter).build();
        self.partial_field.clear();
        self.tokens.clear();
        self.in_quote = false;
        self.at_record_start = true;
        self.pending_cr = false;
        self.row = 1;
        self.position = Position::new();
        self.quote_open = None;
    }
}
