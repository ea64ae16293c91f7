//! Streaming CSV parsing engine with interchangeable execution backends.
//!
//! The core is a two-stage pipeline: a lexer that scans character input
//! into unified field tokens with RFC 4180 semantics and configurable
//! delimiter/quotation, and a record assembler that composes tokens into
//! header-bound records under a selectable column-count reconciliation
//! strategy. Around the pipeline sit a binary front-end (charset
//! decoding, BOM handling, optional decompression) and an execution
//! router that picks among interchangeable backends — the portable
//! character lexer, a csv-core DFA, and a SIMD separator indexer — and
//! execution contexts (inline or a background worker) with identical
//! external behavior.
//!
//! Memory and time stay bounded under hostile input: the retained buffer,
//! individual field sizes, per-record field counts, and one-shot binary
//! sizes are all independently capped, and every limit error reports the
//! attempted size alongside the configured cap.
//!
//! # Example
//!
//! ```
//! use csv_flux::{parse_string, ParseOptions};
//!
//! let records = parse_string("name,age\nAlice,30\n", &ParseOptions::default())?;
//! assert_eq!(records[0].get("name"), Some("Alice"));
//! # Ok::<(), csv_flux::Error>(())
//! ```

pub mod accel;
pub mod assembler;
pub mod binary;
pub mod compiled;
pub mod csv_json;
pub mod engine;
pub mod error;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod token;
pub mod worker;

#[cfg(test)]
mod tests;

pub use assembler::{Record, RecordAssembler};
pub use csv_json::{parse_binary_to_json, parse_csv_to_json};
pub use engine::{Backend, Capabilities, ExecutionContext, FallbackNotice, InputShape};
pub use error::{Error, Result};
pub use lexer::FieldLexer;
pub use options::{
    CancelSignal, ColumnCountStrategy, DecompressionFormat, OptimizationHint, OutputFormat,
    ParseOptions,
};
pub use parser::{Parser, RecordIter, RecordStream, StreamParser};
pub use token::{Location, Position, Terminator, Token};

/// One-shot parse of a string with the given options.
pub fn parse_string(input: &str, options: &ParseOptions) -> Result<Vec<Record>> {
    Parser::new(options.clone())?.parse_to_vec(input)
}

/// One-shot parse of binary input through the charset/decompression
/// front-end.
pub fn parse_binary(input: &[u8], options: &ParseOptions) -> Result<Vec<Record>> {
    Parser::new(options.clone())?.parse_binary_to_vec(input)
}

/// One-shot parse of a byte stream.
pub fn parse_reader(
    reader: impl std::io::Read + Send + 'static,
    options: &ParseOptions,
) -> Result<Vec<Record>> {
    Parser::new(options.clone())?.parse_reader_to_vec(reader)
}
